use std::path::Path;

use anyhow::{anyhow, Context, Result};
use notetype_kernel_core::{
    join_fields, split_fields, CardId, CardRecord, DeckId, NewCard, NoteId, NoteStore, NoteType,
    NoteTypeId, OrdinalRemap, StorageError,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS collection_meta (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  schema_modified INTEGER NOT NULL DEFAULT 0,
  usn INTEGER NOT NULL DEFAULT 0,
  note_types_json TEXT
);

INSERT OR IGNORE INTO collection_meta(id, schema_modified, usn, note_types_json)
VALUES (1, 0, 0, NULL);

CREATE TABLE IF NOT EXISTS notes (
  id INTEGER PRIMARY KEY,
  note_type_id INTEGER NOT NULL,
  modified INTEGER NOT NULL,
  usn INTEGER NOT NULL,
  fields TEXT NOT NULL,
  sort_field TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS cards (
  id INTEGER PRIMARY KEY,
  note_id INTEGER NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
  ordinal INTEGER NOT NULL CHECK (ordinal >= 0),
  deck_id INTEGER NOT NULL,
  modified INTEGER NOT NULL,
  usn INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notes_note_type_id ON notes(note_type_id);
CREATE INDEX IF NOT EXISTS idx_cards_note_id ON cards(note_id);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteRow {
    pub id: NoteId,
    pub note_type_id: NoteTypeId,
    pub fields: Vec<String>,
    pub sort_field: String,
    pub modified: i64,
    pub usn: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardRow {
    pub id: CardId,
    pub note_id: NoteId,
    pub ordinal: usize,
    pub deck_id: DeckId,
    pub modified: i64,
    pub usn: i32,
}

impl SqliteStore {
    /// Open a SQLite-backed note store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than
    /// this build.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.conn.transaction().context("failed to begin migration transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration 001")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration 001")?;
            tracing::info!(version = 1, "applied sqlite migration");
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    /// Insert a note of an added note type. Cards are not generated.
    ///
    /// # Errors
    /// Returns an error when the note type has no id or the insert fails.
    pub fn add_note(
        &mut self,
        note_type: &NoteType,
        fields: &[String],
        modified: i64,
    ) -> Result<NoteId> {
        let note_type_id = note_type
            .id
            .ok_or_else(|| anyhow!("note type {:?} has not been added", note_type.name))?;
        let usn = self.current_usn()?;
        let sort_field = fields.get(note_type.sort_field).cloned().unwrap_or_default();
        self.conn
            .execute(
                "INSERT INTO notes(note_type_id, modified, usn, fields, sort_field)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![note_type_id.0, modified, usn, join_fields(fields), sort_field],
            )
            .with_context(|| format!("failed to insert note for note type {note_type_id}"))?;
        Ok(NoteId(self.conn.last_insert_rowid()))
    }

    /// # Errors
    /// Returns an error when the query fails.
    pub fn note(&self, note_id: NoteId) -> Result<Option<NoteRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT note_type_id, fields, sort_field, modified, usn FROM notes WHERE id = ?1",
                params![note_id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i32>(4)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load note {note_id}"))?;
        Ok(row.map(|(note_type_id, fields, sort_field, modified, usn)| NoteRow {
            id: note_id,
            note_type_id: NoteTypeId(note_type_id),
            fields: split_fields(&fields),
            sort_field,
            modified,
            usn,
        }))
    }

    /// Cards of one note ordered by template ordinal.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored ordinal is negative.
    pub fn list_cards(&self, note_id: NoteId) -> Result<Vec<CardRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, ordinal, deck_id, modified, usn FROM cards
                 WHERE note_id = ?1 ORDER BY ordinal, id",
            )
            .context("failed to prepare card listing")?;
        let rows = stmt.query_map(params![note_id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i32>(4)?,
            ))
        })?;

        let mut cards = Vec::new();
        for row in rows {
            let (id, ordinal, deck_id, modified, usn) = row?;
            cards.push(CardRow {
                id: CardId(id),
                note_id,
                ordinal: from_sql_ordinal(ordinal)?,
                deck_id: DeckId(deck_id),
                modified,
                usn,
            });
        }
        Ok(cards)
    }

    /// Millisecond timestamp of the last schema change, `0` if none.
    ///
    /// # Errors
    /// Returns an error when the metadata row cannot be read.
    pub fn schema_modified(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT schema_modified FROM collection_meta WHERE id = 1", [], |row| {
                row.get::<_, i64>(0)
            })
            .context("failed to read schema modification time")
    }

    fn current_usn(&self) -> Result<i32> {
        self.conn
            .query_row("SELECT usn FROM collection_meta WHERE id = 1", [], |row| {
                row.get::<_, i32>(0)
            })
            .context("failed to read update sequence number")
    }

    fn load_note_ids(&self, note_type_id: NoteTypeId) -> Result<Vec<NoteId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM notes WHERE note_type_id = ?1 ORDER BY id")
            .context("failed to prepare note id lookup")?;
        let rows = stmt.query_map(params![note_type_id.0], |row| row.get::<_, i64>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(NoteId(row?));
        }
        Ok(ids)
    }

    fn load_fields(&self, note_id: NoteId) -> Result<Vec<String>> {
        let fields = self
            .conn
            .query_row("SELECT fields FROM notes WHERE id = ?1", params![note_id.0], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("failed to load fields of note {note_id}"))?
            .ok_or_else(|| anyhow!("note not found: {note_id}"))?;
        Ok(split_fields(&fields))
    }

    fn update_note(
        &mut self,
        note_id: NoteId,
        note_type_id: Option<NoteTypeId>,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<()> {
        let changed = match note_type_id {
            Some(note_type_id) => self.conn.execute(
                "UPDATE notes SET note_type_id = ?1, fields = ?2, modified = ?3, usn = ?4
                 WHERE id = ?5",
                params![note_type_id.0, join_fields(fields), modified, usn, note_id.0],
            ),
            None => self.conn.execute(
                "UPDATE notes SET fields = ?1, modified = ?2, usn = ?3 WHERE id = ?4",
                params![join_fields(fields), modified, usn, note_id.0],
            ),
        }
        .with_context(|| format!("failed to update note {note_id}"))?;
        if changed == 0 {
            return Err(anyhow!("note not found: {note_id}"));
        }
        Ok(())
    }

    fn update_sort_fields(&mut self, note_ids: &[NoteId], sort_field: usize) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin sort field transaction")?;
        {
            let mut select = tx
                .prepare("SELECT fields FROM notes WHERE id = ?1")
                .context("failed to prepare note lookup")?;
            let mut update = tx
                .prepare("UPDATE notes SET sort_field = ?1 WHERE id = ?2")
                .context("failed to prepare sort field update")?;
            for note_id in note_ids {
                let fields: Option<String> = select
                    .query_row(params![note_id.0], |row| row.get(0))
                    .optional()
                    .with_context(|| format!("failed to load note {note_id}"))?;
                let Some(fields) = fields else {
                    continue;
                };
                let value = split_fields(&fields).into_iter().nth(sort_field).unwrap_or_default();
                update
                    .execute(params![value, note_id.0])
                    .with_context(|| format!("failed to update sort field of note {note_id}"))?;
            }
        }
        tx.commit().context("failed to commit sort field update")?;
        Ok(())
    }

    fn load_template_cards(
        &self,
        note_type_id: NoteTypeId,
        ordinal: usize,
    ) -> Result<Vec<CardRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.note_id, c.ordinal FROM cards c
                 JOIN notes n ON n.id = c.note_id
                 WHERE n.note_type_id = ?1 AND c.ordinal = ?2
                 ORDER BY c.id",
            )
            .context("failed to prepare template card lookup")?;
        let rows =
            stmt.query_map(params![note_type_id.0, to_sql_ordinal(ordinal)?], card_record_row)?;
        collect_card_records(rows)
    }

    fn load_note_cards(&self, note_ids: &[NoteId]) -> Result<Vec<CardRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, note_id, ordinal FROM cards WHERE note_id = ?1
                 ORDER BY ordinal, id",
            )
            .context("failed to prepare note card lookup")?;
        let mut cards = Vec::new();
        for note_id in note_ids {
            let rows = stmt.query_map(params![note_id.0], card_record_row)?;
            cards.extend(collect_card_records(rows)?);
        }
        Ok(cards)
    }

    fn count_cards(&self, note_id: NoteId) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cards WHERE note_id = ?1", params![note_id.0], |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count cards of note {note_id}"))?;
        usize::try_from(count).context("card count out of range")
    }

    fn remove_cards(&mut self, card_ids: &[CardId]) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin card delete transaction")?;
        {
            let mut delete = tx
                .prepare("DELETE FROM cards WHERE id = ?1")
                .context("failed to prepare card delete")?;
            for card_id in card_ids {
                delete
                    .execute(params![card_id.0])
                    .with_context(|| format!("failed to delete card {card_id}"))?;
            }
        }
        tx.commit().context("failed to commit card delete")?;
        Ok(())
    }

    /// Read every card of the note type first, then write the remapped ordinals.
    fn apply_ordinal_remap(
        &mut self,
        note_type_id: NoteTypeId,
        remap: &OrdinalRemap,
        modified: i64,
        usn: i32,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin ordinal remap transaction")?;
        let mut updates = Vec::new();
        {
            let mut select = tx
                .prepare(
                    "SELECT c.id, c.ordinal FROM cards c
                     JOIN notes n ON n.id = c.note_id
                     WHERE n.note_type_id = ?1",
                )
                .context("failed to prepare card ordinal lookup")?;
            let rows = select.query_map(params![note_type_id.0], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (card_id, ordinal) = row?;
                let target = remap.target(from_sql_ordinal(ordinal)?);
                updates.push((card_id, to_sql_ordinal(target)?));
            }

            let mut update = tx
                .prepare("UPDATE cards SET ordinal = ?1, modified = ?2, usn = ?3 WHERE id = ?4")
                .context("failed to prepare card ordinal update")?;
            for (card_id, ordinal) in &updates {
                update
                    .execute(params![ordinal, modified, usn, card_id])
                    .with_context(|| format!("failed to remap ordinal of card {card_id}"))?;
            }
        }
        tx.commit().context("failed to commit ordinal remap")?;
        tracing::debug!(
            note_type_id = %note_type_id,
            cards = updates.len(),
            "remapped card ordinals"
        );
        Ok(())
    }

    fn update_card_ordinals(
        &mut self,
        updates: &[(CardId, usize)],
        modified: i64,
        usn: i32,
    ) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin card update transaction")?;
        {
            let mut update = tx
                .prepare("UPDATE cards SET ordinal = ?1, modified = ?2, usn = ?3 WHERE id = ?4")
                .context("failed to prepare card ordinal update")?;
            for (card_id, ordinal) in updates {
                update
                    .execute(params![to_sql_ordinal(*ordinal)?, modified, usn, card_id.0])
                    .with_context(|| format!("failed to update ordinal of card {card_id}"))?;
            }
        }
        tx.commit().context("failed to commit card ordinal update")?;
        Ok(())
    }

    fn insert_card(&mut self, card: &NewCard, modified: i64, usn: i32) -> Result<CardId> {
        self.conn
            .execute(
                "INSERT INTO cards(note_id, ordinal, deck_id, modified, usn)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    card.note_id.0,
                    to_sql_ordinal(card.ordinal)?,
                    card.deck_id.0,
                    modified,
                    usn
                ],
            )
            .with_context(|| format!("failed to insert card for note {}", card.note_id))?;
        Ok(CardId(self.conn.last_insert_rowid()))
    }

    fn remove_notes(&mut self, note_type_id: NoteTypeId) -> Result<()> {
        let tx = self.conn.transaction().context("failed to begin note delete transaction")?;
        let cards = tx
            .execute(
                "DELETE FROM cards WHERE note_id IN (SELECT id FROM notes WHERE note_type_id = ?1)",
                params![note_type_id.0],
            )
            .context("failed to delete cards of note type")?;
        let notes = tx
            .execute("DELETE FROM notes WHERE note_type_id = ?1", params![note_type_id.0])
            .context("failed to delete notes of note type")?;
        tx.commit().context("failed to commit note delete")?;
        tracing::info!(note_type_id = %note_type_id, notes, cards, "deleted notes of note type");
        Ok(())
    }

    fn touch_schema(&mut self) -> Result<()> {
        let now = now_millis();
        self.conn
            .execute("UPDATE collection_meta SET schema_modified = ?1 WHERE id = 1", params![now])
            .context("failed to mark schema as modified")?;
        Ok(())
    }

    fn read_note_types(&self) -> Result<Option<String>> {
        let json = self
            .conn
            .query_row("SELECT note_types_json FROM collection_meta WHERE id = 1", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()
            .context("failed to read note type registry")?;
        Ok(json.flatten())
    }

    fn write_note_types(&mut self, json: &str) -> Result<()> {
        self.conn
            .execute("UPDATE collection_meta SET note_types_json = ?1 WHERE id = 1", params![json])
            .context("failed to write note type registry")?;
        Ok(())
    }
}

impl NoteStore for SqliteStore {
    fn note_ids_for_note_type(
        &self,
        note_type_id: NoteTypeId,
    ) -> Result<Vec<NoteId>, StorageError> {
        self.load_note_ids(note_type_id).map_err(StorageError::new)
    }

    fn note_fields(&self, note_id: NoteId) -> Result<Vec<String>, StorageError> {
        self.load_fields(note_id).map_err(StorageError::new)
    }

    fn write_note_fields(
        &mut self,
        note_id: NoteId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        self.update_note(note_id, None, fields, modified, usn).map_err(StorageError::new)
    }

    fn reassign_note(
        &mut self,
        note_id: NoteId,
        note_type_id: NoteTypeId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        self.update_note(note_id, Some(note_type_id), fields, modified, usn)
            .map_err(StorageError::new)
    }

    fn refresh_sort_fields(
        &mut self,
        note_ids: &[NoteId],
        sort_field: usize,
    ) -> Result<(), StorageError> {
        self.update_sort_fields(note_ids, sort_field).map_err(StorageError::new)
    }

    fn cards_for_template(
        &self,
        note_type_id: NoteTypeId,
        ordinal: usize,
    ) -> Result<Vec<CardRecord>, StorageError> {
        self.load_template_cards(note_type_id, ordinal).map_err(StorageError::new)
    }

    fn cards_for_notes(&self, note_ids: &[NoteId]) -> Result<Vec<CardRecord>, StorageError> {
        self.load_note_cards(note_ids).map_err(StorageError::new)
    }

    fn card_count_for_note(&self, note_id: NoteId) -> Result<usize, StorageError> {
        self.count_cards(note_id).map_err(StorageError::new)
    }

    fn delete_cards(&mut self, card_ids: &[CardId]) -> Result<(), StorageError> {
        self.remove_cards(card_ids).map_err(StorageError::new)
    }

    fn remap_card_ordinals(
        &mut self,
        note_type_id: NoteTypeId,
        remap: &OrdinalRemap,
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        self.apply_ordinal_remap(note_type_id, remap, modified, usn).map_err(StorageError::new)
    }

    fn set_card_ordinals(
        &mut self,
        updates: &[(CardId, usize)],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        self.update_card_ordinals(updates, modified, usn).map_err(StorageError::new)
    }

    fn add_card(
        &mut self,
        card: &NewCard,
        modified: i64,
        usn: i32,
    ) -> Result<CardId, StorageError> {
        self.insert_card(card, modified, usn).map_err(StorageError::new)
    }

    fn delete_notes_for_note_type(&mut self, note_type_id: NoteTypeId) -> Result<(), StorageError> {
        self.remove_notes(note_type_id).map_err(StorageError::new)
    }

    fn mark_schema_changed(&mut self) -> Result<(), StorageError> {
        self.touch_schema().map_err(StorageError::new)
    }

    fn usn(&self) -> Result<i32, StorageError> {
        self.current_usn().map_err(StorageError::new)
    }

    fn load_note_types(&self) -> Result<Option<String>, StorageError> {
        self.read_note_types().map_err(StorageError::new)
    }

    fn save_note_types(&mut self, json: &str) -> Result<(), StorageError> {
        self.write_note_types(json).map_err(StorageError::new)
    }
}

fn card_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn collect_card_records(
    rows: impl Iterator<Item = rusqlite::Result<(i64, i64, i64)>>,
) -> Result<Vec<CardRecord>> {
    let mut cards = Vec::new();
    for row in rows {
        let (id, note_id, ordinal) = row?;
        cards.push(CardRecord {
            id: CardId(id),
            note_id: NoteId(note_id),
            ordinal: from_sql_ordinal(ordinal)?,
        });
    }
    Ok(cards)
}

fn to_sql_ordinal(ordinal: usize) -> Result<i64> {
    i64::try_from(ordinal).with_context(|| format!("ordinal {ordinal} does not fit in sqlite"))
}

fn from_sql_ordinal(ordinal: i64) -> Result<usize> {
    usize::try_from(ordinal).with_context(|| format!("stored ordinal {ordinal} is negative"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_millis() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use super::*;
    use notetype_kernel_core::{
        FixedClock, KernelError, NoteTypeKind, NoteTypeManager, NoteTypeRegistry,
        RemoveTemplateOutcome, RenderedCard, Template,
    };
    use ulid::Ulid;

    fn render(note_type: &NoteType, template_ordinal: usize, fields: &[String]) -> RenderedCard {
        let Some(template) = note_type.templates.get(template_ordinal) else {
            return RenderedCard::default();
        };
        let mut question = template.question_format.clone();
        for field in &note_type.fields {
            let value = fields.get(field.ordinal).map_or("", String::as_str);
            question = question.replace(&format!("{{{{{}}}}}", field.name), value);
        }
        RenderedCard { question, answer: String::new() }
    }

    type Renderer = fn(&NoteType, usize, &[String]) -> RenderedCard;
    type Manager = NoteTypeManager<SqliteStore, Renderer, FixedClock>;

    fn migrated_manager() -> Result<Manager> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        let renderer: Renderer = render;
        Ok(NoteTypeManager::open(store, renderer, FixedClock { secs: 1_700_000_000 })?)
    }

    fn basic(manager: &mut Manager, fields: &[&str], questions: &[&str]) -> Result<NoteType> {
        let mut note_type = manager.new_note_type("Basic", NoteTypeKind::standard());
        for name in fields {
            manager.add_field(&mut note_type, notetype_kernel_core::Field::new(*name))?;
        }
        for (index, question) in questions.iter().enumerate() {
            manager.add_template(
                &mut note_type,
                Template::new(format!("Card {}", index + 1)).with_formats(*question, ""),
            )?;
        }
        manager.add(&mut note_type)?;
        Ok(note_type)
    }

    fn add_note(manager: &mut Manager, note_type: &NoteType, values: &[&str]) -> Result<NoteId> {
        let fields = values.iter().map(|value| (*value).to_string()).collect::<Vec<_>>();
        let note_id = manager.store_mut().add_note(note_type, &fields, 1_700_000_000)?;
        let id = note_type.id.ok_or_else(|| anyhow!("note type was not added"))?;
        manager.generate_cards(id, &[note_id])?;
        Ok(note_id)
    }

    fn ordinals(manager: &Manager, note_id: NoteId) -> Result<Vec<usize>> {
        Ok(manager.store().list_cards(note_id)?.iter().map(|card| card.ordinal).collect())
    }

    #[test]
    fn migrate_is_idempotent_and_reports_status() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        assert_eq!(store.schema_modified()?, 0);
        Ok(())
    }

    #[test]
    fn sqlite_constraints_enforce_checks_and_foreign_keys() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let fk_result = store.conn.execute(
            "INSERT INTO cards(note_id, ordinal, deck_id, modified, usn) VALUES (?1, 0, 1, 0, 0)",
            params![42_i64],
        );
        assert!(fk_result.is_err());

        store.conn.execute(
            "INSERT INTO notes(id, note_type_id, modified, usn, fields) VALUES (1, 1, 0, 0, 'a')",
            [],
        )?;
        let check_result = store.conn.execute(
            "INSERT INTO cards(note_id, ordinal, deck_id, modified, usn) VALUES (1, -1, 1, 0, 0)",
            [],
        );
        assert!(check_result.is_err());

        let meta_result =
            store.conn.execute("INSERT INTO collection_meta(id) VALUES (2)", []);
        assert!(meta_result.is_err());
        Ok(())
    }

    #[test]
    fn registry_round_trips_through_collection_meta() -> Result<()> {
        let mut manager = migrated_manager()?;
        let note_type = basic(&mut manager, &["Front", "Back"], &["{{Front}}", "{{Back}}"])?;
        assert!(manager.flush()?);

        let registry = NoteTypeRegistry::load_from(manager.store())?;
        let id = note_type.id.ok_or_else(|| anyhow!("note type was not added"))?;
        assert_eq!(registry.get(id), Some(&note_type));
        assert_eq!(registry.current().and_then(|nt| nt.id), Some(id));
        Ok(())
    }

    #[test]
    fn template_removal_orphan_check_runs_against_sqlite() -> Result<()> {
        let mut manager = migrated_manager()?;
        let mut note_type = basic(&mut manager, &["Front", "Back"], &["{{Front}}", "{{Back}}"])?;
        let both = add_note(&mut manager, &note_type, &["f", "b"])?;
        let back_only = add_note(&mut manager, &note_type, &["", "b"])?;

        let outcome = manager.remove_template(&mut note_type, 1)?;
        assert_eq!(outcome, RemoveTemplateOutcome::WouldOrphanNote { note_id: back_only });
        assert_eq!(ordinals(&manager, both)?, vec![0, 1]);
        assert_eq!(manager.store().schema_modified()?, 0);

        // back_only has no card on the first template, so nothing is orphaned
        let outcome = manager.remove_template(&mut note_type, 0)?;
        assert_eq!(outcome, RemoveTemplateOutcome::Removed { deleted_cards: 1 });
        assert_eq!(ordinals(&manager, both)?, vec![0]);
        assert_eq!(ordinals(&manager, back_only)?, vec![0]);
        assert!(manager.store().schema_modified()? > 0);
        Ok(())
    }

    #[test]
    fn template_removal_deletes_and_shifts_cards() -> Result<()> {
        let mut manager = migrated_manager()?;
        let mut note_type =
            basic(&mut manager, &["A", "B", "C"], &["{{A}}", "{{B}}", "{{C}}"])?;
        let full = add_note(&mut manager, &note_type, &["a", "b", "c"])?;
        let tail = add_note(&mut manager, &note_type, &["", "b", "c"])?;

        let outcome = manager.remove_template(&mut note_type, 0)?;
        assert_eq!(outcome, RemoveTemplateOutcome::Removed { deleted_cards: 1 });
        assert_eq!(ordinals(&manager, full)?, vec![0, 1]);
        assert_eq!(ordinals(&manager, tail)?, vec![0, 1]);
        assert!(manager.store().schema_modified()? > 0);

        manager.move_template(&mut note_type, 1, 0)?;
        let cards = manager.store().list_cards(full)?;
        assert_eq!(cards.iter().map(|card| card.ordinal).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(cards[0].modified, 1_700_000_000);
        Ok(())
    }

    #[test]
    fn field_pipeline_rewrites_stored_notes() -> Result<()> {
        let mut manager = migrated_manager()?;
        let mut note_type = basic(&mut manager, &["Front", "Back"], &["{{Front}}"])?;
        let note_id = add_note(&mut manager, &note_type, &["hi", "there"])?;

        manager.add_field(&mut note_type, notetype_kernel_core::Field::new("Extra"))?;
        manager.move_field(&mut note_type, 2, 0)?;
        let note = manager.store().note(note_id)?.ok_or_else(|| anyhow!("note vanished"))?;
        assert_eq!(note.fields, vec!["", "hi", "there"]);
        assert_eq!(note_type.sort_field, 1);

        manager.remove_field(&mut note_type, 1)?;
        let note = manager.store().note(note_id)?.ok_or_else(|| anyhow!("note vanished"))?;
        assert_eq!(note.fields, vec!["", "there"]);
        assert_eq!(note.sort_field, "there");
        Ok(())
    }

    #[test]
    fn emptied_note_type_gains_exactly_one_value_per_new_field() -> Result<()> {
        let mut manager = migrated_manager()?;
        let mut note_type = basic(&mut manager, &["Front", "Back"], &["{{Front}}"])?;
        let note_id = add_note(&mut manager, &note_type, &["x", "y"])?;

        manager.remove_field(&mut note_type, 1)?;
        manager.remove_field(&mut note_type, 0)?;
        manager.add_field(&mut note_type, notetype_kernel_core::Field::new("New"))?;

        let note = manager.store().note(note_id)?.ok_or_else(|| anyhow!("note vanished"))?;
        assert_eq!(note.fields.len(), note_type.fields.len());
        assert_eq!(note.fields, vec![""]);
        Ok(())
    }

    #[test]
    fn change_note_type_moves_fields_and_cards() -> Result<()> {
        let mut manager = migrated_manager()?;
        let source = basic(&mut manager, &["Front", "Back"], &["{{Front}}"])?;
        let target = basic(&mut manager, &["Intro", "Front", "Back"], &["{{Front}}", "{{Intro}}"])?;
        let note_id = add_note(&mut manager, &source, &["q", "a"])?;

        manager.change_note_type(
            &source,
            &[note_id],
            &target,
            &BTreeMap::from([(0, 1), (1, 2)]),
            &BTreeMap::from([(0, Some(0))]),
        )?;
        let note = manager.store().note(note_id)?.ok_or_else(|| anyhow!("note vanished"))?;
        assert_eq!(note.fields, vec!["", "q", "a"]);
        assert_eq!(Some(note.note_type_id), target.id);
        assert_eq!(ordinals(&manager, note_id)?, vec![0]);
        Ok(())
    }

    #[test]
    fn removing_a_note_type_deletes_its_notes_and_cards() -> Result<()> {
        let mut manager = migrated_manager()?;
        let note_type = basic(&mut manager, &["Front"], &["{{Front}}"])?;
        let note_id = add_note(&mut manager, &note_type, &["x"])?;
        let id = note_type.id.ok_or_else(|| anyhow!("note type was not added"))?;

        manager.remove(id)?;
        assert!(manager.store().note(note_id)?.is_none());
        assert!(manager.store().list_cards(note_id)?.is_empty());
        assert!(matches!(manager.remove(id), Err(KernelError::NoteTypeNotFound(_))));
        let report = manager.store().integrity_check()?;
        assert!(report.foreign_key_violations.is_empty());
        Ok(())
    }

    #[test]
    fn missing_note_surfaces_as_storage_error() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        let err = match store.note_fields(NoteId(99)) {
            Ok(fields) => panic!("expected missing note, got {fields:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("note not found: 99"));
        assert!(store.write_note_fields(NoteId(99), &[], 0, 0).is_err());
        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, 1);
        Ok(())
    }

    #[test]
    fn note_types_survive_reopening_the_database() -> Result<()> {
        let db_path = std::env::temp_dir().join(format!("ntk-store-{}.sqlite3", Ulid::new()));
        let id = {
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
            let renderer: fn(&NoteType, usize, &[String]) -> RenderedCard = render;
            let mut manager = NoteTypeManager::open(store, renderer, FixedClock { secs: 5 })?;
            let note_type = basic(&mut manager, &["Front"], &["{{Front}}"])?;
            manager.flush()?;
            note_type.id.ok_or_else(|| anyhow!("note type was not added"))?
        };

        let store = SqliteStore::open(&db_path)?;
        let registry = NoteTypeRegistry::load_from(&store)?;
        assert_eq!(registry.get(id).map(|nt| nt.name.as_str()), Some("Basic"));
        drop(store);

        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
        Ok(())
    }
}
