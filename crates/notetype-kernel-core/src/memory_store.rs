//! In-process [`NoteStore`] backed by ordered maps.
//!
//! Mirrors the cascade, remap and sort-field behavior of the SQLite store, which makes it
//! the default fixture for pipeline tests and a usable backend for embedding.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{CardId, DeckId, NoteId, NoteType, NoteTypeId};
use crate::store::{CardRecord, NewCard, NoteStore, OrdinalRemap, StorageError};
use crate::KernelError;

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("note not found: {0}")]
    NoteNotFound(NoteId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub id: NoteId,
    pub note_type_id: NoteTypeId,
    pub fields: Vec<String>,
    /// Cached text of the sort field.
    pub sort_field: String,
    pub modified: i64,
    pub usn: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCard {
    pub id: CardId,
    pub note_id: NoteId,
    pub ordinal: usize,
    pub deck_id: DeckId,
    pub modified: i64,
    pub usn: i32,
}

impl StoredCard {
    fn record(&self) -> CardRecord {
        CardRecord { id: self.id, note_id: self.note_id, ordinal: self.ordinal }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    notes: BTreeMap<NoteId, StoredNote>,
    cards: BTreeMap<CardId, StoredCard>,
    next_note_id: i64,
    next_card_id: i64,
    usn: i32,
    schema_changes: usize,
    note_types_json: Option<String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { next_note_id: 1, next_card_id: 1, ..Self::default() }
    }

    #[must_use]
    pub fn with_usn(mut self, usn: i32) -> Self {
        self.usn = usn;
        self
    }

    /// Insert a note without generating cards.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] when the note type has not been added yet.
    pub fn add_note(
        &mut self,
        note_type: &NoteType,
        fields: Vec<String>,
        modified: i64,
    ) -> Result<NoteId, KernelError> {
        let Some(note_type_id) = note_type.id else {
            return Err(KernelError::Contract(format!(
                "note type {:?} must be added before notes can use it",
                note_type.name
            )));
        };
        let id = NoteId(self.next_note_id);
        self.next_note_id += 1;
        let sort_field = fields.get(note_type.sort_field).cloned().unwrap_or_default();
        self.notes.insert(
            id,
            StoredNote { id, note_type_id, fields, sort_field, modified, usn: self.usn },
        );
        Ok(id)
    }

    #[must_use]
    pub fn note(&self, id: NoteId) -> Option<&StoredNote> {
        self.notes.get(&id)
    }

    #[must_use]
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    #[must_use]
    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    /// Cards of one note ordered by template ordinal.
    #[must_use]
    pub fn cards_of_note(&self, note_id: NoteId) -> Vec<&StoredCard> {
        let mut cards =
            self.cards.values().filter(|card| card.note_id == note_id).collect::<Vec<_>>();
        cards.sort_by_key(|card| (card.ordinal, card.id));
        cards
    }

    /// How many times the schema-changed marker was raised.
    #[must_use]
    pub fn schema_change_count(&self) -> usize {
        self.schema_changes
    }

    fn note_ids_of(&self, note_type_id: NoteTypeId) -> BTreeSet<NoteId> {
        self.notes
            .values()
            .filter(|note| note.note_type_id == note_type_id)
            .map(|note| note.id)
            .collect()
    }

    fn note_mut(&mut self, note_id: NoteId) -> Result<&mut StoredNote, StorageError> {
        self.notes
            .get_mut(&note_id)
            .ok_or_else(|| StorageError::new(MemoryStoreError::NoteNotFound(note_id)))
    }
}

impl NoteStore for MemoryStore {
    fn note_ids_for_note_type(
        &self,
        note_type_id: NoteTypeId,
    ) -> Result<Vec<NoteId>, StorageError> {
        Ok(self.note_ids_of(note_type_id).into_iter().collect())
    }

    fn note_fields(&self, note_id: NoteId) -> Result<Vec<String>, StorageError> {
        self.notes
            .get(&note_id)
            .map(|note| note.fields.clone())
            .ok_or_else(|| StorageError::new(MemoryStoreError::NoteNotFound(note_id)))
    }

    fn write_note_fields(
        &mut self,
        note_id: NoteId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        let note = self.note_mut(note_id)?;
        note.fields = fields.to_vec();
        note.modified = modified;
        note.usn = usn;
        Ok(())
    }

    fn reassign_note(
        &mut self,
        note_id: NoteId,
        note_type_id: NoteTypeId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        let note = self.note_mut(note_id)?;
        note.note_type_id = note_type_id;
        note.fields = fields.to_vec();
        note.modified = modified;
        note.usn = usn;
        Ok(())
    }

    fn refresh_sort_fields(
        &mut self,
        note_ids: &[NoteId],
        sort_field: usize,
    ) -> Result<(), StorageError> {
        for note_id in note_ids {
            let note = self.note_mut(*note_id)?;
            note.sort_field = note.fields.get(sort_field).cloned().unwrap_or_default();
        }
        Ok(())
    }

    fn cards_for_template(
        &self,
        note_type_id: NoteTypeId,
        ordinal: usize,
    ) -> Result<Vec<CardRecord>, StorageError> {
        let note_ids = self.note_ids_of(note_type_id);
        Ok(self
            .cards
            .values()
            .filter(|card| card.ordinal == ordinal && note_ids.contains(&card.note_id))
            .map(StoredCard::record)
            .collect())
    }

    fn cards_for_notes(&self, note_ids: &[NoteId]) -> Result<Vec<CardRecord>, StorageError> {
        let wanted = note_ids.iter().copied().collect::<BTreeSet<_>>();
        Ok(self
            .cards
            .values()
            .filter(|card| wanted.contains(&card.note_id))
            .map(StoredCard::record)
            .collect())
    }

    fn card_count_for_note(&self, note_id: NoteId) -> Result<usize, StorageError> {
        Ok(self.cards.values().filter(|card| card.note_id == note_id).count())
    }

    fn delete_cards(&mut self, card_ids: &[CardId]) -> Result<(), StorageError> {
        for card_id in card_ids {
            self.cards.remove(card_id);
        }
        Ok(())
    }

    fn remap_card_ordinals(
        &mut self,
        note_type_id: NoteTypeId,
        remap: &OrdinalRemap,
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        let note_ids = self.note_ids_of(note_type_id);
        for card in self.cards.values_mut().filter(|card| note_ids.contains(&card.note_id)) {
            card.ordinal = remap.target(card.ordinal);
            card.modified = modified;
            card.usn = usn;
        }
        Ok(())
    }

    fn set_card_ordinals(
        &mut self,
        updates: &[(CardId, usize)],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError> {
        for (card_id, ordinal) in updates {
            if let Some(card) = self.cards.get_mut(card_id) {
                card.ordinal = *ordinal;
                card.modified = modified;
                card.usn = usn;
            }
        }
        Ok(())
    }

    fn add_card(
        &mut self,
        card: &NewCard,
        modified: i64,
        usn: i32,
    ) -> Result<CardId, StorageError> {
        if !self.notes.contains_key(&card.note_id) {
            return Err(StorageError::new(MemoryStoreError::NoteNotFound(card.note_id)));
        }
        let id = CardId(self.next_card_id);
        self.next_card_id += 1;
        self.cards.insert(
            id,
            StoredCard {
                id,
                note_id: card.note_id,
                ordinal: card.ordinal,
                deck_id: card.deck_id,
                modified,
                usn,
            },
        );
        Ok(id)
    }

    fn delete_notes_for_note_type(&mut self, note_type_id: NoteTypeId) -> Result<(), StorageError> {
        let note_ids = self.note_ids_of(note_type_id);
        self.cards.retain(|_, card| !note_ids.contains(&card.note_id));
        self.notes.retain(|id, _| !note_ids.contains(id));
        Ok(())
    }

    fn mark_schema_changed(&mut self) -> Result<(), StorageError> {
        self.schema_changes += 1;
        Ok(())
    }

    fn usn(&self) -> Result<i32, StorageError> {
        Ok(self.usn)
    }

    fn load_note_types(&self) -> Result<Option<String>, StorageError> {
        Ok(self.note_types_json.clone())
    }

    fn save_note_types(&mut self, json: &str) -> Result<(), StorageError> {
        self.note_types_json = Some(json.to_string());
        Ok(())
    }
}
