use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::{CardId, DeckId, NoteId, NoteTypeId};

/// Failure reported by a [`NoteStore`] implementation, passed through unchanged.
pub struct StorageError(Box<dyn Error + Send + Sync>);

impl StorageError {
    pub fn new(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

impl Debug for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "storage error: {}", self.0)
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.0.as_ref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct CardRecord {
    pub id: CardId,
    pub note_id: NoteId,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewCard {
    pub note_id: NoteId,
    pub ordinal: usize,
    pub deck_id: DeckId,
}

/// Old-ordinal to new-ordinal mapping applied to every matching card in one pass.
///
/// Ordinals without an entry keep their value.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct OrdinalRemap(BTreeMap<usize, usize>);

impl OrdinalRemap {
    /// Build a remap from the previous ordinals listed in their new order.
    #[must_use]
    pub fn from_previous_positions(previous: &[usize]) -> Self {
        Self(
            previous
                .iter()
                .enumerate()
                .filter(|(new, old)| *new != **old)
                .map(|(new, old)| (*old, new))
                .collect(),
        )
    }

    /// Close the gap left by `removed`: every higher ordinal moves down by one.
    #[must_use]
    pub fn shift_down_after(removed: usize, count: usize) -> Self {
        Self(((removed + 1)..count).map(|old| (old, old - 1)).collect())
    }

    #[must_use]
    pub fn target(&self, ordinal: usize) -> usize {
        self.0.get(&ordinal).copied().unwrap_or(ordinal)
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.0.is_empty()
    }
}

/// Persistence collaborator for notes, cards and the note type registry.
///
/// Write methods that touch several rows are expected to apply them as one unit.
pub trait NoteStore {
    /// # Errors
    /// Returns [`StorageError`] when the lookup fails.
    fn note_ids_for_note_type(&self, note_type_id: NoteTypeId) -> Result<Vec<NoteId>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the note is missing or cannot be read.
    fn note_fields(&self, note_id: NoteId) -> Result<Vec<String>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the note is missing or the write fails.
    fn write_note_fields(
        &mut self,
        note_id: NoteId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError>;

    /// Move a note to another note type, replacing its field payload.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the note is missing or the write fails.
    fn reassign_note(
        &mut self,
        note_id: NoteId,
        note_type_id: NoteTypeId,
        fields: &[String],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError>;

    /// Recompute the cached sort-field text of the given notes.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the update fails.
    fn refresh_sort_fields(&mut self, note_ids: &[NoteId], sort_field: usize)
        -> Result<(), StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the lookup fails.
    fn cards_for_template(
        &self,
        note_type_id: NoteTypeId,
        ordinal: usize,
    ) -> Result<Vec<CardRecord>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the lookup fails.
    fn cards_for_notes(&self, note_ids: &[NoteId]) -> Result<Vec<CardRecord>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the count fails.
    fn card_count_for_note(&self, note_id: NoteId) -> Result<usize, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the delete fails.
    fn delete_cards(&mut self, card_ids: &[CardId]) -> Result<(), StorageError>;

    /// Apply `remap` to the ordinal of every card whose note belongs to `note_type_id`.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the update fails.
    fn remap_card_ordinals(
        &mut self,
        note_type_id: NoteTypeId,
        remap: &OrdinalRemap,
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the update fails.
    fn set_card_ordinals(
        &mut self,
        updates: &[(CardId, usize)],
        modified: i64,
        usn: i32,
    ) -> Result<(), StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the insert fails.
    fn add_card(&mut self, card: &NewCard, modified: i64, usn: i32)
        -> Result<CardId, StorageError>;

    /// Delete every note of `note_type_id` together with its cards.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the delete fails.
    fn delete_notes_for_note_type(&mut self, note_type_id: NoteTypeId)
        -> Result<(), StorageError>;

    /// Record that the authoritative schema changed and a full sync is required.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the marker cannot be written.
    fn mark_schema_changed(&mut self) -> Result<(), StorageError>;

    /// Current update sequence number.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the value cannot be read.
    fn usn(&self) -> Result<i32, StorageError>;

    /// Serialized note type registry, if one was saved.
    ///
    /// # Errors
    /// Returns [`StorageError`] when the value cannot be read.
    fn load_note_types(&self) -> Result<Option<String>, StorageError>;

    /// # Errors
    /// Returns [`StorageError`] when the value cannot be written.
    fn save_note_types(&mut self, json: &str) -> Result<(), StorageError>;
}
