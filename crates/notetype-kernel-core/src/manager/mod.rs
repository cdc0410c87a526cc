//! Note type lifecycle and the structural mutation pipeline.
//!
//! Mutations operate on a caller-owned [`NoteType`] and write it back to the registry
//! on save, so a note type can be assembled before it is added. Data stored for a
//! note type (notes, cards) is only touched once the note type has an id.

mod change;
mod fields;
mod templates;

pub use templates::RemoveTemplateOutcome;

use crate::cardgen::generate_cards;
use crate::clock::Clock;
use crate::model::{CardId, NoteId, NoteType, NoteTypeId, NoteTypeKind};
use crate::registry::NoteTypeRegistry;
use crate::render::CardRenderer;
use crate::requirements::rebuild_requirements;
use crate::store::NoteStore;
use crate::KernelError;

pub struct NoteTypeManager<S, R, C> {
    store: S,
    renderer: R,
    clock: C,
    registry: NoteTypeRegistry,
}

impl<S, R, C> NoteTypeManager<S, R, C>
where
    S: NoteStore,
    R: CardRenderer,
    C: Clock,
{
    /// Load the registry from `store`.
    ///
    /// # Errors
    /// Propagates storage failures and registry decoding errors.
    pub fn open(store: S, renderer: R, clock: C) -> Result<Self, KernelError> {
        let registry = NoteTypeRegistry::load_from(&store)?;
        Ok(Self { store, renderer, clock, registry })
    }

    #[must_use]
    pub fn registry(&self) -> &NoteTypeRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Empty note type with no id, stamped with the current time.
    #[must_use]
    pub fn new_note_type(&self, name: &str, kind: NoteTypeKind) -> NoteType {
        NoteType::new(name, kind, self.clock.now_secs())
    }

    /// Assign a fresh id, store the note type and make it current.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn add(&mut self, note_type: &mut NoteType) -> Result<NoteTypeId, KernelError> {
        let id = self.registry.next_id(self.clock.now_millis());
        note_type.id = Some(id);
        self.save(note_type, false)?;
        self.registry.set_current(id)?;
        tracing::info!(note_type_id = %id, name = %note_type.name, "added note type");
        Ok(id)
    }

    /// Stamp, rebuild the requirement cache and write back to the registry.
    ///
    /// With `templates`, cards that became available are generated for every note.
    /// Unsaved note types only get their cache rebuilt.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn save(&mut self, note_type: &mut NoteType, templates: bool) -> Result<(), KernelError> {
        rebuild_requirements(&self.renderer, note_type);
        let Some(id) = note_type.id else {
            return Ok(());
        };
        note_type.modified = self.clock.now_secs();
        note_type.usn = self.store.usn()?;
        self.registry.update(note_type.clone())?;
        if templates {
            let note_ids = self.store.note_ids_for_note_type(id)?;
            let (modified, usn) = (note_type.modified, note_type.usn);
            generate_cards(&mut self.store, note_type, &note_ids, modified, usn)?;
        }
        Ok(())
    }

    /// Store a note type received from elsewhere as is.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] when the note type has no id.
    pub fn update(&mut self, note_type: NoteType) -> Result<(), KernelError> {
        self.registry.update(note_type)
    }

    /// Persist the registry if it changed.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn flush(&mut self) -> Result<bool, KernelError> {
        self.registry.flush(&mut self.store)
    }

    /// Delete a note type together with all of its notes and cards.
    ///
    /// # Errors
    /// Returns [`KernelError::NoteTypeNotFound`] for unknown ids and propagates
    /// storage failures.
    pub fn remove(&mut self, id: NoteTypeId) -> Result<NoteType, KernelError> {
        self.registry.require(id)?;
        self.store.mark_schema_changed()?;
        self.store.delete_notes_for_note_type(id)?;
        let removed = self.registry.remove(id).ok_or(KernelError::NoteTypeNotFound(id))?;
        tracing::info!(note_type_id = %id, name = %removed.name, "removed note type");
        Ok(removed)
    }

    /// Add a copy of an existing note type under a new id.
    ///
    /// # Errors
    /// Returns [`KernelError::NoteTypeNotFound`] for unknown ids.
    pub fn copy(&mut self, id: NoteTypeId) -> Result<NoteType, KernelError> {
        let mut copied = self.registry.require(id)?.clone();
        copied.name = format!("{} copy", copied.name);
        copied.id = None;
        self.add(&mut copied)?;
        Ok(copied)
    }

    /// # Errors
    /// Propagates storage failures.
    pub fn note_ids(&self, id: NoteTypeId) -> Result<Vec<NoteId>, KernelError> {
        Ok(self.store.note_ids_for_note_type(id)?)
    }

    /// Number of notes using the note type.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn use_count(&self, id: NoteTypeId) -> Result<usize, KernelError> {
        Ok(self.note_ids(id)?.len())
    }

    /// Generate the missing cards of the given notes.
    ///
    /// # Errors
    /// Returns [`KernelError::NoteTypeNotFound`] for unknown ids and propagates
    /// storage failures.
    pub fn generate_cards(
        &mut self,
        id: NoteTypeId,
        note_ids: &[NoteId],
    ) -> Result<Vec<CardId>, KernelError> {
        let note_type = self.registry.require(id)?;
        let usn = self.store.usn()?;
        generate_cards(&mut self.store, note_type, note_ids, self.clock.now_secs(), usn)
    }

    fn mark_schema_changed(&mut self, note_type: &NoteType) -> Result<(), KernelError> {
        if note_type.id.is_some() {
            self.store.mark_schema_changed()?;
        }
        Ok(())
    }

    /// Rewrite the field payload of every note of `note_type`.
    ///
    /// Each stored payload is first fitted to `previous_len` values, the field count
    /// it was written for, so an empty payload reads back as zero fields.
    fn transform_notes<F>(
        &mut self,
        note_type: &NoteType,
        previous_len: usize,
        mut transform: F,
    ) -> Result<(), KernelError>
    where
        F: FnMut(Vec<String>) -> Vec<String>,
    {
        let Some(id) = note_type.id else {
            return Ok(());
        };
        let note_ids = self.store.note_ids_for_note_type(id)?;
        let modified = self.clock.now_secs();
        let usn = self.store.usn()?;
        for note_id in &note_ids {
            let mut fields = self.store.note_fields(*note_id)?;
            fields.resize(previous_len, String::new());
            let fields = transform(fields);
            self.store.write_note_fields(*note_id, &fields, modified, usn)?;
        }
        tracing::debug!(note_type_id = %id, notes = note_ids.len(), "rewrote note fields");
        Ok(())
    }

    fn refresh_sort_fields(&mut self, note_type: &NoteType) -> Result<(), KernelError> {
        let Some(id) = note_type.id else {
            return Ok(());
        };
        let note_ids = self.store.note_ids_for_note_type(id)?;
        self.store.refresh_sort_fields(&note_ids, note_type.sort_field)?;
        Ok(())
    }
}

/// Permutation that moves the entry at `from` to `to`, listing previous positions in
/// their new order.
fn moved_order(len: usize, from: usize, to: usize) -> Vec<usize> {
    let mut order = (0..len).collect::<Vec<_>>();
    let moved = order.remove(from);
    order.insert(to, moved);
    order
}

fn check_ordinal(kind: &str, ordinal: usize, len: usize) -> Result<(), KernelError> {
    if ordinal < len {
        Ok(())
    } else {
        Err(KernelError::Contract(format!(
            "{kind} ordinal {ordinal} out of range for {len} {kind}s"
        )))
    }
}
