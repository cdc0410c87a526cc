use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{NoteType, NoteTypeId};
use crate::store::NoteStore;
use crate::KernelError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistrySnapshot {
    #[serde(default)]
    current: Option<NoteTypeId>,
    #[serde(default)]
    note_types: Vec<NoteType>,
}

/// Every note type of a collection, keyed by id.
///
/// Mutations only set the dirty bit; nothing reaches storage until [`Self::flush`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteTypeRegistry {
    note_types: BTreeMap<NoteTypeId, NoteType>,
    current: Option<NoteTypeId>,
    dirty: bool,
}

impl NoteTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`KernelError::Serialization`] for malformed JSON and
    /// [`KernelError::Contract`] when a stored note type has no id.
    pub fn from_json(json: &str) -> Result<Self, KernelError> {
        let snapshot: RegistrySnapshot = serde_json::from_str(json)?;
        let mut note_types = BTreeMap::new();
        for note_type in snapshot.note_types {
            let Some(id) = note_type.id else {
                return Err(KernelError::Contract(format!(
                    "stored note type {:?} has no id",
                    note_type.name
                )));
            };
            note_types.insert(id, note_type);
        }
        Ok(Self { note_types, current: snapshot.current, dirty: false })
    }

    /// # Errors
    /// Returns [`KernelError::Serialization`] when encoding fails.
    pub fn to_json(&self) -> Result<String, KernelError> {
        let snapshot = RegistrySnapshot {
            current: self.current,
            note_types: self.note_types.values().cloned().collect(),
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Load the registry saved in `store`, or an empty one if nothing was saved yet.
    ///
    /// # Errors
    /// Propagates storage failures and JSON decoding errors.
    pub fn load_from<S>(store: &S) -> Result<Self, KernelError>
    where
        S: NoteStore + ?Sized,
    {
        match store.load_note_types()? {
            Some(json) => {
                let registry = Self::from_json(&json)?;
                tracing::debug!(note_types = registry.len(), "loaded note type registry");
                Ok(registry)
            }
            None => Ok(Self::new()),
        }
    }

    /// Persist the registry if anything changed since the last flush.
    ///
    /// Returns whether a write happened. The dirty bit is cleared only after the
    /// store accepted the write.
    ///
    /// # Errors
    /// Propagates storage failures and JSON encoding errors.
    pub fn flush<S>(&mut self, store: &mut S) -> Result<bool, KernelError>
    where
        S: NoteStore + ?Sized,
    {
        if !self.dirty {
            return Ok(false);
        }
        let json = self.to_json()?;
        store.save_note_types(&json)?;
        self.dirty = false;
        tracing::debug!(note_types = self.len(), "flushed note type registry");
        Ok(true)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.note_types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.note_types.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: NoteTypeId) -> Option<&NoteType> {
        self.note_types.get(&id)
    }

    /// # Errors
    /// Returns [`KernelError::NoteTypeNotFound`] for unknown ids.
    pub fn require(&self, id: NoteTypeId) -> Result<&NoteType, KernelError> {
        self.get(id).ok_or(KernelError::NoteTypeNotFound(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &NoteType> + '_ {
        self.note_types.values()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.all().map(|note_type| note_type.name.as_str()).collect()
    }

    /// Case-insensitive lookup by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&NoteType> {
        let wanted = name.to_lowercase();
        self.all().find(|note_type| note_type.name.to_lowercase() == wanted)
    }

    /// The selected note type, falling back to the lowest id.
    #[must_use]
    pub fn current(&self) -> Option<&NoteType> {
        self.current.and_then(|id| self.get(id)).or_else(|| self.all().next())
    }

    /// # Errors
    /// Returns [`KernelError::NoteTypeNotFound`] for unknown ids.
    pub fn set_current(&mut self, id: NoteTypeId) -> Result<(), KernelError> {
        self.require(id)?;
        self.current = Some(id);
        self.dirty = true;
        Ok(())
    }

    /// Store a note type as received, without touching its modification time or usn.
    ///
    /// Used when merging note types from another collection.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] when the note type has no id.
    pub fn update(&mut self, note_type: NoteType) -> Result<(), KernelError> {
        let Some(id) = note_type.id else {
            return Err(KernelError::Contract(format!(
                "note type {:?} must have an id before it is stored",
                note_type.name
            )));
        };
        self.note_types.insert(id, note_type);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: NoteTypeId) -> Option<NoteType> {
        let removed = self.note_types.remove(&id);
        if removed.is_some() {
            if self.current == Some(id) {
                self.current = self.note_types.keys().next().copied();
            }
            self.dirty = true;
        }
        removed
    }

    /// Fresh id derived from the current time in milliseconds, bumped past collisions.
    pub(crate) fn next_id(&self, now_millis: i64) -> NoteTypeId {
        let mut candidate = now_millis;
        while self.note_types.contains_key(&NoteTypeId(candidate)) {
            candidate += 1;
        }
        NoteTypeId(candidate)
    }
}
