//! Note type kernel: requirement inference, availability evaluation and the
//! structural mutation pipeline for note types.

mod availability;
mod cardgen;
mod clock;
mod cloze;
mod manager;
mod memory_store;
mod model;
mod registry;
mod render;
mod requirements;
mod store;
#[cfg(test)]
mod testing;

pub use availability::{available_ordinals_for_fields, available_template_ordinals};
pub use cardgen::generate_cards;
pub use clock::{Clock, FixedClock, SystemClock};
pub use cloze::cloze_ordinals;
pub use manager::{NoteTypeManager, RemoveTemplateOutcome};
pub use memory_store::{MemoryStore, MemoryStoreError, StoredCard, StoredNote};
pub use model::{
    join_fields, split_fields, CardId, DeckId, Field, NoteId, NoteType, NoteTypeId,
    NoteTypeKind, RequirementEntry, RequirementKind, Template, DEFAULT_CARD_CSS,
    DEFAULT_DECK_ID, DEFAULT_FIELD_FONT, DEFAULT_FIELD_SIZE, DEFAULT_LATEX_POST,
    DEFAULT_LATEX_PRE, FIELD_SEPARATOR,
};
pub use registry::NoteTypeRegistry;
pub use render::{CardRenderer, RenderedCard};
pub use requirements::{build_requirements, rebuild_requirements, PROBE_EMPTY, PROBE_FILLED};
pub use store::{CardRecord, NewCard, NoteStore, OrdinalRemap, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("contract violation: {0}")]
    Contract(String),
    #[error("note type not found: {0}")]
    NoteTypeNotFound(NoteTypeId),
    #[error("pattern error: {0}")]
    Pattern(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
