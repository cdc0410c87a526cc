//! Which templates of a note type would render a non-blank question for a note.

use crate::cloze::cloze_ordinals;
use crate::model::{split_fields, NoteType, NoteTypeKind};
use crate::KernelError;

/// Available template ordinals for a joined field payload.
///
/// # Errors
/// Returns [`KernelError::Pattern`] when cloze patterns cannot be compiled.
pub fn available_template_ordinals(
    note_type: &NoteType,
    payload: &str,
) -> Result<Vec<usize>, KernelError> {
    available_ordinals_for_fields(note_type, &split_fields(payload))
}

/// Available template ordinals for already split field values.
///
/// Standard note types evaluate their cached requirements in template order; a field
/// counts as filled when it is non-empty after trimming Unicode `White_Space`
/// (`str::trim`). Fields missing from a short payload count as empty. Cloze note
/// types derive ordinals from deletion markers instead.
///
/// # Errors
/// Returns [`KernelError::Pattern`] when cloze patterns cannot be compiled.
pub fn available_ordinals_for_fields(
    note_type: &NoteType,
    fields: &[String],
) -> Result<Vec<usize>, KernelError> {
    match &note_type.kind {
        NoteTypeKind::Cloze => cloze_ordinals(note_type, fields),
        NoteTypeKind::Standard { requirements } => {
            let filled = fields.iter().map(|value| !value.trim().is_empty()).collect::<Vec<_>>();
            Ok(requirements
                .iter()
                .filter(|entry| entry.is_satisfied_by(&filled))
                .map(|entry| entry.template_ordinal)
                .collect())
        }
    }
}
