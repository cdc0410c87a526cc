//! Requirement inference by differential probing of the renderer.
//!
//! Each template's question side is rendered with synthetic field vectors. Comparing
//! the output against the all-empty render classifies the template as needing no
//! satisfiable data (`None`), every one of a set of fields (`All`), or any one of a
//! set of fields (`Any`). Templates that only render under combinations of fields
//! end up as `Any` with an empty set and are never available.

use crate::model::{NoteType, NoteTypeKind, RequirementEntry, RequirementKind};
use crate::render::CardRenderer;

/// Probe value standing in for "this field has content".
///
/// Probe vectors never reach real evaluation, so real field text equal to this value
/// is not ambiguous outside the probing pass.
pub const PROBE_FILLED: &str = "1";

/// Probe value standing in for "this field is empty".
pub const PROBE_EMPTY: &str = "";

/// Classify every template of `note_type` in template order.
#[must_use]
pub fn build_requirements<R>(renderer: &R, note_type: &NoteType) -> Vec<RequirementEntry>
where
    R: CardRenderer + ?Sized,
{
    note_type
        .templates
        .iter()
        .map(|template| requirement_for_template(renderer, note_type, template.ordinal))
        .collect()
}

/// Replace the cached requirements of a standard note type. Cloze note types are left as is.
pub fn rebuild_requirements<R>(renderer: &R, note_type: &mut NoteType)
where
    R: CardRenderer + ?Sized,
{
    if note_type.is_cloze() {
        return;
    }
    let rebuilt = build_requirements(renderer, note_type);
    tracing::debug!(
        note_type = %note_type.name,
        templates = rebuilt.len(),
        "rebuilt requirement cache"
    );
    if let NoteTypeKind::Standard { requirements } = &mut note_type.kind {
        *requirements = rebuilt;
    }
}

fn requirement_for_template<R>(
    renderer: &R,
    note_type: &NoteType,
    template_ordinal: usize,
) -> RequirementEntry
where
    R: CardRenderer + ?Sized,
{
    let field_count = note_type.fields.len();
    let full = vec![PROBE_FILLED.to_string(); field_count];
    let empty = vec![PROBE_EMPTY.to_string(); field_count];
    let question =
        |fields: &[String]| renderer.render(note_type, template_ordinal, fields).question;

    let full_question = question(&full);
    let empty_question = question(&empty);
    if full_question == empty_question {
        return RequirementEntry::unsatisfiable(template_ordinal);
    }

    let required = (0..field_count)
        .filter(|&index| {
            let mut probe = full.clone();
            probe[index] = PROBE_EMPTY.to_string();
            question(&probe) == empty_question
        })
        .collect::<Vec<_>>();
    if !required.is_empty() {
        return RequirementEntry {
            template_ordinal,
            kind: RequirementKind::All,
            field_ordinals: required,
        };
    }

    let sufficient = (0..field_count)
        .filter(|&index| {
            let mut probe = empty.clone();
            probe[index] = PROBE_FILLED.to_string();
            question(&probe) != empty_question
        })
        .collect::<Vec<_>>();
    RequirementEntry { template_ordinal, kind: RequirementKind::Any, field_ordinals: sufficient }
}
