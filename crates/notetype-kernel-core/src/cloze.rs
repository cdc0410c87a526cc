use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex_lite::Regex;

use crate::model::NoteType;
use crate::KernelError;

const CLOZE_REFERENCE_PATTERN: &str = r"\{\{cloze:(.+?)\}\}";
const CLOZE_DELETION_PATTERN: &str = r"\{\{c(\d+)::[^}]*?\}\}";

struct ClozePatterns {
    reference: Regex,
    deletion: Regex,
}

impl ClozePatterns {
    fn compile() -> Result<Self, String> {
        Ok(Self {
            reference: Regex::new(CLOZE_REFERENCE_PATTERN).map_err(|err| err.to_string())?,
            deletion: Regex::new(CLOZE_DELETION_PATTERN).map_err(|err| err.to_string())?,
        })
    }
}

fn patterns() -> Result<&'static ClozePatterns, KernelError> {
    static PATTERNS: OnceLock<Result<ClozePatterns, String>> = OnceLock::new();
    PATTERNS
        .get_or_init(ClozePatterns::compile)
        .as_ref()
        .map_err(|err| KernelError::Pattern(err.clone()))
}

/// Card ordinals produced by the cloze deletions of one note, ascending.
///
/// Only fields referenced as `{{cloze:Name}}` by the question format of the note
/// type's single template are scanned; raw (untrimmed) values are used. Deletion
/// `{{cN::...}}` yields ordinal `N - 1`.
///
/// # Errors
/// Returns [`KernelError::Pattern`] when the deletion patterns cannot be compiled.
pub fn cloze_ordinals(note_type: &NoteType, fields: &[String]) -> Result<Vec<usize>, KernelError> {
    let patterns = patterns()?;
    let Some(template) = note_type.templates.first() else {
        return Ok(Vec::new());
    };
    let field_map = note_type.field_map();

    let mut ordinals = BTreeSet::new();
    for reference in patterns.reference.captures_iter(&template.question_format) {
        let Some(name) = reference.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let Some(value) = field_map.get(name).and_then(|ordinal| fields.get(*ordinal)) else {
            continue;
        };
        for deletion in patterns.deletion.captures_iter(value) {
            let Some(Ok(number)) = deletion.get(1).map(|m| m.as_str().parse::<usize>()) else {
                continue;
            };
            if let Some(ordinal) = number.checked_sub(1) {
                ordinals.insert(ordinal);
            }
        }
    }
    Ok(ordinals.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cloze_note_type, strings};

    #[test]
    fn deletions_in_referenced_field_become_zero_based_ordinals() -> Result<(), KernelError> {
        let note_type = cloze_note_type(&["Text", "Extra"], "{{cloze:Text}}");
        let fields = strings(&["{{c1::foo}} {{c2::bar}}", ""]);
        assert_eq!(cloze_ordinals(&note_type, &fields)?, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn ordinals_are_unioned_across_fields_and_deduplicated() -> Result<(), KernelError> {
        let note_type =
            cloze_note_type(&["Text", "Extra"], "{{cloze:Text}}<br>{{cloze:Extra}}");
        let fields = strings(&["{{c3::a}} {{c1::b}}", "{{c3::again}} {{c5::hint::more}}"]);
        assert_eq!(cloze_ordinals(&note_type, &fields)?, vec![0, 2, 4]);
        Ok(())
    }

    #[test]
    fn unreferenced_missing_and_malformed_are_skipped() -> Result<(), KernelError> {
        let note_type = cloze_note_type(&["Text", "Extra"], "{{cloze:Missing}} {{cloze:Text}}");
        let fields = strings(&["{{c::x}} {c1::y} {{c0::zero}} {{c2::ok}}", "{{c7::unreferenced}}"]);
        assert_eq!(cloze_ordinals(&note_type, &fields)?, vec![1]);
        Ok(())
    }

    #[test]
    fn short_payload_yields_nothing() -> Result<(), KernelError> {
        let note_type = cloze_note_type(&["Text", "Extra"], "{{cloze:Extra}}");
        assert!(cloze_ordinals(&note_type, &strings(&["{{c1::x}}"]))?.is_empty());
        Ok(())
    }
}
