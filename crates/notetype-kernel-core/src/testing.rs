//! Test fixtures: a tiny renderer that understands `{{Field}}` and
//! `{{#Field}}...{{/Field}}` / `{{^Field}}...{{/Field}}` so the probing logic has
//! something realistic to observe.

use std::cell::Cell;

use crate::model::{Field, NoteType, NoteTypeKind, Template};
use crate::render::{CardRenderer, RenderedCard};

fn field_value<'a>(note_type: &NoteType, fields: &'a [String], name: &str) -> Option<&'a str> {
    let ordinal = note_type.field_map().get(name).copied()?;
    fields.get(ordinal).map(String::as_str)
}

fn render_text(note_type: &NoteType, fields: &[String], text: &str) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.find("{{#").or_else(|| out.find("{{^")) {
        let inverted = out[start..].starts_with("{{^");
        let Some(name_end) = out[start..].find("}}").map(|offset| start + offset) else {
            break;
        };
        let name = out[start + 3..name_end].to_string();
        let closing = format!("{{{{/{name}}}}}");
        let Some(close_start) = out[name_end..].find(&closing).map(|offset| name_end + offset)
        else {
            break;
        };
        let inner = out[name_end + 2..close_start].to_string();
        let filled =
            field_value(note_type, fields, &name).is_some_and(|value| !value.trim().is_empty());
        let keep = if inverted { !filled } else { filled };
        let replacement = if keep { inner } else { String::new() };
        out.replace_range(start..close_start + closing.len(), &replacement);
    }
    for field in &note_type.fields {
        let value = fields.get(field.ordinal).map_or("", String::as_str);
        out = out.replace(&format!("{{{{{}}}}}", field.name), value);
    }
    out
}

pub(crate) fn substitution_renderer(
    note_type: &NoteType,
    template_ordinal: usize,
    fields: &[String],
) -> RenderedCard {
    let Some(template) = note_type.templates.get(template_ordinal) else {
        return RenderedCard::default();
    };
    RenderedCard {
        question: render_text(note_type, fields, &template.question_format),
        answer: render_text(note_type, fields, &template.answer_format),
    }
}

#[derive(Debug, Default)]
pub(crate) struct RenderCounter {
    calls: Cell<usize>,
}

impl RenderCounter {
    pub(crate) fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl CardRenderer for RenderCounter {
    fn render(
        &self,
        note_type: &NoteType,
        template_ordinal: usize,
        fields: &[String],
    ) -> RenderedCard {
        self.calls.set(self.calls.get() + 1);
        substitution_renderer(note_type, template_ordinal, fields)
    }
}

/// Standard note type with the given fields and one template per question format.
pub(crate) fn standard_note_type(name: &str, fields: &[&str], questions: &[&str]) -> NoteType {
    let mut note_type = NoteType::new(name, NoteTypeKind::standard(), 0);
    note_type.fields = fields.iter().map(|field| Field::new(*field)).collect();
    note_type.templates = questions
        .iter()
        .enumerate()
        .map(|(index, question)| {
            Template::new(format!("Card {}", index + 1)).with_formats(*question, "{{FrontSide}}")
        })
        .collect();
    note_type.renumber_fields();
    note_type.renumber_templates();
    note_type
}

pub(crate) fn cloze_note_type(fields: &[&str], question: &str) -> NoteType {
    let mut note_type = standard_note_type("Cloze", fields, &[question]);
    note_type.kind = NoteTypeKind::Cloze;
    note_type
}

pub(crate) fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_string()).collect()
}

#[test]
fn fixture_renderer_handles_sections_and_substitution() {
    let note_type = standard_note_type("T", &["A", "B"], &["{{#A}}[{{A}}]{{/A}}{{^B}}no b{{/B}}"]);
    let rendered = substitution_renderer(&note_type, 0, &strings(&["x", ""]));
    assert_eq!(rendered.question, "[x]no b");
    let rendered = substitution_renderer(&note_type, 0, &strings(&["", "y"]));
    assert_eq!(rendered.question, "");
}
