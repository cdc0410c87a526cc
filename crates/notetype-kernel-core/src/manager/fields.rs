use regex_lite::{Captures, Regex};

use super::{check_ordinal, moved_order, NoteTypeManager};
use crate::clock::Clock;
use crate::model::{Field, NoteType};
use crate::render::CardRenderer;
use crate::store::NoteStore;
use crate::KernelError;

impl<S, R, C> NoteTypeManager<S, R, C>
where
    S: NoteStore,
    R: CardRenderer,
    C: Clock,
{
    /// Append a field and give every existing note an empty value for it.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] when the name is already used by another
    /// field (ignoring case) and propagates storage failures.
    pub fn add_field(&mut self, note_type: &mut NoteType, field: Field) -> Result<(), KernelError> {
        if note_type.field_ordinal(&field.name).is_some() {
            return Err(KernelError::Contract(format!("duplicate field name {:?}", field.name)));
        }
        self.mark_schema_changed(note_type)?;
        let previous_len = note_type.fields.len();
        note_type.fields.push(field);
        note_type.renumber_fields();
        self.save(note_type, false)?;
        self.transform_notes(note_type, previous_len, |mut fields| {
            fields.push(String::new());
            fields
        })
    }

    /// Remove a field, its value from every note and every template reference to it.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for an unknown ordinal and propagates
    /// storage failures.
    pub fn remove_field(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
    ) -> Result<(), KernelError> {
        let previous_len = note_type.fields.len();
        check_ordinal("field", ordinal, previous_len)?;
        self.mark_schema_changed(note_type)?;
        let removed = note_type.fields.remove(ordinal);
        let was_sort_field = note_type.sort_field == ordinal;
        if note_type.sort_field > ordinal {
            note_type.sort_field -= 1;
        }
        note_type.sort_field = note_type.sort_field.min(note_type.fields.len().saturating_sub(1));
        note_type.renumber_fields();

        self.transform_notes(note_type, previous_len, |mut fields| {
            fields.remove(ordinal);
            fields
        })?;
        if was_sort_field {
            self.refresh_sort_fields(note_type)?;
        }
        rewrite_field_references(note_type, &removed.name, "")?;
        self.save(note_type, false)
    }

    /// Move a field to `new_index`, permuting every note's values to match.
    ///
    /// The sort field keeps pointing at the same field.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for out-of-range positions and propagates
    /// storage failures.
    pub fn move_field(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
        new_index: usize,
    ) -> Result<(), KernelError> {
        let len = note_type.fields.len();
        check_ordinal("field", ordinal, len)?;
        check_ordinal("field", new_index, len)?;
        self.mark_schema_changed(note_type)?;
        if ordinal == new_index {
            return Ok(());
        }

        let order = moved_order(len, ordinal, new_index);
        let previous = std::mem::take(&mut note_type.fields);
        note_type.fields = order.iter().filter_map(|old| previous.get(*old).cloned()).collect();
        if let Some(position) = order.iter().position(|old| *old == note_type.sort_field) {
            note_type.sort_field = position;
        }
        note_type.renumber_fields();
        self.save(note_type, false)?;

        self.transform_notes(note_type, len, |fields| {
            order.iter().map(|old| fields.get(*old).cloned().unwrap_or_default()).collect()
        })
    }

    /// Rename a field and every template reference to it.
    ///
    /// An empty `new_name` deletes every tag referencing the field instead and keeps
    /// the field's name.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for an unknown ordinal or a name already used
    /// by another field, and propagates storage failures.
    pub fn rename_field(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
        new_name: &str,
    ) -> Result<(), KernelError> {
        check_ordinal("field", ordinal, note_type.fields.len())?;
        if note_type.field_ordinal(new_name).is_some_and(|existing| existing != ordinal) {
            return Err(KernelError::Contract(format!("duplicate field name {new_name:?}")));
        }
        self.mark_schema_changed(note_type)?;
        let old_name = note_type.fields[ordinal].name.clone();
        rewrite_field_references(note_type, &old_name, new_name)?;
        if new_name.is_empty() {
            tracing::debug!(field = %old_name, "deleted field references");
        } else {
            note_type.fields[ordinal].name = new_name.to_string();
            tracing::debug!(from = %old_name, to = %new_name, "renamed field");
        }
        self.save(note_type, false)
    }

    /// Make `ordinal` the field notes are sorted by.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for an unknown ordinal and propagates
    /// storage failures.
    pub fn set_sort_index(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
    ) -> Result<(), KernelError> {
        check_ordinal("field", ordinal, note_type.fields.len())?;
        self.mark_schema_changed(note_type)?;
        note_type.sort_field = ordinal;
        self.refresh_sort_fields(note_type)?;
        self.save(note_type, false)
    }
}

/// Point every reference to `old_name` in question and answer formats at `new_name`.
///
/// References are `{{Name}}`, section tags `{{#Name}}`, `{{^Name}}`, `{{/Name}}`
/// and filtered `{{filter:Name}}`. An empty `new_name` deletes the whole tag.
fn rewrite_field_references(
    note_type: &mut NoteType,
    old_name: &str,
    new_name: &str,
) -> Result<(), KernelError> {
    let escaped = regex_lite::escape(old_name);
    let rewrite: Box<dyn Fn(&str) -> String> = if new_name.is_empty() {
        let pattern = Regex::new(&format!(r"\{{\{{(?:[#^/]|[^{{}}]*:)?{escaped}\}}\}}"))
            .map_err(|err| KernelError::Pattern(err.to_string()))?;
        Box::new(move |text: &str| pattern.replace_all(text, "").into_owned())
    } else {
        let pattern = Regex::new(&format!(r"(\{{\{{|[:#^/]){escaped}(\}}\}})"))
            .map_err(|err| KernelError::Pattern(err.to_string()))?;
        let new_name = new_name.to_string();
        Box::new(move |text: &str| {
            pattern
                .replace_all(text, |caps: &Captures<'_>| {
                    let open = caps.get(1).map_or("", |m| m.as_str());
                    let close = caps.get(2).map_or("", |m| m.as_str());
                    format!("{open}{new_name}{close}")
                })
                .into_owned()
        })
    };
    for template in &mut note_type.templates {
        template.question_format = rewrite(&template.question_format);
        template.answer_format = rewrite(&template.answer_format);
    }
    Ok(())
}
