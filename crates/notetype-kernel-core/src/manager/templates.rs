use std::collections::BTreeSet;

use serde::Serialize;

use super::{check_ordinal, moved_order, NoteTypeManager};
use crate::clock::Clock;
use crate::model::{CardId, NoteId, NoteType, Template};
use crate::render::CardRenderer;
use crate::store::{NoteStore, OrdinalRemap};
use crate::KernelError;

/// Result of [`NoteTypeManager::remove_template`].
#[must_use]
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoveTemplateOutcome {
    Removed { deleted_cards: usize },
    /// Nothing was changed: the note would have been left without cards.
    WouldOrphanNote { note_id: NoteId },
}

impl<S, R, C> NoteTypeManager<S, R, C>
where
    S: NoteStore,
    R: CardRenderer,
    C: Clock,
{
    /// Append a template and generate its cards for existing notes.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn add_template(
        &mut self,
        note_type: &mut NoteType,
        template: Template,
    ) -> Result<(), KernelError> {
        self.mark_schema_changed(note_type)?;
        note_type.templates.push(template);
        note_type.renumber_templates();
        self.save(note_type, true)
    }

    /// Remove a template and its cards, unless a note would be left with no cards.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] when fewer than two templates exist or the
    /// ordinal is unknown, and propagates storage failures.
    pub fn remove_template(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
    ) -> Result<RemoveTemplateOutcome, KernelError> {
        let count = note_type.templates.len();
        if count < 2 {
            return Err(KernelError::Contract(format!(
                "note type {:?} must keep at least one template",
                note_type.name
            )));
        }
        check_ordinal("template", ordinal, count)?;

        let mut doomed: Vec<CardId> = Vec::new();
        if let Some(id) = note_type.id {
            let cards = self.store.cards_for_template(id, ordinal)?;
            let affected = cards.iter().map(|card| card.note_id).collect::<BTreeSet<_>>();
            for note_id in affected {
                if self.store.card_count_for_note(note_id)? < 2 {
                    tracing::info!(
                        note_type_id = %id,
                        template_ordinal = ordinal,
                        note_id = %note_id,
                        "template removal would orphan a note"
                    );
                    return Ok(RemoveTemplateOutcome::WouldOrphanNote { note_id });
                }
            }
            doomed = cards.iter().map(|card| card.id).collect();

            self.store.mark_schema_changed()?;
            self.store.delete_cards(&doomed)?;
            let remap = OrdinalRemap::shift_down_after(ordinal, count);
            if !remap.is_identity() {
                let usn = self.store.usn()?;
                self.store.remap_card_ordinals(id, &remap, self.clock.now_secs(), usn)?;
            }
        }

        note_type.templates.remove(ordinal);
        note_type.renumber_templates();
        self.save(note_type, false)?;
        tracing::debug!(
            template_ordinal = ordinal,
            deleted_cards = doomed.len(),
            "removed template"
        );
        Ok(RemoveTemplateOutcome::Removed { deleted_cards: doomed.len() })
    }

    /// Move a template to `new_index`, renumbering existing cards to match.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for out-of-range positions and propagates
    /// storage failures.
    pub fn move_template(
        &mut self,
        note_type: &mut NoteType,
        ordinal: usize,
        new_index: usize,
    ) -> Result<(), KernelError> {
        let len = note_type.templates.len();
        check_ordinal("template", ordinal, len)?;
        check_ordinal("template", new_index, len)?;
        if ordinal == new_index {
            return Ok(());
        }
        self.mark_schema_changed(note_type)?;

        let order = moved_order(len, ordinal, new_index);
        let previous = std::mem::take(&mut note_type.templates);
        note_type.templates = order.iter().filter_map(|old| previous.get(*old).cloned()).collect();
        note_type.renumber_templates();
        self.save(note_type, false)?;

        if let Some(id) = note_type.id {
            let usn = self.store.usn()?;
            let remap = OrdinalRemap::from_previous_positions(&order);
            self.store.remap_card_ordinals(id, &remap, self.clock.now_secs(), usn)?;
        }
        Ok(())
    }
}
