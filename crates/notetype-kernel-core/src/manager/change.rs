use std::collections::BTreeMap;

use super::NoteTypeManager;
use crate::cardgen::generate_cards;
use crate::clock::Clock;
use crate::model::{CardId, NoteId, NoteType, NoteTypeId};
use crate::render::CardRenderer;
use crate::store::NoteStore;
use crate::KernelError;

fn saved_id(note_type: &NoteType) -> Result<NoteTypeId, KernelError> {
    note_type.id.ok_or_else(|| {
        KernelError::Contract(format!("note type {:?} has not been added", note_type.name))
    })
}

impl<S, R, C> NoteTypeManager<S, R, C>
where
    S: NoteStore,
    R: CardRenderer,
    C: Clock,
{
    /// Migrate notes and their cards from `source` to `target`.
    ///
    /// `field_map` sends old field ordinals to new ones; target fields nobody maps to
    /// are left empty. `card_map` sends old template ordinals to new ones, `None`
    /// deletes the card, and cards whose ordinal is not listed are deleted too. An
    /// empty map leaves that side untouched, which is only allowed when `source` and
    /// `target` are the same note type. Maps are expected to be injective; with
    /// duplicate targets the last entry wins.
    ///
    /// # Errors
    /// Returns [`KernelError::Contract`] for unsaved note types or missing maps, and
    /// propagates storage failures.
    pub fn change_note_type(
        &mut self,
        source: &NoteType,
        note_ids: &[NoteId],
        target: &NoteType,
        field_map: &BTreeMap<usize, usize>,
        card_map: &BTreeMap<usize, Option<usize>>,
    ) -> Result<(), KernelError> {
        let source_id = saved_id(source)?;
        let target_id = saved_id(target)?;
        if source_id != target_id && (field_map.is_empty() || card_map.is_empty()) {
            return Err(KernelError::Contract(
                "changing to another note type needs both a field map and a card map".to_string(),
            ));
        }
        self.store.mark_schema_changed()?;
        let modified = self.clock.now_secs();
        let usn = self.store.usn()?;

        if !field_map.is_empty() {
            for note_id in note_ids {
                let old = self.store.note_fields(*note_id)?;
                let mut fields = vec![String::new(); target.fields.len()];
                for (from, to) in field_map {
                    if let Some(slot) = fields.get_mut(*to) {
                        *slot = old.get(*from).cloned().unwrap_or_default();
                    }
                }
                self.store.reassign_note(*note_id, target_id, &fields, modified, usn)?;
            }
            self.store.refresh_sort_fields(note_ids, target.sort_field)?;
        }

        if !card_map.is_empty() {
            let mut updates: Vec<(CardId, usize)> = Vec::new();
            let mut deleted: Vec<CardId> = Vec::new();
            for card in self.store.cards_for_notes(note_ids)? {
                match card_map.get(&card.ordinal) {
                    Some(Some(ordinal)) => updates.push((card.id, *ordinal)),
                    _ => deleted.push(card.id),
                }
            }
            self.store.set_card_ordinals(&updates, modified, usn)?;
            self.store.delete_cards(&deleted)?;
            tracing::debug!(
                remapped = updates.len(),
                deleted = deleted.len(),
                "remapped cards of migrated notes"
            );
        }

        let created = generate_cards(&mut self.store, target, note_ids, modified, usn)?;
        tracing::info!(
            from = %source_id,
            to = %target_id,
            notes = note_ids.len(),
            new_cards = created.len(),
            "changed note type"
        );
        Ok(())
    }
}
