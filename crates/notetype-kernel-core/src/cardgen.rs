use std::collections::{BTreeMap, BTreeSet};

use crate::availability::available_ordinals_for_fields;
use crate::model::{CardId, NoteId, NoteType};
use crate::store::{NewCard, NoteStore};
use crate::KernelError;

/// Add the cards that `note_type` makes available for each note but that do not exist yet.
///
/// Existing cards are never removed, even when their template is no longer available.
///
/// # Errors
/// Propagates storage failures and cloze pattern errors.
pub fn generate_cards<S>(
    store: &mut S,
    note_type: &NoteType,
    note_ids: &[NoteId],
    modified: i64,
    usn: i32,
) -> Result<Vec<CardId>, KernelError>
where
    S: NoteStore + ?Sized,
{
    let mut existing: BTreeMap<NoteId, BTreeSet<usize>> = BTreeMap::new();
    for card in store.cards_for_notes(note_ids)? {
        existing.entry(card.note_id).or_default().insert(card.ordinal);
    }

    let mut created = Vec::new();
    for note_id in note_ids {
        let fields = store.note_fields(*note_id)?;
        let have = existing.get(note_id);
        for ordinal in available_ordinals_for_fields(note_type, &fields)? {
            if have.is_some_and(|ordinals| ordinals.contains(&ordinal)) {
                continue;
            }
            let card = NewCard {
                note_id: *note_id,
                ordinal,
                deck_id: note_type.deck_for_template(ordinal),
            };
            created.push(store.add_card(&card, modified, usn)?);
        }
    }

    if !created.is_empty() {
        tracing::info!(
            note_type = %note_type.name,
            notes = note_ids.len(),
            cards = created.len(),
            "generated missing cards"
        );
    }
    Ok(created)
}
