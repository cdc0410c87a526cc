use crate::model::NoteType;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedCard {
    pub question: String,
    pub answer: String,
}

/// Template rendering engine.
///
/// Implementations must be pure: identical inputs always produce identical output.
/// The kernel never inspects template syntax itself; it only compares rendered text.
pub trait CardRenderer {
    fn render(&self, note_type: &NoteType, template_ordinal: usize, fields: &[String])
        -> RenderedCard;
}

impl<F> CardRenderer for F
where
    F: Fn(&NoteType, usize, &[String]) -> RenderedCard,
{
    fn render(
        &self,
        note_type: &NoteType,
        template_ordinal: usize,
        fields: &[String],
    ) -> RenderedCard {
        self(note_type, template_ordinal, fields)
    }
}
