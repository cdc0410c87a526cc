use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between field values in a joined note payload.
pub const FIELD_SEPARATOR: char = '\u{1f}';

pub const DEFAULT_DECK_ID: DeckId = DeckId(1);

pub const DEFAULT_FIELD_FONT: &str = "Arial";

pub const DEFAULT_FIELD_SIZE: u32 = 20;

pub const DEFAULT_CARD_CSS: &str = ".card {
 font-family: arial;
 font-size: 20px;
 text-align: center;
 color: black;
 background-color: white;
}
";

pub const DEFAULT_LATEX_PRE: &str = "\\documentclass[12pt]{article}
\\special{papersize=3in,5in}
\\usepackage{amssymb,amsmath}
\\pagestyle{empty}
\\setlength{\\parindent}{0in}
\\begin{document}
";

pub const DEFAULT_LATEX_POST: &str = "\\end{document}";

macro_rules! integer_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

integer_id!(NoteTypeId);
integer_id!(NoteId);
integer_id!(CardId);
integer_id!(DeckId);

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Field {
    pub name: String,
    pub ordinal: usize,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub rtl: bool,
    pub font: String,
    pub size: u32,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            sticky: false,
            rtl: false,
            font: DEFAULT_FIELD_FONT.to_string(),
            size: DEFAULT_FIELD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Template {
    pub name: String,
    pub ordinal: usize,
    pub question_format: String,
    pub answer_format: String,
    /// Deck that new cards of this template go to instead of the note type default.
    #[serde(default)]
    pub deck_override: Option<DeckId>,
    pub css: String,
}

impl Template {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordinal: 0,
            question_format: String::new(),
            answer_format: String::new(),
            deck_override: None,
            css: DEFAULT_CARD_CSS.to_string(),
        }
    }

    #[must_use]
    pub fn with_formats(mut self, question: impl Into<String>, answer: impl Into<String>) -> Self {
        self.question_format = question.into();
        self.answer_format = answer.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    /// No field data can make the question non-blank.
    None,
    /// Every listed field must be non-empty.
    All,
    /// At least one listed field must be non-empty.
    Any,
}

/// Cached satisfiability rule for one template of a standard note type.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RequirementEntry {
    pub template_ordinal: usize,
    pub kind: RequirementKind,
    pub field_ordinals: Vec<usize>,
}

impl RequirementEntry {
    #[must_use]
    pub fn unsatisfiable(template_ordinal: usize) -> Self {
        Self { template_ordinal, kind: RequirementKind::None, field_ordinals: Vec::new() }
    }

    /// Evaluate the rule against per-field "has content" flags.
    ///
    /// Ordinals past the end of `filled` count as empty.
    #[must_use]
    pub fn is_satisfied_by(&self, filled: &[bool]) -> bool {
        let is_filled = |ordinal: &usize| filled.get(*ordinal).copied().unwrap_or(false);
        match self.kind {
            RequirementKind::None => false,
            RequirementKind::All => self.field_ordinals.iter().all(is_filled),
            RequirementKind::Any => self.field_ordinals.iter().any(is_filled),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoteTypeKind {
    Standard {
        #[serde(default)]
        requirements: Vec<RequirementEntry>,
    },
    Cloze,
}

impl NoteTypeKind {
    #[must_use]
    pub fn standard() -> Self {
        Self::Standard { requirements: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NoteType {
    /// Absent until the note type is added to a registry.
    pub id: Option<NoteTypeId>,
    pub name: String,
    pub kind: NoteTypeKind,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default)]
    pub sort_field: usize,
    pub default_deck: DeckId,
    pub modified: i64,
    #[serde(default)]
    pub usn: i32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub latex_pre: String,
    #[serde(default)]
    pub latex_post: String,
}

impl NoteType {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NoteTypeKind, modified: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            fields: Vec::new(),
            templates: Vec::new(),
            sort_field: 0,
            default_deck: DEFAULT_DECK_ID,
            modified,
            usn: 0,
            tags: Vec::new(),
            latex_pre: DEFAULT_LATEX_PRE.to_string(),
            latex_post: DEFAULT_LATEX_POST.to_string(),
        }
    }

    #[must_use]
    pub fn is_cloze(&self) -> bool {
        matches!(self.kind, NoteTypeKind::Cloze)
    }

    /// Cached requirement entries; always empty for cloze note types.
    #[must_use]
    pub fn requirements(&self) -> &[RequirementEntry] {
        match &self.kind {
            NoteTypeKind::Standard { requirements } => requirements,
            NoteTypeKind::Cloze => &[],
        }
    }

    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|field| field.name.as_str()).collect()
    }

    /// Exact field name to ordinal.
    #[must_use]
    pub fn field_map(&self) -> BTreeMap<&str, usize> {
        self.fields.iter().map(|field| (field.name.as_str(), field.ordinal)).collect()
    }

    /// Case-insensitive lookup, matching how field names are kept unique.
    #[must_use]
    pub fn field_ordinal(&self, name: &str) -> Option<usize> {
        let wanted = name.to_lowercase();
        self.fields.iter().position(|field| field.name.to_lowercase() == wanted)
    }

    /// Deck that a new card for `template_ordinal` should be placed in.
    ///
    /// Cloze ordinals can exceed the template count; they use the single template.
    #[must_use]
    pub fn deck_for_template(&self, template_ordinal: usize) -> DeckId {
        let template = if self.is_cloze() {
            self.templates.first()
        } else {
            self.templates.get(template_ordinal)
        };
        template.and_then(|template| template.deck_override).unwrap_or(self.default_deck)
    }

    /// Hash of the field names, used to decide whether two note types share a schema.
    #[must_use]
    pub fn schema_hash(&self) -> u32 {
        let mut hasher = Sha256::new();
        for field in &self.fields {
            hasher.update(field.name.as_bytes());
        }
        let digest = hasher.finalize();
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    pub(crate) fn renumber_fields(&mut self) {
        for (ordinal, field) in self.fields.iter_mut().enumerate() {
            field.ordinal = ordinal;
        }
    }

    pub(crate) fn renumber_templates(&mut self) {
        for (ordinal, template) in self.templates.iter_mut().enumerate() {
            template.ordinal = ordinal;
        }
    }
}

/// Split a joined payload into its field values.
#[must_use]
pub fn split_fields(payload: &str) -> Vec<String> {
    payload.split(FIELD_SEPARATOR).map(str::to_string).collect()
}

#[must_use]
pub fn join_fields(fields: &[String]) -> String {
    let mut joined = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.push_str(field);
    }
    joined
}
