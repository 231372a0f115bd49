//! Content units produced by the fetch layer and chunks derived from them.

use serde::{Deserialize, Serialize};

/// Category of a piece of project text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// The project's main document (usually the README).
    PrimaryDoc,
    Source,
    Config,
    Metadata,
}

impl ContentKind {
    pub const ALL: [ContentKind; 4] = [
        ContentKind::PrimaryDoc,
        ContentKind::Source,
        ContentKind::Config,
        ContentKind::Metadata,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ContentKind::PrimaryDoc => "primary_doc",
            ContentKind::Source => "source",
            ContentKind::Config => "config",
            ContentKind::Metadata => "metadata",
        }
    }

    /// Heading used when a unit of this kind is rendered into a prompt.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ContentKind::PrimaryDoc => "Documentation",
            ContentKind::Source => "Source",
            ContentKind::Config => "Configuration",
            ContentKind::Metadata => "Metadata",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed text blob. Never mutated: bounding a unit produces a new text for
/// the same `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub kind: ContentKind,
    pub source_id: String,
    pub text: String,
}

impl ContentUnit {
    pub fn new(kind: ContentKind, source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

/// Everything fetched for one project, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBundle {
    #[serde(default)]
    pub units: Vec<ContentUnit>,
}

impl ContentBundle {
    #[must_use]
    pub fn new(units: Vec<ContentUnit>) -> Self {
        Self { units }
    }

    #[must_use]
    pub fn has_primary_doc(&self) -> bool {
        self.units.iter().any(|u| u.kind == ContentKind::PrimaryDoc)
    }

    #[must_use]
    pub fn count(&self, kind: ContentKind) -> usize {
        self.units.iter().filter(|u| u.kind == kind).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// A bounded slice of a larger text.
///
/// Chunks after the first may start with an overlap window copied from the
/// tail of the previous chunk; `overlap_len` is its byte length (including the
/// separator that follows it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub token_count: u32,
    pub index: usize,
    pub overlap_len: usize,
}

impl Chunk {
    /// The part of the chunk that is not repeated from the previous chunk.
    #[must_use]
    pub fn core_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// The overlap window, or an empty string for chunks without one.
    #[must_use]
    pub fn overlap_text(&self) -> &str {
        &self.text[..self.overlap_len]
    }
}
