use time::OffsetDateTime;

/// An immutable supergraph document and where it came from.
///
/// Descriptors are never mutated; a reload produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupergraphDescriptor {
    sdl: String,
    fetched_at: OffsetDateTime,
    source_url: String,
}

impl SupergraphDescriptor {
    pub fn new(sdl: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            sdl: sdl.into(),
            fetched_at: OffsetDateTime::now_utc(),
            source_url: source_url.into(),
        }
    }

    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn fetched_at(&self) -> OffsetDateTime {
        self.fetched_at
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Whether `other` carries the same document text.
    pub fn same_document(&self, other: &Self) -> bool {
        self.sdl == other.sdl
    }
}
