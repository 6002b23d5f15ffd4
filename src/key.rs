use std::fmt;

/// Identity of one numbering sequence.
///
/// Entities with the same key draw from the same monotonic sequence; any
/// component differing means an independent sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub entity_type: String,
    pub bundle: String,
    pub suffix: String,
    pub field: String,
}

impl SeriesKey {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        suffix: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            suffix: suffix.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.entity_type, self.bundle, self.field, self.suffix
        )
    }
}
