//! Field-level value types: the per-entity `SeriesValue` and the per-field
//! `FieldSettings`.

use serde::{Deserialize, Deserializer, Serialize};

/// Default suffix template: a dash, the four-digit year, then the literal `-store`.
pub const DEFAULT_SERIES_SUFFIX: &str = r"-Y-\s\t\o\r\e";

/// The number held by one entity in one series field.
///
/// Persisted as `{"value": 8, "autofill": false, "seriesSuffix": "-2024-03"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesValue {
    /// Allocated or manually entered number.
    #[serde(default, deserialize_with = "lenient_number")]
    pub value: Option<i64>,

    /// `Some(true)` asks for allocation on the next save.
    #[serde(default)]
    pub autofill: Option<bool>,

    /// Resolved suffix after allocation, or the manually entered one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_suffix: Option<String>,
}

impl SeriesValue {
    /// The value a new entity starts with: the field's suffix template, no
    /// number, autofill unset.
    pub fn for_field(settings: &FieldSettings) -> Self {
        Self {
            value: None,
            autofill: None,
            series_suffix: Some(settings.series_suffix.clone()),
        }
    }

    /// A value waiting for the allocator. The suffix stays unset until
    /// allocation writes the resolved one.
    pub fn autofill() -> Self {
        Self {
            autofill: Some(true),
            ..Self::default()
        }
    }

    /// A manually supplied number. Never touched by the allocator.
    pub fn manual(value: i64, series_suffix: Option<String>) -> Self {
        Self {
            value: Some(value),
            autofill: Some(false),
            series_suffix,
        }
    }

    /// Empty means no number and no pending allocation.
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && !self.is_pending()
    }

    /// Whether the next save will allocate.
    pub fn is_pending(&self) -> bool {
        self.autofill == Some(true)
    }

    /// Ask for a fresh allocation on the next save.
    pub fn request_autofill(&mut self) {
        self.autofill = Some(true);
    }
}

/// Reads a stored number, mapping anything non-numeric to `None` so a single
/// corrupt row cannot poison the whole record.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Configuration of one series field on an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSettings {
    /// Field identifier, part of the series key.
    pub name: String,

    /// Date-format template for the series suffix.
    #[serde(default = "default_series_suffix")]
    pub series_suffix: String,
}

fn default_series_suffix() -> String {
    DEFAULT_SERIES_SUFFIX.to_string()
}

impl FieldSettings {
    pub fn new(name: impl Into<String>, series_suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series_suffix: series_suffix.into(),
        }
    }

    /// Field with the default `-Y-\s\t\o\r\e` template.
    pub fn with_default_suffix(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_SERIES_SUFFIX)
    }
}
