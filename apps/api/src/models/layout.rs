use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the layout metadata object inside the shared request data.
pub const LAYOUT_KEY: &str = "__layout";

/// Pagination summary written to `__layout.calculations` after a pre-calculation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationSummary {
    pub performed: bool,
    pub timestamp: DateTime<Utc>,
    pub page_count: usize,
    pub break_points: Vec<usize>,
    pub orphaned_headers: Vec<usize>,
    /// Number of measured elements.
    pub measurements: usize,
    /// Set only when the pass failed and no hints were produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CalculationSummary {
    /// Summary used when a pass fails: no page count, no break points.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            performed: false,
            timestamp: Utc::now(),
            page_count: 0,
            break_points: Vec::new(),
            orphaned_headers: Vec::new(),
            measurements: 0,
            error: Some(error.into()),
        }
    }
}

/// Feature flags written to `__layout.fase2` so templates know which passes ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecalcFlags {
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
    pub calculation_requested: bool,
    pub phantom_render_enabled: bool,
    pub diagnostics_enabled: bool,
}

/// Returns the `__layout` object of `data`, creating it (or replacing a non-object value).
///
/// Returns `None` when `data` itself is not a JSON object.
pub fn layout_object(data: &mut Value) -> Option<&mut Map<String, Value>> {
    let root = data.as_object_mut()?;
    let slot = root
        .entry(LAYOUT_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_object_created_when_missing() {
        let mut data = json!({"modulos": []});
        layout_object(&mut data)
            .expect("object")
            .insert("x".into(), json!(1));
        assert_eq!(data["__layout"]["x"], 1);
    }

    #[test]
    fn test_layout_object_preserves_existing_fields() {
        let mut data = json!({"__layout": {"isLandscape": true}});
        layout_object(&mut data)
            .expect("object")
            .insert("calculations".into(), json!({}));
        assert_eq!(data["__layout"]["isLandscape"], true);
        assert!(data["__layout"]["calculations"].is_object());
    }

    #[test]
    fn test_layout_object_rejects_non_object_root() {
        let mut data = json!([1, 2, 3]);
        assert!(layout_object(&mut data).is_none());
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = CalculationSummary::failed("boom");
        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["performed"], false);
        assert_eq!(value["pageCount"], 0);
        assert_eq!(value["error"], "boom");
        assert!(value.get("breakPoints").is_some());
    }
}
