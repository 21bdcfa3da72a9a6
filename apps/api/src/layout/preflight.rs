//! Content-volume hints computed before any render.
//!
//! Runs on the raw request data: collections the templates iterate over are
//! normalized to arrays, and a rough orientation and page estimate is written to
//! `__layout` for the templates and the later passes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::layout::layout_object;

/// Collections the templates iterate over. Non-arrays become `[]`.
pub const ARRAY_FIELDS: &[&str] = &[
    "modulos",
    "experienciasLaborales",
    "formaciones",
    "competencias",
    "idiomas",
    "referencias",
];

/// Long free-text fields under `informe`.
pub const TEXT_FIELDS: &[&str] = &[
    "motivoPresentacion",
    "aspectosPersonales",
    "trayectoriaFormativa",
    "trayectoriaProfesional",
    "entrevistaPersonal",
    "valoracion",
];

const LANDSCAPE_CHARS: usize = 5000;
const LANDSCAPE_ITEMS: usize = 50;
const CHARS_PER_ITEM: usize = 100;
const CHARS_PER_PAGE: usize = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutHints {
    pub is_landscape: bool,
    pub total_chars: usize,
    pub total_items: usize,
    pub estimated_pages: usize,
}

impl LayoutHints {
    pub fn from_counts(total_chars: usize, total_items: usize) -> Self {
        Self {
            is_landscape: total_chars > LANDSCAPE_CHARS || total_items > LANDSCAPE_ITEMS,
            total_chars,
            total_items,
            estimated_pages: (total_chars + total_items * CHARS_PER_ITEM).div_ceil(CHARS_PER_PAGE),
        }
    }
}

fn text_length(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(false) => 0,
        Value::Number(n) if n.as_f64() == Some(0.0) => 0,
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

/// Normalizes `data` in place and writes the hints into `__layout`, keeping any
/// other keys already there. Returns the hints.
///
/// A non-object `data` is left untouched and yields zero counts.
pub fn preflight(data: &mut Value) -> LayoutHints {
    let Some(root) = data.as_object_mut() else {
        return LayoutHints::from_counts(0, 0);
    };

    let mut total_items = 0;
    for key in ARRAY_FIELDS {
        let slot = root.entry(*key).or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        total_items += slot.as_array().map_or(0, Vec::len);
    }

    let total_chars = root
        .get("informe")
        .and_then(Value::as_object)
        .map(|informe: &Map<String, Value>| {
            TEXT_FIELDS
                .iter()
                .filter_map(|field| informe.get(*field))
                .map(text_length)
                .sum::<usize>()
        })
        .unwrap_or(0);

    let hints = LayoutHints::from_counts(total_chars, total_items);
    if let Some(layout) = layout_object(data) {
        layout.insert("isLandscape".into(), Value::Bool(hints.is_landscape));
        layout.insert("totalChars".into(), total_chars.into());
        layout.insert("totalItems".into(), total_items.into());
        layout.insert("estimatedPages".into(), hints.estimated_pages.into());
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalizes_arrays_and_counts_items() {
        let mut data = json!({
            "modulos": [{}, {}],
            "competencias": "not a list",
            "idiomas": [1, 2, 3]
        });
        let hints = preflight(&mut data);

        for key in ARRAY_FIELDS {
            assert!(data[*key].is_array(), "{key} should be an array");
        }
        assert_eq!(data["competencias"], json!([]));
        assert_eq!(hints.total_items, 5);
        assert_eq!(hints.total_chars, 0);
        assert_eq!(hints.estimated_pages, 1);
        assert!(!hints.is_landscape);
    }

    #[test]
    fn test_long_text_switches_to_landscape() {
        let mut data = json!({
            "informe": {
                "motivoPresentacion": "a".repeat(3000),
                "valoracion": "ñ".repeat(2001),
                "otroCampo": "b".repeat(10_000)
            }
        });
        let hints = preflight(&mut data);
        assert_eq!(hints.total_chars, 5001);
        assert!(hints.is_landscape);
        assert_eq!(hints.estimated_pages, 2);
        assert_eq!(data["__layout"]["isLandscape"], json!(true));
        assert_eq!(data["__layout"]["estimatedPages"], json!(2));
    }

    #[test]
    fn test_many_items_switch_to_landscape() {
        let hints = LayoutHints::from_counts(0, 51);
        assert!(hints.is_landscape);
        assert_eq!(hints.estimated_pages, 2);
    }

    #[test]
    fn test_existing_layout_keys_are_preserved() {
        let mut data = json!({ "__layout": { "calculations": { "performed": true } } });
        preflight(&mut data);
        assert_eq!(data["__layout"]["calculations"]["performed"], json!(true));
        assert_eq!(data["__layout"]["totalItems"], json!(0));
    }

    #[test]
    fn test_non_object_payload_is_ignored() {
        let mut data = json!([1, 2]);
        assert_eq!(preflight(&mut data), LayoutHints::from_counts(0, 0));
        assert_eq!(data, json!([1, 2]));
    }
}
