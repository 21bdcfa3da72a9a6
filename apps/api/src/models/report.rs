//! Candidate-report input as shaped by the template helpers: modules → sections → items.
//!
//! The layout core only reads this tree. Missing or non-array collections become
//! empty vectors instead of failing the request; malformed entries inside an array
//! are skipped.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The subset of the request data the layout passes care about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportData {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub modulos: Vec<Modulo>,
}

/// A top-level report module (e.g. "Experiencia").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Modulo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub titulo: Option<String>,
    #[serde(
        default,
        rename = "moduleType",
        deserialize_with = "lenient_string"
    )]
    pub module_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub secciones: Vec<Seccion>,
}

/// A section inside a module. `tipo` selects the representative item shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seccion {
    #[serde(default, deserialize_with = "lenient_string")]
    pub titulo: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub tipo: Option<String>,
    /// Raw item payloads. Any JSON value is accepted.
    #[serde(default, deserialize_with = "lenient_vec")]
    pub items: Vec<Value>,
}

impl ReportData {
    /// Parses the layout-relevant part of an arbitrary request payload.
    /// Never fails: anything unrecognizable yields an empty report.
    pub fn from_value(data: &Value) -> Self {
        serde_json::from_value(data.clone()).unwrap_or_default()
    }

    pub fn item_count(&self) -> usize {
        self.modulos
            .iter()
            .flat_map(|m| m.secciones.iter())
            .map(|s| s.items.len())
            .sum()
    }
}

/// Returns a non-blank text field of an item payload. Numbers are rendered as text.
pub fn item_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_nested_tree() {
        let data = json!({
            "modulos": [{
                "titulo": "Experiencia",
                "moduleType": "experiencia",
                "secciones": [{"titulo": "Empleos", "tipo": "experiencia", "items": [{"empresa": "Acme"}, {}]}]
            }]
        });
        let report = ReportData::from_value(&data);
        assert_eq!(report.modulos.len(), 1);
        assert_eq!(report.modulos[0].titulo.as_deref(), Some("Experiencia"));
        assert_eq!(report.modulos[0].module_type.as_deref(), Some("experiencia"));
        assert_eq!(report.item_count(), 2);
    }

    #[test]
    fn test_non_array_fields_default_to_empty() {
        let data = json!({"modulos": {"not": "an array"}});
        assert!(ReportData::from_value(&data).modulos.is_empty());

        let data = json!({"modulos": [{"titulo": "X", "secciones": "nope"}]});
        let report = ReportData::from_value(&data);
        assert_eq!(report.modulos.len(), 1);
        assert!(report.modulos[0].secciones.is_empty());
    }

    #[test]
    fn test_missing_modulos_and_non_object_payload() {
        assert!(ReportData::from_value(&json!({})).modulos.is_empty());
        assert!(ReportData::from_value(&json!(42)).modulos.is_empty());
    }

    #[test]
    fn test_malformed_module_entries_are_skipped() {
        let data = json!({"modulos": [null, 3, {"titulo": "Formación"}]});
        let report = ReportData::from_value(&data);
        assert_eq!(report.modulos.len(), 1);
        assert_eq!(report.modulos[0].titulo.as_deref(), Some("Formación"));
    }

    #[test]
    fn test_item_field_ignores_blank_and_structured_values() {
        let item = json!({"empresa": "  ", "nivel": 7, "puesto": ["a"], "funciones": " Gestión "});
        assert_eq!(item_field(&item, "empresa"), None);
        assert_eq!(item_field(&item, "nivel").as_deref(), Some("7"));
        assert_eq!(item_field(&item, "puesto"), None);
        assert_eq!(item_field(&item, "funciones").as_deref(), Some("Gestión"));
    }
}
