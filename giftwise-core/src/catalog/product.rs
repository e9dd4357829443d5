//! Product record shared by every pipeline stage.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which product field identifies a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyField {
    #[default]
    Id,
    Upc,
    Ean,
}

impl KeyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyField::Id => "id",
            KeyField::Upc => "upc",
            KeyField::Ean => "ean",
        }
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(KeyField::Id),
            "upc" => Ok(KeyField::Upc),
            "ean" => Ok(KeyField::Ean),
            other => Err(format!("unknown key field '{}', expected id, upc or ean", other)),
        }
    }
}

/// Values of one localized field, keyed by language in the order they were seen.
///
/// The first value recorded for a language wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LangValues(Vec<(String, String)>);

impl LangValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `lang` unless the language already has one.
    pub fn insert_first(&mut self, lang: impl Into<String>, value: impl Into<String>) {
        let lang = lang.into();
        if !self.0.iter().any(|(l, _)| *l == lang) {
            self.0.push((lang, value.into()));
        }
    }

    pub fn get(&self, lang: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(l, _)| l == lang)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(l, v)| (l.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for LangValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (lang, value) in &self.0 {
            map.serialize_entry(lang, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LangValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LangValuesVisitor;

        impl<'de> Visitor<'de> for LangValuesVisitor {
            type Value = LangValues;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of language to text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LangValues, A::Error> {
                let mut values = LangValues::new();
                while let Some((lang, value)) = access.next_entry::<String, Value>()? {
                    values.insert_first(lang, value_to_string(&value));
                }
                Ok(values)
            }
        }

        deserializer.deserialize_map(LangValuesVisitor)
    }
}

/// Physical dimensions as exported by the catalog (free-form strings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dimensions {
    #[serde(deserialize_with = "lenient_string")]
    pub width: String,
    #[serde(deserialize_with = "lenient_string")]
    pub height: String,
    #[serde(deserialize_with = "lenient_string")]
    pub depth: String,
    #[serde(deserialize_with = "lenient_string")]
    pub weight_g: String,
}

impl Dimensions {
    pub fn is_empty(&self) -> bool {
        self.width.is_empty()
            && self.height.is_empty()
            && self.depth.is_empty()
            && self.weight_g.is_empty()
    }
}

/// A catalog product as it flows through conversion, enrichment and loading.
///
/// Fields the pipeline does not know about are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ean: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub upc: String,

    #[serde(default, deserialize_with = "lenient_price", skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,

    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub themes: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub material: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub material_secondary: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub made_in: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub binding: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub tax_class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_attributes: BTreeMap<String, LangValues>,

    // Enrichment output
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub attributes_extracted: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub occasions: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub audience: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub negatives: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "String::is_empty")]
    pub canonical_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    /// Failure annotation left by the enrichment stage.
    #[serde(rename = "_error", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Product {
    /// The store key under `key_field`, falling back to `id`.
    pub fn code(&self, key_field: KeyField) -> Option<&str> {
        let primary = match key_field {
            KeyField::Id => self.id.trim(),
            KeyField::Upc => self.upc.trim(),
            KeyField::Ean => self.ean.trim(),
        };
        let code = if primary.is_empty() { self.id.trim() } else { primary };
        (!code.is_empty()).then_some(code)
    }

    /// The stored embedding, if it has the expected dimension.
    pub fn embedding_with_dim(&self, dim: usize) -> Option<&[f32]> {
        self.embedding
            .as_deref()
            .filter(|v| v.len() == dim)
    }

    /// JSON form of the record without the raw embedding vector.
    pub fn to_payload(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("embedding");
        }
        Ok(value)
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts strings, numbers and booleans; `null` becomes the empty string.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(value_to_string).unwrap_or_default())
}

/// `null` becomes an empty list; a lone scalar becomes a one-item list.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values.iter().map(value_to_string).collect(),
        Some(other) => vec![value_to_string(&other)],
    };
    Ok(items.into_iter().filter(|s| !s.trim().is_empty()).collect())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a JSON number or a numeric string (`"12,50"` included).
fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::fingerprint::fingerprint;
    use serde_json::json;

    #[test]
    fn test_null_fields_read_as_empty() {
        let with_nulls: Product = serde_json::from_value(json!({
            "id": "A",
            "title": "Cat mug",
            "keywords": null,
            "topics": [null, "cats"],
            "canonical_text": null,
            "themes": null,
            "tax_class": null,
            "custom_attributes": null
        }))
        .unwrap();
        let without: Product =
            serde_json::from_value(json!({"id": "A", "title": "Cat mug", "topics": ["cats"]})).unwrap();

        assert!(with_nulls.keywords.is_empty());
        assert_eq!(with_nulls.topics, vec!["cats"]);
        assert!(with_nulls.canonical_text.is_empty());
        assert!(with_nulls.themes.is_empty());
        assert_eq!(
            fingerprint(&with_nulls, "text-embedding-3-large", 1024),
            fingerprint(&without, "text-embedding-3-large", 1024)
        );
    }

    #[test]
    fn test_key_field_parse() {
        assert_eq!("UPC".parse::<KeyField>().unwrap(), KeyField::Upc);
        assert_eq!("ean".parse::<KeyField>().unwrap(), KeyField::Ean);
        assert!("sku".parse::<KeyField>().is_err());
    }

    #[test]
    fn test_code_falls_back_to_id() {
        let product = Product {
            id: "VCAL250124".to_string(),
            upc: "  ".to_string(),
            ..Product::default()
        };
        assert_eq!(product.code(KeyField::Upc), Some("VCAL250124"));
        assert_eq!(Product::default().code(KeyField::Id), None);
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = json!({
            "id": "A1",
            "title": "Mug",
            "price": "12,50",
            "color": "blue",
            "_error": "APIError: boom"
        });
        let product: Product = serde_json::from_value(raw).unwrap();
        assert_eq!(product.price, Some(12.5));
        assert_eq!(product.error.as_deref(), Some("APIError: boom"));
        assert_eq!(product.extra["color"], "blue");

        let back = serde_json::to_value(&product).unwrap();
        assert_eq!(back["color"], "blue");
        assert_eq!(back["_error"], "APIError: boom");
        assert_eq!(back["price"], 12.5);
    }

    #[test]
    fn test_numeric_id_and_dimensions() {
        let raw = json!({"id": 8012345, "dimensions": {"width": 10, "height": "15"}});
        let product: Product = serde_json::from_value(raw).unwrap();
        assert_eq!(product.id, "8012345");
        let dims = product.dimensions.unwrap();
        assert_eq!(dims.width, "10");
        assert_eq!(dims.height, "15");
        assert_eq!(dims.depth, "");
    }

    #[test]
    fn test_payload_drops_embedding() {
        let product = Product {
            id: "A1".to_string(),
            embedding: Some(vec![0.1, 0.2]),
            ..Product::default()
        };
        let payload = product.to_payload().unwrap();
        assert!(payload.get("embedding").is_none());
        assert_eq!(payload["id"], "A1");
    }

    #[test]
    fn test_lang_values_first_wins_and_keeps_order() {
        let raw = json!({"it": "Gatto", "en": "Cat"});
        let mut values: LangValues = serde_json::from_value(raw).unwrap();
        values.insert_first("it", "Micio");
        assert_eq!(values.get("it"), Some("Gatto"));
        let langs: Vec<&str> = values.iter().map(|(l, _)| l).collect();
        assert_eq!(langs, vec!["it", "en"]);
    }
}
