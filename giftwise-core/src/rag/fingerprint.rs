//! Content fingerprints for skip-unchanged loading.
//!
//! A fingerprint covers exactly the fields that change what gets embedded or
//! filtered on, plus the embedding model and dimension. The key field is not
//! part of it.

use crate::catalog::Product;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;

/// JSON formatter writing `", "` between items and `": "` after keys.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// The canonical text hashed for `product`, with sorted keys.
pub fn fingerprint_input(product: &Product, embed_model: &str, embed_dim: usize) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("canonical_text", json!(product.canonical_text));
    fields.insert("keywords", json!(product.keywords));
    fields.insert("topics", json!(product.topics));
    fields.insert("attributes_extracted", json!(product.attributes_extracted));
    fields.insert("category", json!(product.category));
    fields.insert("brand", json!(product.brand));
    fields.insert(
        "price",
        product.price.map(|p| json!(p)).unwrap_or_else(|| json!("")),
    );
    fields.insert("embed_model", json!(embed_model));
    fields.insert("embed_dim", json!(embed_dim));

    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    // Serializing strings, numbers and arrays of strings into memory cannot fail.
    if fields.serialize(&mut serializer).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// SHA-256 hex digest of [`fingerprint_input`].
pub fn fingerprint(product: &Product, embed_model: &str, embed_dim: usize) -> String {
    let digest = Sha256::digest(fingerprint_input(product, embed_model, embed_dim).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            id: "VCAL250124".to_string(),
            title: "Calendario Gatti".to_string(),
            category: "Calendars".to_string(),
            brand: "Legami".to_string(),
            keywords: vec!["cat lover".to_string(), "wall calendar".to_string()],
            topics: vec!["cats".to_string()],
            canonical_text: "A wall calendar with cats.".to_string(),
            ..Product::default()
        }
    }

    #[test]
    fn test_input_layout() {
        let input = fingerprint_input(&product(), "text-embedding-3-large", 1024);
        assert_eq!(
            input,
            "{\"attributes_extracted\": [], \"brand\": \"Legami\", \"canonical_text\": \"A wall calendar with cats.\", \
             \"category\": \"Calendars\", \"embed_dim\": 1024, \"embed_model\": \"text-embedding-3-large\", \
             \"keywords\": [\"cat lover\", \"wall calendar\"], \"price\": \"\", \"topics\": [\"cats\"]}"
        );
    }

    #[test]
    fn test_deterministic_and_hex() {
        let a = fingerprint(&product(), "m", 1024);
        let b = fingerprint(&product(), "m", 1024);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sensitive_to_relevant_fields() {
        let base = fingerprint(&product(), "m", 1024);

        let mut changed = product();
        changed.keywords.push("gift".to_string());
        assert_ne!(fingerprint(&changed, "m", 1024), base);

        let mut priced = product();
        priced.price = Some(12.9);
        assert_ne!(fingerprint(&priced, "m", 1024), base);

        assert_ne!(fingerprint(&product(), "m", 512), base);
        assert_ne!(fingerprint(&product(), "other", 1024), base);
    }

    #[test]
    fn test_ignores_irrelevant_fields() {
        let base = fingerprint(&product(), "m", 1024);

        let mut other = product();
        other.id = "ANOTHER".to_string();
        other.title = "Different title".to_string();
        other.description = "Long description".to_string();
        other.extra.insert("stock".to_string(), json!(4));
        assert_eq!(fingerprint(&other, "m", 1024), base);
    }

    #[test]
    fn test_non_ascii_is_raw_utf8() {
        let mut p = product();
        p.canonical_text = "Tazza però".to_string();
        assert!(fingerprint_input(&p, "m", 8).contains("Tazza però"));
    }
}
