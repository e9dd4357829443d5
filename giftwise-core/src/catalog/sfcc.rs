//! Streaming parser for SFCC (Demandware) catalog exports.
//!
//! Element names are matched on their local part, so both the default
//! `http://www.demandware.com/xml/impex/catalog/2006-10-31` namespace and a
//! prefixed form are accepted.

use super::product::{Dimensions, LangValues, Product};
use super::text::{strip_html, to_bool, truncate_chars};
use super::{CatalogError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_LANG: &str = "x-default";
const TITLE_FROM_DESCRIPTION_CHARS: usize = 120;
const ID_BASIS_CHARS: usize = 80;

/// Conversion settings.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub lang_priority: Vec<String>,
    pub default_brand: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let catalog = crate::config::CatalogConfig::default();
        Self {
            lang_priority: catalog.lang_priority,
            default_brand: catalog.default_brand,
        }
    }
}

impl From<&crate::config::CatalogConfig> for ConvertOptions {
    fn from(config: &crate::config::CatalogConfig) -> Self {
        Self {
            lang_priority: config.lang_priority.clone(),
            default_brand: config.default_brand.clone(),
        }
    }
}

/// Picks the value of the first language in `priority` that has a non-empty
/// value, otherwise the first non-empty value in recorded order.
pub fn pick_by_priority(candidates: &LangValues, priority: &[String]) -> String {
    priority
        .iter()
        .filter_map(|lang| candidates.get(lang))
        .find(|v| !v.is_empty())
        .or_else(|| candidates.iter().map(|(_, v)| v).find(|v| !v.is_empty()))
        .unwrap_or_default()
        .to_string()
}

/// Parses a catalog file.
pub fn parse_catalog_file<P: AsRef<Path>>(path: P, options: &ConvertOptions) -> Result<Vec<Product>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CatalogError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let products = parse_catalog(BufReader::new(file), options)?;
    info!("Parsed {} products from {}", products.len(), path.display());
    Ok(products)
}

/// Parses every `<product>` element of a catalog document.
pub fn parse_catalog<R: BufRead>(source: R, options: &ConvertOptions) -> Result<Vec<Product>> {
    let mut reader = Reader::from_reader(source);
    let mut buf = Vec::new();
    let mut products = Vec::new();

    let mut current: Option<ProductBuilder> = None;
    // Element names below the current <product>, outermost first.
    let mut path: Vec<String> = Vec::new();
    let mut field: Option<OpenField> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if current.is_none() {
                    if name == "product" {
                        current = Some(ProductBuilder::new(attribute(&e, b"product-id")?));
                        path.clear();
                    }
                } else {
                    if let Some(open) = field.as_mut() {
                        open.child_started(&name);
                    } else {
                        field = OpenField::start(&name, &path, &e)?;
                    }
                    path.push(name);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(builder) = current.as_mut() {
                    let name = local_name(&e);
                    if field.is_none() {
                        if let Some(open) = OpenField::start(&name, &path, &e)? {
                            builder.finish_field(open);
                        }
                    }
                } else if local_name(&e) == "product" {
                    let builder = ProductBuilder::new(attribute(&e, b"product-id")?);
                    products.push(builder.build(options));
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(open) = field.as_mut() {
                    open.text.push_str(&e.unescape()?);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(open) = field.as_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if current.is_some() {
                    match path.pop() {
                        Some(_) => {
                            if field.as_ref().is_some_and(|f| f.depth == path.len()) {
                                if let (Some(builder), Some(open)) = (current.as_mut(), field.take()) {
                                    builder.finish_field(open);
                                }
                            }
                        }
                        None => {
                            if let Some(builder) = current.take() {
                                products.push(builder.build(options));
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CatalogError::Malformed {
                    position: reader.buffer_position(),
                    source: e,
                })
            }
            _ => (),
        }
        buf.clear();
    }

    debug!("Catalog document yielded {} products", products.len());
    Ok(products)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    DisplayName,
    ShortDescription,
    LongDescription,
    Ean,
    Upc,
    OnlineFlag,
    AvailableFlag,
    SearchableFlag,
    TaxClass,
    CustomAttribute,
}

impl FieldKind {
    fn for_child(name: &str) -> Option<Self> {
        Some(match name {
            "display-name" => Self::DisplayName,
            "short-description" => Self::ShortDescription,
            "long-description" => Self::LongDescription,
            "ean" => Self::Ean,
            "upc" => Self::Upc,
            "online-flag" => Self::OnlineFlag,
            "available-flag" => Self::AvailableFlag,
            "searchable-flag" => Self::SearchableFlag,
            "tax-class-id" => Self::TaxClass,
            _ => return None,
        })
    }
}

/// A field element whose text is being collected.
#[derive(Debug)]
struct OpenField {
    kind: FieldKind,
    lang: Option<String>,
    attribute_id: Option<String>,
    depth: usize,
    text: String,
}

impl OpenField {
    fn start(name: &str, path: &[String], e: &BytesStart<'_>) -> Result<Option<Self>> {
        let kind = if path.is_empty() {
            FieldKind::for_child(name)
        } else if name == "custom-attribute" && path.last().is_some_and(|p| p == "custom-attributes") {
            Some(FieldKind::CustomAttribute)
        } else {
            None
        };
        let Some(kind) = kind else {
            return Ok(None);
        };
        let attribute_id = match kind {
            FieldKind::CustomAttribute => attribute(e, b"attribute-id")?,
            _ => None,
        };
        Ok(Some(Self {
            kind,
            lang: attribute(e, b"xml:lang")?.map(|l| l.to_lowercase()),
            attribute_id,
            depth: path.len(),
            text: String::new(),
        }))
    }

    /// Multi-value custom attributes (`<value>` children) are joined with commas.
    fn child_started(&mut self, name: &str) {
        if name == "value" && !self.text.trim().is_empty() {
            let keep = self.text.trim_end().len();
            self.text.truncate(keep);
            self.text.push_str(", ");
        }
    }
}

#[derive(Debug, Default)]
struct ProductBuilder {
    id: Option<String>,
    display_name: LangValues,
    short_description: LangValues,
    long_description: LangValues,
    ean: Option<String>,
    upc: Option<String>,
    online: Option<String>,
    available: Option<String>,
    searchable: Option<String>,
    tax_class: Option<String>,
    custom: BTreeMap<String, LangValues>,
}

impl ProductBuilder {
    fn new(id: Option<String>) -> Self {
        Self {
            id: id.filter(|id| !id.is_empty()),
            ..Self::default()
        }
    }

    fn finish_field(&mut self, open: OpenField) {
        let text = strip_html(&open.text);
        match open.kind {
            FieldKind::DisplayName => record_localized(&mut self.display_name, open.lang, text),
            FieldKind::ShortDescription => record_localized(&mut self.short_description, open.lang, text),
            FieldKind::LongDescription => record_localized(&mut self.long_description, open.lang, text),
            FieldKind::Ean => {
                self.ean.get_or_insert(text);
            }
            FieldKind::Upc => {
                self.upc.get_or_insert(text);
            }
            FieldKind::OnlineFlag => first_non_empty(&mut self.online, text),
            FieldKind::AvailableFlag => first_non_empty(&mut self.available, text),
            FieldKind::SearchableFlag => first_non_empty(&mut self.searchable, text),
            FieldKind::TaxClass => first_non_empty(&mut self.tax_class, text),
            FieldKind::CustomAttribute => {
                let Some(attribute_id) = open.attribute_id.filter(|id| !id.is_empty()) else {
                    return;
                };
                if text.is_empty() {
                    return;
                }
                let lang = open.lang.unwrap_or_else(|| DEFAULT_LANG.to_string());
                self.custom.entry(attribute_id).or_default().insert_first(lang, text);
            }
        }
    }

    fn custom(&self, key: &str, priority: &[String]) -> String {
        self.custom
            .get(key)
            .map(|values| pick_by_priority(values, priority))
            .unwrap_or_default()
    }

    fn build(self, options: &ConvertOptions) -> Product {
        let priority = &options.lang_priority;

        let title = pick_by_priority(&self.display_name, priority);
        let short_desc = pick_by_priority(&self.short_description, priority);
        let long_desc = pick_by_priority(&self.long_description, priority);

        let id = match self.id.clone() {
            Some(id) => id,
            None => fallback_id(&title, &short_desc, &long_desc),
        };

        let description = if long_desc.is_empty() { short_desc } else { long_desc };
        let title = if !title.is_empty() {
            title
        } else if description.chars().count() > TITLE_FROM_DESCRIPTION_CHARS {
            format!("{}…", truncate_chars(&description, TITLE_FROM_DESCRIPTION_CHARS))
        } else {
            description.clone()
        };

        let category = ["tipologia", "serieMerceologica", "eventoCommerciale"]
            .iter()
            .map(|key| self.custom(key, priority))
            .find(|v| !v.is_empty())
            .unwrap_or_default();

        let dimensions = Dimensions {
            width: self.custom("dimWidth", priority),
            height: self.custom("dimHeight", priority),
            depth: self.custom("dimDepth", priority),
            weight_g: self.custom("dimWeight", priority),
        };

        Product {
            id,
            title,
            description,
            category,
            brand: options.default_brand.clone(),
            ean: self.ean.clone().unwrap_or_default(),
            upc: self.upc.clone().unwrap_or_default(),
            themes: self.custom("temi", priority),
            material: self.custom("materiale", priority),
            material_secondary: self.custom("materialeSecondario", priority),
            made_in: self.custom("made_in", priority),
            format: self.custom("formato", priority),
            binding: self.custom("rilegatura", priority),
            online: self.online.as_deref().and_then(to_bool),
            available: self.available.as_deref().and_then(to_bool),
            searchable: self.searchable.as_deref().and_then(to_bool),
            tax_class: self.tax_class.clone().unwrap_or_default(),
            dimensions: Some(dimensions),
            custom_attributes: self.custom,
            ..Product::default()
        }
    }
}

/// Elements with a language always register it; unlabeled ones only when non-empty.
fn record_localized(values: &mut LangValues, lang: Option<String>, text: String) {
    match lang {
        Some(lang) => values.insert_first(lang, text),
        None if !text.is_empty() => values.insert_first(DEFAULT_LANG, text),
        None => {}
    }
}

fn first_non_empty(slot: &mut Option<String>, text: String) {
    if slot.is_none() && !text.is_empty() {
        *slot = Some(text);
    }
}

/// Deterministic id for products exported without `product-id`.
fn fallback_id(title: &str, short_desc: &str, long_desc: &str) -> String {
    let basis = [title, short_desc, long_desc]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_default();
    let digest = Sha256::digest(truncate_chars(basis, ID_BASIS_CHARS).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<catalog xmlns="http://www.demandware.com/xml/impex/catalog/2006-10-31" catalog-id="legami">
  <product product-id="VCAL250124">
    <ean>8052694871234</ean>
    <upc>CAL250124</upc>
    <display-name xml:lang="x-default">Calendar Cats 2025</display-name>
    <display-name xml:lang="it">Calendario Gatti 2025</display-name>
    <display-name xml:lang="it">Ignored duplicate</display-name>
    <long-description xml:lang="it">&lt;p&gt;Un calendario &amp;amp; tanti &lt;b&gt;gatti&lt;/b&gt;&lt;/p&gt;</long-description>
    <online-flag></online-flag>
    <online-flag>true</online-flag>
    <searchable-flag>no</searchable-flag>
    <tax-class-id>standard</tax-class-id>
    <custom-attributes>
      <custom-attribute attribute-id="serieMerceologica" xml:lang="it">Calendari</custom-attribute>
      <custom-attribute attribute-id="temi">Gatti</custom-attribute>
      <custom-attribute attribute-id="formato">30x30</custom-attribute>
      <custom-attribute attribute-id="dimWidth">30</custom-attribute>
      <custom-attribute attribute-id="materiale" xml:lang="en"></custom-attribute>
      <custom-attribute attribute-id="occasioni">
        <value>Natale</value>
        <value>Compleanno</value>
      </custom-attribute>
    </custom-attributes>
  </product>
  <product>
    <short-description><![CDATA[A short <i>note</i>]]></short-description>
  </product>
</catalog>
"#;

    fn parse() -> Vec<Product> {
        parse_catalog(CATALOG.as_bytes(), &ConvertOptions::default()).unwrap()
    }

    #[test]
    fn test_parses_localized_fields() {
        let products = parse();
        assert_eq!(products.len(), 2);
        let p = &products[0];
        assert_eq!(p.id, "VCAL250124");
        assert_eq!(p.title, "Calendario Gatti 2025");
        assert_eq!(p.description, "Un calendario & tanti gatti");
        assert_eq!(p.ean, "8052694871234");
        assert_eq!(p.upc, "CAL250124");
    }

    #[test]
    fn test_flags_and_custom_attributes() {
        let p = &parse()[0];
        assert_eq!(p.online, Some(true));
        assert_eq!(p.searchable, Some(false));
        assert_eq!(p.available, None);
        assert_eq!(p.tax_class, "standard");
        assert_eq!(p.category, "Calendari");
        assert_eq!(p.themes, "Gatti");
        assert_eq!(p.format, "30x30");
        assert_eq!(p.material, "");
        assert_eq!(p.dimensions.as_ref().unwrap().width, "30");
        assert!(!p.custom_attributes.contains_key("materiale"));
        assert_eq!(
            p.custom_attributes["occasioni"].get("x-default"),
            Some("Natale, Compleanno")
        );
    }

    #[test]
    fn test_missing_id_and_title_fallback() {
        let p = &parse()[1];
        assert_eq!(p.title, "A short note");
        assert_eq!(p.description, "A short note");
        assert_eq!(p.id.len(), 32);
        assert_eq!(p.id, fallback_id("", "A short note", ""));
    }

    #[test]
    fn test_long_description_becomes_truncated_title() {
        let long = "x".repeat(130);
        let xml = format!(
            r#"<catalog><product product-id="P1"><long-description>{}</long-description></product></catalog>"#,
            long
        );
        let products = parse_catalog(xml.as_bytes(), &ConvertOptions::default()).unwrap();
        assert_eq!(products[0].title, format!("{}…", "x".repeat(120)));
    }

    #[test]
    fn test_pick_by_priority() {
        let mut values = LangValues::new();
        values.insert_first("de", "Katze");
        values.insert_first("it", "");
        values.insert_first("en", "Cat");
        let priority: Vec<String> = ["it", "en"].iter().map(|s| s.to_string()).collect();
        assert_eq!(pick_by_priority(&values, &priority), "Cat");

        let only_fr: Vec<String> = vec!["fr".to_string()];
        assert_eq!(pick_by_priority(&values, &only_fr), "Katze");
        assert_eq!(pick_by_priority(&LangValues::new(), &only_fr), "");
    }

    #[test]
    fn test_malformed_xml_is_error() {
        let result = parse_catalog("<catalog><product></catalog>".as_bytes(), &ConvertOptions::default());
        assert!(result.is_err());
    }
}
