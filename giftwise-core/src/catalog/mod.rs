//! Catalog model and stage-1 conversion.
//!
//! Holds the [`Product`] record every stage reads and writes, the SFCC XML
//! parser, the text normalization helpers and the product file readers and
//! writers.

pub mod io;
pub mod product;
pub mod sfcc;
pub mod text;

pub use io::{read_products, write_records, JsonlWriter, OutputFormat};
pub use product::{Dimensions, KeyField, LangValues, Product};
pub use sfcc::{parse_catalog, parse_catalog_file, pick_by_priority, ConvertOptions};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid product record in {path} (line {line}): {source}")]
    Record {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed XML at byte {position}: {source}")]
    Malformed {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
