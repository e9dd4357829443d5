//! Reading and writing product files (JSON Lines or a JSON array).

use super::product::Product;
use super::{CatalogError, Result};
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use tokio::io::AsyncWriteExt;

/// On-disk layout of a product file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
}

impl OutputFormat {
    /// `.jsonl` means JSON Lines; anything else is a JSON array.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let is_jsonl = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jsonl"));
        if is_jsonl {
            Self::Jsonl
        } else {
            Self::Json
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{}', expected jsonl or json", other)),
        }
    }
}

/// Reads products from `path`, choosing the layout by extension.
pub fn read_products<P: AsRef<Path>>(path: P) -> Result<Vec<Product>> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let open_err = |source| CatalogError::Open {
        path: display.clone(),
        source,
    };

    match OutputFormat::from_path(path) {
        OutputFormat::Jsonl => {
            let reader = BufReader::new(fs::File::open(path).map_err(open_err)?);
            let mut products = Vec::new();
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let product = serde_json::from_str(line).map_err(|source| CatalogError::Record {
                    path: display.clone(),
                    line: idx + 1,
                    source,
                })?;
                products.push(product);
            }
            Ok(products)
        }
        OutputFormat::Json => {
            let contents = fs::read_to_string(path).map_err(open_err)?;
            serde_json::from_str(&contents).map_err(|source| CatalogError::Record {
                path: display.clone(),
                line: 0,
                source,
            })
        }
    }
}

/// Writes records in the requested layout. `pretty` only affects JSON arrays.
pub fn write_records<P, T>(path: P, records: &[T], format: OutputFormat, pretty: bool) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    crate::fs_util::ensure_parent_dir(path.as_ref())?;
    let mut writer = BufWriter::new(fs::File::create(path.as_ref())?);
    match format {
        OutputFormat::Jsonl => {
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
        }
        OutputFormat::Json if pretty => serde_json::to_writer_pretty(&mut writer, records)?,
        OutputFormat::Json => serde_json::to_writer(&mut writer, records)?,
    }
    writer.flush()?;
    Ok(())
}

/// Appends records to a JSON Lines file as they become available.
pub struct JsonlWriter {
    inner: tokio::io::BufWriter<tokio::fs::File>,
    written: usize,
}

impl JsonlWriter {
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::fs_util::ensure_parent_dir(path.as_ref())?;
        let file = tokio::fs::File::create(path.as_ref()).await?;
        Ok(Self {
            inner: tokio::io::BufWriter::new(file),
            written: 0,
        })
    }

    pub async fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes buffered lines and returns how many records were written.
    pub async fn finish(mut self) -> Result<usize> {
        self.inner.flush().await?;
        Ok(self.written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            title: format!("Product {}", id),
            ..Product::default()
        }
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(OutputFormat::from_path("out/products.JSONL"), OutputFormat::Jsonl);
        assert_eq!(OutputFormat::from_path("products.json"), OutputFormat::Json);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }

    #[test]
    fn test_jsonl_round_trip_skips_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/products.jsonl");
        write_records(&path, &[product("A"), product("B")], OutputFormat::Jsonl, false).unwrap();

        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("\n   \n");
        fs::write(&path, raw).unwrap();

        let products = read_products(&path).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[1].id, "B");
    }

    #[test]
    fn test_json_array_pretty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("products.json");
        write_records(&path, &[product("A")], OutputFormat::Json, true).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[\n"));
        assert_eq!(read_products(&path).unwrap()[0].title, "Product A");
    }

    #[test]
    fn test_bad_line_reports_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        fs::write(&path, "{\"id\": \"A\"}\n{oops\n").unwrap();
        match read_products(&path) {
            Err(CatalogError::Record { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
        }
    }

    #[tokio::test]
    async fn test_async_jsonl_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stream.jsonl");
        let mut writer = JsonlWriter::create(&path).await.unwrap();
        writer.write(&product("A")).await.unwrap();
        writer.write(&product("B")).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 2);
        assert_eq!(read_products(&path).unwrap().len(), 2);
    }
}
