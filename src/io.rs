//! Delimited-text and Parquet table I/O.
//!
//! The legacy source files use `;` separators and some are ISO-8859-1
//! encoded (`µg/L` headers), so both are configurable per file.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HydroError, Result};

/// Text encoding of a source file, resolved from a WHATWG label
/// (`utf-8`, `iso-8859-1`, `cp1252`, ...).
///
/// Serialized as its canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceEncoding(&'static Encoding);

impl SourceEncoding {
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// ISO-8859-1 as browsers read it, i.e. windows-1252.
    pub fn latin1() -> Self {
        Self(WINDOWS_1252)
    }

    /// Accepts any WHATWG label, plus the `latin-1` / `utf_8` spellings.
    pub fn parse(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace('_', "-");
        Encoding::for_label(normalized.as_bytes())
            .or_else(|| Encoding::for_label(normalized.replace('-', "").as_bytes()))
            .map(Self)
            .ok_or_else(|| HydroError::Config(format!("Unsupported encoding '{label}'")))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Decode to UTF-8, dropping a byte-order mark. Malformed input is an
    /// error rather than replacement characters.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let (text, used, had_errors) = self.0.decode(bytes);
        if had_errors {
            return Err(HydroError::InvalidData(format!(
                "input is not valid {}",
                used.name()
            )));
        }
        Ok(text.into_owned())
    }
}

impl Default for SourceEncoding {
    fn default() -> Self {
        Self::utf8()
    }
}

impl TryFrom<String> for SourceEncoding {
    type Error = HydroError;

    fn try_from(label: String) -> Result<Self> {
        Self::parse(&label)
    }
}

impl From<SourceEncoding> for String {
    fn from(encoding: SourceEncoding) -> String {
        encoding.name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFormat {
    pub separator: u8,
    pub encoding: SourceEncoding,
}

impl Default for TableFormat {
    fn default() -> Self {
        Self {
            separator: b';',
            encoding: SourceEncoding::utf8(),
        }
    }
}

impl TableFormat {
    pub fn latin1(separator: u8) -> Self {
        Self {
            separator,
            encoding: SourceEncoding::latin1(),
        }
    }
}

/// Parse delimited text into a DataFrame with all columns as String dtype.
/// Column names are trimmed at both ends; inner whitespace is kept.
pub fn parse_table(bytes: Vec<u8>, format: &TableFormat) -> Result<DataFrame> {
    let utf8 = format.encoding.decode(&bytes)?.into_bytes();
    let separator = format.separator;
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .map_parse_options(|opts| opts.with_separator(separator))
        .into_reader_with_file_handle(Cursor::new(utf8))
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;
    Ok(df)
}

pub fn read_table(path: impl AsRef<Path>, format: &TableFormat) -> Result<DataFrame> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let df = parse_table(bytes, format)?;
    debug!(
        path = %path.display(),
        rows = df.height(),
        columns = df.width(),
        "read table"
    );
    Ok(df)
}

/// Write CSV, or Parquet when the path ends in `.parquet`.
pub fn write_table(df: &DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut out = df.clone();
    let file = File::create(path)?;
    let is_parquet = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);

    if is_parquet {
        ParquetWriter::new(file).finish(&mut out)?;
    } else {
        let mut file = file;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(&mut out)?;
    }
    debug!(path = %path.display(), rows = out.height(), "wrote table");
    Ok(())
}

/// Read a table previously written by [`write_table`].
pub fn read_written_table(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let is_parquet = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("parquet"))
        .unwrap_or(false);
    if is_parquet {
        let file = File::open(path)?;
        Ok(ParquetReader::new(file).finish()?)
    } else {
        read_table(
            path,
            &TableFormat {
                separator: b',',
                encoding: SourceEncoding::utf8(),
            },
        )
    }
}
