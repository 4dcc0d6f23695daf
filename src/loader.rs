// 📥 Tabular Loader - legacy CSV extracts → Table
//
// Legacy extracts arrive in whatever encoding the source system felt like
// (UTF-8, UTF-8 with BOM, UTF-16, Windows-1252) and with ragged rows.
// Rows are padded or truncated to the header width instead of rejected.

use crate::error::{MigrationError, Result};
use crate::table::{Table, Value};
use encoding_rs::{UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

// ============================================================================
// LOAD OUTCOME
// ============================================================================

/// A missing file is an expected state (first run), not an error
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Found(Table),
    NotFound,
}

impl LoadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, LoadOutcome::Found(_))
    }

    /// The loaded table, or an empty one when the file was absent
    pub fn into_table(self) -> Table {
        match self {
            LoadOutcome::Found(table) => table,
            LoadOutcome::NotFound => Table::default(),
        }
    }

    pub fn into_option(self) -> Option<Table> {
        match self {
            LoadOutcome::Found(table) => Some(table),
            LoadOutcome::NotFound => None,
        }
    }
}

// ============================================================================
// ENCODING DETECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    Windows1252,
}

impl SourceEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "UTF-8",
            SourceEncoding::Utf8Bom => "UTF-8 (BOM)",
            SourceEncoding::Utf16Le => "UTF-16LE",
            SourceEncoding::Utf16Be => "UTF-16BE",
            SourceEncoding::Windows1252 => "Windows-1252",
        }
    }
}

/// Sniff the encoding (BOM first, then strict UTF-8, then Windows-1252) and decode
pub fn decode_bytes(bytes: &[u8]) -> (String, SourceEncoding) {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        let (text, _) = UTF_8.decode_with_bom_removal(bytes);
        return (text.into_owned(), SourceEncoding::Utf8Bom);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        let (text, _) = UTF_16LE.decode_with_bom_removal(bytes);
        return (text.into_owned(), SourceEncoding::Utf16Le);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _) = UTF_16BE.decode_with_bom_removal(bytes);
        return (text.into_owned(), SourceEncoding::Utf16Be);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), SourceEncoding::Utf8);
    }

    // Windows-1252 maps every byte, so this never fails
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    (text.into_owned(), SourceEncoding::Windows1252)
}

// ============================================================================
// LOADER
// ============================================================================

#[derive(Debug, Clone)]
pub struct TabularLoader {
    /// Field delimiter (`,` for legacy sources, `|` for target files)
    pub delimiter: u8,

    /// Promote all-numeric columns to Number values
    pub infer_types: bool,
}

impl TabularLoader {
    /// Loader for legacy source extracts
    pub fn source() -> Self {
        TabularLoader {
            delimiter: b',',
            infer_types: true,
        }
    }

    /// Loader for files produced by the TargetWriter
    pub fn target() -> Self {
        TabularLoader {
            delimiter: b'|',
            infer_types: true,
        }
    }

    /// Load a file; a missing file yields `LoadOutcome::NotFound`
    pub fn load(&self, path: &Path) -> Result<LoadOutcome> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "file not found");
                return Ok(LoadOutcome::NotFound);
            }
            Err(e) => return Err(MigrationError::io(path, e)),
        };

        let (text, encoding) = decode_bytes(&bytes);
        if encoding == SourceEncoding::Windows1252 {
            tracing::warn!(
                path = %path.display(),
                "file is not valid UTF-8, decoded as Windows-1252"
            );
        }

        let table = self
            .parse_text(&text)
            .map_err(|e| MigrationError::csv(path, e))?;

        tracing::debug!(
            path = %path.display(),
            encoding = encoding.name(),
            rows = table.len(),
            columns = table.columns().len(),
            "loaded table"
        );
        Ok(LoadOutcome::Found(table))
    }

    /// Parse already-decoded delimited text. First record is the header.
    pub fn parse_text(&self, text: &str) -> std::result::Result<Table, csv::Error> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = rdr.records();

        let header = match records.next() {
            Some(record) => record?,
            None => return Ok(Table::default()),
        };
        let columns: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let width = columns.len();
        let mut table = Table::new(columns);
        let mut ragged = 0usize;

        for record in records {
            let record = record?;
            if record.len() != width {
                ragged += 1;
            }
            // push_row pads short rows with Null and truncates long ones
            table.push_row(record.iter().map(Value::from_cell).collect());
        }

        if ragged > 0 {
            tracing::warn!(rows = ragged, width, "repaired rows with unexpected field count");
        }

        if self.infer_types {
            table.infer_numeric_columns();
        }
        Ok(table)
    }
}

/// Keep only rows belonging to the configured entities (`property_id` column).
/// No-op when no filter is configured or the column is absent.
pub fn filter_entities(table: &mut Table, properties: Option<&[String]>) {
    let Some(properties) = properties else {
        return;
    };
    let Some(idx) = table.column_index("property_id") else {
        return;
    };

    let before = table.len();
    table.retain_rows(|row| {
        row.get(idx)
            .map(|v| properties.iter().any(|p| *p == v.as_key()))
            .unwrap_or(false)
    });
    tracing::info!(kept = table.len(), dropped = before - table.len(), "applied entity filter");
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_utf8_bom() {
        let (text, enc) = decode_bytes(b"\xEF\xBB\xBFa,b\n1,2\n");
        assert_eq!(enc, SourceEncoding::Utf8Bom);
        assert!(text.starts_with("a,b"));
    }

    #[test]
    fn test_decode_utf16le() {
        let (text, enc) = decode_bytes(&utf16le_with_bom("id|name\n1|Zoë\n"));
        assert_eq!(enc, SourceEncoding::Utf16Le);
        assert_eq!(text, "id|name\n1|Zoë\n");
    }

    #[test]
    fn test_decode_windows_1252_fallback() {
        // 0xE9 is 'é' in Windows-1252 and invalid as a lone UTF-8 byte
        let (text, enc) = decode_bytes(b"name\nCaf\xE9\n");
        assert_eq!(enc, SourceEncoding::Windows1252);
        assert_eq!(text, "name\nCafé\n");
    }

    #[test]
    fn test_ragged_rows_are_repaired() {
        let loader = TabularLoader::source();
        let table = loader
            .parse_text("lease_ref,tenant_id,base_rent\nL1,T1\nL2,T2,900,extra\n")
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "base_rent"), &Value::Null);
        assert_eq!(table.get(1, "base_rent"), &Value::Number(900.0));
        assert_eq!(table.row(1).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_text_is_empty_table() {
        let table = TabularLoader::source().parse_text("").unwrap();
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let outcome = TabularLoader::source()
            .load(Path::new("/nonexistent/leasing.csv"))
            .unwrap();
        assert_eq!(outcome, LoadOutcome::NotFound);
        assert!(outcome.into_table().is_empty());
    }

    #[test]
    fn test_load_pipe_delimited_utf16_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&utf16le_with_bom("LeaseReference|BaseRent\r\nL1|1200\r\n"))
            .unwrap();

        let table = TabularLoader::target()
            .load(file.path())
            .unwrap()
            .into_table();

        assert_eq!(table.columns(), &["LeaseReference", "BaseRent"]);
        assert_eq!(table.get(0, "BaseRent"), &Value::Number(1200.0));
    }

    #[test]
    fn test_filter_entities() {
        let mut table = Table::from_rows(
            &["property_id", "lease_ref"],
            vec![vec!["P1", "L1"], vec!["P2", "L2"], vec!["P3", "L3"]],
        );
        let keep = vec!["P1".to_string(), "P3".to_string()];
        filter_entities(&mut table, Some(keep.as_slice()));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "lease_ref"), &Value::text("L3"));
    }
}
