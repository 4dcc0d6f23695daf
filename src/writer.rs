// 📤 Target Writer - pipe-delimited UTF-16LE import files
//
// One file per module per run: `{module}_{YYYYMMDD}.csv`. No index column.
// The caller guarantees the table already passed validation.

use crate::error::{MigrationError, Result};
use crate::table::Table;
use chrono::{Local, NaiveDate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];

pub struct TargetWriter {
    /// Directory the module files are written into (created on demand)
    output_dir: PathBuf,
    run_date: NaiveDate,
}

impl TargetWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self::with_run_date(output_dir, Local::now().date_naive())
    }

    pub fn with_run_date(output_dir: impl Into<PathBuf>, run_date: NaiveDate) -> Self {
        TargetWriter {
            output_dir: output_dir.into(),
            run_date,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn file_path(&self, module: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.csv", module, self.run_date.format("%Y%m%d")))
    }

    /// Write a module's table, replacing any file from the same run date
    pub fn write(&self, module: &str, table: &Table) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| MigrationError::io(&self.output_dir, e))?;

        let path = self.file_path(module);
        let text = render_delimited(table).map_err(|e| MigrationError::csv(&path, e))?;
        fs::write(&path, encode_utf16le(&text)).map_err(|e| MigrationError::io(&path, e))?;

        tracing::info!(
            module,
            records = table.len(),
            path = %path.display(),
            "wrote target file"
        );
        Ok(path)
    }
}

fn render_delimited(table: &Table) -> std::result::Result<String, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'|')
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    wtr.write_record(table.columns())?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| csv::Error::from(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// encoding_rs only decodes UTF-16, so encode by hand
fn encode_utf16le(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + text.len() * 2);
    bytes.extend_from_slice(&UTF16LE_BOM);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}
