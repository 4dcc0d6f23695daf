// 🚨 Error Taxonomy - what can go wrong during a migration run
//
// Data-quality problems are NOT errors here: they are validation report
// entries and never propagate as Err.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    // ========================================================================
    // SCHEMA
    // ========================================================================
    /// A column an operation depends on is absent from a table
    #[error("missing column '{column}' ({context})")]
    Schema { column: String, context: String },

    // ========================================================================
    // CONFIGURATION
    // ========================================================================
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse configuration {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    // ========================================================================
    // I/O
    // ========================================================================
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("archive error on {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // PHASE LEVEL
    // ========================================================================
    /// One or more production pre-flight checks failed
    #[error("pre-flight checks failed: {}", .0.join("; "))]
    Preflight(Vec<String>),

    /// Anything that escaped per-module handling
    #[error("critical failure in phase {phase}: {source}")]
    CriticalPhase {
        phase: String,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    pub fn schema(column: impl Into<String>, context: impl Into<String>) -> Self {
        MigrationError::Schema {
            column: column.into(),
            context: context.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        MigrationError::Csv {
            path: path.into(),
            source,
        }
    }

    pub fn archive(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        MigrationError::Archive {
            path: path.into(),
            source,
        }
    }

    /// Errors with no safe per-module recovery: the whole phase must stop
    pub fn is_fatal_to_phase(&self) -> bool {
        matches!(
            self,
            MigrationError::Config(_)
                | MigrationError::Yaml { .. }
                | MigrationError::Preflight(_)
                | MigrationError::CriticalPhase { .. }
        )
    }

    /// Wrap into a phase-level failure (idempotent)
    pub fn into_critical(self, phase: &str) -> Self {
        match self {
            MigrationError::CriticalPhase { .. } => self,
            other => MigrationError::CriticalPhase {
                phase: phase.to_string(),
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_names_column() {
        let err = MigrationError::schema("lease_ref", "delta key in reference table");
        assert_eq!(
            err.to_string(),
            "missing column 'lease_ref' (delta key in reference table)"
        );
        assert!(!err.is_fatal_to_phase());
    }

    #[test]
    fn test_preflight_message_joins_failures() {
        let err = MigrationError::Preflight(vec![
            "missing source file: sources/dm3_prod/ar.csv".to_string(),
            "target environment not configured".to_string(),
        ]);
        assert!(err.to_string().contains("ar.csv; target environment"));
        assert!(err.is_fatal_to_phase());
    }

    #[test]
    fn test_into_critical_does_not_double_wrap() {
        let err = MigrationError::Config("no modules".to_string()).into_critical("dm2_uat");
        let again = err.into_critical("dm3_prod");

        match again {
            MigrationError::CriticalPhase { phase, source } => {
                assert_eq!(phase, "dm2_uat");
                assert!(matches!(*source, MigrationError::Config(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
