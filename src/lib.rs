// Property Migration - Core Library
// Phased legacy → target data migration: delta, transform, validate, reconcile, rollback

pub mod error;
pub mod config;
pub mod workspace;
pub mod table;          // Typed tabular value model
pub mod loader;         // CSV/pipe loading with encoding detection
pub mod fingerprint;    // Order-independent row hashing
pub mod delta;          // New/changed rows between snapshots
pub mod transform;      // Declarative transform rules + rename
pub mod validation;     // Data-quality rules → PASS/FAIL report
pub mod writer;         // UTF-16LE pipe-delimited target files
pub mod reconciliation; // Source vs target key and field comparison
pub mod report;         // Markdown reports and success log
pub mod rollback;       // Zipped phase snapshots
pub mod ledger;         // SQLite audit trail
pub mod preflight;      // Production gate
pub mod notify;         // Support alerts
pub mod orchestrator;   // Phase state machine
pub mod logging;

// Re-export commonly used types
pub use error::{MigrationError, Result};
pub use config::{
    MigrationConfig, Phase, PhasePolicy, ValidationRules,
    DeltaSettings, TargetSettings, ProductionSettings,
};
pub use workspace::Workspace;
pub use table::{Table, Value};
pub use loader::{LoadOutcome, SourceEncoding, TabularLoader, filter_entities};
pub use fingerprint::{Fingerprint, fingerprint_row};
pub use delta::{ChangeKind, DeltaDetector, DeltaSet};
pub use transform::{RuleSpec, SynthesizedId, TransformEngine, TransformOutput, builtin_rules};
pub use validation::{SampleRow, ValidationEngine, ValidationReport, ValidationStatus};
pub use writer::TargetWriter;
pub use reconciliation::{
    FieldDiscrepancy, KeyPair, Mismatch,
    ReconciliationEngine, ReconciliationReport,
};
pub use report::{ReportWriter, render_reconciliation_report, render_validation_report};
pub use rollback::{RollbackManager, RollbackManifest, RollbackPoint};
pub use ledger::{EventType, LedgerEvent, RunLedger};
pub use preflight::{PreflightCheck, PreflightReport, run_preflight};
pub use notify::{LogNotifier, RecordingNotifier, SupportNotifier};
pub use orchestrator::{ModuleOutcome, ModuleStatus, PhaseOrchestrator, PhaseOutcome, PhaseState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
