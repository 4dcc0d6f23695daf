// 🎼 Phase Orchestrator - INIT → PER_MODULE → DONE | ROLLED_BACK
//
// Per module: load/delta → transform → validate → (PASS: write + reconcile).
// Module errors are logged and the next module runs. Only a phase-level
// error restores the rollback point.

use crate::config::{MigrationConfig, Phase};
use crate::delta::DeltaDetector;
use crate::error::{MigrationError, Result};
use crate::ledger::{EventType, RunLedger};
use crate::loader::{filter_entities, TabularLoader};
use crate::notify::{LogNotifier, SupportNotifier};
use crate::preflight::{run_preflight, PreflightReport};
use crate::reconciliation::{find_target_files, ReconciliationEngine, ReconciliationReport};
use crate::report::ReportWriter;
use crate::rollback::{RollbackManager, RollbackPoint};
use crate::transform::TransformEngine;
use crate::validation::{ValidationEngine, ValidationReport};
use crate::workspace::Workspace;
use crate::writer::TargetWriter;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::error::Error as StdError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// STATE & OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PhaseState {
    Init,
    PerModule,
    Done,
    /// Phase abandoned and the rollback point restored
    RolledBack,
    /// Phase abandoned with no rollback point to restore (or the restore failed)
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ModuleStatus {
    /// Validated, written and reconciled
    Written,
    /// Nothing to migrate (no source data, or no new/changed rows)
    NoChanges,
    /// Validation errors; output withheld
    ValidationFailed,
    /// Processing error, logged
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleOutcome {
    pub module: String,
    pub status: ModuleStatus,
    pub records: usize,
    pub synthesized_ids: usize,
    pub validation: Option<ValidationReport>,
    pub validation_report: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub reconciliation: Option<ReconciliationReport>,
    pub archive_dir: Option<PathBuf>,
}

impl ModuleOutcome {
    fn new(module: &str, status: ModuleStatus) -> Self {
        ModuleOutcome {
            module: module.to_string(),
            status,
            records: 0,
            synthesized_ids: 0,
            validation: None,
            validation_report: None,
            output_file: None,
            reconciliation: None,
            archive_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub run_id: String,
    pub state: PhaseState,
    pub rollback_point: Option<PathBuf>,
    pub preflight: Option<PreflightReport>,
    pub modules: Vec<ModuleOutcome>,
}

impl PhaseOutcome {
    pub fn written(&self) -> usize {
        self.modules
            .iter()
            .filter(|m| m.status == ModuleStatus::Written)
            .count()
    }

    pub fn summary(&self) -> String {
        let failed = self
            .modules
            .iter()
            .filter(|m| matches!(m.status, ModuleStatus::Failed(_) | ModuleStatus::ValidationFailed))
            .count();
        format!(
            "{}: {} modules, {} written, {} failed",
            self.phase,
            self.modules.len(),
            self.written(),
            failed
        )
    }
}

// ============================================================================
// PHASE ORCHESTRATOR
// ============================================================================

pub struct PhaseOrchestrator {
    workspace: Workspace,
    config: MigrationConfig,
    phase: Phase,
    ledger: RunLedger,
    notifier: Arc<dyn SupportNotifier>,
    run_date: NaiveDate,
    state: PhaseState,
}

impl PhaseOrchestrator {
    /// Build from an already-validated configuration
    pub fn new(workspace: Workspace, mut config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        config.canonicalize_phases()?;
        let phase = config.phase_kind()?;
        workspace.ensure_layout()?;
        let ledger = RunLedger::open(&workspace.ledger_path())?;
        let notifier: Arc<dyn SupportNotifier> =
            Arc::new(LogNotifier::new(config.production.support_webhook.clone()));

        Ok(PhaseOrchestrator {
            workspace,
            config,
            phase,
            ledger,
            notifier,
            run_date: Local::now().date_naive(),
            state: PhaseState::Init,
        })
    }

    /// Load `config/{phase}.yaml` (or `config_path`) and check it is for `phase`
    pub fn from_workspace(
        workspace: Workspace,
        phase: Phase,
        config_path: Option<&Path>,
    ) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => workspace.config_file(phase.as_str()),
        };
        let config = MigrationConfig::load(&path)?;
        let configured = config.phase_kind()?;
        if configured != phase {
            return Err(MigrationError::Config(format!(
                "{} is for phase {}, not {}",
                path.display(),
                configured,
                phase
            )));
        }
        Self::new(workspace, config)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn SupportNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.run_date = run_date;
        self
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        self.ledger.run_id()
    }

    /// Run the whole phase. Err means the phase failed as a whole; by then
    /// the rollback point (if any) has been restored.
    pub fn run(&mut self) -> Result<PhaseOutcome> {
        let phase = self.phase;
        let policy = phase.policy();
        self.state = PhaseState::Init;

        if phase == Phase::Initial {
            let log = self.workspace.module_error_log();
            fs::write(&log, "").map_err(|e| MigrationError::io(&log, e))?;
        }

        tracing::info!(phase = %phase, modules = self.config.modules.len(), "starting phase");
        self.audit(
            EventType::PhaseStarted,
            None,
            serde_json::json!({ "modules": self.config.modules }),
        );

        let mut outcome = PhaseOutcome {
            phase,
            run_id: self.ledger.run_id().to_string(),
            state: PhaseState::Init,
            rollback_point: None,
            preflight: None,
            modules: Vec::new(),
        };

        let rollback_point = if policy.creates_rollback_point {
            match RollbackManager::new(self.workspace.clone()).create_rollback_point(phase.as_str()) {
                Ok(point) => {
                    self.audit(
                        EventType::RollbackPointCreated,
                        None,
                        serde_json::json!({ "path": point.path.display().to_string() }),
                    );
                    outcome.rollback_point = Some(point.path.clone());
                    Some(point)
                }
                Err(e) => return Err(self.fail_phase(e, None)),
            }
        } else {
            None
        };

        match self.run_modules(&mut outcome) {
            Ok(()) => {
                if phase == Phase::Production {
                    let reports = ReportWriter::new(self.workspace.clone());
                    if let Err(e) = reports.record_production_success(phase.as_str(), &self.config.modules) {
                        return Err(self.fail_phase(e, rollback_point.as_ref()));
                    }
                }
                self.state = PhaseState::Done;
                outcome.state = PhaseState::Done;
                self.audit(
                    EventType::PhaseCompleted,
                    None,
                    serde_json::json!({ "written": outcome.written(), "modules": outcome.modules.len() }),
                );
                tracing::info!(phase = %phase, "{}", outcome.summary());
                Ok(outcome)
            }
            Err(e) => Err(self.fail_phase(e, rollback_point.as_ref())),
        }
    }

    fn run_modules(&mut self, outcome: &mut PhaseOutcome) -> Result<()> {
        if self.phase.policy().requires_preflight {
            let report = run_preflight(&self.workspace, &self.config);
            outcome.preflight = Some(report.clone());
            report.into_result()?;
        }

        self.state = PhaseState::PerModule;
        let modules = self.config.modules.clone();
        for module in &modules {
            tracing::info!(phase = %self.phase, module = %module, "processing module");

            let module_outcome = match self.process_module(module) {
                Ok(o) => o,
                Err(e) if e.is_fatal_to_phase() => return Err(e),
                Err(e) => {
                    tracing::error!(module = %module, error = %e, "module processing failed");
                    self.log_module_error(module, &error_chain(&e));
                    self.audit(
                        EventType::ModuleFailed,
                        Some(module),
                        serde_json::json!({ "error": error_chain(&e) }),
                    );
                    ModuleOutcome::new(module, ModuleStatus::Failed(e.to_string()))
                }
            };
            outcome.modules.push(module_outcome);
        }
        Ok(())
    }

    fn process_module(&self, module: &str) -> Result<ModuleOutcome> {
        let policy = self.phase.policy();
        let phase_name = self.config.phase.as_str();
        let loader = TabularLoader::source();
        let current_path = self.workspace.source_file(phase_name, module);
        let properties = self.config.properties.as_deref();

        // 1. Load (full extraction or delta)
        let table = if policy.uses_delta {
            let reference_path = self
                .workspace
                .source_file(&self.config.delta_settings.reference_phase, module);
            let delta = DeltaDetector::new(self.config.key_column(module)?).detect_files(
                &loader,
                &current_path,
                &reference_path,
                properties,
            )?;
            tracing::info!(
                module,
                new = delta.new_count(),
                changed = delta.changed_count(),
                first_run = delta.first_run,
                "delta detected"
            );
            delta.into_table()
        } else {
            let mut table = loader.load(&current_path)?.into_table();
            filter_entities(&mut table, properties);
            tracing::info!(module, records = table.len(), "extracted records");
            table
        };

        if table.is_empty() {
            tracing::info!(module, "no records to migrate");
            self.audit(EventType::ModuleSkipped, Some(module), serde_json::json!({ "reason": "no records" }));
            return Ok(ModuleOutcome::new(module, ModuleStatus::NoChanges));
        }

        // 2. Transform
        let transformed = TransformEngine::new(&self.config).transform(module, table)?;
        self.ledger
            .record_synthesized_ids(phase_name, module, &transformed.synthesized_ids)?;

        // 3. Validate (report persisted whatever the status)
        let report = ValidationEngine::new().validate(
            module,
            phase_name,
            &transformed.table,
            self.config.rules(module)?,
        );
        let reports = ReportWriter::new(self.workspace.clone());
        let report_path = reports.save_validation(&report)?;

        let mut outcome = ModuleOutcome::new(module, ModuleStatus::ValidationFailed);
        outcome.records = transformed.table.len();
        outcome.synthesized_ids = transformed.synthesized_ids.len();
        outcome.validation_report = Some(report_path);

        if !report.passed() {
            tracing::warn!(module, errors = report.errors.len(), "validation failed, output withheld");
            if self.phase == Phase::Production {
                self.log_module_error(
                    module,
                    &format!("production validation failed: {}", report.errors.join("; ")),
                );
            }
            self.audit(
                EventType::ModuleSkipped,
                Some(module),
                serde_json::json!({ "reason": "validation failed", "errors": report.errors }),
            );
            outcome.validation = Some(report);
            return Ok(outcome);
        }
        outcome.validation = Some(report);

        // 4. Write
        let output_dir = self.workspace.output_dir(self.phase, phase_name);
        let writer = TargetWriter::with_run_date(&output_dir, self.run_date);
        let output_file = writer.write(module, &transformed.table)?;
        outcome.output_file = Some(output_file);
        outcome.status = ModuleStatus::Written;

        // 5. Reconcile (fails soft)
        let reconciliation =
            ReconciliationEngine::new().reconcile_module(&self.workspace, &self.config, module);
        if let Some(recon) = &reconciliation {
            reports.save_reconciliation(recon)?;
        }
        outcome.reconciliation = reconciliation;

        // 6. Archive production output
        if policy.archives_outputs {
            outcome.archive_dir = Some(self.archive_outputs(module, &output_dir)?);
        }

        self.audit(
            EventType::ModuleCompleted,
            Some(module),
            serde_json::json!({
                "records": outcome.records,
                "synthesized_ids": outcome.synthesized_ids,
                "output": outcome.output_file.as_ref().map(|p| p.display().to_string()),
            }),
        );
        Ok(outcome)
    }

    /// Copy a module's output files to backups/production/{module}_{timestamp}/
    fn archive_outputs(&self, module: &str, output_dir: &Path) -> Result<PathBuf> {
        let archive_dir = self.workspace.production_archive_dir().join(format!(
            "{}_{}",
            module,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        fs::create_dir_all(&archive_dir).map_err(|e| MigrationError::io(&archive_dir, e))?;

        for file in find_target_files(output_dir, module)? {
            if let Some(name) = file.file_name() {
                let dest = archive_dir.join(name);
                fs::copy(&file, &dest).map_err(|e| MigrationError::io(&file, e))?;
            }
        }
        tracing::info!(module, path = %archive_dir.display(), "archived production output");
        Ok(archive_dir)
    }

    /// Phase-level failure: log, restore the rollback point, notify support
    fn fail_phase(&mut self, error: MigrationError, point: Option<&RollbackPoint>) -> MigrationError {
        let phase_name = self.phase.as_str();
        let error = error.into_critical(phase_name);
        tracing::error!(phase = phase_name, error = %error, "phase failed");
        append_log(
            &self.workspace.critical_error_log(),
            &format!("phase {} failed: {}", phase_name, error_chain(&error)),
        );

        self.state = match point {
            Some(point) => match RollbackManager::new(self.workspace.clone()).execute_rollback(point) {
                Ok(()) => {
                    self.audit(
                        EventType::RollbackExecuted,
                        None,
                        serde_json::json!({ "path": point.path.display().to_string() }),
                    );
                    PhaseState::RolledBack
                }
                Err(e) => {
                    tracing::error!(error = %e, "rollback failed");
                    append_log(
                        &self.workspace.critical_error_log(),
                        &format!("rollback of {} failed: {}", phase_name, error_chain(&e)),
                    );
                    PhaseState::Failed
                }
            },
            None => {
                tracing::error!(phase = phase_name, "rollback not possible: no rollback point");
                PhaseState::Failed
            }
        };

        self.audit(
            EventType::PhaseFailed,
            None,
            serde_json::json!({ "error": error.to_string(), "rolled_back": self.state == PhaseState::RolledBack }),
        );

        if self.phase == Phase::Production {
            self.notifier.notify_failure(phase_name, &error.to_string());
        }
        error
    }

    fn log_module_error(&self, module: &str, message: &str) {
        append_log(
            &self.workspace.module_error_log(),
            &format!("phase {} module {} error: {}", self.phase, module, message),
        );
    }

    /// Ledger writes are best effort outside module processing
    fn audit(&self, event_type: EventType, module: Option<&str>, data: serde_json::Value) {
        if let Err(e) = self.ledger.record(event_type, self.phase.as_str(), module, data) {
            tracing::warn!(error = %e, event = event_type.as_str(), "could not write ledger event");
        }
    }
}

// ============================================================================
// ERROR LOGS
// ============================================================================

/// "outer: inner: innermost"
pub fn error_chain(error: &dyn StdError) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join("\n  caused by: ")
}

/// Append a timestamped entry; failures to log are reported, never raised
pub fn append_log(path: &Path, entry: &str) {
    let result = path
        .parent()
        .map(fs::create_dir_all)
        .unwrap_or(Ok(()))
        .and_then(|_| OpenOptions::new().create(true).append(true).open(path))
        .and_then(|mut file| {
            writeln!(file, "[{}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), entry)
        });
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "could not write error log");
    }
}

/// Record a failure that happened before an orchestrator existed (bad config, etc.)
pub fn log_critical_error(workspace: &Workspace, phase: &str, error: &dyn StdError) {
    append_log(
        &workspace.critical_error_log(),
        &format!("phase {} failed: {}", phase, error_chain(error)),
    );
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{create_test_config, SAMPLE_CONFIG};
    use crate::loader::TabularLoader;
    use crate::notify::RecordingNotifier;
    use crate::table::Value;

    const LEASING_HEADER: &str = "lease_ref,tenant_id,lease_start,lease_end,rent_freq,base_rent\n";

    fn create_test_workspace() -> (tempfile::TempDir, Workspace) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.ensure_layout().unwrap();
        (tmp, ws)
    }

    fn write_source(ws: &Workspace, phase: &str, module: &str, content: &str) {
        let path = ws.source_file(phase, module);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn create_production_config() -> MigrationConfig {
        let mut config = create_test_config();
        config.phase = "dm3_prod".to_string();
        config.delta_settings.reference_phase = "dm2_uat".to_string();
        config.target.environment = Some("PRODUCTION".to_string());
        config.production.min_free_disk_bytes = 0;
        config
    }

    #[test]
    fn test_staging_phase_writes_delta_and_reports() {
        let (_tmp, ws) = create_test_workspace();
        fs::write(ws.config_file("dm2_uat"), SAMPLE_CONFIG).unwrap();

        write_source(
            &ws,
            "dm1_crp",
            "leasing",
            &format!("{}L1,T1,2024-01-01,2025-01-01,M,1200\nL2,T2,2024-01-01,2025-01-01,M,800\n", LEASING_HEADER),
        );
        write_source(
            &ws,
            "dm2_uat",
            "leasing",
            &format!(
                "{}L1,T1,2024-01-01,2025-01-01,M,1200\nL2,T2,2024-01-01,2025-01-01,M,850\nL3,,2024-02-01,2024-01-01,Q,-900\n",
                LEASING_HEADER
            ),
        );
        write_source(&ws, "dm2_uat", "ar", "invoice_number,amount\nINV-1,10\nINV-2,20\n");

        let mut orchestrator = PhaseOrchestrator::from_workspace(ws.clone(), Phase::Staging, None)
            .unwrap()
            .with_run_date(run_date());
        let outcome = orchestrator.run().unwrap();

        assert_eq!(orchestrator.state(), PhaseState::Done);
        assert_eq!(outcome.written(), 2);
        assert!(outcome.rollback_point.as_ref().unwrap().join("manifest.json").is_file());

        // Leasing: L2 changed, L3 new; L1 unchanged
        let leasing = &outcome.modules[0];
        assert_eq!(leasing.status, ModuleStatus::Written);
        assert_eq!(leasing.records, 2);
        assert_eq!(leasing.synthesized_ids, 1);

        let out = ws.output_dir(Phase::Staging, "dm2_uat").join("leasing_20240601.csv");
        let table = TabularLoader::target().load(&out).unwrap().into_table();
        assert_eq!(table.keys(0), vec!["L2", "L3"]);
        assert_eq!(table.get(1, "TenantID"), &Value::text("TEMP-L3"));
        assert_eq!(table.get(1, "RentFrequency"), &Value::text("QUARTERLY"));
        assert_eq!(table.get(1, "LeaseExpirationDate"), &Value::Number(20250201.0));

        // AR has no reference snapshot: first run, everything migrates
        assert_eq!(outcome.modules[1].records, 2);

        // Reconciliation runs against the full source snapshot
        let recon = leasing.reconciliation.as_ref().unwrap();
        assert_eq!(recon.missing_in_target.len(), 1);
        assert!(recon.missing_in_target.contains("L1"));

        assert_eq!(fs::read_dir(ws.reports_dir()).unwrap().count(), 2);
        assert_eq!(fs::read_dir(ws.reconciliation_dir()).unwrap().count(), 2);

        let ledger = RunLedger::open(&ws.ledger_path()).unwrap();
        let events = ledger.events_for_run(&outcome.run_id).unwrap();
        assert_eq!(events.first().unwrap().event_type, "phase_started");
        assert_eq!(events.last().unwrap().event_type, "phase_completed");
        assert_eq!(ledger.synthesized_ids("dm2_uat", "leasing").unwrap().len(), 1);
    }

    #[test]
    fn test_validation_failure_skips_only_that_module() {
        let (_tmp, ws) = create_test_workspace();
        write_source(
            &ws,
            "dm2_uat",
            "leasing",
            &format!("{}L1,T1,2024-01-01,2025-01-01,W,1200\n", LEASING_HEADER),
        );
        write_source(&ws, "dm2_uat", "ar", "invoice_number,amount\nINV-1,10\n");

        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), create_test_config())
            .unwrap()
            .with_run_date(run_date());
        let outcome = orchestrator.run().unwrap();

        assert_eq!(outcome.modules[0].status, ModuleStatus::ValidationFailed);
        assert_eq!(
            outcome.modules[0].validation.as_ref().unwrap().errors,
            vec!["Invalid RentFrequency values: [W]"]
        );
        assert!(outcome.modules[0].validation_report.as_ref().unwrap().is_file());
        assert_eq!(outcome.modules[1].status, ModuleStatus::Written);

        let out_dir = ws.output_dir(Phase::Staging, "dm2_uat");
        assert!(!out_dir.join("leasing_20240601.csv").exists());
        assert!(out_dir.join("ar_20240601.csv").exists());
    }

    #[test]
    fn test_module_error_is_logged_and_phase_continues() {
        let (_tmp, ws) = create_test_workspace();
        // Reference exists, current snapshot lacks the key column
        write_source(&ws, "dm1_crp", "leasing", &format!("{}L1,T1,,,M,1\n", LEASING_HEADER));
        write_source(&ws, "dm2_uat", "leasing", "tenant_id,base_rent\nT1,1\n");
        write_source(&ws, "dm2_uat", "ar", "invoice_number,amount\nINV-1,10\n");

        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), create_test_config()).unwrap();
        let outcome = orchestrator.run().unwrap();

        assert!(matches!(outcome.modules[0].status, ModuleStatus::Failed(ref m) if m.contains("lease_ref")));
        assert_eq!(outcome.modules[1].status, ModuleStatus::Written);
        assert_eq!(orchestrator.state(), PhaseState::Done);

        let log = fs::read_to_string(ws.module_error_log()).unwrap();
        assert!(log.contains("module leasing error: missing column 'lease_ref'"));
    }

    #[test]
    fn test_initial_phase_full_extraction_without_rollback_point() {
        let (_tmp, ws) = create_test_workspace();
        fs::write(ws.module_error_log(), "stale entry\n").unwrap();

        let mut config = create_test_config();
        config.phase = "dm1_crp".to_string();
        config.modules = vec!["ar".to_string()];
        write_source(&ws, "dm1_crp", "ar", "invoice_number,amount\nINV-1,10\nINV-1,11\n");

        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), config)
            .unwrap()
            .with_run_date(run_date());
        let outcome = orchestrator.run().unwrap();

        assert!(outcome.rollback_point.is_none());
        assert_eq!(fs::read_dir(ws.backups_dir()).unwrap().count(), 0);
        // No delta: duplicates are not collapsed
        assert_eq!(outcome.modules[0].records, 2);
        assert!(ws.target_phase_dir("dm1_crp").join("ar_20240601.csv").is_file());
        assert_eq!(fs::read_to_string(ws.module_error_log()).unwrap(), "");
    }

    #[test]
    fn test_missing_source_is_no_changes() {
        let (_tmp, ws) = create_test_workspace();
        let mut orchestrator = PhaseOrchestrator::new(ws, create_test_config()).unwrap();
        let outcome = orchestrator.run().unwrap();

        assert!(outcome
            .modules
            .iter()
            .all(|m| m.status == ModuleStatus::NoChanges));
    }

    #[test]
    fn test_production_preflight_failure_rolls_back() {
        let (_tmp, ws) = create_test_workspace();
        let existing = ws.output_dir(Phase::Production, "dm3_prod").join("ar_20240101.csv");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"previous go-live output").unwrap();

        // Only one of the two source files exists
        write_source(&ws, "dm3_prod", "ar", "invoice_number,amount\nINV-1,10\n");

        let notifier = Arc::new(RecordingNotifier::default());
        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), create_production_config())
            .unwrap()
            .with_notifier(notifier.clone());

        let err = orchestrator.run().unwrap_err();

        match &err {
            MigrationError::CriticalPhase { source, .. } => {
                assert!(matches!(**source, MigrationError::Preflight(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.state(), PhaseState::RolledBack);
        assert_eq!(fs::read(&existing).unwrap(), b"previous go-live output");
        assert_eq!(notifier.sent().len(), 1);
        assert!(fs::read_to_string(ws.critical_error_log())
            .unwrap()
            .contains("pre-flight checks failed"));
    }

    #[test]
    fn test_production_success_archives_and_records() {
        let (_tmp, ws) = create_test_workspace();
        let mut config = create_production_config();
        config.modules = vec!["ar".to_string()];
        write_source(&ws, "dm2_uat", "ar", "invoice_number,amount\nINV-1,10\n");
        write_source(&ws, "dm3_prod", "ar", "invoice_number,amount\nINV-1,10\nINV-2,20\n");

        let notifier = Arc::new(RecordingNotifier::default());
        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), config)
            .unwrap()
            .with_notifier(notifier.clone())
            .with_run_date(run_date());
        let outcome = orchestrator.run().unwrap();

        let ar = &outcome.modules[0];
        assert_eq!(ar.records, 1);
        assert!(ar
            .output_file
            .as_ref()
            .unwrap()
            .ends_with("target/dm3_prod/final/ar_20240601.csv"));
        assert!(ar.archive_dir.as_ref().unwrap().join("ar_20240601.csv").is_file());
        assert!(outcome.preflight.as_ref().unwrap().passed());

        let success = fs::read_to_string(ws.reports_dir().join("production_success.log")).unwrap();
        assert!(success.contains("dm3_prod completed successfully; modules: ar"));
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn test_long_numeric_keys_survive_delta_and_write() {
        let (_tmp, ws) = create_test_workspace();
        let mut config = create_test_config();
        config.modules = vec!["ar".to_string()];
        write_source(&ws, "dm1_crp", "ar", "invoice_number,amount
1000000000000000000,5
");
        write_source(
            &ws,
            "dm2_uat",
            "ar",
            "invoice_number,amount
9007199254740993,10
9007199254740992,20
1000000000000000000,5
",
        );

        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), config)
            .unwrap()
            .with_run_date(run_date());
        let outcome = orchestrator.run().unwrap();

        let ar = &outcome.modules[0];
        assert_eq!(ar.status, ModuleStatus::Written);
        assert_eq!(ar.records, 2);

        let table = TabularLoader::target()
            .load(ar.output_file.as_ref().unwrap())
            .unwrap()
            .into_table();
        assert_eq!(table.keys(0), vec!["9007199254740993", "9007199254740992"]);

        let recon = ar.reconciliation.as_ref().unwrap();
        assert_eq!(recon.missing_in_target.len(), 1);
        assert!(recon.missing_in_target.contains("1000000000000000000"));
    }

    #[test]
    fn test_phase_alias_uses_canonical_directories() {
        let (_tmp, ws) = create_test_workspace();
        let mut config = create_test_config();
        config.phase = "staging".to_string();
        config.modules = vec!["ar".to_string()];

        let previous = ws.output_dir(Phase::Staging, "dm2_uat").join("ar_20240101.csv");
        fs::create_dir_all(previous.parent().unwrap()).unwrap();
        fs::write(&previous, b"previous staging output").unwrap();
        write_source(&ws, "dm2_uat", "ar", "invoice_number,amount
INV-1,10
");

        let mut orchestrator = PhaseOrchestrator::new(ws.clone(), config)
            .unwrap()
            .with_run_date(run_date());
        assert_eq!(orchestrator.config().phase, "dm2_uat");
        let outcome = orchestrator.run().unwrap();

        let point = RollbackPoint::open(outcome.rollback_point.as_ref().unwrap()).unwrap();
        assert_eq!(point.phase(), "dm2_uat");
        assert_eq!(point.manifest.archived_files, 1);

        assert!(outcome.modules[0]
            .output_file
            .as_ref()
            .unwrap()
            .ends_with("target/dm2_uat/incremental/ar_20240601.csv"));
        assert!(!ws.target_phase_dir("staging").exists());
    }

    #[test]
    fn test_config_for_other_phase_is_rejected() {
        let (_tmp, ws) = create_test_workspace();
        fs::write(ws.config_file("dm3_prod"), SAMPLE_CONFIG).unwrap();

        let err = PhaseOrchestrator::from_workspace(ws, Phase::Production, None)
            .err()
            .unwrap();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = MigrationError::schema("lease_ref", "delta key").into_critical("dm2_uat");
        let chain = error_chain(&err);

        assert!(chain.starts_with("critical failure in phase dm2_uat"));
        assert!(chain.contains("caused by: missing column 'lease_ref' (delta key)"));
    }
}
