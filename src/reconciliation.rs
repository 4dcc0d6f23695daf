// ⚖️ Reconciliation Engine - source vs. written target output
//
// Matches rows by the module key (source column ↔ its mapped target name):
//   missing_in_target = source_keys − target_keys
//   extra_in_target   = target_keys − source_keys
//   common            = source_keys ∩ target_keys
// and samples per-field mismatches on common keys for every required field.
//
// Fails soft: absent source, absent target files, or missing key columns
// log a warning and yield no report instead of halting the phase.

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::loader::{filter_entities, LoadOutcome, TabularLoader};
use crate::table::Table;
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    pub key: String,
    pub source_value: String,
    pub target_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiscrepancy {
    /// Target field name
    pub field: String,
    pub mismatch_count: usize,
    /// First mismatches in key order, capped by the engine's sample limit
    pub samples: Vec<Mismatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub module: String,
    pub phase: String,
    pub reference_phase: Option<String>,
    pub total_source: usize,
    pub total_target: usize,
    pub missing_in_target: BTreeSet<String>,
    pub extra_in_target: BTreeSet<String>,
    pub common_keys: usize,
    pub field_discrepancies: Vec<FieldDiscrepancy>,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Source count minus target count
    pub fn record_discrepancy(&self) -> i64 {
        self.total_source as i64 - self.total_target as i64
    }

    pub fn is_clean(&self) -> bool {
        self.missing_in_target.is_empty()
            && self.extra_in_target.is_empty()
            && self.field_discrepancies.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Reconciliation for {} ({}): source {}, target {}, missing {}, extra {}, {} discrepant fields",
            self.module,
            self.phase,
            self.total_source,
            self.total_target,
            self.missing_in_target.len(),
            self.extra_in_target.len(),
            self.field_discrepancies.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Mismatch samples kept per field (default: 3)
    pub sample_limit: usize,
}

/// Which columns to match and compare
#[derive(Debug, Clone)]
pub struct KeyPair<'a> {
    pub source_key: &'a str,
    pub target_key: &'a str,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine { sample_limit: 3 }
    }

    pub fn with_sample_limit(sample_limit: usize) -> Self {
        ReconciliationEngine { sample_limit }
    }

    /// Reconcile two in-memory tables.
    ///
    /// `fields` lists (target field, source field) pairs to compare; fields
    /// missing from either table are skipped. Missing key columns are a
    /// SchemaError.
    ///
    /// Example:
    /// ```
    /// use property_migration::{KeyPair, ReconciliationEngine, Table};
    ///
    /// let source = Table::from_rows(&["id"], vec![vec!["1"], vec!["2"], vec!["3"]]);
    /// let target = Table::from_rows(&["ID"], vec![vec!["2"], vec!["3"], vec!["4"]]);
    /// let keys = KeyPair { source_key: "id", target_key: "ID" };
    ///
    /// let report = ReconciliationEngine::new()
    ///     .reconcile("ar", "dm2_uat", &source, &target, &keys, &[])
    ///     .unwrap();
    /// assert_eq!(report.missing_in_target.len(), 1);
    /// ```
    pub fn reconcile(
        &self,
        module: &str,
        phase: &str,
        source: &Table,
        target: &Table,
        keys: &KeyPair<'_>,
        fields: &[(String, String)],
    ) -> Result<ReconciliationReport> {
        let source_key_idx = source.require_column(keys.source_key, "reconciliation source key")?;
        let target_key_idx = target.require_column(keys.target_key, "reconciliation target key")?;

        let source_rows = first_row_per_key(source, source_key_idx);
        let target_rows = first_row_per_key(target, target_key_idx);

        let source_keys: BTreeSet<String> = source_rows.keys().cloned().collect();
        let target_keys: BTreeSet<String> = target_rows.keys().cloned().collect();

        let missing_in_target: BTreeSet<String> =
            source_keys.difference(&target_keys).cloned().collect();
        let extra_in_target: BTreeSet<String> =
            target_keys.difference(&source_keys).cloned().collect();
        let common: BTreeSet<&String> = source_keys.intersection(&target_keys).collect();

        let mut field_discrepancies = Vec::new();
        for (target_field, source_field) in fields {
            let (Some(s_idx), Some(t_idx)) = (
                source.column_index(source_field),
                target.column_index(target_field),
            ) else {
                continue;
            };

            let mut mismatch_count = 0;
            let mut samples = Vec::new();
            for key in &common {
                let source_value = source.value(source_rows[*key], s_idx).as_key();
                let target_value = target.value(target_rows[*key], t_idx).as_key();
                if source_value != target_value {
                    mismatch_count += 1;
                    if samples.len() < self.sample_limit {
                        samples.push(Mismatch {
                            key: (*key).clone(),
                            source_value,
                            target_value,
                        });
                    }
                }
            }

            if mismatch_count > 0 {
                field_discrepancies.push(FieldDiscrepancy {
                    field: target_field.clone(),
                    mismatch_count,
                    samples,
                });
            }
        }

        let report = ReconciliationReport {
            module: module.to_string(),
            phase: phase.to_string(),
            reference_phase: None,
            total_source: source.len(),
            total_target: target.len(),
            missing_in_target,
            extra_in_target,
            common_keys: common.len(),
            field_discrepancies,
            reconciled_at: Utc::now(),
        };

        tracing::info!(
            module,
            missing = report.missing_in_target.len(),
            extra = report.extra_in_target.len(),
            discrepant_fields = report.field_discrepancies.len(),
            "reconciled module"
        );
        Ok(report)
    }

    /// Load the module's source snapshot and every target file it produced
    /// in this phase, then reconcile. Returns None (logged) on any problem.
    pub fn reconcile_module(
        &self,
        workspace: &Workspace,
        config: &MigrationConfig,
        module: &str,
    ) -> Option<ReconciliationReport> {
        match self.try_reconcile_module(workspace, config, module) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(module, error = %e, "reconciliation aborted");
                None
            }
        }
    }

    fn try_reconcile_module(
        &self,
        workspace: &Workspace,
        config: &MigrationConfig,
        module: &str,
    ) -> Result<Option<ReconciliationReport>> {
        let phase = config.phase_kind()?;
        let source_path = workspace.source_file(&config.phase, module);

        let mut source = match TabularLoader::source().load(&source_path)? {
            LoadOutcome::Found(table) => table,
            LoadOutcome::NotFound => {
                tracing::warn!(module, path = %source_path.display(), "source file not found, no reconciliation");
                return Ok(None);
            }
        };
        filter_entities(&mut source, config.properties.as_deref());

        let output_dir = workspace.output_dir(phase, &config.phase);
        let target_files = find_target_files(&output_dir, module)?;
        if target_files.is_empty() {
            tracing::warn!(module, dir = %output_dir.display(), "no target files found, no reconciliation");
            return Ok(None);
        }

        let loader = TabularLoader::target();
        let mut target = Table::default();
        for file in &target_files {
            match loader.load(file) {
                Ok(outcome) => target.append(&outcome.into_table()),
                Err(e) => tracing::warn!(path = %file.display(), error = %e, "skipping unreadable target file"),
            }
        }

        let source_key = config.key_column(module)?;
        let target_key = config.target_key_column(module)?;
        let keys = KeyPair {
            source_key,
            target_key: &target_key,
        };

        let fields: Vec<(String, String)> = config
            .rules(module)?
            .required
            .iter()
            .map(|f| (f.clone(), config.source_field(module, f)))
            .collect();

        let mut report = self.reconcile(module, &config.phase, &source, &target, &keys, &fields)?;
        report.reference_phase = Some(config.delta_settings.reference_phase.clone());
        Ok(Some(report))
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn first_row_per_key(table: &Table, key_column: usize) -> HashMap<String, usize> {
    let mut rows = HashMap::new();
    for (idx, key) in table.keys(key_column).into_iter().enumerate() {
        rows.entry(key).or_insert(idx);
    }
    rows
}

/// `{module}_{date}.csv` files in a phase output directory, sorted by name
pub fn find_target_files(dir: &Path, module: &str) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MigrationError::io(dir, e)),
    };

    let prefix = format!("{}_", module);
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            name.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".csv"))
                .map(|date| !date.is_empty() && date.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::create_test_config;
    use crate::writer::TargetWriter;
    use proptest::prelude::*;

    fn create_test_keys() -> KeyPair<'static> {
        KeyPair {
            source_key: "id",
            target_key: "ID",
        }
    }

    fn table_with_keys(column: &str, keys: &[&str]) -> Table {
        Table::from_rows(&[column], keys.iter().map(|k| vec![*k]).collect())
    }

    #[test]
    fn test_scenario_d_key_sets() {
        let source = table_with_keys("id", &["1", "2", "3"]);
        let target = table_with_keys("ID", &["2", "3", "4"]);

        let report = ReconciliationEngine::new()
            .reconcile("ar", "dm2_uat", &source, &target, &create_test_keys(), &[])
            .unwrap();

        assert_eq!(report.missing_in_target, BTreeSet::from(["1".to_string()]));
        assert_eq!(report.extra_in_target, BTreeSet::from(["4".to_string()]));
        assert_eq!(report.common_keys, 2);
        assert_eq!(report.record_discrepancy(), 0);
    }

    #[test]
    fn test_field_mismatches_are_sampled() {
        let source = Table::from_rows(
            &["id", "rent"],
            vec![
                vec!["1", "100"],
                vec!["2", "200"],
                vec!["3", "300"],
                vec!["4", "400"],
                vec!["5", "500"],
            ],
        );
        let target = Table::from_rows(
            &["ID", "Rent"],
            vec![
                vec!["1", "101"],
                vec!["2", "200"],
                vec!["3", "301"],
                vec!["4", "401"],
                vec!["5", "501"],
            ],
        );
        let fields = vec![
            ("Rent".to_string(), "rent".to_string()),
            ("Absent".to_string(), "absent".to_string()),
        ];

        let report = ReconciliationEngine::new()
            .reconcile("leasing", "dm2_uat", &source, &target, &create_test_keys(), &fields)
            .unwrap();

        assert_eq!(report.field_discrepancies.len(), 1);
        let rent = &report.field_discrepancies[0];
        assert_eq!(rent.field, "Rent");
        assert_eq!(rent.mismatch_count, 4);
        assert_eq!(rent.samples.len(), 3);
        assert_eq!(
            rent.samples[0],
            Mismatch {
                key: "1".to_string(),
                source_value: "100".to_string(),
                target_value: "101".to_string(),
            }
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_missing_key_column_is_schema_error() {
        let source = table_with_keys("other", &["1"]);
        let target = table_with_keys("ID", &["1"]);

        let err = ReconciliationEngine::new()
            .reconcile("ar", "dm2_uat", &source, &target, &create_test_keys(), &[])
            .unwrap_err();
        assert!(matches!(err, MigrationError::Schema { .. }));
    }

    #[test]
    fn test_reconcile_module_fails_soft() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        let config = create_test_config();
        let engine = ReconciliationEngine::new();

        // No source file
        assert!(engine.reconcile_module(&ws, &config, "ar").is_none());

        // Source but no target files
        let source_path = ws.source_file("dm2_uat", "ar");
        fs::create_dir_all(source_path.parent().unwrap()).unwrap();
        fs::write(&source_path, "invoice_number,amount\nINV-1,10\nINV-2,20\n").unwrap();
        assert!(engine.reconcile_module(&ws, &config, "ar").is_none());

        // Target file without the mapped key column
        let writer = TargetWriter::new(ws.output_dir(crate::config::Phase::Staging, "dm2_uat"));
        writer
            .write("ar", &Table::from_rows(&["Amount"], vec![vec!["10"]]))
            .unwrap();
        assert!(engine.reconcile_module(&ws, &config, "ar").is_none());
    }

    #[test]
    fn test_reconcile_module_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        let config = create_test_config();

        let source_path = ws.source_file("dm2_uat", "ar");
        fs::create_dir_all(source_path.parent().unwrap()).unwrap();
        fs::write(&source_path, "invoice_number,amount\nINV-1,10\nINV-2,20\nINV-3,30\n").unwrap();

        let writer = TargetWriter::new(ws.output_dir(crate::config::Phase::Staging, "dm2_uat"));
        writer
            .write(
                "ar",
                &Table::from_rows(
                    &["InvoiceNumber", "Amount"],
                    vec![vec!["INV-2", "20"], vec!["INV-3", "30"], vec!["INV-9", "90"]],
                ),
            )
            .unwrap();

        let report = ReconciliationEngine::new()
            .reconcile_module(&ws, &config, "ar")
            .unwrap();

        assert_eq!(report.total_source, 3);
        assert_eq!(report.total_target, 3);
        assert_eq!(report.missing_in_target, BTreeSet::from(["INV-1".to_string()]));
        assert_eq!(report.extra_in_target, BTreeSet::from(["INV-9".to_string()]));
        assert!(report.field_discrepancies.is_empty());
        assert_eq!(report.reference_phase.as_deref(), Some("dm1_crp"));
    }

    #[test]
    fn test_find_target_files_matches_module_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        for name in [
            "fixed_assets_20240101.csv",
            "fixed_20240101.csv",
            "fixed_20240102.csv",
            "fixed_notes.csv",
        ] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }

        let files = find_target_files(tmp.path(), "fixed").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["fixed_20240101.csv", "fixed_20240102.csv"]);

        assert!(find_target_files(&tmp.path().join("absent"), "fixed")
            .unwrap()
            .is_empty());
    }

    proptest! {
        #[test]
        fn prop_key_set_algebra(
            source_keys in proptest::collection::btree_set(0u16..60, 0..30),
            target_keys in proptest::collection::btree_set(0u16..60, 0..30),
        ) {
            let source_strs: Vec<String> = source_keys.iter().map(|k| k.to_string()).collect();
            let target_strs: Vec<String> = target_keys.iter().map(|k| k.to_string()).collect();
            let source = Table::from_rows(&["id"], source_strs.iter().map(|k| vec![k.as_str()]).collect());
            let target = Table::from_rows(&["ID"], target_strs.iter().map(|k| vec![k.as_str()]).collect());

            let report = ReconciliationEngine::new()
                .reconcile("m", "dm2_uat", &source, &target, &create_test_keys(), &[])
                .unwrap();

            let all_source: BTreeSet<String> = source_strs.into_iter().collect();
            let all_target: BTreeSet<String> = target_strs.into_iter().collect();
            let common: BTreeSet<String> = all_source.intersection(&all_target).cloned().collect();

            let missing: BTreeSet<String> = all_source.difference(&all_target).cloned().collect();
            let extra: BTreeSet<String> = all_target.difference(&all_source).cloned().collect();

            prop_assert_eq!(&report.missing_in_target, &missing);
            prop_assert_eq!(&report.extra_in_target, &extra);
            prop_assert!(report.missing_in_target.is_disjoint(&common));
            prop_assert!(report.extra_in_target.is_disjoint(&common));
            prop_assert_eq!(all_source.len(), report.missing_in_target.len() + report.common_keys);
        }
    }
}
