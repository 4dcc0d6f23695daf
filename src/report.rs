// 📝 Reports - Markdown renderings of validation and reconciliation results
//
// Rendering is pure (report + timestamp → String); ReportWriter decides
// where the files go.

use crate::error::{MigrationError, Result};
use crate::reconciliation::ReconciliationReport;
use crate::validation::ValidationReport;
use crate::workspace::Workspace;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Keys listed per section before collapsing into "... (n more)"
const MAX_LISTED_KEYS: usize = 10;

// ============================================================================
// RENDERING
// ============================================================================

pub fn render_validation_report(report: &ValidationReport, generated_at: DateTime<Local>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Validation Report: {} Module\n", report.module.to_uppercase());
    let _ = writeln!(out, "**Phase**: {}", report.phase.to_uppercase());
    let _ = writeln!(out, "**Date**: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "**Total Records**: {}", report.total_records);
    let _ = writeln!(out, "**Status**: {}\n", report.status);

    if !report.errors.is_empty() {
        out.push_str("## Critical Errors\n");
        for error in &report.errors {
            let _ = writeln!(out, "- {}", error);
        }
        out.push('\n');
    }

    if !report.warnings.is_empty() {
        out.push_str("## Warnings\n");
        for warning in &report.warnings {
            let _ = writeln!(out, "- {}", warning);
        }
        out.push('\n');
    }

    if report.errors.is_empty() && report.warnings.is_empty() {
        out.push_str("## All validation checks passed!\n");
    }

    // Samples accompany errors
    if !report.errors.is_empty() {
        out.push_str("## Sample Invalid Rows\n");
        out.push_str("| Row | Field | Value | Issue |\n");
        out.push_str("|-----|-------|-------|-------|\n");
        if report.samples.is_empty() {
            out.push_str("| - | - | - | No specific records identified |\n");
        }
        for sample in &report.samples {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                sample.row + 1,
                sample.field,
                escape_cell(&sample.value),
                sample.issue
            );
        }
    }

    out
}

pub fn render_reconciliation_report(report: &ReconciliationReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Reconciliation Report: {} Module\n", report.module.to_uppercase());
    let _ = writeln!(out, "**Migration Phase**: {}", report.phase.to_uppercase());
    let _ = writeln!(
        out,
        "**Generated**: {}",
        report.reconciled_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(reference) = &report.reference_phase {
        let _ = writeln!(out, "**Reference Phase**: {}", reference);
    }
    out.push('\n');

    out.push_str("## Record Count Summary\n");
    out.push_str("| System | Record Count |\n");
    out.push_str("|--------|--------------|\n");
    let _ = writeln!(out, "| Source | {} |", report.total_source);
    let _ = writeln!(out, "| Target | {} |", report.total_target);
    let _ = writeln!(out, "| **Discrepancy** | **{}** |\n", report.record_discrepancy());

    render_key_section(&mut out, "Missing in Target", report.missing_in_target.iter());
    render_key_section(&mut out, "Extra in Target", report.extra_in_target.iter());

    if report.field_discrepancies.is_empty() {
        out.push_str("## Field Discrepancies: None\n\n");
    } else {
        out.push_str("## Field Discrepancies\n");
        for item in &report.field_discrepancies {
            let _ = writeln!(out, "### {}", item.field);
            let _ = writeln!(out, "- Mismatch Count: {}", item.mismatch_count);
            out.push_str("#### Sample Differences\n");
            out.push_str("| Key | Source Value | Target Value |\n");
            out.push_str("|-----|--------------|--------------|\n");
            for sample in &item.samples {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} |",
                    escape_cell(&sample.key),
                    escape_cell(&sample.source_value),
                    escape_cell(&sample.target_value)
                );
            }
        }
        out.push('\n');
    }

    out.push_str("## Action Items\n");
    if !report.missing_in_target.is_empty() {
        out.push_str("- [ ] Investigate missing records\n");
    }
    if !report.extra_in_target.is_empty() {
        out.push_str("- [ ] Review extra records\n");
    }
    if !report.field_discrepancies.is_empty() {
        out.push_str("- [ ] Validate field mappings for discrepant fields\n");
    }
    out.push_str("- [ ] Obtain business sign-off\n");

    out
}

fn render_key_section<'a>(out: &mut String, title: &str, keys: impl ExactSizeIterator<Item = &'a String>) {
    let total = keys.len();
    if total == 0 {
        let _ = writeln!(out, "## {}: None\n", title);
        return;
    }

    let _ = writeln!(out, "## {}", title);
    out.push_str("| Key |\n");
    out.push_str("|-----|\n");
    for key in keys.take(MAX_LISTED_KEYS) {
        let _ = writeln!(out, "| {} |", escape_cell(key));
    }
    if total > MAX_LISTED_KEYS {
        let _ = writeln!(out, "| ... ({} more) |", total - MAX_LISTED_KEYS);
    }
    out.push('\n');
}

/// Pipes inside a table cell would split the Markdown column
fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

// ============================================================================
// PERSISTENCE
// ============================================================================

pub struct ReportWriter {
    workspace: Workspace,
}

impl ReportWriter {
    pub fn new(workspace: Workspace) -> Self {
        ReportWriter { workspace }
    }

    /// reports/validation_{module}_{phase}_{timestamp}.md
    pub fn save_validation(&self, report: &ValidationReport) -> Result<PathBuf> {
        let now = Local::now();
        let path = self.workspace.reports_dir().join(format!(
            "validation_{}_{}_{}.md",
            report.module,
            report.phase,
            now.format("%Y%m%d_%H%M%S")
        ));
        write_file(&path, &render_validation_report(report, now))?;
        tracing::info!(module = %report.module, path = %path.display(), "saved validation report");
        Ok(path)
    }

    /// reconciliation/recon_{module}_{phase}_{timestamp}.md
    pub fn save_reconciliation(&self, report: &ReconciliationReport) -> Result<PathBuf> {
        let path = self.workspace.reconciliation_dir().join(format!(
            "recon_{}_{}_{}.md",
            report.module,
            report.phase,
            report.reconciled_at.with_timezone(&Local).format("%Y%m%d_%H%M%S")
        ));
        write_file(&path, &render_reconciliation_report(report))?;
        tracing::info!(module = %report.module, path = %path.display(), "saved reconciliation report");
        Ok(path)
    }

    /// Append a completion record to reports/production_success.log
    pub fn record_production_success(&self, phase: &str, modules: &[String]) -> Result<PathBuf> {
        let dir = self.workspace.reports_dir();
        fs::create_dir_all(&dir).map_err(|e| MigrationError::io(&dir, e))?;
        let path = dir.join("production_success.log");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| MigrationError::io(&path, e))?;
        writeln!(
            file,
            "{} phase {} completed successfully; modules: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            phase,
            modules.join(", ")
        )
        .map_err(|e| MigrationError::io(&path, e))?;
        Ok(path)
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| MigrationError::io(path, e))
}

// ============================================================================
// TESTS
// ============================================================================
