// 🗂️ Workspace - every on-disk location a migration run touches
//
// Built from a single root directory and passed to every component,
// so nothing below this module hardcodes a path.

use crate::config::Phase;
use crate::error::{MigrationError, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // INPUTS
    // ========================================================================

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// `config/{phase}.yaml`
    pub fn config_file(&self, phase_name: &str) -> PathBuf {
        self.config_dir().join(format!("{}.yaml", phase_name))
    }

    pub fn sources_dir(&self, phase_name: &str) -> PathBuf {
        self.root.join("sources").join(phase_name)
    }

    /// `sources/{phase}/{module}.csv`
    pub fn source_file(&self, phase_name: &str, module: &str) -> PathBuf {
        self.sources_dir(phase_name).join(format!("{}.csv", module))
    }

    // ========================================================================
    // OUTPUTS
    // ========================================================================

    /// Root of everything a phase writes for the target system: `target/{phase}`
    pub fn target_phase_dir(&self, phase_name: &str) -> PathBuf {
        self.root.join("target").join(phase_name)
    }

    /// Where a phase's module files land (`incremental/` or `final/` for later phases)
    pub fn output_dir(&self, phase: Phase, phase_name: &str) -> PathBuf {
        let base = self.target_phase_dir(phase_name);
        match phase.policy().output_subdir {
            Some(sub) => base.join(sub),
            None => base,
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn reconciliation_dir(&self) -> PathBuf {
        self.root.join("reconciliation")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Archived copies of production output files
    pub fn production_archive_dir(&self) -> PathBuf {
        self.backups_dir().join("production")
    }

    /// Error logs live outside reports/ so a rollback never erases them
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn module_error_log(&self) -> PathBuf {
        self.logs_dir().join("module_errors.log")
    }

    pub fn critical_error_log(&self) -> PathBuf {
        self.logs_dir().join("critical_errors.log")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("audit").join("ledger.db")
    }

    /// Create every directory the orchestrator writes into
    pub fn ensure_layout(&self) -> Result<()> {
        let dirs = [
            self.config_dir(),
            self.reports_dir(),
            self.reconciliation_dir(),
            self.backups_dir(),
            self.logs_dir(),
            self.root.join("audit"),
        ];
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|e| MigrationError::io(&dir, e))?;
        }
        Ok(())
    }
}
