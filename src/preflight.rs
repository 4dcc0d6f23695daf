// 🛫 Production pre-flight - every check must pass before any module runs

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect()
    }

    /// Err(Preflight) listing every failed check
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(MigrationError::Preflight(self.failures()))
        }
    }

    fn push(&mut self, name: &str, passed: bool, detail: String) {
        if passed {
            tracing::info!(check = name, "{}", detail);
        } else {
            tracing::error!(check = name, "{}", detail);
        }
        self.checks.push(PreflightCheck {
            name: name.to_string(),
            passed,
            detail,
        });
    }
}

/// Source files present, enough free disk, target environment configured
pub fn run_preflight(workspace: &Workspace, config: &MigrationConfig) -> PreflightReport {
    let mut report = PreflightReport::default();

    // 1. Source files
    let missing: Vec<String> = config
        .modules
        .iter()
        .map(|m| workspace.source_file(&config.phase, m))
        .filter(|p| !p.is_file())
        .map(|p| p.display().to_string())
        .collect();
    if missing.is_empty() {
        report.push(
            "source_files",
            true,
            format!("{} source files present", config.modules.len()),
        );
    } else {
        report.push(
            "source_files",
            false,
            format!("missing source files: {}", missing.join(", ")),
        );
    }

    // 2. Disk space
    let required = config.production.min_free_disk_bytes;
    match fs2::available_space(workspace.root()) {
        Ok(available) if available >= required => report.push(
            "disk_space",
            true,
            format!("{} bytes free (need {})", available, required),
        ),
        Ok(available) => report.push(
            "disk_space",
            false,
            format!("only {} bytes free, need {}", available, required),
        ),
        Err(e) => report.push(
            "disk_space",
            false,
            format!("cannot read free space at {}: {}", workspace.root().display(), e),
        ),
    }

    // 3. Target environment
    match config.target.environment.as_deref().map(str::trim) {
        Some(env) if !env.is_empty() => report.push(
            "target_environment",
            true,
            format!("target environment {}", env),
        ),
        _ => report.push(
            "target_environment",
            false,
            "target environment not configured".to_string(),
        ),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::create_test_config;
    use std::fs;

    fn create_test_setup() -> (tempfile::TempDir, Workspace, MigrationConfig) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        let mut config = create_test_config();
        config.phase = "dm3_prod".to_string();
        config.production.min_free_disk_bytes = 0;
        (tmp, ws, config)
    }

    fn write_sources(ws: &Workspace, config: &MigrationConfig) {
        for module in &config.modules {
            let path = ws.source_file(&config.phase, module);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "id\n1\n").unwrap();
        }
    }

    #[test]
    fn test_all_checks_pass() {
        let (_tmp, ws, config) = create_test_setup();
        write_sources(&ws, &config);

        let report = run_preflight(&ws, &config);
        assert!(report.passed(), "{:?}", report.failures());
        assert_eq!(report.checks.len(), 3);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_missing_source_and_environment_fail() {
        let (_tmp, ws, mut config) = create_test_setup();
        config.target.environment = None;

        let report = run_preflight(&ws, &config);
        let failures = report.failures();

        assert_eq!(failures.len(), 2);
        assert!(failures[0].contains("leasing.csv"));
        assert!(failures[0].contains("ar.csv"));
        assert_eq!(failures[1], "target_environment: target environment not configured");
        assert!(matches!(report.into_result(), Err(MigrationError::Preflight(f)) if f.len() == 2));
    }

    #[test]
    fn test_insufficient_disk_space_fails() {
        let (_tmp, ws, mut config) = create_test_setup();
        write_sources(&ws, &config);
        config.production.min_free_disk_bytes = u64::MAX;

        let report = run_preflight(&ws, &config);
        assert!(!report.passed());
        assert!(report.failures()[0].starts_with("disk_space"));
    }
}
