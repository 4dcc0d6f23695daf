// ⏪ Rollback Manager - restorable snapshots of a phase's on-disk state
//
// Snapshot layout (backups/{phase}_{YYYYmmdd_HHMMSS}/):
//   config.yaml     copy of config/{phase}.yaml
//   target.zip      deflated archive of target/{phase}/
//   reports/        copy of reports/
//   manifest.json   what was captured, and when
//
// A snapshot directory is never reused. Restoring is destructive: current
// target output and reports are wiped before the snapshot is put back.

use crate::error::{MigrationError, Result};
use crate::workspace::Workspace;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CONFIG_FILE: &str = "config.yaml";
const TARGET_ARCHIVE: &str = "target.zip";
const REPORTS_DIR: &str = "reports";
const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// ROLLBACK POINT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackManifest {
    pub phase: String,
    pub created_at: DateTime<Utc>,
    pub config_captured: bool,
    pub target_archived: bool,
    pub archived_files: usize,
    pub reports_captured: bool,
}

/// Handle to a snapshot on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackPoint {
    pub path: PathBuf,
    pub manifest: RollbackManifest,
}

impl RollbackPoint {
    /// Re-open an existing snapshot from its manifest
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let manifest_path = path.join(MANIFEST_FILE);
        let content =
            fs::read_to_string(&manifest_path).map_err(|e| MigrationError::io(&manifest_path, e))?;
        let manifest: RollbackManifest = serde_json::from_str(&content)?;
        Ok(RollbackPoint { path, manifest })
    }

    pub fn phase(&self) -> &str {
        &self.manifest.phase
    }
}

// ============================================================================
// ROLLBACK MANAGER
// ============================================================================

pub struct RollbackManager {
    workspace: Workspace,
}

impl RollbackManager {
    pub fn new(workspace: Workspace) -> Self {
        RollbackManager { workspace }
    }

    /// Capture config, target output and reports for `phase_name`.
    /// Inputs that do not exist yet are skipped, not errors.
    pub fn create_rollback_point(&self, phase_name: &str) -> Result<RollbackPoint> {
        let dir = self.fresh_snapshot_dir(phase_name)?;
        tracing::info!(phase = phase_name, path = %dir.display(), "creating rollback point");

        // 1. Configuration
        let config_src = self.workspace.config_file(phase_name);
        let config_captured = copy_if_exists(&config_src, &dir.join(CONFIG_FILE))?;

        // 2. Target output, compressed
        let target_dir = self.workspace.target_phase_dir(phase_name);
        let archived_files = if target_dir.is_dir() {
            Some(zip_directory(&target_dir, &dir.join(TARGET_ARCHIVE))?)
        } else {
            None
        };

        // 3. Reports
        let reports_dir = self.workspace.reports_dir();
        let reports_captured = if reports_dir.is_dir() {
            copy_dir_recursive(&reports_dir, &dir.join(REPORTS_DIR))?;
            true
        } else {
            false
        };

        let manifest = RollbackManifest {
            phase: phase_name.to_string(),
            created_at: Utc::now(),
            config_captured,
            target_archived: archived_files.is_some(),
            archived_files: archived_files.unwrap_or(0),
            reports_captured,
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
            .map_err(|e| MigrationError::io(&manifest_path, e))?;

        tracing::info!(
            config = config_captured,
            archived_files = manifest.archived_files,
            reports = reports_captured,
            "rollback point created"
        );
        Ok(RollbackPoint {
            path: dir,
            manifest,
        })
    }

    /// Restore the workspace to the state captured in `point`
    pub fn execute_rollback(&self, point: &RollbackPoint) -> Result<()> {
        let phase = point.phase();
        tracing::warn!(phase, path = %point.path.display(), "executing rollback");

        // 1. Configuration
        if point.manifest.config_captured {
            let dest = self.workspace.config_file(phase);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
            }
            let src = point.path.join(CONFIG_FILE);
            fs::copy(&src, &dest).map_err(|e| MigrationError::io(&src, e))?;
        }

        // 2. Target output: wipe, then unpack
        let target_dir = self.workspace.target_phase_dir(phase);
        remove_dir_if_exists(&target_dir)?;
        if point.manifest.target_archived {
            let archive_path = point.path.join(TARGET_ARCHIVE);
            fs::create_dir_all(&target_dir).map_err(|e| MigrationError::io(&target_dir, e))?;
            let file = File::open(&archive_path).map_err(|e| MigrationError::io(&archive_path, e))?;
            let mut archive =
                ZipArchive::new(file).map_err(|e| MigrationError::archive(&archive_path, e))?;
            archive
                .extract(&target_dir)
                .map_err(|e| MigrationError::archive(&archive_path, e))?;
        }

        // 3. Reports: wipe, then copy back
        let reports_dir = self.workspace.reports_dir();
        remove_dir_if_exists(&reports_dir)?;
        if point.manifest.reports_captured {
            copy_dir_recursive(&point.path.join(REPORTS_DIR), &reports_dir)?;
        } else {
            fs::create_dir_all(&reports_dir).map_err(|e| MigrationError::io(&reports_dir, e))?;
        }

        tracing::warn!(phase, "rollback complete");
        Ok(())
    }

    /// backups/{phase}_{timestamp}, suffixed when two points land in the same second
    fn fresh_snapshot_dir(&self, phase_name: &str) -> Result<PathBuf> {
        let backups = self.workspace.backups_dir();
        fs::create_dir_all(&backups).map_err(|e| MigrationError::io(&backups, e))?;

        let stem = format!("{}_{}", phase_name, Local::now().format("%Y%m%d_%H%M%S"));
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                stem.clone()
            } else {
                format!("{}_{}", stem, attempt)
            };
            let dir = backups.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(MigrationError::io(&dir, e)),
            }
        }
    }
}

// ============================================================================
// FILESYSTEM HELPERS
// ============================================================================

fn copy_if_exists(src: &Path, dest: &Path) -> Result<bool> {
    match fs::copy(src, dest) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(MigrationError::io(src, e)),
    }
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MigrationError::io(dir, e)),
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| MigrationError::io(dest, e))?;
    for entry in fs::read_dir(src).map_err(|e| MigrationError::io(src, e))? {
        let entry = entry.map_err(|e| MigrationError::io(src, e))?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).map_err(|e| MigrationError::io(&path, e))?;
        }
    }
    Ok(())
}

/// Deflate every file under `root` into `archive_path`; returns the file count
fn zip_directory(root: &Path, archive_path: &Path) -> Result<usize> {
    let file = File::create(archive_path).map_err(|e| MigrationError::io(archive_path, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
            .map_err(|e| MigrationError::io(&dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in entries {
            let name = archive_name(root, &path);
            if path.is_dir() {
                zip.add_directory(name, options)
                    .map_err(|e| MigrationError::archive(archive_path, e))?;
                pending.push(path);
            } else {
                zip.start_file(name, options)
                    .map_err(|e| MigrationError::archive(archive_path, e))?;
                let mut src = File::open(&path).map_err(|e| MigrationError::io(&path, e))?;
                io::copy(&mut src, &mut zip).map_err(|e| MigrationError::io(&path, e))?;
                count += 1;
            }
        }
    }

    zip.finish()
        .map_err(|e| MigrationError::archive(archive_path, e))?;
    Ok(count)
}

/// Archive entry name: path relative to `root`, `/`-separated
fn archive_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// TESTS
// ============================================================================
