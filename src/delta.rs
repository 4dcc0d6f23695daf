// 🔀 Delta Detector - new and changed rows between two snapshots
//
// Tie-break for duplicate keys: only the FIRST row per key in each
// snapshot takes part in the comparison, and only the first current row
// per key can appear in the delta. Later duplicates are dropped.

use crate::error::Result;
use crate::fingerprint::fingerprint_row;
use crate::loader::{filter_entities, LoadOutcome, TabularLoader};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

// ============================================================================
// DELTA SET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Key absent from the reference snapshot
    New,
    /// Key present in both snapshots, content differs
    Changed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeltaSet {
    /// New ∪ changed rows, in current-table order
    pub table: Table,

    /// Change kind per row of `table`
    pub kinds: Vec<ChangeKind>,

    /// No reference snapshot existed
    pub first_run: bool,

    /// Current rows skipped because their key was already seen
    pub duplicate_keys: usize,
}

impl DeltaSet {
    fn empty(first_run: bool) -> Self {
        DeltaSet {
            table: Table::default(),
            kinds: Vec::new(),
            first_run,
            duplicate_keys: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn new_count(&self) -> usize {
        self.kinds.iter().filter(|k| **k == ChangeKind::New).count()
    }

    pub fn changed_count(&self) -> usize {
        self.kinds.iter().filter(|k| **k == ChangeKind::Changed).count()
    }

    pub fn into_table(self) -> Table {
        self.table
    }
}

// ============================================================================
// DELTA DETECTOR
// ============================================================================

pub struct DeltaDetector {
    /// Source column whose string-cast value identifies a row
    pub key_column: String,
}

impl DeltaDetector {
    pub fn new(key_column: impl Into<String>) -> Self {
        DeltaDetector {
            key_column: key_column.into(),
        }
    }

    /// Compare `current` against `reference` (None = first run)
    ///
    /// Example:
    /// ```
    /// use property_migration::{DeltaDetector, Table};
    ///
    /// let current = Table::from_rows(&["id", "val"], vec![vec!["1", "a"], vec!["2", "b"]]);
    /// let reference = Table::from_rows(&["id", "val"], vec![vec!["1", "a"]]);
    ///
    /// let delta = DeltaDetector::new("id").detect(&current, Some(&reference)).unwrap();
    /// assert_eq!(delta.len(), 1);
    /// ```
    pub fn detect(&self, current: &Table, reference: Option<&Table>) -> Result<DeltaSet> {
        let Some(reference) = reference else {
            // First run: the whole current snapshot, untouched, but it still needs its key
            if !current.is_empty() {
                current.require_column(&self.key_column, "delta key in current snapshot")?;
            }
            return Ok(DeltaSet {
                kinds: vec![ChangeKind::New; current.len()],
                table: current.clone(),
                first_run: true,
                duplicate_keys: 0,
            });
        };

        if current.is_empty() {
            return Ok(DeltaSet::empty(false));
        }

        let current_key = current.require_column(&self.key_column, "delta key in current snapshot")?;
        let reference_key =
            reference.require_column(&self.key_column, "delta key in reference snapshot")?;

        // First reference row per key
        let mut reference_rows: HashMap<String, usize> = HashMap::new();
        for (idx, key) in reference.keys(reference_key).into_iter().enumerate() {
            reference_rows.entry(key).or_insert(idx);
        }

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        let mut kinds = Vec::new();
        let mut duplicate_keys = 0;

        for (idx, key) in current.keys(current_key).into_iter().enumerate() {
            if !seen.insert(key.clone()) {
                duplicate_keys += 1;
                continue;
            }
            match reference_rows.get(&key) {
                None => {
                    selected.push(idx);
                    kinds.push(ChangeKind::New);
                }
                Some(&ref_idx) => {
                    if fingerprint_row(current, idx) != fingerprint_row(reference, ref_idx) {
                        selected.push(idx);
                        kinds.push(ChangeKind::Changed);
                    }
                }
            }
        }

        if duplicate_keys > 0 {
            tracing::warn!(
                key = %self.key_column,
                duplicates = duplicate_keys,
                "duplicate keys in current snapshot, first occurrence kept"
            );
        }

        Ok(DeltaSet {
            table: current.select_rows(&selected),
            kinds,
            first_run: false,
            duplicate_keys,
        })
    }

    /// Load both snapshots from disk and detect.
    /// Missing current file ⇒ empty delta; missing reference file ⇒ first run.
    pub fn detect_files(
        &self,
        loader: &TabularLoader,
        current_path: &Path,
        reference_path: &Path,
        properties: Option<&[String]>,
    ) -> Result<DeltaSet> {
        let mut current = match loader.load(current_path)? {
            LoadOutcome::Found(table) => table,
            LoadOutcome::NotFound => {
                tracing::warn!(path = %current_path.display(), "current snapshot missing, empty delta");
                return Ok(DeltaSet::empty(false));
            }
        };
        filter_entities(&mut current, properties);

        let reference = loader.load(reference_path)?.into_option().map(|mut table| {
            filter_entities(&mut table, properties);
            table
        });
        if reference.is_none() {
            tracing::info!(path = %reference_path.display(), "no reference snapshot, treating as first run");
        }

        self.detect(&current, reference.as_ref())
    }
}

// ============================================================================
// TESTS
// ============================================================================
