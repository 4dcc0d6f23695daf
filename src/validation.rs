// ✅ Validation Engine - required fields, sign checks, value-map conformance
//
// Every rule runs; findings accumulate and nothing short-circuits.
// Errors fail the module (its output is not written). Warnings never do.

use crate::config::ValidationRules;
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Rows shown next to errors in the rendered report
pub const MAX_SAMPLE_ROWS: usize = 5;

// ============================================================================
// VALIDATION REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Pass,
    Fail,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Pass => write!(f, "PASS"),
            ValidationStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// One offending row, shown alongside the errors it triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// Zero-based row position in the validated table
    pub row: usize,
    pub field: String,
    pub value: String,
    pub issue: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub module: String,
    pub phase: String,
    pub total_records: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub status: ValidationStatus,
    pub samples: Vec<SampleRow>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.status == ValidationStatus::Pass
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} records, {} errors, {} warnings ({})",
            self.module,
            self.total_records,
            self.errors.len(),
            self.warnings.len(),
            self.status
        )
    }
}

// ============================================================================
// VALIDATION ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        ValidationEngine
    }

    /// Validate a transformed (target-shaped) table against a module's rules
    pub fn validate(
        &self,
        module: &str,
        phase: &str,
        table: &Table,
        rules: &ValidationRules,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. Required fields
        for field in &rules.required {
            match table.column_index(field) {
                None => errors.push(format!("Missing column: {}", field)),
                Some(idx) => {
                    let nulls = table.column_values(idx).filter(|v| v.is_null()).count();
                    if nulls > 0 {
                        errors.push(format!("{} null values in {}", nulls, field));
                    }
                }
            }
        }

        // 2. Positive values (non-numeric cells are not counted)
        for field in &rules.positive_values {
            let Some(idx) = table.column_index(field) else {
                continue;
            };
            let negatives = table
                .column_values(idx)
                .filter_map(Value::as_number)
                .filter(|n| *n < 0.0)
                .count();
            if negatives > 0 {
                warnings.push(format!(
                    "Negative values in {}: {} records",
                    field, negatives
                ));
            }
        }

        // 3. Value-map conformance
        for (field, map) in &rules.value_maps {
            let Some(idx) = table.column_index(field) else {
                continue;
            };
            let (unmapped, invalid) = nonconforming_values(table, idx, map);
            if !unmapped.is_empty() {
                errors.push(format!(
                    "Unmapped {} values: [{}]. Add mapping in config.",
                    field,
                    unmapped.join(", ")
                ));
            }
            if !invalid.is_empty() {
                errors.push(format!("Invalid {} values: [{}]", field, invalid.join(", ")));
            }
        }

        let status = if errors.is_empty() {
            ValidationStatus::Pass
        } else {
            ValidationStatus::Fail
        };

        let samples = if errors.is_empty() {
            Vec::new()
        } else {
            collect_samples(table, rules)
        };

        if status == ValidationStatus::Fail {
            tracing::warn!(module, phase, errors = errors.len(), "validation failed");
        } else {
            tracing::info!(module, phase, warnings = warnings.len(), "validation passed");
        }

        ValidationReport {
            module: module.to_string(),
            phase: phase.to_string(),
            total_records: table.len(),
            errors,
            warnings,
            status,
            samples,
        }
    }
}

/// Unique non-conforming values in first-appearance order, split into
/// (raw codes the mapping should have replaced, values that match nothing).
/// A value that is both a raw code and a canonical code counts as canonical.
fn nonconforming_values(
    table: &Table,
    column: usize,
    map: &BTreeMap<String, String>,
) -> (Vec<String>, Vec<String>) {
    let canonical: HashSet<&str> = map.values().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut unmapped = Vec::new();
    let mut invalid = Vec::new();

    for value in table.column_values(column) {
        // Nulls belong to the required-field rule
        if value.is_null() {
            continue;
        }
        let key = value.as_key();
        if canonical.contains(key.as_str()) || !seen.insert(key.clone()) {
            continue;
        }
        if map.contains_key(&key) {
            unmapped.push(key);
        } else {
            invalid.push(key);
        }
    }

    (unmapped, invalid)
}

/// First rows (up to MAX_SAMPLE_ROWS) carrying a validation error, one issue per row
fn collect_samples(table: &Table, rules: &ValidationRules) -> Vec<SampleRow> {
    let required: Vec<(&str, usize)> = rules
        .required
        .iter()
        .filter_map(|f| table.column_index(f).map(|i| (f.as_str(), i)))
        .collect();
    let mapped: Vec<(&str, usize, HashSet<&str>, &BTreeMap<String, String>)> = rules
        .value_maps
        .iter()
        .filter_map(|(f, map)| {
            table.column_index(f).map(|i| {
                let canonical = map.values().map(String::as_str).collect();
                (f.as_str(), i, canonical, map)
            })
        })
        .collect();

    let mut samples = Vec::new();
    for row in 0..table.len() {
        if samples.len() >= MAX_SAMPLE_ROWS {
            break;
        }

        let null_field = required
            .iter()
            .find(|(_, idx)| table.value(row, *idx).is_null());
        if let Some((field, _)) = null_field {
            samples.push(SampleRow {
                row,
                field: field.to_string(),
                value: "NULL".to_string(),
                issue: format!("null value in required field {}", field),
            });
            continue;
        }

        for (field, idx, canonical, map) in &mapped {
            let value = table.value(row, *idx);
            if value.is_null() {
                continue;
            }
            let key = value.as_key();
            if canonical.contains(key.as_str()) {
                continue;
            }
            let issue = if map.contains_key(&key) {
                format!("unmapped {} code", field)
            } else {
                format!("invalid {} value", field)
            };
            samples.push(SampleRow {
                row,
                field: field.to_string(),
                value: key,
                issue,
            });
            break;
        }
    }
    samples
}

// ============================================================================
// TESTS
// ============================================================================
