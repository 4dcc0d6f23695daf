// 🔧 Transform Engine - Rules as Data
// Source-shaped table → target-shaped table, per module
//
// Rules name TARGET fields and are resolved to source columns through the
// module's field mapping. All rules run on source column names; the rename
// to target names happens last, exactly once.

use crate::config::MigrationConfig;
use crate::error::Result;
use crate::table::{Table, Value};
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Null identifier → `prefix` + value of `from` (flagged for tracking)
    BackfillIdentifier {
        field: String,
        from: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },

    /// Parse both dates, push `end` one year past `start` when start >= end,
    /// reformat both. Unparseable dates become null.
    DateRepair {
        start: String,
        end: String,
        #[serde(default = "default_input_format")]
        input_format: String,
        #[serde(default = "default_output_format")]
        output_format: String,
    },

    /// Raw code → canonical code using the module's value map for `field`
    ValueRemap { field: String },

    /// Absolute value; non-numeric input becomes null
    SignNormalize { field: String },
}

fn default_prefix() -> String {
    "TEMP-".to_string()
}

fn default_input_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_output_format() -> String {
    "%Y%m%d".to_string()
}

/// Rule sets used when the configuration names none for a module
pub fn builtin_rules(module: &str) -> Vec<RuleSpec> {
    match module {
        "leasing" => vec![
            RuleSpec::BackfillIdentifier {
                field: "TenantID".to_string(),
                from: "LeaseReference".to_string(),
                prefix: default_prefix(),
            },
            RuleSpec::DateRepair {
                start: "LeaseCommencementDate".to_string(),
                end: "LeaseExpirationDate".to_string(),
                input_format: default_input_format(),
                output_format: default_output_format(),
            },
            RuleSpec::ValueRemap {
                field: "RentFrequency".to_string(),
            },
            RuleSpec::SignNormalize {
                field: "BaseRent".to_string(),
            },
        ],
        "fixed_assets" => vec![
            RuleSpec::ValueRemap {
                field: "DepreciationMethod".to_string(),
            },
            RuleSpec::SignNormalize {
                field: "OriginalCost".to_string(),
            },
        ],
        _ => Vec::new(),
    }
}

// ============================================================================
// TRANSFORM OUTPUT
// ============================================================================

/// An identifier produced by a backfill rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedId {
    /// Target field that received the identifier
    pub field: String,
    /// Value of the field it was derived from
    pub reference: String,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    /// Target-shaped table
    pub table: Table,
    pub synthesized_ids: Vec<SynthesizedId>,
}

// ============================================================================
// TRANSFORM ENGINE
// ============================================================================

pub struct TransformEngine<'a> {
    config: &'a MigrationConfig,
}

impl<'a> TransformEngine<'a> {
    pub fn new(config: &'a MigrationConfig) -> Self {
        TransformEngine { config }
    }

    /// Configured rules for a module, falling back to the built-in set
    pub fn rules_for(&self, module: &str) -> Vec<RuleSpec> {
        match self.config.transform_rules.get(module) {
            Some(rules) => rules.clone(),
            None => builtin_rules(module),
        }
    }

    /// Apply the module's rules, then rename source columns to target names
    pub fn transform(&self, module: &str, mut table: Table) -> Result<TransformOutput> {
        let renames = self.config.inverse_mapping(module)?;
        let rules = self.rules_for(module);

        let mut synthesized_ids = Vec::new();
        for rule in &rules {
            self.apply_rule(module, rule, &mut table, &mut synthesized_ids);
        }

        table.rename_columns(&renames);

        tracing::debug!(
            module,
            rules = rules.len(),
            records = table.len(),
            synthesized = synthesized_ids.len(),
            "transformed module"
        );

        Ok(TransformOutput {
            table,
            synthesized_ids,
        })
    }

    fn apply_rule(
        &self,
        module: &str,
        rule: &RuleSpec,
        table: &mut Table,
        synthesized: &mut Vec<SynthesizedId>,
    ) {
        let source = |field: &str| self.config.source_field(module, field);

        match rule {
            RuleSpec::BackfillIdentifier {
                field,
                from,
                prefix,
            } => {
                let Some(from_idx) = table.column_index(&source(from)) else {
                    tracing::debug!(module, column = %source(from), "backfill skipped, reference column absent");
                    return;
                };
                let field_idx = table.add_column(&source(field), Value::Null);

                for row in 0..table.len() {
                    if !table.value(row, field_idx).is_null() {
                        continue;
                    }
                    let reference = table.value(row, from_idx);
                    if reference.is_null() {
                        continue;
                    }
                    let reference = reference.as_key();
                    let identifier = format!("{}{}", prefix, reference);
                    table.set_value(row, field_idx, Value::text(identifier.as_str()));
                    synthesized.push(SynthesizedId {
                        field: field.clone(),
                        reference,
                        identifier,
                    });
                }
            }

            RuleSpec::DateRepair {
                start,
                end,
                input_format,
                output_format,
            } => {
                let (Some(start_idx), Some(end_idx)) = (
                    table.column_index(&source(start)),
                    table.column_index(&source(end)),
                ) else {
                    tracing::debug!(module, "date repair skipped, date columns absent");
                    return;
                };

                let mut repaired = 0usize;
                for row in 0..table.len() {
                    let start_date = parse_date(table.value(row, start_idx), input_format);
                    let mut end_date = parse_date(table.value(row, end_idx), input_format);

                    if let (Some(s), Some(e)) = (start_date, end_date) {
                        if s >= e {
                            if let Some(fixed) = s.checked_add_months(Months::new(12)) {
                                end_date = Some(fixed);
                                repaired += 1;
                            }
                        }
                    }

                    table.set_value(row, start_idx, format_date(start_date, output_format));
                    table.set_value(row, end_idx, format_date(end_date, output_format));
                }

                if repaired > 0 {
                    tracing::info!(module, repaired, "repaired end dates not after start dates");
                }
            }

            RuleSpec::ValueRemap { field } => {
                let map = self
                    .config
                    .validation_rules
                    .get(module)
                    .and_then(|r| r.value_maps.get(field));
                let (Some(map), Some(idx)) = (map, table.column_index(&source(field))) else {
                    tracing::debug!(module, field = %field, "value remap skipped, no map or column");
                    return;
                };

                table.map_column(idx, |v| {
                    if v.is_null() {
                        return Value::Null;
                    }
                    match map.get(&v.as_key()) {
                        Some(canonical) => Value::text(canonical.as_str()),
                        None => v.clone(),
                    }
                });
            }

            RuleSpec::SignNormalize { field } => {
                let Some(idx) = table.column_index(&source(field)) else {
                    return;
                };
                table.map_column(idx, |v| match v.as_number() {
                    Some(n) => Value::Number(n.abs()),
                    None => Value::Null,
                });
            }
        }
    }
}

fn parse_date(value: &Value, format: &str) -> Option<NaiveDate> {
    match value {
        Value::Date(d) => Some(*d),
        Value::Null => None,
        other => NaiveDate::parse_from_str(other.as_key().trim(), format).ok(),
    }
}

fn format_date(date: Option<NaiveDate>, format: &str) -> Value {
    match date {
        Some(d) => Value::Text(d.format(format).to_string()),
        None => Value::Null,
    }
}

// ============================================================================
// TESTS
// ============================================================================
