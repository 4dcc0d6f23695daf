// ⚙️ Configuration - phase, modules, mappings and rules as data
//
// One YAML file per phase. Loading validates cross-references so the
// engine never meets a module it has no mapping or rules for.

use crate::error::{MigrationError, Result};
use crate::transform::RuleSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================================================
// PHASE
// ============================================================================

/// The three sequential migration stages, each gated more strictly than the last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Initial conversion (full extraction, no delta)
    Initial,
    /// User-acceptance staging (delta against the initial snapshot)
    Staging,
    /// Production go-live (pre-flight gated)
    Production,
}

/// What a phase does beyond the common per-module pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhasePolicy {
    pub uses_delta: bool,
    pub creates_rollback_point: bool,
    pub requires_preflight: bool,
    pub archives_outputs: bool,
    pub output_subdir: Option<&'static str>,
}

impl Phase {
    /// Canonical phase name used in paths and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "dm1_crp",
            Phase::Staging => "dm2_uat",
            Phase::Production => "dm3_prod",
        }
    }

    pub fn from_name(name: &str) -> Option<Phase> {
        match name.trim().to_lowercase().as_str() {
            "dm1_crp" | "dm1" | "initial" => Some(Phase::Initial),
            "dm2_uat" | "dm2" | "staging" | "uat" => Some(Phase::Staging),
            "dm3_prod" | "dm3" | "production" | "prod" => Some(Phase::Production),
            _ => None,
        }
    }

    pub fn policy(&self) -> PhasePolicy {
        match self {
            Phase::Initial => PhasePolicy {
                uses_delta: false,
                creates_rollback_point: false,
                requires_preflight: false,
                archives_outputs: false,
                output_subdir: None,
            },
            Phase::Staging => PhasePolicy {
                uses_delta: true,
                creates_rollback_point: true,
                requires_preflight: false,
                archives_outputs: false,
                output_subdir: Some("incremental"),
            },
            Phase::Production => PhasePolicy {
                uses_delta: true,
                creates_rollback_point: true,
                requires_preflight: true,
                archives_outputs: true,
                output_subdir: Some("final"),
            },
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONFIGURATION SECTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Target fields that must exist and contain no nulls
    #[serde(default)]
    pub required: Vec<String>,

    /// Target fields whose numeric values must be >= 0 (warning only)
    #[serde(default)]
    pub positive_values: Vec<String>,

    /// Target field → (raw source code → canonical target code)
    #[serde(default)]
    pub value_maps: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSettings {
    pub reference_phase: String,

    /// Module → source key column
    #[serde(default)]
    pub key_columns: BTreeMap<String, String>,
}

impl Default for DeltaSettings {
    fn default() -> Self {
        DeltaSettings {
            reference_phase: Phase::Initial.as_str().to_string(),
            key_columns: BTreeMap::from([
                ("leasing".to_string(), "lease_ref".to_string()),
                ("ar".to_string(), "invoice_number".to_string()),
                ("fixed_assets".to_string(), "asset_id".to_string()),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Name of the target environment; production refuses to start without it
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSettings {
    #[serde(default)]
    pub support_webhook: Option<String>,

    #[serde(default = "default_min_free_disk_bytes")]
    pub min_free_disk_bytes: u64,
}

fn default_min_free_disk_bytes() -> u64 {
    2_000_000_000
}

impl Default for ProductionSettings {
    fn default() -> Self {
        ProductionSettings {
            support_webhook: None,
            min_free_disk_bytes: default_min_free_disk_bytes(),
        }
    }
}

// ============================================================================
// MIGRATION CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub phase: String,

    /// Modules in processing order
    pub modules: Vec<String>,

    /// Optional entity filter applied by the loader (matches `property_id`)
    #[serde(default)]
    pub properties: Option<Vec<String>>,

    /// Module → (target field → source field)
    pub field_mappings: BTreeMap<String, BTreeMap<String, String>>,

    pub validation_rules: BTreeMap<String, ValidationRules>,

    #[serde(default)]
    pub delta_settings: DeltaSettings,

    /// Module → explicit rule list; modules absent here use the built-in rule sets
    #[serde(default)]
    pub transform_rules: BTreeMap<String, Vec<RuleSpec>>,

    #[serde(default)]
    pub target: TargetSettings,

    #[serde(default)]
    pub production: ProductionSettings,
}

impl MigrationConfig {
    /// Read, parse and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        let mut config: MigrationConfig =
            serde_yaml::from_str(&content).map_err(|e| MigrationError::Yaml {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        config.canonicalize_phases()?;
        Ok(config)
    }

    /// Rewrite phase aliases (`staging`, `prod`, `dm2`...) to their canonical
    /// names. Every path is derived from `phase`, so the rollback point and
    /// the outputs must agree on one directory.
    pub fn canonicalize_phases(&mut self) -> Result<()> {
        self.phase = self.phase_kind()?.as_str().to_string();
        if let Some(reference) = Phase::from_name(&self.delta_settings.reference_phase) {
            self.delta_settings.reference_phase = reference.as_str().to_string();
        }
        Ok(())
    }

    /// Check cross-references between modules, mappings, rules and keys
    pub fn validate(&self) -> Result<()> {
        self.phase_kind()?;

        if self.modules.is_empty() {
            tracing::warn!(phase = %self.phase, "no modules configured");
        }

        for module in &self.modules {
            if !self.field_mappings.contains_key(module) {
                return Err(MigrationError::Config(format!(
                    "Missing field_mappings for {}",
                    module
                )));
            }
            if !self.validation_rules.contains_key(module) {
                return Err(MigrationError::Config(format!(
                    "Missing validation_rules for {}",
                    module
                )));
            }
            if !self.delta_settings.key_columns.contains_key(module) {
                return Err(MigrationError::Config(format!(
                    "Missing key column for {} in delta_settings",
                    module
                )));
            }

            // Mapping must be a bijection over the fields it names
            let mut seen = HashSet::new();
            for (target, source) in &self.field_mappings[module] {
                if !seen.insert(source.as_str()) {
                    return Err(MigrationError::Config(format!(
                        "field_mappings for {} maps source field '{}' more than once (at '{}')",
                        module, source, target
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn phase_kind(&self) -> Result<Phase> {
        Phase::from_name(&self.phase)
            .ok_or_else(|| MigrationError::Config(format!("Unknown phase: {}", self.phase)))
    }

    /// Target field → source field
    pub fn field_mapping(&self, module: &str) -> Result<&BTreeMap<String, String>> {
        self.field_mappings.get(module).ok_or_else(|| {
            MigrationError::Config(format!("Missing field_mappings for {}", module))
        })
    }

    /// Source field → target field (the rename applied by the transform)
    pub fn inverse_mapping(&self, module: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .field_mapping(module)?
            .iter()
            .map(|(target, source)| (source.clone(), target.clone()))
            .collect())
    }

    /// Source column name for a target field; unmapped fields keep their name
    pub fn source_field(&self, module: &str, target_field: &str) -> String {
        self.field_mappings
            .get(module)
            .and_then(|m| m.get(target_field))
            .cloned()
            .unwrap_or_else(|| target_field.to_string())
    }

    pub fn rules(&self, module: &str) -> Result<&ValidationRules> {
        self.validation_rules.get(module).ok_or_else(|| {
            MigrationError::Config(format!("Missing validation_rules for {}", module))
        })
    }

    /// Source key column for a module
    pub fn key_column(&self, module: &str) -> Result<&str> {
        self.delta_settings
            .key_columns
            .get(module)
            .map(String::as_str)
            .ok_or_else(|| {
                MigrationError::Config(format!("Missing key column for {}", module))
            })
    }

    /// Target-side name of the key column
    pub fn target_key_column(&self, module: &str) -> Result<String> {
        let source_key = self.key_column(module)?;
        let inverse = self.inverse_mapping(module)?;
        Ok(inverse
            .get(source_key)
            .cloned()
            .unwrap_or_else(|| source_key.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_CONFIG: &str = r#"
phase: dm2_uat
modules: [leasing, ar]
field_mappings:
  leasing:
    LeaseReference: lease_ref
    TenantID: tenant_id
    LeaseCommencementDate: lease_start
    LeaseExpirationDate: lease_end
    RentFrequency: rent_freq
    BaseRent: base_rent
  ar:
    InvoiceNumber: invoice_number
    Amount: amount
validation_rules:
  leasing:
    required: [LeaseReference, TenantID, BaseRent]
    positive_values: [BaseRent]
    value_maps:
      RentFrequency: { M: MONTHLY, Q: QUARTERLY }
  ar:
    required: [InvoiceNumber]
delta_settings:
  reference_phase: dm1_crp
  key_columns:
    leasing: lease_ref
    ar: invoice_number
target:
  environment: UAT
"#;

    pub(crate) fn create_test_config() -> MigrationConfig {
        let config: MigrationConfig = serde_yaml::from_str(SAMPLE_CONFIG).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_sample_config() {
        let config = create_test_config();

        assert_eq!(config.phase_kind().unwrap(), Phase::Staging);
        assert_eq!(config.modules, vec!["leasing", "ar"]);
        assert_eq!(config.key_column("leasing").unwrap(), "lease_ref");
        assert_eq!(config.target_key_column("leasing").unwrap(), "LeaseReference");
        assert_eq!(config.production.min_free_disk_bytes, 2_000_000_000);
        assert!(config.transform_rules.is_empty());
    }

    #[test]
    fn test_missing_module_rules_is_config_error() {
        let mut config = create_test_config();
        config.validation_rules.remove("ar");

        let err = config.validate().unwrap_err();
        assert!(matches!(err, MigrationError::Config(ref m) if m == "Missing validation_rules for ar"));
    }

    #[test]
    fn test_non_bijective_mapping_rejected() {
        let mut config = create_test_config();
        config
            .field_mappings
            .get_mut("ar")
            .unwrap()
            .insert("InvoiceCopy".to_string(), "invoice_number".to_string());

        assert!(matches!(config.validate(), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_unknown_phase_rejected() {
        let mut config = create_test_config();
        config.phase = "fallback".to_string();

        assert!(matches!(config.validate(), Err(MigrationError::Config(_))));
    }

    #[test]
    fn test_phase_aliases_are_canonicalized() {
        let mut config = create_test_config();
        config.phase = "staging".to_string();
        config.delta_settings.reference_phase = "DM1".to_string();
        config.canonicalize_phases().unwrap();

        assert_eq!(config.phase, "dm2_uat");
        assert_eq!(config.delta_settings.reference_phase, "dm1_crp");
    }

    #[test]
    fn test_load_canonicalizes_phase_alias() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staging.yaml");
        fs::write(&path, SAMPLE_CONFIG.replace("phase: dm2_uat", "phase: staging")).unwrap();

        let config = MigrationConfig::load(&path).unwrap();
        assert_eq!(config.phase, "dm2_uat");
    }

    #[test]
    fn test_default_delta_settings() {
        let yaml = r#"
phase: dm1_crp
modules: [fixed_assets]
field_mappings:
  fixed_assets: { AssetID: asset_id }
validation_rules:
  fixed_assets: { required: [AssetID] }
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.delta_settings.reference_phase, "dm1_crp");
        assert_eq!(config.key_column("fixed_assets").unwrap(), "asset_id");
    }

    #[test]
    fn test_inverse_mapping_and_source_field() {
        let config = create_test_config();
        let inverse = config.inverse_mapping("leasing").unwrap();

        assert_eq!(inverse["rent_freq"], "RentFrequency");
        assert_eq!(config.source_field("leasing", "BaseRent"), "base_rent");
        assert_eq!(config.source_field("leasing", "Unmapped"), "Unmapped");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = MigrationConfig::load("/nonexistent/dm2_uat.yaml").unwrap_err();
        assert!(matches!(err, MigrationError::Io { .. }));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::from_name("DM3_PROD"), Some(Phase::Production));
        assert_eq!(Phase::from_name("staging"), Some(Phase::Staging));
        assert_eq!(Phase::from_name("nope"), None);
        assert!(Phase::Production.policy().requires_preflight);
        assert!(!Phase::Initial.policy().creates_rollback_point);
    }
}
