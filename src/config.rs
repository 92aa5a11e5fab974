use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, ToolError};
use crate::model::Year;
use crate::reconcile::rules::{DEFAULT_ROOT, unmapped_branches};
use crate::reconcile::{
    BranchRule, ReconcileOptions, ReconciliationKey, ReferenceTotals, RuleSet, Strategies,
};

/// Strategy name recorded for rules that only list their own variables.
pub const CUSTOM_STRATEGY: &str = "Custom";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// TOML description of one reconciliation run.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub base_year: Year,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub extend_future: bool,
    #[serde(default)]
    pub extend_past: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_root")]
    pub root: String,
    /// Sheet holding the export table.
    #[serde(default = "default_sheet")]
    pub sheet: String,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub strategies: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub reference_totals: Vec<TotalConfig>,
    #[serde(default)]
    pub reference_workbook: Option<ReferenceWorkbookConfig>,
    /// Every branch the sector is expected to cover, below `root`.
    #[serde(default)]
    pub known_branches: Vec<Vec<String>>,
    /// Known branches that deliberately have no reconciliation key.
    #[serde(default)]
    pub unmappable_branches: Vec<Vec<String>>,
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

fn default_sheet() -> String {
    "LEAP".to_string()
}

// ---------------------------------------------------------------------------
// Rules and totals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub key: Vec<String>,
    pub branches: Vec<RuleBranchConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleBranchConfig {
    pub branch: Vec<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub input_variables: Option<Vec<String>>,
    /// Overrides the run-wide root for this branch.
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TotalConfig {
    pub key: Vec<String>,
    pub value: f64,
}

/// Sheet supplying reference totals, one row per key.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceWorkbookConfig {
    pub path: PathBuf,
    pub sheet: String,
    pub key_columns: Vec<String>,
    pub value_column: String,
}

impl ReconcileConfig {
    pub fn from_toml(input: &str) -> Result<Self> {
        let config: ReconcileConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ToolError::MissingInput(path.to_path_buf()));
        }
        Self::from_toml(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(ToolError::Configuration(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }

        let strategies = self.strategies();
        for rule in &self.rules {
            if rule.key.is_empty() {
                return Err(ToolError::Configuration(
                    "rule keys must have at least one label".into(),
                ));
            }
            for branch in &rule.branches {
                let has_variables = branch
                    .input_variables
                    .as_ref()
                    .is_some_and(|variables| !variables.is_empty());
                match &branch.strategy {
                    Some(name) if !strategies.contains(name) && !has_variables => {
                        return Err(ToolError::Configuration(format!(
                            "unknown strategy '{name}' for branch {:?}",
                            branch.branch
                        )));
                    }
                    None if !has_variables => {
                        return Err(ToolError::Configuration(format!(
                            "branch {:?} needs a strategy or input_variables",
                            branch.branch
                        )));
                    }
                    _ => {}
                }
            }
        }

        for total in &self.reference_totals {
            if total.key.is_empty() {
                return Err(ToolError::Configuration(
                    "reference total keys must have at least one label".into(),
                ));
            }
        }

        if let Some(workbook) = &self.reference_workbook {
            if workbook.key_columns.is_empty() {
                return Err(ToolError::Configuration(
                    "reference_workbook.key_columns must not be empty".into(),
                ));
            }
        }
        Ok(())
    }

    /// Default strategies with the configured ones layered on top.
    pub fn strategies(&self) -> Strategies {
        Strategies::with_overrides(&self.strategies)
    }

    pub fn rule_set(&self) -> RuleSet {
        let mut rules = RuleSet::new();
        for rule in &self.rules {
            let key = ReconciliationKey(rule.key.clone());
            for branch in &rule.branches {
                let strategy = branch.strategy.as_deref().unwrap_or(CUSTOM_STRATEGY);
                let mut built = BranchRule::new(&branch.branch, strategy)
                    .with_root(branch.root.as_deref().unwrap_or(&self.root));
                if let Some(variables) = &branch.input_variables {
                    built = built.with_input_variables(variables);
                }
                rules.push(key.clone(), built);
            }
        }
        rules
    }

    /// Known branches that no rule maps and that are not declared unmappable.
    /// Empty when the config lists no known branches.
    pub fn unmapped_branches(&self) -> Vec<Vec<String>> {
        if self.known_branches.is_empty() {
            return Vec::new();
        }
        let mapping: Vec<(ReconciliationKey, Vec<Vec<String>>)> = self
            .rules
            .iter()
            .map(|rule| {
                let branches = rule
                    .branches
                    .iter()
                    .map(|branch| branch.branch.clone())
                    .collect();
                (ReconciliationKey(rule.key.clone()), branches)
            })
            .collect();
        unmapped_branches(&mapping, &self.unmappable_branches, &self.known_branches)
    }

    /// Totals listed inline in the config.
    pub fn inline_totals(&self) -> ReferenceTotals {
        self.reference_totals
            .iter()
            .map(|total| (ReconciliationKey(total.key.clone()), total.value))
            .collect()
    }

    pub fn options(&self) -> ReconcileOptions<'static> {
        ReconcileOptions {
            extend_future: self.extend_future,
            extend_past: self.extend_past,
            strict: self.strict,
            strategies: self.strategies(),
            hooks: Default::default(),
        }
    }
}
