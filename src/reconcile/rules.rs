use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::iter;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ToolError};
use crate::model::BranchPath;

/// Root prepended to rule branches when none is given.
pub const DEFAULT_ROOT: &str = "Demand";

pub const STRATEGY_INTENSITY: &str = "Intensity";
pub const STRATEGY_STOCK: &str = "Stock";

/// Tuple of category labels identifying one reference total, e.g.
/// `(sector, fuel group, fuel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationKey(pub Vec<String>);

impl ReconciliationKey {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for ReconciliationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" | "))
    }
}

/// Reference totals keyed like the rule set.
pub type ReferenceTotals = HashMap<ReconciliationKey, f64>;

/// Calculation strategy name → input variables multiplied together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strategies(BTreeMap<String, Vec<String>>);

impl Default for Strategies {
    fn default() -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert(
            STRATEGY_INTENSITY.to_string(),
            vec!["Activity Level".to_string(), "Final Energy Intensity".to_string()],
        );
        strategies.insert(
            STRATEGY_STOCK.to_string(),
            vec![
                "Stock".to_string(),
                "Mileage".to_string(),
                "Fuel Economy".to_string(),
            ],
        );
        Self(strategies)
    }
}

impl Strategies {
    /// Defaults with `overrides` layered on top.
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut strategies = Self::default();
        for (name, variables) in overrides {
            strategies.0.insert(name.clone(), variables.clone());
        }
        strategies
    }

    pub fn insert(&mut self, name: impl Into<String>, variables: Vec<String>) {
        self.0.insert(name.into(), variables);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

fn default_root() -> String {
    DEFAULT_ROOT.to_string()
}

/// One branch contributing to a reconciliation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    /// Branch segments below `root`.
    pub branch: Vec<String>,
    #[serde(default = "default_root")]
    pub root: String,
    /// Name of the calculation strategy.
    pub strategy: String,
    /// Replaces the strategy's variables for this branch only.
    #[serde(default)]
    pub input_variables: Option<Vec<String>>,
}

impl BranchRule {
    pub fn new<S: AsRef<str>>(branch: &[S], strategy: impl Into<String>) -> Self {
        Self {
            branch: branch.iter().map(|s| s.as_ref().to_string()).collect(),
            root: default_root(),
            strategy: strategy.into(),
            input_variables: None,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_input_variables<S: AsRef<str>>(mut self, variables: &[S]) -> Self {
        self.input_variables = Some(variables.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    /// Full branch path: root followed by the branch, empty segments dropped.
    pub fn path(&self) -> BranchPath {
        BranchPath::from_segments(
            iter::once(self.root.as_str())
                .flat_map(|root| root.split('\\'))
                .chain(self.branch.iter().map(String::as_str)),
        )
    }

    /// Variables multiplied for this rule: the override when non-empty,
    /// otherwise the strategy's list.
    pub fn input_variables<'a>(&'a self, strategies: &'a Strategies) -> Result<&'a [String]> {
        if let Some(variables) = self.input_variables.as_deref().filter(|v| !v.is_empty()) {
            return Ok(variables);
        }
        strategies
            .get(&self.strategy)
            .ok_or_else(|| ToolError::lookup("calculation strategies", self.strategy.clone()))
    }
}

/// Ordered key → rules table. Keys reconcile in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    entries: Vec<(ReconciliationKey, Vec<BranchRule>)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `rule` to `key`, registering the key on first use.
    pub fn push(&mut self, key: ReconciliationKey, rule: BranchRule) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, rules)) => rules.push(rule),
            None => self.entries.push((key, vec![rule])),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReconciliationKey, &[BranchRule])> {
        self.entries
            .iter()
            .map(|(key, rules)| (key, rules.as_slice()))
    }

    pub fn get(&self, key: &ReconciliationKey) -> Option<&[BranchRule]> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, rules)| rules.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Looks a branch's calculation strategy up in a branch → strategy table.
pub fn lookup_strategy(table: &HashMap<Vec<String>, String>, branch: &[String]) -> Result<String> {
    table.get(branch).cloned().ok_or_else(|| {
        ToolError::lookup(
            "branch strategy table",
            BranchPath::from_segments(branch).to_string(),
        )
    })
}

/// Builds rules from a key → branches mapping, asking `strategy_for` for each
/// branch's calculation strategy.
pub fn build_rules_from_mapping<F>(
    mapping: &[(ReconciliationKey, Vec<Vec<String>>)],
    strategy_for: F,
    root: &str,
) -> Result<RuleSet>
where
    F: Fn(&[String]) -> Result<String>,
{
    let mut rules = RuleSet::new();
    for (key, branches) in mapping {
        for branch in branches {
            let strategy = strategy_for(branch)?;
            rules.push(key.clone(), BranchRule::new(branch, strategy).with_root(root));
        }
    }
    Ok(rules)
}

/// Known branches that no key maps to and that are not declared unmappable.
pub fn unmapped_branches(
    mapping: &[(ReconciliationKey, Vec<Vec<String>>)],
    unmappable: &[Vec<String>],
    all_branches: &[Vec<String>],
) -> Vec<Vec<String>> {
    let mapped: HashSet<&Vec<String>> = mapping
        .iter()
        .flat_map(|(_, branches)| branches.iter())
        .chain(unmappable.iter())
        .collect();

    let missing: Vec<Vec<String>> = all_branches
        .iter()
        .filter(|branch| !mapped.contains(branch))
        .cloned()
        .collect();
    for branch in &missing {
        warn!(branch = %BranchPath::from_segments(branch), "branch has no reconciliation key");
    }
    missing
}
