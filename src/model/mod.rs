use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used between branch path segments, as in `Demand\Road\Gasoline`.
pub const PATH_SEPARATOR: char = '\\';

/// A year column in an export table.
pub type Year = i32;

/// Ordered list of segments locating a branch in the external hierarchy.
///
/// Serialised as the backslash-joined string so snapshots and override files
/// stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BranchPath(Vec<String>);

impl BranchPath {
    /// Parses a backslash-separated path. Empty segments are dropped.
    pub fn parse(raw: &str) -> Self {
        Self::from_segments(raw.split(PATH_SEPARATOR))
    }

    /// Builds a path from individual segments, dropping empty ones.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            segments
                .into_iter()
                .map(|segment| segment.as_ref().trim().to_string())
                .filter(|segment| !segment.is_empty())
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The first `len` segments of this path.
    pub fn prefix(&self, len: usize) -> BranchPath {
        BranchPath(self.0[..len.min(self.0.len())].to_vec())
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: &str) -> BranchPath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        BranchPath(segments)
    }

    pub fn starts_with(&self, other: &BranchPath) -> bool {
        self.0.starts_with(&other.0)
    }

    /// Segments remaining after removing `root`, if this path lives under it.
    pub fn strip_root(&self, root: &BranchPath) -> Option<&[String]> {
        if root.is_empty() || !self.starts_with(root) {
            return None;
        }
        Some(&self.0[root.len()..])
    }
}

impl fmt::Display for BranchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("\\"))
    }
}

impl From<String> for BranchPath {
    fn from(value: String) -> Self {
        BranchPath::parse(&value)
    }
}

impl From<&str> for BranchPath {
    fn from(value: &str) -> Self {
        BranchPath::parse(value)
    }
}

impl From<BranchPath> for String {
    fn from(value: BranchPath) -> Self {
        value.to_string()
    }
}

/// Structural role of a node, selecting which creation call applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Demand category holding other branches.
    Category,
    /// Demand technology, the leaf of an intensity-based tree.
    Technology,
    /// Demand fuel branch. There is no creation call for it.
    Fuel,
    /// Key assumption category holding other assumptions.
    KeyAssumptionCategory,
    /// Key assumption carrying a single value.
    KeyAssumption,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Category => write!(f, "category"),
            NodeKind::Technology => write!(f, "technology"),
            NodeKind::Fuel => write!(f, "fuel"),
            NodeKind::KeyAssumptionCategory => write!(f, "key assumption category"),
            NodeKind::KeyAssumption => write!(f, "key assumption"),
        }
    }
}

/// Returns the year a column header denotes, if it is a four digit number.
pub fn parse_year(header: &str) -> Option<Year> {
    let header = header.trim();
    let header = header.strip_suffix(".0").unwrap_or(header);
    if header.len() == 4 && header.chars().all(|ch| ch.is_ascii_digit()) {
        header.parse().ok()
    } else {
        None
    }
}

/// One `(branch, variable)` row of an export table with its yearly values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub path: BranchPath,
    pub variable: String,
    pub scenario: Option<String>,
    pub region: Option<String>,
    /// Non-year columns such as units or scale, kept for write-back.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Year → value. Blank cells have no entry.
    pub values: BTreeMap<Year, f64>,
}

impl SeriesRow {
    pub fn new(path: BranchPath, variable: impl Into<String>) -> Self {
        Self {
            path,
            variable: variable.into(),
            scenario: None,
            region: None,
            attributes: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Sets the value for `year`, builder style.
    pub fn with_value(mut self, year: Year, value: f64) -> Self {
        self.values.insert(year, value);
        self
    }

    pub fn value(&self, year: Year) -> Option<f64> {
        self.values.get(&year).copied()
    }

    fn matches(&self, path: &BranchPath, variable: &str) -> bool {
        &self.path == path && self.variable == variable
    }
}

/// Tabular export data: one row per branch/variable, one column per year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Ordered names of the non-year attribute columns.
    pub attribute_columns: Vec<String>,
    years: BTreeSet<Year>,
    pub rows: Vec<SeriesRow>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row, registering any year columns it introduces.
    pub fn push(&mut self, row: SeriesRow) {
        self.years.extend(row.values.keys().copied());
        for column in row.attributes.keys() {
            if !self.attribute_columns.contains(column) {
                self.attribute_columns.push(column.clone());
            }
        }
        self.rows.push(row);
    }

    /// Declares a year column even when no row has a value for it.
    pub fn add_year(&mut self, year: Year) {
        self.years.insert(year);
    }

    /// Year columns in ascending order.
    pub fn years(&self) -> Vec<Year> {
        self.years.iter().copied().collect()
    }

    pub fn has_year(&self, year: Year) -> bool {
        self.years.contains(&year)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matching<'a>(
        &'a self,
        path: &'a BranchPath,
        variable: &'a str,
    ) -> impl Iterator<Item = &'a SeriesRow> + 'a {
        self.rows.iter().filter(move |row| row.matches(path, variable))
    }

    pub fn matching_mut<'a>(
        &'a mut self,
        path: &'a BranchPath,
        variable: &'a str,
    ) -> impl Iterator<Item = &'a mut SeriesRow> + 'a {
        self.rows
            .iter_mut()
            .filter(move |row| row.matches(path, variable))
    }

    /// Unique branch paths in first-seen order.
    pub fn branch_paths(&self) -> Vec<BranchPath> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.path.clone()))
            .map(|row| row.path.clone())
            .collect()
    }

    /// Keeps only rows whose scenario and region match the given filters.
    /// Rows without a scenario or region value are kept.
    pub fn retain_scope(&mut self, scenario: Option<&str>, region: Option<&str>) {
        self.rows.retain(|row| {
            let scenario_ok = match (scenario, row.scenario.as_deref()) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            };
            let region_ok = match (region, row.region.as_deref()) {
                (Some(wanted), Some(actual)) => wanted == actual,
                _ => true,
            };
            scenario_ok && region_ok
        });
    }
}
