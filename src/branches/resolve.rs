use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};
use crate::model::{BranchPath, NodeKind};

/// Kinds assigned by position when no override applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultKinds {
    /// Paths with descendants two levels down.
    pub internal: NodeKind,
    /// Paths with only direct children.
    pub parent_of_leaf: NodeKind,
    /// Paths with no known descendants.
    pub leaf: NodeKind,
}

impl DefaultKinds {
    pub const fn new(internal: NodeKind, parent_of_leaf: NodeKind, leaf: NodeKind) -> Self {
        Self {
            internal,
            parent_of_leaf,
            leaf,
        }
    }

    /// Key assumption trees: categories all the way down to single-value leaves.
    pub const KEY_ASSUMPTIONS: DefaultKinds = DefaultKinds::new(
        NodeKind::KeyAssumptionCategory,
        NodeKind::KeyAssumptionCategory,
        NodeKind::KeyAssumption,
    );

    /// Intensity-style demand trees: categories ending in technologies.
    pub const DEMAND: DefaultKinds =
        DefaultKinds::new(NodeKind::Category, NodeKind::Category, NodeKind::Technology);
}

impl Default for DefaultKinds {
    fn default() -> Self {
        Self::KEY_ASSUMPTIONS
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Descendants {
    children: bool,
    grandchildren: bool,
}

/// Prefix index over a batch of known paths, answering "does anything extend
/// this path by one or two segments" in constant time.
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    descendants: HashMap<BranchPath, Descendants>,
}

impl PathIndex {
    pub fn build<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a BranchPath>,
    {
        let mut descendants: HashMap<BranchPath, Descendants> = HashMap::new();
        for path in paths {
            let len = path.len();
            if len >= 1 {
                descendants.entry(path.prefix(len - 1)).or_default().children = true;
            }
            if len >= 2 {
                descendants
                    .entry(path.prefix(len - 2))
                    .or_default()
                    .grandchildren = true;
            }
        }
        Self { descendants }
    }

    pub fn has_children(&self, path: &BranchPath) -> bool {
        self.descendants
            .get(path)
            .is_some_and(|entry| entry.children)
    }

    pub fn has_grandchildren(&self, path: &BranchPath) -> bool {
        self.descendants
            .get(path)
            .is_some_and(|entry| entry.grandchildren)
    }
}

/// Explicit path → kind table. Keys may be full paths or relative to `root`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindOverrides {
    #[serde(default)]
    root: Option<BranchPath>,
    #[serde(default)]
    kinds: HashMap<BranchPath, NodeKind>,
}

impl KindOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the root prefix stripped from paths before the second lookup.
    pub fn with_root(mut self, root: Option<BranchPath>) -> Self {
        self.root = root.filter(|root| !root.is_empty());
        self
    }

    pub fn insert(&mut self, path: impl Into<BranchPath>, kind: NodeKind) {
        self.kinds.insert(path.into(), kind);
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Reads a JSON object of `"A\\B": "category"` entries.
    pub fn from_json_str(source: &str) -> Result<Self> {
        let entries: BTreeMap<String, NodeKind> = serde_json::from_str(source)?;
        let mut overrides = Self::new();
        for (path, kind) in entries {
            overrides.insert(path.as_str(), kind);
        }
        Ok(overrides)
    }

    /// Looks `path` up as given, then with the root prefix removed.
    pub fn get(&self, path: &BranchPath) -> Option<NodeKind> {
        if let Some(kind) = self.kinds.get(path) {
            return Some(*kind);
        }
        let root = self.root.as_ref()?;
        let relative = BranchPath::from_segments(path.strip_root(root)?);
        self.kinds.get(&relative).copied()
    }
}

/// Classifies `path` from the override table or, failing that, from its
/// position among the indexed paths. Deeper descendants win over direct
/// children; a path nothing extends is a leaf.
pub fn resolve(
    path: &BranchPath,
    index: &PathIndex,
    overrides: &KindOverrides,
    defaults: DefaultKinds,
) -> NodeKind {
    if let Some(kind) = overrides.get(path) {
        return kind;
    }
    if index.has_grandchildren(path) {
        defaults.internal
    } else if index.has_children(path) {
        defaults.parent_of_leaf
    } else {
        defaults.leaf
    }
}

/// Decides the kind of a missing segment about to be created.
pub trait KindResolver {
    /// Kind for the segment `name` created directly under `parent`.
    fn kind_for(&self, parent: &BranchPath, name: &str) -> Result<NodeKind>;
}

/// Position-based resolver over one batch of target paths.
#[derive(Debug, Clone)]
pub struct PositionalResolver<'a> {
    index: PathIndex,
    overrides: &'a KindOverrides,
    defaults: DefaultKinds,
}

impl<'a> PositionalResolver<'a> {
    pub fn new(known: &[BranchPath], overrides: &'a KindOverrides, defaults: DefaultKinds) -> Self {
        Self {
            index: PathIndex::build(known),
            overrides,
            defaults,
        }
    }
}

impl KindResolver for PositionalResolver<'_> {
    fn kind_for(&self, parent: &BranchPath, name: &str) -> Result<NodeKind> {
        Ok(resolve(
            &parent.child(name),
            &self.index,
            self.overrides,
            self.defaults,
        ))
    }
}

pub const SHORTNAME_FUEL_ROAD: &str = "Fuel (road)";
pub const SHORTNAME_FUEL_NON_ROAD: &str = "Fuel (non-road)";
pub const SHORTNAME_OTHERS_LEVEL_2: &str = "Others (level 2)";
const STOCK_MARKER: &str = "(road)";

/// Shortname → branch tuples table used by the transport-style trees.
/// Entries keep insertion order; the first shortname listing a tuple wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShortnameTable {
    entries: Vec<(String, Vec<Vec<String>>)>,
}

impl ShortnameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: AsRef<str>>(&mut self, shortname: &str, branch: &[S]) {
        let branch: Vec<String> = branch.iter().map(|s| s.as_ref().to_string()).collect();
        match self.entries.iter_mut().find(|(name, _)| name == shortname) {
            Some((_, branches)) => branches.push(branch),
            None => self.entries.push((shortname.to_string(), vec![branch])),
        }
    }

    pub fn shortname_for(&self, branch: &[String]) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, branches)| branches.iter().any(|candidate| candidate == branch))
            .map(|(name, _)| name.as_str())
    }
}

/// Derives a kind from a shortname. Stock-based (`(road)`) branches can only
/// be created when they are the road fuel leaf.
pub fn kind_from_shortname(shortname: &str, path: &BranchPath) -> Result<NodeKind> {
    if shortname.to_lowercase().contains(STOCK_MARKER) {
        if shortname == SHORTNAME_FUEL_ROAD {
            return Ok(NodeKind::Fuel);
        }
        return Err(ToolError::external(
            path.to_string(),
            None,
            format!(
                "stock-based branch with shortname '{shortname}' must be created manually \
                 (expected '{SHORTNAME_FUEL_ROAD}')"
            ),
        ));
    }

    if shortname == SHORTNAME_OTHERS_LEVEL_2 || shortname == SHORTNAME_FUEL_NON_ROAD {
        return Ok(NodeKind::Technology);
    }
    Ok(NodeKind::Category)
}

/// Resolver for one logical branch of a shortname-classified tree.
#[derive(Debug, Clone)]
pub struct ShortnameResolver<'a> {
    table: &'a ShortnameTable,
    branch: Vec<String>,
    explicit: Option<NodeKind>,
}

impl<'a> ShortnameResolver<'a> {
    pub fn new<S: AsRef<str>>(table: &'a ShortnameTable, branch: &[S]) -> Self {
        Self {
            table,
            branch: branch.iter().map(|s| s.as_ref().to_string()).collect(),
            explicit: None,
        }
    }

    /// Forces the kind of created segments. Stock-based branches still fail.
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.explicit = Some(kind);
        self
    }
}

impl KindResolver for ShortnameResolver<'_> {
    fn kind_for(&self, parent: &BranchPath, name: &str) -> Result<NodeKind> {
        let shortname = self.table.shortname_for(&self.branch).ok_or_else(|| {
            ToolError::lookup("shortname table", BranchPath::from_segments(&self.branch).to_string())
        })?;
        let derived = kind_from_shortname(shortname, &parent.child(name))?;
        Ok(self.explicit.unwrap_or(derived))
    }
}
