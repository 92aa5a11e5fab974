use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::branches::materialize::Hierarchy;
use crate::error::{Result, ToolError};
use crate::model::{BranchPath, NodeKind};

/// Handle of a node in a [`MemoryHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub path: BranchPath,
    /// `None` for pre-seeded roots.
    pub kind: Option<NodeKind>,
}

/// Hierarchy kept in memory and persisted as a JSON snapshot. Backs offline
/// runs of the branch creation command and the test suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryHierarchy {
    nodes: Vec<MemoryNode>,
    #[serde(skip)]
    index: HashMap<BranchPath, usize>,
    #[serde(skip)]
    refused: HashSet<BranchPath>,
    #[serde(skip)]
    creation_calls: usize,
}

impl MemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a hierarchy that already holds the given roots.
    pub fn with_roots(roots: &[&str]) -> Self {
        let mut hierarchy = Self::new();
        for root in roots {
            hierarchy.add_root(&BranchPath::parse(root));
        }
        hierarchy
    }

    /// Inserts `path` and any missing ancestors as untyped roots.
    pub fn add_root(&mut self, path: &BranchPath) {
        for depth in 1..=path.len() {
            let prefix = path.prefix(depth);
            if !self.index.contains_key(&prefix) {
                self.insert(prefix, None);
            }
        }
    }

    /// Makes every later creation at `path` fail, as a rejecting external
    /// system would.
    pub fn refuse(&mut self, path: &BranchPath) {
        self.refused.insert(path.clone());
    }

    pub fn contains(&self, path: &BranchPath) -> bool {
        self.index.contains_key(path)
    }

    pub fn kind_of(&self, path: &BranchPath) -> Option<NodeKind> {
        self.index.get(path).and_then(|id| self.nodes[*id].kind)
    }

    pub fn nodes(&self) -> &[MemoryNode] {
        &self.nodes
    }

    /// Number of creation calls received, failed ones included.
    pub fn creation_calls(&self) -> usize {
        self.creation_calls
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        let mut hierarchy: MemoryHierarchy = serde_json::from_str(&source)?;
        hierarchy.index = hierarchy
            .nodes
            .iter()
            .enumerate()
            .map(|(id, node)| (node.path.clone(), id))
            .collect();
        Ok(hierarchy)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    fn insert(&mut self, path: BranchPath, kind: Option<NodeKind>) -> NodeId {
        let id = self.nodes.len();
        self.index.insert(path.clone(), id);
        self.nodes.push(MemoryNode { path, kind });
        NodeId(id)
    }

    fn add(&mut self, parent: &NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        self.creation_calls += 1;
        let parent_path = self
            .nodes
            .get(parent.0)
            .map(|node| node.path.clone())
            .ok_or_else(|| {
                ToolError::external(name, Some(kind), format!("unknown parent id {}", parent.0))
            })?;
        let path = parent_path.child(name);
        if self.refused.contains(&path) {
            return Err(ToolError::external(
                path.to_string(),
                Some(kind),
                "creation rejected by hierarchy",
            ));
        }
        if self.index.contains_key(&path) {
            return Err(ToolError::external(
                path.to_string(),
                Some(kind),
                "branch already exists",
            ));
        }
        Ok(self.insert(path, Some(kind)))
    }
}

impl Hierarchy for MemoryHierarchy {
    type Handle = NodeId;

    fn find(&mut self, path: &BranchPath) -> Result<Option<NodeId>> {
        Ok(self.index.get(path).map(|id| NodeId(*id)))
    }

    fn add_category(&mut self, parent: &NodeId, name: &str) -> Result<NodeId> {
        self.add(parent, name, NodeKind::Category)
    }

    fn add_technology(&mut self, parent: &NodeId, name: &str) -> Result<NodeId> {
        self.add(parent, name, NodeKind::Technology)
    }

    fn add_key_assumption_category(&mut self, parent: &NodeId, name: &str) -> Result<NodeId> {
        self.add(parent, name, NodeKind::KeyAssumptionCategory)
    }

    fn add_key_assumption(&mut self, parent: &NodeId, name: &str) -> Result<NodeId> {
        self.add(parent, name, NodeKind::KeyAssumption)
    }
}
