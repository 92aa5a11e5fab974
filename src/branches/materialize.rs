use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::branches::resolve::{DefaultKinds, KindOverrides, KindResolver, PositionalResolver};
use crate::error::{Result, ToolError};
use crate::model::{BranchPath, NodeKind};

/// Live tree of branches that nodes can be looked up in and added to.
///
/// Each creatable kind has its own entry point. Fuel branches have none.
pub trait Hierarchy {
    /// Opaque reference to an existing node.
    type Handle: Clone;

    /// Existence check. Returns the node's handle when `path` exists.
    fn find(&mut self, path: &BranchPath) -> Result<Option<Self::Handle>>;

    fn add_category(&mut self, parent: &Self::Handle, name: &str) -> Result<Self::Handle>;

    fn add_technology(&mut self, parent: &Self::Handle, name: &str) -> Result<Self::Handle>;

    fn add_key_assumption_category(
        &mut self,
        parent: &Self::Handle,
        name: &str,
    ) -> Result<Self::Handle>;

    fn add_key_assumption(&mut self, parent: &Self::Handle, name: &str) -> Result<Self::Handle>;
}

/// Creates the last segment of `path` under `parent` with the call matching
/// `kind`.
pub fn create_child<H: Hierarchy + ?Sized>(
    hierarchy: &mut H,
    parent: &H::Handle,
    path: &BranchPath,
    kind: NodeKind,
) -> Result<H::Handle> {
    let name = path
        .last()
        .ok_or_else(|| ToolError::OrphanCreation {
            path: path.to_string(),
        })?;
    match kind {
        NodeKind::Category => hierarchy.add_category(parent, name),
        NodeKind::Technology => hierarchy.add_technology(parent, name),
        NodeKind::KeyAssumptionCategory => hierarchy.add_key_assumption_category(parent, name),
        NodeKind::KeyAssumption => hierarchy.add_key_assumption(parent, name),
        NodeKind::Fuel => Err(ToolError::external(
            path.to_string(),
            Some(kind),
            "manual creation required: fuel branches cannot be added directly; \
             create the owning technology with its fuel instead",
        )),
    }
}

/// Outcome of [`ensure_path_exists`].
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured<H> {
    /// Handle of the node at the full path.
    pub handle: H,
    /// Prefixes that had to be created, shallowest first.
    pub created: Vec<BranchPath>,
}

/// Walks `path` from the root, creating only the missing segments.
///
/// A path whose segments all exist issues no creation calls. Creation never
/// happens without a parent handle; a missing root fails with
/// [`ToolError::OrphanCreation`].
pub fn ensure_path_exists<H, R>(
    hierarchy: &mut H,
    path: &BranchPath,
    resolver: &R,
) -> Result<Ensured<H::Handle>>
where
    H: Hierarchy + ?Sized,
    R: KindResolver + ?Sized,
{
    if path.is_empty() {
        return Err(ToolError::Configuration(
            "cannot ensure an empty branch path".into(),
        ));
    }

    let mut parent: Option<H::Handle> = None;
    let mut created = Vec::new();

    for depth in 1..=path.len() {
        let prefix = path.prefix(depth);
        if let Some(handle) = hierarchy.find(&prefix)? {
            parent = Some(handle);
            continue;
        }

        let Some(parent_handle) = parent.as_ref() else {
            return Err(ToolError::OrphanCreation {
                path: prefix.to_string(),
            });
        };

        let parent_path = path.prefix(depth - 1);
        let name = &path.segments()[depth - 1];
        let kind = resolver.kind_for(&parent_path, name)?;
        debug!(path = %prefix, %kind, "creating missing branch");
        let handle = create_child(hierarchy, parent_handle, &prefix, kind)?;
        created.push(prefix);
        parent = Some(handle);
    }

    let handle = parent.ok_or_else(|| ToolError::OrphanCreation {
        path: path.to_string(),
    })?;
    Ok(Ensured { handle, created })
}

/// How a batch reacts to a path that cannot be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// The first failure aborts the batch.
    #[default]
    Strict,
    /// Failures are collected and the batch continues.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBranch {
    pub path: BranchPath,
    pub reason: String,
}

/// Result of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub created: Vec<BranchPath>,
    pub skipped: Vec<BranchPath>,
    pub failed: Vec<FailedBranch>,
}

/// Deduplicates paths and orders them by segment count so ancestors come
/// before descendants. Paths of equal depth keep their input order.
pub fn order_by_depth(paths: &[BranchPath]) -> Vec<BranchPath> {
    let mut seen = HashSet::new();
    let mut ordered: Vec<BranchPath> = paths
        .iter()
        .filter(|path| !path.is_empty() && seen.insert((*path).clone()))
        .cloned()
        .collect();
    ordered.sort_by_key(BranchPath::len);
    ordered
}

/// Makes sure every path in the batch exists, processing shallow paths first.
#[instrument(level = "info", skip_all, fields(path_count = paths.len(), ?mode))]
pub fn materialize_batch<H, R>(
    hierarchy: &mut H,
    paths: &[BranchPath],
    resolver: &R,
    mode: FailureMode,
) -> Result<BatchReport>
where
    H: Hierarchy + ?Sized,
    R: KindResolver + ?Sized,
{
    let mut report = BatchReport::default();

    for path in order_by_depth(paths) {
        let outcome = match hierarchy.find(&path) {
            Ok(Some(_)) => {
                report.skipped.push(path);
                continue;
            }
            Ok(None) => ensure_path_exists(hierarchy, &path, resolver).map(|_| ()),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => report.created.push(path),
            Err(error) if mode == FailureMode::Strict => return Err(error),
            Err(error) => {
                warn!(path = %path, %error, "failed to create branch");
                report.failed.push(FailedBranch {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "branch creation complete"
    );
    Ok(report)
}

/// Batch entry point using positional inference over the batch itself.
pub fn create_branches<H>(
    hierarchy: &mut H,
    paths: &[BranchPath],
    overrides: &KindOverrides,
    defaults: DefaultKinds,
    mode: FailureMode,
) -> Result<BatchReport>
where
    H: Hierarchy + ?Sized,
{
    let resolver = PositionalResolver::new(paths, overrides, defaults);
    materialize_batch(hierarchy, paths, &resolver, mode)
}
