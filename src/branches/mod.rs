//! Branch kind inference and idempotent creation of missing branches.

pub mod materialize;
pub mod memory;
pub mod resolve;

pub use materialize::{
    BatchReport, Ensured, FailedBranch, FailureMode, Hierarchy, create_branches, ensure_path_exists,
    materialize_batch, order_by_depth,
};
pub use memory::{MemoryHierarchy, NodeId};
pub use resolve::{
    DefaultKinds, KindOverrides, KindResolver, PathIndex, PositionalResolver, ShortnameResolver,
    ShortnameTable, kind_from_shortname, resolve,
};
