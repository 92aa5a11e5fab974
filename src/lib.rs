//! Core library for the leap-tools command line application.
//!
//! Two subsystems make up the crate. [`branches`] infers the kind of each
//! branch in a hierarchy from its position among the target paths and creates
//! only the branches that are missing. [`reconcile`] scales model inputs so
//! totals derived from them match externally supplied reference totals, and
//! reports what changed. IO adapters live under [`io`], sheet layouts under
//! [`report`], the TOML run configuration in [`config`], and the file-to-file
//! orchestration used by the CLI in [`workflow`].

pub mod branches;
pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod reconcile;
pub mod report;
pub mod workflow;

pub use error::{Result, ToolError};
