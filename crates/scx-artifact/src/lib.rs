//! SCX Artifact System
//!
//! References to files produced by script executions, and the rules that
//! decide which of several versions of the same output is current.
//!
//! # Core Concepts
//!
//! - [`ArtifactRef`]: one produced file with its derived [`ArtifactKind`]
//! - [`VersionedName`]: filename split into canonical base and `_<epoch>_<n>` version
//! - [`latest_versions`]: keeps one item per canonical base name
//! - [`QueryId`]: deterministic identifier of a query group
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use scx_artifact::{latest_artifacts, ArtifactRef};
//!
//! let now = Utc::now();
//! let kept = latest_artifacts(vec![
//!     ArtifactRef::new("report_1700000000_1.csv", now),
//!     ArtifactRef::new("report_1700000500_2.csv", now),
//! ]);
//! assert_eq!(kept.len(), 1);
//! assert_eq!(kept[0].filename, "report_1700000500_2.csv");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod artifact;
mod dedup;
mod hash;
mod name;

// Re-exports
pub use artifact::{ArtifactKind, ArtifactRef, VersionKey};
pub use dedup::{latest_artifacts, latest_versions, uses_arrival_fallback};
pub use hash::{QueryId, QueryIdError};
pub use name::{file_name, Version, VersionedName};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
