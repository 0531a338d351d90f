//! Buildpacks: references, records, sources, resolution and fetching.
//!
//! # Modules
//!
//! - [`types`] - references, resolved records and order groups
//! - [`source`] - source objects and the collection capability
//! - [`package`] - reading and writing buildpack-package images
//! - [`tree`] - dependency trees over meta-buildpack orders
//! - [`resolve`] - reference resolution with precedence and version selection
//! - [`fetch`] - flattening resolved buildpacks into layers

pub mod fetch;
pub mod package;
pub mod resolve;
pub mod source;
pub mod tree;
pub mod types;

pub use fetch::{BuildpackLayer, FetchError, RemoteBuildpackFetcher};
pub use resolve::{BuildpackResolver, ResolveError, ResolvedBuildpack};
pub use source::{BuildpackCollection, ObjectCollection, Provenance, SourceObject};
pub use types::{BuildpackRecord, BuildpackRef, GroupEntry, ObjectKind, ObjectReference, OrderEntry, StackSupport};
