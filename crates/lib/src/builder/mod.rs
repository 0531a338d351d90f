//! Builder images.
//!
//! - [`metadata`] - label documents, `order.toml` and `stack.toml`
//! - [`image`] - the phased [`BuilderImage`] and its deterministic layout
//! - [`compose`] - resolve, fetch, compose and save in one call

pub mod compose;
pub mod image;
pub mod metadata;

pub use compose::{BuilderComposer, BuilderRecord, BuilderSpec, ComposeError, ResolvedStack};
pub use image::{BuilderError, BuilderImage, GroupMember, Phase};
pub use metadata::BuilderMetadata;
