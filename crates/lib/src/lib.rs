//! cnb-forge-lib: buildpack resolution and builder image composition
//!
//! This crate assembles Cloud Native Buildpacks builder images:
//! - `buildpack`: references, resolved records, dependency trees, resolution and fetching
//! - `stack`: build/run image compatibility and per-buildpack support checks
//! - `lifecycle`: the lifecycle layer and the APIs it supports
//! - `builder`: deterministic composition of the final builder image
//! - `image` / `registry` / `keychain`: the image model and the capabilities
//!   used to read and write images

pub mod builder;
pub mod buildpack;
pub mod consts;
pub mod image;
pub mod keychain;
pub mod lifecycle;
pub mod registry;
pub mod stack;
pub mod util;
