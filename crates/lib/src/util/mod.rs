//! Shared utilities.
//!
//! Content digests used by layers, manifests and records, plus test fixtures.

pub mod hash;

#[cfg(test)]
pub mod testutil;
