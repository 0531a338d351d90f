//! Image registries.
//!
//! A [`Registry`] fetches an image by reference and saves an image under a
//! tag, returning an immutable `repository@digest` identifier either way.
//!
//! Implementations:
//! - [`memory::InMemoryRegistry`]: process-local, with per-repository auth
//! - [`layout::LayoutRegistry`]: an OCI image layout directory on disk

pub mod layout;
pub mod memory;

use std::path::PathBuf;

use thiserror::Error;

use crate::image::reference::ReferenceError;
use crate::image::{Image, ImageError, LayerError};
use crate::keychain::Credentials;
use crate::util::hash::Digest;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("invalid image reference '{reference}': {source}")]
  Reference {
    reference: String,
    #[source]
    source: ReferenceError,
  },

  #[error("image not found: {0}")]
  NotFound(String),

  #[error("unauthorized to access '{0}'")]
  Unauthorized(String),

  #[error("failed to read layer {digest}: {source}")]
  Layer {
    digest: Digest,
    #[source]
    source: LayerError,
  },

  #[error(transparent)]
  Image(#[from] ImageError),

  #[error("failed to access '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("corrupt image store: {0}")]
  Corrupt(String),
}

/// Fetches and stores images.
pub trait Registry: Send + Sync {
  /// Fetch an image. Returns the image and its `repository@digest` identifier.
  fn fetch(&self, credentials: &Credentials, reference: &str) -> Result<(Image, String), RegistryError>;

  /// Save an image under `tag`. Returns its `repository@digest` identifier.
  ///
  /// Saving content identical to what the tag already points at is a no-op.
  fn save(&self, credentials: &Credentials, tag: &str, image: &Image) -> Result<String, RegistryError>;
}
