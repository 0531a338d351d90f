//! Image layers.
//!
//! Every layer knows its digest, diff-id and size up front; only the bytes may
//! be expensive to obtain. Two implementations live here:
//! - [`StaticLayer`]: bytes held in memory (generated layers, test fixtures)
//! - [`RemoteLayer`]: bytes fetched from a registry on first use, at most once

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use thiserror::Error;
use tracing::debug;

use crate::keychain::Credentials;
use crate::registry::{Registry, RegistryError};
use crate::util::hash::Digest;

/// Shared handle to a layer.
pub type LayerHandle = Arc<dyn Layer>;

/// Errors that can occur while reading layer content.
///
/// Cloneable so a lazy layer can hand out its memoized failure repeatedly.
#[derive(Debug, Clone, Error)]
pub enum LayerError {
  /// The image holding the layer could not be fetched.
  #[error("failed to fetch layer {digest} from '{image}': {source}")]
  Fetch {
    image: String,
    digest: Digest,
    #[source]
    source: Arc<RegistryError>,
  },

  /// The fetched image has no layer with the expected digest.
  #[error("image '{image}' does not contain layer {digest}")]
  NotInImage { image: String, digest: Digest },

  /// Fetched bytes do not hash to the expected digest.
  #[error("layer content mismatch: expected {expected}, got {actual}")]
  DigestMismatch { expected: Digest, actual: Digest },

  /// Compressed bytes could not be decompressed.
  #[error("failed to decompress layer {digest}: {source}")]
  Decompress {
    digest: Digest,
    #[source]
    source: Arc<io::Error>,
  },

  /// A blob could not be read from local storage.
  #[error("failed to read layer {digest} from {}: {source}", .path.display())]
  Read {
    digest: Digest,
    path: PathBuf,
    #[source]
    source: Arc<io::Error>,
  },
}

/// A content-addressed unit of image filesystem content.
pub trait Layer: Send + Sync + fmt::Debug {
  /// Digest of the compressed blob.
  fn digest(&self) -> Digest;

  /// Digest of the uncompressed tar stream.
  fn diff_id(&self) -> Digest;

  /// Size of the compressed blob in bytes.
  fn size(&self) -> u64;

  /// Compressed (gzip) blob.
  fn compressed(&self) -> Result<Arc<Vec<u8>>, LayerError>;

  /// Uncompressed tar stream, derived from the compressed blob.
  fn uncompressed(&self) -> Result<Vec<u8>, LayerError> {
    let compressed = self.compressed()?;
    gunzip(&compressed).map_err(|source| LayerError::Decompress {
      digest: self.digest(),
      source: Arc::new(source),
    })
  }
}

/// Gzip a tar stream with a fixed header so identical input yields identical output.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
  let mut encoder = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
  encoder.write_all(data)?;
  encoder.finish()
}

pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
  let mut decoder = GzDecoder::new(data);
  let mut out = Vec::new();
  decoder.read_to_end(&mut out)?;
  Ok(out)
}

/// A layer whose compressed bytes are held in memory.
#[derive(Clone)]
pub struct StaticLayer {
  digest: Digest,
  diff_id: Digest,
  compressed: Arc<Vec<u8>>,
}

impl StaticLayer {
  /// Build a layer from an uncompressed tar stream.
  pub fn from_tar(tar: &[u8]) -> io::Result<Self> {
    let compressed = gzip(tar)?;
    Ok(Self {
      digest: Digest::of_bytes(&compressed),
      diff_id: Digest::of_bytes(tar),
      compressed: Arc::new(compressed),
    })
  }

  /// Build a layer from an already-compressed blob.
  pub fn from_compressed(compressed: Vec<u8>) -> io::Result<Self> {
    let tar = gunzip(&compressed)?;
    Ok(Self {
      digest: Digest::of_bytes(&compressed),
      diff_id: Digest::of_bytes(&tar),
      compressed: Arc::new(compressed),
    })
  }

  /// Copy another layer's bytes into memory, forcing a fetch if it is lazy.
  pub fn materialize(layer: &dyn Layer) -> Result<Self, LayerError> {
    Ok(Self {
      digest: layer.digest(),
      diff_id: layer.diff_id(),
      compressed: layer.compressed()?,
    })
  }

  pub fn into_handle(self) -> LayerHandle {
    Arc::new(self)
  }
}

impl fmt::Debug for StaticLayer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StaticLayer")
      .field("digest", &self.digest)
      .field("diff_id", &self.diff_id)
      .field("size", &self.compressed.len())
      .finish()
  }
}

impl Layer for StaticLayer {
  fn digest(&self) -> Digest {
    self.digest.clone()
  }

  fn diff_id(&self) -> Digest {
    self.diff_id.clone()
  }

  fn size(&self) -> u64 {
    self.compressed.len() as u64
  }

  fn compressed(&self) -> Result<Arc<Vec<u8>>, LayerError> {
    Ok(Arc::clone(&self.compressed))
  }
}

/// A layer living in a remote image, fetched lazily.
///
/// The registry is contacted on the first request for bytes; the outcome
/// (bytes or failure) is kept for the lifetime of the handle.
pub struct RemoteLayer {
  registry: Arc<dyn Registry>,
  credentials: Credentials,
  image: String,
  digest: Digest,
  diff_id: Digest,
  size: u64,
  blob: OnceLock<Result<Arc<Vec<u8>>, LayerError>>,
}

impl RemoteLayer {
  pub fn new(
    registry: Arc<dyn Registry>,
    credentials: Credentials,
    image: impl Into<String>,
    digest: Digest,
    diff_id: Digest,
    size: u64,
  ) -> Self {
    Self {
      registry,
      credentials,
      image: image.into(),
      digest,
      diff_id,
      size,
      blob: OnceLock::new(),
    }
  }

  /// The image this layer is read from.
  pub fn image(&self) -> &str {
    &self.image
  }

  fn fetch(&self) -> Result<Arc<Vec<u8>>, LayerError> {
    debug!(image = %self.image, digest = %self.digest.short(), "fetching remote layer");

    let (image, _) = self
      .registry
      .fetch(&self.credentials, &self.image)
      .map_err(|source| LayerError::Fetch {
        image: self.image.clone(),
        digest: self.digest.clone(),
        source: Arc::new(source),
      })?;

    let layer = image
      .layers()
      .iter()
      .find(|l| l.digest() == self.digest)
      .ok_or_else(|| LayerError::NotInImage {
        image: self.image.clone(),
        digest: self.digest.clone(),
      })?;

    let blob = layer.compressed()?;
    let actual = Digest::of_bytes(&blob);
    if actual != self.digest {
      return Err(LayerError::DigestMismatch {
        expected: self.digest.clone(),
        actual,
      });
    }

    Ok(blob)
  }
}

impl fmt::Debug for RemoteLayer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RemoteLayer")
      .field("image", &self.image)
      .field("digest", &self.digest)
      .field("diff_id", &self.diff_id)
      .field("size", &self.size)
      .field("fetched", &self.blob.get().is_some())
      .finish()
  }
}

impl Layer for RemoteLayer {
  fn digest(&self) -> Digest {
    self.digest.clone()
  }

  fn diff_id(&self) -> Digest {
    self.diff_id.clone()
  }

  fn size(&self) -> u64 {
    self.size
  }

  fn compressed(&self) -> Result<Arc<Vec<u8>>, LayerError> {
    self.blob.get_or_init(|| self.fetch()).clone()
  }
}
