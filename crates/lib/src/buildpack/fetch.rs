//! Turning resolved buildpacks into layers.
//!
//! A leaf buildpack becomes one lazily fetched layer. A meta-buildpack
//! re-enters the resolver for every member of its order groups, fetches each
//! of them, and appends its own layer after all of its children's.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::resolve::{BuildpackResolver, ResolveError, ResolvedBuildpack};
use super::types::BuildpackRecord;
use crate::image::layer::{LayerHandle, RemoteLayer};
use crate::image::reference::{ImageReference, ReferenceError};
use crate::keychain::{CredentialTarget, Keychain, KeychainError};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum FetchError {
  /// A nested resolution failed; the error is passed through unchanged.
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("cycle detected in buildpack order: {chain}")]
  Cycle { chain: String },

  #[error("failed to get credentials for buildpack '{buildpack}': {source}")]
  Credentials {
    buildpack: String,
    #[source]
    source: KeychainError,
  },

  #[error("invalid image '{image}' for buildpack '{buildpack}': {source}")]
  Reference {
    buildpack: String,
    image: String,
    #[source]
    source: ReferenceError,
  },
}

/// A buildpack record with the layer that carries it.
#[derive(Debug, Clone)]
pub struct BuildpackLayer {
  pub record: BuildpackRecord,
  pub layer: LayerHandle,
}

pub struct RemoteBuildpackFetcher {
  registry: Arc<dyn Registry>,
  keychain: Arc<dyn Keychain>,
}

impl RemoteBuildpackFetcher {
  pub fn new(registry: Arc<dyn Registry>, keychain: Arc<dyn Keychain>) -> Self {
    Self { registry, keychain }
  }

  /// Flatten a resolved buildpack into layers, children before parents.
  pub fn fetch(
    &self,
    resolver: &BuildpackResolver,
    buildpack: &ResolvedBuildpack,
  ) -> Result<Vec<BuildpackLayer>, FetchError> {
    let mut path = Vec::new();
    let mut layers = Vec::new();
    self.collect(resolver, buildpack, &mut path, &mut layers)?;
    Ok(layers)
  }

  fn collect(
    &self,
    resolver: &BuildpackResolver,
    buildpack: &ResolvedBuildpack,
    path: &mut Vec<String>,
    layers: &mut Vec<BuildpackLayer>,
  ) -> Result<(), FetchError> {
    let identity = buildpack.record.identity();
    if path.contains(&identity) {
      path.push(identity);
      return Err(FetchError::Cycle { chain: path.join(" -> ") });
    }

    path.push(identity);
    for entry in buildpack.record.order.iter().flat_map(|o| &o.group) {
      let child = resolver.resolve(&entry.reference)?;
      self.collect(resolver, &child, path, layers)?;
    }
    path.pop();

    layers.push(BuildpackLayer {
      record: buildpack.record.clone(),
      layer: self.layer(buildpack)?,
    });
    Ok(())
  }

  fn layer(&self, buildpack: &ResolvedBuildpack) -> Result<LayerHandle, FetchError> {
    let record = &buildpack.record;
    let reference = ImageReference::parse(&record.image).map_err(|source| FetchError::Reference {
      buildpack: record.identity(),
      image: record.image.clone(),
      source,
    })?;

    let target = CredentialTarget::new(buildpack.secret.as_ref(), reference.registry());
    let credentials = self
      .keychain
      .credentials(target)
      .map_err(|source| FetchError::Credentials {
        buildpack: record.identity(),
        source,
      })?;

    debug!(
      id = %record.id,
      version = %record.version,
      image = %record.image,
      digest = %record.digest.short(),
      "prepared buildpack layer"
    );
    Ok(Arc::new(RemoteLayer::new(
      Arc::clone(&self.registry),
      credentials,
      record.image.clone(),
      record.digest.clone(),
      record.diff_id.clone(),
      record.size,
    )))
  }
}
