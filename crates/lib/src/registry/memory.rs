//! Process-local registry.
//!
//! Keeps images per repository, with tags pointing at manifest digests.
//! Repositories can require specific credentials, and the registry counts
//! lookups, successful fetches and uploads so callers can assert on traffic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use super::{Registry, RegistryError};
use crate::image::layer::StaticLayer;
use crate::image::reference::ImageReference;
use crate::image::{Image, Layer};
use crate::keychain::Credentials;
use crate::util::hash::Digest;

#[derive(Default)]
struct Repository {
  tags: BTreeMap<String, Digest>,
  manifests: BTreeMap<Digest, Image>,
}

#[derive(Default)]
pub struct InMemoryRegistry {
  repositories: Mutex<BTreeMap<String, Repository>>,
  auth: BTreeMap<String, Credentials>,
  lookups: AtomicUsize,
  fetches: AtomicUsize,
  uploads: AtomicUsize,
}

impl InMemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Require `credentials` for every access to `repository`.
  pub fn with_credentials(mut self, repository: impl Into<String>, credentials: Credentials) -> Self {
    self.auth.insert(repository.into(), credentials);
    self
  }

  /// Seed an image without auth checks or traffic accounting.
  pub fn insert(&self, reference: &str, image: Image) -> Result<String, RegistryError> {
    let reference = parse(reference)?;
    let digest = image.digest()?;
    let mut repositories = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
    let repository = repositories.entry(reference.repository.clone()).or_default();
    repository.tags.insert(reference.tag_or_default().to_string(), digest.clone());
    repository.manifests.insert(digest.clone(), image);
    Ok(reference.identifier(&digest))
  }

  /// Number of fetch attempts, successful or not.
  pub fn lookups(&self) -> usize {
    self.lookups.load(Ordering::SeqCst)
  }

  /// Number of fetches that returned an image.
  pub fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  /// Number of saves that wrote new content.
  pub fn uploads(&self) -> usize {
    self.uploads.load(Ordering::SeqCst)
  }

  fn authorize(&self, repository: &str, credentials: &Credentials) -> Result<(), RegistryError> {
    match self.auth.get(repository) {
      Some(required) if required != credentials => Err(RegistryError::Unauthorized(repository.to_string())),
      _ => Ok(()),
    }
  }
}

impl Registry for InMemoryRegistry {
  fn fetch(&self, credentials: &Credentials, reference: &str) -> Result<(Image, String), RegistryError> {
    self.lookups.fetch_add(1, Ordering::SeqCst);
    let parsed = parse(reference)?;
    self.authorize(&parsed.repository, credentials)?;

    let repositories = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
    let repository = repositories
      .get(&parsed.repository)
      .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;

    let digest = match &parsed.digest {
      Some(digest) => digest,
      None => repository
        .tags
        .get(parsed.tag_or_default())
        .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?,
    };
    let image = repository
      .manifests
      .get(digest)
      .ok_or_else(|| RegistryError::NotFound(reference.to_string()))?;

    self.fetches.fetch_add(1, Ordering::SeqCst);
    debug!(reference, digest = %digest.short(), "fetched image");
    Ok((image.clone(), parsed.identifier(digest)))
  }

  fn save(&self, credentials: &Credentials, tag: &str, image: &Image) -> Result<String, RegistryError> {
    let parsed = parse(tag)?;
    self.authorize(&parsed.repository, credentials)?;
    let digest = image.digest()?;
    let identifier = parsed.identifier(&digest);

    {
      let repositories = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
      let current = repositories
        .get(&parsed.repository)
        .and_then(|r| r.tags.get(parsed.tag_or_default()));
      if current == Some(&digest) {
        debug!(tag, digest = %digest.short(), "image unchanged, skipping upload");
        return Ok(identifier);
      }
    }

    // Lazy layers may call back into this registry, so read them unlocked.
    let mut layers = Vec::with_capacity(image.layers().len());
    for layer in image.layers() {
      let copy = StaticLayer::materialize(layer.as_ref()).map_err(|source| RegistryError::Layer {
        digest: layer.digest(),
        source,
      })?;
      layers.push(copy.into_handle());
    }
    let stored = Image::from_parts(image.config().clone(), layers);

    let mut repositories = self.repositories.lock().unwrap_or_else(PoisonError::into_inner);
    let repository = repositories.entry(parsed.repository.clone()).or_default();
    repository.tags.insert(parsed.tag_or_default().to_string(), digest.clone());
    repository.manifests.insert(digest.clone(), stored);
    self.uploads.fetch_add(1, Ordering::SeqCst);

    info!(tag, digest = %digest.short(), "saved image");
    Ok(identifier)
  }
}

fn parse(reference: &str) -> Result<ImageReference, RegistryError> {
  ImageReference::parse(reference).map_err(|source| RegistryError::Reference {
    reference: reference.to_string(),
    source,
  })
}
