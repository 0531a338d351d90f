//! End-to-end builder composition: resolve, fetch, validate, compose, save.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::image::{BuilderError, BuilderImage, GroupMember};
use crate::buildpack::fetch::{FetchError, RemoteBuildpackFetcher};
use crate::buildpack::resolve::{BuildpackResolver, ResolveError};
use crate::buildpack::source::Provenance;
use crate::buildpack::types::{BuildpackInfo, OrderEntry};
use crate::image::Image;
use crate::image::reference::{ImageReference, ReferenceError};
use crate::keychain::{CredentialTarget, Credentials, Keychain, KeychainError, SecretRef};
use crate::lifecycle::LifecycleProvider;
use crate::registry::{Registry, RegistryError};
use crate::stack::StackSpec;

#[derive(Debug, Error)]
pub enum ComposeError {
  #[error("unable to fetch {what} image '{reference}': {source}")]
  FetchImage {
    what: &'static str,
    reference: String,
    #[source]
    source: RegistryError,
  },

  #[error("unable to save builder image '{tag}': {source}")]
  SaveImage {
    tag: String,
    #[source]
    source: RegistryError,
  },

  #[error("invalid image reference '{reference}': {source}")]
  Reference {
    reference: String,
    #[source]
    source: ReferenceError,
  },

  #[error("unable to get credentials for '{reference}': {source}")]
  Credentials {
    reference: String,
    #[source]
    source: KeychainError,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Builder(#[from] BuilderError),
}

/// What to build.
#[derive(Debug, Clone)]
pub struct BuilderSpec {
  /// Tag the finished image is saved under.
  pub tag: String,
  pub description: String,
  pub stack: StackSpec,
  /// Secret used for the stack images and for saving.
  pub secret: Option<SecretRef>,
  pub order: Vec<OrderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStack {
  pub id: String,
  pub run_image: String,
}

/// Summary of one composition run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderRecord {
  /// `repository@digest` of the saved image.
  pub image: String,
  pub stack: ResolvedStack,
  pub buildpacks: Vec<BuildpackInfo>,
  pub order: Vec<OrderEntry>,
  pub observed_stack_generation: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub observed_store_generation: Option<i64>,
  /// Objects that supplied buildpacks, first use first.
  pub sources: Vec<Provenance>,
}

pub struct BuilderComposer {
  registry: Arc<dyn Registry>,
  keychain: Arc<dyn Keychain>,
  lifecycle: Arc<dyn LifecycleProvider>,
  fetcher: RemoteBuildpackFetcher,
}

impl BuilderComposer {
  pub fn new(
    registry: Arc<dyn Registry>,
    keychain: Arc<dyn Keychain>,
    lifecycle: Arc<dyn LifecycleProvider>,
  ) -> Self {
    let fetcher = RemoteBuildpackFetcher::new(Arc::clone(&registry), Arc::clone(&keychain));
    Self {
      registry,
      keychain,
      lifecycle,
      fetcher,
    }
  }

  /// Compose the builder described by `spec` and save it under `spec.tag`.
  ///
  /// Any failure aborts the run; nothing is saved unless every step succeeds.
  pub fn compose(&self, spec: &BuilderSpec, resolver: &BuildpackResolver) -> Result<BuilderRecord, ComposeError> {
    let secret = spec.secret.as_ref();
    let (build, _) = self.fetch_image("build", &spec.stack.build_image, secret)?;
    let (run, run_identifier) = self.fetch_image("run", &spec.stack.run_image, secret)?;

    let mut builder = BuilderImage::new(spec.description.clone());
    builder.add_stack(&spec.stack, build, &run, &run_identifier)?;
    builder.add_lifecycle(self.lifecycle.as_ref())?;

    for entry in &spec.order {
      let mut members = Vec::with_capacity(entry.group.len());
      for member in &entry.group {
        let resolved = resolver.resolve(&member.reference)?;
        let layers = self.fetcher.fetch(resolver, &resolved)?;
        debug!(buildpack = %resolved.record.identity(), layers = layers.len(), "fetched group member");
        members.push(GroupMember {
          id: resolved.record.id.clone(),
          version: resolved.record.version.clone(),
          optional: member.optional,
          layers,
        });
      }
      builder.add_group(members)?;
    }

    let buildpacks = builder.buildpacks();
    let order = builder.order().to_vec();
    let image = builder.finalize()?;
    let identifier = self.save(spec, &image)?;

    let mut sources: Vec<Provenance> = Vec::new();
    for provenance in resolver.observed_sources() {
      if !sources.contains(&provenance) {
        sources.push(provenance);
      }
    }

    info!(tag = %spec.tag, image = %identifier, buildpacks = buildpacks.len(), "builder saved");
    Ok(BuilderRecord {
      image: identifier,
      stack: ResolvedStack {
        id: spec.stack.id.clone(),
        run_image: run_identifier,
      },
      buildpacks,
      order,
      observed_stack_generation: spec.stack.generation,
      observed_store_generation: resolver.store_generation(),
      sources,
    })
  }

  fn fetch_image(
    &self,
    what: &'static str,
    reference: &str,
    secret: Option<&SecretRef>,
  ) -> Result<(Image, String), ComposeError> {
    let credentials = self.credentials(reference, secret)?;
    self
      .registry
      .fetch(&credentials, reference)
      .map_err(|source| ComposeError::FetchImage {
        what,
        reference: reference.to_string(),
        source,
      })
  }

  fn save(&self, spec: &BuilderSpec, image: &Image) -> Result<String, ComposeError> {
    let credentials = self.credentials(&spec.tag, spec.secret.as_ref())?;
    self
      .registry
      .save(&credentials, &spec.tag, image)
      .map_err(|source| ComposeError::SaveImage {
        tag: spec.tag.clone(),
        source,
      })
  }

  fn credentials(&self, reference: &str, secret: Option<&SecretRef>) -> Result<Credentials, ComposeError> {
    let parsed = ImageReference::parse(reference).map_err(|source| ComposeError::Reference {
      reference: reference.to_string(),
      source,
    })?;
    self
      .keychain
      .credentials(CredentialTarget::new(secret, parsed.registry()))
      .map_err(|source| ComposeError::Credentials {
        reference: reference.to_string(),
        source,
      })
  }
}
