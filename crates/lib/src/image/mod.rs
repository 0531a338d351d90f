//! Container images as the engine sees them.
//!
//! An [`Image`] is a config plus an ordered list of layer handles. Its digest is
//! the digest of its OCI manifest, which depends only on the config and the
//! layer digests, so two images with the same content always share a digest.
//!
//! # Modules
//!
//! - [`layer`] - layer trait, in-memory and lazily fetched layers
//! - [`archive`] - deterministic tar construction for generated layers
//! - [`reference`] - `repository[:tag][@digest]` parsing
//! - [`oci`] - manifest, config and index documents

pub mod archive;
pub mod layer;
pub mod oci;
pub mod reference;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::NORMALIZED_CREATED;
use crate::util::hash::{Digest, Hashable};

pub use layer::{Layer, LayerError, LayerHandle};

#[derive(Debug, Error)]
pub enum ImageError {
  #[error("failed to serialize image document: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// The mutable part of an image: platform, runtime settings and labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
  pub os: String,
  pub architecture: String,
  #[serde(default)]
  pub env: Vec<String>,
  #[serde(default)]
  pub user: Option<String>,
  #[serde(default)]
  pub working_dir: Option<String>,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
}

impl From<oci::ConfigFile> for ImageConfig {
  fn from(file: oci::ConfigFile) -> Self {
    Self {
      os: file.os,
      architecture: file.architecture,
      env: file.config.env,
      user: file.config.user,
      working_dir: file.config.working_dir,
      labels: file.config.labels,
    }
  }
}

/// An image: config plus ordered layers.
#[derive(Debug, Clone)]
pub struct Image {
  config: ImageConfig,
  layers: Vec<LayerHandle>,
}

impl Image {
  pub fn new(config: ImageConfig) -> Self {
    Self {
      config,
      layers: Vec::new(),
    }
  }

  pub fn from_parts(config: ImageConfig, layers: Vec<LayerHandle>) -> Self {
    Self { config, layers }
  }

  pub fn with_layer(mut self, layer: LayerHandle) -> Self {
    self.layers.push(layer);
    self
  }

  pub fn push_layer(&mut self, layer: LayerHandle) {
    self.layers.push(layer);
  }

  pub fn config(&self) -> &ImageConfig {
    &self.config
  }

  pub fn config_mut(&mut self) -> &mut ImageConfig {
    &mut self.config
  }

  pub fn os(&self) -> &str {
    &self.config.os
  }

  pub fn layers(&self) -> &[LayerHandle] {
    &self.layers
  }

  pub fn label(&self, key: &str) -> Option<&str> {
    self.config.labels.get(key).map(String::as_str)
  }

  pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.config.labels.insert(key.into(), value.into());
  }

  /// Value of an environment variable from the config's `KEY=value` list.
  pub fn env(&self, name: &str) -> Option<&str> {
    self
      .config
      .env
      .iter()
      .filter_map(|entry| entry.split_once('='))
      .find(|(key, _)| *key == name)
      .map(|(_, value)| value)
  }

  /// The OCI config document for this image.
  pub fn config_file(&self) -> oci::ConfigFile {
    oci::ConfigFile {
      architecture: self.config.architecture.clone(),
      os: self.config.os.clone(),
      created: Some(NORMALIZED_CREATED.to_string()),
      config: oci::ContainerConfig {
        env: self.config.env.clone(),
        user: self.config.user.clone(),
        working_dir: self.config.working_dir.clone(),
        labels: self.config.labels.clone(),
      },
      rootfs: oci::RootFs::layers(self.layers.iter().map(|l| l.diff_id()).collect()),
    }
  }

  /// Serialized config blob, exactly as referenced by [`Image::manifest`].
  pub fn config_blob(&self) -> Result<Vec<u8>, ImageError> {
    Ok(serde_json::to_vec(&self.config_file())?)
  }

  pub fn manifest(&self) -> Result<oci::Manifest, ImageError> {
    let config_blob = self.config_blob()?;
    let config = oci::Descriptor::new(
      oci::CONFIG_MEDIA_TYPE,
      Digest::of_bytes(&config_blob),
      config_blob.len() as u64,
    );
    let layers = self
      .layers
      .iter()
      .map(|l| oci::Descriptor::new(oci::LAYER_MEDIA_TYPE, l.digest(), l.size()))
      .collect();
    Ok(oci::Manifest::new(config, layers))
  }

  /// Manifest digest: the image's identity.
  pub fn digest(&self) -> Result<Digest, ImageError> {
    Ok(self.manifest()?.compute_digest()?)
  }
}
