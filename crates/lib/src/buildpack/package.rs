//! Buildpack-package images.
//!
//! A package image carries one layer per buildpack plus two labels:
//! - `io.buildpacks.buildpackage.metadata`: the primary buildpack
//! - `io.buildpacks.buildpack.layers`: `{id: {version: layer info}}` for
//!   every buildpack in the package
//!
//! [`read_package`] turns such an image into buildpack records;
//! [`PackageReader`] fetches package images and aggregates them into source
//! objects; [`PackageBuilder`] produces package images.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::source::SourceObject;
use super::types::{BuildpackLayerInfo, BuildpackRecord, ObjectKind, StackSupport};
use crate::consts::{BUILDPACK_LAYERS_LABEL, BUILDPACKAGE_METADATA_LABEL};
use crate::image::layer::LayerHandle;
use crate::image::reference::{ImageReference, ReferenceError};
use crate::image::{Image, ImageConfig};
use crate::keychain::{CredentialTarget, Keychain, KeychainError, SecretRef};
use crate::registry::{Registry, RegistryError};
use crate::util::hash::Digest;

/// `{id: {version: info}}`, the layers label document.
pub type BuildpackLayers = BTreeMap<String, BTreeMap<String, BuildpackLayerInfo>>;

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("invalid buildpackage reference '{image}': {source}")]
  Reference {
    image: String,
    #[source]
    source: ReferenceError,
  },

  #[error("failed to get credentials for buildpackage '{image}': {source}")]
  Credentials {
    image: String,
    #[source]
    source: KeychainError,
  },

  #[error("unable to fetch buildpackage image '{image}': {source}")]
  Fetch {
    image: String,
    #[source]
    source: RegistryError,
  },

  #[error("buildpackage '{image}' has no '{label}' label")]
  MissingLabel { image: String, label: &'static str },

  #[error("buildpackage '{image}' has an invalid '{label}' label: {source}")]
  InvalidLabel {
    image: String,
    label: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("buildpackage '{image}' has no layer {diff_id} for buildpack '{id}@{version}'")]
  MissingLayer {
    image: String,
    id: String,
    version: String,
    diff_id: Digest,
  },

  #[error("buildpackage '{image}' does not contain its primary buildpack '{id}@{version}'")]
  MissingPrimary { image: String, id: String, version: String },
}

/// The primary buildpack of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackageMetadata {
  pub id: String,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stacks: Vec<StackSupport>,
}

/// Read every buildpack a package image carries.
///
/// `identifier` is the package's `repository@digest`; records point at it.
pub fn read_package(image: &Image, identifier: &str) -> Result<Vec<BuildpackRecord>, PackageError> {
  let metadata: BuildpackageMetadata = label(image, identifier, BUILDPACKAGE_METADATA_LABEL)?;
  let layers: BuildpackLayers = label(image, identifier, BUILDPACK_LAYERS_LABEL)?;

  let has_primary = layers
    .get(&metadata.id)
    .is_some_and(|versions| versions.contains_key(&metadata.version));
  if !has_primary {
    return Err(PackageError::MissingPrimary {
      image: identifier.to_string(),
      id: metadata.id,
      version: metadata.version,
    });
  }

  let mut records = Vec::new();
  for (id, versions) in layers {
    for (version, info) in versions {
      let layer = image
        .layers()
        .iter()
        .find(|l| l.diff_id() == info.layer_diff_id)
        .ok_or_else(|| PackageError::MissingLayer {
          image: identifier.to_string(),
          id: id.clone(),
          version: version.clone(),
          diff_id: info.layer_diff_id.clone(),
        })?;

      records.push(BuildpackRecord {
        id: id.clone(),
        version,
        digest: layer.digest(),
        diff_id: info.layer_diff_id,
        size: layer.size(),
        homepage: info.homepage,
        api: info.api,
        stacks: info.stacks,
        order: info.order,
        image: identifier.to_string(),
      });
    }
  }

  debug!(image = identifier, primary = %metadata.id, buildpacks = records.len(), "read buildpackage");
  Ok(records)
}

fn label<T: serde::de::DeserializeOwned>(
  image: &Image,
  identifier: &str,
  label: &'static str,
) -> Result<T, PackageError> {
  let raw = image.label(label).ok_or_else(|| PackageError::MissingLabel {
    image: identifier.to_string(),
    label,
  })?;
  serde_json::from_str(raw).map_err(|source| PackageError::InvalidLabel {
    image: identifier.to_string(),
    label,
    source,
  })
}

/// Fetches package images and turns them into source objects.
pub struct PackageReader {
  registry: Arc<dyn Registry>,
  keychain: Arc<dyn Keychain>,
}

impl PackageReader {
  pub fn new(registry: Arc<dyn Registry>, keychain: Arc<dyn Keychain>) -> Self {
    Self { registry, keychain }
  }

  /// Fetch one package image and read its records.
  pub fn read(&self, reference: &str, secret: Option<&SecretRef>) -> Result<Vec<BuildpackRecord>, PackageError> {
    let parsed = ImageReference::parse(reference).map_err(|source| PackageError::Reference {
      image: reference.to_string(),
      source,
    })?;
    let credentials = self
      .keychain
      .credentials(CredentialTarget::new(secret, parsed.registry()))
      .map_err(|source| PackageError::Credentials {
        image: reference.to_string(),
        source,
      })?;
    let (image, identifier) = self
      .registry
      .fetch(&credentials, reference)
      .map_err(|source| PackageError::Fetch {
        image: reference.to_string(),
        source,
      })?;
    read_package(&image, &identifier)
  }

  /// Build a source object from several packages, in order.
  ///
  /// A repeated `id@version` keeps its first occurrence.
  pub fn source_object(
    &self,
    kind: ObjectKind,
    name: &str,
    images: &[String],
    secret: Option<SecretRef>,
  ) -> Result<SourceObject, PackageError> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for image in images {
      for record in self.read(image, secret.as_ref())? {
        if seen.insert(record.identity()) {
          records.push(record);
        } else {
          warn!(
            object = name,
            image = %image,
            buildpack = %record.identity(),
            "duplicate buildpack in source, keeping the first"
          );
        }
      }
    }

    let mut object = SourceObject::new(kind, name).with_buildpacks(records);
    object.secret = secret;
    Ok(object)
  }
}

/// Assembles a buildpack-package image.
///
/// The first buildpack added is the primary unless [`PackageBuilder::primary`]
/// names another.
pub struct PackageBuilder {
  image: Image,
  layers: BuildpackLayers,
  primary: Option<BuildpackageMetadata>,
}

impl PackageBuilder {
  pub fn new(config: ImageConfig) -> Self {
    Self {
      image: Image::new(config),
      layers: BuildpackLayers::new(),
      primary: None,
    }
  }

  /// Add a buildpack. Digest fields of `record` are ignored; the layer decides them.
  pub fn buildpack(mut self, record: &BuildpackRecord, layer: LayerHandle) -> Self {
    let info = BuildpackLayerInfo {
      layer_diff_id: layer.diff_id(),
      ..record.layer_info()
    };
    self
      .layers
      .entry(record.id.clone())
      .or_default()
      .insert(record.version.clone(), info);
    if self.primary.is_none() {
      self.primary = Some(metadata(record));
    }
    self.image.push_layer(layer);
    self
  }

  pub fn primary(mut self, record: &BuildpackRecord) -> Self {
    self.primary = Some(metadata(record));
    self
  }

  pub fn build(self) -> Result<Image, serde_json::Error> {
    let mut image = self.image;
    if let Some(primary) = &self.primary {
      image.set_label(BUILDPACKAGE_METADATA_LABEL, serde_json::to_string(primary)?);
    }
    image.set_label(BUILDPACK_LAYERS_LABEL, serde_json::to_string(&self.layers)?);
    Ok(image)
  }
}

fn metadata(record: &BuildpackRecord) -> BuildpackageMetadata {
  BuildpackageMetadata {
    id: record.id.clone(),
    version: record.version.clone(),
    homepage: record.homepage.clone(),
    stacks: record.stacks.clone(),
  }
}
