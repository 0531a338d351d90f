//! The lifecycle layer and the APIs it supports.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{LIFECYCLE_APIS_LABEL, LIFECYCLE_VERSION_LABEL};
use crate::image::layer::LayerHandle;
use crate::keychain::Credentials;
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("unable to fetch lifecycle image '{image}': {source}")]
  Fetch {
    image: String,
    #[source]
    source: RegistryError,
  },

  #[error("lifecycle image '{image}' does not provide os '{os}'")]
  UnsupportedOs { image: String, os: String },

  #[error("lifecycle image '{image}' has no '{label}' label")]
  MissingLabel { image: String, label: &'static str },

  #[error("lifecycle image '{image}' has an invalid '{label}' label: {source}")]
  InvalidLabel {
    image: String,
    label: &'static str,
    #[source]
    source: serde_json::Error,
  },

  #[error("lifecycle image '{image}' has no layers")]
  MissingLayer { image: String },

  #[error("lifecycle image '{image}' declares no supported {kind} api")]
  NoSupportedApi { image: String, kind: &'static str },
}

/// Current buildpack and platform API of a lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleApi {
  pub buildpack: String,
  pub platform: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersions {
  #[serde(default)]
  pub deprecated: Vec<String>,
  #[serde(default)]
  pub supported: Vec<String>,
}

/// Content of the `io.buildpacks.lifecycle.apis` label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleApis {
  pub buildpack: ApiVersions,
  pub platform: ApiVersions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleMetadata {
  pub version: String,
  pub api: LifecycleApi,
  pub apis: Option<LifecycleApis>,
}

impl LifecycleMetadata {
  /// Buildpack APIs a builder using this lifecycle accepts.
  pub fn buildpack_apis(&self) -> BTreeSet<String> {
    match &self.apis {
      Some(apis) => apis
        .buildpack
        .deprecated
        .iter()
        .chain(&apis.buildpack.supported)
        .cloned()
        .collect(),
      None => BTreeSet::from([self.api.buildpack.clone()]),
    }
  }
}

/// Supplies the lifecycle layer for a target OS.
pub trait LifecycleProvider: Send + Sync {
  fn layer_for_os(&self, os: &str) -> Result<(LayerHandle, LifecycleMetadata), LifecycleError>;
}

/// Reads the lifecycle from an image: its last layer plus its labels.
pub struct ImageLifecycleProvider {
  registry: Arc<dyn Registry>,
  credentials: Credentials,
  image: String,
}

impl ImageLifecycleProvider {
  pub fn new(registry: Arc<dyn Registry>, credentials: Credentials, image: impl Into<String>) -> Self {
    Self {
      registry,
      credentials,
      image: image.into(),
    }
  }
}

impl LifecycleProvider for ImageLifecycleProvider {
  fn layer_for_os(&self, os: &str) -> Result<(LayerHandle, LifecycleMetadata), LifecycleError> {
    let (image, identifier) =
      self
        .registry
        .fetch(&self.credentials, &self.image)
        .map_err(|source| LifecycleError::Fetch {
          image: self.image.clone(),
          source,
        })?;

    if image.os() != os {
      return Err(LifecycleError::UnsupportedOs {
        image: identifier,
        os: os.to_string(),
      });
    }

    let version = image
      .label(LIFECYCLE_VERSION_LABEL)
      .ok_or_else(|| LifecycleError::MissingLabel {
        image: identifier.clone(),
        label: LIFECYCLE_VERSION_LABEL,
      })?
      .to_string();

    let raw = image.label(LIFECYCLE_APIS_LABEL).ok_or_else(|| LifecycleError::MissingLabel {
      image: identifier.clone(),
      label: LIFECYCLE_APIS_LABEL,
    })?;
    let apis: LifecycleApis = serde_json::from_str(raw).map_err(|source| LifecycleError::InvalidLabel {
      image: identifier.clone(),
      label: LIFECYCLE_APIS_LABEL,
      source,
    })?;

    let newest = |versions: &ApiVersions, kind: &'static str| {
      versions
        .supported
        .last()
        .cloned()
        .ok_or_else(|| LifecycleError::NoSupportedApi {
          image: identifier.clone(),
          kind,
        })
    };
    let api = LifecycleApi {
      buildpack: newest(&apis.buildpack, "buildpack")?,
      platform: newest(&apis.platform, "platform")?,
    };

    let layer = image
      .layers()
      .last()
      .cloned()
      .ok_or_else(|| LifecycleError::MissingLayer {
        image: identifier.clone(),
      })?;

    debug!(image = %identifier, version = %version, os, "loaded lifecycle");
    Ok((
      layer,
      LifecycleMetadata {
        version,
        api,
        apis: Some(apis),
      },
    ))
  }
}
