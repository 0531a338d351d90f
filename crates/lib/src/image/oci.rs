//! OCI image-spec documents: manifests, config files and indexes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::hash::{Digest, Hashable};

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Annotation naming a manifest within an image layout index.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

const SCHEMA_VERSION: u32 = 2;

/// A content descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
  pub media_type: String,
  pub digest: Digest,
  pub size: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
  pub fn new(media_type: &str, digest: Digest, size: u64) -> Self {
    Self {
      media_type: media_type.to_string(),
      digest,
      size,
      annotations: None,
    }
  }

  pub fn annotation(&self, key: &str) -> Option<&str> {
    self.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str)
  }
}

/// An image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
  pub schema_version: u32,
  pub media_type: String,
  pub config: Descriptor,
  pub layers: Vec<Descriptor>,
}

impl Manifest {
  pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
    Self {
      schema_version: SCHEMA_VERSION,
      media_type: MANIFEST_MEDIA_TYPE.to_string(),
      config,
      layers,
    }
  }
}

impl Hashable for Manifest {}

/// The image configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
  pub architecture: String,
  pub os: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created: Option<String>,
  #[serde(default)]
  pub config: ContainerConfig,
  pub rootfs: RootFs,
}

impl Hashable for ConfigFile {}

/// Runtime settings carried in the image config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
  #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
  pub env: Vec<String>,
  #[serde(rename = "User", default, skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
  #[serde(rename = "WorkingDir", default, skip_serializing_if = "Option::is_none")]
  pub working_dir: Option<String>,
  #[serde(rename = "Labels", default, skip_serializing_if = "BTreeMap::is_empty")]
  pub labels: BTreeMap<String, String>,
}

/// Uncompressed layer digests, in layer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
  #[serde(rename = "type")]
  pub kind: String,
  pub diff_ids: Vec<Digest>,
}

impl RootFs {
  pub fn layers(diff_ids: Vec<Digest>) -> Self {
    Self {
      kind: "layers".to_string(),
      diff_ids,
    }
  }
}

/// An image index, as stored at the root of an image layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
  pub schema_version: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub media_type: Option<String>,
  pub manifests: Vec<Descriptor>,
}

impl Default for Index {
  fn default() -> Self {
    Self {
      schema_version: SCHEMA_VERSION,
      media_type: Some(INDEX_MEDIA_TYPE.to_string()),
      manifests: Vec::new(),
    }
  }
}

impl Index {
  /// Sort manifests by reference name so rewrites are stable.
  pub fn sort_manifests(&mut self) {
    self.manifests.sort_by(|a, b| {
      let a_name = a.annotation(ANNOTATION_REF_NAME).unwrap_or_default();
      let b_name = b.annotation(ANNOTATION_REF_NAME).unwrap_or_default();
      a_name.cmp(b_name).then_with(|| a.digest.cmp(&b.digest))
    });
  }
}
