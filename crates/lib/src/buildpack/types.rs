//! Buildpack references, resolved records and order groups.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::hash::Digest;

/// Kinds of objects a buildpack can be sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
  Buildpack,
  ClusterBuildpack,
  ClusterStore,
}

impl fmt::Display for ObjectKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ObjectKind::Buildpack => "buildpack",
      ObjectKind::ClusterBuildpack => "cluster buildpack",
      ObjectKind::ClusterStore => "cluster store",
    };
    f.write_str(name)
  }
}

/// Pointer to a named source object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
  pub kind: ObjectKind,
  pub name: String,
}

impl ObjectReference {
  pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
    }
  }
}

/// A request for a buildpack.
///
/// Which fields are set decides how it is resolved: by source object, by id
/// (optionally pinned to a version), or by image, which is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackRef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<ObjectReference>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

impl BuildpackRef {
  /// Reference to a buildpack by id, highest version.
  pub fn id(id: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      ..Self::default()
    }
  }

  /// Reference to a buildpack by id and exact version.
  pub fn exact(id: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      id: Some(id.into()),
      version: Some(version.into()),
      ..Self::default()
    }
  }

  /// Reference to whatever single root buildpack a source object declares.
  pub fn source(kind: ObjectKind, name: impl Into<String>) -> Self {
    Self {
      source: Some(ObjectReference::new(kind, name)),
      ..Self::default()
    }
  }

  pub fn with_source(mut self, kind: ObjectKind, name: impl Into<String>) -> Self {
    self.source = Some(ObjectReference::new(kind, name));
    self
  }

  /// The id, treating an empty string as unset.
  pub fn id_str(&self) -> Option<&str> {
    self.id.as_deref().filter(|s| !s.is_empty())
  }

  /// The version, treating an empty string as unset.
  pub fn version_str(&self) -> Option<&str> {
    self.version.as_deref().filter(|s| !s.is_empty())
  }

  pub fn image_str(&self) -> Option<&str> {
    self.image.as_deref().filter(|s| !s.is_empty())
  }
}

impl fmt::Display for BuildpackRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.id_str(), self.version_str(), &self.source) {
      (Some(id), Some(version), _) => write!(f, "{}@{}", id, version),
      (Some(id), None, _) => write!(f, "{}", id),
      (None, _, Some(source)) => write!(f, "{} '{}'", source.kind, source.name),
      (None, _, None) => match self.image_str() {
        Some(image) => write!(f, "image '{}'", image),
        None => f.write_str("<empty>"),
      },
    }
  }
}

fn is_false(value: &bool) -> bool {
  !*value
}

/// One member of an order group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
  #[serde(flatten)]
  pub reference: BuildpackRef,
  #[serde(default, skip_serializing_if = "is_false")]
  pub optional: bool,
}

impl GroupEntry {
  pub fn new(reference: BuildpackRef, optional: bool) -> Self {
    Self { reference, optional }
  }
}

/// An ordered group of buildpacks that run together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
  pub group: Vec<GroupEntry>,
}

/// A stack a buildpack declares support for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSupport {
  pub id: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub mixins: Vec<String>,
}

impl StackSupport {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      mixins: Vec::new(),
    }
  }

  pub fn with_mixins(mut self, mixins: &[&str]) -> Self {
    self.mixins = mixins.iter().map(|m| m.to_string()).collect();
    self
  }
}

/// A resolved buildpack with its backing layer location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildpackRecord {
  pub id: String,
  pub version: String,
  pub digest: Digest,
  pub diff_id: Digest,
  pub size: u64,
  pub homepage: Option<String>,
  pub api: String,
  pub stacks: Vec<StackSupport>,
  pub order: Vec<OrderEntry>,
  /// `repository@digest` of the image holding the layer.
  pub image: String,
}

impl BuildpackRecord {
  /// A buildpack whose contribution is an order over other buildpacks.
  pub fn is_meta(&self) -> bool {
    !self.order.is_empty()
  }

  /// `id@version`, also the secondary layer sort key.
  pub fn identity(&self) -> String {
    format!("{}@{}", self.id, self.version)
  }

  pub fn info(&self) -> BuildpackInfo {
    BuildpackInfo {
      id: self.id.clone(),
      version: self.version.clone(),
      homepage: self.homepage.clone(),
    }
  }

  pub fn layer_info(&self) -> BuildpackLayerInfo {
    BuildpackLayerInfo {
      layer_diff_id: self.diff_id.clone(),
      order: self.order.clone(),
      stacks: self.stacks.clone(),
      homepage: self.homepage.clone(),
      api: self.api.clone(),
    }
  }
}

/// `{id, version, homepage?}` as listed in builder metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackInfo {
  pub id: String,
  pub version: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
}

/// Per-buildpack entry of the layers label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackLayerInfo {
  #[serde(rename = "layerDiffID")]
  pub layer_diff_id: Digest,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub order: Vec<OrderEntry>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub stacks: Vec<StackSupport>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
  pub api: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_strings_count_as_unset() {
    let reference = BuildpackRef {
      id: Some(String::new()),
      version: Some(String::new()),
      ..BuildpackRef::default()
    };
    assert_eq!(reference.id_str(), None);
    assert_eq!(reference.version_str(), None);
  }

  #[test]
  fn group_entry_serializes_flat() {
    let entry = GroupEntry::new(BuildpackRef::exact("paketo/node", "1.0.0"), true);
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"id":"paketo/node","version":"1.0.0","optional":true}"#);

    let required = GroupEntry::new(BuildpackRef::exact("paketo/go", "2.0.0"), false);
    let json = serde_json::to_string(&required).unwrap();
    assert_eq!(json, r#"{"id":"paketo/go","version":"2.0.0"}"#);
  }

  #[test]
  fn group_entry_reads_source_reference() {
    let entry: GroupEntry = toml::from_str(
      r#"
      source = { kind = "cluster-buildpack", name = "node" }
      optional = true
      "#,
    )
    .unwrap();
    assert_eq!(
      entry.reference.source,
      Some(ObjectReference::new(ObjectKind::ClusterBuildpack, "node"))
    );
    assert!(entry.optional);

    let variant_name: Result<GroupEntry, _> =
      toml::from_str(r#"source = { kind = "ClusterBuildpack", name = "node" }"#);
    assert!(variant_name.is_err());
  }

  #[test]
  fn layer_info_field_names() {
    let info = BuildpackLayerInfo {
      layer_diff_id: Digest::of_bytes(b""),
      order: Vec::new(),
      stacks: vec![StackSupport::new("io.buildpacks.stacks.jammy")],
      homepage: None,
      api: "0.9".to_string(),
    };
    let value = serde_json::to_value(&info).unwrap();
    assert!(value.get("layerDiffID").is_some());
    assert!(value.get("order").is_none());
    assert_eq!(value["stacks"][0]["id"], "io.buildpacks.stacks.jammy");
    assert_eq!(value["api"], "0.9");
  }

  #[test]
  fn kind_display() {
    assert_eq!(ObjectKind::ClusterBuildpack.to_string(), "cluster buildpack");
    assert_eq!(ObjectKind::ClusterStore.to_string(), "cluster store");
  }
}
