//! Candidate source collections.
//!
//! Namespaced buildpack objects, cluster buildpack objects and the cluster
//! store are all looked up through the same [`BuildpackCollection`]
//! capability; the resolver only sees the trait.

use serde::Serialize;

use super::types::{BuildpackRecord, ObjectKind};
use crate::keychain::SecretRef;

/// A named object declaring a set of buildpack records.
#[derive(Debug, Clone)]
pub struct SourceObject {
  pub kind: ObjectKind,
  pub name: String,
  pub namespace: Option<String>,
  /// Credentials used to pull this object's buildpack layers.
  pub secret: Option<SecretRef>,
  pub generation: i64,
  pub buildpacks: Vec<BuildpackRecord>,
}

impl SourceObject {
  pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
    Self {
      kind,
      name: name.into(),
      namespace: None,
      secret: None,
      generation: 0,
      buildpacks: Vec::new(),
    }
  }

  pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
    self.namespace = Some(namespace.into());
    self
  }

  pub fn with_secret(mut self, secret: SecretRef) -> Self {
    self.secret = Some(secret);
    self
  }

  pub fn with_generation(mut self, generation: i64) -> Self {
    self.generation = generation;
    self
  }

  pub fn with_buildpacks(mut self, buildpacks: Vec<BuildpackRecord>) -> Self {
    self.buildpacks = buildpacks;
    self
  }

  pub fn provenance(&self) -> Provenance {
    Provenance {
      kind: self.kind,
      name: self.name.clone(),
      namespace: self.namespace.clone(),
      generation: self.generation,
    }
  }
}

/// Which object supplied a resolved buildpack, and at what generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
  pub kind: ObjectKind,
  pub name: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub namespace: Option<String>,
  pub generation: i64,
}

/// Lookup over the objects of one kind.
pub trait BuildpackCollection: Send + Sync {
  fn kind(&self) -> ObjectKind;

  /// All objects, in declaration order.
  fn objects(&self) -> &[SourceObject];

  fn find(&self, name: &str) -> Option<&SourceObject> {
    self.objects().iter().find(|o| o.name == name)
  }
}

/// A plain list of objects of one kind.
#[derive(Debug, Clone)]
pub struct ObjectCollection {
  kind: ObjectKind,
  objects: Vec<SourceObject>,
}

impl ObjectCollection {
  pub fn new(kind: ObjectKind, objects: Vec<SourceObject>) -> Self {
    Self { kind, objects }
  }
}

impl BuildpackCollection for ObjectCollection {
  fn kind(&self) -> ObjectKind {
    self.kind
  }

  fn objects(&self) -> &[SourceObject] {
    &self.objects
  }
}
