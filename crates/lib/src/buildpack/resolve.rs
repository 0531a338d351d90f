//! Buildpack resolution.
//!
//! A [`BuildpackRef`] is resolved against collections given in precedence
//! order (namespaced buildpacks, cluster buildpacks, cluster store). The
//! fields set on the reference choose the path:
//!
//! 1. `source` and `id`: search only the named object
//! 2. `source` alone: the named object must have exactly one root buildpack
//! 3. `id` alone: gather matches from every collection, then pick a version
//! 4. `image`: rejected
//!
//! Without a pinned version the highest semantic version wins. Every
//! successful resolution records the object that supplied the record.

use std::cmp::Reverse;
use std::sync::{Mutex, PoisonError};

use semver::Version;
use thiserror::Error;
use tracing::debug;

use super::source::{BuildpackCollection, ObjectCollection, Provenance, SourceObject};
use super::tree::{TreeError, build_trees};
use super::types::{BuildpackRecord, BuildpackRef, ObjectKind, ObjectReference};
use crate::keychain::SecretRef;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
  /// The referenced source object does not exist.
  #[error("{kind} not found: {name}")]
  ObjectNotFound { kind: ObjectKind, name: String },

  /// Source references may only name buildpack or cluster buildpack objects.
  #[error("unsupported buildpack source kind: {kind}")]
  UnsupportedSourceKind { kind: ObjectKind },

  #[error("could not find buildpack with id '{id}'")]
  NotFound { id: String },

  #[error("could not find buildpack with id '{id}' and version '{version}'")]
  VersionNotFound { id: String, version: String },

  /// Highest-version selection needs every candidate to be a semantic version.
  #[error("cannot find buildpack '{id}' with latest version due to invalid semver '{version}'")]
  InvalidSemver { id: String, version: String },

  /// A source-only reference needs exactly one root buildpack.
  #[error("unexpected number of root buildpacks: {count}")]
  RootCount { count: usize },

  #[error(transparent)]
  Tree(#[from] TreeError),

  #[error("image buildpack references are not supported: '{image}'")]
  ImageUnsupported { image: String },

  #[error("invalid buildpack reference")]
  InvalidReference,
}

/// A resolved record with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBuildpack {
  pub record: BuildpackRecord,
  pub source: Provenance,
  /// Credentials binding of the supplying object.
  pub secret: Option<SecretRef>,
}

struct Candidate<'a> {
  record: &'a BuildpackRecord,
  object: &'a SourceObject,
  rank: usize,
}

impl<'a> Candidate<'a> {
  fn resolved(&self) -> ResolvedBuildpack {
    ResolvedBuildpack {
      record: self.record.clone(),
      source: self.object.provenance(),
      secret: self.object.secret.clone(),
    }
  }
}

pub struct BuildpackResolver {
  collections: Vec<Box<dyn BuildpackCollection>>,
  observed: Mutex<Vec<Provenance>>,
}

impl BuildpackResolver {
  /// `collections` are searched in the order given.
  pub fn new(collections: Vec<Box<dyn BuildpackCollection>>) -> Self {
    Self {
      collections,
      observed: Mutex::new(Vec::new()),
    }
  }

  /// Resolver over the usual three collections.
  pub fn from_sources(
    buildpacks: Vec<SourceObject>,
    cluster_buildpacks: Vec<SourceObject>,
    store: Option<SourceObject>,
  ) -> Self {
    Self::new(vec![
      Box::new(ObjectCollection::new(ObjectKind::Buildpack, buildpacks)),
      Box::new(ObjectCollection::new(ObjectKind::ClusterBuildpack, cluster_buildpacks)),
      Box::new(ObjectCollection::new(ObjectKind::ClusterStore, store.into_iter().collect())),
    ])
  }

  pub fn resolve(&self, reference: &BuildpackRef) -> Result<ResolvedBuildpack, ResolveError> {
    let resolved = match (&reference.source, reference.id_str()) {
      (Some(source), Some(id)) => {
        let object = self.object(source)?;
        let candidates = object
          .buildpacks
          .iter()
          .filter(|r| r.id == id)
          .map(|record| Candidate { record, object, rank: 0 })
          .collect();
        select(id, reference.version_str(), candidates)?
      }
      (Some(source), None) => {
        let object = self.object(source)?;
        let mut roots = build_trees(&object.buildpacks)?;
        if roots.len() != 1 {
          return Err(ResolveError::RootCount { count: roots.len() });
        }
        let root = roots.remove(0);
        ResolvedBuildpack {
          record: root.record,
          source: object.provenance(),
          secret: object.secret.clone(),
        }
      }
      (None, Some(id)) => {
        let candidates = self
          .collections
          .iter()
          .enumerate()
          .flat_map(|(rank, collection)| {
            collection.objects().iter().flat_map(move |object| {
              object
                .buildpacks
                .iter()
                .filter(move |r| r.id == id)
                .map(move |record| Candidate { record, object, rank })
            })
          })
          .collect();
        select(id, reference.version_str(), candidates)?
      }
      (None, None) => match reference.image_str() {
        Some(image) => {
          return Err(ResolveError::ImageUnsupported {
            image: image.to_string(),
          });
        }
        None => return Err(ResolveError::InvalidReference),
      },
    };

    debug!(
      reference = %reference,
      id = %resolved.record.id,
      version = %resolved.record.version,
      source = %resolved.source.name,
      "resolved buildpack"
    );
    self
      .observed
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(resolved.source.clone());
    Ok(resolved)
  }

  /// Provenance of every successful resolution so far, in order.
  pub fn observed_sources(&self) -> Vec<Provenance> {
    self.observed.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Generation of the cluster store, if one is configured.
  pub fn store_generation(&self) -> Option<i64> {
    self
      .collections
      .iter()
      .filter(|c| c.kind() == ObjectKind::ClusterStore)
      .flat_map(|c| c.objects().first())
      .map(|o| o.generation)
      .next()
  }

  fn object(&self, reference: &ObjectReference) -> Result<&SourceObject, ResolveError> {
    if reference.kind == ObjectKind::ClusterStore {
      return Err(ResolveError::UnsupportedSourceKind { kind: reference.kind });
    }
    self
      .collections
      .iter()
      .filter(|c| c.kind() == reference.kind)
      .find_map(|c| c.find(&reference.name))
      .ok_or_else(|| ResolveError::ObjectNotFound {
        kind: reference.kind,
        name: reference.name.clone(),
      })
  }
}

/// Pick a candidate: an exact version, or the highest one.
///
/// `candidates` must be in precedence order.
fn select(id: &str, version: Option<&str>, candidates: Vec<Candidate<'_>>) -> Result<ResolvedBuildpack, ResolveError> {
  if candidates.is_empty() {
    return Err(ResolveError::NotFound { id: id.to_string() });
  }

  if let Some(version) = version {
    return candidates
      .iter()
      .find(|c| c.record.version == version)
      .map(Candidate::resolved)
      .ok_or_else(|| ResolveError::VersionNotFound {
        id: id.to_string(),
        version: version.to_string(),
      });
  }

  if candidates.len() == 1 {
    return Ok(candidates[0].resolved());
  }

  let mut parsed = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let version = parse_version(&candidate.record.version).ok_or_else(|| ResolveError::InvalidSemver {
      id: id.to_string(),
      version: candidate.record.version.clone(),
    })?;
    parsed.push((version, candidate));
  }

  // Stable: equal versions keep input order, and earlier collections sort last.
  parsed.sort_by_key(|(version, candidate)| (version.clone(), Reverse(candidate.rank)));
  parsed
    .last()
    .map(|(_, candidate)| candidate.resolved())
    .ok_or_else(|| ResolveError::NotFound { id: id.to_string() })
}

/// Parse a version, padding missing minor/patch components and dropping a leading `v`.
pub fn parse_version(version: &str) -> Option<Version> {
  let trimmed = version.trim();
  let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
  let split = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
  let (core, rest) = trimmed.split_at(split);
  let padded = match core.split('.').count() {
    1 => format!("{}.0.0{}", core, rest),
    2 => format!("{}.0{}", core, rest),
    _ => trimmed.to_string(),
  };
  Version::parse(&padded).ok()
}
