//! Image reference parsing.
//!
//! Accepts `[registry/]repository[:tag][@algorithm:hash]`. Identifiers
//! produced after a fetch or save are always `repository@digest`.

use std::fmt;

use thiserror::Error;

use crate::util::hash::{Digest, DigestError};

/// Tag assumed when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// Registry assumed when the first path component is not a host.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
  #[error("empty image reference")]
  Empty,

  #[error("invalid repository '{0}'")]
  Repository(String),

  #[error(transparent)]
  Digest(#[from] DigestError),
}

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
  pub repository: String,
  pub tag: Option<String>,
  pub digest: Option<Digest>,
}

impl ImageReference {
  pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
    let reference = reference.trim();
    if reference.is_empty() {
      return Err(ReferenceError::Empty);
    }

    let (name, digest) = match reference.split_once('@') {
      Some((name, digest)) => (name, Some(Digest::parse(digest)?)),
      None => (reference, None),
    };

    // A ':' after the last '/' separates the tag; one before it is a registry port.
    let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (repository, tag) = match name[last_slash..].rfind(':') {
      Some(i) => (&name[..last_slash + i], Some(name[last_slash + i + 1..].to_string())),
      None => (name, None),
    };

    if repository.is_empty()
      || repository.starts_with('/')
      || repository.ends_with('/')
      || repository.contains("//")
      || tag.as_deref().is_some_and(str::is_empty)
    {
      return Err(ReferenceError::Repository(reference.to_string()));
    }

    Ok(Self {
      repository: repository.to_string(),
      tag,
      digest,
    })
  }

  /// The registry host this reference points at.
  pub fn registry(&self) -> &str {
    match self.repository.split_once('/') {
      Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => first,
      _ => DEFAULT_REGISTRY,
    }
  }

  /// The tag, or [`DEFAULT_TAG`] when none was given.
  pub fn tag_or_default(&self) -> &str {
    self.tag.as_deref().unwrap_or(DEFAULT_TAG)
  }

  /// `repository:tag`, the name a tag lookup is keyed by.
  pub fn tagged_name(&self) -> String {
    format!("{}:{}", self.repository, self.tag_or_default())
  }

  /// `repository@digest` identifier for a resolved image.
  pub fn identifier(&self, digest: &Digest) -> String {
    format!("{}@{}", self.repository, digest)
  }
}

impl fmt::Display for ImageReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.repository)?;
    if let Some(tag) = &self.tag {
      write!(f, ":{}", tag)?;
    }
    if let Some(digest) = &self.digest {
      write!(f, "@{}", digest)?;
    }
    Ok(())
  }
}
