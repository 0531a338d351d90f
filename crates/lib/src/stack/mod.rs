//! Stack and mixin compatibility.
//!
//! Build and run images must carry the requested stack id. Their mixins are
//! classified by prefix:
//! - `build:name` only applies to the build image
//! - `run:name` only applies to the run image
//! - anything else is common and must appear on both
//!
//! Every problem found is reported together in one error.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::buildpack::types::{BuildpackRecord, StackSupport};
use crate::consts::{MIXINS_LABEL, STACK_ID_LABEL};
use crate::image::Image;

const BUILD_PREFIX: &str = "build:";
const RUN_PREFIX: &str = "run:";

/// Stack id accepted by buildpacks that support every stack.
pub const ANY_STACK: &str = "*";

/// Requested stack: identity plus the build and run images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSpec {
  pub id: String,
  pub build_image: String,
  pub run_image: String,
  pub run_image_mirrors: Vec<String>,
  pub generation: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
  #[error("{image} image has no '{label}' label", label = STACK_ID_LABEL)]
  MissingStackId { image: &'static str },

  #[error("stack id mismatch: expected '{expected}', build image has '{build}', run image has '{run}'")]
  StackMismatch { expected: String, build: String, run: String },

  #[error("{image} image has an invalid '{label}' label: {message}", label = MIXINS_LABEL)]
  InvalidMixins { image: &'static str, message: String },

  #[error("{}", .problems.join("; "))]
  Mixins { problems: Vec<String> },

  #[error("buildpack '{buildpack}' uses unsupported buildpack api '{api}' (supported: {supported})")]
  UnsupportedApi {
    buildpack: String,
    api: String,
    supported: String,
  },

  #[error("buildpack '{buildpack}' does not support stack '{stack}'")]
  UnsupportedStack { buildpack: String, stack: String },

  #[error("buildpack '{buildpack}' requires missing mixin(s): {missing}")]
  MissingMixins { buildpack: String, missing: String },
}

pub fn read_stack_id(image: &Image) -> Option<&str> {
  image.label(STACK_ID_LABEL).filter(|id| !id.is_empty())
}

/// Mixins declared on an image; an absent label means none.
pub fn read_mixins(image: &Image, which: &'static str) -> Result<Vec<String>, StackError> {
  match image.label(MIXINS_LABEL) {
    None => Ok(Vec::new()),
    Some(raw) => serde_json::from_str(raw).map_err(|e| StackError::InvalidMixins {
      image: which,
      message: e.to_string(),
    }),
  }
}

/// Check stack identity of both images and return the resolved mixin set.
pub fn validate_stack(expected: &str, build: &Image, run: &Image) -> Result<Vec<String>, StackError> {
  let build_id = read_stack_id(build).ok_or(StackError::MissingStackId { image: "build" })?;
  let run_id = read_stack_id(run).ok_or(StackError::MissingStackId { image: "run" })?;
  if build_id != expected || run_id != expected {
    return Err(StackError::StackMismatch {
      expected: expected.to_string(),
      build: build_id.to_string(),
      run: run_id.to_string(),
    });
  }

  validate_mixins(&read_mixins(build, "build")?, &read_mixins(run, "run")?)
}

/// Validate build/run mixins against each other.
///
/// Returns common mixins, then build-only mixins, then run-only mixins.
pub fn validate_mixins(build: &[String], run: &[String]) -> Result<Vec<String>, StackError> {
  let mut problems = Vec::new();

  let run_has_build: Vec<&str> = run
    .iter()
    .map(String::as_str)
    .filter(|m| m.starts_with(BUILD_PREFIX))
    .collect();
  if !run_has_build.is_empty() {
    problems.push(format!("run image contains build-only mixin(s): {}", run_has_build.join(", ")));
  }

  let build_has_run: Vec<&str> = build
    .iter()
    .map(String::as_str)
    .filter(|m| m.starts_with(RUN_PREFIX))
    .collect();
  if !build_has_run.is_empty() {
    problems.push(format!("build image contains run-only mixin(s): {}", build_has_run.join(", ")));
  }

  let common: Vec<&str> = build.iter().map(String::as_str).filter(|m| is_common(m)).collect();
  let run_set: BTreeSet<&str> = run.iter().map(String::as_str).collect();
  let missing: Vec<&str> = common.iter().copied().filter(|m| !run_set.contains(m)).collect();
  if !missing.is_empty() {
    problems.push(format!("run image missing mixin(s): {}", missing.join(", ")));
  }

  if !problems.is_empty() {
    return Err(StackError::Mixins { problems });
  }

  let mut resolved: Vec<String> = common.iter().map(|m| m.to_string()).collect();
  resolved.extend(build.iter().filter(|m| m.starts_with(BUILD_PREFIX)).cloned());
  resolved.extend(run.iter().filter(|m| m.starts_with(RUN_PREFIX)).cloned());
  Ok(resolved)
}

fn is_common(mixin: &str) -> bool {
  !mixin.starts_with(BUILD_PREFIX) && !mixin.starts_with(RUN_PREFIX)
}

/// Check one (non-meta) buildpack against the stack, its mixins and the accepted APIs.
pub fn check_buildpack(
  record: &BuildpackRecord,
  stack_id: &str,
  mixins: &BTreeSet<String>,
  apis: &BTreeSet<String>,
) -> Result<(), StackError> {
  if !apis.contains(&record.api) {
    return Err(StackError::UnsupportedApi {
      buildpack: record.identity(),
      api: record.api.clone(),
      supported: apis.iter().cloned().collect::<Vec<_>>().join(", "),
    });
  }

  let support = supported_stack(&record.stacks, stack_id).ok_or_else(|| StackError::UnsupportedStack {
    buildpack: record.identity(),
    stack: stack_id.to_string(),
  })?;

  let missing: Vec<&str> = support
    .mixins
    .iter()
    .map(String::as_str)
    .filter(|m| !satisfied(m, mixins))
    .collect();
  if !missing.is_empty() {
    return Err(StackError::MissingMixins {
      buildpack: record.identity(),
      missing: missing.join(", "),
    });
  }
  Ok(())
}

fn supported_stack<'a>(stacks: &'a [StackSupport], stack_id: &str) -> Option<&'a StackSupport> {
  stacks
    .iter()
    .find(|s| s.id == stack_id)
    .or_else(|| stacks.iter().find(|s| s.id == ANY_STACK))
}

// A stage-scoped requirement is also met by the same mixin declared as common.
fn satisfied(mixin: &str, available: &BTreeSet<String>) -> bool {
  if available.contains(mixin) {
    return true;
  }
  let unprefixed = mixin
    .strip_prefix(BUILD_PREFIX)
    .or_else(|| mixin.strip_prefix(RUN_PREFIX));
  unprefixed.is_some_and(|m| available.contains(m))
}
