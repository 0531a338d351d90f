//! Builder image composition.
//!
//! A [`BuilderImage`] moves through fixed phases and is used once:
//!
//! 1. [`BuilderImage::add_stack`] takes the build image (linux only), checks
//!    it against the run image and reads the CNB user and group
//! 2. [`BuilderImage::add_lifecycle`] adds the lifecycle layer for that OS
//! 3. [`BuilderImage::add_group`] adds one order group at a time
//!
//! [`BuilderImage::finalize`] then lays the image out as: base layers,
//! default directories, lifecycle, buildpacks (largest first, ties broken by
//! descending `id@version`), `stack.toml`, `order.toml`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::metadata::{
  BuilderMetadata, CreatedBy, LifecycleDescriptor, RunImageMetadata, StackMetadata, order_toml, stack_toml,
};
use crate::buildpack::fetch::BuildpackLayer;
use crate::buildpack::package::BuildpackLayers;
use crate::buildpack::types::{BuildpackInfo, BuildpackRef, GroupEntry, OrderEntry};
use crate::consts::{
  BUILDER_METADATA_LABEL, BUILDER_WORKING_DIR, BUILDPACK_LAYERS_LABEL, CNB_GROUP_ID_ENV, CNB_USER_ID_ENV,
  CREATED_BY_NAME, CREATED_BY_VERSION, DEFAULT_DIRECTORIES, ORDER_LABEL, ORDER_TOML_PATH, STACK_TOML_PATH,
  SUPPORTED_OS,
};
use crate::image::Image;
use crate::image::archive::{LayerArchive, Owner};
use crate::image::layer::LayerHandle;
use crate::lifecycle::{LifecycleError, LifecycleMetadata, LifecycleProvider};
use crate::stack::{StackError, StackSpec, check_buildpack, validate_stack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Empty,
  Stack,
  Lifecycle,
  Buildpacks,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Phase::Empty => "empty",
      Phase::Stack => "stack",
      Phase::Lifecycle => "lifecycle",
      Phase::Buildpacks => "buildpacks",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum BuilderError {
  #[error("cannot {operation} in {phase} phase")]
  Phase { operation: &'static str, phase: Phase },

  #[error("{os} base images are not supported")]
  UnsupportedOs { os: String },

  #[error(transparent)]
  Stack(#[from] StackError),

  #[error("build image is missing environment variable {name}")]
  MissingEnv { name: &'static str },

  #[error("build image has invalid {name} '{value}'")]
  InvalidEnv { name: &'static str, value: String },

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  #[error("failed to write builder layer: {0}")]
  Layer(#[from] std::io::Error),

  #[error("failed to encode builder label: {0}")]
  Label(#[from] serde_json::Error),

  #[error("failed to encode builder toml: {0}")]
  Toml(#[from] toml::ser::Error),
}

/// A top-level member of an order group with the layers it flattened to.
#[derive(Debug, Clone)]
pub struct GroupMember {
  pub id: String,
  pub version: String,
  pub optional: bool,
  pub layers: Vec<BuildpackLayer>,
}

struct StackState {
  base: Image,
  id: String,
  run_image: String,
  run_image_mirrors: Vec<String>,
  mixins: BTreeSet<String>,
  owner: Owner,
}

pub struct BuilderImage {
  phase: Phase,
  description: String,
  stack: Option<StackState>,
  lifecycle: Option<(LayerHandle, LifecycleMetadata)>,
  buildpacks: BTreeMap<(String, String), BuildpackLayer>,
  order: Vec<OrderEntry>,
}

impl BuilderImage {
  pub fn new(description: impl Into<String>) -> Self {
    Self {
      phase: Phase::Empty,
      description: description.into(),
      stack: None,
      lifecycle: None,
      buildpacks: BTreeMap::new(),
      order: Vec::new(),
    }
  }

  pub fn phase(&self) -> Phase {
    self.phase
  }

  fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> Result<(), BuilderError> {
    if allowed.contains(&self.phase) {
      Ok(())
    } else {
      Err(BuilderError::Phase {
        operation,
        phase: self.phase,
      })
    }
  }

  /// Accept the build image. `run_identifier` is the resolved run image.
  pub fn add_stack(
    &mut self,
    stack: &StackSpec,
    build: Image,
    run: &Image,
    run_identifier: &str,
  ) -> Result<(), BuilderError> {
    self.expect_phase("add stack", &[Phase::Empty])?;

    if build.os() != SUPPORTED_OS {
      return Err(BuilderError::UnsupportedOs {
        os: build.os().to_string(),
      });
    }

    let mixins = validate_stack(&stack.id, &build, run)?;
    let owner = Owner::new(env_id(&build, CNB_USER_ID_ENV)?, env_id(&build, CNB_GROUP_ID_ENV)?);

    info!(stack = %stack.id, run_image = run_identifier, mixins = mixins.len(), "stack validated");
    self.stack = Some(StackState {
      base: build,
      id: stack.id.clone(),
      run_image: run_identifier.to_string(),
      run_image_mirrors: stack.run_image_mirrors.clone(),
      mixins: mixins.into_iter().collect(),
      owner,
    });
    self.phase = Phase::Stack;
    Ok(())
  }

  pub fn add_lifecycle(&mut self, provider: &dyn LifecycleProvider) -> Result<(), BuilderError> {
    self.expect_phase("add lifecycle", &[Phase::Stack])?;
    let os = self.stack.as_ref().map(|s| s.base.os()).unwrap_or(SUPPORTED_OS);
    let (layer, metadata) = provider.layer_for_os(os)?;
    debug!(version = %metadata.version, buildpack_api = %metadata.api.buildpack, "lifecycle added");
    self.lifecycle = Some((layer, metadata));
    self.phase = Phase::Lifecycle;
    Ok(())
  }

  /// Add one order group. Every non-meta buildpack is checked against the stack.
  pub fn add_group(&mut self, members: Vec<GroupMember>) -> Result<(), BuilderError> {
    self.expect_phase("add group", &[Phase::Lifecycle, Phase::Buildpacks])?;
    let (Some(stack), Some((_, lifecycle))) = (&self.stack, &self.lifecycle) else {
      return Err(BuilderError::Phase {
        operation: "add group",
        phase: self.phase,
      });
    };
    let apis = lifecycle.buildpack_apis();

    let mut group = Vec::with_capacity(members.len());
    for member in members {
      for layer in member.layers {
        if !layer.record.is_meta() {
          check_buildpack(&layer.record, &stack.id, &stack.mixins, &apis)?;
        }
        let key = (layer.record.id.clone(), layer.record.version.clone());
        match self.buildpacks.get(&key) {
          Some(existing) if existing.record.diff_id != layer.record.diff_id => {
            warn!(
              buildpack = %layer.record.identity(),
              kept = %existing.record.diff_id.short(),
              ignored = %layer.record.diff_id.short(),
              "buildpack added twice with different content, keeping the first"
            );
          }
          Some(_) => {}
          None => {
            self.buildpacks.insert(key, layer);
          }
        }
      }
      group.push(GroupEntry::new(BuildpackRef::exact(member.id, member.version), member.optional));
    }

    debug!(members = group.len(), buildpacks = self.buildpacks.len(), "group added");
    self.order.push(OrderEntry { group });
    self.phase = Phase::Buildpacks;
    Ok(())
  }

  /// Buildpack layers in final image order.
  pub fn sorted_buildpacks(&self) -> Vec<&BuildpackLayer> {
    let mut layers: Vec<&BuildpackLayer> = self.buildpacks.values().collect();
    layers.sort_by(|a, b| layer_order(a, b));
    layers
  }

  /// Buildpack metadata in final image order.
  pub fn buildpacks(&self) -> Vec<BuildpackInfo> {
    self.sorted_buildpacks().iter().map(|l| l.record.info()).collect()
  }

  pub fn order(&self) -> &[OrderEntry] {
    &self.order
  }

  pub fn stack_id(&self) -> Option<&str> {
    self.stack.as_ref().map(|s| s.id.as_str())
  }

  pub fn run_image(&self) -> Option<&str> {
    self.stack.as_ref().map(|s| s.run_image.as_str())
  }

  pub fn lifecycle(&self) -> Option<&LifecycleMetadata> {
    self.lifecycle.as_ref().map(|(_, metadata)| metadata)
  }

  /// Produce the composed image.
  pub fn finalize(self) -> Result<Image, BuilderError> {
    self.expect_phase("finalize", &[Phase::Lifecycle, Phase::Buildpacks])?;
    let (Some(stack), Some((lifecycle_layer, lifecycle))) = (&self.stack, &self.lifecycle) else {
      return Err(BuilderError::Phase {
        operation: "finalize",
        phase: self.phase,
      });
    };

    let sorted = self.sorted_buildpacks();
    let mut image = stack.base.clone();

    let mut directories = LayerArchive::new();
    for dir in DEFAULT_DIRECTORIES {
      directories.add_dir(dir, stack.owner)?;
    }
    image.push_layer(directories.finish()?.into_handle());
    image.push_layer(lifecycle_layer.clone());
    for layer in &sorted {
      image.push_layer(layer.layer.clone());
    }

    let mut stack_layer = LayerArchive::new();
    stack_layer.add_file(
      STACK_TOML_PATH,
      stack_toml(&stack.run_image, &stack.run_image_mirrors)?.as_bytes(),
      Owner::default(),
    )?;
    image.push_layer(stack_layer.finish()?.into_handle());

    let mut order_layer = LayerArchive::new();
    order_layer.add_file(ORDER_TOML_PATH, order_toml(&self.order)?.as_bytes(), Owner::default())?;
    image.push_layer(order_layer.finish()?.into_handle());

    let mut layers_label = BuildpackLayers::new();
    for layer in &sorted {
      layers_label
        .entry(layer.record.id.clone())
        .or_default()
        .insert(layer.record.version.clone(), layer.record.layer_info());
    }

    let metadata = BuilderMetadata {
      description: self.description.clone(),
      stack: StackMetadata {
        run_image: RunImageMetadata {
          image: stack.run_image.clone(),
          mirrors: stack.run_image_mirrors.clone(),
        },
      },
      lifecycle: LifecycleDescriptor {
        version: lifecycle.version.clone(),
        api: lifecycle.api.clone(),
      },
      created_by: CreatedBy {
        name: CREATED_BY_NAME.to_string(),
        version: CREATED_BY_VERSION.to_string(),
      },
      buildpacks: sorted.iter().map(|l| l.record.info()).collect(),
    };

    image.set_label(ORDER_LABEL, serde_json::to_string(&self.order)?);
    image.set_label(BUILDPACK_LAYERS_LABEL, serde_json::to_string(&layers_label)?);
    image.set_label(BUILDER_METADATA_LABEL, serde_json::to_string(&metadata)?);
    image.config_mut().working_dir = Some(BUILDER_WORKING_DIR.to_string());

    info!(buildpacks = sorted.len(), groups = self.order.len(), layers = image.layers().len(), "builder image composed");
    Ok(image)
  }
}

/// Larger layers first; equal sizes by descending `id@version`.
fn layer_order(a: &BuildpackLayer, b: &BuildpackLayer) -> Ordering {
  b.record
    .size
    .cmp(&a.record.size)
    .then_with(|| b.record.identity().cmp(&a.record.identity()))
}

fn env_id(image: &Image, name: &'static str) -> Result<u64, BuilderError> {
  let value = image.env(name).ok_or(BuilderError::MissingEnv { name })?;
  value.trim().parse().map_err(|_| BuilderError::InvalidEnv {
    name,
    value: value.to_string(),
  })
}
