//! Documents written into a builder image: labels and in-image TOML files.

use serde::{Deserialize, Serialize};

use crate::buildpack::types::{BuildpackInfo, OrderEntry};
use crate::lifecycle::LifecycleApi;

/// The `io.buildpacks.builder.metadata` label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderMetadata {
  pub description: String,
  pub stack: StackMetadata,
  pub lifecycle: LifecycleDescriptor,
  pub created_by: CreatedBy,
  pub buildpacks: Vec<BuildpackInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMetadata {
  pub run_image: RunImageMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunImageMetadata {
  pub image: String,
  #[serde(default)]
  pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleDescriptor {
  pub version: String,
  pub api: LifecycleApi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedBy {
  pub name: String,
  pub version: String,
}

#[derive(Serialize)]
struct OrderToml<'a> {
  order: Vec<OrderTomlEntry<'a>>,
}

#[derive(Serialize)]
struct OrderTomlEntry<'a> {
  group: Vec<OrderTomlMember<'a>>,
}

// Every field is always written, including `optional = false`.
#[derive(Serialize)]
struct OrderTomlMember<'a> {
  id: &'a str,
  version: &'a str,
  optional: bool,
}

/// Render `/cnb/order.toml`.
pub fn order_toml(order: &[OrderEntry]) -> Result<String, toml::ser::Error> {
  let document = OrderToml {
    order: order
      .iter()
      .map(|entry| OrderTomlEntry {
        group: entry
          .group
          .iter()
          .map(|member| OrderTomlMember {
            id: member.reference.id_str().unwrap_or_default(),
            version: member.reference.version_str().unwrap_or_default(),
            optional: member.optional,
          })
          .collect(),
      })
      .collect(),
  };
  toml::to_string(&document)
}

#[derive(Serialize)]
struct StackToml<'a> {
  #[serde(rename = "run-image")]
  run_image: RunImageToml<'a>,
}

#[derive(Serialize)]
struct RunImageToml<'a> {
  image: &'a str,
  #[serde(skip_serializing_if = "no_mirrors")]
  mirrors: &'a [String],
}

fn no_mirrors(mirrors: &&[String]) -> bool {
  mirrors.is_empty()
}

/// Render `/cnb/stack.toml`.
pub fn stack_toml(run_image: &str, mirrors: &[String]) -> Result<String, toml::ser::Error> {
  toml::to_string(&StackToml {
    run_image: RunImageToml {
      image: run_image,
      mirrors,
    },
  })
}
