//! Implementation of the `cnb-forge resolve` command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use cnb_forge_lib::buildpack::package::PackageReader;
use cnb_forge_lib::buildpack::{BuildpackRef, Provenance};
use cnb_forge_lib::registry::Registry;

use crate::config::LoadedConfig;
use crate::output::{print_json, print_success, symbols};

#[derive(Serialize)]
struct Resolution {
  group: usize,
  reference: BuildpackRef,
  id: String,
  version: String,
  optional: bool,
  source: Provenance,
}

/// Resolve each order entry and show where it comes from.
pub fn cmd_resolve(config: &Path, json: bool) -> Result<()> {
  let loaded = LoadedConfig::load(config)?;
  let registry: Arc<dyn Registry> = loaded.registry();
  let reader = PackageReader::new(registry, loaded.keychain()?);
  let resolver = loaded.resolver(&reader)?;

  let mut resolutions = Vec::new();
  for (index, entry) in loaded.config.order.iter().enumerate() {
    for member in &entry.group {
      let resolved = resolver
        .resolve(&member.reference)
        .with_context(|| format!("Failed to resolve '{}' in group {}", member.reference, index + 1))?;
      resolutions.push(Resolution {
        group: index + 1,
        reference: member.reference.clone(),
        id: resolved.record.id,
        version: resolved.record.version,
        optional: member.optional,
        source: resolved.source,
      });
    }
  }

  if json {
    return print_json(&resolutions);
  }

  print_success(&format!("Resolved {} buildpack reference(s)", resolutions.len()));
  let mut current = 0;
  for resolution in &resolutions {
    if resolution.group != current {
      current = resolution.group;
      println!("Group {}:", current);
    }
    let optional = if resolution.optional { " (optional)" } else { "" };
    println!(
      "  {} {} {} {}@{} from {} '{}'{}",
      symbols::INFO,
      resolution.reference,
      symbols::ARROW,
      resolution.id,
      resolution.version,
      resolution.source.kind,
      resolution.source.name,
      optional
    );
  }
  Ok(())
}
