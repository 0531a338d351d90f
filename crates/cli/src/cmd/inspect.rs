//! Implementation of the `cnb-forge inspect` command.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use cnb_forge_lib::builder::BuilderMetadata;
use cnb_forge_lib::buildpack::OrderEntry;
use cnb_forge_lib::consts::{BUILDER_METADATA_LABEL, ORDER_LABEL};
use cnb_forge_lib::image::Layer;
use cnb_forge_lib::keychain::Credentials;
use cnb_forge_lib::registry::Registry;
use cnb_forge_lib::registry::layout::LayoutRegistry;

use crate::output::{format_bytes, print_json, print_stat, print_success, symbols, truncate_hash};

pub fn cmd_inspect(reference: &str, layout: &Path, json: bool) -> Result<()> {
  let registry = LayoutRegistry::new(layout);
  let (image, identifier) = registry
    .fetch(&Credentials::anonymous(), reference)
    .with_context(|| format!("Failed to read '{}' from {}", reference, layout.display()))?;

  let raw = image
    .label(BUILDER_METADATA_LABEL)
    .ok_or_else(|| anyhow!("'{}' is not a builder image: no {} label", reference, BUILDER_METADATA_LABEL))?;
  let metadata: BuilderMetadata = serde_json::from_str(raw).context("Invalid builder metadata label")?;
  let order: Vec<OrderEntry> = match image.label(ORDER_LABEL) {
    Some(raw) => serde_json::from_str(raw).context("Invalid order label")?,
    None => Vec::new(),
  };

  if json {
    return print_json(&serde_json::json!({
      "image": identifier,
      "metadata": metadata,
      "order": order,
    }));
  }

  let size: u64 = image.layers().iter().map(|l| l.size()).sum();
  let digest = identifier.rsplit_once(':').map(|(_, hex)| hex).unwrap_or_default();
  print_success(&format!("{} ({})", reference, truncate_hash(digest)));
  if !metadata.description.is_empty() {
    print_stat("Description", &metadata.description);
  }
  print_stat("Run image", &metadata.stack.run_image.image);
  print_stat(
    "Lifecycle",
    &format!(
      "{} (buildpack api {}, platform api {})",
      metadata.lifecycle.version, metadata.lifecycle.api.buildpack, metadata.lifecycle.api.platform
    ),
  );
  print_stat("Created by", &format!("{} {}", metadata.created_by.name, metadata.created_by.version));
  print_stat("Layers", &format!("{} ({})", image.layers().len(), format_bytes(size)));

  println!();
  println!("Buildpacks:");
  for buildpack in &metadata.buildpacks {
    println!("  {} {}@{}", symbols::INFO, buildpack.id, buildpack.version);
  }

  println!();
  println!("Order:");
  for (index, entry) in order.iter().enumerate() {
    let members: Vec<String> = entry
      .group
      .iter()
      .map(|m| {
        let optional = if m.optional { " (optional)" } else { "" };
        format!("{}{}", m.reference, optional)
      })
      .collect();
    println!("  {}. {}", index + 1, members.join(", "));
  }
  Ok(())
}
