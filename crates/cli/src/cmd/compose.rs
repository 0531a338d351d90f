//! Implementation of the `cnb-forge compose` command.
//!
//! Reads the builder definition, resolves and fetches every buildpack in the
//! order, composes the builder image and saves it into the image layout.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use cnb_forge_lib::builder::BuilderComposer;
use cnb_forge_lib::buildpack::package::PackageReader;
use cnb_forge_lib::lifecycle::ImageLifecycleProvider;
use cnb_forge_lib::registry::Registry;

use crate::config::LoadedConfig;
use crate::output::{format_duration, print_info, print_json, print_stat, print_success, symbols};

pub fn cmd_compose(config: &Path, json: bool) -> Result<()> {
  let started = Instant::now();
  let loaded = LoadedConfig::load(config)?;
  let registry: Arc<dyn Registry> = loaded.registry();
  let keychain = loaded.keychain()?;

  let reader = PackageReader::new(Arc::clone(&registry), Arc::clone(&keychain));
  let resolver = loaded.resolver(&reader)?;

  let lifecycle_credentials = loaded.credentials_for(keychain.as_ref(), &loaded.config.lifecycle)?;
  let lifecycle = Arc::new(ImageLifecycleProvider::new(
    Arc::clone(&registry),
    lifecycle_credentials,
    loaded.config.lifecycle.clone(),
  ));

  let composer = BuilderComposer::new(registry, keychain, lifecycle);
  let spec = loaded.builder_spec();
  let record = composer
    .compose(&spec, &resolver)
    .with_context(|| format!("Failed to compose builder '{}'", spec.tag))?;
  info!(image = %record.image, "compose finished");

  if json {
    return print_json(&record);
  }

  print_success(&format!("Composed {}", record.image));
  print_stat("Stack", &record.stack.id);
  print_stat("Run image", &record.stack.run_image);
  print_stat("Groups", &record.order.len().to_string());
  print_stat("Took", &format_duration(started.elapsed()));
  println!();
  print_info(&format!("{} buildpack(s):", record.buildpacks.len()));
  for buildpack in &record.buildpacks {
    println!("  {} {}@{}", symbols::PLUS, buildpack.id, buildpack.version);
  }
  Ok(())
}
