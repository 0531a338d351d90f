//! Builder definition file.
//!
//! A TOML document naming the image layout, the stack, the lifecycle image,
//! the buildpack sources, registry credentials and the order:
//!
//! ```toml
//! layout = "images"
//! tag = "registry.local/builder:latest"
//! lifecycle = "registry.local/lifecycle:0.17"
//!
//! [stack]
//! id = "io.buildpacks.stacks.jammy"
//! build-image = "registry.local/stack/build:jammy"
//! run-image = "registry.local/stack/run:jammy"
//!
//! [store]
//! name = "default"
//! images = ["registry.local/bp/node:1"]
//!
//! [[order]]
//! [[order.group]]
//! id = "node"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use cnb_forge_lib::builder::BuilderSpec;
use cnb_forge_lib::buildpack::package::PackageReader;
use cnb_forge_lib::buildpack::{BuildpackResolver, ObjectKind, OrderEntry, SourceObject};
use cnb_forge_lib::image::reference::ImageReference;
use cnb_forge_lib::keychain::{
  AnonymousKeychain, CredentialTarget, Credentials, Keychain, MultiKeychain, RegistryKeychain, SecretKeychain,
  SecretRef,
};
use cnb_forge_lib::registry::layout::LayoutRegistry;
use cnb_forge_lib::stack::StackSpec;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuilderConfig {
  pub layout: PathBuf,
  pub tag: String,
  #[serde(default)]
  pub description: String,
  pub lifecycle: String,
  /// Secret for the stack images, the lifecycle image and the saved builder.
  #[serde(default)]
  pub secret: Option<String>,
  pub stack: StackConfig,
  #[serde(default)]
  pub buildpacks: Vec<ObjectConfig>,
  #[serde(default)]
  pub cluster_buildpacks: Vec<ObjectConfig>,
  #[serde(default)]
  pub store: Option<ObjectConfig>,
  #[serde(default)]
  pub credentials: Vec<CredentialConfig>,
  #[serde(default)]
  pub order: Vec<OrderEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StackConfig {
  pub id: String,
  pub build_image: String,
  pub run_image: String,
  #[serde(default)]
  pub run_image_mirrors: Vec<String>,
  #[serde(default)]
  pub generation: i64,
}

/// A buildpack object, cluster buildpack object or the cluster store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObjectConfig {
  pub name: String,
  #[serde(default)]
  pub namespace: Option<String>,
  pub images: Vec<String>,
  #[serde(default)]
  pub secret: Option<String>,
  #[serde(default)]
  pub generation: i64,
}

/// Credentials bound to a registry host or to a named secret.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CredentialConfig {
  #[serde(default)]
  pub registry: Option<String>,
  #[serde(default)]
  pub secret: Option<String>,
  #[serde(default)]
  pub namespace: Option<String>,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default)]
  pub token: Option<String>,
}

impl CredentialConfig {
  fn credentials(&self) -> Result<Credentials> {
    match (&self.token, &self.username, &self.password) {
      (Some(token), None, None) => Ok(Credentials::bearer(token)),
      (None, Some(username), Some(password)) => Ok(Credentials::basic(username, password)),
      _ => bail!("credentials need either a token or a username and password"),
    }
  }
}

fn secret_ref(name: &str, namespace: Option<&str>) -> SecretRef {
  match namespace {
    Some(namespace) => SecretRef::namespaced(namespace, name),
    None => SecretRef::new(name),
  }
}

/// A parsed builder definition and the directory it was read from.
#[derive(Debug)]
pub struct LoadedConfig {
  pub config: BuilderConfig,
  pub base: PathBuf,
}

impl LoadedConfig {
  pub fn load(path: &Path) -> Result<Self> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read config '{}'", path.display()))?;
    let config: BuilderConfig =
      toml::from_str(&content).with_context(|| format!("Failed to parse config '{}'", path.display()))?;
    let base = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .map(Path::to_path_buf)
      .unwrap_or_else(|| PathBuf::from("."));
    Ok(Self { config, base })
  }

  pub fn registry(&self) -> Arc<LayoutRegistry> {
    Arc::new(LayoutRegistry::new(self.base.join(&self.config.layout)))
  }

  /// Secret credentials first, then registry hosts, then anonymous access.
  pub fn keychain(&self) -> Result<Arc<dyn Keychain>> {
    let mut secrets = SecretKeychain::new();
    let mut hosts = RegistryKeychain::new();
    for (index, entry) in self.config.credentials.iter().enumerate() {
      let credentials = entry
        .credentials()
        .with_context(|| format!("Invalid credentials entry #{}", index + 1))?;
      match (&entry.registry, &entry.secret) {
        (Some(registry), None) => hosts = hosts.with_host(registry, credentials),
        (None, Some(secret)) => {
          secrets = secrets.with_secret(secret_ref(secret, entry.namespace.as_deref()), credentials)
        }
        _ => bail!(
          "Invalid credentials entry #{}: set exactly one of 'registry' or 'secret'",
          index + 1
        ),
      }
    }
    Ok(Arc::new(
      MultiKeychain::new().with(secrets).with(hosts).with(AnonymousKeychain),
    ))
  }

  pub fn builder_secret(&self) -> Option<SecretRef> {
    self.config.secret.as_deref().map(|name| secret_ref(name, None))
  }

  /// Credentials for a single image, using the builder's secret.
  pub fn credentials_for(&self, keychain: &dyn Keychain, reference: &str) -> Result<Credentials> {
    let parsed = ImageReference::parse(reference).with_context(|| format!("Invalid image reference '{}'", reference))?;
    let secret = self.builder_secret();
    keychain
      .credentials(CredentialTarget::new(secret.as_ref(), parsed.registry()))
      .with_context(|| format!("No credentials for '{}'", reference))
  }

  /// Read every package image and build the resolver over the three collections.
  pub fn resolver(&self, reader: &PackageReader) -> Result<BuildpackResolver> {
    let objects = |kind: ObjectKind, entries: &[ObjectConfig]| -> Result<Vec<SourceObject>> {
      entries.iter().map(|entry| source_object(reader, kind, entry)).collect()
    };
    let buildpacks = objects(ObjectKind::Buildpack, &self.config.buildpacks)?;
    let cluster_buildpacks = objects(ObjectKind::ClusterBuildpack, &self.config.cluster_buildpacks)?;
    let store = self
      .config
      .store
      .as_ref()
      .map(|entry| source_object(reader, ObjectKind::ClusterStore, entry))
      .transpose()?;
    Ok(BuildpackResolver::from_sources(buildpacks, cluster_buildpacks, store))
  }

  pub fn builder_spec(&self) -> BuilderSpec {
    let stack = &self.config.stack;
    BuilderSpec {
      tag: self.config.tag.clone(),
      description: self.config.description.clone(),
      stack: StackSpec {
        id: stack.id.clone(),
        build_image: stack.build_image.clone(),
        run_image: stack.run_image.clone(),
        run_image_mirrors: stack.run_image_mirrors.clone(),
        generation: stack.generation,
      },
      secret: self.builder_secret(),
      order: self.config.order.clone(),
    }
  }
}

fn source_object(reader: &PackageReader, kind: ObjectKind, entry: &ObjectConfig) -> Result<SourceObject> {
  let secret = entry
    .secret
    .as_deref()
    .map(|name| secret_ref(name, entry.namespace.as_deref()));
  let object = reader
    .source_object(kind, &entry.name, &entry.images, secret)
    .with_context(|| format!("Failed to read {} '{}'", kind, entry.name))?
    .with_generation(entry.generation);
  Ok(match &entry.namespace {
    Some(namespace) => object.in_namespace(namespace),
    None => object,
  })
}
