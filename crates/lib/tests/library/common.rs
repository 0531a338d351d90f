//! Fixtures: a seeded in-memory registry with stack, lifecycle and package images.

use std::sync::Arc;

use cnb_forge_lib::buildpack::package::{PackageBuilder, PackageReader};
use cnb_forge_lib::buildpack::{
  BuildpackRecord, BuildpackRef, GroupEntry, ObjectKind, OrderEntry, SourceObject, StackSupport,
};
use cnb_forge_lib::consts::{LIFECYCLE_APIS_LABEL, LIFECYCLE_VERSION_LABEL, MIXINS_LABEL, STACK_ID_LABEL};
use cnb_forge_lib::image::archive::{LayerArchive, Owner};
use cnb_forge_lib::image::{Image, ImageConfig, Layer, LayerHandle};
use cnb_forge_lib::keychain::{AnonymousKeychain, Credentials, Keychain, SecretRef};
use cnb_forge_lib::lifecycle::{ImageLifecycleProvider, LifecycleProvider};
use cnb_forge_lib::registry::Registry;
use cnb_forge_lib::registry::memory::InMemoryRegistry;
use cnb_forge_lib::stack::StackSpec;

pub const STACK: &str = "io.buildpacks.stacks.jammy";
pub const BUILD_IMAGE: &str = "registry.local/stack/build:jammy";
pub const RUN_IMAGE: &str = "registry.local/stack/run:jammy";
pub const LIFECYCLE_IMAGE: &str = "registry.local/lifecycle:0.17";
pub const BUILDER_TAG: &str = "registry.local/builder:latest";

pub fn config(os: &str) -> ImageConfig {
  ImageConfig {
    os: os.to_string(),
    architecture: "amd64".to_string(),
    env: vec!["CNB_USER_ID=1000".to_string(), "CNB_GROUP_ID=1000".to_string()],
    ..ImageConfig::default()
  }
}

fn file_layer(path: &str, contents: &[u8]) -> LayerHandle {
  let mut archive = LayerArchive::new();
  archive.add_file(path, contents, Owner::default()).unwrap();
  archive.finish().unwrap().into_handle()
}

pub fn stack_spec() -> StackSpec {
  StackSpec {
    id: STACK.to_string(),
    build_image: BUILD_IMAGE.to_string(),
    run_image: RUN_IMAGE.to_string(),
    run_image_mirrors: vec!["mirror.local/stack/run:jammy".to_string()],
    generation: 2,
  }
}

pub fn seed_stack(registry: &InMemoryRegistry, os: &str, build_mixins: &[&str], run_mixins: &[&str]) {
  for (reference, mixins, content) in [
    (BUILD_IMAGE, build_mixins, b"build".as_slice()),
    (RUN_IMAGE, run_mixins, b"run".as_slice()),
  ] {
    let mut image = Image::new(config(os)).with_layer(file_layer("etc/stack", content));
    image.set_label(STACK_ID_LABEL, STACK);
    image.set_label(MIXINS_LABEL, serde_json::to_string(mixins).unwrap());
    registry.insert(reference, image).unwrap();
  }
}

pub fn seed_lifecycle(registry: &Arc<InMemoryRegistry>) -> Arc<dyn LifecycleProvider> {
  let mut image = Image::new(config("linux")).with_layer(file_layer("cnb/lifecycle/lifecycle", b"lifecycle"));
  image.set_label(LIFECYCLE_VERSION_LABEL, "0.17.0");
  image.set_label(
    LIFECYCLE_APIS_LABEL,
    serde_json::json!({
      "buildpack": { "deprecated": [], "supported": ["0.7", "0.8", "0.9"] },
      "platform": { "deprecated": [], "supported": ["0.12"] }
    })
    .to_string(),
  );
  registry.insert(LIFECYCLE_IMAGE, image).unwrap();
  Arc::new(ImageLifecycleProvider::new(
    Arc::clone(registry) as Arc<dyn Registry>,
    Credentials::anonymous(),
    LIFECYCLE_IMAGE,
  ))
}

/// A registry with the stack and lifecycle images in place.
pub fn seeded() -> (Arc<InMemoryRegistry>, Arc<dyn LifecycleProvider>) {
  seeded_with(InMemoryRegistry::new())
}

pub fn seeded_with(registry: InMemoryRegistry) -> (Arc<InMemoryRegistry>, Arc<dyn LifecycleProvider>) {
  let registry = Arc::new(registry);
  seed_stack(&registry, "linux", &["shared", "build:git"], &["shared"]);
  let lifecycle = seed_lifecycle(&registry);
  (registry, lifecycle)
}

/// A buildpack with `size` bytes of incompressible content.
pub struct TestBuildpack {
  pub record: BuildpackRecord,
  pub layer: LayerHandle,
}

pub fn buildpack(id: &str, version: &str, size: usize) -> TestBuildpack {
  let mut content = Vec::with_capacity(size);
  let mut state: u32 = id.bytes().chain(version.bytes()).fold(7, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
  while content.len() < size {
    state = state.wrapping_mul(1664525).wrapping_add(1013904223);
    content.push((state >> 24) as u8);
  }
  let layer = file_layer(&format!("cnb/buildpacks/{}/{}/bin/build", id, version), &content);
  TestBuildpack {
    record: BuildpackRecord {
      id: id.to_string(),
      version: version.to_string(),
      digest: layer.digest(),
      diff_id: layer.diff_id(),
      size: layer.size(),
      homepage: Some(format!("https://example.com/{}", id)),
      api: "0.9".to_string(),
      stacks: vec![StackSupport::new(STACK)],
      order: Vec::new(),
      image: String::new(),
    },
    layer,
  }
}

/// A meta-buildpack whose single group lists `children`.
pub fn meta_buildpack(id: &str, version: &str, children: &[&TestBuildpack]) -> TestBuildpack {
  let mut meta = buildpack(id, version, 16);
  meta.record.stacks = Vec::new();
  meta.record.order = vec![OrderEntry {
    group: children
      .iter()
      .map(|child| {
        GroupEntry::new(
          BuildpackRef::exact(child.record.id.clone(), child.record.version.clone()),
          false,
        )
      })
      .collect(),
  }];
  meta
}

/// Publish a package image; the first buildpack is its primary.
pub fn publish(registry: &InMemoryRegistry, reference: &str, buildpacks: &[&TestBuildpack]) -> String {
  let mut builder = PackageBuilder::new(config("linux"));
  for bp in buildpacks {
    builder = builder.buildpack(&bp.record, bp.layer.clone());
  }
  registry.insert(reference, builder.build().unwrap()).unwrap()
}

pub fn anonymous() -> Arc<dyn Keychain> {
  Arc::new(AnonymousKeychain)
}

/// Read packages into a source object the way callers outside this crate do.
pub fn source(
  registry: &Arc<InMemoryRegistry>,
  keychain: &Arc<dyn Keychain>,
  kind: ObjectKind,
  name: &str,
  images: &[&str],
  secret: Option<SecretRef>,
) -> SourceObject {
  let reader = PackageReader::new(Arc::clone(registry) as Arc<dyn Registry>, Arc::clone(keychain));
  let images: Vec<String> = images.iter().map(|i| i.to_string()).collect();
  reader.source_object(kind, name, &images, secret).unwrap()
}
