use std::sync::Arc;

use cnb_forge_lib::builder::{BuilderComposer, BuilderMetadata, BuilderRecord, BuilderSpec, ComposeError};
use cnb_forge_lib::buildpack::package::BuildpackLayers;
use cnb_forge_lib::buildpack::{BuildpackRef, BuildpackResolver, GroupEntry, ObjectKind, OrderEntry, SourceObject};
use cnb_forge_lib::consts::{BUILDER_METADATA_LABEL, BUILDPACK_LAYERS_LABEL, ORDER_LABEL};
use cnb_forge_lib::image::Layer;
use cnb_forge_lib::keychain::{AnonymousKeychain, Credentials, Keychain, MultiKeychain, SecretKeychain, SecretRef};
use cnb_forge_lib::lifecycle::LifecycleProvider;
use cnb_forge_lib::registry::Registry;
use cnb_forge_lib::registry::memory::InMemoryRegistry;

use super::common::*;

fn spec(order: Vec<OrderEntry>) -> BuilderSpec {
  BuilderSpec {
    tag: BUILDER_TAG.to_string(),
    description: "integration builder".to_string(),
    stack: stack_spec(),
    secret: None,
    order,
  }
}

fn group(ids: &[&str]) -> OrderEntry {
  OrderEntry {
    group: ids.iter().map(|id| GroupEntry::new(BuildpackRef::id(*id), false)).collect(),
  }
}

/// Node, go and java leaves of distinct sizes, published as separate packages.
fn publish_leaves(registry: &InMemoryRegistry) -> Vec<&'static str> {
  publish(registry, "registry.local/bp/node:1", &[&buildpack("node", "1.0.0", 3000)]);
  publish(registry, "registry.local/bp/go:1", &[&buildpack("go", "1.2.0", 6000)]);
  publish(registry, "registry.local/bp/java:1", &[&buildpack("java", "2.0.0", 1500)]);
  vec!["registry.local/bp/node:1", "registry.local/bp/go:1", "registry.local/bp/java:1"]
}

fn compose_with_store(
  registry: &Arc<InMemoryRegistry>,
  lifecycle: &Arc<dyn LifecycleProvider>,
  store_images: &[&str],
  order: Vec<OrderEntry>,
) -> Result<BuilderRecord, ComposeError> {
  let keychain = anonymous();
  let store = source(registry, &keychain, ObjectKind::ClusterStore, "default", store_images, None).with_generation(4);
  let resolver = BuildpackResolver::from_sources(Vec::new(), Vec::new(), Some(store));
  let composer = BuilderComposer::new(
    Arc::clone(registry) as Arc<dyn Registry>,
    keychain,
    Arc::clone(lifecycle),
  );
  composer.compose(&spec(order), &resolver)
}

mod determinism {
  use super::*;

  #[test]
  fn repeated_runs_produce_the_same_image() {
    let (registry, lifecycle) = seeded();
    let images = publish_leaves(&registry);
    let order = vec![group(&["node", "java"]), group(&["go"])];

    let first = compose_with_store(&registry, &lifecycle, &images, order.clone()).unwrap();
    let second = compose_with_store(&registry, &lifecycle, &images, order).unwrap();

    assert_eq!(first.image, second.image);
    assert_eq!(first.buildpacks, second.buildpacks);
  }

  #[test]
  fn store_declaration_order_does_not_matter() {
    let (registry, lifecycle) = seeded();
    let mut images = publish_leaves(&registry);
    let order = vec![group(&["node", "go", "java"])];

    let forward = compose_with_store(&registry, &lifecycle, &images, order.clone()).unwrap();
    images.reverse();
    let reversed = compose_with_store(&registry, &lifecycle, &images, order).unwrap();

    assert_eq!(forward.image, reversed.image);
  }

  #[test]
  fn buildpacks_are_listed_largest_first() {
    let (registry, lifecycle) = seeded();
    let images = publish_leaves(&registry);
    let record = compose_with_store(&registry, &lifecycle, &images, vec![group(&["java", "node", "go"])]).unwrap();

    let ids: Vec<&str> = record.buildpacks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["go", "node", "java"]);
    // order keeps the declared sequence
    let declared: Vec<&str> = record.order[0].group.iter().filter_map(|g| g.reference.id_str()).collect();
    assert_eq!(declared, vec!["java", "node", "go"]);
  }
}

mod saving {
  use super::*;

  #[test]
  fn identical_builder_is_uploaded_once() {
    let (registry, lifecycle) = seeded();
    let images = publish_leaves(&registry);
    let order = vec![group(&["node"])];

    let first = compose_with_store(&registry, &lifecycle, &images, order.clone()).unwrap();
    let second = compose_with_store(&registry, &lifecycle, &images, order).unwrap();

    assert_eq!(registry.uploads(), 1);
    assert_eq!(first.image, second.image);
  }

  #[test]
  fn saved_image_carries_builder_labels() {
    let (registry, lifecycle) = seeded();
    let images = publish_leaves(&registry);
    let record = compose_with_store(&registry, &lifecycle, &images, vec![group(&["node", "go"])]).unwrap();

    let (image, identifier) = registry.fetch(&Credentials::anonymous(), BUILDER_TAG).unwrap();
    assert_eq!(identifier, record.image);
    assert_eq!(image.config().working_dir.as_deref(), Some("/layers"));

    let metadata: BuilderMetadata = serde_json::from_str(image.label(BUILDER_METADATA_LABEL).unwrap()).unwrap();
    assert_eq!(metadata.description, "integration builder");
    assert_eq!(metadata.lifecycle.version, "0.17.0");
    assert_eq!(metadata.lifecycle.api.buildpack, "0.9");
    assert_eq!(metadata.stack.run_image.image, record.stack.run_image);
    assert_eq!(metadata.stack.run_image.mirrors, vec!["mirror.local/stack/run:jammy".to_string()]);
    assert_eq!(metadata.buildpacks, record.buildpacks);

    let order: Vec<OrderEntry> = serde_json::from_str(image.label(ORDER_LABEL).unwrap()).unwrap();
    assert_eq!(order, record.order);

    let layers: BuildpackLayers = serde_json::from_str(image.label(BUILDPACK_LAYERS_LABEL).unwrap()).unwrap();
    assert_eq!(layers.len(), 2);
    assert!(layers["go"].contains_key("1.2.0"));
  }

  #[test]
  fn record_reports_generations() {
    let (registry, lifecycle) = seeded();
    let images = publish_leaves(&registry);
    let record = compose_with_store(&registry, &lifecycle, &images, vec![group(&["node"])]).unwrap();

    assert_eq!(record.stack.id, STACK);
    assert_eq!(record.observed_stack_generation, 2);
    assert_eq!(record.observed_store_generation, Some(4));
    assert_eq!(record.sources.len(), 1);
    assert_eq!(record.sources[0].kind, ObjectKind::ClusterStore);
  }
}

mod flattening {
  use super::*;

  #[test]
  fn meta_buildpack_contributes_children_and_itself() {
    let (registry, lifecycle) = seeded();
    let npm = buildpack("npm", "1.0.0", 1000);
    let node = buildpack("node", "1.0.0", 2000);
    let meta = meta_buildpack("nodejs", "1.0.0", &[&node, &npm]);
    publish(&registry, "registry.local/bp/nodejs:1", &[&meta, &node, &npm]);

    let record = compose_with_store(
      &registry,
      &lifecycle,
      &["registry.local/bp/nodejs:1"],
      vec![group(&["nodejs"])],
    )
    .unwrap();

    let ids: Vec<&str> = record.buildpacks.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["node", "npm", "nodejs"]);
    assert_eq!(record.order[0].group.len(), 1);

    let (image, _) = registry.fetch(&Credentials::anonymous(), BUILDER_TAG).unwrap();
    let layers: BuildpackLayers = serde_json::from_str(image.label(BUILDPACK_LAYERS_LABEL).unwrap()).unwrap();
    assert_eq!(layers["nodejs"]["1.0.0"].order.len(), 1);
    assert_eq!(layers["node"]["1.0.0"].layer_diff_id, node.layer.diff_id());
  }

  #[test]
  fn shared_dependency_is_stored_once() {
    let (registry, lifecycle) = seeded();
    let shared = buildpack("shared", "1.0.0", 500);
    let a = meta_buildpack("a", "1.0.0", &[&shared]);
    let b = meta_buildpack("b", "1.0.0", &[&shared]);
    publish(&registry, "registry.local/bp/a:1", &[&a, &shared]);
    publish(&registry, "registry.local/bp/b:1", &[&b, &shared]);

    let record = compose_with_store(
      &registry,
      &lifecycle,
      &["registry.local/bp/a:1", "registry.local/bp/b:1"],
      vec![group(&["a"]), group(&["b"])],
    )
    .unwrap();

    assert_eq!(record.buildpacks.len(), 3);
    let (image, _) = registry.fetch(&Credentials::anonymous(), BUILDER_TAG).unwrap();
    let shared_layers = image
      .layers()
      .iter()
      .filter(|l| l.diff_id() == shared.layer.diff_id())
      .count();
    assert_eq!(shared_layers, 1);
  }

  #[test]
  fn missing_child_aborts_composition() {
    let (registry, lifecycle) = seeded();
    let ghost = buildpack("ghost", "1.0.0", 10);
    let meta = meta_buildpack("meta", "1.0.0", &[&ghost]);
    publish(&registry, "registry.local/bp/meta:1", &[&meta]);

    let err = compose_with_store(
      &registry,
      &lifecycle,
      &["registry.local/bp/meta:1"],
      vec![group(&["meta"])],
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "could not find buildpack with id 'ghost'");
    assert_eq!(registry.uploads(), 0);
  }
}

mod rejection {
  use super::*;

  #[test]
  fn non_linux_stack_is_rejected() {
    let registry = Arc::new(InMemoryRegistry::new());
    seed_stack(&registry, "windows", &[], &[]);
    let lifecycle = seed_lifecycle(&registry);
    let images = publish_leaves(&registry);

    let err = compose_with_store(&registry, &lifecycle, &images, vec![group(&["node"])]).unwrap_err();
    assert_eq!(err.to_string(), "windows base images are not supported");
    assert_eq!(registry.uploads(), 0);
  }

  #[test]
  fn mixin_requirements_are_enforced() {
    let (registry, lifecycle) = seeded();
    let mut needs_curl = buildpack("curl-user", "1.0.0", 100);
    needs_curl.record.stacks[0].mixins = vec!["curl".to_string()];
    let mut needs_git = buildpack("git-user", "1.0.0", 100);
    needs_git.record.stacks[0].mixins = vec!["build:git".to_string(), "shared".to_string()];
    publish(&registry, "registry.local/bp/curl:1", &[&needs_curl]);
    publish(&registry, "registry.local/bp/git:1", &[&needs_git]);
    let images = ["registry.local/bp/curl:1", "registry.local/bp/git:1"];

    compose_with_store(&registry, &lifecycle, &images, vec![group(&["git-user"])]).unwrap();
    let err = compose_with_store(&registry, &lifecycle, &images, vec![group(&["curl-user"])]).unwrap_err();
    assert_eq!(
      err.to_string(),
      "buildpack 'curl-user@1.0.0' requires missing mixin(s): curl"
    );
  }

  #[test]
  fn run_image_with_build_mixin_is_rejected() {
    let registry = Arc::new(InMemoryRegistry::new());
    seed_stack(&registry, "linux", &["shared"], &["shared", "build:gcc"]);
    let lifecycle = seed_lifecycle(&registry);

    let err = compose_with_store(&registry, &lifecycle, &[], Vec::new()).unwrap_err();
    assert_eq!(err.to_string(), "run image contains build-only mixin(s): build:gcc");
  }

  #[test]
  fn unsupported_buildpack_api_is_rejected() {
    let (registry, lifecycle) = seeded();
    let mut old = buildpack("old", "0.1.0", 100);
    old.record.api = "0.2".to_string();
    publish(&registry, "registry.local/bp/old:1", &[&old]);

    let err = compose_with_store(&registry, &lifecycle, &["registry.local/bp/old:1"], vec![group(&["old"])])
      .unwrap_err();
    assert_eq!(
      err.to_string(),
      "buildpack 'old@0.1.0' uses unsupported buildpack api '0.2' (supported: 0.7, 0.8, 0.9)"
    );
  }
}

mod credentials {
  use super::*;

  #[test]
  fn each_source_uses_its_own_secret() {
    let secret = SecretRef::namespaced("team", "private-registry");
    let private = Credentials::basic("team", "s3cret");
    let (registry, lifecycle) =
      seeded_with(InMemoryRegistry::new().with_credentials("registry.local/private/rust", private.clone()));
    publish(&registry, "registry.local/private/rust:1", &[&buildpack("rust", "1.80.0", 800)]);
    let images = publish_leaves(&registry);

    let keychain: Arc<dyn Keychain> = Arc::new(
      MultiKeychain::new()
        .with(SecretKeychain::new().with_secret(secret.clone(), private))
        .with(AnonymousKeychain),
    );
    let namespaced = source(
      &registry,
      &keychain,
      ObjectKind::Buildpack,
      "rust",
      &["registry.local/private/rust:1"],
      Some(secret),
    )
    .in_namespace("team");
    let store = source(&registry, &keychain, ObjectKind::ClusterStore, "default", &images, None);
    let resolver = BuildpackResolver::from_sources(vec![namespaced], Vec::new(), Some(store));
    let composer = BuilderComposer::new(
      Arc::clone(&registry) as Arc<dyn Registry>,
      Arc::clone(&keychain),
      Arc::clone(&lifecycle),
    );

    let record = composer.compose(&spec(vec![group(&["rust", "node"])]), &resolver).unwrap();
    assert_eq!(record.buildpacks.len(), 2);
    assert_eq!(record.sources.len(), 2);
    assert_eq!(record.sources[0].namespace.as_deref(), Some("team"));
  }

  #[test]
  fn anonymous_access_to_private_source_fails() {
    let private = Credentials::basic("team", "s3cret");
    let (registry, lifecycle) =
      seeded_with(InMemoryRegistry::new().with_credentials("registry.local/private/rust", private));
    let rust = buildpack("rust", "1.80.0", 800);
    let identifier = publish(&registry, "registry.local/private/rust:1", &[&rust]);

    // Records copied from a trusted listing, but no secret bound to the object.
    let mut record = rust.record.clone();
    record.image = identifier;
    let object = SourceObject::new(ObjectKind::Buildpack, "rust").with_buildpacks(vec![record]);
    let resolver = BuildpackResolver::from_sources(vec![object], Vec::new(), None);
    let composer = BuilderComposer::new(
      Arc::clone(&registry) as Arc<dyn Registry>,
      anonymous(),
      Arc::clone(&lifecycle),
    );

    let err = composer.compose(&spec(vec![group(&["rust"])]), &resolver).unwrap_err();
    assert!(matches!(err, ComposeError::SaveImage { .. }), "unexpected error: {}", err);
    assert_eq!(registry.uploads(), 0);
  }
}
