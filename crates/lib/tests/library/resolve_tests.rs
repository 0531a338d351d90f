use std::sync::Arc;

use cnb_forge_lib::buildpack::{BuildpackRef, BuildpackResolver, ObjectKind, RemoteBuildpackFetcher, ResolveError};
use cnb_forge_lib::registry::Registry;

use super::common::*;

#[test]
fn namespaced_object_wins_over_store() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  let ours = buildpack("java", "1.0.0", 100);
  let theirs = buildpack("java", "1.0.0", 200);
  publish(&registry, "registry.local/team/java:1", &[&ours]);
  publish(&registry, "registry.local/store/java:1", &[&theirs]);

  let resolver = BuildpackResolver::from_sources(
    vec![source(&registry, &keychain, ObjectKind::Buildpack, "java", &["registry.local/team/java:1"], None)],
    Vec::new(),
    Some(source(&registry, &keychain, ObjectKind::ClusterStore, "store", &["registry.local/store/java:1"], None)),
  );

  let resolved = resolver.resolve(&BuildpackRef::id("java")).unwrap();
  assert_eq!(resolved.source.kind, ObjectKind::Buildpack);
  assert_eq!(resolved.record.diff_id, ours.record.diff_id);
  assert!(resolved.record.image.starts_with("registry.local/team/java@sha256:"));
}

#[test]
fn newest_version_across_collections() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  publish(&registry, "registry.local/a:1", &[&buildpack("go", "1.0.0", 10)]);
  publish(&registry, "registry.local/b:1", &[&buildpack("go", "2.0.0", 10)]);
  publish(&registry, "registry.local/c:1", &[&buildpack("go", "1.5.0", 10)]);

  let resolver = BuildpackResolver::from_sources(
    vec![source(&registry, &keychain, ObjectKind::Buildpack, "a", &["registry.local/a:1"], None)],
    vec![source(&registry, &keychain, ObjectKind::ClusterBuildpack, "c", &["registry.local/c:1"], None)],
    Some(source(&registry, &keychain, ObjectKind::ClusterStore, "store", &["registry.local/b:1"], None)),
  );

  let resolved = resolver.resolve(&BuildpackRef::id("go")).unwrap();
  assert_eq!(resolved.record.version, "2.0.0");
  assert_eq!(resolved.source.kind, ObjectKind::ClusterStore);
}

#[test]
fn invalid_semver_fails_the_whole_selection() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  publish(&registry, "registry.local/a:1", &[&buildpack("go", "1.0.0", 10)]);
  publish(&registry, "registry.local/b:1", &[&buildpack("go", "abc", 10)]);

  let resolver = BuildpackResolver::from_sources(
    Vec::new(),
    Vec::new(),
    Some(source(
      &registry,
      &keychain,
      ObjectKind::ClusterStore,
      "store",
      &["registry.local/a:1", "registry.local/b:1"],
      None,
    )),
  );

  let err = resolver.resolve(&BuildpackRef::id("go")).unwrap_err();
  assert_eq!(
    err.to_string(),
    "cannot find buildpack 'go' with latest version due to invalid semver 'abc'"
  );
  // an exact version still resolves
  resolver.resolve(&BuildpackRef::exact("go", "1.0.0")).unwrap();
}

#[test]
fn object_reference_without_id_needs_one_root() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  let leaf = buildpack("leaf", "1.0.0", 10);
  let meta = meta_buildpack("meta", "1.0.0", &[&leaf]);
  publish(&registry, "registry.local/meta:1", &[&meta, &leaf]);
  publish(&registry, "registry.local/pair:1", &[&buildpack("x", "1.0.0", 10), &buildpack("y", "1.0.0", 10)]);

  let resolver = BuildpackResolver::from_sources(
    vec![
      source(&registry, &keychain, ObjectKind::Buildpack, "meta", &["registry.local/meta:1"], None),
      source(&registry, &keychain, ObjectKind::Buildpack, "pair", &["registry.local/pair:1"], None),
    ],
    Vec::new(),
    None,
  );

  let resolved = resolver
    .resolve(&BuildpackRef::source(ObjectKind::Buildpack, "meta"))
    .unwrap();
  assert_eq!(resolved.record.id, "meta");

  let err = resolver
    .resolve(&BuildpackRef::source(ObjectKind::Buildpack, "pair"))
    .unwrap_err();
  assert_eq!(err, ResolveError::RootCount { count: 2 });
}

#[test]
fn object_reference_with_id_searches_only_that_object() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  publish(&registry, "registry.local/one:1", &[&buildpack("one", "1.0.0", 10)]);
  publish(&registry, "registry.local/two:1", &[&buildpack("two", "1.0.0", 10)]);

  let resolver = BuildpackResolver::from_sources(
    Vec::new(),
    vec![
      source(&registry, &keychain, ObjectKind::ClusterBuildpack, "one", &["registry.local/one:1"], None),
      source(&registry, &keychain, ObjectKind::ClusterBuildpack, "two", &["registry.local/two:1"], None),
    ],
    None,
  );

  let reference = BuildpackRef::id("two").with_source(ObjectKind::ClusterBuildpack, "one");
  let err = resolver.resolve(&reference).unwrap_err();
  assert_eq!(err.to_string(), "could not find buildpack with id 'two'");

  let missing = BuildpackRef::id("two").with_source(ObjectKind::ClusterBuildpack, "three");
  assert_eq!(
    resolver.resolve(&missing).unwrap_err().to_string(),
    "cluster buildpack not found: three"
  );
}

#[test]
fn provenance_is_recorded_for_every_resolution() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  publish(&registry, "registry.local/one:1", &[&buildpack("one", "1.0.0", 10)]);
  let resolver = BuildpackResolver::from_sources(
    vec![source(&registry, &keychain, ObjectKind::Buildpack, "one", &["registry.local/one:1"], None)],
    Vec::new(),
    None,
  );

  resolver.resolve(&BuildpackRef::id("one")).unwrap();
  resolver.resolve(&BuildpackRef::id("one")).unwrap();
  assert_eq!(resolver.observed_sources().len(), 2);
}

#[test]
fn fetcher_flattens_children_first() {
  let (registry, _) = seeded();
  let keychain = anonymous();
  let a = buildpack("a", "1.0.0", 10);
  let b = buildpack("b", "1.0.0", 10);
  let meta = meta_buildpack("meta", "1.0.0", &[&a, &b]);
  publish(&registry, "registry.local/meta:1", &[&meta, &a, &b]);
  let resolver = BuildpackResolver::from_sources(
    Vec::new(),
    Vec::new(),
    Some(source(&registry, &keychain, ObjectKind::ClusterStore, "store", &["registry.local/meta:1"], None)),
  );
  let fetcher = RemoteBuildpackFetcher::new(Arc::clone(&registry) as Arc<dyn Registry>, keychain);

  let resolved = resolver.resolve(&BuildpackRef::id("meta")).unwrap();
  let fetches = registry.fetches();
  let layers = fetcher.fetch(&resolver, &resolved).unwrap();
  let ids: Vec<&str> = layers.iter().map(|l| l.record.id.as_str()).collect();
  assert_eq!(ids, vec!["a", "b", "meta"]);
  // nothing is downloaded until layer bytes are needed
  assert_eq!(registry.fetches(), fetches);
}
