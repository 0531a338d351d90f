//! Fixtures shared by unit tests.

use crate::buildpack::types::{BuildpackRecord, StackSupport};
use crate::image::layer::{Layer, LayerHandle, StaticLayer};
use crate::image::{Image, ImageConfig};
use crate::registry::memory::InMemoryRegistry;
use crate::util::hash::Digest;

/// A minimal linux/amd64 config.
pub fn linux_config() -> ImageConfig {
  ImageConfig {
    os: "linux".to_string(),
    architecture: "amd64".to_string(),
    ..ImageConfig::default()
  }
}

/// A tar stream holding a single file.
pub fn tar_with_file(path: &str, contents: &[u8]) -> Vec<u8> {
  let mut builder = tar::Builder::new(Vec::new());
  let mut header = tar::Header::new_ustar();
  header.set_size(contents.len() as u64);
  header.set_mode(0o644);
  header.set_mtime(0);
  builder.append_data(&mut header, path, contents).unwrap();
  builder.into_inner().unwrap()
}

/// A layer holding a single file.
pub fn static_layer(path: &str, contents: &[u8]) -> LayerHandle {
  StaticLayer::from_tar(&tar_with_file(path, contents)).unwrap().into_handle()
}

/// Stack id used by record fixtures.
pub const STACK_ID: &str = "io.buildpacks.stacks.jammy";

/// A leaf buildpack record with synthetic digests that supports [`STACK_ID`].
pub fn record(id: &str, version: &str) -> BuildpackRecord {
  let digest = Digest::of_bytes(format!("{}@{}", id, version).as_bytes());
  BuildpackRecord {
    id: id.to_string(),
    version: version.to_string(),
    diff_id: Digest::of_bytes(format!("diff:{}@{}", id, version).as_bytes()),
    size: 100,
    homepage: None,
    api: "0.9".to_string(),
    stacks: vec![StackSupport::new(STACK_ID)],
    order: Vec::new(),
    image: format!("registry.local/{}@{}", id, digest),
    digest,
  }
}

/// Publish a single-layer image for `id@version` and return a record pointing at it.
///
/// The file inside the layer is padded to at least `size_hint` bytes.
pub fn published_record(registry: &InMemoryRegistry, id: &str, version: &str, size_hint: usize) -> BuildpackRecord {
  let mut content = format!("{}@{}", id, version).into_bytes();
  // Pseudo-random filler keeps compressed size roughly proportional to size_hint.
  let mut state: u32 = content.iter().fold(2166136261, |h, b| (h ^ *b as u32).wrapping_mul(16777619));
  while content.len() < size_hint {
    state = state.wrapping_mul(1664525).wrapping_add(1013904223);
    content.push((state >> 24) as u8);
  }
  let layer = StaticLayer::from_tar(&tar_with_file("buildpack", &content)).unwrap();
  let image = Image::new(linux_config()).with_layer(layer.clone().into_handle());
  let identifier = registry
    .insert(&format!("registry.local/{}:{}", id, version), image)
    .unwrap();

  BuildpackRecord {
    digest: layer.digest(),
    diff_id: layer.diff_id(),
    size: layer.size(),
    image: identifier,
    ..record(id, version)
  }
}
