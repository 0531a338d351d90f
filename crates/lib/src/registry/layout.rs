//! OCI image layout on the local filesystem.
//!
//! ```text
//! <root>/
//!   oci-layout
//!   index.json          manifests named by org.opencontainers.image.ref.name
//!   blobs/sha256/<hex>  layers, configs and manifests
//! ```
//!
//! References are matched against the `repository:tag` stored in the ref-name
//! annotation. Credentials are accepted and ignored; access is governed by the
//! filesystem.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{Registry, RegistryError};
use crate::image::layer::{Layer, LayerError, LayerHandle};
use crate::image::oci::{self, ANNOTATION_REF_NAME, ConfigFile, Descriptor, Index, Manifest};
use crate::image::reference::ImageReference;
use crate::image::{Image, ImageConfig};
use crate::keychain::Credentials;
use crate::util::hash::Digest;

const LAYOUT_FILE: &str = "oci-layout";
const LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone)]
pub struct LayoutRegistry {
  root: PathBuf,
}

impl LayoutRegistry {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn blob_path(&self, digest: &Digest) -> PathBuf {
    blob_path(&self.root, digest)
  }

  fn read_index(&self) -> Result<Index, RegistryError> {
    let path = self.root.join(INDEX_FILE);
    if !path.exists() {
      return Ok(Index::default());
    }
    read_json(&path)
  }

  fn write_index(&self, index: &Index) -> Result<(), RegistryError> {
    let path = self.root.join(INDEX_FILE);
    let content = serde_json::to_vec_pretty(index).map_err(|e| RegistryError::Corrupt(e.to_string()))?;
    fs::write(&path, content).map_err(|source| RegistryError::Io { path, source })
  }

  fn write_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), RegistryError> {
    let path = self.blob_path(digest);
    if path.exists() {
      return Ok(());
    }
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|source| RegistryError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }
    fs::write(&path, data).map_err(|source| RegistryError::Io { path, source })
  }

  fn ensure_layout(&self) -> Result<(), RegistryError> {
    fs::create_dir_all(&self.root).map_err(|source| RegistryError::Io {
      path: self.root.clone(),
      source,
    })?;
    let path = self.root.join(LAYOUT_FILE);
    if !path.exists() {
      fs::write(&path, LAYOUT_CONTENT).map_err(|source| RegistryError::Io { path, source })?;
    }
    Ok(())
  }

  /// Descriptor for the manifest a reference points at.
  fn locate(&self, reference: &ImageReference, original: &str) -> Result<Descriptor, RegistryError> {
    let index = self.read_index()?;
    let found = match &reference.digest {
      Some(digest) => index.manifests.into_iter().find(|d| {
        &d.digest == digest
          && d
            .annotation(ANNOTATION_REF_NAME)
            .is_some_and(|name| repository_of(name) == reference.repository)
      }),
      None => {
        let name = reference.tagged_name();
        index
          .manifests
          .into_iter()
          .find(|d| d.annotation(ANNOTATION_REF_NAME) == Some(name.as_str()))
      }
    };
    found.ok_or_else(|| RegistryError::NotFound(original.to_string()))
  }

  /// Every `repository:tag` name stored in the layout, sorted.
  pub fn tags(&self) -> Result<Vec<String>, RegistryError> {
    let index = self.read_index()?;
    let mut names: Vec<String> = index
      .manifests
      .iter()
      .filter_map(|d| d.annotation(ANNOTATION_REF_NAME).map(str::to_string))
      .collect();
    names.sort();
    Ok(names)
  }
}

impl Registry for LayoutRegistry {
  fn fetch(&self, _credentials: &Credentials, reference: &str) -> Result<(Image, String), RegistryError> {
    let parsed = parse(reference)?;
    let descriptor = self.locate(&parsed, reference)?;

    let manifest: Manifest = read_json(&self.blob_path(&descriptor.digest))?;
    let config: ConfigFile = read_json(&self.blob_path(&manifest.config.digest))?;

    if config.rootfs.diff_ids.len() != manifest.layers.len() {
      return Err(RegistryError::Corrupt(format!(
        "manifest {} has {} layers but config lists {} diff ids",
        descriptor.digest,
        manifest.layers.len(),
        config.rootfs.diff_ids.len()
      )));
    }

    let layers: Vec<LayerHandle> = manifest
      .layers
      .iter()
      .zip(config.rootfs.diff_ids.iter())
      .map(|(layer, diff_id)| {
        Arc::new(BlobLayer {
          path: self.blob_path(&layer.digest),
          digest: layer.digest.clone(),
          diff_id: diff_id.clone(),
          size: layer.size,
          blob: OnceLock::new(),
        }) as LayerHandle
      })
      .collect();

    debug!(reference, digest = %descriptor.digest.short(), layers = layers.len(), "read image from layout");
    let image = Image::from_parts(ImageConfig::from(config), layers);
    Ok((image, parsed.identifier(&descriptor.digest)))
  }

  fn save(&self, _credentials: &Credentials, tag: &str, image: &Image) -> Result<String, RegistryError> {
    let parsed = parse(tag)?;
    let name = parsed.tagged_name();
    let manifest = image.manifest()?;
    let manifest_blob = serde_json::to_vec(&manifest).map_err(crate::image::ImageError::from)?;
    let digest = Digest::of_bytes(&manifest_blob);
    let identifier = parsed.identifier(&digest);

    let mut index = self.read_index()?;
    let unchanged = index
      .manifests
      .iter()
      .any(|d| d.digest == digest && d.annotation(ANNOTATION_REF_NAME) == Some(name.as_str()));
    if unchanged {
      debug!(tag, digest = %digest.short(), "image unchanged, skipping write");
      return Ok(identifier);
    }

    self.ensure_layout()?;
    for layer in image.layers() {
      let blob = layer.compressed().map_err(|source| RegistryError::Layer {
        digest: layer.digest(),
        source,
      })?;
      self.write_blob(&layer.digest(), &blob)?;
    }
    self.write_blob(&manifest.config.digest, &image.config_blob()?)?;
    self.write_blob(&digest, &manifest_blob)?;

    index
      .manifests
      .retain(|d| d.annotation(ANNOTATION_REF_NAME) != Some(name.as_str()));
    let mut descriptor = Descriptor::new(oci::MANIFEST_MEDIA_TYPE, digest.clone(), manifest_blob.len() as u64);
    descriptor.annotations = Some([(ANNOTATION_REF_NAME.to_string(), name)].into_iter().collect());
    index.manifests.push(descriptor);
    index.sort_manifests();
    self.write_index(&index)?;

    info!(tag, digest = %digest.short(), root = %self.root.display(), "saved image to layout");
    Ok(identifier)
  }
}

/// A layer blob inside a layout, read from disk on first use.
struct BlobLayer {
  path: PathBuf,
  digest: Digest,
  diff_id: Digest,
  size: u64,
  blob: OnceLock<Result<Arc<Vec<u8>>, LayerError>>,
}

impl fmt::Debug for BlobLayer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BlobLayer")
      .field("path", &self.path)
      .field("digest", &self.digest)
      .field("size", &self.size)
      .finish()
  }
}

impl BlobLayer {
  fn read(&self) -> Result<Arc<Vec<u8>>, LayerError> {
    let data = fs::read(&self.path).map_err(|source| LayerError::Read {
      digest: self.digest.clone(),
      path: self.path.clone(),
      source: Arc::new(source),
    })?;
    let actual = Digest::of_bytes(&data);
    if actual != self.digest {
      return Err(LayerError::DigestMismatch {
        expected: self.digest.clone(),
        actual,
      });
    }
    Ok(Arc::new(data))
  }
}

impl Layer for BlobLayer {
  fn digest(&self) -> Digest {
    self.digest.clone()
  }

  fn diff_id(&self) -> Digest {
    self.diff_id.clone()
  }

  fn size(&self) -> u64 {
    self.size
  }

  fn compressed(&self) -> Result<Arc<Vec<u8>>, LayerError> {
    self.blob.get_or_init(|| self.read()).clone()
  }
}

fn blob_path(root: &Path, digest: &Digest) -> PathBuf {
  root.join("blobs").join(digest.algorithm()).join(digest.hex())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RegistryError> {
  let content = fs::read(path).map_err(|source| RegistryError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_slice(&content).map_err(|e| RegistryError::Corrupt(format!("{}: {}", path.display(), e)))
}

fn repository_of(tagged_name: &str) -> &str {
  let last_slash = tagged_name.rfind('/').map(|i| i + 1).unwrap_or(0);
  match tagged_name[last_slash..].rfind(':') {
    Some(i) => &tagged_name[..last_slash + i],
    None => tagged_name,
  }
}

fn parse(reference: &str) -> Result<ImageReference, RegistryError> {
  ImageReference::parse(reference).map_err(|source| RegistryError::Reference {
    reference: reference.to_string(),
    source,
  })
}
