//! Deterministic layer archives.
//!
//! Every entry gets a fixed modification time, an explicit mode and an
//! explicit owner, so the same entries always produce the same tar stream and
//! therefore the same diff-id and digest.

use std::io;

use tar::{Builder, EntryType, Header};

use super::layer::StaticLayer;
use crate::consts::{DIR_MODE, FILE_MODE, NORMALIZED_MTIME};

/// Numeric owner of an archive entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
  pub uid: u64,
  pub gid: u64,
}

impl Owner {
  pub fn new(uid: u64, gid: u64) -> Self {
    Self { uid, gid }
  }
}

/// Builds a single layer from explicitly listed entries.
pub struct LayerArchive {
  builder: Builder<Vec<u8>>,
}

impl Default for LayerArchive {
  fn default() -> Self {
    Self::new()
  }
}

impl LayerArchive {
  pub fn new() -> Self {
    Self {
      builder: Builder::new(Vec::new()),
    }
  }

  /// Add a directory entry with the default directory mode.
  pub fn add_dir(&mut self, path: &str, owner: Owner) -> io::Result<()> {
    let mut header = header(EntryType::Directory, 0, owner, DIR_MODE);
    self.builder.append_data(&mut header, normalize(path), io::empty())
  }

  /// Add a regular file with the default file mode.
  pub fn add_file(&mut self, path: &str, contents: &[u8], owner: Owner) -> io::Result<()> {
    self.add_file_with_mode(path, contents, owner, FILE_MODE)
  }

  pub fn add_file_with_mode(&mut self, path: &str, contents: &[u8], owner: Owner, mode: u32) -> io::Result<()> {
    let mut header = header(EntryType::Regular, contents.len() as u64, owner, mode);
    self.builder.append_data(&mut header, normalize(path), contents)
  }

  /// Finish the tar stream and wrap it as a layer.
  pub fn finish(self) -> io::Result<StaticLayer> {
    let tar = self.builder.into_inner()?;
    StaticLayer::from_tar(&tar)
  }
}

fn header(entry_type: EntryType, size: u64, owner: Owner, mode: u32) -> Header {
  let mut header = Header::new_ustar();
  header.set_entry_type(entry_type);
  header.set_size(size);
  header.set_mode(mode);
  header.set_uid(owner.uid);
  header.set_gid(owner.gid);
  header.set_mtime(NORMALIZED_MTIME);
  header
}

fn normalize(path: &str) -> &str {
  path.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::image::layer::Layer;

  fn sample(owner: Owner) -> StaticLayer {
    let mut archive = LayerArchive::new();
    archive.add_dir("/cnb", owner).unwrap();
    archive.add_file("/cnb/order.toml", b"[[order]]\n", owner).unwrap();
    archive.finish().unwrap()
  }

  #[test]
  fn identical_entries_produce_identical_layers() {
    let first = sample(Owner::new(1000, 1000));
    let second = sample(Owner::new(1000, 1000));
    assert_eq!(first.digest(), second.digest());
    assert_eq!(first.diff_id(), second.diff_id());
  }

  #[test]
  fn owner_changes_the_layer() {
    assert_ne!(sample(Owner::new(1000, 1000)).diff_id(), sample(Owner::new(0, 0)).diff_id());
  }

  #[test]
  fn entries_are_normalized() {
    let layer = sample(Owner::new(1000, 1001));
    let tar = layer.uncompressed().unwrap();
    let mut archive = tar::Archive::new(tar.as_slice());

    let entries: Vec<(String, u32, u64, u64, u64)> = archive
      .entries()
      .unwrap()
      .map(|e| {
        let e = e.unwrap();
        let h = e.header();
        (
          e.path().unwrap().to_string_lossy().to_string(),
          h.mode().unwrap(),
          h.uid().unwrap(),
          h.gid().unwrap(),
          h.mtime().unwrap(),
        )
      })
      .collect();

    assert_eq!(
      entries,
      vec![
        ("cnb".to_string(), DIR_MODE, 1000, 1001, NORMALIZED_MTIME),
        ("cnb/order.toml".to_string(), FILE_MODE, 1000, 1001, NORMALIZED_MTIME),
      ]
    );
  }
}
