//! The destination side of a target download: where `Client::download`'s verified bytes end up.
//!
//! `FileDestination` mirrors `datastore::FilesystemStore::set`'s atomic-write pattern (a temp
//! file in the same directory, renamed into place only once every byte has been verified) so a
//! download that fails partway through never leaves a corrupt file at the final path.

use crate::error::{self, Result};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Where a downloaded target's verified bytes are written.
///
/// `write` may be called any number of times as bytes stream in; `delete` is called once, in
/// place of a final `write`, if verification fails partway through.
pub trait Destination {
    /// Appends `buf` to the destination.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Discards whatever has been written so far. Called when a download fails verification;
    /// never called after a successful download.
    fn delete(&mut self) -> std::io::Result<()>;
}

/// A [`Destination`] that writes a target to a file on disk.
///
/// Bytes are buffered in a temp file alongside `path` and only renamed into place once the
/// download finishes successfully; `delete` simply drops the temp file, leaving `path` untouched.
#[derive(Debug)]
pub struct FileDestination {
    path: PathBuf,
    tmp: Option<NamedTempFile>,
}

impl FileDestination {
    /// Creates a destination that will write to `path` on success.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = NamedTempFile::new_in(dir).context(error::DownloadWrite {
            name: path.display().to_string(),
        })?;
        Ok(Self {
            path,
            tmp: Some(tmp),
        })
    }

    /// Finishes the download, renaming the temp file into place. Call this only after
    /// `Client::download` returns `Ok`; it is not invoked automatically.
    pub fn commit(mut self) -> Result<()> {
        let tmp = self.tmp.take().expect("commit called more than once");
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .context(error::DownloadWrite {
                name: self.path.display().to_string(),
            })?;
        Ok(())
    }
}

impl Destination for FileDestination {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        self.tmp
            .as_mut()
            .expect("write called after delete")
            .write_all(buf)
    }

    fn delete(&mut self) -> std::io::Result<()> {
        // Dropping the `NamedTempFile` removes it; nothing was ever written to `self.path`.
        self.tmp = None;
        Ok(())
    }
}

/// A [`Destination`] that buffers a target entirely in memory. Useful for tests and for small
/// targets a caller wants to inspect without touching disk.
#[derive(Debug, Default)]
pub struct VecDestination(pub Vec<u8>);

impl VecDestination {
    /// Creates an empty destination.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Destination for VecDestination {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.0.extend_from_slice(buf);
        Ok(())
    }

    fn delete(&mut self) -> std::io::Result<()> {
        self.0.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_destination_accumulates_writes_and_clears_on_delete() {
        let mut dest = VecDestination::new();
        dest.write(b"hello ").unwrap();
        dest.write(b"world").unwrap();
        assert_eq!(dest.0, b"hello world");
        dest.delete().unwrap();
        assert!(dest.0.is_empty());
    }

    #[test]
    fn file_destination_leaves_no_file_behind_on_delete() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("target.bin");
        let mut dest = FileDestination::new(&path).unwrap();
        dest.write(b"partial").unwrap();
        dest.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn file_destination_commits_to_the_final_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("target.bin");
        let mut dest = FileDestination::new(&path).unwrap();
        dest.write(b"the bytes").unwrap();
        dest.commit().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"the bytes");
    }
}
