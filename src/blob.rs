//! Blob storage for original uploads and VAD clips.

use log::debug;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DispatchError, Result};

/// Somewhere bytes can be put and later fetched by the returned locator
pub trait BlobStore {
    /// Store `bytes` under `name` (a relative, `/`-separated path) and
    /// return the locator workers use to fetch them.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        (**self).put(name, bytes)
    }
}

/// Join a base URL and a relative blob name, percent-encoding each segment
pub fn locator_for(base_url: &str, name: &str) -> String {
    let encoded: Vec<String> = name
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{}/{}", base_url.trim_end_matches('/'), encoded.join("/"))
}

/// Reject names that would escape the storage root
pub fn validate_blob_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|segment| segment == ".." || segment == ".")
    {
        return Err(DispatchError::validation(format!("invalid blob name '{}'", name)));
    }
    Ok(())
}

/// Blobs stored as files below a local directory
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = PathBuf::from(format!("{}.tmpupload", target.display()));
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, target)
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        validate_blob_name(name)?;
        let target = self.root.join(name);
        self.write_atomic(&target, bytes)
            .map_err(|e| DispatchError::external("blob store", format!("{}: {}", target.display(), e)))?;
        debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(locator_for(&self.base_url, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_encodes_segments() {
        assert_eq!(
            locator_for("https://cdn.example.com/audio/", "7/my talk.mp3"),
            "https://cdn.example.com/audio/7/my%20talk.mp3"
        );
    }

    #[test]
    fn test_rejects_escaping_names() {
        assert!(validate_blob_name("../etc/passwd").is_err());
        assert!(validate_blob_name("/abs").is_err());
        assert!(validate_blob_name("7/clips/0.wav").is_ok());
    }

    #[test]
    fn test_local_put_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path(), "http://files");
        let locator = store.put("3/clips/0.wav", b"RIFF").unwrap();

        assert_eq!(locator, "http://files/3/clips/0.wav");
        let written = fs::read(dir.path().join("3/clips/0.wav")).unwrap();
        assert_eq!(written, b"RIFF");
        assert!(!dir.path().join("3/clips/0.wav.tmpupload").exists());
    }
}
