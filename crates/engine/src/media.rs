//! Filesystem media storage.
//!
//! Content-addressed and append-only: file names are the first 16 hex
//! characters of the payload's SHA-256, so identical payloads are stored
//! once and existing files are never rewritten.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use arena_domain::error::{Error, Result};
use arena_pipeline::{MediaStorage, StoredMedia};

pub struct FsMediaStorage {
    dir: PathBuf,
}

impl FsMediaStorage {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn extension_for(media_type: &str) -> &'static str {
        match media_type {
            "audio/pcm" => "pcm",
            "audio/wav" | "audio/x-wav" => "wav",
            "image/png" => "png",
            "image/jpeg" => "jpg",
            _ => "bin",
        }
    }
}

impl MediaStorage for FsMediaStorage {
    fn write(&self, media_type: &str, data: &[u8]) -> Result<StoredMedia> {
        let digest = Sha256::digest(data);
        let sha256 = hex::encode(digest);
        let name = format!("{}.{}", &sha256[..16], Self::extension_for(media_type));
        let path = self.dir.join(&name);

        if !path.exists() {
            std::fs::write(&path, data).map_err(Error::Io)?;
        }

        Ok(StoredMedia {
            path: path.to_string_lossy().into_owned(),
            sha256,
            size_bytes: data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_content_addressed_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsMediaStorage::new(dir.path()).unwrap();

        let first = storage.write("audio/pcm", b"payload").unwrap();
        let second = storage.write("audio/pcm", b"payload").unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.sha256, second.sha256);
        assert!(first.path.ends_with(".pcm"));
        assert_eq!(first.size_bytes, 7);

        let different = storage.write("audio/pcm", b"other payload").unwrap();
        assert_ne!(first.path, different.path);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn unknown_media_type_uses_bin() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsMediaStorage::new(dir.path()).unwrap();
        let stored = storage.write("application/octet-stream", b"x").unwrap();
        assert!(stored.path.ends_with(".bin"));
    }
}
