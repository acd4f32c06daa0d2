use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::host::Uploader;

/// Ordered, unique (case-insensitive) sequence of known dropped-file paths,
/// plus the set of digests already shipped to the host.
pub struct FileRegistry {
    uploader: Arc<dyn Uploader>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    paths: Vec<String>,
    uploaded: HashSet<[u8; 32]>,
}

impl FileRegistry {
    pub fn new(uploader: Arc<dyn Uploader>) -> Self {
        Self {
            uploader,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Inserts the lowercased path if absent; logs on first insertion.
    pub fn add(&self, path: &str) {
        let lower = path.to_lowercase();
        let mut inner = self.inner.lock().unwrap();
        if !inner.paths.contains(&lower) {
            info!(path = %lower, "added new dropped file");
            inner.paths.push(lower);
        }
    }

    /// Renames `old` to `new` in place, preserving its position. A no-op if
    /// `old` isn't tracked.
    pub fn move_path(&self, old: &str, new: &str) {
        let old_lower = old.to_lowercase();
        let new_lower = new.to_lowercase();
        let mut inner = self.inner.lock().unwrap();
        if let Some(idx) = inner.paths.iter().position(|p| p == &old_lower) {
            inner.paths[idx] = new_lower;
        }
    }

    /// Dump then remove. Dumps immediately so in-flight content isn't lost
    /// to a subsequent delete.
    pub async fn delete(&self, path: &str) {
        self.dump(path).await;
        let lower = path.to_lowercase();
        self.inner.lock().unwrap().paths.retain(|p| p != &lower);
    }

    /// Uploads `path` to the host if it still exists on disk and hasn't
    /// already been uploaded (keyed by SHA-256 digest). On failure the
    /// digest is not recorded, so a later retry (e.g. at finalization) can
    /// still succeed.
    pub async fn dump(&self, path: &str) {
        if !Path::new(path).is_file() {
            warn!(%path, "file does not exist on disk, skipping dump");
            return;
        }

        let digest = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let digest: [u8; 32] = hasher.finalize().into();
                digest
            }
            Err(e) => {
                warn!(%path, error = %e, "failed to read file for hashing");
                return;
            }
        };

        if self.inner.lock().unwrap().uploaded.contains(&digest) {
            return;
        }

        let basename = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        let remote_name = format!("{}_{}", &hex::encode(digest)[..16], basename);
        let remote_path = format!("files/{}", remote_name);

        match self.uploader.upload(Path::new(path), &remote_path).await {
            Ok(()) => {
                self.inner.lock().unwrap().uploaded.insert(digest);
            }
            Err(e) => {
                warn!(%path, error = %e, "failed to upload dropped file");
            }
        }
    }

    /// Dumps every tracked file, in insertion order, best-effort — one
    /// failure doesn't abort the rest.
    pub async fn dump_all(&self) {
        let snapshot = self.inner.lock().unwrap().paths.clone();
        for path in snapshot {
            self.dump(&path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullUploader;
    use std::io::Write;

    #[tokio::test]
    async fn move_then_dump_all_uploads_under_new_path_once() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let old_path = tmp.path().to_string_lossy().into_owned();
        let new_path = old_path.clone(); // rename target resolves to the same disk file in this test

        let uploader = Arc::new(NullUploader::default());
        let reg = FileRegistry::new(uploader.clone());

        reg.add(&old_path);
        reg.move_path(&old_path, &new_path);
        reg.dump_all().await;
        reg.dump_all().await; // second pass must not re-upload (digest dedup)

        assert_eq!(uploader.uploaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dump_of_missing_file_is_silent() {
        let uploader = Arc::new(NullUploader::default());
        let reg = FileRegistry::new(uploader.clone());
        reg.add("c:/does/not/exist.bin");
        reg.dump_all().await;
        assert!(uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_dumps_before_removing() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"dropped").unwrap();
        let path = tmp.path().to_string_lossy().into_owned();

        let uploader = Arc::new(NullUploader::default());
        let reg = FileRegistry::new(uploader.clone());
        reg.add(&path);
        reg.delete(&path).await;

        assert_eq!(uploader.uploaded.lock().unwrap().len(), 1);
        // no longer tracked, so a second dump_all is a no-op
        reg.dump_all().await;
        assert_eq!(uploader.uploaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_digest_uploaded_twice_across_add_dump_add() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"same content").unwrap();
        let path = tmp.path().to_string_lossy().into_owned();

        let uploader = Arc::new(NullUploader::default());
        let reg = FileRegistry::new(uploader.clone());
        reg.add(&path);
        reg.dump_all().await;
        reg.add(&path); // re-adding the same path is a dedup no-op too
        reg.dump_all().await;

        assert_eq!(uploader.uploaded.lock().unwrap().len(), 1);
    }
}
