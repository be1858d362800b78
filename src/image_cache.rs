//! Content-addressed store of rendered equations
//!
//! Images are keyed by the SHA-256 of the normalized markup. Each one is
//! written once to `<dir>/<digest>.png` and served from a bounded LRU in
//! memory after that. The digest doubles as the public cache key in image
//! URLs, so a browser can keep the PNG for a year.

use std::fs;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;
use crate::error::{RenderError, Result, StorageError};

/// Hex-encoded SHA-256 of normalized markup
pub type ImageDigest = String;

const DIGEST_LEN: usize = 64;

/// A rendered equation and the key it is stored under
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub digest: ImageDigest,
    pub bytes: Arc<Vec<u8>>,
}

/// Image cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    /// Lookups answered from memory or disk
    pub hits: u64,
    /// Lookups that had to render
    pub misses: u64,
}

/// Disk-backed, content-addressed PNG cache
pub struct RenderedImageCache {
    dir: PathBuf,
    memory: Mutex<LruCache<ImageDigest, Arc<Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Suffix for temporary files, unique within this cache
    next_tmp: AtomicU64,
}

impl RenderedImageCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.memory_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            dir: config.dir.clone(),
            memory: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            next_tmp: AtomicU64::new(0),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Return the stored image for `normalized_xml`, rendering it on a miss
    ///
    /// The renderer runs without any lock held. Two callers racing on the
    /// same digest both render; the bytes are identical so the second
    /// write is dropped.
    pub fn get_or_render<F>(&self, normalized_xml: &str, render: F) -> Result<RenderedImage>
    where
        F: FnOnce(&str) -> std::result::Result<Vec<u8>, RenderError>,
    {
        let digest = digest(normalized_xml);

        if let Some(bytes) = self.get(&digest)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(digest = %digest, "Rendered image cache hit");
            return Ok(RenderedImage { digest, bytes });
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let bytes = render(normalized_xml).map_err(|e| {
            tracing::warn!(digest = %digest, error = %e, "Renderer rejected MathML");
            e
        })?;

        self.persist(&digest, &bytes)?;
        let bytes = Arc::new(bytes);
        self.memory.lock().put(digest.clone(), bytes.clone());

        tracing::debug!(digest = %digest, size = bytes.len(), "Rendered and stored image");
        Ok(RenderedImage { digest, bytes })
    }

    /// Look up an image by digest alone
    ///
    /// Anything that is not a well-formed digest is reported as absent
    /// without touching the filesystem.
    pub fn get(&self, digest: &str) -> std::result::Result<Option<Arc<Vec<u8>>>, StorageError> {
        if !is_valid_digest(digest) {
            return Ok(None);
        }

        if let Some(bytes) = self.memory.lock().get(digest) {
            return Ok(Some(bytes.clone()));
        }

        let path = self.image_path(digest);
        match fs::read(&path) {
            Ok(data) => {
                let bytes = Arc::new(data);
                self.memory.lock().put(digest.to_string(), bytes.clone());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read { path, source }),
        }
    }

    pub fn contains(&self, digest: &str) -> bool {
        is_valid_digest(digest)
            && (self.memory.lock().contains(digest) || self.image_path(digest).exists())
    }

    pub fn stats(&self) -> ImageCacheStats {
        let memory = self.memory.lock();
        ImageCacheStats {
            memory_entries: memory.len(),
            memory_capacity: memory.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn image_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}.png", digest))
    }

    /// Write-if-absent through a temporary file, so readers never see a
    /// partial image.
    fn persist(&self, digest: &str, bytes: &[u8]) -> std::result::Result<(), StorageError> {
        let path = self.image_path(digest);
        if path.exists() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).map_err(|source| StorageError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            digest,
            std::process::id(),
            self.next_tmp.fetch_add(1, Ordering::Relaxed)
        ));

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&tmp) {
            Ok(file) => file,
            // Another cache on this directory is writing the same bytes
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(source) => return Err(StorageError::Write { path, source }),
        };

        let written = file
            .write_all(bytes)
            .and_then(|_| file.sync_all())
            .and_then(|_| fs::rename(&tmp, &path));

        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::Write { path, source });
        }
        Ok(())
    }
}

/// SHA-256 of the UTF-8 text, lowercase hex
pub fn digest(normalized_xml: &str) -> ImageDigest {
    let mut hasher = Sha256::new();
    hasher.update(normalized_xml.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn is_valid_digest(digest: &str) -> bool {
    digest.len() == DIGEST_LEN
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
