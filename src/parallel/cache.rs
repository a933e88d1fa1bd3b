//! On-disk memoization of worker results.
//!
//! Each key maps to one file in the cache directory. The file name is derived only from
//! the key, so running the same batch twice finds every result of the first run. The
//! cache is advisory: unreadable or undecodable entries count as misses and the worker
//! is run again.
//!
//! Concurrent writes for the same key within one batch are not guarded. Callers must
//! keep keys unique per batch.

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use super::error::ParallelError;

/// File naming and encoding of cache entries.
pub trait CacheCodec: Debug + Send + Sync {
    /// File name of the entry for a serialized key.
    fn file_name(&self, key: &str) -> String;

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ParallelError>;

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ParallelError>;
}

/// JSON files named by the SHA-256 digest of the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn file_name(&self, key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{hex}.json")
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, ParallelError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, ParallelError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    codec: Arc<dyn CacheCodec>,
}

impl Cache {
    /// A JSON cache in `dir`. The directory is created on first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_codec(dir, JsonCodec)
    }

    pub fn with_codec(dir: impl Into<PathBuf>, codec: impl CacheCodec + 'static) -> Self {
        Self {
            dir: dir.into(),
            codec: Arc::new(codec),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(self.codec.file_name(key))
    }

    pub(crate) fn ensure_dir(&self) -> Result<(), ParallelError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Loads the entry for `key`, or `None` on a miss.
    pub fn load<R: DeserializeOwned>(&self, key: &str) -> Option<R> {
        let path = self.path(key);
        let bytes = fs::read(&path).ok()?;

        let decoded = self
            .codec
            .decode(&bytes)
            .and_then(|value| serde_json::from_value(value).map_err(ParallelError::from));

        match decoded {
            Ok(value) => {
                log::debug!("Cache hit for {key}");
                Some(value)
            }
            Err(e) => {
                log::warn!("Ignoring undecodable cache entry {}: {e}", path.display());
                None
            }
        }
    }

    pub fn store<R: Serialize>(&self, key: &str, value: &R) -> Result<(), ParallelError> {
        let bytes = self.codec.encode(&serde_json::to_value(value)?)?;
        fs::write(self.path(key), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_deterministic() {
        let a = JsonCodec.file_name("[1,2]");
        let b = JsonCodec.file_name("[1,2]");
        let c = JsonCodec.file_name("[2,1]");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64 + ".json".len());
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.ensure_dir().unwrap();

        cache.store("k", &vec![1.0, 2.0]).unwrap();

        assert_eq!(cache.load::<Vec<f64>>("k"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.load::<Vec<f64>>("missing"), None);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.ensure_dir().unwrap();

        fs::write(cache.path("k"), b"not json").unwrap();

        assert_eq!(cache.load::<Vec<f64>>("k"), None);
    }
}
