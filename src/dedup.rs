//! Persistent deduplication of matched lines.
//!
//! Novelty is decided by a Bloom filter: no false negatives ever, false
//! positives bounded by the configured rate as the filter approaches its
//! design capacity. The serialized filter is the only durable state tern
//! keeps.
//!
//! # Atomic Writes
//!
//! The filter is rewritten after every addition using the atomic write
//! pattern:
//! 1. Write the full filter to `{path}.tmp`
//! 2. Rename `{path}.tmp` onto `{path}`
//!
//! A crash mid-write leaves the previous on-disk filter intact; at worst
//! the single most recent addition is lost.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::config::DedupConfig;
use crate::error::{DedupError, ReplaceStoreSnafu, WriteStoreSnafu};

/// Line deduplicator, decided at configuration time.
///
/// Selection is a tagged variant rather than an optional trait object so
/// "dedup disabled" is an explicit state, not an absence check.
pub enum Deduplicator {
    /// No deduplication; nothing is ever considered seen.
    Disabled,
    /// Bloom-filter deduplication backed by a file.
    Bloom(BloomDedup),
}

impl Deduplicator {
    /// Build a deduplicator from configuration.
    ///
    /// Fatal on any store failure other than a missing or corrupt file;
    /// the pipeline must not run with dedup silently absent when it was
    /// requested.
    pub fn from_config(config: &DedupConfig) -> Result<Self, DedupError> {
        match config {
            DedupConfig::Off => Ok(Deduplicator::Disabled),
            DedupConfig::Bloom {
                path,
                expected_items,
                false_positive_rate,
            } => Ok(Deduplicator::Bloom(BloomDedup::open(
                path,
                *expected_items,
                *false_positive_rate,
            )?)),
        }
    }

    /// Whether `key` has been seen before. Never touches disk.
    pub fn exists(&self, key: &[u8]) -> Result<bool, DedupError> {
        match self {
            Deduplicator::Disabled => Ok(false),
            Deduplicator::Bloom(dedup) => Ok(dedup.contains(key)),
        }
    }

    /// Mark `key` as seen and persist the updated filter.
    ///
    /// On a persistence failure the in-memory filter still reflects the
    /// addition, so dedup behavior stays correct for the rest of this
    /// process's lifetime; the caller downgrades the error to a warning.
    pub async fn add(&mut self, key: &[u8]) -> Result<(), DedupError> {
        match self {
            Deduplicator::Disabled => Ok(()),
            Deduplicator::Bloom(dedup) => dedup.insert(key).await,
        }
    }
}

/// Bloom-filter deduplicator persisted to a single file.
pub struct BloomDedup {
    path: PathBuf,
    filter: Bloom<[u8]>,
}

impl BloomDedup {
    /// Open the store at `path`, creating a fresh filter sized for
    /// `(expected_items, false_positive_rate)` when no usable file exists.
    ///
    /// When a valid file is loaded the sizing hints are ignored: the
    /// persisted filter carries its own parameters, which may differ from
    /// the current configuration. Re-sizing would discard the seen set,
    /// so the stored sizing wins until the operator deletes the file.
    pub fn open(
        path: &Path,
        expected_items: usize,
        false_positive_rate: f64,
    ) -> Result<Self, DedupError> {
        let filter = match std::fs::read(path) {
            Ok(bytes) => match Bloom::from_slice(&bytes) {
                Ok(filter) => {
                    info!(path = %path.display(), "loaded dedup store");
                    filter
                }
                Err(reason) => {
                    warn!(
                        path = %path.display(),
                        reason = %reason,
                        "dedup store is corrupt or truncated, starting fresh"
                    );
                    Self::fresh_filter(expected_items, false_positive_rate)?
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no dedup store found, starting fresh");
                Self::fresh_filter(expected_items, false_positive_rate)?
            }
            Err(source) => {
                return Err(DedupError::OpenStore {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            filter,
        })
    }

    fn fresh_filter(
        expected_items: usize,
        false_positive_rate: f64,
    ) -> Result<Bloom<[u8]>, DedupError> {
        Bloom::new_for_fp_rate(expected_items, false_positive_rate).map_err(|message| {
            DedupError::FilterSize {
                message: message.to_string(),
            }
        })
    }

    /// Membership test. Purely in-memory.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.filter.check(key)
    }

    /// Insert `key` and persist the whole filter.
    ///
    /// The in-memory insert happens before the write, so a failed write
    /// leaves the running process correct and only the on-disk copy
    /// stale until the next successful persist.
    pub async fn insert(&mut self, key: &[u8]) -> Result<(), DedupError> {
        self.filter.set(key);
        self.persist().await
    }

    /// Write the filter to `{path}.tmp`, then rename onto the canonical
    /// path.
    async fn persist(&self) -> Result<(), DedupError> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, self.filter.to_bytes())
            .await
            .context(WriteStoreSnafu { path: &tmp })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context(ReplaceStoreSnafu { path: &self.path })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_path(dir: &TempDir) -> PathBuf {
        dir.path().join("seen.bloom")
    }

    #[test]
    fn disabled_never_sees_anything() {
        let dedup = Deduplicator::Disabled;
        assert!(!dedup.exists(b"ERROR A").unwrap());
    }

    #[tokio::test]
    async fn disabled_add_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let mut dedup = Deduplicator::from_config(&DedupConfig::Off).unwrap();
        dedup.add(b"ERROR A").await.unwrap();
        assert!(!dedup.exists(b"ERROR A").unwrap());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn added_keys_always_exist() {
        let dir = TempDir::new().unwrap();
        let mut dedup = BloomDedup::open(&store_path(&dir), 1000, 0.01).unwrap();

        for i in 0..100 {
            let key = format!("line-{i}");
            dedup.insert(key.as_bytes()).await.unwrap();
        }
        for i in 0..100 {
            let key = format!("line-{i}");
            assert!(dedup.contains(key.as_bytes()), "lost key {key}");
        }
    }

    #[tokio::test]
    async fn keys_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        dedup.insert(b"ERROR A").await.unwrap();
        dedup.insert(b"ERROR B").await.unwrap();
        drop(dedup);

        let reloaded = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(reloaded.contains(b"ERROR A"));
        assert!(reloaded.contains(b"ERROR B"));
    }

    #[tokio::test]
    async fn sizing_hints_ignored_on_load() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        dedup.insert(b"ERROR A").await.unwrap();
        drop(dedup);

        // Different hints must not reset the persisted set.
        let reloaded = BloomDedup::open(&path, 50, 0.2).unwrap();
        assert!(reloaded.contains(b"ERROR A"));
    }

    #[tokio::test]
    async fn additions_accumulate_across_reloads() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut first = BloomDedup::open(&path, 1000, 0.01).unwrap();
        first.insert(b"ERROR A").await.unwrap();
        drop(first);

        let mut second = BloomDedup::open(&path, 1000, 0.01).unwrap();
        second.insert(b"ERROR B").await.unwrap();
        drop(second);

        let third = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(third.contains(b"ERROR A"));
        assert!(third.contains(b"ERROR B"));
    }

    #[test]
    fn zero_length_store_recovers_fresh() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::write(&path, b"").unwrap();

        let dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(!dedup.contains(b"anything"));
    }

    #[test]
    fn garbage_store_recovers_fresh() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);
        std::fs::write(&path, b"not a bloom filter").unwrap();

        let dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(!dedup.contains(b"anything"));
    }

    #[tokio::test]
    async fn truncated_store_recovers_fresh() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        dedup.insert(b"ERROR A").await.unwrap();
        drop(dedup);

        // Chop the persisted filter in half.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let recovered = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(!recovered.contains(b"ERROR A"));
    }

    #[tokio::test]
    async fn junk_temp_file_never_corrupts_canonical_store() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        dedup.insert(b"ERROR A").await.unwrap();
        drop(dedup);

        // Simulate dying mid-write: a half-written temp file next to a
        // valid canonical file.
        let tmp = dir.path().join("seen.bloom.tmp");
        std::fs::write(&tmp, b"partial write").unwrap();

        let recovered = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(recovered.contains(b"ERROR A"));
    }

    #[tokio::test]
    async fn every_insert_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = store_path(&dir);

        let mut dedup = BloomDedup::open(&path, 1000, 0.01).unwrap();
        dedup.insert(b"ERROR A").await.unwrap();

        // No explicit flush/close step: the file must already be loadable.
        let reloaded = BloomDedup::open(&path, 1000, 0.01).unwrap();
        assert!(reloaded.contains(b"ERROR A"));
        assert!(!dir.path().join("seen.bloom.tmp").exists());
    }

    #[tokio::test]
    async fn false_positive_rate_stays_bounded() {
        let dir = TempDir::new().unwrap();
        let mut dedup = BloomDedup::open(&store_path(&dir), 1000, 0.01).unwrap();

        // Fill to design capacity. Persisting 1000 times is slow, so
        // insert in memory and persist once at the end.
        for i in 0..999 {
            let key = format!("present-{i}");
            dedup.filter.set(key.as_bytes());
        }
        dedup.insert(b"present-999").await.unwrap();

        let mut hits = 0usize;
        let samples = 10_000usize;
        for i in 0..samples {
            let key = format!("absent-{i}");
            if dedup.contains(key.as_bytes()) {
                hits += 1;
            }
        }
        let rate = hits as f64 / samples as f64;
        assert!(
            rate < 0.03,
            "false-positive rate {rate} is far above the configured 0.01"
        );
    }

    #[test]
    fn from_config_selects_variant() {
        let dir = TempDir::new().unwrap();
        let off = Deduplicator::from_config(&DedupConfig::Off).unwrap();
        assert!(matches!(off, Deduplicator::Disabled));

        let bloom = Deduplicator::from_config(&DedupConfig::Bloom {
            path: store_path(&dir),
            expected_items: 100,
            false_positive_rate: 0.05,
        })
        .unwrap();
        assert!(matches!(bloom, Deduplicator::Bloom(_)));
    }
}
