//! Gzip-compressed on-disk tier.
//!
//! Each entry is two files in the cache directory: `{name}.json.gz` with
//! the payload and `{name}.meta.json` with its metadata. The in-memory
//! index is rebuilt from the sidecars on open, so entries survive a
//! restart. Files are written to a temporary name and renamed into place.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::memory::TierWrite;
use super::CachePayload;
use crate::errors::CacheError;

const DATA_SUFFIX: &str = ".json.gz";
const META_SUFFIX: &str = ".meta.json";
const TEMP_SUFFIX: &str = ".tmp";

/// Sidecar contents.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiskMeta {
    key: String,
    kind: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Compressed bytes on disk.
    size: usize,
}

struct IndexEntry {
    meta: DiskMeta,
    last_access: u64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, IndexEntry>,
    used: usize,
    next_tick: u64,
}

impl Index {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn insert(&mut self, meta: DiskMeta) {
        let last_access = self.tick();
        self.used += meta.size;
        if let Some(previous) = self.entries.insert(meta.key.clone(), IndexEntry { meta, last_access }) {
            self.used -= previous.meta.size;
        }
    }

    fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.used -= entry.meta.size;
        Some(entry)
    }
}

pub struct DiskTier {
    dir: PathBuf,
    budget: usize,
    entry_limit: usize,
    index: Mutex<Index>,
}

impl DiskTier {
    /// Open (or create) the cache directory and rebuild the index.
    /// Expired entries and orphaned files found on the way are deleted.
    pub fn open(dir: impl Into<PathBuf>, budget: usize, entry_limit: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let now = Utc::now();
        let mut index = Index::default();
        let mut metas: Vec<DiskMeta> = Vec::new();

        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if name.ends_with(TEMP_SUFFIX) {
                let _ = fs::remove_file(&path);
                continue;
            }
            if !name.ends_with(META_SUFFIX) {
                continue;
            }

            let meta = fs::read(&path)
                .map_err(CacheError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<DiskMeta>(&bytes)?));
            match meta {
                Ok(meta) if meta.expires_at > now && data_path(&dir, &meta.key).exists() => {
                    metas.push(meta);
                }
                Ok(meta) => {
                    debug!("Dropping stale disk cache entry {}", meta.key);
                    let _ = fs::remove_file(data_path(&dir, &meta.key));
                    let _ = fs::remove_file(&path);
                }
                Err(e) => {
                    warn!("Unreadable cache sidecar {}: {}", path.display(), e);
                    let _ = fs::remove_file(&path);
                }
            }
        }

        // Oldest entries get the oldest access ticks.
        metas.sort_by_key(|m| m.created_at);
        for meta in metas {
            index.insert(meta);
        }

        debug!(
            "Opened disk cache at {} with {} entries ({} bytes)",
            dir.display(),
            index.entries.len(),
            index.used
        );

        Ok(Self {
            dir,
            budget,
            entry_limit,
            index: Mutex::new(index),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|poisoned| {
            warn!("Disk cache index mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read an entry. Expired entries are deleted and reported as absent;
    /// undecodable ones are deleted and reported as [`CacheError::Corrupt`].
    pub fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(CachePayload, DateTime<Utc>)>, CacheError> {
        let expires_at = {
            let mut index = self.lock();
            let Some(expires_at) = index.entries.get(key).map(|e| e.meta.expires_at) else {
                return Ok(None);
            };
            if expires_at <= now {
                drop(index);
                self.remove(key)?;
                return Ok(None);
            }
            let tick = index.tick();
            if let Some(entry) = index.entries.get_mut(key) {
                entry.last_access = tick;
            }
            expires_at
        };

        let decoded = fs::read(data_path(&self.dir, key))
            .map_err(CacheError::from)
            .and_then(|bytes| decompress(&bytes));
        match decoded {
            Ok(payload) => Ok(Some((payload, expires_at))),
            Err(e) => {
                self.remove(key)?;
                Err(CacheError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Write an entry, evicting to stay within budget. Entries whose
    /// compressed size exceeds the entry limit are not stored.
    pub fn put(
        &self,
        key: &str,
        payload: &CachePayload,
        expires_at: DateTime<Utc>,
    ) -> Result<TierWrite, CacheError> {
        let compressed = compress(payload)?;
        let size = compressed.len();
        if size > self.entry_limit || size > self.budget {
            debug!("Disk cache skipping {} ({} bytes)", key, size);
            return Ok(TierWrite::default());
        }

        self.remove(key)?;
        let evicted = self.evict_for(size)?;

        let meta = DiskMeta {
            key: key.to_string(),
            kind: payload.kind().to_string(),
            created_at: Utc::now(),
            expires_at,
            size,
        };
        write_atomic(&data_path(&self.dir, key), &compressed)?;
        write_atomic(&meta_path(&self.dir, key), &serde_json::to_vec(&meta)?)?;
        self.lock().insert(meta);

        Ok(TierWrite {
            stored: true,
            evicted,
        })
    }

    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.lock().remove(key).is_some();
        remove_if_exists(&data_path(&self.dir, key))?;
        remove_if_exists(&meta_path(&self.dir, key))?;
        Ok(removed)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let expired: Vec<String> = self
            .lock()
            .entries
            .values()
            .filter(|e| e.meta.expires_at <= now)
            .map(|e| e.meta.key.clone())
            .collect();
        for key in &expired {
            self.remove(key)?;
        }
        Ok(expired.len())
    }

    /// Make room for `incoming` bytes. Entries closest to expiry go first,
    /// least-recently-used among equal expiries.
    fn evict_for(&self, incoming: usize) -> Result<usize, CacheError> {
        let victims: Vec<String> = {
            let index = self.lock();
            if index.used + incoming <= self.budget {
                return Ok(0);
            }

            let mut candidates: Vec<(DateTime<Utc>, u64, usize, &str)> = index
                .entries
                .values()
                .map(|e| (e.meta.expires_at, e.last_access, e.meta.size, e.meta.key.as_str()))
                .collect();
            candidates.sort();

            let mut freed = 0;
            let mut victims = Vec::new();
            for (_, _, size, key) in candidates {
                if index.used - freed + incoming <= self.budget {
                    break;
                }
                freed += size;
                victims.push(key.to_string());
            }
            victims
        };

        for key in &victims {
            debug!("Evicting disk cache entry {}", key);
            self.remove(key)?;
        }
        Ok(victims.len())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }
}

/// File-system safe stem for a cache key.
fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn data_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}{}", file_stem(key), DATA_SUFFIX))
}

fn meta_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}{}", file_stem(key), META_SUFFIX))
}

fn compress(payload: &CachePayload) -> Result<Vec<u8>, CacheError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&payload.to_json()?)?;
    Ok(encoder.finish()?)
}

fn decompress(bytes: &[u8]) -> Result<CachePayload, CacheError> {
    let mut json = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    CachePayload::from_json(&json)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    fs::write(&temp, bytes)?;
    fs::rename(&temp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tickvault_market_data::Symbol;

    fn payload(n: usize) -> CachePayload {
        CachePayload::Symbols((0..n).map(|i| Symbol::new(format!("{:06}.SZ", i))).collect())
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1 << 20, 1 << 20).unwrap();

        let write = tier.put("symbol_list_abc", &payload(3), later()).unwrap();
        assert!(write.stored);

        let (decoded, _) = tier.get("symbol_list_abc", Utc::now()).unwrap().unwrap();
        assert_eq!(decoded, payload(3));
        assert!(dir.path().join("symbol_list_abc.json.gz").exists());
        assert!(dir.path().join("symbol_list_abc.meta.json").exists());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tier = DiskTier::open(dir.path(), 1 << 20, 1 << 20).unwrap();
            tier.put("keep", &payload(2), later()).unwrap();
            tier.put("stale", &payload(2), Utc::now() + Duration::milliseconds(1)).unwrap();
        }
        std::thread::sleep(std::time::Duration::from_millis(5));

        let reopened = DiskTier::open(dir.path(), 1 << 20, 1 << 20).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get("keep", Utc::now()).unwrap().is_some());
        assert!(!dir.path().join("stale.json.gz").exists());
    }

    #[test]
    fn test_corrupt_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1 << 20, 1 << 20).unwrap();
        tier.put("broken", &payload(1), later()).unwrap();
        fs::write(dir.path().join("broken.json.gz"), b"not gzip").unwrap();

        let result = tier.get("broken", Utc::now());
        assert!(matches!(result, Err(CacheError::Corrupt { .. })));
        assert!(tier.is_empty());
        assert!(tier.get("broken", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_entry_limit() {
        let dir = tempfile::tempdir().unwrap();
        let tier = DiskTier::open(dir.path(), 1 << 20, 16).unwrap();

        let write = tier.put("big", &payload(50), later()).unwrap();
        assert!(!write.stored);
        assert!(tier.is_empty());
    }

    /// Size on disk of one `payload(5)` entry.
    fn entry_size(dir: &Path) -> usize {
        let sizing = DiskTier::open(dir.join("sizing"), 1 << 20, 1 << 20).unwrap();
        sizing.put("x", &payload(5), later()).unwrap();
        sizing.used_bytes()
    }

    #[test]
    fn test_eviction_prefers_expired_then_lru() {
        let dir = tempfile::tempdir().unwrap();
        let one = entry_size(dir.path());
        let expires = later();

        // Room for three entries of this size.
        let tier = DiskTier::open(dir.path().join("tier"), one * 3 + one / 2, 1 << 20).unwrap();
        tier.put("a", &payload(5), expires).unwrap();
        tier.put("b", &payload(5), Utc::now() - Duration::seconds(1)).unwrap();
        tier.put("c", &payload(5), expires).unwrap();

        let write = tier.put("d", &payload(5), expires).unwrap();
        assert_eq!(write.evicted, 1);
        assert!(tier.get("a", Utc::now()).unwrap().is_some());
        assert!(tier.get("b", Utc::now()).unwrap().is_none());

        // Equal expiries: "c" is least recently used since "a" was read.
        tier.put("e", &payload(5), expires).unwrap();
        assert!(tier.get("c", Utc::now()).unwrap().is_none());
        assert!(tier.get("a", Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_eviction_takes_earliest_expiry_before_lru() {
        let dir = tempfile::tempdir().unwrap();
        let one = entry_size(dir.path());
        let now = Utc::now();

        let tier = DiskTier::open(dir.path().join("tier"), one * 3 + one / 2, 1 << 20).unwrap();
        tier.put("long", &payload(5), now + Duration::hours(2)).unwrap();
        tier.put("short", &payload(5), now + Duration::minutes(10)).unwrap();
        tier.put("longer", &payload(5), now + Duration::hours(3)).unwrap();

        // "short" is now the most recently used entry.
        assert!(tier.get("short", Utc::now()).unwrap().is_some());

        let write = tier.put("new", &payload(5), now + Duration::hours(1)).unwrap();
        assert_eq!(write.evicted, 1);
        assert!(tier.get("short", Utc::now()).unwrap().is_none());
        assert!(tier.get("long", Utc::now()).unwrap().is_some());
        assert!(tier.get("longer", Utc::now()).unwrap().is_some());
    }
}
