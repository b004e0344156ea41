use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Time source for entry expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.stored_at).to_std() {
            Ok(elapsed) => elapsed < self.ttl,
            // Stored "in the future": the clock moved backwards, so the age
            // is unknown.
            Err(_) => false,
        }
    }
}

/// Key/value store with per-entry expiry, checked lazily on read.
pub trait Cache: Send + Sync {
    /// `None` for a missing or expired entry.
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    /// Overwrites any existing entry.
    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration);
    fn invalidate_all(&self);
}

pub trait CacheExt: Cache {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(key, %err, "ignoring undecodable cache entry");
                None
            }
        }
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl),
            Err(err) => tracing::warn!(key, %err, "skipping unserializable cache entry"),
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

/// Volatile in-process cache.
#[derive(Debug)]
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<serde_json::Value>>>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = lock(&self.entries);
        let entry = entries.get(key)?;
        if !entry.is_valid_at(self.clock.now()) {
            return None;
        }
        Some(entry.payload.clone())
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let entry = CacheEntry {
            key: key.to_owned(),
            payload: value,
            stored_at: self.clock.now(),
            ttl,
        };
        lock(&self.entries).insert(key.to_owned(), entry);
    }

    fn invalidate_all(&self) {
        lock(&self.entries).clear();
    }
}

/// Raw storage behind a [`PersistentCache`].
pub trait CacheBackend: Send + Sync {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn write(&self, key: &str, contents: &str) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// One JSON file per key under a session directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    dir: PathBuf,
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FsBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() * 2 + 5);
        for byte in key.bytes() {
            name.push_str(&format!("{byte:02x}"));
        }
        name.push_str(".json");
        self.dir.join(name)
    }
}

impl CacheBackend for FsBackend {
    fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            // Also covers a session directory that has not been created yet;
            // the first write creates it.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read cache entry: {}", path.display())),
        }
    }

    fn write(&self, key: &str, contents: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cache dir: {}", self.dir.display()))?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&tmp_path, contents)
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("rename tmp to final: {}", path.display()))?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove cache dir: {}", self.dir.display()));
            }
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("recreate cache dir: {}", self.dir.display()))?;
        Ok(())
    }
}

/// Cache over a [`CacheBackend`] that falls back to memory for the rest of
/// the session as soon as the backend fails.
pub struct PersistentCache {
    backend: Box<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    fallback: MemoryCache,
    degraded: AtomicBool,
}

impl fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentCache")
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}

impl PersistentCache {
    pub fn new(backend: impl CacheBackend + 'static, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Box::new(backend),
            fallback: MemoryCache::new(Arc::clone(&clock)),
            clock,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn degrade(&self, err: anyhow::Error) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                error = %format!("{err:#}"),
                "cache storage unavailable; using in-memory cache for this session"
            );
        }
    }
}

impl Cache for PersistentCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        if self.is_degraded() {
            return self.fallback.get(key);
        }

        let raw = match self.backend.read(key) {
            Ok(raw) => raw?,
            Err(err) => {
                self.degrade(err);
                return self.fallback.get(key);
            }
        };

        let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(key, %err, "treating corrupt cache entry as a miss");
                return None;
            }
        };
        if entry.key != key || !entry.is_valid_at(self.clock.now()) {
            return None;
        }
        Some(entry.payload)
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        if self.is_degraded() {
            self.fallback.set(key, value, ttl);
            return;
        }

        let entry = CacheEntry {
            key: key.to_owned(),
            payload: value,
            stored_at: self.clock.now(),
            ttl,
        };
        let result = serde_json::to_string(&entry)
            .context("serialize cache entry")
            .and_then(|contents| self.backend.write(key, &contents));
        if let Err(err) = result {
            self.degrade(err);
            self.fallback.set(key, entry.payload, ttl);
        }
    }

    fn invalidate_all(&self) {
        self.fallback.invalidate_all();
        if self.is_degraded() {
            return;
        }
        if let Err(err) = self.backend.clear() {
            self.degrade(err);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
