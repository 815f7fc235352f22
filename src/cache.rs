//! Hybrid in-memory/on-disk cache for blob-backed source resolution. Adapted
//! from the teacher's download cache: same disk layout (blake3-hashed path,
//! two-char shard directory), same `moka` front layer, same background
//! cleanup sweep.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};

use moka::future::Cache as MemCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, sync::Mutex, time};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

type Timestamp = u64;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    content: String,
    timestamp: Timestamp,
    ttl: u64,
}

#[derive(Clone)]
struct DiskStorage {
    cache_dir: PathBuf,
    default_ttl: u64,
    lock: Arc<Mutex<()>>,
}

impl DiskStorage {
    fn new(cache_dir: PathBuf, ttl: Duration) -> Self {
        Self {
            cache_dir,
            default_ttl: ttl.as_secs(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let hash = blake3::hash(key.as_bytes()).to_hex();
        let subdir = &hash[0..2];
        self.cache_dir.join(subdir).join(format!("{}.json", hash))
    }

    fn now_ts() -> Timestamp {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path).await?;
        let entry: CacheEntry = serde_json::from_str(&data)?;
        if Self::now_ts() >= entry.timestamp + entry.ttl {
            let _ = fs::remove_file(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry.content))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let entry = CacheEntry {
            content: value.to_string(),
            timestamp: Self::now_ts(),
            ttl: self.default_ttl,
        };
        let json = serde_json::to_string(&entry)?;
        fs::write(&path, json).await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let now = Self::now_ts();
        let mut dir_entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(sub) = dir_entries.next_entry().await? {
            let mut files = fs::read_dir(sub.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if let Ok(data) = fs::read_to_string(&path).await {
                    if let Ok(entry) = serde_json::from_str::<CacheEntry>(&data) {
                        if now > entry.timestamp + entry.ttl {
                            let _ = fs::remove_file(&path).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Front: `moka` in-memory cache. Back: blake3-addressed JSON files on disk.
/// A miss in memory that hits disk is promoted back into memory.
pub struct HybridCache {
    mem: MemCache<String, String>,
    storage: DiskStorage,
}

impl HybridCache {
    pub fn new(cache_dir: PathBuf, ttl: Duration, max_in_mem: u64) -> Self {
        let storage = DiskStorage::new(cache_dir.clone(), ttl);
        let st = storage.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let _ = st.cleanup().await;
            }
        });

        Self {
            mem: MemCache::builder()
                .time_to_live(ttl)
                .max_capacity(max_in_mem)
                .build(),
            storage,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(v) = self.mem.get(key).await {
            return Ok(Some(v));
        }
        if let Some(v) = self.storage.get(key).await? {
            self.mem.insert(key.to_string(), v.clone()).await;
            return Ok(Some(v));
        }
        Ok(None)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.storage.set(key, value).await?;
        self.mem.insert(key.to_string(), value.to_string()).await;
        Ok(())
    }
}
