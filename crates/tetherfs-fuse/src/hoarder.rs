//! Local on-disk cache of remote files.
//!
//! One backing file per cached remote path, named by a digest of the
//! path's identity so nothing about the remote layout leaks into the cache
//! directory. Capacity is counted in entries; eviction is LRU among
//! entries nobody holds open. Entries with a non-zero open count are
//! pinned.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tetherfs_transport::{Opcode, Payload, RemotePath, Talker};
use tracing::{debug, warn};

use crate::error::{FsError, Result};

/// Hoarder sizing and placement.
#[derive(Debug, Clone)]
pub struct HoarderConfig {
    /// Directory holding the backing files.
    pub cache_dir: PathBuf,
    /// Maximum number of cache entries.
    pub capacity: usize,
}

#[derive(Debug)]
struct CacheEntry {
    backing: PathBuf,
    size: u64,
    dirty: bool,
    last_access: Instant,
    open_count: u32,
}

/// The cache itself: entry map plus the backing directory.
pub struct Hoarder {
    config: HoarderConfig,
    entries: Mutex<HashMap<RemotePath, CacheEntry>>,
}

impl Hoarder {
    /// Creates the cache directory if needed and an empty entry map.
    pub fn new(config: HoarderConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        Ok(Self {
            config,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn backing_path(&self, path: &RemotePath) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(path.hostname.as_bytes());
        hasher.update([0]);
        hasher.update(path.port.to_be_bytes());
        hasher.update(path.path.as_bytes());
        let digest = hasher.finalize();
        let mut name = String::with_capacity(64);
        for byte in digest {
            name.push_str(&format!("{:02x}", byte));
        }
        self.config.cache_dir.join(name)
    }

    /// True when `path` has a resident entry.
    pub fn is_cached(&self, path: &RemotePath) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    /// Number of resident entries.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Fetches `path` from its agent into a backing file, unless already
    /// resident. Returns the backing file path.
    pub async fn fetch(&self, talker: &Talker, path: &RemotePath) -> Result<PathBuf> {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(path) {
            entry.last_access = Instant::now();
            return Ok(entry.backing.clone());
        }

        debug!(path = %path.path, hostname = %path.hostname, "fetching into cache");
        let mut rx = talker
            .submit(Opcode::FetchFile, &path.hostname, Payload::Path(path.clone()))
            .await
            .map_err(FsError::Transport)?;

        let backing = self.backing_path(path);
        let mut file = fs::File::create(&backing)?;
        let mut size: u64 = 0;

        loop {
            let packet = match rx.recv().await {
                Some(result) => result.map_err(FsError::Transport)?,
                None => {
                    return Err(FsError::Transport(
                        tetherfs_transport::TransportError::ConnectionLost {
                            hostname: path.hostname.clone(),
                            conn_id: 0,
                        },
                    ))
                }
            };
            match packet.data {
                Payload::Chunk(chunk) => {
                    file.write_all(&chunk.data)?;
                    size += chunk.data.len() as u64;
                    if chunk.is_last() {
                        break;
                    }
                }
                Payload::Error(ref err) => {
                    let _ = fs::remove_file(&backing);
                    return Err(FsError::remote(err));
                }
                _ => {
                    let _ = fs::remove_file(&backing);
                    return Err(FsError::UnexpectedResponse { op: "fetch-file" });
                }
            }
        }
        file.flush()?;
        drop(file);

        let mut entries = self.entries.lock().unwrap();
        Self::make_room(&mut entries, self.config.capacity);
        entries.insert(
            path.clone(),
            CacheEntry {
                backing: backing.clone(),
                size,
                dirty: false,
                last_access: Instant::now(),
                open_count: 0,
            },
        );
        debug!(path = %path.path, size, "cached");
        Ok(backing)
    }

    /// Creates a zero-length resident entry, the local half of a create.
    pub fn create_empty(&self, path: &RemotePath) -> Result<PathBuf> {
        let backing = self.backing_path(path);
        fs::File::create(&backing)?;
        let mut entries = self.entries.lock().unwrap();
        Self::make_room(&mut entries, self.config.capacity);
        entries.insert(
            path.clone(),
            CacheEntry {
                backing: backing.clone(),
                size: 0,
                dirty: false,
                last_access: Instant::now(),
                open_count: 0,
            },
        );
        Ok(backing)
    }

    /// Opens the backing file of a resident entry and pins it.
    pub fn open(&self, path: &RemotePath, write: bool) -> Result<fs::File> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(path).ok_or_else(|| FsError::NotCached {
            path: path.path.clone(),
        })?;
        let file = fs::OpenOptions::new()
            .read(true)
            .write(write)
            .open(&entry.backing)?;
        entry.open_count += 1;
        entry.last_access = Instant::now();
        Ok(file)
    }

    /// Unpins an entry after its last user closed it.
    pub fn release(&self, path: &RemotePath) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            entry.open_count = entry.open_count.saturating_sub(1);
        }
    }

    /// Drops the entry for `path` and deletes its backing file.
    pub fn evict(&self, path: &RemotePath) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.remove(path) {
            debug!(path = %path.path, "evicting cache entry");
            if let Err(e) = fs::remove_file(&entry.backing) {
                warn!(path = %path.path, error = %e, "failed to delete backing file");
            }
        }
    }

    /// Re-keys an entry after a rename, moving the backing file to the
    /// name derived from the new path.
    pub fn rename(&self, old: &RemotePath, new: &RemotePath) -> Result<()> {
        let new_backing = self.backing_path(new);
        let mut entries = self.entries.lock().unwrap();
        if let Some(mut entry) = entries.remove(old) {
            fs::rename(&entry.backing, &new_backing)?;
            entry.backing = new_backing;
            entry.last_access = Instant::now();
            entries.insert(new.clone(), entry);
        }
        Ok(())
    }

    /// Truncates the backing file of a resident entry.
    pub fn truncate(&self, path: &RemotePath, size: u64) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            let file = fs::OpenOptions::new().write(true).open(&entry.backing)?;
            file.set_len(size)?;
            entry.size = size;
            entry.dirty = true;
            entry.last_access = Instant::now();
        }
        Ok(())
    }

    /// Records a local write into the backing file.
    pub fn note_write(&self, path: &RemotePath, end_offset: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(path) {
            entry.dirty = true;
            entry.last_access = Instant::now();
            if end_offset > entry.size {
                entry.size = end_offset;
            }
        }
    }

    fn make_room(entries: &mut HashMap<RemotePath, CacheEntry>, capacity: usize) {
        while entries.len() >= capacity {
            let victim = entries
                .iter()
                .filter(|(_, e)| e.open_count == 0)
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    if let Some(entry) = entries.remove(&key) {
                        debug!(path = %key.path, "LRU eviction");
                        let _ = fs::remove_file(&entry.backing);
                    }
                }
                None => {
                    warn!(
                        entries = entries.len(),
                        capacity, "every cache entry is pinned, overflowing capacity"
                    );
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for Hoarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hoarder")
            .field("cache_dir", &self.config.cache_dir)
            .field("capacity", &self.config.capacity)
            .field("entries", &self.entry_count())
            .finish()
    }
}
