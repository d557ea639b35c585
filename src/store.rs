use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::channels::{Channel, ParsedPlaylist, DEFAULT_GROUP};
use crate::error::{Error, Result};

pub const KEY_CHANNELS: &str = "channels";
pub const KEY_CATEGORIES: &str = "categories";
pub const KEY_PROVIDER: &str = "provider";
pub const KEY_LAST_UPDATED: &str = "last_updated";

/// Minimal string key-value storage the catalog snapshot is written to.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: String) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("store lock poisoned".to_string())
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().map_err(poisoned)?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

/// Keeps all entries in one JSON object on disk, rewritten on every change.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::Storage(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let text = serde_json::to_string_pretty(entries).map_err(|e| Error::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        let mut entries = self.read_all()?;
        f(&mut entries);
        self.write_all(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().map_err(poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Storage(e.to_string()))
}

pub fn persist_catalog(store: &dyn KeyValueStore, catalog: &Catalog) -> Result<()> {
    store.set(KEY_CHANNELS, to_json(&catalog.channels)?)?;
    store.set(KEY_CATEGORIES, to_json(&catalog.categories)?)?;
    store.set(KEY_PROVIDER, catalog.selected_provider.clone())?;
    let updated = catalog.last_updated.unwrap_or_else(Utc::now);
    store.set(KEY_LAST_UPDATED, updated.to_rfc3339())?;
    Ok(())
}

pub fn clear_catalog(store: &dyn KeyValueStore) -> Result<()> {
    for key in [KEY_CHANNELS, KEY_CATEGORIES, KEY_PROVIDER, KEY_LAST_UPDATED] {
        store.remove(key)?;
    }
    Ok(())
}

/// Rebuilds a catalog from the last persisted load. Returns `None` when no
/// channels were stored; unreadable entries are logged and treated the same.
pub fn restore_catalog(store: &dyn KeyValueStore) -> Option<Catalog> {
    let channels = match read_json::<Vec<Channel>>(store, KEY_CHANNELS) {
        Some(c) if !c.is_empty() => c,
        _ => return None,
    };
    let categories: Vec<String> =
        read_json(store, KEY_CATEGORIES).unwrap_or_else(|| vec![DEFAULT_GROUP.to_string()]);
    let provider = store.get(KEY_PROVIDER).ok().flatten().unwrap_or_default();
    let last_updated = store
        .get(KEY_LAST_UPDATED)
        .ok()
        .flatten()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    info!("Restored {} channels from local snapshot", channels.len());
    Some(Catalog::new(provider).load_at(ParsedPlaylist { channels, categories }, last_updated))
}

fn read_json<T: serde::de::DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read {} from store: {}", key, e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring unreadable {} in store: {}", key, e);
            None
        }
    }
}
