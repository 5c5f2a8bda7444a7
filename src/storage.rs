//! Record store: whole-collection JSON files under a data directory.
//!
//! Every collection lives in one file (`clients.json`, `documents.json`, ...)
//! that is read and written in full. Mutations go through [`RecordStore::lock`],
//! which holds a per-collection mutex across the read-modify-write so that
//! concurrent requests cannot lose each other's updates. Files are replaced
//! atomically via a temp file and rename.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Named collections persisted by the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Admins,
    Clients,
    Templates,
    Documents,
    Services,
    Helpers,
}

impl Collection {
    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Admins => "admin.json",
            Collection::Clients => "clients.json",
            Collection::Templates => "templates.json",
            Collection::Documents => "documents.json",
            Collection::Services => "services.json",
            Collection::Helpers => "helpers.json",
        }
    }

    fn index(&self) -> usize {
        match self {
            Collection::Admins => 0,
            Collection::Clients => 1,
            Collection::Templates => 2,
            Collection::Documents => 3,
            Collection::Services => 4,
            Collection::Helpers => 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt collection {file}: {source}")]
    Corrupt {
        file: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub struct RecordStore {
    dir: PathBuf,
    locks: [Mutex<()>; 6],
}

impl RecordStore {
    /// Open (creating if needed) the data directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::Io { path: dir.clone(), source })?;
        Ok(Self {
            dir,
            locks: std::array::from_fn(|_| Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a whole collection. `None` when the file does not exist yet or is
    /// empty.
    pub async fn read<T: DeserializeOwned>(&self, collection: Collection) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(collection.file_name());
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { file: collection.file_name(), source })
    }

    /// Read a collection, falling back to its default (empty) value.
    pub async fn read_or_default<T: DeserializeOwned + Default>(&self, collection: Collection) -> Result<T, StoreError> {
        Ok(self.read(collection).await?.unwrap_or_default())
    }

    /// Replace a whole collection. Serialized against other writers of the
    /// same collection.
    pub async fn write<T: Serialize>(&self, collection: Collection, data: &T) -> Result<(), StoreError> {
        let _guard = self.locks[collection.index()].lock().await;
        self.write_unlocked(collection, data).await
    }

    /// Load a collection and hold its write lock until the returned handle is
    /// committed or dropped.
    pub async fn lock<T>(&self, collection: Collection) -> Result<Locked<'_, T>, StoreError>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        let guard = self.locks[collection.index()].lock().await;
        let records = self.read_or_default(collection).await?;
        Ok(Locked {
            store: self,
            collection,
            _guard: guard,
            records,
        })
    }

    async fn write_unlocked<T: Serialize>(&self, collection: Collection, data: &T) -> Result<(), StoreError> {
        let path = self.dir.join(collection.file_name());
        let json = serde_json::to_string_pretty(data)
            .map_err(|source| StoreError::Corrupt { file: collection.file_name(), source })?;
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", collection.file_name(), uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        debug!(file = collection.file_name(), "collection written");
        Ok(())
    }
}

/// A collection loaded under its write lock.
pub struct Locked<'a, T: Serialize> {
    store: &'a RecordStore,
    collection: Collection,
    _guard: MutexGuard<'a, ()>,
    records: T,
}

impl<'a, T: Serialize> Locked<'a, T> {
    /// Persist the (possibly modified) collection and release the lock.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.store.write_unlocked(self.collection, &self.records).await
    }
}

impl<T: Serialize> Deref for Locked<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.records
    }
}

impl<T: Serialize> DerefMut for Locked<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.records
    }
}
