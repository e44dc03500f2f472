//! Fingerprint-validated persistence for [`TfIdfIndex`].
//!
//! Nothing here surfaces an error to the caller. A read failure, a corrupt
//! or stale blob and a failed write all degrade to "rebuild".

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::IndexOptions;
use crate::models::Document;
use crate::traits::IndexStore;
use crate::vector::{IndexSnapshot, TfIdfIndex};
use crate::CacheError;

/// `id:mtime` pairs in load order, joined by `|`.
pub fn fingerprint(docs: &[Document]) -> String {
    docs.iter()
        .map(|doc| format!("{}:{}", doc.id, doc.mtime))
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    Restored,
    Built,
}

pub struct LoadedIndex {
    pub index: TfIdfIndex,
    pub source: IndexSource,
    pub fingerprint: String,
    /// Write-back of a freshly built index; resolves to whether it succeeded.
    pub pending_write: Option<JoinHandle<bool>>,
}

pub struct PersistentIndexCache<S> {
    store: Arc<S>,
}

impl<S> Clone for PersistentIndexCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> PersistentIndexCache<S>
where
    S: IndexStore + 'static,
{
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Restores the index stored under `key` if it was built from a corpus
    /// with the same fingerprint.
    pub async fn load(
        &self,
        key: &str,
        fingerprint: &str,
        options: IndexOptions,
    ) -> Option<TfIdfIndex> {
        let blob = match self.store.read(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!(key, "index cache miss");
                return None;
            }
            Err(error) => {
                warn!(key, %error, "index cache read failed");
                return None;
            }
        };

        match IndexSnapshot::decode(&blob) {
            Ok(snapshot) if snapshot.fingerprint == fingerprint => {
                info!(key, documents = snapshot.docs.len(), "index cache hit");
                Some(TfIdfIndex::from_snapshot(snapshot, options))
            }
            Ok(_) => {
                debug!(key, "index cache entry is stale");
                None
            }
            Err(error) => {
                warn!(key, %error, "index cache entry rejected");
                None
            }
        }
    }

    pub async fn save(&self, key: &str, index: &TfIdfIndex, fingerprint: &str) -> bool {
        write_snapshot(self.store.as_ref(), key, index.snapshot(fingerprint)).await
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        match self.store.remove(key).await {
            Ok(()) => true,
            Err(error) => {
                warn!(key, %error, "index cache invalidation failed");
                false
            }
        }
    }

    /// Restores from cache when possible, otherwise builds on the blocking
    /// pool and schedules a background write-back.
    pub async fn load_or_build(
        &self,
        key: &str,
        docs: Arc<[Document]>,
        options: IndexOptions,
    ) -> LoadedIndex {
        let fingerprint = fingerprint(&docs);

        if let Some(index) = self.load(key, &fingerprint, options).await {
            return LoadedIndex {
                index,
                source: IndexSource::Restored,
                fingerprint,
                pending_write: None,
            };
        }

        let index = match TfIdfIndex::spawn_build(Arc::clone(&docs), options).await {
            Ok(index) => index,
            Err(error) => {
                warn!(%error, "background index build failed, building inline");
                let mut index = TfIdfIndex::new(options);
                index.build(&docs);
                index
            }
        };

        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let snapshot = index.snapshot(&fingerprint);
        let pending_write = tokio::spawn(async move {
            write_snapshot(store.as_ref(), &owned_key, snapshot).await
        });

        LoadedIndex {
            index,
            source: IndexSource::Built,
            fingerprint,
            pending_write: Some(pending_write),
        }
    }
}

async fn write_snapshot<S: IndexStore + ?Sized>(
    store: &S,
    key: &str,
    snapshot: IndexSnapshot,
) -> bool {
    let result: Result<(), CacheError> = async {
        let blob = snapshot.encode()?;
        store.write(key, &blob).await
    }
    .await;

    match result {
        Ok(()) => {
            debug!(key, "index cache written");
            true
        }
        Err(error) => {
            warn!(key, %error, "index cache write failed");
            false
        }
    }
}
