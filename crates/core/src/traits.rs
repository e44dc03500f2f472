use crate::CacheError;
use async_trait::async_trait;

/// Key/blob storage behind the persistent index cache. Keys are opaque
/// corpus locations.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn write(&self, key: &str, blob: &[u8]) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}
