use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::EventEntry;

/// Write-only persistence gateway for event entries.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one entry and returns it as stored. No retries.
    async fn insert(&self, entry: EventEntry) -> Result<EventEntry, StoreError>;
}
