use std::sync::Arc;

use mfls_core::{HeartbeatClock, MetadataStore, StoreError};

use crate::error::ApiError;

/// State shared by every request handler.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: MetadataStore,
    pub heartbeat: Arc<HeartbeatClock>,
}

impl ServiceContext {
    pub fn new(store: MetadataStore) -> Self {
        Self::with_heartbeat(store, Arc::new(HeartbeatClock::new()))
    }

    /// Share an existing clock, e.g. one already watched by an idle monitor.
    pub fn with_heartbeat(store: MetadataStore, heartbeat: Arc<HeartbeatClock>) -> Self {
        Self { store, heartbeat }
    }

    /// Run a store operation on the blocking pool.
    pub(crate) async fn blocking<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&MetadataStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?
            .map_err(ApiError::from)
    }
}
