//! Saving and restoring channel states across restarts.

use std::{collections::HashMap, fmt::Debug, sync::Mutex};

use async_trait::async_trait;

use crate::{
    channel::{PartIdx, Params, State},
    error::BackendError,
    types::{Address, Hash},
};

/// Everything needed to bring a channel back to life.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub params: Params,
    pub state: State,
    pub idx: PartIdx,
    pub peer: Address,
}

#[async_trait]
pub trait Persister: Debug + Send + Sync {
    async fn save(&self, snapshot: &ChannelSnapshot) -> Result<(), BackendError>;
    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, BackendError>;
    /// Forget a closed channel. Removing an unknown channel is not an error.
    async fn remove(&self, id: &Hash) -> Result<(), BackendError>;
}

/// Keeps the latest snapshot of every channel in memory.
#[derive(Debug, Default)]
pub struct MemoryPersister {
    snapshots: Mutex<HashMap<Hash, ChannelSnapshot>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn save(&self, snapshot: &ChannelSnapshot) -> Result<(), BackendError> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|e| BackendError::Storage(e.to_string()))?;
        let id = snapshot.state.channel_id();
        match snapshots.get(&id) {
            // Never go back to an older state.
            Some(old) if old.state.version() > snapshot.state.version() => {}
            _ => {
                snapshots.insert(id, snapshot.clone());
            }
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, BackendError> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|e| BackendError::Storage(e.to_string()))?;
        Ok(snapshots.values().cloned().collect())
    }

    async fn remove(&self, id: &Hash) -> Result<(), BackendError> {
        self.snapshots
            .lock()
            .map_err(|e| BackendError::Storage(e.to_string()))?
            .remove(id);
        Ok(())
    }
}
