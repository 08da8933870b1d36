// Collab: the single injected collaborator that owns the store and the
// room manager, constructed once and cloned (cheap `Arc` clones) into
// every connection task.

use std::sync::Arc;

use crate::config::Config;
use crate::error::CollabError;
use crate::room::{RoomManager, SharedRoomManager};
use crate::store::EventStore;

#[derive(Clone)]
pub struct Collab {
    pub store: Arc<EventStore>,
    pub rooms: SharedRoomManager,
    pub config: Config,
}

impl Collab {
    pub async fn new(config: Config) -> Result<Self, CollabError> {
        let store = EventStore::connect(&config.database_url).await?;
        Ok(Self {
            store: Arc::new(store),
            rooms: Arc::new(RoomManager::new()),
            config,
        })
    }

    #[cfg(test)]
    pub fn from_parts(store: EventStore, config: Config) -> Self {
        Self {
            store: Arc::new(store),
            rooms: Arc::new(RoomManager::new()),
            config,
        }
    }
}
