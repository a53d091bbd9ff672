//! Application state

use crate::config::ServerConfig;
use crate::db::ScoringStore;
use crate::models::{Subcategory, WsEvent};
use crate::rule_engine::RuleEngine;
use crate::websocket::events::{Room, RoomRegistry};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub struct AppState {
    pub store: Arc<dyn ScoringStore>,
    pub rooms: Arc<RoomRegistry>,
    pub rules: RuleEngine,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn ScoringStore>, config: ServerConfig) -> Self {
        Self {
            store,
            rooms: Arc::new(RoomRegistry::new(config.ws_buffer)),
            rules: RuleEngine::with_config(config.rate_limit()),
            config,
        }
    }

    pub fn store(&self) -> &dyn ScoringStore {
        self.store.as_ref()
    }

    /// Fan an event out to the subcategory's scoring room and, when known,
    /// its event room
    pub fn publish_to(&self, subcategory: &Subcategory, event: WsEvent) -> usize {
        let mut delivered = self.rooms.broadcast(Room::Scoring(subcategory.id), &event);
        if let Some(event_id) = subcategory.event_id {
            delivered += self.rooms.broadcast(Room::Event(event_id), &event);
        }
        delivered
    }

    /// Same as [`publish_to`](Self::publish_to) when only the id is at hand
    pub async fn publish(&self, subcategory_id: Uuid, event: WsEvent) -> usize {
        match self.store.get_subcategory(subcategory_id).await {
            Ok(Some(subcategory)) => self.publish_to(&subcategory, event),
            Ok(None) => self.rooms.broadcast(Room::Scoring(subcategory_id), &event),
            Err(e) => {
                warn!(subcategory_id = %subcategory_id, error = %e, "Subcategory lookup failed, publishing to scoring room only");
                self.rooms.broadcast(Room::Scoring(subcategory_id), &event)
            }
        }
    }
}
