use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;

use bazaar_db::Database;
use bazaar_gateway::bus::EventBus;
use bazaar_gateway::stream::StreamState;

use crate::chat::ChatService;
use crate::notifications::Notifier;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub chat: ChatService,
    pub notifier: Notifier,
    pub jwt_secret: Arc<str>,
    pub stream_keep_alive: Duration,
}

impl AppState {
    pub fn new(db: Database, bus: EventBus, jwt_secret: impl Into<Arc<str>>, stream_keep_alive: Duration) -> Self {
        let db = Arc::new(db);
        let notifier = Notifier::new(db.clone(), bus.clone());
        let chat = ChatService::new(db.clone(), bus.clone(), notifier.clone());
        Self {
            db,
            bus,
            chat,
            notifier,
            jwt_secret: jwt_secret.into(),
            stream_keep_alive,
        }
    }
}

impl FromRef<AppState> for StreamState {
    fn from_ref(state: &AppState) -> Self {
        StreamState {
            bus: state.bus.clone(),
            jwt_secret: state.jwt_secret.clone(),
            keep_alive: state.stream_keep_alive,
        }
    }
}
