pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::IdentityVerifier;
use config::Config;
use fika_common::SnowflakeGenerator;
use gateway::calls::CallRelay;
use gateway::fanout::MessageFanout;
use gateway::presence::PresencePublisher;
use gateway::registry::ConnectionRegistry;
use gateway::rooms::RoomMembership;
use store::chat::ChatStore;
use store::objects::ObjectStorage;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub store: Arc<dyn ChatStore>,
    pub objects: Arc<dyn ObjectStorage>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomMembership>,
    pub presence: Arc<PresencePublisher>,
    pub fanout: Arc<MessageFanout>,
    pub calls: Arc<CallRelay>,
}

impl AppState {
    /// Wires the realtime collaborators around the injected edges. Tests
    /// pass memory-backed edges through the same constructor.
    pub fn new(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn ChatStore>,
        objects: Arc<dyn ObjectStorage>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomMembership::new());
        let presence = Arc::new(PresencePublisher::new(registry.clone(), store.clone()));
        let ids = Arc::new(SnowflakeGenerator::new(config.worker_id));
        let fanout = Arc::new(MessageFanout::new(
            store.clone(),
            objects.clone(),
            rooms.clone(),
            ids,
        ));
        let calls = Arc::new(CallRelay::new(store.clone(), registry.clone()));
        Self {
            config: Arc::new(config),
            verifier,
            store,
            objects,
            registry,
            rooms,
            presence,
            fanout,
            calls,
        }
    }
}
