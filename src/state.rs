use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::membership::MembershipOracle;
use crate::websocket::event_bus::EventBus;
use crate::websocket::room_manager::RoomManager;

/// Shared application state passed to all handlers and extractors.
///
/// `EventBus` and `RoomManager` are cheaply cloneable (they wrap an `Arc`
/// internally), so cloning `AppState` for each request is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt_secret: Arc<str>,
    pub config: Arc<Config>,
    /// Topic pub/sub fanout (spec component C6).
    pub event_bus: EventBus,
    /// Per-process socket/topic subscription registry (spec component C7).
    pub rooms: RoomManager,
    /// Stale-tolerant channel membership cache (spec component C2).
    pub membership: MembershipOracle,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let config = Arc::new(config);
        let jwt_secret: Arc<str> = Arc::from(config.jwt_secret.as_str());
        let membership = MembershipOracle::new(pool.clone(), config.membership_cache_ttl);

        AppState {
            pool,
            jwt_secret,
            config,
            event_bus: EventBus::new(),
            rooms: RoomManager::new(),
            membership,
        }
    }
}
