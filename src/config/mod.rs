use std::env;
use std::time::Duration;

/// All tunables recognized by the gateway, with the defaults from the
/// real-time core's configuration surface. Every field can be overridden by
/// an environment variable of the same name, upper-cased.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    /// Permissive CORS + verbose logging when true; set `APP_ENV=production` to disable.
    pub is_dev: bool,
    pub allowed_origins: Vec<String>,

    pub heartbeat_interval: Duration,
    pub heartbeat_miss_threshold: u32,
    pub drain_timeout: Duration,
    pub shutdown_grace: Duration,
    pub outbound_queue_capacity: usize,
    pub membership_cache_ttl: Duration,
    /// How stale a membership decision is allowed to be before a client is
    /// guaranteed to observe its effect — the bound kick propagation and
    /// room self-eviction are measured against. Distinct tunable from
    /// `membership_cache_ttl` in the gateway's configuration surface, though
    /// it tracks the same value today since the cache TTL is this crate's
    /// only source of membership staleness.
    pub membership_freshness_window: Duration,
    pub reorder_window: Duration,
    pub allocator_max_retries: u32,
    pub history_max_limit: i64,
    pub content_max_length: usize,
    /// Window within which a repeated `clientMessageCorrelationId` from the
    /// same (channel, user) returns the original message instead of
    /// creating a duplicate.
    pub correlation_dedupe_window: Duration,
    /// How long a topic with zero local subscribers is kept alive before
    /// the room manager drops its broadcast sender, to absorb churn.
    pub room_linger_window: Duration,
}

fn env_duration_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_duration_millis(key: &str, default: u64) -> Duration {
    Duration::from_millis(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev_secret_change_in_production".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            server_port: env_parsed("SERVER_PORT", 8080),
            is_dev,
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),

            heartbeat_interval: env_duration_secs("HEARTBEAT_INTERVAL_SECS", 25),
            heartbeat_miss_threshold: env_parsed("HEARTBEAT_MISS_THRESHOLD", 2),
            drain_timeout: env_duration_secs("DRAIN_TIMEOUT_SECS", 2),
            shutdown_grace: env_duration_secs("SHUTDOWN_GRACE_SECS", 20),
            outbound_queue_capacity: env_parsed("OUTBOUND_QUEUE_CAPACITY", 1024),
            membership_cache_ttl: env_duration_secs("MEMBERSHIP_CACHE_TTL_SECS", 5),
            membership_freshness_window: env_duration_secs("MEMBERSHIP_FRESHNESS_WINDOW_SECS", 5),
            reorder_window: env_duration_millis("REORDER_WINDOW_MS", 250),
            allocator_max_retries: env_parsed("ALLOCATOR_MAX_RETRIES", 5),
            history_max_limit: env_parsed("HISTORY_MAX_LIMIT", 100),
            content_max_length: env_parsed("CONTENT_MAX_LENGTH", 8000),
            correlation_dedupe_window: env_duration_secs("CORRELATION_DEDUPE_WINDOW_SECS", 60),
            room_linger_window: env_duration_secs("ROOM_LINGER_WINDOW_SECS", 2),
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
