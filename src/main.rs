use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use echo_server::config::Config;
use echo_server::state::AppState;
use echo_server::{db, handlers, websocket};

/// Middleware that restricts access to the metrics endpoint to loopback connections only.
///
/// When `ConnectInfo` is not available (e.g. in direct oneshot tests), access is
/// denied — the metrics route is not registered in the test app anyway, so this
/// branch is unreachable in practice.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Resolves once SIGTERM (or, on non-Unix targets, Ctrl+C) is received.
/// Broadcasts the `server.shutdown` hint to every live connection and gives
/// clients `shutdown_grace` to reconnect elsewhere before axum stops
/// accepting new work and drains in-flight requests (spec §5).
async fn shutdown_signal(state: AppState) {
    let terminate = async {
        #[cfg(unix)]
        {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, notifying connected clients");
    websocket::broadcast_shutdown_hint(&state, state.config.shutdown_grace).await;
    tokio::time::sleep(state.config.shutdown_grace).await;
    info!("shutdown grace period elapsed, closing listener");
}

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "echo_server=info,tower_http=info,sqlx=warn".parse().unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Echo server starting...");

    // Load configuration — fatal if DATABASE_URL is missing.
    let config = Config::from_env().expect("Failed to load configuration");
    info!("configuration loaded");

    // Create database connection pool
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Auto-run pending migrations on startup.
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("database migrations applied");

    // Run health check
    db::health_check(&pool)
        .await
        .expect("Database health check failed");
    info!("database health check passed");

    // CORS: permissive in dev, origin-restricted in production.
    // Set APP_ENV=production and ALLOWED_ORIGINS=https://your-domain.com (see .env.example).
    let cors = if config.is_dev {
        info!("CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };

    let addr = config.server_addr();
    let app_state = AppState::new(pool, config);

    // Prometheus metrics layer
    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // ── Rate limiting ─────────────────────────────────────────────────────────
    // Global limit: 10 requests/second per IP, burst of 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    // Stricter limit for authentication endpoints: 2 requests/second per IP, burst of 5.
    // Nested into a sub-router so that `.route_layer()` applies only to these three routes.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("Invalid auth governor configuration"),
    );

    let auth_router = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh_token))
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    // Build router
    let app = Router::new()
        // Health check + metrics
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        // Auth routes (stricter per-IP rate limit, nested via sub-router)
        .merge(auth_router)
        // User routes (protected)
        .route("/users/@me", get(handlers::users::get_current_user))
        .route("/users/@me", patch(handlers::users::update_current_user))
        // Workspace routes (protected)
        .route("/workspaces", post(handlers::workspaces::create_workspace))
        .route("/workspaces", get(handlers::workspaces::list_workspaces))
        .route("/workspaces/:id", get(handlers::workspaces::get_workspace))
        .route("/workspaces/:id", patch(handlers::workspaces::update_workspace))
        .route("/workspaces/:id", delete(handlers::workspaces::delete_workspace))
        .route(
            "/workspaces/:id/leave",
            delete(handlers::workspaces::leave_workspace),
        )
        .route(
            "/workspaces/:id/members",
            get(handlers::workspaces::list_members),
        )
        // Invite routes (protected, nested under workspace / top-level redemption)
        .route(
            "/workspaces/:id/invites",
            post(handlers::invites::create_invite),
        )
        .route(
            "/invites/:token/accept",
            post(handlers::invites::accept_invite),
        )
        // Channel routes (protected, nested under workspace)
        .route(
            "/workspaces/:id/channels",
            post(handlers::channels::create_channel),
        )
        .route(
            "/workspaces/:id/channels",
            get(handlers::channels::list_channels),
        )
        .route(
            "/workspaces/:id/channels/:channel_id",
            get(handlers::channels::get_channel),
        )
        .route(
            "/workspaces/:id/channels/:channel_id",
            patch(handlers::channels::update_channel),
        )
        .route(
            "/workspaces/:id/channels/:channel_id",
            delete(handlers::channels::delete_channel),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/join",
            post(handlers::channels::join_channel),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/leave",
            delete(handlers::channels::leave_channel),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/members",
            get(handlers::channels::list_members),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/members/:user_id",
            delete(handlers::channels::remove_member),
        )
        // Message routes (protected, nested under workspace/channel)
        .route(
            "/workspaces/:id/channels/:channel_id/messages",
            post(handlers::messages::create_message),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/messages",
            get(handlers::messages::history),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/messages/:message_id",
            get(handlers::messages::get_message),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/messages/:message_id",
            patch(handlers::messages::update_message),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/messages/:message_id",
            delete(handlers::messages::delete_message),
        )
        // Read-receipt / unread-count routes
        .route(
            "/workspaces/:id/channels/:channel_id/read-receipt",
            post(handlers::read_states::advance),
        )
        .route(
            "/workspaces/:id/channels/:channel_id/read-receipt",
            get(handlers::read_states::get_receipt),
        )
        .route(
            "/workspaces/:id/unread-counts",
            get(handlers::read_states::unread_counts),
        )
        // WebSocket gateway
        .route("/ws", get(websocket::websocket_handler))
        // ── Global rate limit (10 req/s per IP, burst 20) ──────────────────
        .layer(GovernorLayer {
            config: governor_conf,
        })
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // ── Prometheus + CORS ──────────────────────────────────────────────
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state.clone());

    // Start server
    info!("server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates `ConnectInfo<SocketAddr>` in
    // request extensions, needed by:
    //  - GovernorLayer's PeerIpKeyExtractor (per-IP rate limiting)
    //  - require_loopback middleware on /metrics
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(app_state))
    .await
    .expect("Server failed to start");
}
