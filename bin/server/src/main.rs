use fern_gate_access::{SessionLifecycle, SessionStore, UserStore};
use fern_gate_provider::{ProviderClient, discover, http_client};
use fern_gate_server::{
    AppState,
    auth::db::{PgSessionStore, PgUserStore},
    config::ServerConfig,
    router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(oauth_enabled = config.oauth.enabled(), "Loaded configuration");

    let request_timeout = config.request_timeout();
    let mut oauth = config.oauth;
    let http = http_client(oauth.provider_timeout()).expect("failed to build HTTP client");

    if oauth.enabled() {
        if oauth.needs_discovery() {
            let issuer = oauth
                .issuer_url()
                .expect("OAUTH__ISSUER_URL is required for discovery")
                .to_string();
            tracing::info!(%issuer, "Discovering OIDC provider...");
            let endpoints = discover(&issuer, &http)
                .await
                .expect("failed to discover OIDC provider");
            oauth.apply_discovery(endpoints);
        }
        oauth.validate().expect("invalid OAuth configuration");
    }
    let oauth = Arc::new(oauth);

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db_pool.clone()));
    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db_pool));

    let provider = oauth.enabled().then(|| {
        Arc::new(ProviderClient::new(oauth.clone(), http).expect("failed to create provider client"))
    });

    // Spawn periodic session cleanup task
    let cleanup = SessionLifecycle::new(sessions.clone(), users.clone());
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            match cleanup.cleanup_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e.current_context(), "Failed to cleanup expired sessions");
                }
            }
        }
    });

    let state = Arc::new(AppState::new(
        oauth,
        provider,
        users,
        sessions,
        config.session,
    ));
    let app = router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
