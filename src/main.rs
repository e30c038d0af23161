use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatehouse_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::{PgSessionStore, PgUserStore},
    routes::router,
    services::{ExpirySweeper, SessionManager},
    state::AppState,
    utils::{jwt::TokenCodec, time::SystemClock},
};

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "<empty>".into();
    }
    let prefix = s.chars().take(4).collect::<String>();
    format!("{}*** (len={})", prefix, s.len())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatehouse_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %config.database_url,
        jwt_secret = %mask_secret(&config.jwt_secret),
        access_token_ttl_secs = config.access_token_ttl_secs,
        refresh_token_ttl_secs = config.refresh_token_ttl_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Wire the session core over the Postgres stores
    let codec = TokenCodec::new(&config.jwt_secret);
    let sessions = Arc::new(SessionManager::new(
        Arc::new(PgSessionStore::new(pool.clone())),
        codec.clone(),
        Arc::new(SystemClock),
        ChronoDuration::seconds(config.access_token_ttl_secs as i64),
        ChronoDuration::seconds(config.refresh_token_ttl_secs as i64),
    ));
    let users = Arc::new(PgUserStore::new(pool));

    // Background stale-session sweep, independent of request traffic
    ExpirySweeper::new(sessions.clone(), config.sweep_interval()).spawn();

    let state = AppState::new(sessions, users, codec, config);
    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
