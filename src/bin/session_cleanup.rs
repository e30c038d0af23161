use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use gatehouse_backend::{
    config::Config,
    db::connection::create_pool,
    repositories::PgSessionStore,
    services::SessionManager,
    utils::{jwt::TokenCodec, time::SystemClock},
};

/// One-shot stale-session sweep, for cron or manual operations use. The
/// in-process sweeper covers the steady state; this catches up after
/// downtime.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url).await?;

    let sessions = SessionManager::new(
        Arc::new(PgSessionStore::new(pool)),
        TokenCodec::new(&config.jwt_secret),
        Arc::new(SystemClock),
        ChronoDuration::seconds(config.access_token_ttl_secs as i64),
        ChronoDuration::seconds(config.refresh_token_ttl_secs as i64),
    );

    let count = sessions.deactivate_stale_sessions().await?;
    tracing::info!(count, "stale session sweep complete");

    Ok(())
}
