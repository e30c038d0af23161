//! Recurring stale-session sweep.
//!
//! `validate_session` only expires sessions lazily, when a request shows up.
//! Clients that never return would leave abandoned sessions active in
//! storage forever, so this task sweeps them on a fixed cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::session::{SessionError, SessionManager};

pub struct ExpirySweeper {
    sessions: Arc<SessionManager>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(sessions: Arc<SessionManager>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// One sweep. Public so tests and the cleanup binary can trigger a pass
    /// without waiting on the schedule.
    pub async fn run_once(&self) -> Result<u64, SessionError> {
        self.sessions.deactivate_stale_sessions().await
    }

    /// Runs the sweep loop on the runtime. A failed pass is logged and the
    /// next scheduled pass retries naturally; the loop never exits on error.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    tracing::warn!(error = %err, "session sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::models::User;
    use crate::repositories::{InMemorySessionStore, MockSessionStore, StoreError};
    use crate::types::UserId;
    use crate::utils::jwt::TokenCodec;
    use crate::utils::time::{Clock, ManualClock};

    fn test_user() -> User {
        let now = chrono::Utc::now();
        User {
            id: UserId::new(),
            email: "user@example.com".to_string(),
            password_hash: "argon2-hash".to_string(),
            display_name: "Test User".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn manager_over(
        store: Arc<InMemorySessionStore>,
        clock: Arc<ManualClock>,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            store,
            TokenCodec::new("test-secret"),
            clock,
            ChronoDuration::minutes(15),
            ChronoDuration::hours(24),
        ))
    }

    #[tokio::test]
    async fn run_once_deactivates_only_stale_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::from_now());
        let manager = manager_over(store.clone(), clock.clone());
        let user = test_user();
        let t0 = clock.now();

        clock.set(t0 - ChronoDuration::minutes(20));
        manager.create_session(&user, "a", "10.0.0.1").await.unwrap();
        clock.set(t0 - ChronoDuration::minutes(1));
        manager.create_session(&user, "b", "10.0.0.1").await.unwrap();
        clock.set(t0);

        let sweeper = ExpirySweeper::new(manager.clone(), Duration::from_secs(30));
        assert_eq!(sweeper.run_once().await.unwrap(), 1);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_sweeps_on_schedule() {
        let store = Arc::new(InMemorySessionStore::new());
        let clock = Arc::new(ManualClock::from_now());
        let manager = manager_over(store.clone(), clock.clone());
        let user = test_user();
        let t0 = clock.now();

        clock.set(t0 - ChronoDuration::minutes(20));
        manager.create_session(&user, "a", "10.0.0.1").await.unwrap();
        clock.set(t0);

        let handle = ExpirySweeper::new(manager.clone(), Duration::from_secs(30)).spawn();
        // First tick fires immediately; paused time lets it run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let devices = manager.list_user_devices(user.id).await.unwrap();
        assert_eq!(devices[0].active_sessions, 0);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_sweep_does_not_kill_the_loop() {
        let mut store = MockSessionStore::new();
        store
            .expect_deactivate_stale_sessions()
            .returning(|_| Err(StoreError::Database(sqlx::Error::PoolClosed)));

        let manager = Arc::new(SessionManager::new(
            Arc::new(store),
            TokenCodec::new("test-secret"),
            Arc::new(ManualClock::from_now()),
            ChronoDuration::minutes(15),
            ChronoDuration::hours(24),
        ));

        let handle = ExpirySweeper::new(manager, Duration::from_secs(30)).spawn();
        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
