//! Persistence traits the session layer is written against.
//!
//! Real deployments use the Postgres adapters; tests (and storage-free
//! setups) use the in-memory implementations. The traits are designed to be
//! mockable using mockall, following the repository-trait pattern used for
//! dependency injection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Device, DeviceWithSessions, NewSession, Session, User};
use crate::types::{DeviceId, SessionId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage contract for device and session records.
///
/// Every method is idempotent with respect to repeated identical calls, and
/// `save_session` applies its multi-field update atomically per row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Looks up a device by its (user, user-agent, IP) fingerprint.
    async fn find_device_by_fingerprint(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        active_only: bool,
    ) -> Result<Option<Device>, StoreError>;

    async fn create_device(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Device, StoreError>;

    async fn find_active_session_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<Session>, StoreError>;

    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError>;

    async fn find_session_by_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, StoreError>;

    /// Finds the session a refresh token is bound to. Deliberately does not
    /// filter on the active flag: reactivation needs deactivated rows back.
    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Persists the mutable fields of a session as one atomic row update.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Flips every active session of a user to inactive, optionally sparing
    /// one. Returns the number of rows affected.
    async fn deactivate_sessions_for_user(
        &self,
        user_id: UserId,
        except_session_id: Option<SessionId>,
    ) -> Result<u64, StoreError>;

    /// Deactivates every active session whose last activity predates the
    /// cutoff, as a single conditional update. Returns the affected count.
    async fn deactivate_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Active devices of a user, newest first, optionally with their
    /// sessions loaded.
    async fn list_active_devices_for_user(
        &self,
        user_id: UserId,
        with_sessions: bool,
    ) -> Result<Vec<DeviceWithSessions>, StoreError>;
}

/// Storage contract for the externally-owned user accounts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn create(&self, user: &User) -> Result<(), StoreError>;
}
