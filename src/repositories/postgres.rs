//! Postgres adapters for the store traits. Thin sqlx wrappers, no logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Device, DeviceWithSessions, NewSession, Session, User};
use crate::types::{DeviceId, SessionId, UserId};

use super::store::{SessionStore, StoreError, UserStore};

const SESSION_COLUMNS: &str = "id, user_id, device_id, refresh_token, refresh_token_expires_at, \
     last_activity_at, is_active, created_at";
const DEVICE_COLUMNS: &str = "id, user_id, user_agent, ip_address, is_active, created_at";

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_device_by_fingerprint(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        active_only: bool,
    ) -> Result<Option<Device>, StoreError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices \
             WHERE user_id = $1 AND user_agent = $2 AND ip_address = $3 \
             AND (NOT $4 OR is_active = TRUE) \
             LIMIT 1"
        ))
        .bind(user_id)
        .bind(user_agent)
        .bind(ip_address)
        .bind(active_only)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn create_device(
        &self,
        user_id: UserId,
        user_agent: &str,
        ip_address: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Device, StoreError> {
        let device = sqlx::query_as::<_, Device>(&format!(
            "INSERT INTO devices (id, user_id, user_agent, ip_address, is_active, created_at) \
             VALUES ($1, $2, $3, $4, TRUE, $5) \
             RETURNING {DEVICE_COLUMNS}"
        ))
        .bind(DeviceId::new())
        .bind(user_id)
        .bind(user_agent)
        .bind(ip_address)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(device)
    }

    async fn find_active_session_for_device(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE device_id = $1 AND is_active = TRUE \
             LIMIT 1"
        ))
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn create_session(&self, new_session: NewSession) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "INSERT INTO sessions \
             (id, user_id, device_id, refresh_token, refresh_token_expires_at, \
              last_activity_at, is_active, created_at) \
             VALUES ($1, $2, $3, NULL, $4, $5, TRUE, $6) \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(SessionId::new())
        .bind(new_session.user_id)
        .bind(new_session.device_id)
        .bind(new_session.refresh_token_expires_at)
        .bind(new_session.last_activity_at)
        .bind(new_session.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    async fn find_session_by_id(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, StoreError> {
        // No is_active filter: deactivated sessions must come back so the
        // refresh path can reactivate them.
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1"
        ))
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sessions \
             SET refresh_token = $1, refresh_token_expires_at = $2, \
                 last_activity_at = $3, is_active = $4 \
             WHERE id = $5",
        )
        .bind(session.refresh_token.as_deref())
        .bind(session.refresh_token_expires_at)
        .bind(session.last_activity_at)
        .bind(session.is_active)
        .bind(session.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_sessions_for_user(
        &self,
        user_id: UserId,
        except_session_id: Option<SessionId>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE \
             WHERE user_id = $1 AND is_active = TRUE \
             AND ($2::TEXT IS NULL OR id <> $2)",
        )
        .bind(user_id)
        .bind(except_session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn deactivate_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        // One conditional UPDATE so the sweep cannot race a concurrent
        // activity touch into torn state.
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE \
             WHERE is_active = TRUE AND last_activity_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_devices_for_user(
        &self,
        user_id: UserId,
        with_sessions: bool,
    ) -> Result<Vec<DeviceWithSessions>, StoreError> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices \
             WHERE user_id = $1 AND is_active = TRUE \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_device: std::collections::HashMap<DeviceId, Vec<Session>> =
            std::collections::HashMap::new();
        if with_sessions {
            let sessions = sqlx::query_as::<_, Session>(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = $1"
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            for session in sessions {
                by_device.entry(session.device_id).or_default().push(session);
            }
        }

        let records = devices
            .into_iter()
            .map(|device| {
                let sessions = by_device.remove(&device.id).unwrap_or_default();
                DeviceWithSessions { device, sessions }
            })
            .collect();
        Ok(records)
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, is_active, created_at, updated_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let user =
            sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users \
             (id, email, password_hash, display_name, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
