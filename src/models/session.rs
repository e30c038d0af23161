//! Models for tracking login sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{DeviceId, SessionId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
/// Database representation of a login session.
///
/// A session binds a user to a device. Deactivation is soft: the row stays
/// behind for history, and a deactivated session can come back to life
/// through its refresh token until `refresh_token_expires_at`.
pub struct Session {
    /// Unique identifier for the session record.
    pub id: SessionId,
    /// User the session belongs to.
    pub user_id: UserId,
    /// Device the session was opened from.
    pub device_id: DeviceId,
    /// Refresh token currently bound to the session. None until issued.
    pub refresh_token: Option<String>,
    /// Hard ceiling past which the refresh token is unusable.
    pub refresh_token_expires_at: DateTime<Utc>,
    /// Timestamp of the last validated request or refresh.
    pub last_activity_at: DateTime<Utc>,
    /// Whether the session may currently admit requests.
    pub is_active: bool,
    /// Timestamp when the session was created.
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a fresh session row.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Token pair handed back from a successful login.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// New access token minted through the refresh path.
#[derive(Debug, Clone)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub user_id: UserId,
    pub session_id: SessionId,
}
