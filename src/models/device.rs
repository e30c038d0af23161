//! Models for the devices a user logs in from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{DeviceId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
/// Database representation of a device fingerprint.
///
/// A device is the (user, user-agent, IP address) tuple a login arrived from.
/// At most one active device row exists per tuple; repeat logins from the
/// same fingerprint reuse the existing row.
pub struct Device {
    /// Unique identifier for the device record.
    pub id: DeviceId,
    /// User the device belongs to.
    pub user_id: UserId,
    /// User-agent string reported by the client.
    pub user_agent: String,
    /// IP address the login arrived from.
    pub ip_address: String,
    /// Inactive devices are excluded from fingerprint matching and listings.
    pub is_active: bool,
    /// Timestamp when the device was first seen.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
/// Per-device projection returned by the devices listing.
pub struct DeviceView {
    pub id: DeviceId,
    pub user_agent: String,
    pub ip_address: String,
    /// Most recent activity across the device's active sessions, or the
    /// device creation time when it has none.
    pub last_activity_at: DateTime<Utc>,
    /// Number of currently active sessions on the device.
    pub active_sessions: usize,
}

/// A device together with its sessions, as loaded by the store.
#[derive(Debug, Clone)]
pub struct DeviceWithSessions {
    pub device: Device,
    pub sessions: Vec<crate::models::session::Session>,
}
