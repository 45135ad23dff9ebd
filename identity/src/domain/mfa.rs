//! # MFA Entities
//!
//! Methods, challenges, backup codes, trusted devices, and password-reset
//! tokens - everything the MFA Engine persists via the Repository Layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MfaMethodType {
    Email,
    Totp,
}

/// An enrolled factor. Invariants: at most one method per user has
/// `is_primary = true`; `identifier` is unique per `(user, type)`; secrets
/// are only ever persisted after successful enrollment verification.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MfaMethod {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method_type: MfaMethodType,
    pub identifier: String,
    /// AES-GCM ciphertext of the TOTP base32 seed; `None` for EMAIL methods.
    #[serde(skip_serializing)]
    pub encrypted_secret: Option<Vec<u8>>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallengeStatus {
    Pending,
    Consumed,
    Expired,
}

/// A server-side ephemeral record binding a user (and optionally a method)
/// to a one-time code with attempt and expiry bounds.
#[derive(Debug, Clone, FromRow)]
pub struct MfaChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method_id: Option<Uuid>,
    pub code_hash: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub status: ChallengeStatus,
}

/// A single-use recovery credential, disclosed plaintext exactly once at
/// generation and stored only as a hash thereafter.
#[derive(Debug, Clone, FromRow)]
pub struct BackupCode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub code_hash: String,
    pub used_at: Option<DateTime<Utc>>,
}

/// An `(ip-hash, ua-hash)` pair that lets a user skip MFA for a configured
/// duration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_hash: String,
    pub ua_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TrustedDevice {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub contact_value: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn trusted_device_without_expiry_is_always_active() {
        let device = TrustedDevice {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ip_hash: "h1".into(),
            ua_hash: "h2".into(),
            name: None,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            expires_at: None,
        };
        assert!(device.is_active(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn trusted_device_expires() {
        let now = Utc::now();
        let device = TrustedDevice {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ip_hash: "h1".into(),
            ua_hash: "h2".into(),
            name: None,
            created_at: now,
            last_used_at: now,
            expires_at: Some(now + Duration::days(30)),
        };
        assert!(device.is_active(now + Duration::days(1)));
        assert!(!device.is_active(now + Duration::days(31)));
    }
}
