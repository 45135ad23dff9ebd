//! # Token Family
//!
//! The chain identity shared by an initial refresh token and all of its
//! rotation successors; the unit of replay detection. This table is this
//! crate's own addition over the spec's bare `refresh_tokens` rows - see
//! `token_families` in the repository migrations for the grounding note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TokenFamily {
    pub id: Uuid,
    pub user_id: Uuid,
    pub realm: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl TokenFamily {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// A single member (one refresh token value) within a family's chain.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub family_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Optional per-login device binding attached to issued tokens.
#[derive(Debug, Clone, Default)]
pub struct DeviceContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
