//! # Domain Events
//!
//! "Wildcard" subscription from the source spec has no Rust equivalent (no
//! reflective class-token wildcard), so it's expressed as an enum of every
//! event variant, matched structurally by [`EventFilter`]. Every event
//! carries an id, timestamp, and realm alongside its payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::mfa::MfaMethodType;

/// A single changed field, as computed by the `ChangeTracker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// The full set of domain events this crate publishes. Matched
/// structurally by subscribers instead of a reflective wildcard token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IdentityEvent {
    UserCreated {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
    },
    UserUpdated {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        changes: Vec<FieldChange>,
    },
    UserDeleted {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
    },
    LoginSucceeded {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        ip_address: Option<String>,
    },
    LoginFailed {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        attempted_identifier: String,
        ip_address: Option<String>,
    },
    PasswordChanged {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        via_reset: bool,
    },
    TokenIssued {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        family_id: Uuid,
    },
    TokenRefreshed {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        family_id: Uuid,
    },
    TokenReplayDetected {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        family_id: Uuid,
    },
    MfaEnrolled {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        method_type: MfaMethodType,
    },
    MfaChallengeIssued {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        challenge_id: Uuid,
    },
    MfaVerified {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        method_type: MfaMethodType,
    },
    DeviceTrusted {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        device_id: Uuid,
    },
    BackupCodesRegenerated {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        code_count: usize,
    },
    /// Expansion: see SPEC_FULL §1.2 - `revoke_all_sessions` publishes one
    /// of these rather than one event per revoked family.
    SessionsRevoked {
        event_id: Uuid,
        realm: String,
        occurred_at: DateTime<Utc>,
        user_id: Uuid,
        count: u64,
    },
}

impl IdentityEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            Self::UserCreated { event_id, .. }
            | Self::UserUpdated { event_id, .. }
            | Self::UserDeleted { event_id, .. }
            | Self::LoginSucceeded { event_id, .. }
            | Self::LoginFailed { event_id, .. }
            | Self::PasswordChanged { event_id, .. }
            | Self::TokenIssued { event_id, .. }
            | Self::TokenRefreshed { event_id, .. }
            | Self::TokenReplayDetected { event_id, .. }
            | Self::MfaEnrolled { event_id, .. }
            | Self::MfaChallengeIssued { event_id, .. }
            | Self::MfaVerified { event_id, .. }
            | Self::DeviceTrusted { event_id, .. }
            | Self::BackupCodesRegenerated { event_id, .. }
            | Self::SessionsRevoked { event_id, .. } => *event_id,
        }
    }

    /// The discriminant name, used for priority-ordered logging and by
    /// subscribers that filter on one event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserCreated { .. } => "UserCreated",
            Self::UserUpdated { .. } => "UserUpdated",
            Self::UserDeleted { .. } => "UserDeleted",
            Self::LoginSucceeded { .. } => "LoginSucceeded",
            Self::LoginFailed { .. } => "LoginFailed",
            Self::PasswordChanged { .. } => "PasswordChanged",
            Self::TokenIssued { .. } => "TokenIssued",
            Self::TokenRefreshed { .. } => "TokenRefreshed",
            Self::TokenReplayDetected { .. } => "TokenReplayDetected",
            Self::MfaEnrolled { .. } => "MfaEnrolled",
            Self::MfaChallengeIssued { .. } => "MfaChallengeIssued",
            Self::MfaVerified { .. } => "MfaVerified",
            Self::DeviceTrusted { .. } => "DeviceTrusted",
            Self::BackupCodesRegenerated { .. } => "BackupCodesRegenerated",
            Self::SessionsRevoked { .. } => "SessionsRevoked",
        }
    }
}

/// What a subscriber registers for: one event discriminant, or every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    Kind(&'static str),
    All,
}

impl EventFilter {
    pub fn matches(&self, event: &IdentityEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kind(kind) => *kind == event.kind(),
        }
    }
}

/// Helper so services don't repeat `Uuid::new_v4()` at every publish call site.
pub fn new_event_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_filter() {
        let event = IdentityEvent::UserCreated {
            event_id: Uuid::new_v4(),
            realm: "realm-a".into(),
            occurred_at: Utc::now(),
            user_id: Uuid::new_v4(),
        };
        assert!(EventFilter::Kind("UserCreated").matches(&event));
        assert!(!EventFilter::Kind("UserDeleted").matches(&event));
        assert!(EventFilter::All.matches(&event));
    }
}
