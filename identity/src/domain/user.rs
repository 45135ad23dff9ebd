//! # User Entity
//!
//! `User` maps to the `users` table; `FullUser` additionally carries the
//! profile, custom attributes, and role set a caller typically needs
//! together and which the Repository Layer loads as one unit
//! (`find_full_by_id`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a user within its realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Suspended,
    Locked,
    PendingVerification,
}

/// Core user record. At least one of `email`/`phone` is non-null at
/// creation; both are unique within `(realm, email)` / `(realm, phone)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub realm: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Never serialized back out to a caller - present for repository round trips only.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: UserStatus,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub lockout_until: Option<DateTime<Utc>>,
    pub lockout_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_logged_in: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.status == UserStatus::Locked
            && self.lockout_until.map(|until| now < until).unwrap_or(false)
    }
}

/// Public profile fields, stored 1:1 with a user in `user_profiles`.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub address: Option<String>,
    pub profile_picture: Option<String>,
}

/// A user together with everything the update-command processor and MFA
/// engine need in one load: profile, custom attributes, assigned roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullUser {
    #[serde(flatten)]
    pub user: User,
    pub profile: Option<UserProfile>,
    pub custom_attributes: HashMap<String, String>,
    pub roles: Vec<String>,
}

/// A three-valued field update: semantically distinct from `Option<T>`
/// because `SetValue(None)` is not a representable state. Threaded
/// unmodified through the update-command processor and repository layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    NoChange,
    SetValue(T),
    ClearValue,
}

impl<T> FieldUpdate<T> {
    pub fn is_no_change(&self) -> bool {
        matches!(self, FieldUpdate::NoChange)
    }
}

/// Data required to create a new user; password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub realm: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub roles: Vec<String>,
    pub custom_attributes: HashMap<String, String>,
    pub profile: Option<UserProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn is_locked_respects_expiry() {
        let now = Utc::now();
        let mut user = sample_user();
        user.status = UserStatus::Locked;
        user.lockout_until = Some(now + Duration::minutes(5));
        assert!(user.is_locked(now));

        user.lockout_until = Some(now - Duration::minutes(5));
        assert!(!user.is_locked(now), "lockout should have expired");
    }

    #[test]
    fn active_user_is_never_locked() {
        let now = Utc::now();
        let user = sample_user();
        assert!(!user.is_locked(now));
    }

    #[test]
    fn field_update_no_change_is_distinguishable_from_clear() {
        let a: FieldUpdate<String> = FieldUpdate::NoChange;
        let b: FieldUpdate<String> = FieldUpdate::ClearValue;
        assert_ne!(a, b);
        assert!(a.is_no_change());
        assert!(!b.is_no_change());
    }

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            realm: "realm-a".into(),
            email: Some("alice@example.com".into()),
            phone: None,
            password_hash: "hash".into(),
            status: UserStatus::Active,
            is_verified: true,
            failed_login_attempts: 0,
            lockout_until: None,
            lockout_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_logged_in: None,
        }
    }
}
