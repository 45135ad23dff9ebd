//! # Auth Service
//!
//! Login, logout, password change, and lockout policy - grounded in the
//! corpus's `AuthService` (repository + jwt service + password hasher
//! collaborators, `hash_token`/login orchestration) but reworked around
//! this crate's `beforeLogin`/`afterLoginFailure` hook chain and constant-time
//! enumeration defense (spec.md §4.G).

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::PasswordHasher;
use crate::domain::{DeviceContext, IdentityEvent, User};
use crate::event_bus::EventBus;
use crate::hooks::HookExecutor;
use crate::repository::Repository;
use crate::token::{TokenPair, TokenService};
use crate::IdentityError;

/// A fixed Argon2id hash of an unguessable placeholder, verified against on
/// every "user not found" branch so the wall-clock cost of a login attempt
/// does not leak whether the identifier exists (spec.md §4.G step 4).
const DUMMY_PASSWORD_HASH: &str = "$argon2id$v=19$m=65536,t=3,p=4$c29tZXNhbHRzb21lc2FsdA$8J8piJ8M0gkbX8p8oKk1gJ17CkV0P42Iu2e6zJmKqWA";

pub struct AuthService {
    repository: Arc<dyn Repository>,
    token: Arc<TokenService>,
    hooks: Arc<HookExecutor>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PasswordHasher>,
    realm: String,
    lockout_threshold: i32,
    lockout_window: Duration,
    lockout_duration: Duration,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        token: Arc<TokenService>,
        hooks: Arc<HookExecutor>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn PasswordHasher>,
        realm: String,
        lockout_threshold: i32,
        lockout_window: Duration,
        lockout_duration: Duration,
    ) -> Self {
        Self {
            repository,
            token,
            hooks,
            event_bus,
            clock,
            hasher,
            realm,
            lockout_threshold,
            lockout_window,
            lockout_duration,
        }
    }

    /// spec.md §4.G: identifier + password in, `(access, refresh)` out.
    /// Every branch that does not find a user still performs a password
    /// verification against [`DUMMY_PASSWORD_HASH`] so found-wrong-password
    /// and not-found cost roughly the same wall-clock time.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        device: Option<DeviceContext>,
    ) -> Result<TokenPair, IdentityError> {
        let identifier = self.hooks.run_before_login(identifier.to_string()).await?;

        let user = self.find_by_identifier(&identifier).await?;

        let Some(user) = user else {
            let _ = self.hasher.verify(password, DUMMY_PASSWORD_HASH);
            self.hooks.run_after_login_failure(&identifier).await;
            self.publish_login_failed(&identifier, &device);
            return Err(IdentityError::InvalidCredentials);
        };

        let now = self.clock.now();
        if user.is_locked(now) {
            return Err(IdentityError::AccountLocked {
                until: user.lockout_until.unwrap_or(now),
                reason: user.lockout_reason.clone().unwrap_or_default(),
            });
        }

        let password_ok = self.hasher.verify(password, &user.password_hash)?;
        if !password_ok {
            self.record_failed_login(&user, &device, now).await?;
            self.hooks.run_after_login_failure(&identifier).await;
            self.publish_login_failed(&identifier, &device);
            return Err(IdentityError::InvalidCredentials);
        }

        if user.status == crate::domain::UserStatus::Suspended {
            return Err(IdentityError::InvalidCredentials);
        }

        self.repository.reset_failed_logins(user.id).await?;
        self.repository.update_last_logged_in(user.id, now).await?;

        let full_user = self
            .repository
            .find_full_by_id(user.id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        let pair = self.token.issue(user.id, full_user.roles, device.clone()).await?;

        self.event_bus.publish(IdentityEvent::LoginSucceeded {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: now,
            user_id: user.id,
            ip_address: device.and_then(|d| d.ip_address),
        });

        Ok(pair)
    }

    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, IdentityError> {
        if identifier.contains('@') {
            self.repository.find_by_email(&self.realm, identifier).await
        } else {
            self.repository.find_by_phone(&self.realm, identifier).await
        }
    }

    async fn record_failed_login(
        &self,
        user: &User,
        device: &Option<DeviceContext>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), IdentityError> {
        let ip = device.as_ref().and_then(|d| d.ip_address.as_deref());
        let ua = device.as_ref().and_then(|d| d.user_agent.as_deref());
        let attempts = self.repository.record_failed_login(user.id, ip, ua, now).await?;

        if attempts >= self.lockout_threshold {
            self.repository
                .lock_user(user.id, now + self.lockout_duration, "too many failed login attempts")
                .await?;
        }
        Ok(())
    }

    fn publish_login_failed(&self, identifier: &str, device: &Option<DeviceContext>) {
        self.event_bus.publish(IdentityEvent::LoginFailed {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            attempted_identifier: identifier.to_string(),
            ip_address: device.as_ref().and_then(|d| d.ip_address.clone()),
        });
    }

    /// Verifies the old password before storing the new hash; does not
    /// revoke existing refresh families - call [`AuthService::revoke_all_sessions`]
    /// explicitly if that is also desired (spec.md §4.G).
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        let full_user = self
            .repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        if !self.hasher.verify(old_password, &full_user.user.password_hash)? {
            return Err(IdentityError::InvalidCredentials);
        }

        self.set_password(user_id, new_password, false).await
    }

    /// Admin variant: skips the old-password check.
    pub async fn reset_password(&self, user_id: Uuid, new_password: &str) -> Result<(), IdentityError> {
        self.set_password(user_id, new_password, true).await
    }

    async fn set_password(&self, user_id: Uuid, new_password: &str, via_reset: bool) -> Result<(), IdentityError> {
        let hash = self.hasher.hash(new_password)?;
        self.repository.update_password_hash(user_id, &hash).await?;

        self.event_bus.publish(IdentityEvent::PasswordChanged {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            via_reset,
        });
        Ok(())
    }

    /// Expansion (spec.md §1.2/§4.G): revokes every active `TokenFamily` for
    /// `user_id` and publishes a single `SessionsRevoked` event rather than
    /// one event per family.
    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64, IdentityError> {
        let count = self
            .token
            .revoke_all_families(user_id, "explicit_revocation")
            .await?;

        self.event_bus.publish(IdentityEvent::SessionsRevoked {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            count,
        });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Argon2PasswordHasher;

    #[test]
    fn dummy_hash_verifies_against_the_hasher() {
        let hasher = Argon2PasswordHasher::new();
        // Sanity check: the embedded dummy hash must be a well-formed
        // argon2 hash string so the dummy verification path in `login`
        // actually performs real work instead of short-circuiting.
        assert!(hasher.verify("anything", DUMMY_PASSWORD_HASH).is_ok());
    }
}
