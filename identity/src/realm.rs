//! # Realm Registry
//!
//! A realm owns its own signing secret, claim strings, token lifetimes, and
//! role set. `RealmRegistry` resolves a realm name to a [`Services`] handle
//! composing realm-aware Auth/Token/User/Mfa services over one shared
//! connection pool, per spec.md §4.D.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::AuthService;
use crate::clock::{Clock, SystemClock};
use crate::crypto::{Argon2PasswordHasher, PasswordHasher};
use crate::event_bus::EventBus;
use crate::hooks::{FailureStrategy, HookExecutor};
use crate::mfa::{BackupCodeConfig, MfaEngine};
use crate::repository::Repository;
use crate::token::TokenService;
use crate::transport::Sender;
use crate::user_service::UserService;
use crate::IdentityError;
use async_trait::async_trait;
use uuid::Uuid;

/// Per-realm token lifetime configuration. Defaults per spec.md §4.C: 1h
/// access, 30d refresh, 15m reset.
#[derive(Debug, Clone)]
pub struct TokenValidity {
    pub access: Duration,
    pub refresh: Duration,
    pub reset: Duration,
}

impl Default for TokenValidity {
    fn default() -> Self {
        Self {
            access: Duration::hours(1),
            refresh: Duration::days(30),
            reset: Duration::minutes(15),
        }
    }
}

/// Per-realm MFA tuning. `encryption_key` must be exactly 32 bytes (hex
/// decoded at config time, per spec.md §6).
#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub encryption_key: [u8; 32],
    pub totp_issuer: String,
    pub backup_codes: BackupCodeConfig,
    pub auto_trust_device_after_verification: bool,
    pub enroll_attempts_per_window: u32,
    pub enroll_window: Duration,
    pub resend_cooldown: Duration,
    pub challenge_ttl: Duration,
    pub max_challenge_attempts: i32,
    pub trust_ttl: Duration,
}

/// Evaluates whether a user holds a named role. Expressed as a trait object
/// rather than spec.md's raw closure (`user_has_role`) for ergonomics -
/// `RealmConfig` is plain data, not a bag of boxed futures.
#[async_trait]
pub trait RoleChecker: Send + Sync {
    async fn user_has_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, IdentityError>;
}

/// Same rationale as [`RoleChecker`] for spec.md's `get_total_users` closure.
#[async_trait]
pub trait TotalUsersProvider: Send + Sync {
    async fn total_users(&self) -> Result<i64, IdentityError>;
}

struct RepositoryRoleChecker {
    repository: Arc<dyn Repository>,
}

#[async_trait]
impl RoleChecker for RepositoryRoleChecker {
    async fn user_has_role(&self, user_id: Uuid, role_name: &str) -> Result<bool, IdentityError> {
        let full_user = self
            .repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        Ok(full_user.roles.iter().any(|r| r == role_name))
    }
}

struct RepositoryTotalUsersProvider {
    repository: Arc<dyn Repository>,
    realm: String,
}

#[async_trait]
impl TotalUsersProvider for RepositoryTotalUsersProvider {
    async fn total_users(&self) -> Result<i64, IdentityError> {
        self.repository.count_users(&self.realm).await
    }
}

/// Immutable realm declaration, supplied programmatically by the host - a
/// library cannot assume `.env`/file config conventions belong to it
/// (spec.md §1.1).
pub struct RealmConfig {
    /// Also the name of the implicitly seeded owner role, per spec.md §3.
    pub owner: String,
    pub issuer: String,
    pub audience: String,
    pub secret: Vec<u8>,
    pub token_validity: TokenValidity,
    pub roles: Vec<String>,
    pub mfa: MfaConfig,
    pub password_hasher: Option<Arc<dyn PasswordHasher>>,
    pub sender: Arc<dyn Sender>,
    pub hook_failure_strategy: FailureStrategy,
    pub lockout_threshold: i32,
    pub lockout_window: Duration,
    pub lockout_duration: Duration,
    /// IANA time zone name. Kept as a plain string rather than pulling in
    /// `chrono-tz`: nothing in this crate parses or computes with it, it is
    /// carried for the host's own display purposes only.
    pub time_zone: String,
    /// Applied to the realm's [`HookExecutor`] right after construction,
    /// before it is `Arc`-wrapped - the seam through which a host registers
    /// its `Before*`/`After*` extension instances (spec.md §3 Realm, §4.D).
    /// Defaults to a no-op, matching a realm with no registered hooks.
    pub hooks: HookRegistration,
}

/// A one-shot closure run against a freshly built [`HookExecutor`] before it
/// is shared behind an `Arc`. Wrapping the closure lets `RealmConfig` stay
/// plain data everywhere else while still giving a host a mutation seam.
pub struct HookRegistration(pub Box<dyn FnOnce(&mut HookExecutor) + Send>);

impl HookRegistration {
    pub fn new(f: impl FnOnce(&mut HookExecutor) + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl Default for HookRegistration {
    fn default() -> Self {
        Self(Box::new(|_| {}))
    }
}

/// The bundle of realm-scoped services a host obtains from
/// [`RealmRegistry::services_of`].
pub struct Services {
    pub auth: Arc<AuthService>,
    pub token: Arc<TokenService>,
    pub user: Arc<UserService>,
    pub mfa: Arc<MfaEngine>,
    pub hooks: Arc<HookExecutor>,
    pub event_bus: Arc<EventBus>,
}

pub struct RealmRegistry {
    services: HashMap<String, Services>,
}

impl RealmRegistry {
    pub fn builder() -> RealmRegistryBuilder {
        RealmRegistryBuilder::default()
    }

    /// Returns the `Services` handle for `realm`, or `UnknownRealm`.
    pub fn services_of(&self, realm: &str) -> Result<&Services, IdentityError> {
        self.services
            .get(realm)
            .ok_or_else(|| IdentityError::UnknownRealm(realm.to_string()))
    }
}

#[derive(Default)]
pub struct RealmRegistryBuilder {
    realms: Vec<(String, RealmConfig)>,
}

impl RealmRegistryBuilder {
    pub fn realm(mut self, name: impl Into<String>, config: RealmConfig) -> Self {
        self.realms.push((name.into(), config));
        self
    }

    /// Seeds every realm's declared roles plus its owner role (idempotent
    /// upsert) before returning the built registry, matching the Data
    /// Model's "seeded at startup" lifecycle for `Role` (spec.md §4.D).
    pub async fn build(
        self,
        repository: Arc<dyn Repository>,
    ) -> Result<RealmRegistry, IdentityError> {
        self.build_with_clock(repository, Arc::new(SystemClock)).await
    }

    pub async fn build_with_clock(
        self,
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
    ) -> Result<RealmRegistry, IdentityError> {
        let mut services = HashMap::new();

        for (name, config) in self.realms {
            for role_name in config.roles.iter().chain(std::iter::once(&config.owner)) {
                repository
                    .seed_role(crate::domain::Role {
                        name: role_name.clone(),
                        description: None,
                    })
                    .await?;
            }

            let hasher = config
                .password_hasher
                .clone()
                .unwrap_or_else(|| Arc::new(Argon2PasswordHasher::default()));

            let event_bus = Arc::new(EventBus::new());
            let mut hook_executor = HookExecutor::new(config.hook_failure_strategy);
            (config.hooks.0)(&mut hook_executor);
            let hooks = Arc::new(hook_executor);

            let token = Arc::new(TokenService::new(
                repository.clone(),
                clock.clone(),
                event_bus.clone(),
                name.clone(),
                config.issuer.clone(),
                config.audience.clone(),
                config.secret.clone(),
                config.token_validity.clone(),
            ));

            let auth = Arc::new(AuthService::new(
                repository.clone(),
                token.clone(),
                hooks.clone(),
                event_bus.clone(),
                clock.clone(),
                hasher.clone(),
                name.clone(),
                config.lockout_threshold,
                config.lockout_window,
                config.lockout_duration,
            ));

            let user = Arc::new(UserService::new(
                repository.clone(),
                hooks.clone(),
                event_bus.clone(),
                clock.clone(),
                hasher.clone(),
                name.clone(),
                config.owner.clone(),
            ));

            let role_checker: Arc<dyn RoleChecker> = Arc::new(RepositoryRoleChecker {
                repository: repository.clone(),
            });
            let total_users: Arc<dyn TotalUsersProvider> = Arc::new(RepositoryTotalUsersProvider {
                repository: repository.clone(),
                realm: name.clone(),
            });

            let mfa = Arc::new(MfaEngine::new(
                repository.clone(),
                event_bus.clone(),
                clock.clone(),
                config.sender.clone(),
                role_checker,
                total_users,
                name.clone(),
                config.mfa.clone(),
            ));

            services.insert(
                name,
                Services {
                    auth,
                    token,
                    user,
                    mfa,
                    hooks,
                    event_bus,
                },
            );
        }

        Ok(RealmRegistry { services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_validity_defaults_match_spec() {
        let defaults = TokenValidity::default();
        assert_eq!(defaults.access, Duration::hours(1));
        assert_eq!(defaults.refresh, Duration::days(30));
        assert_eq!(defaults.reset, Duration::minutes(15));
    }
}
