//! # Repository Layer
//!
//! `Repository` is an `async_trait` so the service layer is decoupled from
//! the persistence engine - the spec calls the database driver an external
//! collaborator. [`PgRepository`] is the single production implementation,
//! over `sqlx::PgPool`, mirroring the corpus's `UserRepository` (typed
//! `FromRow` structs, unique-constraint translation to typed result
//! variants rather than raw `sqlx::Error`).
//!
//! Every method runs inside its own transaction unless documented
//! otherwise. Migrations are shipped as `sqlx migrate` SQL files under
//! `identity/migrations/` purely as the schema-of-record; this crate never
//! runs them itself (the migration runner is an external collaborator).

mod pg;

pub use pg::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    BackupCode, ChallengeStatus, FieldUpdate, FullUser, MfaChallenge, MfaMethod, MfaMethodType,
    NewUser, RefreshTokenRecord, Role, TokenFamily, TrustedDevice, User,
};
use crate::error::IdentityError;

/// Outcome of `create_user`: expected uniqueness conflicts are typed
/// variants rather than a generic database error.
#[derive(Debug)]
pub enum CreateUserResult {
    Created(User),
    EmailExists,
    PhoneExists,
}

/// Outcome of `update_batch`.
#[derive(Debug)]
pub enum UpdateBatchResult {
    Success,
    EmailExists,
    PhoneExists,
    NotFound,
}

/// Outcome of `rotate_refresh`.
#[derive(Debug)]
pub enum RotateRefreshResult {
    Ok(RefreshTokenRecord),
    FamilyRevoked,
    Unknown,
}

/// A single custom-attribute mutation. `ReplaceAll` yields removals for
/// every previously present key absent from the new map plus sets for
/// every new key - computed by the caller, applied atomically here.
#[derive(Debug, Clone)]
pub enum AttributeChange {
    Set(String, String),
    Remove(String),
    ReplaceAll(HashMap<String, String>),
}

/// Field-level updates bundled for a single `update_batch` call.
#[derive(Debug, Clone, Default)]
pub struct UserFieldUpdates {
    pub email: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileFieldUpdates {
    pub first_name: FieldUpdate<String>,
    pub last_name: FieldUpdate<String>,
    pub address: FieldUpdate<String>,
    pub profile_picture: FieldUpdate<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------
    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserResult, IdentityError>;
    async fn find_full_by_id(&self, user_id: Uuid) -> Result<Option<FullUser>, IdentityError>;
    async fn find_by_email(&self, realm: &str, email: &str) -> Result<Option<User>, IdentityError>;
    async fn find_by_phone(&self, realm: &str, phone: &str) -> Result<Option<User>, IdentityError>;

    #[allow(clippy::too_many_arguments)]
    async fn update_batch(
        &self,
        user_id: Uuid,
        user_updates: UserFieldUpdates,
        profile_updates: ProfileFieldUpdates,
        attribute_changes: Vec<AttributeChange>,
        now: DateTime<Utc>,
    ) -> Result<UpdateBatchResult, IdentityError>;

    async fn delete_user(&self, user_id: Uuid) -> Result<(), IdentityError>;

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        ip: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i32, IdentityError>;
    async fn reset_failed_logins(&self, user_id: Uuid) -> Result<(), IdentityError>;
    async fn lock_user(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), IdentityError>;
    async fn update_last_logged_in(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError>;
    async fn update_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), IdentityError>;

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), IdentityError>;
    async fn unassign_all_roles(&self, user_id: Uuid) -> Result<(), IdentityError>;
    async fn seed_role(&self, role: Role) -> Result<(), IdentityError>;

    // ---------------------------------------------------------------
    // Refresh tokens / token families
    // ---------------------------------------------------------------
    async fn insert_refresh_family(
        &self,
        family_id: Uuid,
        user_id: Uuid,
        realm: &str,
        token_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), IdentityError>;

    async fn rotate_refresh(
        &self,
        family_id: Uuid,
        old_token_hash: &str,
        new_token_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RotateRefreshResult, IdentityError>;

    async fn find_family(&self, family_id: Uuid) -> Result<Option<TokenFamily>, IdentityError>;
    async fn find_refresh_record(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, IdentityError>;
    async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<(), IdentityError>;
    async fn revoke_all_families(&self, user_id: Uuid, reason: &str) -> Result<u64, IdentityError>;
    async fn list_active_families(&self, user_id: Uuid) -> Result<Vec<TokenFamily>, IdentityError>;

    // ---------------------------------------------------------------
    // MFA
    // ---------------------------------------------------------------
    async fn insert_method(&self, method: MfaMethod) -> Result<(), IdentityError>;
    async fn set_primary(&self, user_id: Uuid, method_id: Uuid) -> Result<(), IdentityError>;
    async fn remove_method(&self, user_id: Uuid, method_id: Uuid) -> Result<(), IdentityError>;
    async fn list_methods(&self, user_id: Uuid) -> Result<Vec<MfaMethod>, IdentityError>;
    async fn find_method(&self, method_id: Uuid) -> Result<Option<MfaMethod>, IdentityError>;
    async fn count_methods_of_type(
        &self,
        user_id: Uuid,
        method_type: MfaMethodType,
    ) -> Result<i64, IdentityError>;

    async fn insert_challenge(&self, challenge: MfaChallenge) -> Result<(), IdentityError>;
    async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<MfaChallenge>, IdentityError>;
    async fn consume_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError>;
    async fn expire_challenge(&self, challenge_id: Uuid) -> Result<(), IdentityError>;
    async fn increment_attempts(&self, challenge_id: Uuid) -> Result<i32, IdentityError>;
    async fn mark_challenge_status(
        &self,
        challenge_id: Uuid,
        status: ChallengeStatus,
    ) -> Result<(), IdentityError>;

    async fn insert_backup_codes(&self, codes: Vec<BackupCode>) -> Result<(), IdentityError>;
    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<(), IdentityError>;
    async fn mark_backup_code_used(
        &self,
        user_id: Uuid,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, IdentityError>;
    async fn list_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, IdentityError>;

    async fn insert_trusted_device(&self, device: TrustedDevice) -> Result<(), IdentityError>;
    async fn list_trusted_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, IdentityError>;
    async fn find_trusted_device(
        &self,
        user_id: Uuid,
        ip_hash: &str,
        ua_hash: &str,
    ) -> Result<Option<TrustedDevice>, IdentityError>;
    async fn remove_trusted_device(&self, user_id: Uuid, device_id: Uuid) -> Result<(), IdentityError>;
    async fn remove_all_trusted_devices(&self, user_id: Uuid) -> Result<(), IdentityError>;
    async fn touch_trusted_device(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError>;

    // ---------------------------------------------------------------
    // Statistics
    // ---------------------------------------------------------------
    async fn count_users(&self, realm: &str) -> Result<i64, IdentityError>;
    async fn count_users_with_any_mfa(&self, realm: &str) -> Result<i64, IdentityError>;
    async fn count_methods_by_type(
        &self,
        realm: &str,
    ) -> Result<HashMap<MfaMethodType, i64>, IdentityError>;
    async fn count_trusted_devices(&self, realm: &str) -> Result<i64, IdentityError>;
}
