//! # Postgres Repository
//!
//! The single production [`Repository`] implementation, grounded in the
//! corpus's `UserRepository` (`sqlx::query_as` over `FromRow` structs,
//! unique-constraint translation into typed result enums instead of raw
//! `sqlx::Error`, `RETURNING *` on writes). Every multi-statement operation
//! runs inside an explicit `self.pool.begin()` transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    BackupCode, ChallengeStatus, FieldUpdate, FullUser, MfaChallenge, MfaMethod, MfaMethodType,
    NewUser, RefreshTokenRecord, Role, TokenFamily, TrustedDevice, User, UserProfile,
};
use crate::error::IdentityError;

use super::{
    AttributeChange, CreateUserResult, ProfileFieldUpdates, Repository, RotateRefreshResult,
    UpdateBatchResult, UserFieldUpdates,
};

/// Retries a closure up to three times with exponential backoff (10ms,
/// 20ms, 40ms) when the underlying error is a serialization failure or
/// deadlock - both are transient under Postgres `SERIALIZABLE`/row-lock
/// contention and safe to retry since nothing has committed.
async fn with_retry<F, Fut, T>(mut f: F) -> Result<T, IdentityError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay_ms = 10u64;
    for attempt in 0..3 {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < 2 && is_retryable(&e) => {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                delay_ms *= 2;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("loop always returns on the final attempt")
}

fn is_retryable(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

fn constraint_name(e: &sqlx::Error) -> Option<&str> {
    match e {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, IdentityError> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"SELECT first_name, last_name, address, profile_picture
               FROM user_profiles WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn load_custom_attributes(&self, user_id: Uuid) -> Result<HashMap<String, String>, IdentityError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT key, value FROM user_custom_attributes WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn load_roles(&self, user_id: Uuid) -> Result<Vec<String>, IdentityError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT role_name FROM user_roles WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn apply_attribute_change(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        change: &AttributeChange,
    ) -> Result<(), IdentityError> {
        match change {
            AttributeChange::Set(key, value) => {
                sqlx::query(
                    r#"INSERT INTO user_custom_attributes (user_id, key, value)
                       VALUES ($1, $2, $3)
                       ON CONFLICT (user_id, key) DO UPDATE SET value = EXCLUDED.value"#,
                )
                .bind(user_id)
                .bind(key)
                .bind(value)
                .execute(&mut **tx)
                .await?;
            }
            AttributeChange::Remove(key) => {
                sqlx::query(r#"DELETE FROM user_custom_attributes WHERE user_id = $1 AND key = $2"#)
                    .bind(user_id)
                    .bind(key)
                    .execute(&mut **tx)
                    .await?;
            }
            AttributeChange::ReplaceAll(map) => {
                sqlx::query(r#"DELETE FROM user_custom_attributes WHERE user_id = $1"#)
                    .bind(user_id)
                    .execute(&mut **tx)
                    .await?;
                for (key, value) in map {
                    sqlx::query(
                        r#"INSERT INTO user_custom_attributes (user_id, key, value) VALUES ($1, $2, $3)"#,
                    )
                    .bind(user_id)
                    .bind(key)
                    .bind(value)
                    .execute(&mut **tx)
                    .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------
    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserResult, IdentityError> {
        let mut tx = self.pool.begin().await?;

        let user = match sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (realm, email, phone, password_hash, status, is_verified)
            VALUES ($1, $2, $3, $4, 'PENDING_VERIFICATION', false)
            RETURNING *
            "#,
        )
        .bind(&new_user.realm)
        .bind(&new_user.email)
        .bind(&new_user.phone)
        .bind(&new_user.password_hash)
        .fetch_one(&mut *tx)
        .await
        {
            Ok(user) => user,
            Err(e) => {
                return Ok(match constraint_name(&e) {
                    Some("users_realm_email_key") => CreateUserResult::EmailExists,
                    Some("users_realm_phone_key") => CreateUserResult::PhoneExists,
                    _ => return Err(e.into()),
                });
            }
        };

        if let Some(profile) = &new_user.profile {
            sqlx::query(
                r#"INSERT INTO user_profiles (user_id, first_name, last_name, address, profile_picture)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(user.id)
            .bind(&profile.first_name)
            .bind(&profile.last_name)
            .bind(&profile.address)
            .bind(&profile.profile_picture)
            .execute(&mut *tx)
            .await?;
        }

        for (key, value) in &new_user.custom_attributes {
            sqlx::query(r#"INSERT INTO user_custom_attributes (user_id, key, value) VALUES ($1, $2, $3)"#)
                .bind(user.id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for role in &new_user.roles {
            sqlx::query(
                r#"INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2)
                   ON CONFLICT DO NOTHING"#,
            )
            .bind(user.id)
            .bind(role)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CreateUserResult::Created(user))
    }

    async fn find_full_by_id(&self, user_id: Uuid) -> Result<Option<FullUser>, IdentityError> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(user) = user else { return Ok(None) };

        let profile = self.load_profile(user_id).await?;
        let custom_attributes = self.load_custom_attributes(user_id).await?;
        let roles = self.load_roles(user_id).await?;

        Ok(Some(FullUser { user, profile, custom_attributes, roles }))
    }

    async fn find_by_email(&self, realm: &str, email: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE realm = $1 AND email = $2"#,
        )
        .bind(realm)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_phone(&self, realm: &str, phone: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE realm = $1 AND phone = $2"#,
        )
        .bind(realm)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn update_batch(
        &self,
        user_id: Uuid,
        user_updates: UserFieldUpdates,
        profile_updates: ProfileFieldUpdates,
        attribute_changes: Vec<AttributeChange>,
        now: DateTime<Utc>,
    ) -> Result<UpdateBatchResult, IdentityError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as(r#"SELECT id FROM users WHERE id = $1 FOR UPDATE"#)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(UpdateBatchResult::NotFound);
        }

        if !user_updates.email.is_no_change() {
            if let Some(result) = apply_user_unique_field(
                &mut tx,
                user_id,
                "email",
                "users_realm_email_key",
                &user_updates.email,
                now,
                UpdateBatchResult::EmailExists,
            )
            .await?
            {
                return Ok(result);
            }
        }

        if !user_updates.phone.is_no_change() {
            if let Some(result) = apply_user_unique_field(
                &mut tx,
                user_id,
                "phone",
                "users_realm_phone_key",
                &user_updates.phone,
                now,
                UpdateBatchResult::PhoneExists,
            )
            .await?
            {
                return Ok(result);
            }
        }

        if !profile_updates.first_name.is_no_change()
            || !profile_updates.last_name.is_no_change()
            || !profile_updates.address.is_no_change()
            || !profile_updates.profile_picture.is_no_change()
        {
            sqlx::query(
                r#"INSERT INTO user_profiles (user_id, first_name, last_name, address, profile_picture)
                   VALUES ($1, NULL, NULL, NULL, NULL)
                   ON CONFLICT (user_id) DO NOTHING"#,
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            apply_profile_field(&mut tx, user_id, "first_name", &profile_updates.first_name).await?;
            apply_profile_field(&mut tx, user_id, "last_name", &profile_updates.last_name).await?;
            apply_profile_field(&mut tx, user_id, "address", &profile_updates.address).await?;
            apply_profile_field(&mut tx, user_id, "profile_picture", &profile_updates.profile_picture).await?;
        }

        for change in &attribute_changes {
            self.apply_attribute_change(&mut tx, user_id, change).await?;
        }

        tx.commit().await?;
        Ok(UpdateBatchResult::Success)
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"UPDATE token_families SET revoked_at = NOW(), revoked_reason = 'user_deleted'
               WHERE user_id = $1 AND revoked_at IS NULL"#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM mfa_challenges WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM backup_codes WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM trusted_devices WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM mfa_methods WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM user_roles WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM user_custom_attributes WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM user_profiles WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM users WHERE id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failed_login(
        &self,
        user_id: Uuid,
        ip: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<i32, IdentityError> {
        let _ = (ip, user_agent);
        let (attempts,): (i32,) = sqlx::query_as(
            r#"UPDATE users SET failed_login_attempts = failed_login_attempts + 1, updated_at = $2
               WHERE id = $1
               RETURNING failed_login_attempts"#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn reset_failed_logins(&self, user_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(
            r#"UPDATE users SET failed_login_attempts = 0, status = CASE WHEN status = 'LOCKED' THEN 'ACTIVE' ELSE status END,
               lockout_until = NULL, lockout_reason = NULL WHERE id = $1"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn lock_user(&self, user_id: Uuid, until: DateTime<Utc>, reason: &str) -> Result<(), IdentityError> {
        sqlx::query(
            r#"UPDATE users SET status = 'LOCKED', lockout_until = $2, lockout_reason = $3, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(user_id)
        .bind(until)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_last_logged_in(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError> {
        sqlx::query(r#"UPDATE users SET last_logged_in = $2 WHERE id = $1"#)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), IdentityError> {
        sqlx::query(r#"UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(user_id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO user_roles (user_id, role_name) VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
        )
        .bind(user_id)
        .bind(role_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unassign_all_roles(&self, user_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM user_roles WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn seed_role(&self, role: Role) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO roles (name, description) VALUES ($1, $2)
               ON CONFLICT (name) DO NOTHING"#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

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
    ) -> Result<(), IdentityError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO token_families (id, user_id, realm, created_at) VALUES ($1, $2, $3, $4)"#,
        )
        .bind(family_id)
        .bind(user_id)
        .bind(realm)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO refresh_tokens (token_hash, family_id, user_id, created_at, expires_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(token_hash)
        .bind(family_id)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn rotate_refresh(
        &self,
        family_id: Uuid,
        old_token_hash: &str,
        new_token_hash: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<RotateRefreshResult, IdentityError> {
        with_retry(|| async {
            let mut tx = self.pool.begin().await?;

            let family: Option<(Option<DateTime<Utc>>,)> =
                sqlx::query_as(r#"SELECT revoked_at FROM token_families WHERE id = $1 FOR UPDATE"#)
                    .bind(family_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some((revoked_at,)) = family else {
                return Ok(RotateRefreshResult::Unknown);
            };
            if revoked_at.is_some() {
                return Ok(RotateRefreshResult::FamilyRevoked);
            }

            let current: Option<(Uuid,)> = sqlx::query_as(
                r#"SELECT user_id FROM refresh_tokens
                   WHERE token_hash = $1 AND family_id = $2 AND consumed_at IS NULL
                   FOR UPDATE"#,
            )
            .bind(old_token_hash)
            .bind(family_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((user_id,)) = current else {
                return Ok(RotateRefreshResult::Unknown);
            };

            let updated = sqlx::query(
                r#"UPDATE refresh_tokens SET consumed_at = $3
                   WHERE token_hash = $1 AND family_id = $2 AND consumed_at IS NULL"#,
            )
            .bind(old_token_hash)
            .bind(family_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Ok(RotateRefreshResult::Unknown);
            }

            sqlx::query(
                r#"INSERT INTO refresh_tokens (token_hash, family_id, user_id, created_at, expires_at)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(new_token_hash)
            .bind(family_id)
            .bind(user_id)
            .bind(now)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(RotateRefreshResult::Ok(RefreshTokenRecord {
                token_hash: new_token_hash.to_string(),
                family_id,
                user_id,
                created_at: now,
                expires_at,
                consumed_at: None,
                revoked_at: None,
            }))
        })
        .await
    }

    async fn find_family(&self, family_id: Uuid) -> Result<Option<TokenFamily>, IdentityError> {
        let family = sqlx::query_as::<_, TokenFamily>(r#"SELECT * FROM token_families WHERE id = $1"#)
            .bind(family_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(family)
    }

    async fn find_refresh_record(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, IdentityError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"SELECT * FROM refresh_tokens WHERE token_hash = $1"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<(), IdentityError> {
        sqlx::query(
            r#"UPDATE token_families SET revoked_at = NOW(), revoked_reason = $2
               WHERE id = $1 AND revoked_at IS NULL"#,
        )
        .bind(family_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_all_families(&self, user_id: Uuid, reason: &str) -> Result<u64, IdentityError> {
        let result = sqlx::query(
            r#"UPDATE token_families SET revoked_at = NOW(), revoked_reason = $2
               WHERE user_id = $1 AND revoked_at IS NULL"#,
        )
        .bind(user_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_families(&self, user_id: Uuid) -> Result<Vec<TokenFamily>, IdentityError> {
        let families = sqlx::query_as::<_, TokenFamily>(
            r#"SELECT * FROM token_families WHERE user_id = $1 AND revoked_at IS NULL ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(families)
    }

    // ---------------------------------------------------------------
    // MFA
    // ---------------------------------------------------------------
    async fn insert_method(&self, method: MfaMethod) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO mfa_methods (id, user_id, method_type, identifier, encrypted_secret, is_primary, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(method.id)
        .bind(method.user_id)
        .bind(method.method_type)
        .bind(&method.identifier)
        .bind(&method.encrypted_secret)
        .bind(method.is_primary)
        .bind(method.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_primary(&self, user_id: Uuid, method_id: Uuid) -> Result<(), IdentityError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(r#"UPDATE mfa_methods SET is_primary = false WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"UPDATE mfa_methods SET is_primary = true WHERE id = $1 AND user_id = $2"#)
            .bind(method_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_method(&self, user_id: Uuid, method_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM mfa_methods WHERE id = $1 AND user_id = $2"#)
            .bind(method_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_methods(&self, user_id: Uuid) -> Result<Vec<MfaMethod>, IdentityError> {
        let methods = sqlx::query_as::<_, MfaMethod>(
            r#"SELECT * FROM mfa_methods WHERE user_id = $1 ORDER BY created_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(methods)
    }

    async fn find_method(&self, method_id: Uuid) -> Result<Option<MfaMethod>, IdentityError> {
        let method = sqlx::query_as::<_, MfaMethod>(r#"SELECT * FROM mfa_methods WHERE id = $1"#)
            .bind(method_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(method)
    }

    async fn count_methods_of_type(&self, user_id: Uuid, method_type: MfaMethodType) -> Result<i64, IdentityError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM mfa_methods WHERE user_id = $1 AND method_type = $2"#,
        )
        .bind(user_id)
        .bind(method_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_challenge(&self, challenge: MfaChallenge) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO mfa_challenges (id, user_id, method_id, code_hash, attempts, created_at, expires_at, consumed_at, status)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(challenge.id)
        .bind(challenge.user_id)
        .bind(challenge.method_id)
        .bind(&challenge.code_hash)
        .bind(challenge.attempts)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.consumed_at)
        .bind(challenge.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<MfaChallenge>, IdentityError> {
        let challenge = sqlx::query_as::<_, MfaChallenge>(
            r#"SELECT * FROM mfa_challenges WHERE id = $1"#,
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(challenge)
    }

    async fn consume_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError> {
        sqlx::query(
            r#"UPDATE mfa_challenges SET status = 'CONSUMED', consumed_at = $2 WHERE id = $1"#,
        )
        .bind(challenge_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expire_challenge(&self, challenge_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"UPDATE mfa_challenges SET status = 'EXPIRED' WHERE id = $1"#)
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_attempts(&self, challenge_id: Uuid) -> Result<i32, IdentityError> {
        let (attempts,): (i32,) = sqlx::query_as(
            r#"UPDATE mfa_challenges SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts"#,
        )
        .bind(challenge_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn mark_challenge_status(&self, challenge_id: Uuid, status: ChallengeStatus) -> Result<(), IdentityError> {
        sqlx::query(r#"UPDATE mfa_challenges SET status = $2 WHERE id = $1"#)
            .bind(challenge_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_backup_codes(&self, codes: Vec<BackupCode>) -> Result<(), IdentityError> {
        let mut tx = self.pool.begin().await?;
        for code in codes {
            sqlx::query(
                r#"INSERT INTO backup_codes (id, user_id, code_hash, used_at) VALUES ($1, $2, $3, $4)"#,
            )
            .bind(code.id)
            .bind(code.user_id)
            .bind(&code.code_hash)
            .bind(code.used_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_backup_codes(&self, user_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM backup_codes WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_backup_code_used(&self, user_id: Uuid, code_hash: &str, now: DateTime<Utc>) -> Result<bool, IdentityError> {
        let result = sqlx::query(
            r#"UPDATE backup_codes SET used_at = $3
               WHERE user_id = $1 AND code_hash = $2 AND used_at IS NULL"#,
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_backup_codes(&self, user_id: Uuid) -> Result<Vec<BackupCode>, IdentityError> {
        let codes = sqlx::query_as::<_, BackupCode>(
            r#"SELECT * FROM backup_codes WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn insert_trusted_device(&self, device: TrustedDevice) -> Result<(), IdentityError> {
        sqlx::query(
            r#"INSERT INTO trusted_devices (id, user_id, ip_hash, ua_hash, name, created_at, last_used_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(device.id)
        .bind(device.user_id)
        .bind(&device.ip_hash)
        .bind(&device.ua_hash)
        .bind(&device.name)
        .bind(device.created_at)
        .bind(device.last_used_at)
        .bind(device.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_trusted_devices(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, IdentityError> {
        let devices = sqlx::query_as::<_, TrustedDevice>(
            r#"SELECT * FROM trusted_devices WHERE user_id = $1 ORDER BY last_used_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    async fn find_trusted_device(&self, user_id: Uuid, ip_hash: &str, ua_hash: &str) -> Result<Option<TrustedDevice>, IdentityError> {
        let device = sqlx::query_as::<_, TrustedDevice>(
            r#"SELECT * FROM trusted_devices WHERE user_id = $1 AND ip_hash = $2 AND ua_hash = $3"#,
        )
        .bind(user_id)
        .bind(ip_hash)
        .bind(ua_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn remove_trusted_device(&self, user_id: Uuid, device_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM trusted_devices WHERE id = $1 AND user_id = $2"#)
            .bind(device_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_all_trusted_devices(&self, user_id: Uuid) -> Result<(), IdentityError> {
        sqlx::query(r#"DELETE FROM trusted_devices WHERE user_id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_trusted_device(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError> {
        sqlx::query(r#"UPDATE trusted_devices SET last_used_at = $2 WHERE id = $1"#)
            .bind(device_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Statistics
    // ---------------------------------------------------------------
    async fn count_users(&self, realm: &str) -> Result<i64, IdentityError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM users WHERE realm = $1"#)
            .bind(realm)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_users_with_any_mfa(&self, realm: &str) -> Result<i64, IdentityError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(DISTINCT u.id) FROM users u
               JOIN mfa_methods m ON m.user_id = u.id
               WHERE u.realm = $1"#,
        )
        .bind(realm)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_methods_by_type(&self, realm: &str) -> Result<HashMap<MfaMethodType, i64>, IdentityError> {
        let rows: Vec<(MfaMethodType, i64)> = sqlx::query_as(
            r#"SELECT m.method_type, COUNT(*) FROM mfa_methods m
               JOIN users u ON u.id = m.user_id
               WHERE u.realm = $1
               GROUP BY m.method_type"#,
        )
        .bind(realm)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn count_trusted_devices(&self, realm: &str) -> Result<i64, IdentityError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM trusted_devices t
               JOIN users u ON u.id = t.user_id
               WHERE u.realm = $1"#,
        )
        .bind(realm)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

async fn apply_profile_field(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    column: &str,
    update: &FieldUpdate<String>,
) -> Result<(), IdentityError> {
    let value: Option<String> = match update {
        FieldUpdate::NoChange => return Ok(()),
        FieldUpdate::SetValue(v) => Some(v.clone()),
        FieldUpdate::ClearValue => None,
    };

    let sql = format!("UPDATE user_profiles SET {column} = $2 WHERE user_id = $1");
    sqlx::query(&sql).bind(user_id).bind(value).execute(&mut **tx).await?;
    Ok(())
}

/// Sets `users.{column}` directly from a [`FieldUpdate`] (no `COALESCE`
/// fallback, so `ClearValue` actually writes `NULL` instead of a no-op) and
/// translates a unique-constraint violation into `conflict_result` rather
/// than propagating it. Returns `Ok(None)` on success, `Ok(Some(_))` if the
/// named constraint fired.
#[allow(clippy::too_many_arguments)]
async fn apply_user_unique_field(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    column: &str,
    constraint: &str,
    update: &FieldUpdate<String>,
    now: DateTime<Utc>,
    conflict_result: UpdateBatchResult,
) -> Result<Option<UpdateBatchResult>, IdentityError> {
    let value: Option<String> = match update {
        FieldUpdate::NoChange => return Ok(None),
        FieldUpdate::SetValue(v) => Some(v.clone()),
        FieldUpdate::ClearValue => None,
    };

    let sql = format!("UPDATE users SET {column} = $2, updated_at = $3 WHERE id = $1");
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(value)
        .bind(now)
        .execute(&mut **tx)
        .await;

    match result {
        Ok(_) => Ok(None),
        Err(e) => {
            if constraint_name(&e) == Some(constraint) {
                Ok(Some(conflict_result))
            } else {
                Err(e.into())
            }
        }
    }
}
