//! # Token Service
//!
//! Realm-scoped bearer token issuance, verification, and rotation-with-replay-detection,
//! grounded in the corpus's `JwtService` (HS256 via `jsonwebtoken`, `Claims`
//! struct, key material derived once at construction) but with a `realm`
//! claim as the actual tenant-isolation boundary rather than relying on
//! `iss`/`aud` alone (spec.md §4.C).

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::{DeviceContext, IdentityEvent, TokenFamily};
use crate::error::IdentityError;
use crate::event_bus::EventBus;
use crate::realm::TokenValidity;
use crate::repository::{Repository, RotateRefreshResult};

/// Claims embedded in a signed access token. `realm` is a required custom
/// claim, checked explicitly before a decode is trusted - see module docs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub iss: String,
    pub aud: String,
    pub realm: String,
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
    pub jti: Uuid,
}

/// The verified subject carried by an access token after successful
/// verification (spec.md Glossary).
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub realm: String,
    pub roles: Vec<String>,
    pub token_id: Uuid,
}

/// A freshly issued or rotated bearer token pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// Failure modes of [`TokenService::refresh`], distinguished from a plain
/// error since a caller may want to react differently to replay than to an
/// unknown token.
#[derive(Debug)]
pub enum RefreshFailure {
    Replayed { family_id: Uuid },
    Revoked,
    Unknown,
    Expired,
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct TokenService {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    realm: String,
    issuer: String,
    audience: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validity: TokenValidity,
}

impl TokenService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        realm: String,
        issuer: String,
        audience: String,
        secret: Vec<u8>,
        validity: TokenValidity,
    ) -> Self {
        Self {
            repository,
            clock,
            event_bus,
            realm,
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            issuer,
            audience,
            validity,
        }
    }

    fn sign(&self, user_id: Uuid, roles: Vec<String>) -> Result<(String, Uuid), IdentityError> {
        let now = self.clock.now();
        let jti = Uuid::new_v4();
        let claims = Claims {
            sub: user_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            realm: self.realm.clone(),
            roles,
            iat: now.timestamp(),
            exp: (now + self.validity.access).timestamp(),
            jti,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| IdentityError::Unknown(format!("token signing failed: {e}")))?;
        Ok((token, jti))
    }

    /// Issues a fresh access/refresh pair bound to a new token family.
    pub async fn issue(
        &self,
        user_id: Uuid,
        roles: Vec<String>,
        _device: Option<DeviceContext>,
    ) -> Result<TokenPair, IdentityError> {
        let (access_token, _jti) = self.sign(user_id, roles)?;

        let family_id = Uuid::new_v4();
        let refresh_token = generate_opaque_token();
        let now = self.clock.now();
        let expires_at = now + self.validity.refresh;

        self.repository
            .insert_refresh_family(
                family_id,
                user_id,
                &self.realm,
                &hash_refresh_token(&refresh_token),
                now,
                expires_at,
            )
            .await?;

        self.event_bus.publish(IdentityEvent::TokenIssued {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: now,
            user_id,
            family_id,
        });

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.validity.access.num_seconds(),
            refresh_expires_in: self.validity.refresh.num_seconds(),
        })
    }

    /// Verifies a bearer access token. Returns `None` (never an error) for
    /// any of: signature mismatch, expiry, wrong realm/issuer/audience, or
    /// malformed input - exactly spec.md §4.C's "Returns null, never
    /// throws" contract.
    pub fn verify(&self, token: &str) -> Option<Principal> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).ok()?;
        if data.claims.realm != self.realm {
            return None;
        }

        Some(Principal {
            user_id: data.claims.sub,
            realm: data.claims.realm,
            roles: data.claims.roles,
            token_id: data.claims.jti,
        })
    }

    /// Rotates a refresh token: the presented value must be the live member
    /// of its family. A previously retired member is a replay and revokes
    /// the whole family. See spec.md §4.C.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        roles: Vec<String>,
        _device: Option<DeviceContext>,
    ) -> Result<TokenPair, RefreshFailure> {
        let token_hash = hash_refresh_token(refresh_token);

        let record = self
            .repository
            .find_refresh_record(&token_hash)
            .await
            .map_err(|_| RefreshFailure::Unknown)?
            .ok_or(RefreshFailure::Unknown)?;

        let family = self
            .repository
            .find_family(record.family_id)
            .await
            .map_err(|_| RefreshFailure::Unknown)?
            .ok_or(RefreshFailure::Unknown)?;

        if family.is_revoked() {
            return Err(RefreshFailure::Revoked);
        }

        let now = self.clock.now();
        if record.expires_at < now {
            return Err(RefreshFailure::Expired);
        }

        if record.consumed_at.is_some() || record.revoked_at.is_some() {
            self.repository
                .revoke_family(family.id, "replay_detected")
                .await
                .map_err(|_| RefreshFailure::Unknown)?;
            self.event_bus.publish(IdentityEvent::TokenReplayDetected {
                event_id: Uuid::new_v4(),
                realm: self.realm.clone(),
                occurred_at: now,
                user_id: record.user_id,
                family_id: family.id,
            });
            return Err(RefreshFailure::Replayed { family_id: family.id });
        }

        let (access_token, _jti) = self
            .sign(record.user_id, roles)
            .map_err(|_| RefreshFailure::Unknown)?;

        let new_refresh_token = generate_opaque_token();
        let new_hash = hash_refresh_token(&new_refresh_token);
        let expires_at = now + self.validity.refresh;

        match self
            .repository
            .rotate_refresh(family.id, &token_hash, &new_hash, now, expires_at)
            .await
        {
            Ok(RotateRefreshResult::Ok(_)) => {
                self.event_bus.publish(IdentityEvent::TokenRefreshed {
                    event_id: Uuid::new_v4(),
                    realm: self.realm.clone(),
                    occurred_at: now,
                    user_id: record.user_id,
                    family_id: family.id,
                });
                Ok(TokenPair {
                    access_token,
                    refresh_token: new_refresh_token,
                    expires_in: self.validity.access.num_seconds(),
                    refresh_expires_in: self.validity.refresh.num_seconds(),
                })
            }
            Ok(RotateRefreshResult::FamilyRevoked) => Err(RefreshFailure::Revoked),
            Ok(RotateRefreshResult::Unknown) | Err(_) => Err(RefreshFailure::Unknown),
        }
    }

    pub async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<(), IdentityError> {
        self.repository.revoke_family(family_id, reason).await
    }

    pub async fn list_active_families(&self, user_id: Uuid) -> Result<Vec<TokenFamily>, IdentityError> {
        self.repository.list_active_families(user_id).await
    }

    pub async fn revoke_all_families(&self, user_id: Uuid, reason: &str) -> Result<u64, IdentityError> {
        self.repository.revoke_all_families(user_id, reason).await
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::domain::NewUser;
    use crate::repository::{
        AttributeChange, CreateUserResult, ProfileFieldUpdates, UpdateBatchResult,
        UserFieldUpdates,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeRepo {
        families: Mutex<HashMap<Uuid, TokenFamily>>,
        records: Mutex<HashMap<String, crate::domain::RefreshTokenRecord>>,
    }

    #[async_trait]
    impl Repository for FakeRepo {
        async fn create_user(&self, _new_user: NewUser) -> Result<CreateUserResult, IdentityError> {
            unimplemented!()
        }
        async fn find_full_by_id(
            &self,
            _user_id: Uuid,
        ) -> Result<Option<crate::domain::FullUser>, IdentityError> {
            unimplemented!()
        }
        async fn find_by_email(
            &self,
            _realm: &str,
            _email: &str,
        ) -> Result<Option<crate::domain::User>, IdentityError> {
            unimplemented!()
        }
        async fn find_by_phone(
            &self,
            _realm: &str,
            _phone: &str,
        ) -> Result<Option<crate::domain::User>, IdentityError> {
            unimplemented!()
        }
        async fn update_batch(
            &self,
            _user_id: Uuid,
            _user_updates: UserFieldUpdates,
            _profile_updates: ProfileFieldUpdates,
            _attribute_changes: Vec<AttributeChange>,
            _now: DateTime<Utc>,
        ) -> Result<UpdateBatchResult, IdentityError> {
            unimplemented!()
        }
        async fn delete_user(&self, _user_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn record_failed_login(
            &self,
            _user_id: Uuid,
            _ip: Option<&str>,
            _user_agent: Option<&str>,
            _now: DateTime<Utc>,
        ) -> Result<i32, IdentityError> {
            unimplemented!()
        }
        async fn reset_failed_logins(&self, _user_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn lock_user(
            &self,
            _user_id: Uuid,
            _until: DateTime<Utc>,
            _reason: &str,
        ) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn update_last_logged_in(
            &self,
            _user_id: Uuid,
            _now: DateTime<Utc>,
        ) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn update_password_hash(&self, _user_id: Uuid, _hash: &str) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn assign_role(&self, _user_id: Uuid, _role_name: &str) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn unassign_all_roles(&self, _user_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn seed_role(&self, _role: crate::domain::Role) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn insert_refresh_family(
            &self,
            family_id: Uuid,
            user_id: Uuid,
            realm: &str,
            token_hash: &str,
            now: DateTime<Utc>,
            expires_at: DateTime<Utc>,
        ) -> Result<(), IdentityError> {
            self.families.lock().insert(
                family_id,
                TokenFamily {
                    id: family_id,
                    user_id,
                    realm: realm.to_string(),
                    created_at: now,
                    revoked_at: None,
                    revoked_reason: None,
                },
            );
            self.records.lock().insert(
                token_hash.to_string(),
                crate::domain::RefreshTokenRecord {
                    token_hash: token_hash.to_string(),
                    family_id,
                    user_id,
                    created_at: now,
                    expires_at,
                    consumed_at: None,
                    revoked_at: None,
                },
            );
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
            let mut records = self.records.lock();
            let old = records.get(old_token_hash).cloned();
            match old {
                Some(old_record) if old_record.consumed_at.is_none() => {
                    let mut consumed = old_record.clone();
                    consumed.consumed_at = Some(now);
                    records.insert(old_token_hash.to_string(), consumed);
                    records.insert(
                        new_token_hash.to_string(),
                        crate::domain::RefreshTokenRecord {
                            token_hash: new_token_hash.to_string(),
                            family_id,
                            user_id: old_record.user_id,
                            created_at: now,
                            expires_at,
                            consumed_at: None,
                            revoked_at: None,
                        },
                    );
                    Ok(RotateRefreshResult::Ok(records[new_token_hash].clone()))
                }
                _ => Ok(RotateRefreshResult::Unknown),
            }
        }
        async fn find_family(&self, family_id: Uuid) -> Result<Option<TokenFamily>, IdentityError> {
            Ok(self.families.lock().get(&family_id).cloned())
        }
        async fn find_refresh_record(
            &self,
            token_hash: &str,
        ) -> Result<Option<crate::domain::RefreshTokenRecord>, IdentityError> {
            Ok(self.records.lock().get(token_hash).cloned())
        }
        async fn revoke_family(&self, family_id: Uuid, reason: &str) -> Result<(), IdentityError> {
            if let Some(family) = self.families.lock().get_mut(&family_id) {
                family.revoked_at = Some(Utc::now());
                family.revoked_reason = Some(reason.to_string());
            }
            Ok(())
        }
        async fn revoke_all_families(&self, _user_id: Uuid, _reason: &str) -> Result<u64, IdentityError> {
            unimplemented!()
        }
        async fn list_active_families(&self, _user_id: Uuid) -> Result<Vec<TokenFamily>, IdentityError> {
            unimplemented!()
        }
        async fn insert_method(&self, _method: crate::domain::MfaMethod) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn set_primary(&self, _user_id: Uuid, _method_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn remove_method(&self, _user_id: Uuid, _method_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn list_methods(&self, _user_id: Uuid) -> Result<Vec<crate::domain::MfaMethod>, IdentityError> {
            unimplemented!()
        }
        async fn find_method(&self, _method_id: Uuid) -> Result<Option<crate::domain::MfaMethod>, IdentityError> {
            unimplemented!()
        }
        async fn count_methods_of_type(
            &self,
            _user_id: Uuid,
            _method_type: crate::domain::MfaMethodType,
        ) -> Result<i64, IdentityError> {
            unimplemented!()
        }
        async fn insert_challenge(&self, _challenge: crate::domain::MfaChallenge) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn find_challenge(
            &self,
            _challenge_id: Uuid,
        ) -> Result<Option<crate::domain::MfaChallenge>, IdentityError> {
            unimplemented!()
        }
        async fn consume_challenge(&self, _challenge_id: Uuid, _now: DateTime<Utc>) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn expire_challenge(&self, _challenge_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn increment_attempts(&self, _challenge_id: Uuid) -> Result<i32, IdentityError> {
            unimplemented!()
        }
        async fn mark_challenge_status(
            &self,
            _challenge_id: Uuid,
            _status: crate::domain::ChallengeStatus,
        ) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn insert_backup_codes(&self, _codes: Vec<crate::domain::BackupCode>) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn delete_backup_codes(&self, _user_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn mark_backup_code_used(
            &self,
            _user_id: Uuid,
            _code_hash: &str,
            _now: DateTime<Utc>,
        ) -> Result<bool, IdentityError> {
            unimplemented!()
        }
        async fn list_backup_codes(&self, _user_id: Uuid) -> Result<Vec<crate::domain::BackupCode>, IdentityError> {
            unimplemented!()
        }
        async fn insert_trusted_device(&self, _device: crate::domain::TrustedDevice) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn list_trusted_devices(
            &self,
            _user_id: Uuid,
        ) -> Result<Vec<crate::domain::TrustedDevice>, IdentityError> {
            unimplemented!()
        }
        async fn find_trusted_device(
            &self,
            _user_id: Uuid,
            _ip_hash: &str,
            _ua_hash: &str,
        ) -> Result<Option<crate::domain::TrustedDevice>, IdentityError> {
            unimplemented!()
        }
        async fn remove_trusted_device(&self, _user_id: Uuid, _device_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn remove_all_trusted_devices(&self, _user_id: Uuid) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn touch_trusted_device(&self, _device_id: Uuid, _now: DateTime<Utc>) -> Result<(), IdentityError> {
            unimplemented!()
        }
        async fn count_users(&self, _realm: &str) -> Result<i64, IdentityError> {
            unimplemented!()
        }
        async fn count_users_with_any_mfa(&self, _realm: &str) -> Result<i64, IdentityError> {
            unimplemented!()
        }
        async fn count_methods_by_type(
            &self,
            _realm: &str,
        ) -> Result<HashMap<crate::domain::MfaMethodType, i64>, IdentityError> {
            unimplemented!()
        }
        async fn count_trusted_devices(&self, _realm: &str) -> Result<i64, IdentityError> {
            unimplemented!()
        }
    }

    fn service(repo: Arc<FakeRepo>, clock: Arc<dyn Clock>) -> TokenService {
        TokenService::new(
            repo,
            clock,
            Arc::new(EventBus::new()),
            "realm-a".into(),
            "identity".into(),
            "identity-api".into(),
            b"test-secret-at-least-32-bytes-long!".to_vec(),
            TokenValidity::default(),
        )
    }

    #[tokio::test]
    async fn issue_then_verify_round_trips() {
        let repo = Arc::new(FakeRepo::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let svc = service(repo, clock);
        let user_id = Uuid::new_v4();
        let pair = svc.issue(user_id, vec!["member".into()], None).await.unwrap();
        let principal = svc.verify(&pair.access_token).unwrap();
        assert_eq!(principal.user_id, user_id);
        assert_eq!(principal.realm, "realm-a");
    }

    #[tokio::test]
    async fn token_signed_for_different_realm_does_not_verify() {
        let repo = Arc::new(FakeRepo::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let svc_a = service(repo.clone(), clock.clone());
        let svc_b = TokenService::new(
            repo,
            clock,
            Arc::new(EventBus::new()),
            "realm-b".into(),
            "identity".into(),
            "identity-api".into(),
            b"test-secret-at-least-32-bytes-long!".to_vec(),
            TokenValidity::default(),
        );
        let pair = svc_a.issue(Uuid::new_v4(), vec![], None).await.unwrap();
        assert!(svc_b.verify(&pair.access_token).is_none());
    }

    #[tokio::test]
    async fn issue_and_refresh_publish_token_events() {
        use crate::event_bus::EventSubscriber;
        use async_trait::async_trait;

        struct Recorder(Mutex<Vec<&'static str>>);
        #[async_trait]
        impl EventSubscriber for Recorder {
            async fn handle(&self, event: &IdentityEvent) {
                self.0.lock().push(event.kind());
            }
        }

        let repo = Arc::new(FakeRepo::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(crate::domain::EventFilter::All, 0, recorder.clone());

        let svc = TokenService::new(
            repo,
            clock,
            bus,
            "realm-a".into(),
            "identity".into(),
            "identity-api".into(),
            b"test-secret-at-least-32-bytes-long!".to_vec(),
            TokenValidity::default(),
        );
        let first = svc.issue(Uuid::new_v4(), vec![], None).await.unwrap();
        svc.refresh(&first.refresh_token, vec![], None).await.unwrap();
        let replay = svc.refresh(&first.refresh_token, vec![], None).await;
        assert!(matches!(replay, Err(RefreshFailure::Replayed { .. })));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            recorder.0.lock().as_slice(),
            ["TokenIssued", "TokenRefreshed", "TokenReplayDetected"]
        );
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_replay() {
        let repo = Arc::new(FakeRepo::default());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let svc = service(repo, clock);
        let user_id = Uuid::new_v4();
        let first = svc.issue(user_id, vec![], None).await.unwrap();

        let second = svc
            .refresh(&first.refresh_token, vec![], None)
            .await
            .expect("first refresh should succeed");

        let replay = svc.refresh(&first.refresh_token, vec![], None).await;
        assert!(matches!(replay, Err(RefreshFailure::Replayed { .. })));

        let after_replay = svc.refresh(&second.refresh_token, vec![], None).await;
        assert!(after_replay.is_err(), "family should be revoked after replay");
    }
}
