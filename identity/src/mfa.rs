//! # MFA Engine
//!
//! Enrollment, challenge/verification, backup codes, trusted devices, admin
//! operations, and adoption statistics - the largest single component
//! (spec.md §2: 25% share). Every `now()` read goes through the injected
//! [`Clock`](crate::clock::Clock) and every dispatch goes through
//! [`Sender`](crate::transport::Sender) so the engine is fully unit-testable
//! without a live transport or wall clock (spec.md §1.2).

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::crypto::{constant_time_equal, decrypt, encrypt, generate_totp, render_totp_qr, verify_totp as crypto_verify_totp};
use crate::domain::{BackupCode, ChallengeStatus, IdentityEvent, MfaChallenge, MfaMethod, MfaMethodType, TrustedDevice};
use crate::event_bus::EventBus;
use crate::realm::{RoleChecker, TotalUsersProvider};
use crate::repository::Repository;
use crate::transport::Sender;
use crate::IdentityError;

const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone)]
pub struct BackupCodeConfig {
    pub code_count: usize,
    pub code_length: usize,
}

impl Default for BackupCodeConfig {
    fn default() -> Self {
        Self {
            code_count: 10,
            code_length: 8,
        }
    }
}

/// Result of a completed enrollment or post-enrollment verification: the
/// plaintext backup codes, disclosed exactly once.
#[derive(Debug, Clone)]
pub struct EnrollmentSuccess {
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub method_id: Uuid,
    pub secret_base32: String,
    pub qr_data_uri: String,
    pub issuer: String,
    pub account: String,
}

#[derive(Debug, Clone)]
pub struct MfaStatistics {
    pub total_users: i64,
    pub users_with_mfa: i64,
    pub adoption_rate: f64,
    pub method_distribution: HashMap<MfaMethodType, i64>,
    pub trusted_devices: i64,
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_numeric_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.next_u32() % 1_000_000)
}

fn generate_backup_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| *BACKUP_CODE_ALPHABET.choose(&mut rng).expect("alphabet non-empty") as char)
        .collect()
}

/// Process-local rate limiter keyed by `(user, ip, channel)`, per spec.md
/// §3.1 - persisted state was explicitly out of scope (Non-goal: no
/// distributed consensus across replicas).
struct RateLimiter {
    attempts: parking_lot::Mutex<HashMap<(Uuid, String, String), Vec<DateTime<Utc>>>>,
    last_sent: parking_lot::Mutex<HashMap<(Uuid, String, String), DateTime<Utc>>>,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            attempts: parking_lot::Mutex::new(HashMap::new()),
            last_sent: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn key(user_id: Uuid, ip: Option<&str>, channel: &str) -> (Uuid, String, String) {
        (user_id, ip.unwrap_or("").to_string(), channel.to_string())
    }

    /// Returns `Err` if this `(user, ip, channel)` has already made
    /// `max_attempts` within `window` ending at `now`; otherwise records the
    /// attempt and returns `Ok`.
    fn check_and_record(
        &self,
        user_id: Uuid,
        ip: Option<&str>,
        channel: &str,
        now: DateTime<Utc>,
        window: Duration,
        max_attempts: u32,
    ) -> Result<(), IdentityError> {
        let key = Self::key(user_id, ip, channel);
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(key).or_default();
        entry.retain(|t| now - *t < window);
        if entry.len() as u32 >= max_attempts {
            return Err(IdentityError::RateLimitExceeded {
                reason: format!("more than {max_attempts} attempts in {window}"),
                retry_after_seconds: window.num_seconds().max(0) as u64,
            });
        }
        entry.push(now);
        Ok(())
    }

    fn check_cooldown(
        &self,
        user_id: Uuid,
        ip: Option<&str>,
        channel: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<(), IdentityError> {
        let key = Self::key(user_id, ip, channel);
        let mut last_sent = self.last_sent.lock();
        if let Some(last) = last_sent.get(&key) {
            let elapsed = now - *last;
            if elapsed < cooldown {
                let retry_after = (cooldown - elapsed).num_seconds().max(0) as u64;
                return Err(IdentityError::Cooldown {
                    reason: "resend requested before cooldown elapsed".into(),
                    retry_after_seconds: retry_after,
                });
            }
        }
        last_sent.insert(key, now);
        Ok(())
    }
}

pub struct MfaEngine {
    repository: Arc<dyn Repository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn Sender>,
    role_checker: Arc<dyn RoleChecker>,
    total_users: Arc<dyn TotalUsersProvider>,
    realm: String,
    config: crate::realm::MfaConfig,
    rate_limiter: RateLimiter,
    /// TOTP methods mid-enrollment, keyed by `method_id`. Holds the
    /// encrypted secret in process memory only - nothing is written to
    /// `mfa_methods` until `verify_totp_enrollment` succeeds, so an
    /// abandoned enrollment never appears in `list_methods` or becomes
    /// usable by `verify_totp` (spec.md §3, §4.I).
    pending_totp: parking_lot::Mutex<HashMap<Uuid, MfaMethod>>,
}

impl MfaEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn Repository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn Sender>,
        role_checker: Arc<dyn RoleChecker>,
        total_users: Arc<dyn TotalUsersProvider>,
        realm: String,
        config: crate::realm::MfaConfig,
    ) -> Self {
        Self {
            repository,
            event_bus,
            clock,
            sender,
            role_checker,
            total_users,
            realm,
            config,
            rate_limiter: RateLimiter::new(),
            pending_totp: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn publish(&self, event: IdentityEvent) {
        self.event_bus.publish(event);
    }

    // -----------------------------------------------------------------
    // Email enrollment
    // -----------------------------------------------------------------

    pub async fn enroll_email(
        &self,
        user_id: Uuid,
        email: &str,
        ip: Option<&str>,
    ) -> Result<Uuid, IdentityError> {
        let now = self.clock.now();
        self.rate_limiter.check_and_record(
            user_id,
            ip,
            "EMAIL",
            now,
            self.config.enroll_window,
            self.config.enroll_attempts_per_window,
        )?;
        self.rate_limiter
            .check_cooldown(user_id, ip, "EMAIL", now, self.config.resend_cooldown)?;

        let code = generate_numeric_code();
        let challenge_id = Uuid::new_v4();
        let challenge = MfaChallenge {
            id: challenge_id,
            user_id,
            method_id: None,
            code_hash: sha256_hex(&code),
            attempts: 0,
            created_at: now,
            expires_at: now + self.config.challenge_ttl,
            consumed_at: None,
            status: ChallengeStatus::Pending,
        };
        self.repository.insert_challenge(challenge).await?;

        self.sender
            .send(email, "Your verification code", &code)
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        Ok(challenge_id)
    }

    pub async fn verify_email_enrollment(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
        code: &str,
        email: &str,
    ) -> Result<EnrollmentSuccess, IdentityError> {
        self.verify_enrollment_challenge(user_id, challenge_id, code).await?;

        let existing = self.repository.list_methods(user_id).await?;
        let is_primary = existing.is_empty();

        let method = MfaMethod {
            id: Uuid::new_v4(),
            user_id,
            method_type: MfaMethodType::Email,
            identifier: email.to_string(),
            encrypted_secret: None,
            is_primary,
            created_at: self.clock.now(),
        };
        self.repository.insert_method(method).await?;

        let backup_codes = self.generate_backup_codes(user_id).await?;

        self.publish(IdentityEvent::MfaEnrolled {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            method_type: MfaMethodType::Email,
        });

        Ok(EnrollmentSuccess { backup_codes })
    }

    async fn verify_enrollment_challenge(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<(), IdentityError> {
        let challenge = self
            .repository
            .find_challenge(challenge_id)
            .await?
            .ok_or_else(|| IdentityError::Invalid {
                reason: "challenge".into(),
            })?;

        if challenge.user_id != user_id {
            return Err(IdentityError::Invalid {
                reason: "challenge".into(),
            });
        }

        let now = self.clock.now();
        if challenge.status == ChallengeStatus::Consumed {
            return Err(IdentityError::Invalid {
                reason: "challenge already consumed".into(),
            });
        }
        if challenge.expires_at < now || challenge.status == ChallengeStatus::Expired {
            self.repository.expire_challenge(challenge_id).await?;
            return Err(IdentityError::Expired {
                reason: "challenge expired".into(),
            });
        }
        if challenge.attempts >= self.config.max_challenge_attempts {
            return Err(IdentityError::RateLimitExceeded {
                reason: "too many verification attempts".into(),
                retry_after_seconds: 0,
            });
        }

        if !constant_time_equal(sha256_hex(code).as_bytes(), challenge.code_hash.as_bytes()) {
            self.repository.increment_attempts(challenge_id).await?;
            return Err(IdentityError::Invalid {
                reason: "code mismatch".into(),
            });
        }

        self.repository.consume_challenge(challenge_id, now).await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // TOTP enrollment
    // -----------------------------------------------------------------

    pub async fn enroll_totp(&self, user_id: Uuid, account_name: &str) -> Result<TotpEnrollment, IdentityError> {
        let mut secret_bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        let secret_base32 = base32_encode(&secret_bytes);

        let encrypted_secret = encrypt(&self.config.encryption_key, &secret_bytes)
            .map_err(|e| IdentityError::Unknown(format!("totp secret encryption failed: {e}")))?;

        let method_id = Uuid::new_v4();
        let method = MfaMethod {
            id: method_id,
            user_id,
            method_type: MfaMethodType::Totp,
            identifier: account_name.to_string(),
            encrypted_secret: Some(encrypted_secret),
            is_primary: false,
            created_at: self.clock.now(),
        };
        self.pending_totp.lock().insert(method_id, method);

        let qr_data_uri = render_totp_qr(&self.config.totp_issuer, account_name, &secret_base32)
            .map_err(IdentityError::Unknown)?;

        Ok(TotpEnrollment {
            method_id,
            secret_base32,
            qr_data_uri,
            issuer: self.config.totp_issuer.clone(),
            account: account_name.to_string(),
        })
    }

    pub async fn verify_totp_enrollment(
        &self,
        user_id: Uuid,
        method_id: Uuid,
        code: &str,
    ) -> Result<EnrollmentSuccess, IdentityError> {
        let method = self
            .pending_totp
            .lock()
            .get(&method_id)
            .cloned()
            .ok_or_else(|| IdentityError::Invalid {
                reason: "method".into(),
            })?;
        if method.user_id != user_id || method.method_type != MfaMethodType::Totp {
            return Err(IdentityError::Invalid {
                reason: "method".into(),
            });
        }

        let encrypted = method
            .encrypted_secret
            .as_ref()
            .ok_or_else(|| IdentityError::Invalid {
                reason: "method has no secret".into(),
            })?;
        let secret = decrypt(&self.config.encryption_key, encrypted)
            .map_err(|e| IdentityError::Unknown(e.to_string()))?;

        let now_unix = self.clock.now().timestamp() as u64;
        if !crypto_verify_totp(&secret, code, now_unix, 1) {
            return Err(IdentityError::Invalid {
                reason: "code mismatch".into(),
            });
        }

        self.repository.insert_method(method).await?;
        self.pending_totp.lock().remove(&method_id);

        let existing = self.repository.list_methods(user_id).await?;
        let is_primary = existing
            .iter()
            .filter(|m| m.id != method_id)
            .all(|m| !m.is_primary);
        if is_primary {
            self.repository.set_primary(user_id, method_id).await?;
        }

        let backup_codes = self.generate_backup_codes(user_id).await?;

        self.publish(IdentityEvent::MfaEnrolled {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            method_type: MfaMethodType::Totp,
        });

        Ok(EnrollmentSuccess { backup_codes })
    }

    // -----------------------------------------------------------------
    // Post-enrollment challenge / verify
    // -----------------------------------------------------------------

    pub async fn challenge_email(
        &self,
        user_id: Uuid,
        method_id: Uuid,
        ip: Option<&str>,
    ) -> Result<Uuid, IdentityError> {
        let method = self
            .repository
            .find_method(method_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        if method.user_id != user_id {
            return Err(IdentityError::UserNotFound);
        }

        let now = self.clock.now();
        self.rate_limiter.check_and_record(
            user_id,
            ip,
            "EMAIL",
            now,
            self.config.enroll_window,
            self.config.enroll_attempts_per_window,
        )?;
        self.rate_limiter
            .check_cooldown(user_id, ip, "EMAIL", now, self.config.resend_cooldown)?;

        let code = generate_numeric_code();
        let challenge_id = Uuid::new_v4();
        self.repository
            .insert_challenge(MfaChallenge {
                id: challenge_id,
                user_id,
                method_id: Some(method_id),
                code_hash: sha256_hex(&code),
                attempts: 0,
                created_at: now,
                expires_at: now + self.config.challenge_ttl,
                consumed_at: None,
                status: ChallengeStatus::Pending,
            })
            .await?;

        self.sender
            .send(&method.identifier, "Your verification code", &code)
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        self.publish(IdentityEvent::MfaChallengeIssued {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: now,
            user_id,
            challenge_id,
        });

        Ok(challenge_id)
    }

    pub async fn verify_challenge(
        &self,
        user_id: Uuid,
        challenge_id: Uuid,
        code: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), IdentityError> {
        self.verify_enrollment_challenge(user_id, challenge_id, code).await?;
        self.maybe_auto_trust(user_id, ip, user_agent).await;
        self.publish(IdentityEvent::MfaVerified {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            method_type: MfaMethodType::Email,
        });
        Ok(())
    }

    /// Stateless verification: the 30s code window is itself the challenge,
    /// so there is no challenge row - only a fast rate-limit counter
    /// (spec.md §4.I: "≤ 10 attempts / 5 min").
    pub async fn verify_totp(
        &self,
        user_id: Uuid,
        method_id: Uuid,
        code: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<(), IdentityError> {
        let now = self.clock.now();
        self.rate_limiter
            .check_and_record(user_id, ip, "TOTP", now, Duration::minutes(5), 10)?;

        let method = self
            .repository
            .find_method(method_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;
        if method.user_id != user_id || method.method_type != MfaMethodType::Totp {
            return Err(IdentityError::Invalid {
                reason: "method".into(),
            });
        }
        let encrypted = method
            .encrypted_secret
            .as_ref()
            .ok_or_else(|| IdentityError::Invalid {
                reason: "method has no secret".into(),
            })?;
        let secret = decrypt(&self.config.encryption_key, encrypted)
            .map_err(|e| IdentityError::Unknown(e.to_string()))?;

        if !crypto_verify_totp(&secret, code, now.timestamp() as u64, 1) {
            return Err(IdentityError::Invalid {
                reason: "code mismatch".into(),
            });
        }

        self.maybe_auto_trust(user_id, ip, user_agent).await;
        self.publish(IdentityEvent::MfaVerified {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: now,
            user_id,
            method_type: MfaMethodType::Totp,
        });
        Ok(())
    }

    async fn maybe_auto_trust(&self, user_id: Uuid, ip: Option<&str>, user_agent: Option<&str>) {
        if !self.config.auto_trust_device_after_verification {
            return;
        }
        if let (Some(ip), Some(ua)) = (ip, user_agent) {
            let _ = self.trust_device(user_id, ip, ua, None).await;
        }
    }

    // -----------------------------------------------------------------
    // Backup codes
    // -----------------------------------------------------------------

    /// Deletes all existing codes (used or not) and stores a fresh set -
    /// the regeneration contract: old codes are immediately invalid
    /// (spec.md §4.I).
    pub async fn generate_backup_codes(&self, user_id: Uuid) -> Result<Vec<String>, IdentityError> {
        self.repository.delete_backup_codes(user_id).await?;

        let mut plaintext_codes = Vec::with_capacity(self.config.backup_codes.code_count);
        let mut records = Vec::with_capacity(self.config.backup_codes.code_count);
        for _ in 0..self.config.backup_codes.code_count {
            let code = generate_backup_code(self.config.backup_codes.code_length);
            records.push(BackupCode {
                id: Uuid::new_v4(),
                user_id,
                code_hash: sha256_hex(&code),
                used_at: None,
            });
            plaintext_codes.push(code);
        }
        self.repository.insert_backup_codes(records).await?;

        self.publish(IdentityEvent::BackupCodesRegenerated {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
            code_count: plaintext_codes.len(),
        });

        Ok(plaintext_codes)
    }

    /// A code can only ever be spent once, even under concurrent attempts -
    /// the repository's CAS `WHERE used_at IS NULL` update is what actually
    /// enforces this; this method just picks the matching hash.
    pub async fn verify_backup_code(&self, user_id: Uuid, code: &str) -> Result<(), IdentityError> {
        let hash = sha256_hex(code);
        let candidates = self.repository.list_backup_codes(user_id).await?;
        let matches = candidates
            .iter()
            .any(|c| c.used_at.is_none() && constant_time_equal(c.code_hash.as_bytes(), hash.as_bytes()));
        if !matches {
            return Err(IdentityError::Invalid {
                reason: "backup code".into(),
            });
        }
        let now = self.clock.now();
        let spent = self.repository.mark_backup_code_used(user_id, &hash, now).await?;
        if !spent {
            return Err(IdentityError::Invalid {
                reason: "backup code already used".into(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Trusted devices
    // -----------------------------------------------------------------

    pub async fn trust_device(
        &self,
        user_id: Uuid,
        ip: &str,
        user_agent: &str,
        name: Option<String>,
    ) -> Result<Uuid, IdentityError> {
        let now = self.clock.now();
        let device_id = Uuid::new_v4();
        self.repository
            .insert_trusted_device(TrustedDevice {
                id: device_id,
                user_id,
                ip_hash: sha256_hex(ip),
                ua_hash: sha256_hex(user_agent),
                name,
                created_at: now,
                last_used_at: now,
                expires_at: Some(now + self.config.trust_ttl),
            })
            .await?;

        self.publish(IdentityEvent::DeviceTrusted {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: now,
            user_id,
            device_id,
        });

        Ok(device_id)
    }

    pub async fn is_device_trusted(&self, user_id: Uuid, ip: &str, user_agent: &str) -> Result<bool, IdentityError> {
        let now = self.clock.now();
        match self
            .repository
            .find_trusted_device(user_id, &sha256_hex(ip), &sha256_hex(user_agent))
            .await?
        {
            Some(device) if device.is_active(now) => {
                self.repository.touch_trusted_device(device.id, now).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn remove_trusted_device(&self, user_id: Uuid, device_id: Uuid) -> Result<(), IdentityError> {
        self.repository.remove_trusted_device(user_id, device_id).await
    }

    pub async fn remove_all_trusted_devices(&self, user_id: Uuid) -> Result<(), IdentityError> {
        self.repository.remove_all_trusted_devices(user_id).await
    }

    // -----------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------

    async fn require_admin(&self, admin_id: Uuid) -> Result<(), IdentityError> {
        if self.role_checker.user_has_role(admin_id, "admin").await? {
            Ok(())
        } else {
            Err(IdentityError::InsufficientPermissions)
        }
    }

    pub async fn force_remove_mfa_method(
        &self,
        admin_id: Uuid,
        target_id: Uuid,
        method_id: Uuid,
    ) -> Result<(), IdentityError> {
        self.require_admin(admin_id).await?;
        self.repository.remove_method(target_id, method_id).await?;
        tracing::info!(admin_id = %admin_id, target_id = %target_id, method_id = %method_id, "admin removed mfa method");
        Ok(())
    }

    pub async fn disable_mfa_for_user(&self, admin_id: Uuid, target_id: Uuid) -> Result<(), IdentityError> {
        self.require_admin(admin_id).await?;
        let methods = self.repository.list_methods(target_id).await?;
        for method in methods {
            self.repository.remove_method(target_id, method.id).await?;
        }
        self.repository.remove_all_trusted_devices(target_id).await?;
        self.repository.delete_backup_codes(target_id).await?;
        tracing::info!(admin_id = %admin_id, target_id = %target_id, "admin disabled mfa for user");
        Ok(())
    }

    pub async fn list_user_methods(&self, admin_id: Uuid, target_id: Uuid) -> Result<Vec<MfaMethod>, IdentityError> {
        self.require_admin(admin_id).await?;
        self.repository.list_methods(target_id).await
    }

    // -----------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------

    pub async fn get_mfa_statistics(&self) -> Result<MfaStatistics, IdentityError> {
        let total_users = self.total_users.total_users().await?;
        let users_with_mfa = self.repository.count_users_with_any_mfa(&self.realm).await?;
        let method_distribution = self.repository.count_methods_by_type(&self.realm).await?;
        let trusted_devices = self.repository.count_trusted_devices(&self.realm).await?;
        let adoption_rate = 100.0 * users_with_mfa as f64 / (total_users.max(1)) as f64;

        Ok(MfaStatistics {
            total_users,
            users_with_mfa,
            adoption_rate,
            method_distribution,
            trusted_devices,
        })
    }
}

/// RFC 4648 base32 (no padding), used for TOTP seed display.
fn base32_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut output = String::new();
    let mut buffer: u32 = 0;
    let mut bits_in_buffer = 0;
    for &byte in bytes {
        buffer = (buffer << 8) | byte as u32;
        bits_in_buffer += 8;
        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = (buffer >> bits_in_buffer) & 0x1F;
            output.push(ALPHABET[index as usize] as char);
        }
    }
    if bits_in_buffer > 0 {
        let index = (buffer << (5 - bits_in_buffer)) & 0x1F;
        output.push(ALPHABET[index as usize] as char);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_code_alphabet_excludes_ambiguous_characters() {
        for _ in 0..100 {
            let code = generate_backup_code(8);
            for c in code.chars() {
                assert!(!['I', 'O', '0', '1'].contains(&c), "ambiguous char in {code}");
            }
        }
    }

    #[test]
    fn base32_encode_matches_known_vector() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn rate_limiter_blocks_after_window_is_exhausted() {
        let limiter = RateLimiter::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..3 {
            limiter
                .check_and_record(user_id, Some("1.2.3.4"), "EMAIL", now, Duration::minutes(1), 3)
                .unwrap();
        }
        assert!(limiter
            .check_and_record(user_id, Some("1.2.3.4"), "EMAIL", now, Duration::minutes(1), 3)
            .is_err());
    }

    #[test]
    fn rate_limiter_window_resets_after_elapsed_time() {
        let limiter = RateLimiter::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..3 {
            limiter
                .check_and_record(user_id, None, "EMAIL", now, Duration::minutes(1), 3)
                .unwrap();
        }
        let later = now + Duration::minutes(2);
        assert!(limiter
            .check_and_record(user_id, None, "EMAIL", later, Duration::minutes(1), 3)
            .is_ok());
    }

    #[test]
    fn cooldown_rejects_immediate_resend() {
        let limiter = RateLimiter::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        limiter
            .check_cooldown(user_id, None, "EMAIL", now, Duration::seconds(30))
            .unwrap();
        assert!(limiter
            .check_cooldown(user_id, None, "EMAIL", now + Duration::seconds(5), Duration::seconds(30))
            .is_err());
        assert!(limiter
            .check_cooldown(user_id, None, "EMAIL", now + Duration::seconds(31), Duration::seconds(30))
            .is_ok());
    }
}
