//! # User Service
//!
//! Create/read/update/delete, profile and custom-attribute mutation, and
//! the update-command processor with change tracking (spec.md §4.H).
//! Grounded in the corpus's `auth_service.rs` register/profile flow, but
//! restructured around typed `FieldUpdate<T>` commands instead of
//! `Option<T>` DTOs, since `SetValue(None)` has no representable meaning.

use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::crypto::PasswordHasher;
use crate::domain::{FieldChange, FieldUpdate, FullUser, IdentityEvent, NewUser, UserProfile};
use crate::event_bus::EventBus;
use crate::hooks::{CustomAttributesUpdateData, HookExecutor, UserCreateData, UserProfileUpdateData, UserUpdateData};
use crate::repository::{
    AttributeChange, CreateUserResult, ProfileFieldUpdates, Repository, UpdateBatchResult, UserFieldUpdates,
};
use crate::IdentityError;

/// Result of a user-update command: a `Success` with an empty `changes`
/// vector is a valid, meaningful no-op (spec.md §4.H).
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn is_no_op(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateUserFields {
    pub email: FieldUpdate<String>,
    pub phone: FieldUpdate<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateProfileFields {
    pub first_name: FieldUpdate<String>,
    pub last_name: FieldUpdate<String>,
    pub address: FieldUpdate<String>,
    pub profile_picture: FieldUpdate<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAttributes {
    pub changes: Vec<AttributeChange>,
}

/// `create_user` input, pre-hook. Password is plaintext here; the service
/// hashes it after the `beforeUserCreate` chain runs.
#[derive(Debug, Clone, Validate)]
pub struct CreateUserCommand {
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    pub custom_attributes: HashMap<String, String>,
    pub profile: Option<UserProfile>,
}

pub struct UserService {
    repository: Arc<dyn Repository>,
    hooks: Arc<HookExecutor>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn PasswordHasher>,
    realm: String,
    owner_role: String,
}

impl UserService {
    pub fn new(
        repository: Arc<dyn Repository>,
        hooks: Arc<HookExecutor>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        hasher: Arc<dyn PasswordHasher>,
        realm: String,
        owner_role: String,
    ) -> Self {
        Self {
            repository,
            hooks,
            event_bus,
            clock,
            hasher,
            realm,
            owner_role,
        }
    }

    /// Runs the `beforeUserCreate` fold chain, hashes the password,
    /// delegates to the repository, assigns the realm-owner role, and
    /// publishes `UserCreated` (spec.md §4.H expansion).
    pub async fn create_user(&self, command: CreateUserCommand) -> Result<FullUser, IdentityError> {
        crate::validation::validate(&command)?;

        let transformed = self
            .hooks
            .run_before_user_create(UserCreateData {
                email: command.email,
                phone: command.phone,
                password: command.password,
                custom_attributes: command.custom_attributes,
                profile: command.profile,
            })
            .await?;

        let password_hash = self.hasher.hash(&transformed.password)?;

        let new_user = NewUser {
            realm: self.realm.clone(),
            email: transformed.email,
            phone: transformed.phone,
            password_hash,
            roles: vec![self.owner_role.clone()],
            custom_attributes: transformed.custom_attributes,
            profile: transformed.profile,
        };

        let created = match self.repository.create_user(new_user).await? {
            CreateUserResult::Created(user) => user,
            CreateUserResult::EmailExists => return Err(IdentityError::EmailAlreadyExists),
            CreateUserResult::PhoneExists => return Err(IdentityError::PhoneAlreadyExists),
        };

        self.repository.assign_role(created.id, &self.owner_role).await?;

        let full_user = self
            .repository
            .find_full_by_id(created.id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        self.event_bus.publish(IdentityEvent::UserCreated {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id: created.id,
        });

        Ok(full_user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<FullUser, IdentityError> {
        self.repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }

    /// spec.md §4.H's update-command processor, applied to the `users` /
    /// `user_profiles` / `user_custom_attributes` fields in one batched
    /// repository call, with a `ChangeSet` computed by diffing the
    /// before/after snapshots.
    pub async fn update_user(
        &self,
        user_id: Uuid,
        user_fields: UpdateUserFields,
        profile_fields: UpdateProfileFields,
        attribute_changes: UpdateAttributes,
    ) -> Result<ChangeSet, IdentityError> {
        let before = self
            .repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        let user_update = self
            .hooks
            .run_before_user_update(UserUpdateData {
                user_id,
                email: user_fields.email,
                phone: user_fields.phone,
            })
            .await?;

        let profile_update = self
            .hooks
            .run_before_profile_update(UserProfileUpdateData {
                user_id,
                first_name: profile_fields.first_name,
                last_name: profile_fields.last_name,
                address: profile_fields.address,
                profile_picture: profile_fields.profile_picture,
            })
            .await?;

        // The hook signature transforms a full attribute map; only
        // `ReplaceAll` naturally carries one, so that's the only shape run
        // through `beforeCustomAttributesUpdate` - `Set`/`Remove` pass
        // through untouched.
        let mut attribute_changes = attribute_changes.changes;
        if let Some(position) = attribute_changes
            .iter()
            .position(|change| matches!(change, AttributeChange::ReplaceAll(_)))
        {
            if let AttributeChange::ReplaceAll(map) = attribute_changes[position].clone() {
                let transformed = self
                    .hooks
                    .run_before_custom_attributes_update(CustomAttributesUpdateData {
                        user_id,
                        attributes: map,
                    })
                    .await?;
                attribute_changes[position] = AttributeChange::ReplaceAll(transformed.attributes);
            }
        }

        let now = self.clock.now();
        let result = self
            .repository
            .update_batch(
                user_id,
                UserFieldUpdates {
                    email: user_update.email,
                    phone: user_update.phone,
                },
                ProfileFieldUpdates {
                    first_name: profile_update.first_name,
                    last_name: profile_update.last_name,
                    address: profile_update.address,
                    profile_picture: profile_update.profile_picture,
                },
                attribute_changes,
                now,
            )
            .await?;

        match result {
            UpdateBatchResult::Success => {}
            UpdateBatchResult::EmailExists => return Err(IdentityError::EmailAlreadyExists),
            UpdateBatchResult::PhoneExists => return Err(IdentityError::PhoneAlreadyExists),
            UpdateBatchResult::NotFound => return Err(IdentityError::UserNotFound),
        }

        let after = self
            .repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        let changes = diff_full_user(&before, &after);

        if !changes.is_empty() {
            self.event_bus.publish(IdentityEvent::UserUpdated {
                event_id: Uuid::new_v4(),
                realm: self.realm.clone(),
                occurred_at: now,
                user_id,
                changes: changes.clone(),
            });
        }

        Ok(ChangeSet { changes })
    }

    /// spec.md §1.2: revokes all refresh families, deletes MFA methods,
    /// backup codes, and trusted devices, unassigns all roles, then deletes
    /// the user row - all inside one transaction at the repository layer.
    /// `UserDeleted` is published only after that commit succeeds.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), IdentityError> {
        self.repository
            .find_full_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)?;

        self.repository.delete_user(user_id).await?;

        self.event_bus.publish(IdentityEvent::UserDeleted {
            event_id: Uuid::new_v4(),
            realm: self.realm.clone(),
            occurred_at: self.clock.now(),
            user_id,
        });
        Ok(())
    }
}

/// Diffs every top-level user field, every profile field (`profile.*`),
/// and every custom-attribute key (`customAttributes.*`), yielding only
/// entries that actually changed (spec.md §4.H step 4).
fn diff_full_user(before: &FullUser, after: &FullUser) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    push_if_changed(&mut changes, "email", &before.user.email, &after.user.email);
    push_if_changed(&mut changes, "phone", &before.user.phone, &after.user.phone);

    let before_profile = before.profile.clone().unwrap_or_default();
    let after_profile = after.profile.clone().unwrap_or_default();
    push_if_changed(&mut changes, "profile.firstName", &before_profile.first_name, &after_profile.first_name);
    push_if_changed(&mut changes, "profile.lastName", &before_profile.last_name, &after_profile.last_name);
    push_if_changed(&mut changes, "profile.address", &before_profile.address, &after_profile.address);
    push_if_changed(
        &mut changes,
        "profile.profilePicture",
        &before_profile.profile_picture,
        &after_profile.profile_picture,
    );

    let mut attribute_keys: std::collections::BTreeSet<&String> =
        before.custom_attributes.keys().collect();
    attribute_keys.extend(after.custom_attributes.keys());
    for key in attribute_keys {
        let old = before.custom_attributes.get(key).cloned();
        let new = after.custom_attributes.get(key).cloned();
        if old != new {
            changes.push(FieldChange {
                name: format!("customAttributes.{key}"),
                old,
                new,
            });
        }
    }

    changes
}

fn push_if_changed(changes: &mut Vec<FieldChange>, name: &str, old: &Option<String>, new: &Option<String>) {
    if old != new {
        changes.push(FieldChange {
            name: name.to_string(),
            old: old.clone(),
            new: new.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{User, UserStatus};
    use chrono::Utc;

    fn sample_command() -> CreateUserCommand {
        CreateUserCommand {
            email: Some("alice@example.com".into()),
            phone: None,
            password: "long-enough-password".into(),
            custom_attributes: HashMap::new(),
            profile: None,
        }
    }

    #[test]
    fn malformed_email_fails_validation() {
        let mut command = sample_command();
        command.email = Some("not-an-email".into());
        assert!(crate::validation::validate(&command).is_err());
    }

    #[test]
    fn short_password_fails_validation() {
        let mut command = sample_command();
        command.password = "short".into();
        assert!(crate::validation::validate(&command).is_err());
    }

    #[test]
    fn well_formed_command_passes_validation() {
        assert!(crate::validation::validate(&sample_command()).is_ok());
    }

    fn sample_user(email: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            realm: "realm-a".into(),
            email: email.map(str::to_string),
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

    fn full_user(email: Option<&str>, attrs: HashMap<String, String>) -> FullUser {
        FullUser {
            user: sample_user(email),
            profile: None,
            custom_attributes: attrs,
            roles: vec![],
        }
    }

    #[test]
    fn no_field_changes_yields_empty_changeset() {
        let user = full_user(Some("a@example.com"), HashMap::new());
        let changes = diff_full_user(&user, &user);
        assert!(changes.is_empty());
    }

    #[test]
    fn email_change_is_reported() {
        let before = full_user(Some("old@example.com"), HashMap::new());
        let mut after = before.clone();
        after.user.email = Some("new@example.com".into());
        let changes = diff_full_user(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "email");
    }

    #[test]
    fn attribute_diff_uses_prefixed_key() {
        let mut before_attrs = HashMap::new();
        before_attrs.insert("team".to_string(), "platform".to_string());
        let before = full_user(None, before_attrs);

        let mut after_attrs = HashMap::new();
        after_attrs.insert("team".to_string(), "infra".to_string());
        let after = full_user(None, after_attrs);

        let changes = diff_full_user(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].name, "customAttributes.team");
        assert_eq!(changes[0].old.as_deref(), Some("platform"));
        assert_eq!(changes[0].new.as_deref(), Some("infra"));
    }
}
