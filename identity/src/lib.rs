//! # Identity Platform - Core Library
//!
//! Realm-scoped authentication, multi-factor authentication, and a hookable
//! extension pipeline, packaged as an embeddable library rather than a
//! standalone service. A host process owns the HTTP layer, the database
//! driver, the password-hashing primitive, and the outbound email/SMS
//! transport; this crate defines the contracts those collaborators must
//! satisfy and implements everything else.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Host application                     │
//! │   ┌───────────────────────────────────────────────────────┐ │
//! │   │  RealmRegistry::builder()                              │ │
//! │   │       .realm("tenant-a", RealmConfig { .. })           │ │
//! │   │       .build(pool)                                     │ │
//! │   │       .services_of("tenant-a")  -> Services             │ │
//! │   └───────────────────────────────────────────────────────┘ │
//! │              │            │            │          │         │
//! │              ▼            ▼            ▼          ▼         │
//! │         AuthService  TokenService  UserService  MfaEngine   │
//! │              └────────────┴────────────┴──────────┘         │
//! │                           │                                 │
//! │                     Repository (PgRepository)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`error`] | Unified domain error taxonomy | [`IdentityError`] |
//! | [`clock`] | Injectable time source | [`Clock`] |
//! | [`crypto`] | Password hashing, AES-GCM, TOTP, constant-time compare | [`crypto::PasswordHasher`] |
//! | [`domain`] | Entities, field-update semantics, events | [`domain::User`], [`domain::FieldUpdate`] |
//! | [`repository`] | Transactional persistence contract | [`repository::Repository`] |
//! | [`realm`] | Realm configuration and service composition | [`realm::RealmRegistry`], [`realm::Services`] |
//! | [`hooks`] | Typed lifecycle extension pipeline | [`hooks::HookExecutor`] |
//! | [`event_bus`] | Priority-ordered pub/sub for domain events | [`event_bus::EventBus`] |
//! | [`token`] | Bearer token issuance, verification, rotation | [`token::TokenService`] |
//! | [`auth`] | Login/logout/password-change orchestration | [`auth::AuthService`] |
//! | [`user_service`] | User CRUD with change-tracked updates | [`user_service::UserService`] |
//! | [`mfa`] | Enrollment, challenges, backup codes, trusted devices | [`mfa::MfaEngine`] |
//! | [`transport`] | Outbound email/SMS collaborator contract | [`transport::Sender`] |
//! | [`validation`] | `validator`-backed input validation, mapped into [`IdentityError`] | [`validation::validate`] |
//!
//! `identity::IdentityError` does not reuse `shared::ApiError` - see that
//! crate's module docs for why the two stay separate.

pub mod auth;
pub mod clock;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod hooks;
pub mod mfa;
pub mod realm;
pub mod repository;
pub mod token;
pub mod transport;
pub mod user_service;
pub mod validation;

pub use clock::Clock;
pub use error::{IdentityError, IdentityResult};
pub use realm::{RealmConfig, RealmRegistry, Services};
