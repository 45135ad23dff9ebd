//! # Domain Layer
//!
//! Entities mapped to persisted tables, the `FieldUpdate<T>` three-valued
//! update semantic, and the `IdentityEvent` enum this crate publishes. This
//! layer has no dependency on the repository, service, or web layers.

pub mod events;
pub mod mfa;
pub mod role;
pub mod token_family;
pub mod user;

pub use events::{EventFilter, FieldChange, IdentityEvent};
pub use mfa::{
    BackupCode, ChallengeStatus, MfaChallenge, MfaMethod, MfaMethodType, PasswordResetToken,
    TrustedDevice,
};
pub use role::Role;
pub use token_family::{DeviceContext, RefreshTokenRecord, TokenFamily};
pub use user::{FieldUpdate, FullUser, NewUser, User, UserProfile, UserStatus};
