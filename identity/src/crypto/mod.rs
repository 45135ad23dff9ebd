//! # Crypto Primitives Adapter
//!
//! A narrow facade over password hashing, AES-256-GCM encryption, TOTP
//! generation/verification, and constant-time byte comparison. Password
//! hashing is pluggable ([`PasswordHasher`]) since the spec treats the
//! hashing primitive as an external collaborator; AES-GCM, TOTP, and
//! constant-time compare are not - their exact algorithms are mandated, so
//! they are free functions.

mod aead;
mod constant_time;
mod password;
mod totp;

pub use aead::{decrypt, encrypt, DecryptError};
pub use constant_time::constant_time_equal;
pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use totp::{generate_totp, render_totp_qr, verify_totp};
