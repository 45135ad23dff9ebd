//! # AES-256-GCM Symmetric Encryption
//!
//! Used to encrypt TOTP secrets at rest. Keys are always 32 bytes; a random
//! 96-bit nonce is generated per call and prepended to the ciphertext+tag,
//! so `decrypt` only needs the key and the combined blob `encrypt` returned.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
    #[error("key must be exactly 32 bytes")]
    InvalidKeyLength,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    AuthenticationFailed,
}

/// Encrypts `plaintext` with AES-256-GCM under `key_bytes` (must be exactly
/// 32 bytes). Returns `nonce || ciphertext || tag`.
pub fn encrypt(key_bytes: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if key_bytes.len() != 32 {
        return Err(DecryptError::InvalidKeyLength);
    }
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| DecryptError::AuthenticationFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`encrypt`]. Fails closed: any tampering,
/// wrong key, or truncation returns [`DecryptError`], never partial output.
pub fn decrypt(key_bytes: &[u8], blob: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if key_bytes.len() != 32 {
        return Err(DecryptError::InvalidKeyLength);
    }
    if blob.len() < NONCE_LEN {
        return Err(DecryptError::Truncated);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let key = Key::<Aes256Gcm>::from_slice(key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| DecryptError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn encrypt_then_decrypt_roundtrips() {
        let key = test_key();
        let plaintext = b"totp-seed-bytes-here";
        let ciphertext = encrypt(&key, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let decrypted = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let key = test_key();
        let mut ciphertext = encrypt(&key, b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(matches!(
            decrypt(&key, &ciphertext),
            Err(DecryptError::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let key_a = [1u8; 32];
        let key_b = [2u8; 32];
        let ciphertext = encrypt(&key_a, b"secret").unwrap();
        assert!(matches!(
            decrypt(&key_b, &ciphertext),
            Err(DecryptError::AuthenticationFailed)
        ));
    }

    #[test]
    fn rejects_non_32_byte_keys() {
        assert!(matches!(
            encrypt(&[0u8; 16], b"x"),
            Err(DecryptError::InvalidKeyLength)
        ));
    }

    #[test]
    fn nonces_differ_across_calls() {
        let key = test_key();
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(&a[..12], &b[..12], "nonces must not repeat");
    }
}
