//! # Time-based One-Time Passwords (RFC 6238)
//!
//! HMAC-SHA1, 30-second step, 6 digits - the standard authenticator-app
//! parameters. `totp-rs`'s own `qr` feature produces the `otpauth://totp/...`
//! QR code directly, so this module doesn't need a second QR-rendering
//! dependency.

use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;

fn totp_for(secret_bytes: &[u8], skew: u8, issuer: Option<String>, account: String) -> TOTP {
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        skew,
        STEP_SECONDS,
        secret_bytes.to_vec(),
        issuer,
        account,
    )
    .expect("totp secret must be non-empty and account name valid")
}

/// Generates the 6-digit code for the step containing `unix_time`.
pub fn generate_totp(secret_bytes: &[u8], unix_time: u64) -> String {
    totp_for(secret_bytes, 0, None, "identity".to_string()).generate(unix_time)
}

/// Verifies `code` against any step in `[t - drift_steps, t + drift_steps]`.
pub fn verify_totp(secret_bytes: &[u8], code: &str, unix_time: u64, drift_steps: u8) -> bool {
    totp_for(secret_bytes, drift_steps, None, "identity".to_string()).check(code, unix_time)
}

/// Renders `otpauth://totp/{issuer}:{account}?secret=...&issuer=...&algorithm=SHA1&digits=6&period=30`
/// as a PNG, returned as a `data:image/png;base64,...` URI.
pub fn render_totp_qr(issuer: &str, account: &str, base32_secret: &str) -> Result<String, String> {
    let secret_bytes = Secret::Encoded(base32_secret.to_string())
        .to_bytes()
        .map_err(|e| format!("invalid base32 secret: {e:?}"))?;

    let totp = TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        1,
        STEP_SECONDS,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| format!("invalid totp parameters: {e:?}"))?;

    let base64_png = totp
        .get_qr_base64()
        .map_err(|e| format!("qr rendering failed: {e}"))?;

    Ok(format!("data:image/png;base64,{base64_png}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Vec<u8> {
        b"0123456789ABCDEF0123456789ABCDEF".to_vec()
    }

    #[test]
    fn generate_is_deterministic_within_a_step() {
        let a = generate_totp(&secret(), 1_700_000_000);
        let b = generate_totp(&secret(), 1_700_000_001);
        assert_eq!(a, b, "same 30s step must produce the same code");
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn code_changes_across_steps() {
        let a = generate_totp(&secret(), 1_700_000_000);
        let b = generate_totp(&secret(), 1_700_000_031);
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_code_within_drift_window() {
        let now = 1_700_000_000u64;
        let code = generate_totp(&secret(), now);
        assert!(verify_totp(&secret(), &code, now + STEP_SECONDS, 1));
        assert!(!verify_totp(&secret(), &code, now + 5 * STEP_SECONDS, 1));
    }

    #[test]
    fn verify_rejects_wrong_code() {
        assert!(!verify_totp(&secret(), "000000", 1_700_000_000, 1));
    }

    #[test]
    fn render_totp_qr_produces_data_uri() {
        let base32 = "JBSWY3DPEHPK3PXP";
        let uri = render_totp_qr("TestApp", "alice@example.com", base32).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
