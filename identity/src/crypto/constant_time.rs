//! Constant-time byte comparison, used anywhere an attacker could otherwise
//! learn information from early-exit timing (token hash compare, OTP code
//! compare, backup-code compare).

use subtle::ConstantTimeEq;

/// Compares `a` and `b` without short-circuiting on the first mismatch.
/// Unequal lengths are treated as unequal without leaking which byte
/// differed, but comparing the length itself is not hidden - only content.
pub fn constant_time_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_slices_match() {
        assert!(constant_time_equal(b"same-bytes", b"same-bytes"));
    }

    #[test]
    fn differing_slices_do_not_match() {
        assert!(!constant_time_equal(b"abcdef", b"abcxyz"));
    }

    #[test]
    fn differing_lengths_do_not_match() {
        assert!(!constant_time_equal(b"short", b"much longer input"));
    }
}
