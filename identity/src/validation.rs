//! # Input Validation
//!
//! Thin adapter from the `validator` crate's [`ValidationErrors`] to this
//! crate's typed [`IdentityError`] variants, mirroring `shared::validation`'s
//! `validate_request` but mapping into the identity error taxonomy instead
//! of the host-facing [`shared::ApiError`].

use validator::{Validate, ValidationErrors};

use crate::error::IdentityError;

/// Validates `data` and, on failure, maps the first offending field into a
/// typed [`IdentityError`] - `email`/`phone` get their own variants (as
/// §1.1 expects callers to be able to match on), everything else falls
/// back to [`IdentityError::InvalidInput`].
pub fn validate<T: Validate>(data: &T) -> Result<(), IdentityError> {
    match data.validate() {
        Ok(()) => Ok(()),
        Err(errors) => Err(first_field_error(errors)),
    }
}

fn first_field_error(errors: ValidationErrors) -> IdentityError {
    let field_errors = errors.field_errors();
    let Some((field, violations)) = field_errors.iter().next() else {
        return IdentityError::ValidationFailed(errors.to_string());
    };

    let messages: Vec<String> = violations
        .iter()
        .map(|v| v.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| v.code.to_string()))
        .collect();

    match *field {
        "email" => IdentityError::InvalidEmail { value: String::new(), errors: messages },
        "phone" => IdentityError::InvalidPhone { value: String::new(), errors: messages },
        other => IdentityError::InvalidInput { field: other.to_string(), errors: messages },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::ValidationError;

    #[derive(Validate)]
    struct Sample {
        #[validate(email)]
        email: Option<String>,
        #[validate(length(min = 8, message = "too short"))]
        password: String,
    }

    #[test]
    fn valid_input_passes() {
        let sample = Sample { email: Some("a@example.com".into()), password: "longenough".into() };
        assert!(validate(&sample).is_ok());
    }

    #[test]
    fn invalid_email_maps_to_invalid_email_variant() {
        let sample = Sample { email: Some("not-an-email".into()), password: "longenough".into() };
        match validate(&sample) {
            Err(IdentityError::InvalidEmail { errors, .. }) => assert!(!errors.is_empty()),
            other => panic!("expected InvalidEmail, got {other:?}"),
        }
    }

    #[test]
    fn short_password_maps_to_invalid_input() {
        let sample = Sample { email: None, password: "short".into() };
        match validate(&sample) {
            Err(IdentityError::InvalidInput { field, errors }) => {
                assert_eq!(field, "password");
                assert_eq!(errors, vec!["too short".to_string()]);
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn validation_error_constructs_with_static_code() {
        let _ = ValidationError::new("custom_code");
    }
}
