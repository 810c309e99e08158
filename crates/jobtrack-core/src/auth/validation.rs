//! Client-side checks run before any credentials leave the process.

use crate::api::backend::{LoginRequest, RegisterRequest};
use crate::error::{FieldError, SessionError};

const MIN_PASSWORD_LENGTH: usize = 8;

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    let email = email.trim();
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
        return;
    }
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        errors.push(FieldError::new("email", "Enter a valid email address"));
    }
}

fn check_password_strength(password: &str, errors: &mut Vec<FieldError>) {
    let mut missing = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        missing.push("at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        missing.push("an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        missing.push("a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        missing.push("a digit");
    }
    if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
        missing.push("a symbol");
    }
    if !missing.is_empty() {
        errors.push(FieldError::new(
            "password",
            format!("Password needs {}", missing.join(", ")),
        ));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), SessionError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SessionError::ValidationFailed(errors))
    }
}

pub fn validate_login(request: &LoginRequest) -> Result<(), SessionError> {
    let mut errors = Vec::new();
    check_email(&request.email, &mut errors);
    if request.password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }
    finish(errors)
}

pub fn validate_registration(request: &RegisterRequest) -> Result<(), SessionError> {
    let mut errors = Vec::new();
    if request.name.trim().is_empty() {
        errors.push(FieldError::new("name", "Name is required"));
    }
    check_email(&request.email, &mut errors);
    check_password_strength(&request.password, &mut errors);
    finish(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), SessionError>) -> Vec<String> {
        match result {
            Ok(()) => vec![],
            Err(SessionError::ValidationFailed(errors)) => errors.into_iter().map(|e| e.field).collect(),
            Err(other) => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_valid_login() {
        assert!(validate_login(&LoginRequest::new("a@x.com", "Valid1!@")).is_ok());
    }

    #[test]
    fn test_login_requires_both_fields() {
        assert_eq!(fields(validate_login(&LoginRequest::new("", ""))), vec!["email", "password"]);
    }

    #[test]
    fn test_email_shapes() {
        for bad in ["plain", "@x.com", "a@x", "a@.com", "a@x.", "a@b@x.com", "a b@x.com"] {
            assert_eq!(
                fields(validate_login(&LoginRequest::new(bad, "pw"))),
                vec!["email"],
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_registration_password_rules() {
        let ok = RegisterRequest::new("Ada", "a@x.com", "Valid1!@");
        assert!(validate_registration(&ok).is_ok());

        for weak in ["Short1!", "alllower1!", "ALLUPPER1!", "NoDigits!!", "NoSymbol12"] {
            let req = RegisterRequest::new("Ada", "a@x.com", weak);
            assert_eq!(fields(validate_registration(&req)), vec!["password"], "{}", weak);
        }
    }

    #[test]
    fn test_registration_reports_every_field() {
        let req = RegisterRequest::new(" ", "nope", "weak");
        assert_eq!(
            fields(validate_registration(&req)),
            vec!["name", "email", "password"]
        );
    }
}
