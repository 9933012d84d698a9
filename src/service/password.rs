//! Password strength policy

use crate::error::ProtocolError;

/// Minimum password length, in characters
pub const MIN_PASSWORD_LEN: usize = 8;

/// Require at least eight characters with a letter, a digit and a symbol
pub fn validate_password_strength(password: &str) -> Result<(), ProtocolError> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LEN;
    let has_letter = password.chars().any(char::is_alphabetic);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if long_enough && has_letter && has_digit && has_symbol {
        Ok(())
    } else {
        Err(ProtocolError::WeakPassword(format!(
            "password must be at least {} characters and include a letter, a number and a symbol",
            MIN_PASSWORD_LEN
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_password_accepted() {
        assert!(validate_password_strength("otter#42go").is_ok());
    }

    #[test]
    fn test_weak_passwords_rejected() {
        assert!(validate_password_strength("short1!").is_err());
        assert!(validate_password_strength("nodigits!!").is_err());
        assert!(validate_password_strength("nosymbol42").is_err());
        assert!(validate_password_strength("12345678!").is_err());
        assert!(validate_password_strength("").is_err());
    }
}
