use once_cell::sync::Lazy;
use regex::Regex;

/// Input validation utilities for registration and profile updates

// Compile regex patterns once at startup
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    // This regex is hardcoded and validated - it is a compile-time constant in practice
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("hardcoded email regex is invalid - fix source code")
});

static USERNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_-]{3,32}$")
        .expect("hardcoded username regex is invalid - fix source code")
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?[0-9][0-9 \-]{4,19}$")
        .expect("hardcoded phone regex is invalid - fix source code")
});

/// Validate email format (RFC 5322 simplified)
pub fn validate_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// Validate username format (3-32 characters, alphanumeric with - and _)
pub fn validate_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

/// Validate phone format (optional +, digits with spaces/dashes, 5-20 chars)
pub fn validate_phone(phone: &str) -> bool {
    PHONE_REGEX.is_match(phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("test.user+tag@sub.example.co.uk"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!validate_email(""));
        assert!(!validate_email("plainaddress"));
        assert!(!validate_email("user@"));
        assert!(!validate_email("@example.com"));
    }

    #[test]
    fn test_valid_username() {
        assert!(validate_username("alice"));
        assert!(validate_username("user_123"));
        assert!(validate_username("a-b-c"));
    }

    #[test]
    fn test_invalid_username() {
        assert!(!validate_username("ab"));
        assert!(!validate_username("has space"));
        assert!(!validate_username("emoji🙂"));
        assert!(!validate_username(&"x".repeat(40)));
    }

    #[test]
    fn test_phone() {
        assert!(validate_phone("+390000000000"));
        assert!(validate_phone("333 123 4567"));
        assert!(!validate_phone(""));
        assert!(!validate_phone("call me"));
        assert!(!validate_phone("+"));
    }
}
