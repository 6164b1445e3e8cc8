//! Utility functions and helpers

use std::net::IpAddr;

use regex::Regex;
use uuid::Uuid;

/// Regex for DNS names: dot separated labels of letters, digits, `_` and `-`
/// that end in a letter or digit, optionally followed by a final dot.
pub static DNS_NAME_REGEX: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_]([a-zA-Z0-9_-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9_]([a-zA-Z0-9_-]{0,61}[a-zA-Z0-9])?)*\.?$")
        .expect("DNS_NAME_REGEX should be a valid regex pattern")
});

/// Maximum number of name characters, dots excluded
const MAX_DNS_NAME_LENGTH: usize = 255;

/// Whether `name` is a syntactically valid DNS name. IP literals are not.
pub fn is_dns_name(name: &str) -> bool {
    if name.is_empty() || name.chars().filter(|c| *c != '.').count() > MAX_DNS_NAME_LENGTH {
        return false;
    }
    name.parse::<IpAddr>().is_err() && DNS_NAME_REGEX.is_match(name)
}

/// Generate a new random nonce for a discovery response
pub fn generate_nonce() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_hostnames() {
        assert!(is_dns_name("example.com"));
        assert!(is_dns_name("a.example.com"));
        assert!(is_dns_name("api-v2.internal"));
        assert!(is_dns_name("localhost"));
        assert!(is_dns_name("example.com."));
    }

    #[test]
    fn rejects_invalid_names() {
        assert!(!is_dns_name(""));
        assert!(!is_dns_name("-leading.example.com"));
        assert!(!is_dns_name("space in.example.com"));
        assert!(!is_dns_name("double..dot.com"));
        assert!(!is_dns_name("10.0.0.1"));
        assert!(!is_dns_name(&format!("{}.com", "a".repeat(64))));
        assert!(!is_dns_name("example_"));
        assert!(!is_dns_name("example.com_"));
        assert!(!is_dns_name("example-.com"));
    }

    #[test]
    fn nonces_are_unique() {
        assert_ne!(generate_nonce(), generate_nonce());
    }
}
