//! Input format checks for sign-in requests.

use std::sync::LazyLock;

use regex::Regex;

static FINGERPRINT_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{40}$"));

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

/// A browser fingerprint is exactly 40 lowercase hex characters.
pub fn is_valid_fingerprint(fingerprint: &str) -> bool {
    matches!(&*FINGERPRINT_RE, Ok(re) if re.is_match(fingerprint))
}

/// Loose email syntax check: one `@`, a dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    matches!(&*EMAIL_RE, Ok(re) if re.is_match(email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_format() {
        assert!(is_valid_fingerprint("9468a4a53a2f2fd9ea96db22dc9dd9bb6ce38b71"));
        assert!(!is_valid_fingerprint("9468A4A53A2F2FD9EA96DB22DC9DD9BB6CE38B71"));
        assert!(!is_valid_fingerprint("9468a4a53a2f2fd9ea96db22dc9dd9bb6ce38b7"));
        assert!(!is_valid_fingerprint("9468a4a53a2f2fd9ea96db22dc9dd9bb6ce38b71a"));
        assert!(!is_valid_fingerprint("zz68a4a53a2f2fd9ea96db22dc9dd9bb6ce38b71"));
        assert!(!is_valid_fingerprint(""));
    }

    #[test]
    fn email_format() {
        assert!(is_valid_email("foo@bar.baz"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("foo"));
        assert!(!is_valid_email("foo@bar"));
        assert!(!is_valid_email("foo @bar.baz"));
        assert!(!is_valid_email("foo@@bar.baz"));
        assert!(!is_valid_email(""));
    }
}
