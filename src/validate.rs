//! Qualified-name validation and annotation parsing helpers.
//!
//! The orchestrator's qualified-name rule: a DNS-label-like string, 1-63
//! characters, lowercase alphanumerics with interior `-`/`.`.

use crate::error::Error;

const MAX_NAME_LEN: usize = 63;

/// Validate a `Function`'s name against the qualified-name rule.
///
/// Returns `Error::InvalidName` (never touches status) on failure.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(invalid(name, "name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(name, "name must be at most 63 characters"));
    }
    let bytes = name.as_bytes();
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(invalid(name, "name must start with a lowercase letter or digit"));
    }
    if !last.is_ascii_lowercase() && !last.is_ascii_digit() {
        return Err(invalid(name, "name must end with a lowercase letter or digit"));
    }
    for &b in bytes {
        let ok = b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.';
        if !ok {
            return Err(invalid(name, "name must contain only lowercase alphanumerics, '-' or '.'"));
        }
    }
    Ok(())
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// The truthy string values an annotation may carry ("boolean-valued" marker
/// rendered over the wire, where annotations are always strings).
pub fn annotation_is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_label_like_names() {
        assert!(validate_name("fn1").is_ok());
        assert!(validate_name("my-function.v2").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn rejects_uppercase_and_symbols() {
        assert!(validate_name("Fn_1!").is_err());
        assert!(validate_name("Fn1").is_err());
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(validate_name("").is_err());
        let long = "a".repeat(64);
        assert!(validate_name(&long).is_err());
        let max = "a".repeat(63);
        assert!(validate_name(&max).is_ok());
    }

    #[test]
    fn rejects_leading_or_trailing_dash() {
        assert!(validate_name("-fn").is_err());
        assert!(validate_name("fn-").is_err());
    }

    #[test]
    fn annotation_truthiness() {
        assert!(annotation_is_truthy("true"));
        assert!(annotation_is_truthy("TRUE"));
        assert!(annotation_is_truthy("1"));
        assert!(!annotation_is_truthy("false"));
        assert!(!annotation_is_truthy(""));
    }
}
