//! Phone-number confirmation used by the phone redaction rule.
//!
//! The phone pattern alone matches far too many numeric strings, so a
//! candidate is only masked once a phone-number library can parse it.
//! Parsing is the whole check: numbers outside the library's validity
//! metadata are still masked.

use tracing::trace;

/// Confirms that a candidate string really is a phone number.
pub trait PhoneValidator: Send + Sync {
    /// `candidate` has already been normalized to international digits
    /// without a leading `+`.
    fn is_phone_number(&self, candidate: &str) -> bool;
}

/// [`PhoneValidator`] backed by the `phonenumber` crate (libphonenumber metadata).
#[derive(Debug, Clone, Copy, Default)]
pub struct LibPhoneValidator;

impl PhoneValidator for LibPhoneValidator {
    fn is_phone_number(&self, candidate: &str) -> bool {
        match phonenumber::parse(None, format!("+{candidate}")) {
            Ok(_) => true,
            Err(e) => {
                trace!(error = %e, "Phone candidate rejected by parser");
                false
            }
        }
    }
}

/// Rewrite a local number to its international form.
///
/// Strips a leading `+`, then replaces the first `0` (the national trunk
/// prefix) with the `62` country code.
pub fn normalize_candidate(s: &str) -> String {
    let s = s.strip_prefix('+').unwrap_or(s);
    match s.split_once('0') {
        Some((head, tail)) => format!("{head}62{tail}"),
        None => s.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_local_number() {
        assert_eq!(normalize_candidate("081234567890"), "6281234567890");
    }

    #[test]
    fn test_normalize_strips_plus() {
        assert_eq!(normalize_candidate("+6281234567890"), "62812345678962");
        assert_eq!(normalize_candidate("+1234"), "1234");
    }

    #[test]
    fn test_normalize_rewrites_first_zero_only() {
        assert_eq!(normalize_candidate("1-800-0000"), "1-8620-0000");
    }

    #[test]
    fn test_lib_validator_accepts_known_number() {
        assert!(LibPhoneValidator.is_phone_number("16502530000"));
    }

    #[test]
    fn test_lib_validator_accepts_parseable_but_unassigned_number() {
        let candidate = normalize_candidate("+1 650-253-0000");
        let number = phonenumber::parse(None, format!("+{candidate}")).unwrap();
        assert!(!phonenumber::is_valid(&number));
        assert!(LibPhoneValidator.is_phone_number(&candidate));
    }

    #[test]
    fn test_lib_validator_rejects_garbage() {
        assert!(!LibPhoneValidator.is_phone_number(""));
        assert!(!LibPhoneValidator.is_phone_number("1"));
    }
}
