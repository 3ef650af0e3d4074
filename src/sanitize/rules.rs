//! Redaction rules applied to string leaves.
//!
//! Rules are evaluated in order and the first rule whose [`RedactionRule::matches`]
//! returns `true` decides the outcome, even when its [`RedactionRule::redact`]
//! chooses to leave the value untouched.
//!
//! All masking counts characters, not bytes, so multi-byte text is never split.

use std::sync::Arc;

use regex::Regex;

use super::SanitizerError;
use super::phone::{PhoneValidator, normalize_candidate};

/// Replacement payload for data URIs.
const DATA_URI_MASK: &str = "****";

/// Number of leading characters kept on a card number.
const CARD_VISIBLE_PREFIX: usize = 3;

/// Number of trailing characters kept on a phone number.
const PHONE_VISIBLE_SUFFIX: usize = 4;

/// Base64 alphabet with up to two padding characters. Payload length is not
/// checked, truncated captures are still masked.
const BASE64: &str = r"^[A-Za-z0-9+/]+={0,2}$";

const DATA_URI: &str = r"^data:.+/(.+);base64$";

const CREDIT_CARD: &str = r"^(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|6(?:011|5[0-9][0-9])[0-9]{12}|3[47][0-9]{13}|3(?:0[0-5]|[68][0-9])[0-9]{11}|(?:2131|1800|35[0-9]{3})[0-9]{11})$";

const PHONE_NUMBER: &str = r"^(?:(?:\(?(?:00|\+)([1-4][0-9][0-9]|[1-9][0-9]?)\)?)?[-. \\/]?)?((?:\(?[0-9]+\)?[-. \\/]?)*)(?:[-. \\/]?(?:#|ext\.?|extension|x)[-. \\/]?([0-9]+))?$";

/// Non-ASCII ranges allowed in addresses.
const UCS: &str = r"\x{00A0}-\x{D7FF}\x{F900}-\x{FDCF}\x{FDF0}-\x{FFEF}";

/// RFC 5322 derived address pattern (dot-atom or quoted local part).
fn email_pattern() -> String {
    let atext = format!(r"[a-zA-Z0-9!#$%\&'*+\-/=?^_`{{|}}\~{UCS}]");
    let dot_atom = format!(r"{atext}+(?:\.{atext}+)*");
    let fws = r"(?:(?:[\x20\x09]*\x0d\x0a)?[\x20\x09]+)";
    let qtext = format!(r"[\x01-\x08\x0b\x0c\x0e-\x1f\x7f\x21\x23-\x5b\x5d-\x7e{UCS}]");
    let quoted_pair = format!(r"\\[\x01-\x09\x0b\x0c\x0d-\x7f{UCS}]");
    let quoted = format!(r"\x22(?:{fws}?(?:{qtext}|{quoted_pair}))*{fws}?\x22");
    let alnum = format!("[a-zA-Z0-9{UCS}]");
    let alpha = format!("[a-zA-Z{UCS}]");
    let inner = format!(r"[a-zA-Z0-9\-._\~{UCS}]");
    let label = format!("(?:{alnum}|{alnum}{inner}*{alnum})");
    let tld = format!("(?:{alpha}|{alpha}{inner}*{alpha})");
    format!(r"^(?:{dot_atom}|{quoted})@(?:{label}\.)+{tld}\.?$")
}

fn compile(rule: &'static str, pattern: &str) -> Result<Regex, SanitizerError> {
    Regex::new(pattern).map_err(|source| SanitizerError::Pattern { rule, source })
}

/// A classifier for string leaves.
pub trait RedactionRule: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this rule claims the value.
    fn matches(&self, value: &str) -> bool;

    /// Masked replacement for a claimed value, `None` to keep it as is.
    fn redact(&self, value: &str) -> Option<String>;
}

/// `data:<mime>;base64,<payload>` keeps the header and drops the payload.
pub struct DataUriRule {
    header: Regex,
    payload: Regex,
}

impl DataUriRule {
    pub fn new() -> Result<Self, SanitizerError> {
        Ok(Self {
            header: compile("data-uri", DATA_URI)?,
            payload: compile("data-uri", BASE64)?,
        })
    }
}

impl RedactionRule for DataUriRule {
    fn name(&self) -> &'static str {
        "data-uri"
    }

    fn matches(&self, value: &str) -> bool {
        value
            .split_once(',')
            .is_some_and(|(head, _)| self.header.is_match(head))
    }

    /// A payload that is not base64 is left as is.
    fn redact(&self, value: &str) -> Option<String> {
        let (head, tail) = value.split_once(',')?;
        self.payload
            .is_match(tail)
            .then(|| format!("{head},{DATA_URI_MASK}"))
    }
}

/// Email addresses: vowels and `0` in the local part become `*`.
///
/// Vowels match in either case and the remaining characters keep their
/// case, so `John.DOE@x.com` becomes `J*hn.D**@x.com`.
pub struct EmailRule {
    pattern: Regex,
}

impl EmailRule {
    pub fn new() -> Result<Self, SanitizerError> {
        Ok(Self {
            pattern: compile("email", &email_pattern())?,
        })
    }
}

impl RedactionRule for EmailRule {
    fn name(&self) -> &'static str {
        "email"
    }

    fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }

    fn redact(&self, value: &str) -> Option<String> {
        let (local, domain) = value.split_once('@')?;
        let local: String = local
            .chars()
            .map(|c| match c.to_ascii_lowercase() {
                'a' | 'i' | 'e' | 'u' | 'o' | '0' => '*',
                _ => c,
            })
            .collect();
        Some(format!("{local}@{domain}"))
    }
}

/// Card numbers keep their first three digits.
pub struct CreditCardRule {
    pattern: Regex,
}

impl CreditCardRule {
    pub fn new() -> Result<Self, SanitizerError> {
        Ok(Self {
            pattern: compile("credit-card", CREDIT_CARD)?,
        })
    }
}

impl RedactionRule for CreditCardRule {
    fn name(&self) -> &'static str {
        "credit-card"
    }

    fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }

    fn redact(&self, value: &str) -> Option<String> {
        Some(mask_after(value, CARD_VISIBLE_PREFIX))
    }
}

/// Phone numbers keep their last four characters once confirmed by a
/// [`PhoneValidator`].
pub struct PhoneNumberRule {
    pattern: Regex,
    validator: Arc<dyn PhoneValidator>,
}

impl PhoneNumberRule {
    pub fn new(validator: Arc<dyn PhoneValidator>) -> Result<Self, SanitizerError> {
        Ok(Self {
            pattern: compile("phone", PHONE_NUMBER)?,
            validator,
        })
    }
}

impl RedactionRule for PhoneNumberRule {
    fn name(&self) -> &'static str {
        "phone"
    }

    fn matches(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }

    fn redact(&self, value: &str) -> Option<String> {
        let candidate = normalize_candidate(value);
        if !self.validator.is_phone_number(&candidate) {
            return None;
        }
        mask_before_last(value, PHONE_VISIBLE_SUFFIX)
    }
}

/// The default cascade: data URI, email, credit card, phone number.
pub fn default_rules(
    phone_validator: Arc<dyn PhoneValidator>,
) -> Result<Vec<Box<dyn RedactionRule>>, SanitizerError> {
    Ok(vec![
        Box::new(DataUriRule::new()?),
        Box::new(EmailRule::new()?),
        Box::new(CreditCardRule::new()?),
        Box::new(PhoneNumberRule::new(phone_validator)?),
    ])
}

/// Keep the first `visible` characters, mask the rest.
fn mask_after(value: &str, visible: usize) -> String {
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < visible { c } else { '*' })
        .collect()
}

/// Keep the last `visible` characters, mask the rest.
///
/// Values with `visible` characters or fewer have nothing to mask.
fn mask_before_last(value: &str, visible: usize) -> Option<String> {
    let count = value.chars().count();
    if count <= visible {
        return None;
    }
    let masked = count - visible;
    Some(
        value
            .chars()
            .enumerate()
            .map(|(i, c)| if i < masked { '*' } else { c })
            .collect(),
    )
}
