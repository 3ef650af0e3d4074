//! Recursive payload redaction.
//!
//! # Algorithm
//!
//! The sanitizer walks a [`StructuredValue`] depth-first:
//!
//! ```text
//! Mapping ──► key in SafeFields? ──yes──► remove key
//!                 │ no
//!                 ├── Mapping  ──► recurse
//!                 ├── Sequence ──► recurse into nested Mapping/Sequence elements only
//!                 └── String   ──► redaction cascade (data URI → email → card → phone)
//! ```
//!
//! Non-string scalars are never touched, and neither are bare scalars inside
//! sequences. The shape of the tree is preserved apart from removed keys.
//!
//! # Configuration
//!
//! The safe-field list and rule set are immutable once built; share a single
//! [`PayloadSanitizer`] behind an `Arc` across all requests.

mod phone;
mod rules;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::value::{Scalar, StructuredValue};

pub use phone::{LibPhoneValidator, PhoneValidator, normalize_candidate};
pub use rules::{
    CreditCardRule, DataUriRule, EmailRule, PhoneNumberRule, RedactionRule, default_rules,
};

/// Replacement for a string that is only sensitive because of its key.
pub const FIELD_MASK: &str = "***";

/// Payload keys stripped from every logged document.
pub const DEFAULT_SAFE_FIELDS: &[&str] = &[
    "authorization",
    "api-key",
    "api",
    "apikey",
    "merchant-key",
    "enterprise-token",
    "token",
    "user-token",
];

/// Errors raised while building a sanitizer.
#[derive(Debug, Error)]
pub enum SanitizerError {
    #[error("safe field name must not be empty")]
    EmptyFieldName,

    #[error("safe field '{0}' is listed more than once")]
    DuplicateField(String),

    #[error("invalid pattern for {rule} rule: {source}")]
    Pattern {
        rule: &'static str,
        #[source]
        source: regex::Error,
    },
}

/// Case-insensitive set of key names whose values must never be logged.
#[derive(Debug, Clone)]
pub struct SafeFields {
    names: HashSet<String>,
}

impl SafeFields {
    /// Build the set, rejecting empty and duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`SanitizerError::EmptyFieldName`] or
    /// [`SanitizerError::DuplicateField`].
    pub fn new<I, S>(names: I) -> Result<Self, SanitizerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for name in names {
            let name = name.as_ref().trim().to_lowercase();
            if name.is_empty() {
                return Err(SanitizerError::EmptyFieldName);
            }
            if !set.insert(name.clone()) {
                return Err(SanitizerError::DuplicateField(name));
            }
        }
        Ok(Self { names: set })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.names.contains(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for SafeFields {
    fn default() -> Self {
        Self {
            names: DEFAULT_SAFE_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Redacts sensitive content from decoded payloads.
pub struct PayloadSanitizer {
    safe_fields: SafeFields,
    rules: Vec<Box<dyn RedactionRule>>,
}

impl PayloadSanitizer {
    /// Sanitizer with the default rule cascade and libphonenumber confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`SanitizerError::Pattern`] if a built-in pattern fails to compile.
    pub fn new(safe_fields: SafeFields) -> Result<Self, SanitizerError> {
        Self::with_phone_validator(safe_fields, Arc::new(LibPhoneValidator))
    }

    /// Sanitizer with the default rule cascade and a custom phone validator.
    pub fn with_phone_validator(
        safe_fields: SafeFields,
        validator: Arc<dyn PhoneValidator>,
    ) -> Result<Self, SanitizerError> {
        Ok(Self::with_rules(safe_fields, default_rules(validator)?))
    }

    /// Sanitizer with an explicit, ordered rule set.
    pub fn with_rules(safe_fields: SafeFields, rules: Vec<Box<dyn RedactionRule>>) -> Self {
        Self { safe_fields, rules }
    }

    pub fn safe_fields(&self) -> &SafeFields {
        &self.safe_fields
    }

    /// Redact `value` in place.
    pub fn sanitize(&self, value: &mut StructuredValue) {
        match value {
            StructuredValue::Mapping(map) => self.sanitize_mapping(map),
            StructuredValue::Sequence(items) => self.sanitize_sequence(items),
            StructuredValue::Scalar(_) => {}
        }
    }

    /// Redacted copy of `value`.
    pub fn sanitized(&self, value: &StructuredValue) -> StructuredValue {
        let mut copy = value.clone();
        self.sanitize(&mut copy);
        copy
    }

    /// Run the classification cascade for a string stored under `key`.
    ///
    /// Returns the replacement, or `None` when the value stays as is.
    pub fn redact_scalar(&self, key: &str, value: &str) -> Option<String> {
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(value)) {
            trace!(rule = rule.name(), "Redaction rule matched");
            return rule.redact(value);
        }
        if self.safe_fields.contains(key) {
            return Some(FIELD_MASK.to_string());
        }
        None
    }

    fn sanitize_mapping(&self, map: &mut BTreeMap<String, StructuredValue>) {
        map.retain(|key, _| !self.safe_fields.contains(key));

        for (key, value) in map.iter_mut() {
            match value {
                StructuredValue::Mapping(inner) => self.sanitize_mapping(inner),
                StructuredValue::Sequence(items) => self.sanitize_sequence(items),
                StructuredValue::Scalar(Scalar::String(s)) => {
                    if let Some(redacted) = self.redact_scalar(key, s) {
                        *s = redacted;
                    }
                }
                StructuredValue::Scalar(_) => {}
            }
        }
    }

    fn sanitize_sequence(&self, items: &mut [StructuredValue]) {
        for item in items {
            match item {
                StructuredValue::Mapping(inner) => self.sanitize_mapping(inner),
                StructuredValue::Sequence(nested) => self.sanitize_sequence(nested),
                StructuredValue::Scalar(_) => {}
            }
        }
    }
}

impl std::fmt::Debug for PayloadSanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSanitizer")
            .field("safe_fields", &self.safe_fields)
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    struct AcceptAll;

    impl PhoneValidator for AcceptAll {
        fn is_phone_number(&self, _candidate: &str) -> bool {
            true
        }
    }

    fn sanitizer() -> PayloadSanitizer {
        PayloadSanitizer::with_phone_validator(SafeFields::default(), Arc::new(AcceptAll)).unwrap()
    }

    fn run(input: Value) -> Value {
        let mut value = StructuredValue::from(input);
        sanitizer().sanitize(&mut value);
        value.to_json()
    }

    #[test]
    fn test_safe_fields_are_removed_case_insensitively() {
        let out = run(json!({
            "Authorization": "Bearer abc",
            "TOKEN": "t",
            "name": "widget"
        }));

        assert_eq!(out, json!({"name": "widget"}));
    }

    #[test]
    fn test_nested_safe_fields_are_removed() {
        let out = run(json!({
            "user": {"api-key": "k", "profile": {"user-token": {"nested": 1}, "id": 4}},
            "items": [{"apikey": "x", "sku": "a"}, [{"token": "y"}]]
        }));

        assert_eq!(
            out,
            json!({
                "user": {"profile": {"id": 4}},
                "items": [{"sku": "a"}, [{}]]
            })
        );
    }

    #[test]
    fn test_string_leaves_are_classified() {
        let out = run(json!({
            "email": "john.doe@example.com",
            "card": "4111111111111111",
            "avatar": "data:image/png;base64,AAAA==",
            "phone": "081234567890",
            "note": "hello"
        }));

        assert_eq!(
            out,
            json!({
                "email": "j*hn.d**@example.com",
                "card": "411*************",
                "avatar": "data:image/png;base64,****",
                "phone": "********7890",
                "note": "hello"
            })
        );
    }

    #[test]
    fn test_scalars_in_sequences_are_left_alone() {
        let out = run(json!({
            "emails": ["john.doe@example.com"],
            "contacts": [{"email": "john.doe@example.com"}]
        }));

        assert_eq!(
            out,
            json!({
                "emails": ["john.doe@example.com"],
                "contacts": [{"email": "j*hn.d**@example.com"}]
            })
        );
    }

    #[test]
    fn test_non_string_scalars_untouched() {
        let input = json!({"count": 4111111111111111_u64, "ok": true, "none": null});
        assert_eq!(run(input.clone()), input);
    }

    #[test]
    fn test_top_level_sequence() {
        let out = run(json!([
            "john.doe@example.com",
            {"token": "x", "email": "john.doe@example.com"},
            [[{"authorization": "y"}]]
        ]));

        assert_eq!(
            out,
            json!([
                "john.doe@example.com",
                {"email": "j*hn.d**@example.com"},
                [[{}]]
            ])
        );
    }

    #[test]
    fn test_top_level_scalar_untouched() {
        assert_eq!(
            run(json!("john.doe@example.com")),
            json!("john.doe@example.com")
        );
    }

    #[test]
    fn test_sanitizing_twice_is_a_no_op() {
        let sanitizer = sanitizer();
        let once = sanitizer.sanitized(&StructuredValue::from(json!({
            "email": "john.doe@example.com",
            "card": "4111111111111111",
            "avatar": "data:image/png;base64,AAAA==",
            "phone": "+6281234567",
            "list": [{"email": "AUDIO@example.org"}]
        })));
        let twice = sanitizer.sanitized(&once);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_sanitized_leaves_original_untouched() {
        let original = StructuredValue::from(json!({"token": "x"}));
        let copy = sanitizer().sanitized(&original);

        assert_eq!(original.to_json(), json!({"token": "x"}));
        assert_eq!(copy.to_json(), json!({}));
    }

    #[test]
    fn test_field_name_fallback() {
        let sanitizer = sanitizer();
        assert_eq!(
            sanitizer.redact_scalar("Token", "plain"),
            Some(FIELD_MASK.to_string())
        );
        assert_eq!(sanitizer.redact_scalar("name", "plain"), None);
    }

    #[test]
    fn test_rule_match_wins_over_field_fallback() {
        let sanitizer = sanitizer();
        assert_eq!(
            sanitizer.redact_scalar("token", "john.doe@example.com"),
            Some("j*hn.d**@example.com".to_string())
        );
    }

    #[test]
    fn test_custom_safe_fields() {
        let fields = SafeFields::new(["Password", "secret"]).unwrap();
        let sanitizer = PayloadSanitizer::with_rules(fields, Vec::new());
        let mut value =
            StructuredValue::from(json!({"password": "p", "SECRET": "s", "token": "t"}));

        sanitizer.sanitize(&mut value);

        assert_eq!(value.to_json(), json!({"token": "t"}));
    }

    #[test]
    fn test_safe_fields_reject_duplicates() {
        let err = SafeFields::new(["token", "TOKEN"]).unwrap_err();
        assert!(matches!(err, SanitizerError::DuplicateField(ref name) if name == "token"));
    }

    #[test]
    fn test_safe_fields_reject_empty() {
        assert!(matches!(
            SafeFields::new(["token", "  "]),
            Err(SanitizerError::EmptyFieldName)
        ));
    }

    #[test]
    fn test_default_sanitizer_masks_parseable_phone_numbers() {
        let sanitizer = PayloadSanitizer::new(SafeFields::default()).unwrap();
        assert_eq!(
            sanitizer.redact_scalar("phone", "+1 650-253-0000"),
            Some("***********0000".to_string())
        );
    }

    #[test]
    fn test_data_uri_header_stops_cascade_without_base64_payload() {
        let sanitizer = sanitizer();
        assert_eq!(
            sanitizer.redact_scalar("avatar", "data:image/png;base64,4111111111111111!"),
            None
        );
    }

    #[test]
    fn test_default_sanitizer_builds() {
        let sanitizer = PayloadSanitizer::new(SafeFields::default()).unwrap();
        assert_eq!(sanitizer.safe_fields().len(), DEFAULT_SAFE_FIELDS.len());
    }
}
