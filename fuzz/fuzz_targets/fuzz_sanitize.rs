//! Fuzz testing for the payload sanitizer.
//!
//! Feeds arbitrary bytes through JSON decoding and the redaction cascade.
//! The sanitizer must never panic, and no safe-field key may survive at any
//! depth of the redacted value.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_sanitize -- -max_total_time=60
//! ```

#![no_main]

use std::sync::LazyLock;

use exchange_guard::value::StructuredValue;
use exchange_guard::{PayloadSanitizer, SafeFields};
use libfuzzer_sys::fuzz_target;

static SANITIZER: LazyLock<PayloadSanitizer> = LazyLock::new(|| {
    PayloadSanitizer::new(SafeFields::default()).expect("built-in patterns compile")
});

fn assert_no_safe_keys(value: &StructuredValue, safe: &SafeFields) {
    match value {
        StructuredValue::Mapping(map) => {
            for (key, inner) in map {
                assert!(!safe.contains(key), "safe field '{key}' survived");
                assert_no_safe_keys(inner, safe);
            }
        }
        StructuredValue::Sequence(items) => {
            for item in items {
                assert_no_safe_keys(item, safe);
            }
        }
        StructuredValue::Scalar(_) => {}
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = SANITIZER.redact_scalar("field", text);
        let _ = SANITIZER.redact_scalar("password", text);
    }

    let Ok(value) = StructuredValue::from_json_slice(data) else {
        return;
    };

    let redacted = SANITIZER.sanitized(&value);
    if matches!(value, StructuredValue::Scalar(_)) {
        assert_eq!(redacted, value);
    }
    assert_no_safe_keys(&redacted, SANITIZER.safe_fields());
    let _ = redacted.to_json();
});
