//! Fuzz target for the sanitizer.
//!
//! Arbitrary JSON is lifted into a host value and sanitized; the output must
//! stay within the depth cap and never panic.

#![no_main]

use apm_core::sanitizer::{Sanitizer, SanitizerConfig};
use apm_core::Value;
use libfuzzer_sys::fuzz_target;
use serde_json::Value as JsonValue;

fn depth_of(v: &JsonValue) -> usize {
    match v {
        JsonValue::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        JsonValue::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(json) = serde_json::from_slice::<JsonValue>(data) else {
        return;
    };

    let sanitizer = Sanitizer::new(SanitizerConfig {
        max_depth: 4,
        ..SanitizerConfig::default()
    });
    let input = Value::from(json);

    let out = sanitizer.sanitize(&input);
    assert!(depth_of(&out) <= sanitizer.max_depth(), "depth cap exceeded");

    if let Value::Map(mut payload) = input {
        sanitizer.sanitize_in_place(&mut payload);
        assert!(payload.values().all(Value::is_primitive));
    }
});
