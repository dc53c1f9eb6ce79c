//! # Property-Based Tests
//!
//! Signing, canonicalization, and redirect-sanitization invariants.
//!
//! These tests pin down the properties external embedders rely on:
//! a signature verifies exactly when nothing about the request changed,
//! and canonicalization is a true normal form.

use glimpse_core::{
    canonical_signing_url, embed_signature, encode_params, safe_next_path, sign,
    verify_embed_signature,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Query-safe parameter text: no separators of the query grammar
/// itself, so raw `k=v` joins stay parseable.
fn param_text() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zA-Z0-9_. /:@()',-]{0,24}").expect("valid regex")
}

fn param_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    proptest::collection::btree_map(
        proptest::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,10}").expect("valid regex"),
        param_text(),
        0..8,
    )
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// A signature verifies against the inputs that produced it.
    #[test]
    fn sign_verify_roundtrip(
        key in "[a-zA-Z0-9]{1,40}",
        url_path in "/[a-z0-9/]{0,30}",
        timestamp in 0i64..4_000_000_000
    ) {
        let url = format!("http://localhost{url_path}");
        let sig = embed_signature(&key, &url, timestamp).expect("non-empty key signs");
        prop_assert!(verify_embed_signature(&key, &url, timestamp, &sig));
    }

    /// Changing the timestamp, the key, or the URL breaks verification.
    #[test]
    fn any_input_change_breaks_verification(
        key in "[a-zA-Z0-9]{1,40}",
        timestamp in 0i64..4_000_000_000
    ) {
        let url = "http://localhost/embed/dashboard/3?secret_key=K";
        let sig = embed_signature(&key, url, timestamp).expect("signs");

        prop_assert!(!verify_embed_signature(&key, url, timestamp + 1, &sig));
        let other_key = format!("{key}x");
        prop_assert!(!verify_embed_signature(&other_key, url, timestamp, &sig));
        let other_url = "http://localhost/embed/dashboard/4?secret_key=K";
        prop_assert!(!verify_embed_signature(&key, other_url, timestamp, &sig));
    }

    /// Flipping any hex digit of a signature makes it fail.
    #[test]
    fn bit_flip_anywhere_breaks_verification(
        key in "[a-zA-Z0-9]{1,40}",
        timestamp in 0i64..4_000_000_000,
        position in 0usize..64
    ) {
        let url = "http://localhost/embed/dashboard/3?secret_key=K";
        let sig = embed_signature(&key, url, timestamp).expect("signs");

        let mut bytes = sig.into_bytes();
        bytes[position] = if bytes[position] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(bytes).expect("still ascii");

        prop_assert!(!verify_embed_signature(&key, url, timestamp, &flipped));
    }

    /// Canonicalizing twice changes nothing: the output is a fixed point.
    #[test]
    fn canonicalization_is_idempotent(params in param_map()) {
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let url = format!("http://localhost/embed/dashboard/1?{}", query.join("&"));

        let once = canonical_signing_url(&url);
        let twice = canonical_signing_url(&once);
        prop_assert_eq!(once, twice);
    }

    /// Parameter order on the wire does not affect the canonical form,
    /// so it does not affect the signature either.
    #[test]
    fn parameter_order_does_not_matter(params in param_map(), seed in any::<u64>()) {
        let mut pairs: Vec<(String, String)> = params.into_iter().collect();
        let forward: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();

        // Cheap deterministic shuffle: rotate by the seed.
        if !pairs.is_empty() {
            let rotation = (seed as usize) % pairs.len();
            pairs.rotate_left(rotation);
        }
        let rotated: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let url_a = format!("http://h/embed/dashboard/1?{}", forward.join("&"));
        let url_b = format!("http://h/embed/dashboard/1?{}", rotated.join("&"));

        prop_assert_eq!(canonical_signing_url(&url_a), canonical_signing_url(&url_b));
        prop_assert_eq!(
            embed_signature("tok", &url_a, 99).expect("signs"),
            embed_signature("tok", &url_b, 99).expect("signs")
        );
    }

    /// A `signature` parameter never survives canonicalization, wherever
    /// it appears in the query.
    #[test]
    fn signature_parameter_is_always_stripped(
        params in param_map(),
        sig_value in "[a-f0-9]{8}"
    ) {
        let mut query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        query.insert(query.len() / 2, format!("signature={sig_value}"));
        let url = format!("http://h/embed/dashboard/1?{}", query.join("&"));

        let canonical = canonical_signing_url(&url);
        prop_assert!(!canonical.contains("signature="));
    }

    /// Canonical queries are sorted and every key survives.
    #[test]
    fn canonical_query_is_sorted_and_complete(params in param_map()) {
        let query: Vec<String> = params
            .iter()
            .rev()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let url = format!("http://h/p?{}", query.join("&"));

        let canonical = canonical_signing_url(&url);
        let canonical_query = canonical.split_once('?').map_or("", |(_, q)| q);
        let keys: Vec<&str> = canonical_query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').map_or(p, |(k, _)| k))
            .collect();

        let mut sorted = keys.clone();
        sorted.sort_unstable();
        prop_assert_eq!(&keys, &sorted);
        prop_assert_eq!(keys.len(), params.len());
    }

    /// `encode_params` output only ever contains unreserved characters,
    /// `/`, and percent escapes.
    #[test]
    fn encoded_params_stay_in_the_safe_alphabet(params in param_map()) {
        let encoded = encode_params(&params);
        for (i, c) in encoded.char_indices() {
            let ok = c.is_ascii_alphanumeric()
                || matches!(c, '_' | '.' | '-' | '~' | '/' | '%' | '=' | '&');
            prop_assert!(ok, "unexpected byte {c:?} at {i} in {encoded:?}");
        }
    }

    /// Legacy URL signatures depend on every input.
    #[test]
    fn legacy_signature_distinguishes_inputs(
        key in "[a-zA-Z0-9]{1,32}",
        path in "/[a-z0-9/]{0,20}",
        expires in 1i64..4_000_000_000
    ) {
        let sig = sign(&key, &path, expires).expect("signs");
        prop_assert_eq!(sig.len(), 40);
        prop_assert_ne!(sign(&key, &path, expires + 1).expect("signs"), sig.clone());
        let other_path = format!("{path}x");
        prop_assert_ne!(sign(&key, &other_path, expires).expect("signs"), sig);
    }

    /// Sanitized redirect targets never carry a scheme or an authority.
    #[test]
    fn sanitized_next_path_is_always_same_origin(input in "[ -~]{0,60}") {
        let safe = safe_next_path(&input);

        prop_assert!(!safe.starts_with("//"), "authority survived: {safe:?}");

        // No leading scheme either: anything scheme-shaped before the
        // first colon would make a browser treat the target as absolute.
        if let Some(colon) = safe.find(':') {
            let prefix = &safe[..colon];
            let is_scheme = prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && prefix.chars().all(|c| {
                    c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')
                });
            prop_assert!(!is_scheme, "scheme survived: {safe:?} from {input:?}");
        }
    }

    /// Sanitizing is idempotent.
    #[test]
    fn sanitizing_twice_changes_nothing(input in "[ -~]{0,60}") {
        let once = safe_next_path(&input);
        let twice = safe_next_path(&once);
        prop_assert_eq!(once, twice);
    }
}
