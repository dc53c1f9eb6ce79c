//! # Request Signing
//!
//! HMAC signing for the two link protocols Glimpse speaks:
//!
//! - **Legacy signed URLs**: HMAC-SHA1 over `path || decimal(expires)`,
//!   keyed by an entity's API key. Still honored for already-issued links.
//! - **Embed signatures**: HMAC-SHA256 over a canonical request string,
//!   keyed by an application's secret token.
//!
//! ## Canonicalization
//!
//! The embed protocol is shared with external embedders, so the canonical
//! form must be reproduced byte for byte on both sides:
//!
//! 1. Parse the query string; for repeated parameters the first value wins;
//!    blank values are kept.
//! 2. Drop the `signature` parameter.
//! 3. Percent-encode keys and values (UTF-8; unreserved set is
//!    alphanumerics plus `_.-~` and `/`, uppercase hex digits), sort by
//!    key, join as `k=v` with `&`.
//! 4. Splice the result back as the sole query component; an empty
//!    canonical query drops the `?`. Scheme, host, path and fragment are
//!    left untouched.
//!
//! The signing string is then
//! `"GET,," + EMPTY_BODY_MD5_BASE64 + "," + canonical_url + "," + timestamp`.

use crate::primitives::EMPTY_BODY_MD5_BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use sha2::Sha256;
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

/// Characters left unencoded: alphanumerics plus `_ . - ~` and `/`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

// =============================================================================
// LEGACY SIGNED URLS
// =============================================================================

/// Compute the legacy URL signature.
///
/// Returns `None` when `key` is empty: signing is impossible without a
/// key, and callers must not confuse that with a valid signature of
/// empty input.
#[must_use]
pub fn sign(key: &str, path: &str, expires: i64) -> Option<String> {
    if key.is_empty() {
        return None;
    }

    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).ok()?;
    mac.update(path.as_bytes());
    mac.update(expires.to_string().as_bytes());

    Some(hex::encode(mac.finalize().into_bytes()))
}

// =============================================================================
// CANONICALIZATION
// =============================================================================

/// Encode a parameter map as a canonical query string.
///
/// Keys are emitted in ascending order (`BTreeMap` iteration order), each
/// key and value percent-encoded independently.
#[must_use]
pub fn encode_params(params: &BTreeMap<String, String>) -> String {
    let mut pairs = Vec::with_capacity(params.len());
    for (k, v) in params {
        let key = utf8_percent_encode(k, QUERY_ENCODE_SET);
        let value = utf8_percent_encode(v, QUERY_ENCODE_SET);
        pairs.push(format!("{key}={value}"));
    }
    pairs.join("&")
}

/// Rewrite `url` with its query replaced by the canonical encoding.
///
/// Only the query component changes; when the canonical query is empty
/// the `?` is dropped entirely. Any `signature` parameter is removed
/// before encoding so the output is the exact string both sides sign.
#[must_use]
pub fn canonical_signing_url(url: &str) -> String {
    let (without_fragment, fragment) = match url.find('#') {
        Some(i) => (&url[..i], &url[i..]),
        None => (url, ""),
    };
    let (base, raw_query) = match without_fragment.find('?') {
        Some(i) => (&without_fragment[..i], &without_fragment[i + 1..]),
        None => (without_fragment, ""),
    };

    // First occurrence wins for repeated parameters; blank values are kept.
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in form_urlencoded::parse(raw_query.as_bytes()) {
        params.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    params.remove("signature");

    let canonical = encode_params(&params);
    if canonical.is_empty() {
        format!("{base}{fragment}")
    } else {
        format!("{base}?{canonical}{fragment}")
    }
}

// =============================================================================
// EMBED SIGNATURES
// =============================================================================

/// Compute the embed signature for `url` at `timestamp`.
///
/// The URL is canonicalized first, so the caller may pass the request URL
/// with or without its `signature` parameter. Returns `None` when
/// `secret_token` is empty — an application without a signing key can
/// never produce (or match) a signature.
#[must_use]
pub fn embed_signature(secret_token: &str, url: &str, timestamp: i64) -> Option<String> {
    if secret_token.is_empty() {
        return None;
    }

    let canonical_url = canonical_signing_url(url);
    let signing_string = format!("GET,,{EMPTY_BODY_MD5_BASE64},{canonical_url},{timestamp}");

    let mut mac = Hmac::<Sha256>::new_from_slice(secret_token.as_bytes()).ok()?;
    mac.update(signing_string.as_bytes());

    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a caller-supplied embed signature in constant time.
#[must_use]
pub fn verify_embed_signature(
    secret_token: &str,
    url: &str,
    timestamp: i64,
    provided: &str,
) -> bool {
    match embed_signature(secret_token, url, timestamp) {
        Some(expected) => constant_time_str_eq(&expected, provided),
        None => false,
    }
}

/// Constant-time string comparison.
///
/// Both inputs are padded to the same length before comparing so `ct_eq`
/// always runs over the same number of bytes regardless of how much of a
/// guess matches.
#[must_use]
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    let max_len = a_bytes.len().max(b_bytes.len());
    let mut padded_a = vec![0u8; max_len];
    let mut padded_b = vec![0u8; max_len];
    padded_a[..a_bytes.len()].copy_from_slice(a_bytes);
    padded_b[..b_bytes.len()].copy_from_slice(b_bytes);

    let bytes_match: bool = padded_a.ct_eq(&padded_b).into();
    bytes_match && a_bytes.len() == b_bytes.len()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Digest values cross-checked against the Python reference
    // implementation (hmac + urllib.parse).

    #[test]
    fn sign_known_answer() {
        assert_eq!(
            sign("secret", "/api/queries/42/results.json", 1_722_000_000)
                .expect("non-empty key signs"),
            "f33382b0f35c515a0a91b011359a19bb47ee66a4"
        );
        assert_eq!(
            sign("query-api-key", "/api/queries/7/results", 1_900_000_000)
                .expect("non-empty key signs"),
            "976f427ccfcadfde6cedd1376126650657ecd817"
        );
    }

    #[test]
    fn sign_empty_key_is_none() {
        assert_eq!(sign("", "/api/queries/42", 1_722_000_000), None);
    }

    #[test]
    fn sign_differs_per_expiry() {
        let a = sign("k", "/p", 1).expect("signs");
        let b = sign("k", "/p", 2).expect("signs");
        assert_ne!(a, b);
    }

    #[test]
    fn encode_params_quotes_like_reference() {
        let mut params = BTreeMap::new();
        params.insert(
            "p_time".to_string(),
            "['2021-01-01', '2022-12-31']".to_string(),
        );
        params.insert("path".to_string(), "a/b c".to_string());
        params.insert("type".to_string(), "游戏".to_string());

        assert_eq!(
            encode_params(&params),
            "p_time=%5B%272021-01-01%27%2C%20%272022-12-31%27%5D&path=a/b%20c&type=%E6%B8%B8%E6%88%8F"
        );
    }

    #[test]
    fn canonical_url_sorts_decodes_and_strips_signature() {
        let url = "http://localhost/acme/embed/dashboard/5?secret_key=KEY123&timestamp=1722000000&p_type=%E6%B8%B8%E6%88%8F&max_age=3600&signature=deadbeef&empty=&p_countries=['us',+'ke']";
        assert_eq!(
            canonical_signing_url(url),
            "http://localhost/acme/embed/dashboard/5?empty=&max_age=3600&p_countries=%5B%27us%27%2C%20%27ke%27%5D&p_type=%E6%B8%B8%E6%88%8F&secret_key=KEY123&timestamp=1722000000"
        );
    }

    #[test]
    fn canonical_url_first_value_wins() {
        assert_eq!(
            canonical_signing_url("https://bi.example.com/embed/dashboard/9?b=2&a=1&a=9&c="),
            "https://bi.example.com/embed/dashboard/9?a=1&b=2&c="
        );
    }

    #[test]
    fn canonical_url_preserves_fragment() {
        assert_eq!(
            canonical_signing_url("http://h/x?b=1&a=2#frag"),
            "http://h/x?a=2&b=1#frag"
        );
    }

    #[test]
    fn canonical_url_without_query_unchanged() {
        assert_eq!(canonical_signing_url("http://h/path"), "http://h/path");
    }

    #[test]
    fn canonical_url_empty_query_drops_question_mark() {
        assert_eq!(canonical_signing_url("http://h/path?"), "http://h/path");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonical_signing_url(
            "http://localhost/embed/dashboard/5?z=9&a=['x', 'y']&m=游戏&empty=",
        );
        let twice = canonical_signing_url(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn canonicalization_ignores_input_order() {
        let a = canonical_signing_url("http://h/p?x=1&y=2&z=3");
        let b = canonical_signing_url("http://h/p?z=3&x=1&y=2");
        assert_eq!(a, b);
    }

    #[test]
    fn embed_signature_known_answer() {
        let sig = embed_signature(
            "token-secret",
            "http://localhost/acme/embed/dashboard/5?secret_key=KEY123&timestamp=1722000000",
            1_722_000_000,
        )
        .expect("non-empty token signs");
        assert_eq!(
            sig,
            "6f680f38bbd1817a05125f6afad226df8d7ee434f95b425eca3a55b99133b3a4"
        );
    }

    #[test]
    fn embed_signature_known_answer_unsorted_input() {
        let sig = embed_signature(
            "s3cr3t-t0k3n",
            "https://bi.example.com/embed/dashboard/9?b=2&a=1&a=9&c=",
            1_700_000_123,
        )
        .expect("non-empty token signs");
        assert_eq!(
            sig,
            "2fda47dc9c81eac82ecc1d084e823663d7712a84a4adaf6f80a777ecaff97b28"
        );
    }

    #[test]
    fn embed_signature_canonicalizes_bare_question_mark() {
        let sig = embed_signature("k", "http://h/path?", 5).expect("non-empty token signs");
        assert_eq!(
            sig,
            "1e3cc69e027531071df1723cb30bdb0d5a91560d6dc6f478668d64ab5b007d6c"
        );
    }

    #[test]
    fn verify_accepts_signature_with_or_without_signature_param() {
        let base = "http://localhost/embed/dashboard/3?secret_key=K&timestamp=42";
        let sig = embed_signature("tok", base, 42).expect("signs");

        assert!(verify_embed_signature("tok", base, 42, &sig));
        let with_sig = format!("{base}&signature={sig}");
        assert!(verify_embed_signature("tok", &with_sig, 42, &sig));
    }

    #[test]
    fn verify_rejects_bit_flip() {
        let base = "http://localhost/embed/dashboard/3?secret_key=K&timestamp=42";
        let sig = embed_signature("tok", base, 42).expect("signs");

        let mut flipped = sig.clone().into_bytes();
        flipped[0] = if flipped[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(flipped).expect("ascii hex");

        assert!(!verify_embed_signature("tok", base, 42, &flipped));
        assert!(!verify_embed_signature("tok", base, 42, &sig[..sig.len() - 1]));
    }

    #[test]
    fn verify_empty_token_never_passes() {
        assert!(!verify_embed_signature("", "http://h/p", 1, ""));
        assert_eq!(embed_signature("", "http://h/p", 1), None);
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_str_eq("abc", "abc"));
        assert!(!constant_time_str_eq("abc", "abd"));
        assert!(!constant_time_str_eq("abc", "abcd"));
        assert!(constant_time_str_eq("", ""));
    }
}
