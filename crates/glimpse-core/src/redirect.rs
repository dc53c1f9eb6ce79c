//! # Post-Login Redirect Sanitization
//!
//! The login flow carries a `next` parameter naming where to send the
//! user afterwards. That value comes from the request, so it must never
//! be allowed to point at another origin.
//!
//! [`safe_next_path`] strips the scheme and the authority component and
//! repeats until neither is left. A single pass is not enough: stacked
//! slashes (`////evil.example/x`) rebuild a protocol-relative URL, and a
//! throwaway scheme (`x:https://evil.example/x`) hides a second one
//! behind the first. The result is a same-origin path with query and
//! fragment intact.

/// Reduce an untrusted redirect target to a same-origin path.
///
/// Empty input stays empty (no redirect requested). Input that was
/// nothing but scheme and authority collapses to `"./"`.
#[must_use]
pub fn safe_next_path(unsafe_next: &str) -> String {
    if unsafe_next.is_empty() {
        return String::new();
    }

    let mut rest = unsafe_next;
    loop {
        let mut stripped = strip_scheme(rest);
        while let Some(after) = stripped.strip_prefix("//") {
            let end = after.find(['/', '?', '#']).unwrap_or(after.len());
            stripped = &after[end..];
        }
        if stripped == rest {
            break;
        }
        rest = stripped;
    }

    if rest.is_empty() {
        "./".to_string()
    } else {
        rest.to_string()
    }
}

/// Drop a leading `scheme:` if present.
///
/// A scheme is an ASCII letter followed by letters, digits, `+`, `-` or
/// `.`, up to the first `:`. Anything else (including a `:` later in the
/// path) is left alone.
fn strip_scheme(url: &str) -> &str {
    let Some(colon) = url.find(':') else {
        return url;
    };
    if colon == 0 {
        return url;
    }

    let candidate = &url[..colon];
    let mut chars = candidate.chars();
    let leading_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if leading_alpha && rest_valid {
        &url[colon + 1..]
    } else {
        url
    }
}
