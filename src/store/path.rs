//! Virtual-path normalization.
//!
//! Packages refer to the same logical file with wildly different spellings:
//! backslashes, doubled separators, missing leading slash. Everything in the
//! engine keys on the normalized form, so normalization must be idempotent
//! and cheap. Callers that normalize in a loop go through
//! [`crate::store::ContentStore::normalize`], which memoizes by raw input.

use crate::types::NormalizedPath;

/// Normalize a raw path string: backslashes to forward slashes, repeated
/// slashes collapsed, forced leading slash.
pub fn normalize(raw: &str) -> NormalizedPath {
    let mut out = String::with_capacity(raw.len() + 1);
    out.push('/');
    let mut prev_slash = true;
    for ch in raw.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(ch);
            prev_slash = false;
        }
    }
    // Keep "/" for the root itself, otherwise drop a trailing slash.
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    NormalizedPath(out)
}
