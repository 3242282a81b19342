//! Signed-request support for the upstream's tamper-protected endpoints.
//!
//! The upstream requires protected query strings to carry a current unix
//! timestamp plus an MD5 signature over the sorted, encoded parameters and a
//! mixing key. The mixing key is derived from a rotating key pair by running
//! the concatenated pair through a fixed permutation table and truncating to
//! 32 characters. The table is an opaque constant borrowed from the platform
//! itself; it must match byte-for-byte or every signed call is rejected.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Fixed 64-entry permutation used to derive the mixing key.
const MIXIN_TABLE: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22,
    25, 54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Characters the upstream strips from parameter values before signing.
const STRIPPED_CHARS: &[char] = &['!', '\'', '(', ')', '*'];

/// RFC 3986: everything but unreserved characters gets percent-encoded.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Derives the 32-character mixing key from the rotating key pair.
///
/// Deterministic: the same pair always yields the same key.
#[must_use]
pub fn mixing_key(key_a: &str, key_b: &str) -> String {
    let combined: Vec<char> = format!("{key_a}{key_b}").chars().collect();
    MIXIN_TABLE
        .iter()
        .filter_map(|&i| combined.get(i))
        .take(32)
        .collect()
}

/// Builds the signed query string for `params` with an explicit timestamp.
///
/// Steps: inject `ts`, sort keys lexicographically, strip `!'()*` from
/// values, percent-encode keys and values, join as `k=v&...`, then append
/// `signature=md5(query + mixing_key)`.
///
/// The timestamp is a parameter (rather than read inside) so tests can pin
/// it and assert exact output.
#[must_use]
pub fn signed_query_with(params: &[(String, String)], key_a: &str, key_b: &str, ts: i64) -> String {
    let key = mixing_key(key_a, key_b);

    let mut entries: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            let cleaned: String = v.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();
            (k.clone(), cleaned)
        })
        .collect();
    entries.push(("ts".to_string(), ts.to_string()));
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let query = entries
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, QUERY_ENCODE),
                utf8_percent_encode(v, QUERY_ENCODE)
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(query.as_bytes());
    hasher.update(key.as_bytes());
    let signature = format!("{:x}", hasher.finalize());

    format!("{query}&signature={signature}")
}

struct CachedKeys {
    key_a: String,
    key_b: String,
    fetched_at: Instant,
}

/// Cache for the rotating signing key pair.
///
/// Refresh is driven by the facade (it owns the network path); the cache only
/// answers "is the pair still fresh" and keeps the last good pair around as a
/// stale fallback so signing never hard-fails once a pair has been seen.
pub struct Signer {
    ttl: Duration,
    cache: Mutex<Option<CachedKeys>>,
}

impl Signer {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Returns the cached pair if it is within its TTL.
    #[must_use]
    pub fn fresh(&self) -> Option<(String, String)> {
        let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| (c.key_a.clone(), c.key_b.clone()))
    }

    /// Returns whatever pair is cached, regardless of age.
    #[must_use]
    pub fn stale(&self) -> Option<(String, String)> {
        let guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.as_ref().map(|c| (c.key_a.clone(), c.key_b.clone()))
    }

    pub fn store(&self, key_a: &str, key_b: &str) {
        let mut guard = self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(CachedKeys {
            key_a: key_a.to_string(),
            key_b: key_b.to_string(),
            fetched_at: Instant::now(),
        });
    }
}

#[cfg(test)]
#[path = "sign_test.rs"]
mod tests;
