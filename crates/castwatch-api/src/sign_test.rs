use std::time::Duration;

use super::*;

const KEY_A: &str = "7cd084941338484aae1ad9425b84077c";
const KEY_B: &str = "4932caff0ff746eab6f01bf08b70ac45";

fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn mixing_key_is_32_chars() {
    assert_eq!(mixing_key(KEY_A, KEY_B).len(), 32);
}

#[test]
fn mixing_key_is_deterministic() {
    assert_eq!(mixing_key(KEY_A, KEY_B), mixing_key(KEY_A, KEY_B));
}

#[test]
fn mixing_key_depends_on_both_keys() {
    let base = mixing_key(KEY_A, KEY_B);
    assert_ne!(base, mixing_key(KEY_B, KEY_A));
    assert_ne!(base, mixing_key(KEY_A, "0000000000000000000000000000000a"));
}

#[test]
fn signed_query_is_deterministic_for_fixed_inputs() {
    let p = params(&[("uid", "42"), ("offset", "0")]);
    let first = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    let second = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    assert_eq!(first, second);
}

#[test]
fn signed_query_sorts_keys_and_injects_ts() {
    let p = params(&[("zeta", "1"), ("alpha", "2")]);
    let query = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    let alpha = query.find("alpha=2").unwrap();
    let ts = query.find("ts=1700000000").unwrap();
    let zeta = query.find("zeta=1").unwrap();
    assert!(alpha < ts && ts < zeta, "expected sorted order in {query}");
}

#[test]
fn signed_query_appends_32_hex_signature() {
    let p = params(&[("uid", "42")]);
    let query = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    let (_, signature) = query.rsplit_once("&signature=").unwrap();
    assert_eq!(signature.len(), 32);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn signed_query_strips_special_chars_from_values() {
    let p = params(&[("q", "a!b'c(d)e*f")]);
    let query = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    assert!(query.starts_with("q=abcdef&"), "got: {query}");
}

#[test]
fn signed_query_percent_encodes_values() {
    let p = params(&[("q", "a b/c")]);
    let query = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    assert!(query.starts_with("q=a%20b%2Fc&"), "got: {query}");
}

#[test]
fn different_timestamp_changes_signature() {
    let p = params(&[("uid", "42")]);
    let a = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_000);
    let b = signed_query_with(&p, KEY_A, KEY_B, 1_700_000_001);
    let sig = |q: &str| q.rsplit_once("&signature=").map(|(_, s)| s.to_string());
    assert_ne!(sig(&a), sig(&b));
}

#[test]
fn signer_fresh_within_ttl_and_stale_after() {
    let signer = Signer::new(Duration::from_secs(300));
    assert!(signer.fresh().is_none());
    assert!(signer.stale().is_none());

    signer.store(KEY_A, KEY_B);
    assert_eq!(
        signer.fresh(),
        Some((KEY_A.to_string(), KEY_B.to_string()))
    );

    let expired = Signer::new(Duration::ZERO);
    expired.store(KEY_A, KEY_B);
    assert!(expired.fresh().is_none());
    assert_eq!(
        expired.stale(),
        Some((KEY_A.to_string(), KEY_B.to_string()))
    );
}
