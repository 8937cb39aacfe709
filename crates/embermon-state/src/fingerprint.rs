//! Stable label-set fingerprints.
//!
//! Fingerprints are cache keys and storage keys at the same time, so the
//! hash must reproduce exactly across restarts and releases; std's
//! default hasher gives no such guarantee. This is 64-bit FNV-1a over
//! the label pairs sorted by key, with sentinel bytes between fields so
//! `{a: "bc"}` and `{ab: "c"}` cannot collide by concatenation.

use std::collections::HashMap;

use crate::error::StateError;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const SEP_FIELD: u8 = 0xfe;
const SEP_PAIR: u8 = 0xff;

/// Deterministic, order-independent 64-bit hash of a label set.
///
/// The empty set maps to the FNV offset basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16)
            .map(Fingerprint)
            .map_err(|_| StateError::InvalidFingerprint(s.to_string()))
    }
}

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    let mut hash = hash;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Fingerprint a label set, independent of key insertion order.
pub fn fingerprint(labels: &HashMap<String, String>) -> Fingerprint {
    if labels.is_empty() {
        return Fingerprint(FNV_OFFSET_BASIS);
    }

    let mut pairs: Vec<(&str, &str)> = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort();

    let mut hash = FNV_OFFSET_BASIS;
    for (k, v) in pairs {
        hash = fnv1a(hash, k.as_bytes());
        hash = fnv1a(hash, &[SEP_FIELD]);
        hash = fnv1a(hash, v.as_bytes());
        hash = fnv1a(hash, &[SEP_PAIR]);
    }
    Fingerprint(hash)
}

/// Fingerprint a captured-values map, so "same state, different numbers"
/// is detectable. Floats hash by bit pattern; absent captures hash as a
/// distinct sentinel.
pub fn fingerprint_values(values: &HashMap<String, Option<f64>>) -> Fingerprint {
    if values.is_empty() {
        return Fingerprint(FNV_OFFSET_BASIS);
    }

    let mut names: Vec<&str> = values.keys().map(String::as_str).collect();
    names.sort_unstable();

    let mut hash = FNV_OFFSET_BASIS;
    for name in names {
        hash = fnv1a(hash, name.as_bytes());
        hash = fnv1a(hash, &[SEP_FIELD]);
        match values[name] {
            Some(v) => hash = fnv1a(hash, &v.to_bits().to_be_bytes()),
            None => hash = fnv1a(hash, &[SEP_FIELD]),
        }
        hash = fnv1a(hash, &[SEP_PAIR]);
    }
    Fingerprint(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_set_maps_to_offset_basis() {
        assert_eq!(fingerprint(&HashMap::new()), Fingerprint(FNV_OFFSET_BASIS));
    }

    #[test]
    fn stable_across_calls_and_insertion_order() {
        let a = labels(&[("host", "web-01"), ("mount", "/data"), ("job", "node")]);
        let mut b = HashMap::new();
        b.insert("job".to_string(), "node".to_string());
        b.insert("host".to_string(), "web-01".to_string());
        b.insert("mount".to_string(), "/data".to_string());

        assert_eq!(fingerprint(&a), fingerprint(&a));
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn field_boundaries_matter() {
        let a = labels(&[("a", "bc")]);
        let b = labels(&[("ab", "c")]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn hex_round_trip() {
        let fp = fingerprint(&labels(&[("host", "web-01")]));
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(parsed, fp);

        assert!("not-hex".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn value_fingerprint_tracks_numbers() {
        let mut v1 = HashMap::new();
        v1.insert("B".to_string(), Some(96.2));
        let mut v2 = HashMap::new();
        v2.insert("B".to_string(), Some(42.0));
        let mut v3 = HashMap::new();
        v3.insert("B".to_string(), None);

        assert_eq!(fingerprint_values(&v1), fingerprint_values(&v1));
        assert_ne!(fingerprint_values(&v1), fingerprint_values(&v2));
        assert_ne!(fingerprint_values(&v1), fingerprint_values(&v3));
    }
}
