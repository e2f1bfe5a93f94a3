//! Randomness shared by resolution and container naming
//!
//! One seedable generator backs both the replica pick and the container-name
//! suffix, so a seeded engine behaves the same on every run.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Characters used for container-name suffixes
///
/// Lowercase alphanumerics keep the name a valid DNS label. `0` is left out.
pub const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz123456789";

/// Default length of the random container-name suffix
pub const DEFAULT_SUFFIX_LENGTH: usize = 9;

/// Random source shared across concurrently running tests
#[derive(Clone)]
pub struct SharedRng(Arc<Mutex<StdRng>>);

impl SharedRng {
    /// Generator seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self(Arc::new(Mutex::new(StdRng::from_entropy())))
    }

    /// Deterministic generator, for reproducible runs and tests
    pub fn seeded(seed: u64) -> Self {
        Self(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn pick_index(&self, len: usize) -> usize {
        self.0.lock().gen_range(0..len)
    }

    /// Random string of `length` characters from [`SUFFIX_CHARSET`]
    pub fn suffix(&self, length: usize) -> String {
        let mut rng = self.0.lock();
        (0..length)
            .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
            .collect()
    }

    /// `prefix-suffix` container name
    pub fn container_name(&self, prefix: &str, suffix_length: usize) -> String {
        format!("{}-{}", prefix, self.suffix(suffix_length))
    }
}

impl Default for SharedRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedRng")
    }
}

/// Fresh per-test token shared by a scanner's MESSAGE and a sniffer's SEARCH_STRING
pub fn correlation_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_uses_charset_and_length() {
        let rng = SharedRng::seeded(7);
        let suffix = rng.suffix(32);
        assert_eq!(suffix.len(), 32);
        assert!(suffix.bytes().all(|b| SUFFIX_CHARSET.contains(&b)));
        assert!(rng.suffix(0).is_empty());
    }

    #[test]
    fn test_container_name_has_prefix() {
        let rng = SharedRng::seeded(1);
        let name = rng.container_name("netassertv2-client", DEFAULT_SUFFIX_LENGTH);
        assert!(name.starts_with("netassertv2-client-"));
        assert_eq!(name.len(), "netassertv2-client-".len() + DEFAULT_SUFFIX_LENGTH);
    }

    #[test]
    fn test_seeded_generators_agree() {
        let a = SharedRng::seeded(42);
        let b = SharedRng::seeded(42);
        assert_eq!(a.suffix(12), b.suffix(12));
        assert_eq!(a.pick_index(1000), b.pick_index(1000));
    }

    #[test]
    fn test_pick_index_in_range() {
        let rng = SharedRng::seeded(3);
        for _ in 0..100 {
            assert!(rng.pick_index(5) < 5);
        }
        assert_eq!(rng.pick_index(1), 0);
    }

    #[test]
    fn test_correlation_tokens_are_unique() {
        assert_ne!(correlation_token(), correlation_token());
        assert_eq!(correlation_token().len(), 36);
    }
}
