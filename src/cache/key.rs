use sha2::{Digest, Sha256};

/// Namespace for result cache keys in the shared store
pub const KEY_PREFIX: &str = "pincart:cache:";

/// Hex characters of the digest kept in a key
const HASH_LEN: usize = 16;

/// Derive the store key for `(prefix, identifier)`
///
/// The digest covers both parts, with the prefix length-prefixed so that
/// `("ab", "c")` and `("a", "bc")` hash differently. The prefix is also kept
/// in clear so entries of one namespace are easy to find.
pub fn cache_key(prefix: &str, identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((prefix.len() as u64).to_be_bytes());
    hasher.update(prefix.as_bytes());
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();

    let mut hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hash.truncate(HASH_LEN);

    format!("{}{}:{}", KEY_PREFIX, prefix, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(
            cache_key("discover", "home decor"),
            cache_key("discover", "home decor")
        );
    }

    #[test]
    fn test_key_shape() {
        let key = cache_key("discover", "home decor");
        assert!(key.starts_with("pincart:cache:discover:"));
        assert_eq!(key.len(), "pincart:cache:discover:".len() + HASH_LEN);
        assert!(key
            .rsplit(':')
            .next()
            .unwrap()
            .chars()
            .all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_identifiers_differ() {
        assert_ne!(
            cache_key("discover", "home decor"),
            cache_key("discover", "pet accessories")
        );
    }

    #[test]
    fn test_prefix_is_part_of_the_hash() {
        let a = cache_key("discover", "lamp");
        let b = cache_key("match", "lamp");
        assert_ne!(a.rsplit(':').next(), b.rsplit(':').next());
    }

    #[test]
    fn test_boundary_between_prefix_and_identifier() {
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
        assert_ne!(
            cache_key("ab", "c").rsplit(':').next(),
            cache_key("a", "bc").rsplit(':').next()
        );
    }

    #[test]
    fn test_long_identifier_is_bounded() {
        let long = "x".repeat(10_000);
        assert_eq!(cache_key("match", &long).len(), cache_key("match", "x").len());
    }
}
