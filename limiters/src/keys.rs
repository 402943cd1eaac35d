//! Rate-limit keys follow the convention `<feature>:<scope>:<hashedDiscriminator>`,
//! e.g. `authLogin:ip:9f8a...`. The discriminator segment must already be an
//! opaque token (see [`crate::hashing::hash_identifier`]); the limiter does not
//! hash on the caller's behalf.

use sha2::{Digest, Sha256};

/// Fallback partition for keys with no usable segments.
pub const DEFAULT_PARTITION: &str = "default";

/// Coarse storage-locality grouping for a rate-limit key: the join of
/// its first two segments. Human-readable and safe to group by on
/// dashboards, since the sensitive discriminator is never included.
/// Used only for storage locality, never for authorization decisions.
pub fn partition_of(key: &str) -> String {
    let mut segments = key.split(':');
    match (segments.next().filter(|s| !s.is_empty()), segments.next()) {
        (Some(feature), Some(scope)) => format!("{feature}:{scope}"),
        (Some(feature), None) => feature.to_string(),
        (None, _) => DEFAULT_PARTITION.to_string(),
    }
}

/// Storage row key: digest of the full rate-limit key. Unique per
/// discriminator without storing the discriminator segment twice.
pub fn row_key_of(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_uses_first_two_segments() {
        assert_eq!(partition_of("authLogin:ip:9f8a"), "authLogin:ip");
        assert_eq!(partition_of("signup:email:abc:extra"), "signup:email");
    }

    #[test]
    fn partition_falls_back_to_first_segment() {
        assert_eq!(partition_of("authLogin"), "authLogin");
    }

    #[test]
    fn empty_key_maps_to_default_partition() {
        assert_eq!(partition_of(""), DEFAULT_PARTITION);
    }

    #[test]
    fn row_key_is_stable_and_omits_the_raw_key() {
        let key = "authLogin:ip:9f8a";
        assert_eq!(row_key_of(key), row_key_of(key));
        assert_ne!(row_key_of(key), row_key_of("authLogin:ip:other"));
        assert!(!row_key_of(key).contains("authLogin"));
    }
}
