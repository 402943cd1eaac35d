use sha2::{Digest, Sha256};

/// Hash a sensitive identifier (IP, email, username) into an opaque
/// token before it reaches storage or logs.
///
/// Input is trimmed and lower-cased first so case/whitespace variants
/// of the same identifier collide to the same token. The digest is
/// one-way; raw identifiers are never persisted. Empty input hashes to
/// the fixed digest of the empty string, which callers treat as an
/// "unknown" identifier class.
pub fn hash_identifier(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::hash_identifier;

    #[test]
    fn case_and_whitespace_variants_collide() {
        assert_eq!(
            hash_identifier("USER@Example.com"),
            hash_identifier("user@example.com")
        );
        assert_eq!(
            hash_identifier("  10.0.0.1  "),
            hash_identifier("10.0.0.1")
        );
    }

    #[test]
    fn distinct_identifiers_do_not_collide() {
        assert_ne!(
            hash_identifier("user@example.com"),
            hash_identifier("other@example.com")
        );
    }

    #[test]
    fn output_is_hex_and_irreversible() {
        let token = hash_identifier("user@example.com");
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!token.contains("user"));
        assert!(!token.contains("example"));
    }

    #[test]
    fn empty_input_has_a_fixed_token() {
        // sha256 of the empty string
        assert_eq!(
            hash_identifier(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_identifier("   "), hash_identifier(""));
    }
}
