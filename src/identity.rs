//! Content-derived article identity.
//!
//! The same story reported under several feeds (or re-fetched on a later
//! run) must map to one identity. The fingerprint is derived from the
//! cleaned title and the source name only, so link tracking parameters or
//! re-published timestamps never split an article in two.
//!
//! The digest is the 10-character SHA-1 prefix earlier batch files already
//! carry in their `uid` column, so rows from those files and freshly hashed
//! rows meet on the same key.

use sha1::{Digest, Sha1};

/// Number of hex characters kept from the digest. Used for every identity
/// in the system (`uid` in batch files, `index_id` in the master index).
pub const IDENTITY_LEN: usize = 10;

/// Fingerprint a `(title, source)` pair.
///
/// The input is the case-sensitive concatenation `title + "_" + source`.
/// Empty strings are accepted.
///
/// # Examples
///
/// ```ignore
/// let id = hash("Sube el dólar", "Infobae");
/// assert_eq!(id.len(), 10);
/// ```
pub fn hash(title: &str, source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(title.as_bytes());
    hasher.update(b"_");
    hasher.update(source.as_bytes());
    hex::encode(&hasher.finalize()[..IDENTITY_LEN / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = hash("Inflación de mayo", "Ámbito");
        let b = hash("Inflación de mayo", "Ámbito");
        assert_eq!(a, b);
        assert_eq!(a.len(), IDENTITY_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_known_value() {
        // sha1("a_b")[..10]
        assert_eq!(hash("a", "b"), "eb2980a5a2");
        assert_eq!(hash("Bonos", "Clarín"), "4991ba2573");
        assert_eq!(hash("", ""), "53a0acfad5");
    }

    #[test]
    fn test_hash_is_case_sensitive() {
        assert_ne!(hash("Dólar", "Clarín"), hash("dólar", "Clarín"));
    }

    #[test]
    fn test_hash_separator_matters() {
        // "a_" + "b" and "a" + "_b" collide by construction; a different split does not
        assert_ne!(hash("ab", "c"), hash("a", "bc"));
    }

    #[test]
    fn test_hash_accepts_empty() {
        assert_eq!(hash("", "").len(), IDENTITY_LEN);
    }
}
