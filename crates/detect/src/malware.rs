use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of raw file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Append-only set of known-malicious content fingerprints.
#[derive(Debug, Default)]
pub struct MalwareHashRegistry {
    hashes: RwLock<HashSet<String>>,
}

impl MalwareHashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for hash in hashes {
            registry.add(hash.as_ref());
        }
        registry
    }

    pub fn contains(&self, hash: &str) -> bool {
        // Entries are never removed, so a poisoned lock still holds a valid set.
        self.hashes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&normalize(hash))
    }

    /// Returns `true` when the hash was not already registered.
    pub fn add(&self, hash: &str) -> bool {
        let normalized = normalize(hash);
        if normalized.is_empty() {
            return false;
        }
        self.hashes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalized)
    }

    pub fn len(&self) -> usize {
        self.hashes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn identical_content_hashes_identically() {
        assert_eq!(content_hash(b"payload"), content_hash(b"payload"));
        assert_ne!(content_hash(b"payload"), content_hash(b"payload2"));
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = MalwareHashRegistry::from_hashes(["ABCDEF"]);
        assert!(registry.contains("abcdef"));
        assert!(registry.contains(" ABCDEF "));
        assert!(!registry.contains("abcde0"));
    }

    #[test]
    fn add_reports_new_entries_only() {
        let registry = MalwareHashRegistry::new();
        assert!(registry.add("deadbeef"));
        assert!(!registry.add("DEADBEEF"));
        assert!(!registry.add("   "));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_readers_see_appended_hashes() {
        let registry = Arc::new(MalwareHashRegistry::new());
        let writers = (0..4)
            .map(|index| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.add(&content_hash(format!("sample-{index}").as_bytes()));
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        assert_eq!(registry.len(), 4);
        for index in 0..4 {
            assert!(registry.contains(&content_hash(format!("sample-{index}").as_bytes())));
        }
    }
}
