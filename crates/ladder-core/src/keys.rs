//! Decryption key bookkeeping
//!
//! Key material is downloaded once per key URI and shared by every chunk that
//! references it. Failures are counted per key; a key that reached the retry
//! cap stays failed for the rest of the session.

use crate::types::KeyInfo;
use std::collections::HashMap;
use url::Url;

/// AES-128 key length in bytes
pub const KEY_LENGTH: usize = 16;

/// Resolution state of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Not downloaded yet; a fetch may be started
    Missing,
    /// Key material is available
    Ready([u8; KEY_LENGTH]),
    /// Gave up after too many failures
    Failed,
}

#[derive(Debug, Default)]
struct KeyEntry {
    bytes: Option<[u8; KEY_LENGTH]>,
    retries: u32,
}

/// Downloaded key material and retry counters, keyed by key URI
#[derive(Debug)]
pub struct KeyStore {
    entries: HashMap<Url, KeyEntry>,
    max_retries: u32,
}

impl KeyStore {
    pub fn new(max_retries: u32) -> Self {
        Self {
            entries: HashMap::new(),
            max_retries,
        }
    }

    pub fn status(&self, uri: &Url) -> KeyStatus {
        match self.entries.get(uri) {
            Some(KeyEntry {
                bytes: Some(bytes), ..
            }) => KeyStatus::Ready(*bytes),
            Some(entry) if entry.retries >= self.max_retries => KeyStatus::Failed,
            _ => KeyStatus::Missing,
        }
    }

    /// Store a downloaded key.
    ///
    /// Returns false, and counts a failure, when the payload has the wrong length.
    pub fn store(&mut self, uri: &Url, payload: &[u8]) -> bool {
        match <[u8; KEY_LENGTH]>::try_from(payload) {
            Ok(bytes) => {
                self.entries.entry(uri.clone()).or_default().bytes = Some(bytes);
                true
            }
            Err(_) => {
                self.record_failure(uri);
                false
            }
        }
    }

    /// Count a failed download and return the new retry count
    pub fn record_failure(&mut self, uri: &Url) -> u32 {
        let entry = self.entries.entry(uri.clone()).or_default();
        entry.retries += 1;
        entry.retries
    }

    pub fn retries(&self, uri: &Url) -> u32 {
        self.entries.get(uri).map(|e| e.retries).unwrap_or(0)
    }

    /// True when another attempt is allowed
    pub fn can_retry(&self, uri: &Url) -> bool {
        self.retries(uri) < self.max_retries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Initialization vector for a chunk.
///
/// Uses the explicit IV when the key declares one, else the chunk's absolute
/// sequence number as a big-endian 128-bit integer.
pub fn derive_iv(key: &KeyInfo, sequence: u64) -> [u8; 16] {
    key.iv
        .unwrap_or_else(|| u128::from(sequence).to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_url() -> Url {
        Url::parse("https://keys.test/k1").unwrap()
    }

    #[test]
    fn test_store_and_status() {
        let mut store = KeyStore::new(2);
        let uri = key_url();
        assert_eq!(store.status(&uri), KeyStatus::Missing);

        assert!(store.store(&uri, &[7u8; 16]));
        assert_eq!(store.status(&uri), KeyStatus::Ready([7u8; 16]));
    }

    #[test]
    fn test_malformed_key_counts_as_failure() {
        let mut store = KeyStore::new(2);
        let uri = key_url();
        assert!(!store.store(&uri, &[1u8; 15]));
        assert_eq!(store.retries(&uri), 1);
        assert!(store.can_retry(&uri));
        assert_eq!(store.status(&uri), KeyStatus::Missing);

        assert_eq!(store.record_failure(&uri), 2);
        assert!(!store.can_retry(&uri));
        assert_eq!(store.status(&uri), KeyStatus::Failed);
    }

    #[test]
    fn test_derive_iv() {
        let key = KeyInfo::new(key_url());
        let iv = derive_iv(&key, 0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(iv[14], 0x01);
        assert_eq!(iv[15], 0x02);

        let explicit = KeyInfo::new(key_url()).with_iv([9u8; 16]);
        assert_eq!(derive_iv(&explicit, 5), [9u8; 16]);
    }
}
