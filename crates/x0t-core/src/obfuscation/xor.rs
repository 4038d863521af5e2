//! XOR layer with a SHA-256 counter-mode keystream

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// SHA-256 counter-mode XOR obfuscator
///
/// Block `i` of the keystream is `SHA256(current_key || be64(counter + i))`.
/// The counter advances by one per call, independently for each direction, so
/// two instances created from the same key stay in step packet by packet.
pub struct XorObfuscator {
    current_key: Zeroizing<Vec<u8>>,
    rotate: bool,
    encrypt_counter: u64,
    decrypt_counter: u64,
}

impl XorObfuscator {
    /// Create an obfuscator; a random 32-byte key is generated when `key` is None
    pub fn new(key: Option<Vec<u8>>, rotate: bool) -> Self {
        let key = key.unwrap_or_else(|| {
            let mut k = vec![0u8; 32];
            OsRng.fill_bytes(&mut k);
            k
        });
        Self {
            current_key: Zeroizing::new(key),
            rotate,
            encrypt_counter: 0,
            decrypt_counter: 0,
        }
    }

    /// XOR `data` with the next outbound keystream
    pub fn encrypt(&mut self, data: &[u8]) -> Vec<u8> {
        let out = apply_keystream(&self.current_key, self.encrypt_counter, data);
        self.encrypt_counter = self.encrypt_counter.wrapping_add(1);
        out
    }

    /// XOR `data` with the next inbound keystream
    pub fn decrypt(&mut self, data: &[u8]) -> Vec<u8> {
        let out = apply_keystream(&self.current_key, self.decrypt_counter, data);
        self.decrypt_counter = self.decrypt_counter.wrapping_add(1);
        out
    }

    /// Replace the key with `SHA256(current_key || random16)` and reset the counters.
    /// No-op when rotation is disabled.
    pub fn rotate_key(&mut self) {
        if !self.rotate {
            return;
        }
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let mut hasher = Sha256::new();
        hasher.update(self.current_key.as_slice());
        hasher.update(salt);
        self.current_key = Zeroizing::new(hasher.finalize().to_vec());
        self.encrypt_counter = 0;
        self.decrypt_counter = 0;
    }
}

impl std::fmt::Debug for XorObfuscator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XorObfuscator")
            .field("rotate", &self.rotate)
            .field("encrypt_counter", &self.encrypt_counter)
            .field("decrypt_counter", &self.decrypt_counter)
            .finish_non_exhaustive()
    }
}

fn apply_keystream(key: &[u8], start: u64, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut counter = start;
    for chunk in data.chunks(32) {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(counter.to_be_bytes());
        let block = hasher.finalize();
        out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
        counter = counter.wrapping_add(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_instances_stay_in_step() {
        let key = vec![0x42; 32];
        let mut tx = XorObfuscator::new(Some(key.clone()), false);
        let mut rx = XorObfuscator::new(Some(key), false);

        for msg in [&b"first"[..], &b"second packet, longer than one block of keystream"[..]] {
            let ct = tx.encrypt(msg);
            assert_ne!(ct.as_slice(), msg);
            assert_eq!(rx.decrypt(&ct), msg);
        }
    }

    #[test]
    fn test_counter_changes_keystream() {
        let mut xor = XorObfuscator::new(Some(vec![1; 32]), false);
        let a = xor.encrypt(&[0; 16]);
        let b = xor.encrypt(&[0; 16]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rotation_disabled_keeps_key() {
        let mut a = XorObfuscator::new(Some(vec![9; 32]), false);
        let mut b = XorObfuscator::new(Some(vec![9; 32]), false);
        a.rotate_key();
        assert_eq!(a.encrypt(b"same"), b.encrypt(b"same"));
    }

    #[test]
    fn test_rotation_changes_key() {
        let mut a = XorObfuscator::new(Some(vec![9; 32]), true);
        let mut b = XorObfuscator::new(Some(vec![9; 32]), true);
        a.rotate_key();
        assert_ne!(a.encrypt(&[0; 32]), b.encrypt(&[0; 32]));
    }
}
