//! Steganographic codec
//!
//! Wraps an encrypted, authenticated payload in a cover-protocol header:
//!
//! ```text
//! header(mimic) || base64(nonce16 || hmac32 || ciphertext) || noise(2..=11)
//! ```
//!
//! The session key and nonce come from a BLAKE3 XOF over
//! `master_key || first 32 payload bytes (zero padded)`. The decoder always
//! derives its key from an all-zero prefix, so only payloads whose first 32
//! bytes are zero decrypt to the original plaintext; every other packet still
//! authenticates but yields unrelated bytes. Callers must treat `decode` as
//! best effort.
//!
//! [`carrier`] hides payloads in DNS names, HTTP headers and text instead.

pub mod carrier;
mod mimic;

pub use carrier::ProtocolCarrier;
pub use mimic::{MimicProtocol, DNS_MARKER, HTTP_MARKER, ICMP_MARKER};

use crate::dpi::find;
use crate::error::{Error, Result};
use crate::evasion::Dna;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, trace};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// Minimum master key length in bytes
pub const MIN_KEY_LEN: usize = 32;
/// Nonce length inside the packet body
pub const NONCE_LEN: usize = 16;
/// HMAC tag length inside the packet body
pub const TAG_LEN: usize = 32;
/// Payload bytes mixed into the key derivation
pub const PREFIX_LEN: usize = 32;

const HMAC_DERIVATION_LABEL: &[u8] = b"hmac_key_derivation";
const MIN_BASE64_CANDIDATE: usize = 64;

/// Long-term secret owned by one codec. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(Vec<u8>);

impl MasterKey {
    /// Wrap key bytes, rejecting keys shorter than 32 bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() < MIN_KEY_LEN {
            return Err(Error::KeyTooShort {
                actual: bytes.len(),
                required: MIN_KEY_LEN,
            });
        }
        Ok(Self(bytes))
    }

    /// Parse a hex-encoded key
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = Zeroizing::new(hex::decode(hex_key.trim())?);
        Self::new(bytes.as_slice())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MasterKey([REDACTED; {}])", self.0.len())
    }
}

/// Per-packet key material
struct SessionKey {
    key: Zeroizing<[u8; 32]>,
    nonce: [u8; NONCE_LEN],
}

/// Stego codec bound to one master key
pub struct StegoCodec {
    master_key: MasterKey,
    mac: HmacSha256,
}

impl std::fmt::Debug for StegoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StegoCodec")
            .field("master_key", &self.master_key)
            .finish_non_exhaustive()
    }
}

impl StegoCodec {
    /// Create a codec. Fails with [`Error::KeyTooShort`] under 32 bytes.
    pub fn new(master_key: &[u8]) -> Result<Self> {
        Self::with_key(MasterKey::new(master_key)?)
    }

    /// Create a codec from an existing key
    pub fn with_key(master_key: MasterKey) -> Result<Self> {
        let hmac_key: Zeroizing<[u8; 32]> = Zeroizing::new(
            Sha256::new()
                .chain_update(master_key.as_bytes())
                .chain_update(HMAC_DERIVATION_LABEL)
                .finalize()
                .into(),
        );
        let mac = HmacSha256::new_from_slice(hmac_key.as_slice())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(Self { master_key, mac })
    }

    fn derive_session(&self, prefix: &[u8; PREFIX_LEN]) -> SessionKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.master_key.as_bytes());
        hasher.update(prefix);
        let mut okm = Zeroizing::new([0u8; 32 + NONCE_LEN]);
        hasher.finalize_xof().fill(okm.as_mut_slice());

        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&okm[..32]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&okm[32..]);
        SessionKey { key, nonce }
    }

    fn tag(&self, nonce: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = self.mac.clone();
        mac.update(nonce);
        mac.update(ciphertext);
        mac.finalize().into_bytes().into()
    }

    /// Encode `payload` as a `mimic` packet, then run the evasion transform
    /// when `dna` is given. The result may be empty if the DNA drops
    /// everything.
    #[instrument(skip(self, payload, dna), fields(len = payload.len(), mimic = %mimic))]
    pub fn encode(&self, payload: &[u8], mimic: MimicProtocol, dna: Option<&Dna>) -> Vec<Bytes> {
        let mut prefix = [0u8; PREFIX_LEN];
        let n = payload.len().min(PREFIX_LEN);
        prefix[..n].copy_from_slice(&payload[..n]);
        let session = self.derive_session(&prefix);
        prefix.zeroize();

        let mut ciphertext = payload.to_vec();
        apply_chacha20(&session.key, &session.nonce, &mut ciphertext);
        let tag = self.tag(&session.nonce, &ciphertext);

        let mut blob = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        blob.extend_from_slice(&session.nonce);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&ciphertext);
        let body = STANDARD.encode(&blob);

        let mut rng = rand::thread_rng();
        let noise_len = rng.gen_range(2..=11);

        let mut packet = mimic.header();
        packet.reserve(body.len() + noise_len);
        packet.extend_from_slice(body.as_bytes());
        packet.extend((0..noise_len).map(|_| rng.gen::<u8>()));

        trace!(packet_len = packet.len(), "Encoded stego packet");

        let packets = vec![Bytes::from(packet)];
        match dna {
            Some(dna) => dna.apply(packets),
            None => packets,
        }
    }

    /// Decode a packet. Returns `None` for anything malformed or tampered.
    #[instrument(skip(self, packet), fields(len = packet.len()))]
    pub fn decode(&self, packet: &[u8]) -> Option<Vec<u8>> {
        let (mimic, start) = MimicProtocol::ALL.iter().find_map(|m| {
            find(packet, m.marker()).map(|pos| (*m, pos + m.marker().len()))
        })?;

        let region_len = packet[start..]
            .iter()
            .take_while(|b| is_base64_byte(**b))
            .count();
        let region = &packet[start..start + region_len];

        let mut candidate = region_len - region_len % 4;
        while candidate >= MIN_BASE64_CANDIDATE {
            if let Some(plain) = self.try_candidate(&region[..candidate]) {
                debug!(%mimic, "Decoded stego packet");
                return Some(plain);
            }
            candidate -= 4;
        }

        trace!(%mimic, "No authentic payload found");
        None
    }

    fn try_candidate(&self, text: &[u8]) -> Option<Vec<u8>> {
        let blob = STANDARD.decode(text).ok()?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let expected = self.tag(nonce, ciphertext);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return None;
        }

        let session = self.derive_session(&[0u8; PREFIX_LEN]);
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce);

        let mut plain = ciphertext.to_vec();
        apply_chacha20(&session.key, &nonce_arr, &mut plain);
        while plain.last() == Some(&0) {
            plain.pop();
        }
        Some(plain)
    }

    /// Self-check: the packet grew and carries the mimic marker
    pub fn test_dpi_evasion(&self, payload: &[u8], mimic: MimicProtocol) -> bool {
        let packets = self.encode(payload, mimic, None);
        packets.first().map_or(false, |p| {
            p.len() > payload.len() && find(p, mimic.marker()).is_some()
        })
    }
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

/// ChaCha20 with a 16-byte nonce: bytes 0..4 are the little-endian initial
/// block counter, bytes 4..16 the 96-bit nonce. The 32-bit counter wraps.
fn apply_chacha20(key: &[u8; 32], nonce16: &[u8; NONCE_LEN], data: &mut [u8]) {
    let counter = u32::from_le_bytes([nonce16[0], nonce16[1], nonce16[2], nonce16[3]]);
    let nonce12: [u8; 12] = {
        let mut n = [0u8; 12];
        n.copy_from_slice(&nonce16[4..]);
        n
    };

    let mut block = u64::from(counter);
    let mut offset = 0;
    while offset < data.len() {
        // blocks left before the 32-bit counter wraps, last block excluded
        let room = usize::try_from((u64::from(u32::MAX) - block) * 64).unwrap_or(usize::MAX);
        let end = if room == 0 {
            offset
        } else {
            data.len().min(offset.saturating_add(room))
        };

        if end > offset {
            let mut cipher = ChaCha20::new(key.into(), &nonce12.into());
            cipher.seek(block * 64);
            cipher.apply_keystream(&mut data[offset..end]);
        }
        offset = end;
        block = 0;
    }
}
