//! Carrier steganography
//!
//! Hides a payload inside fields of an ordinary-looking message instead of
//! wrapping it in a fake protocol header:
//!
//! - DNS: base32 labels of at most 60 characters in front of a base domain
//! - HTTP: base64 split over `X-Session-N` headers of 1000 characters
//! - Text: zero-width characters appended to the words of a cover text
//!
//! Every carrier stores `be32(crc32) || body`, where `body` is the payload
//! XORed with a SHA-256 counter keystream under `SHA256(key_material)`. The
//! checksum covers the encrypted body, so tampering is caught before
//! decryption.

use crate::error::{Error, Result};
use crate::obfuscation::XorObfuscator;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Base32 characters per DNS label
pub const DNS_LABEL_LEN: usize = 60;
/// Longest DNS name accepted by resolvers, without the root dot
pub const MAX_DNS_NAME_LEN: usize = 253;
/// Base64 characters per session header
pub const HTTP_HEADER_CHUNK: usize = 1000;
/// Name prefix of the headers carrying data
pub const SESSION_HEADER_PREFIX: &str = "X-Session-";

const CRC_LEN: usize = 4;
const ZW_ZERO: char = '\u{200B}';
const ZW_ONE: char = '\u{200C}';
const BITS_PER_WORD: usize = 4;

/// Prefix `data` with its big-endian CRC32
pub fn add_integrity(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CRC_LEN + data.len());
    out.extend_from_slice(&crc32fast::hash(data).to_be_bytes());
    out.extend_from_slice(data);
    out
}

/// Check and strip the CRC32 prefix written by [`add_integrity`]
pub fn verify_integrity(data: &[u8]) -> Result<&[u8]> {
    if data.len() < CRC_LEN {
        return Err(Error::encoding("carrier data shorter than its checksum"));
    }
    let (prefix, body) = data.split_at(CRC_LEN);
    let stored = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(Error::Integrity { stored, computed });
    }
    Ok(body)
}

/// Embeds payloads into DNS names, HTTP headers and text
pub struct ProtocolCarrier {
    key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for ProtocolCarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCarrier")
            .field("encrypted", &self.key.is_some())
            .finish()
    }
}

impl ProtocolCarrier {
    /// Carrier encrypting with a key derived from `key_material`
    pub fn new(key_material: &[u8]) -> Self {
        let key = Sha256::digest(key_material).to_vec();
        Self {
            key: Some(Zeroizing::new(key)),
        }
    }

    /// Carrier that only checksums, for payloads already encrypted upstream
    pub fn unencrypted() -> Self {
        Self { key: None }
    }

    fn xor(&self, data: &[u8]) -> Vec<u8> {
        match self.key {
            // fresh instance: keystream always starts at counter 0
            Some(ref key) => XorObfuscator::new(Some(key.to_vec()), false).encrypt(data),
            None => data.to_vec(),
        }
    }

    fn seal(&self, data: &[u8]) -> Vec<u8> {
        add_integrity(&self.xor(data))
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let body = verify_integrity(sealed)?;
        Ok(self.xor(body))
    }

    /// Build `label1.label2...base_domain` carrying `data`
    ///
    /// Fails when the resulting name would exceed 253 characters.
    pub fn embed_dns(&self, base_domain: &str, data: &[u8]) -> Result<String> {
        let base = normalize_domain(base_domain);
        if base.is_empty() {
            return Err(Error::encoding("base domain is empty"));
        }

        let encoded = BASE32_NOPAD.encode(&self.seal(data)).to_ascii_lowercase();
        // base32 output is ASCII, so byte chunks are char chunks
        let mut labels: Vec<&str> = encoded
            .as_bytes()
            .chunks(DNS_LABEL_LEN)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect();
        labels.push(&base);
        let name = labels.join(".");

        if name.len() > MAX_DNS_NAME_LEN {
            return Err(Error::encoding(format!(
                "covert name is {} characters, limit is {MAX_DNS_NAME_LEN}",
                name.len()
            )));
        }
        debug!(labels = labels.len() - 1, len = name.len(), "Embedded payload in DNS name");
        Ok(name)
    }

    /// Recover the payload from a name built by [`embed_dns`](Self::embed_dns)
    pub fn extract_dns(&self, covert_name: &str, base_domain: &str) -> Result<Vec<u8>> {
        let name = normalize_domain(covert_name);
        let base = normalize_domain(base_domain);
        let labels = name
            .strip_suffix(base.as_str())
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(|| Error::encoding(format!("name is not under {base}")))?;

        let encoded: String = labels.split('.').collect::<String>().to_ascii_uppercase();
        let sealed = BASE32_NOPAD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::encoding(format!("invalid base32 label data: {e}")))?;
        self.open(&sealed)
    }

    /// Return `headers` with the payload added as `X-Session-0..N`
    ///
    /// Existing session headers are replaced; other headers keep their order.
    pub fn embed_http_headers(
        &self,
        headers: &[(String, String)],
        data: &[u8],
    ) -> Vec<(String, String)> {
        let encoded = STANDARD.encode(self.seal(data));
        let mut out: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| session_index(name).is_none())
            .cloned()
            .collect();

        let before = out.len();
        for (i, chunk) in encoded.as_bytes().chunks(HTTP_HEADER_CHUNK).enumerate() {
            out.push((
                format!("{SESSION_HEADER_PREFIX}{i}"),
                String::from_utf8_lossy(chunk).into_owned(),
            ));
        }
        debug!(headers = out.len() - before, "Embedded payload in HTTP headers");
        out
    }

    /// Reassemble the session headers in index order and recover the payload
    pub fn extract_http_headers(&self, headers: &[(String, String)]) -> Result<Vec<u8>> {
        let mut chunks: Vec<(usize, &str)> = headers
            .iter()
            .filter_map(|(name, value)| session_index(name).map(|i| (i, value.trim())))
            .collect();
        if chunks.is_empty() {
            return Err(Error::encoding("no session headers present"));
        }
        chunks.sort_by_key(|&(i, _)| i);
        if chunks.iter().enumerate().any(|(expected, &(i, _))| expected != i) {
            return Err(Error::encoding("session headers are not contiguous"));
        }

        let encoded: String = chunks.into_iter().map(|(_, value)| value).collect();
        let sealed = STANDARD
            .decode(encoded)
            .map_err(|e| Error::encoding(format!("invalid base64 header data: {e}")))?;
        self.open(&sealed)
    }

    /// Hide the payload as zero-width characters after the words of `cover`
    ///
    /// Four bits follow each word; bits left over once the words run out are
    /// appended to the end of the text.
    pub fn embed_text(&self, cover: &str, data: &[u8]) -> Result<String> {
        let body = self.xor(data);
        let len = u32::try_from(body.len())
            .map_err(|_| Error::encoding("payload too large for a text carrier"))?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&len.to_be_bytes());
        framed.extend_from_slice(&body);
        let sealed = add_integrity(&framed);

        let bits: Vec<char> = sealed
            .iter()
            .flat_map(|&byte| (0..8).rev().map(move |i| (byte >> i) & 1))
            .map(|bit| if bit == 0 { ZW_ZERO } else { ZW_ONE })
            .collect();

        let mut out = String::with_capacity(cover.len() + bits.len() * 3);
        let mut pending = bits.chunks(BITS_PER_WORD);
        for (i, word) in cover.split(' ').enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(word);
            if let Some(chunk) = pending.next() {
                out.extend(chunk);
            }
        }
        for chunk in pending {
            out.extend(chunk);
        }
        trace!(bits = bits.len(), "Embedded payload in text");
        Ok(out)
    }

    /// Recover the payload hidden by [`embed_text`](Self::embed_text)
    pub fn extract_text(&self, text: &str) -> Result<Vec<u8>> {
        let bits: Vec<u8> = text
            .chars()
            .filter_map(|c| match c {
                ZW_ZERO => Some(0),
                ZW_ONE => Some(1),
                _ => None,
            })
            .collect();
        if bits.is_empty() {
            return Err(Error::encoding("no hidden data in text"));
        }

        // trailing partial byte is ignored
        let bytes: Vec<u8> = bits
            .chunks_exact(8)
            .map(|byte| byte.iter().fold(0u8, |acc, bit| (acc << 1) | bit))
            .collect();

        let framed = verify_integrity(&bytes)?;
        if framed.len() < 4 {
            return Err(Error::encoding("hidden data too short"));
        }
        let (len, body) = framed.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        let body = body
            .get(..len)
            .ok_or_else(|| Error::encoding("hidden data shorter than its length prefix"))?;
        Ok(self.xor(body))
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// `Some(n)` for an `X-Session-n` header name, case-insensitively
fn session_index(name: &str) -> Option<usize> {
    let prefix_len = SESSION_HEADER_PREFIX.len();
    if name.len() <= prefix_len || !name.is_char_boundary(prefix_len) {
        return None;
    }
    let (prefix, index) = name.split_at(prefix_len);
    if !prefix.eq_ignore_ascii_case(SESSION_HEADER_PREFIX) {
        return None;
    }
    index.parse().ok()
}
