//! Headered fragmentation
//!
//! Each fragment is `id:u16 | offset:u32 | flags:u8 | length:u16` (big
//! endian, 9 bytes) followed by up to `fragment_size` bytes of data.

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use rand::rngs::OsRng;
use rand::Rng;
use std::time::Duration;

/// Fragment header length
pub const FRAGMENT_HEADER_LEN: usize = 9;

bitflags! {
    /// Fragment header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u8 {
        /// More fragments follow
        const MORE = 0x01;
    }
}

/// Parsed fragment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Datagram id shared by all fragments
    pub id: u16,
    /// Byte offset of this fragment's data
    pub offset: u32,
    /// Header flags
    pub flags: FragmentFlags,
    /// Data length
    pub length: u16,
}

impl FragmentHeader {
    /// Parse the first 9 bytes of `buf`
    pub fn parse(mut buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAGMENT_HEADER_LEN {
            return None;
        }
        Some(Self {
            id: buf.get_u16(),
            offset: buf.get_u32(),
            flags: FragmentFlags::from_bits_retain(buf.get_u8()),
            length: buf.get_u16(),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.put_u16(self.id);
        out.put_u32(self.offset);
        out.put_u8(self.flags.bits());
        out.put_u16(self.length);
    }
}

/// Fragmentation layer
#[derive(Debug, Clone)]
pub struct FragmentationObfuscator {
    fragment_size: usize,
    delay: Duration,
}

impl FragmentationObfuscator {
    /// Create a fragmenter. `fragment_size` is clamped to 1..=65535.
    pub fn new(fragment_size: usize, delay_ms: u64) -> Self {
        Self {
            fragment_size: fragment_size.clamp(1, usize::from(u16::MAX)),
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Suggested pause between fragments
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Split `data` into headered fragments sharing one random id
    pub fn fragment(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let id: u16 = OsRng.gen();
        let mut fragments = Vec::with_capacity(data.len() / self.fragment_size + 1);
        let mut offset = 0usize;

        for chunk in data.chunks(self.fragment_size) {
            let more = offset + chunk.len() < data.len();
            let header = FragmentHeader {
                id,
                offset: u32::try_from(offset).unwrap_or(u32::MAX),
                flags: if more {
                    FragmentFlags::MORE
                } else {
                    FragmentFlags::empty()
                },
                length: u16::try_from(chunk.len()).unwrap_or(u16::MAX),
            };
            let mut frag = Vec::with_capacity(FRAGMENT_HEADER_LEN + chunk.len());
            header.write(&mut frag);
            frag.extend_from_slice(chunk);
            fragments.push(frag);
            offset += chunk.len();
        }

        fragments
    }

    /// Reassemble by offset. Fragments shorter than a header are skipped.
    pub fn reassemble(&self, fragments: &[Vec<u8>]) -> Vec<u8> {
        let mut parsed: Vec<(u32, &[u8])> = fragments
            .iter()
            .filter_map(|f| {
                FragmentHeader::parse(f).map(|h| (h.offset, &f[FRAGMENT_HEADER_LEN..]))
            })
            .collect();
        parsed.sort_by_key(|(offset, _)| *offset);
        parsed.into_iter().flat_map(|(_, data)| data.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_headers() {
        let frag = FragmentationObfuscator::new(4, 0);
        let fragments = frag.fragment(b"0123456789");
        assert_eq!(fragments.len(), 3);

        let headers: Vec<_> = fragments
            .iter()
            .map(|f| FragmentHeader::parse(f).unwrap())
            .collect();
        assert!(headers.iter().all(|h| h.id == headers[0].id));
        assert_eq!(headers[1].offset, 4);
        assert!(headers[0].flags.contains(FragmentFlags::MORE));
        assert!(!headers[2].flags.contains(FragmentFlags::MORE));
        assert_eq!(headers[2].length, 2);
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let frag = FragmentationObfuscator::new(3, 0);
        let mut fragments = frag.fragment(b"abcdefgh");
        fragments.reverse();
        fragments.push(vec![1, 2, 3]);
        assert_eq!(frag.reassemble(&fragments), b"abcdefgh");
    }

    #[test]
    fn test_empty_input_has_no_fragments() {
        let frag = FragmentationObfuscator::new(512, 5);
        assert!(frag.fragment(&[]).is_empty());
        assert!(frag.reassemble(&[]).is_empty());
        assert_eq!(frag.delay(), Duration::from_millis(5));
    }
}
