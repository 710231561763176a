//! Registry of the digest algorithms a signature can be built from.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Widest digest stored in a signature region, the SHA-256 length.
pub const MAX_DIGEST_LEN: usize = 32;

/// Digest algorithm identifying the content of a hash region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
}

impl HashKind {

    /// Decode the on-disk algorithm id, returning none for unknown ids.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => Self::Md5,
            2 => Self::Sha1,
            3 => Self::Sha256,
            _ => return None,
        })
    }

    /// The on-disk algorithm id.
    pub fn raw(self) -> u32 {
        match self {
            Self::Md5 => 1,
            Self::Sha1 => 2,
            Self::Sha256 => 3,
        }
    }

    /// Number of significant digest bytes produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Digest the given bytes into a fixed-width buffer, the tail past
    /// `digest_len` left zeroed.
    pub fn compute(self, buf: &[u8]) -> [u8; MAX_DIGEST_LEN] {
        let mut out = [0u8; MAX_DIGEST_LEN];
        match self {
            Self::Md5 => out[..16].copy_from_slice(Md5::digest(buf).as_slice()),
            Self::Sha1 => out[..20].copy_from_slice(Sha1::digest(buf).as_slice()),
            Self::Sha256 => out[..32].copy_from_slice(Sha256::digest(buf).as_slice()),
        }
        out
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn known_digests() {
        let md5 = HashKind::Md5.compute(b"abc");
        assert_eq!(hex(&md5[..16]), "900150983cd24fb0d6963f7d28e17f72");
        let sha1 = HashKind::Sha1.compute(b"abc");
        assert_eq!(hex(&sha1[..20]), "a9993e364706816aba3e25717850c26c9cd0d89d");
        let sha256 = HashKind::Sha256.compute(b"abc");
        assert_eq!(hex(&sha256), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn narrow_digests_have_a_zeroed_tail() {
        let md5 = HashKind::Md5.compute(b"");
        assert!(md5[16..].iter().all(|&b| b == 0));
        let sha1 = HashKind::Sha1.compute(b"");
        assert!(sha1[20..].iter().all(|&b| b == 0));
    }

    #[test]
    fn raw_roundtrip() {
        for kind in [HashKind::Md5, HashKind::Sha1, HashKind::Sha256] {
            assert_eq!(HashKind::from_raw(kind.raw()), Some(kind));
        }
        assert_eq!(HashKind::from_raw(0), None);
        assert_eq!(HashKind::from_raw(4), None);
    }

}
