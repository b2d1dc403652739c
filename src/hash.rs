use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

/// A 32-byte BLAKE3 digest used for content-addressing and change detection.
///
/// In `kura`, a fingerprint serves two purposes:
/// 1. It is the sole basis of change detection. Two fingerprints are equal iff
///    the content they were computed from is equal; timestamps never matter.
/// 2. It addresses history entries, workspaces and cache entries on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl<T> From<T> for Fingerprint
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Fingerprint(value.into())
    }
}

impl Fingerprint {
    /// The fingerprint of a tree with no entries, including trees whose root
    /// does not exist at all.
    pub const EMPTY: Fingerprint = Fingerprint([0; 32]);

    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Streaming hasher producing a [`Fingerprint`].
///
/// Every variable-length field is length-prefixed, so two different sequences
/// of calls can never produce the same byte stream.
#[derive(Default)]
pub struct FingerprintHasher(blake3::Hasher);

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_tag(&mut self, tag: u8) -> &mut Self {
        self.0.update(&[tag]);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.0.update(&value.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u64(bytes.len() as u64);
        self.0.update(bytes);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_fingerprint(&mut self, value: &Fingerprint) -> &mut Self {
        self.0.update(value.as_bytes());
        self
    }

    pub fn finish(&self) -> Fingerprint {
        self.0.finalize().into()
    }
}
