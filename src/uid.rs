use std::fmt;

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// 128-bit identifier used for layers, spaces, mounts and workspaces
///
/// two canonical textual forms:
/// - lowercase hex, 32 chars
/// - RFC 4648 base32 without padding, 26 chars
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid([u8; 16]);

impl Uid {
    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// generate a uniformly random uid
    pub fn random() -> Self {
        Self(rand::random::<u128>().to_be_bytes())
    }

    /// derive a uid from the sha-256 of the given bytes
    ///
    /// takes the high 128 bits of the digest
    pub fn from_hash(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&digest[..16]);
        Self(arr)
    }

    /// parse from 32-char lowercase hex
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != 32 {
            return Err(Error::InvalidUid(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| Error::InvalidUid(s.to_string()))?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// parse from 26-char base32 without padding
    pub fn from_base32(s: &str) -> Result<Self> {
        if s.len() != 26 {
            return Err(Error::InvalidUid(s.to_string()));
        }
        let bytes = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| Error::InvalidUid(s.to_string()))?;
        if bytes.len() != 16 {
            return Err(Error::InvalidUid(s.to_string()));
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// hex form, 32 chars
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// base32 form, 26 chars
    pub fn base32(&self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.hex())
    }
}

impl Serialize for Uid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let uid = Uid::random();
        let hex = uid.hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Uid::from_hex(&hex).unwrap(), uid);
    }

    #[test]
    fn test_base32_roundtrip() {
        let uid = Uid::random();
        let b32 = uid.base32();
        assert_eq!(b32.len(), 26);
        assert!(b32.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
        assert_eq!(Uid::from_base32(&b32).unwrap(), uid);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(Uid::from_hex("not hex").is_err());
        assert!(Uid::from_hex("abcd").is_err()); // too short
        assert!(Uid::from_hex("gggggggggggggggggggggggggggggggg").is_err());
    }

    #[test]
    fn test_invalid_base32() {
        assert!(Uid::from_base32("short").is_err());
        assert!(Uid::from_base32("11111111111111111111111111").is_err()); // '1' not in alphabet
    }

    #[test]
    fn test_hex_base32_are_distinct_lengths() {
        let uid = Uid::random();
        // search relies on length as the discriminator
        assert!(Uid::from_hex(&uid.base32()).is_err());
        assert!(Uid::from_base32(&uid.hex()).is_err());
    }

    #[test]
    fn test_from_hash_determinism() {
        let a = Uid::from_hash(b"hello");
        let b = Uid::from_hash(b"hello");
        let c = Uid::from_hash(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_random_uniqueness() {
        let a = Uid::random();
        let b = Uid::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ordering_on_bytes() {
        let a = Uid::from_bytes([0u8; 16]);
        let mut high = [0u8; 16];
        high[0] = 1;
        let b = Uid::from_bytes(high);
        assert!(a < b);
    }

    #[test]
    fn test_serde_json() {
        let uid = Uid::random();
        let json = serde_json::to_string(&uid).unwrap();
        assert_eq!(json, format!("\"{}\"", uid.hex()));
        let parsed: Uid = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, uid);
    }
}
