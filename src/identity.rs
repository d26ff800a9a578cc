//! Peer identity: ed25519 key pairs and the identifiers derived from them.
//!
//! Both [`ProfileId`] and [`PeerId`] are the base58 encoding of a sha2-256
//! multihash over the public key bytes, so identifiers are self-describing and
//! two peers can only share one by sharing a key.

use std::fmt;
use std::str::FromStr;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use ed25519_dalek::{SigningKey, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Multihash code for sha2-256.
const SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;
const MULTIHASH_LEN: usize = 2 + SHA2_256_LEN as usize;

/// Returns the sha2-256 multihash of `bytes`.
pub(crate) fn sha2_multihash(bytes: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(bytes);
    let mut mh = Vec::with_capacity(MULTIHASH_LEN);
    mh.push(SHA2_256);
    mh.push(SHA2_256_LEN);
    mh.extend_from_slice(&digest);
    mh
}

/// Decodes a base58 sha2-256 multihash, returning the raw multihash bytes.
pub(crate) fn decode_multihash(s: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = bs58::decode(s).into_vec().map_err(|e| e.to_string())?;
    if bytes.len() != MULTIHASH_LEN || bytes[0] != SHA2_256 || bytes[1] != SHA2_256_LEN {
        return Err(format!("{:?} is not a sha2-256 multihash", s));
    }
    Ok(bytes)
}

fn encode_public_key(key: &VerifyingKey) -> String {
    bs58::encode(sha2_multihash(key.as_bytes())).into_string()
}

/// Globally unique identifier of a peer profile.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileId(String);

impl ProfileId {
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        ProfileId(encode_public_key(key))
    }

    pub fn decode(s: &str) -> Result<Self> {
        decode_multihash(s).map_err(Error::InvalidProfileId)?;
        Ok(ProfileId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Network-level identifier of a running node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(String);

impl PeerId {
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        PeerId(encode_public_key(key))
    }

    pub fn decode(s: &str) -> Result<Self> {
        decode_multihash(s).map_err(Error::InvalidPeerId)?;
        Ok(PeerId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A short form for log lines.
    pub fn fmt_short(&self) -> &str {
        let end = self.0.len().min(10);
        &self.0[..end]
    }
}

macro_rules! impl_id_conversions {
    ($ty:ident) => {
        impl TryFrom<String> for $ty {
            type Error = Error;

            fn try_from(s: String) -> Result<Self> {
                $ty::decode(&s)
            }
        }

        impl From<$ty> for String {
            fn from(id: $ty) -> String {
                id.0
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $ty::decode(s)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), self.0)
            }
        }
    };
}

impl_id_conversions!(ProfileId);
impl_id_conversions!(PeerId);

/// Generates a fresh ed25519 key pair.
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Encodes private key material for storage in a profile.
pub fn encode_private_key(key: &SigningKey) -> String {
    BASE64_STANDARD.encode(key.to_bytes())
}

/// Parses base64 private key material produced by [`encode_private_key`].
pub fn decode_private_key(s: &str) -> Result<SigningKey> {
    if s.is_empty() {
        return Err(Error::MissingPrivateKey);
    }
    let bytes = BASE64_STANDARD.decode(s).map_err(|e| Error::PrivateKeyDecode(e.to_string()))?;
    let secret: [u8; SECRET_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        Error::InvalidPrivateKey(format!(
            "expected {} bytes, got {}",
            SECRET_KEY_LENGTH,
            bytes.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(&secret))
}

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dapper", "eager", "fuzzy", "gentle", "happy", "icy", "jolly",
    "keen", "lively", "mellow", "nimble", "olive", "plucky", "quiet", "rusty", "shaggy", "tidy",
    "upbeat", "vivid", "witty", "young", "zesty", "bold", "cosmic", "dusty", "fancy", "golden",
    "humble", "lucky",
];

const NOUNS: &[&str] = &[
    "akita", "beagle", "collie", "dingo", "elkhound", "foxhound", "greyhound", "husky",
    "ibizan", "jindo", "kelpie", "labrador", "malamute", "newfie", "otterhound", "pug",
    "retriever", "samoyed", "terrier", "vizsla", "whippet", "basenji", "corgi", "dalmatian",
    "eskie", "harrier", "keeshond", "lurcher", "mastiff", "pointer", "saluki", "spitz",
];

/// Derives a human nickname from an identifier string.
///
/// The same input always yields the same `adjective_noun` pair.
pub fn nickname(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let adjective = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let noun = NOUNS[digest[1] as usize % NOUNS.len()];
    format!("{}_{}", adjective, noun)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_derive_from_key() {
        let key = generate_keypair();
        let pro = ProfileId::from_public_key(&key.verifying_key());
        let peer = PeerId::from_public_key(&key.verifying_key());
        assert_eq!(pro.as_str(), peer.as_str());
        assert!(pro.as_str().starts_with("Qm"));

        let other = generate_keypair();
        assert_ne!(pro, ProfileId::from_public_key(&other.verifying_key()));
    }

    #[test]
    fn test_id_decode() {
        let key = generate_keypair();
        let id = ProfileId::from_public_key(&key.verifying_key());
        assert_eq!(ProfileId::decode(id.as_str()).unwrap(), id);

        assert!(matches!(PeerId::decode("not-base58-0OIl"), Err(Error::InvalidPeerId(_))));
        assert!(matches!(ProfileId::decode("abc"), Err(Error::InvalidProfileId(_))));
    }

    #[test]
    fn test_id_serde_is_a_string() {
        let key = generate_keypair();
        let id = PeerId::from_public_key(&key.verifying_key());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PeerId>("\"nope\"").is_err());
    }

    #[test]
    fn test_private_key_round_trip() {
        let key = generate_keypair();
        let decoded = decode_private_key(&encode_private_key(&key)).unwrap();
        assert_eq!(decoded.to_bytes(), key.to_bytes());
    }

    #[test]
    fn test_private_key_wrong_length() {
        let err = decode_private_key(&BASE64_STANDARD.encode([1u8; 7])).unwrap_err();
        assert!(matches!(err, Error::InvalidPrivateKey(_)));
    }

    #[test]
    fn test_nickname_is_deterministic() {
        let a = nickname("QmZePf5LeXow3RW5U1AgEiNbW46YnRGhZ7HPvm1UmPFPwt");
        let b = nickname("QmZePf5LeXow3RW5U1AgEiNbW46YnRGhZ7HPvm1UmPFPwt");
        assert_eq!(a, b);
        assert!(a.contains('_'));
    }
}
