//! Ed25519 signing capability and signer addresses.
//!
//! Ed25519 has no public-key recovery, so a [`Signature`] carries the
//! signer's public key next to the signature bytes. [`Signature::recover`]
//! verifies the pair against a digest and yields the signer's [`Address`].

use crate::error::{Result, TypesError};
use crate::hash::{Hash, Hashable};
use ed25519_consensus::{SigningKey, VerificationKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 20-byte account address: the trailing bytes of SHA-256(public key).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Derives the address of an Ed25519 public key.
    #[must_use]
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let digest = Hash::digest(public_key);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[12..]);
        Self(bytes)
    }

    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the hex representation.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// The signing capability handed to the consensus engine.
pub trait Signer: Send + Sync {
    /// Returns the address signatures from this signer recover to.
    fn address(&self) -> Address;

    /// Signs a digest.
    fn sign(&self, digest: &Hash) -> Signature;
}

/// An Ed25519 key pair.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    public_key: [u8; 32],
    address: Address,
}

impl Keypair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::new(rand::thread_rng()))
    }

    /// Builds a key pair from 32 secret bytes.
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from(secret))
    }

    /// Builds a key pair from a hex-encoded secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 64 hex characters.
    pub fn from_hex(secret: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(secret, &mut bytes)?;
        Ok(Self::from_secret_bytes(bytes))
    }

    /// Deterministic key pair for devnets and tests.
    pub fn from_seed(seed: u64) -> Self {
        let secret = Hash::digest_parts(&[b"tendril-devnet-key", &seed.to_be_bytes()]);
        Self::from_secret_bytes(*secret.as_bytes())
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = signing_key.verification_key().to_bytes();
        Self {
            signing_key,
            public_key,
            address: Address::from_public_key(&public_key),
        }
    }

    /// Returns the public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Signer for Keypair {
    fn address(&self) -> Address {
        self.address
    }

    fn sign(&self, digest: &Hash) -> Signature {
        let signature = self.signing_key.sign(digest.as_bytes());
        Signature {
            public_key: self.public_key,
            bytes: signature.to_bytes(),
        }
    }
}

/// An Ed25519 signature together with the signer's public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Signer public key.
    pub public_key: [u8; 32],

    /// Raw signature bytes.
    #[serde(with = "signature_bytes")]
    pub bytes: [u8; 64],
}

impl Signature {
    /// Verifies the signature over `digest` and returns the signer address.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidSignature`] if the public key is malformed
    /// or the signature does not verify.
    pub fn recover(&self, digest: &Hash) -> Result<Address> {
        let key = VerificationKey::try_from(self.public_key)
            .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        key.verify(
            &ed25519_consensus::Signature::from(self.bytes),
            digest.as_bytes(),
        )
        .map_err(|e| TypesError::InvalidSignature(e.to_string()))?;
        Ok(Address::from_public_key(&self.public_key))
    }
}

impl Hashable for Signature {
    fn hash(&self) -> Hash {
        Hash::digest_parts(&[&self.public_key, &self.bytes])
    }
}

mod signature_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&encoded, &mut bytes).map_err(D::Error::custom)?;
        Ok(bytes)
    }
}
