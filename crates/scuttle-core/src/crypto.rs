//! Signing hooks for locally created updates.
//!
//! A node may carry a [`Signer`], applied to every update it originates, and
//! a [`Verifier`], consulted for every update originating elsewhere. The
//! ed25519 [`Keypair`] and [`Keyring`] are ready-made implementations.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::canonical::signed_message;
use crate::error::{CoreError, Result};
use crate::types::SourceId;
use crate::update::Update;

/// Produces the signature attached to a locally created update.
pub trait Signer: Send + Sync {
    fn sign(&self, update: &Update) -> String;
}

/// Decides whether an update from another node is authentic.
pub trait Verifier: Send + Sync {
    fn verify(&self, update: &Update) -> bool;
}

impl<F> Verifier for F
where
    F: Fn(&Update) -> bool + Send + Sync,
{
    fn verify(&self, update: &Update) -> bool {
        self(update)
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| CoreError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Verify a hex-encoded signature over `message`.
    pub fn verify(&self, message: &[u8], signature_hex: &str) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let bytes = hex::decode(signature_hex).map_err(|_| CoreError::InvalidSignature)?;
        let bytes: [u8; 64] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        verifying_key
            .verify(message, &Signature::from_bytes(&bytes))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// An ed25519 keypair that signs updates.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Source id derived from the public key.
    pub fn source_id(&self) -> SourceId {
        SourceId::from_public_key(&self.public_key())
    }

    /// Hex signature over raw bytes.
    pub fn sign_bytes(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl Signer for Keypair {
    fn sign(&self, update: &Update) -> String {
        self.sign_bytes(&signed_message(update))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

/// Known public keys, one per source.
///
/// Updates from a source with no registered key, or without a signature, do
/// not verify.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: HashMap<SourceId, Ed25519PublicKey>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceId, key: Ed25519PublicKey) {
        self.keys.insert(source, key);
    }

    pub fn with(mut self, source: SourceId, key: Ed25519PublicKey) -> Self {
        self.insert(source, key);
        self
    }

    pub fn get(&self, source: &SourceId) -> Option<&Ed25519PublicKey> {
        self.keys.get(source)
    }
}

impl Verifier for Keyring {
    fn verify(&self, update: &Update) -> bool {
        let (Some(key), Some(signature)) = (self.keys.get(&update.source), &update.signature)
        else {
            return false;
        };
        key.verify(&signed_message(update), signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use serde_json::json;

    fn signed_update(keypair: &Keypair) -> Update {
        let update = Update::new(json!(["k", "v"]), Timestamp(9), keypair.source_id());
        let signature = keypair.sign(&update);
        update.with_signature(signature)
    }

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let update = signed_update(&keypair);
        let keyring = Keyring::new().with(keypair.source_id(), keypair.public_key());
        assert!(keyring.verify(&update));

        let mut tampered = update.clone();
        tampered.payload = json!(["k", "other"]);
        assert!(!keyring.verify(&tampered));
    }

    #[test]
    fn test_forwarded_copy_still_verifies() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let update = signed_update(&keypair);
        let keyring = Keyring::new().with(keypair.source_id(), keypair.public_key());
        let relayed = update.forwarded(&SourceId::new("relay").unwrap());
        assert!(keyring.verify(&relayed));
    }

    #[test]
    fn test_unknown_source_or_missing_signature() {
        let keypair = Keypair::generate();
        let update = signed_update(&keypair);
        assert!(!Keyring::new().verify(&update));

        let keyring = Keyring::new().with(keypair.source_id(), keypair.public_key());
        let mut unsigned = update;
        unsigned.signature = None;
        assert!(!keyring.verify(&unsigned));
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let seed = [0x42u8; 32];
        assert_eq!(
            Keypair::from_seed(&seed).public_key(),
            Keypair::from_seed(&seed).public_key()
        );
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let pk = Keypair::generate().public_key();
        assert_eq!(Ed25519PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
        assert!(Ed25519PublicKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_closure_verifier() {
        let deny_all = |_: &Update| false;
        let update = Update::new(json!(1), Timestamp(1), SourceId::new("A").unwrap());
        assert!(!Verifier::verify(&deny_all, &update));
    }
}
