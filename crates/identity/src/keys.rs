//! Ed25519 keypairs and node-id derivation.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

use ipv7_core::types::NODE_ID_LEN;

/// Raw 32-byte Ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

/// A node's signing identity.
///
/// The node id embedded in an address is derived deterministically from the
/// public key: the first 16 bytes of its blake3 hash.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Reconstruct a keypair from a stored 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> PublicKeyBytes {
        self.signing.verifying_key().to_bytes()
    }

    /// Derive the 16-byte node id for this keypair.
    pub fn node_id(&self) -> [u8; NODE_ID_LEN] {
        derive_node_id(&self.public_key())
    }

    /// Sign a message with the private key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Derive a node id from any public key: truncated blake3 hash.
pub fn derive_node_id(public_key: &[u8]) -> [u8; NODE_ID_LEN] {
    let digest = blake3::hash(public_key);
    let mut id = [0u8; NODE_ID_LEN];
    id.copy_from_slice(&digest.as_bytes()[..NODE_ID_LEN]);
    id
}

/// Verify an Ed25519 signature over `message` by the holder of `public_key`.
pub fn verify(public_key: &PublicKeyBytes, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .is_ok()
}
