// Key management and ECDSA signing

use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::Address;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key material")]
    MalformedKey,
    #[error("signature does not verify")]
    InvalidSignature,
}

/// A secp256k1 key pair with its derived address.
///
/// Public keys are 33-byte compressed SEC1, signatures 64-byte compact
/// `(r,s)`; both travel as hex strings.
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let mut rng = OsRng;

        let secret_key = SecretKey::new(&mut rng);
        let public_key = secret_key.public_key(&secp);
        let address = Address::from_public_key(&public_key.serialize());

        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// Rebuild a key pair from a hex-encoded secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let bytes = hex::decode(secret_hex).map_err(|_| KeyError::MalformedKey)?;
        let secret_key = SecretKey::from_slice(&bytes).map_err(|_| KeyError::MalformedKey)?;
        let public_key = secret_key.public_key(&secp);
        let address = Address::from_public_key(&public_key.serialize());

        Ok(Self {
            secret_key,
            public_key,
            address,
        })
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Sign a preimage string. The message is the SHA-256 digest of the
    /// preimage bytes; the result is the 64-byte compact signature in hex.
    pub fn sign(&self, preimage: &str) -> String {
        let secp = Secp256k1::new();
        let digest = Sha256::digest(preimage.as_bytes());
        let message = Message::from_digest_slice(&digest).expect("digest is 32 bytes");
        let signature = secp.sign_ecdsa(&message, &self.secret_key);
        hex::encode(signature.serialize_compact())
    }
}

/// Verify a hex compact signature made by `public_key_hex` over `preimage`.
pub fn verify_signature(
    public_key_hex: &str,
    signature_hex: &str,
    preimage: &str,
) -> Result<(), KeyError> {
    let secp = Secp256k1::verification_only();

    let key_bytes = hex::decode(public_key_hex).map_err(|_| KeyError::MalformedKey)?;
    let public_key = PublicKey::from_slice(&key_bytes).map_err(|_| KeyError::MalformedKey)?;

    let sig_bytes = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
    let signature = Signature::from_compact(&sig_bytes).map_err(|_| KeyError::InvalidSignature)?;

    let digest = Sha256::digest(preimage.as_bytes());
    let message = Message::from_digest_slice(&digest).expect("digest is 32 bytes");

    secp.verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| KeyError::InvalidSignature)
}

/// Derive the address a hex public key pays to.
pub fn address_of_key(public_key_hex: &str) -> Result<Address, KeyError> {
    let key_bytes = hex::decode(public_key_hex).map_err(|_| KeyError::MalformedKey)?;
    // round-trip through the library type so only valid curve points hash
    let public_key = PublicKey::from_slice(&key_bytes).map_err(|_| KeyError::MalformedKey)?;
    Ok(Address::from_public_key(&public_key.serialize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.public_key_hex().len(), 66); // 33 bytes compressed
        assert!(kp.address.as_str().starts_with("KD"));
    }

    #[test]
    fn test_secret_round_trip() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(kp.public_key_hex(), restored.public_key_hex());
        assert_eq!(kp.address, restored.address);
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let preimage = r#"{"inputs":[],"outputs":[],"timestamp":0.0}"#;

        let sig = kp.sign(preimage);
        assert_eq!(sig.len(), 128); // 64 bytes compact

        verify_signature(&kp.public_key_hex(), &sig, preimage).unwrap();

        // wrong preimage fails
        assert_eq!(
            verify_signature(&kp.public_key_hex(), &sig, "something else"),
            Err(KeyError::InvalidSignature)
        );

        // wrong key fails
        let other = KeyPair::generate();
        assert_eq!(
            verify_signature(&other.public_key_hex(), &sig, preimage),
            Err(KeyError::InvalidSignature)
        );
    }

    #[test]
    fn test_address_of_key() {
        let kp = KeyPair::generate();
        let addr = address_of_key(&kp.public_key_hex()).unwrap();
        assert_eq!(addr, kp.address);

        assert_eq!(address_of_key("zz"), Err(KeyError::MalformedKey));
        assert_eq!(address_of_key(""), Err(KeyError::MalformedKey));
    }
}
