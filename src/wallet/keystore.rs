// Wallet key storage

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::{Address, Amount, KeyError, KeyPair};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds {
        available: Amount,
        required: Amount,
    },
    #[error("address not found in keystore: {0}")]
    UnknownAddress(Address),
    #[error("wrong or missing passphrase")]
    BadPassphrase,
    #[error("required signatures must be between 1 and the number of keys")]
    InvalidThreshold,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("keystore io: {0}")]
    Io(#[from] std::io::Error),
    #[error("keystore format: {0}")]
    Codec(#[from] serde_json::Error),
}

impl WalletError {
    pub fn kind(&self) -> &'static str {
        match self {
            WalletError::InsufficientFunds { .. } => "insufficient_funds",
            WalletError::UnknownAddress(_) => "unknown_address",
            WalletError::BadPassphrase => "bad_passphrase",
            WalletError::InvalidThreshold => "invalid_threshold",
            WalletError::Key(KeyError::MalformedKey) => "malformed_key",
            WalletError::Key(KeyError::InvalidSignature) => "invalid_signature",
            WalletError::Io(_) => "io",
            WalletError::Codec(_) => "io",
        }
    }
}

/// Secret key material, either plain hex or sealed with AES-256-GCM under
/// a SHA-256 passphrase key and a random 96-bit nonce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SecretRecord {
    Plain {
        secret_key: String,
    },
    Encrypted {
        nonce: String,
        ciphertext: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalletRecord {
    address: Address,
    public_key: String,
    secret: SecretRecord,
    created_at: f64,
}

/// File-backed keystore holding every wallet of this installation.
pub struct Keystore {
    path: PathBuf,
    records: Vec<WalletRecord>,
}

fn passphrase_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

impl Keystore {
    /// Load the keystore at `path`, or start empty if none exists yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, records })
    }

    fn save(&self) -> Result<(), WalletError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&self.records)?)?;
        Ok(())
    }

    /// Generate a key pair, persist it (sealed when a passphrase is given)
    /// and return its address.
    pub fn create(&mut self, passphrase: Option<&str>) -> Result<Address, WalletError> {
        let keypair = KeyPair::generate();
        let secret = match passphrase {
            None => SecretRecord::Plain {
                secret_key: keypair.secret_key_hex(),
            },
            Some(passphrase) => {
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&passphrase_key(
                    passphrase,
                )));
                let mut nonce = [0u8; 12];
                rand::rngs::OsRng.fill_bytes(&mut nonce);
                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce), keypair.secret_key_hex().as_bytes())
                    .map_err(|_| WalletError::BadPassphrase)?;
                SecretRecord::Encrypted {
                    nonce: hex::encode(nonce),
                    ciphertext: hex::encode(ciphertext),
                }
            }
        };

        let address = keypair.address.clone();
        self.records.push(WalletRecord {
            address: address.clone(),
            public_key: keypair.public_key_hex(),
            secret,
            created_at: crate::core::unix_time_now(),
        });
        self.save()?;
        Ok(address)
    }

    /// Addresses with their public keys and whether they are encrypted.
    pub fn list(&self) -> Vec<(Address, String, bool)> {
        self.records
            .iter()
            .map(|r| {
                let encrypted = matches!(r.secret, SecretRecord::Encrypted { .. });
                (r.address.clone(), r.public_key.clone(), encrypted)
            })
            .collect()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.records.iter().any(|r| &r.address == address)
    }

    /// Recover the signing key for `address`, unsealing with `passphrase`
    /// when the record is encrypted.
    pub fn keypair(
        &self,
        address: &Address,
        passphrase: Option<&str>,
    ) -> Result<KeyPair, WalletError> {
        let record = self
            .records
            .iter()
            .find(|r| &r.address == address)
            .ok_or_else(|| WalletError::UnknownAddress(address.clone()))?;

        let secret_hex = match &record.secret {
            SecretRecord::Plain { secret_key } => secret_key.clone(),
            SecretRecord::Encrypted { nonce, ciphertext } => {
                let passphrase = passphrase.ok_or(WalletError::BadPassphrase)?;
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&passphrase_key(
                    passphrase,
                )));
                let nonce = hex::decode(nonce).map_err(|_| WalletError::BadPassphrase)?;
                let ciphertext =
                    hex::decode(ciphertext).map_err(|_| WalletError::BadPassphrase)?;
                let plain = cipher
                    .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                    .map_err(|_| WalletError::BadPassphrase)?;
                String::from_utf8(plain).map_err(|_| WalletError::BadPassphrase)?
            }
        };

        Ok(KeyPair::from_secret_hex(&secret_hex)?)
    }
}
