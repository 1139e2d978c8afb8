// M-of-N multisig addresses at the wallet layer
//
// Consensus validation only understands single-key inputs; these addresses
// and signature sets are the wallet-side half of the scheme, kept as an
// extension point for the input format.

use serde::Serialize;

use crate::core::{verify_signature, Address, KeyPair};
use crate::wallet::WalletError;

#[derive(Serialize)]
struct MultisigCommitment<'a> {
    public_keys: &'a [String],
    required_signatures: usize,
}

pub struct MultisigWallet;

impl MultisigWallet {
    /// Derive the `KDM` address committing to a sorted key set and its
    /// threshold. Key order does not matter: the keys are sorted before
    /// hashing, so any holder derives the same address.
    pub fn create_address(public_keys: &[String], required: usize) -> Result<Address, WalletError> {
        if required == 0 || required > public_keys.len() {
            return Err(WalletError::InvalidThreshold);
        }

        let mut sorted = public_keys.to_vec();
        sorted.sort();
        let commitment = MultisigCommitment {
            public_keys: &sorted,
            required_signatures: required,
        };
        let json =
            serde_json::to_string(&commitment).expect("commitment serialization is infallible");
        Ok(Address::derive(Address::MULTISIG_PREFIX, json.as_bytes()))
    }

    /// One participant's signature over the shared preimage.
    pub fn sign(preimage: &str, keypair: &KeyPair) -> String {
        keypair.sign(preimage)
    }

    /// Check that at least `required` of the given signatures are valid
    /// signatures over `preimage` by distinct listed keys.
    pub fn verify(
        preimage: &str,
        signatures: &[String],
        public_keys: &[String],
        required: usize,
    ) -> bool {
        if required == 0 || signatures.len() < required {
            return false;
        }

        let mut unused: Vec<&String> = public_keys.iter().collect();
        let mut valid = 0;
        for signature in signatures {
            let matched = unused.iter().position(|key| {
                verify_signature(key, signature, preimage).is_ok()
            });
            if let Some(at) = matched {
                unused.remove(at);
                valid += 1;
                if valid >= required {
                    return true;
                }
            }
        }
        false
    }
}
