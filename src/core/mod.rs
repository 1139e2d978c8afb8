// Core ledger data structures

mod block;
mod hash;
mod keys;
mod merkle;
mod transaction;
mod types;
mod utxo;

pub use block::Block;
pub use hash::{is_hex_hash, sha256_hex, ZERO_HASH};
pub use keys::{address_of_key, verify_signature, KeyError, KeyPair};
pub use merkle::{MerkleError, MerkleTree, ProofStep, Side};
pub use transaction::{Transaction, TxInput, TxOutput};
pub use types::{unix_time_now, Address, AddressError, Amount, AmountError, OutPoint, COIN};
pub use utxo::{BlockUndo, UtxoEntry, UtxoError, UtxoSet};
