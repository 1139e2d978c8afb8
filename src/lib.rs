// Kaidos: an educational UTXO cryptocurrency
//
// A chain of cryptographically linked blocks, a proof-of-work miner, a
// mempool, a longest-chain consensus protocol over HTTP peers, and a
// wallet that issues signed transactions.

pub mod cli;
pub mod consensus;
pub mod core;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use consensus::{Blockchain, ChainParams, Mempool, Miner};
pub use core::{Address, Amount, Block, OutPoint, Transaction, TxInput, TxOutput, UtxoSet};
pub use network::{HttpPeerClient, NodeState, PeerExchange};
pub use storage::{SledStore, Store};
pub use wallet::{Keystore, TransactionBuilder};
