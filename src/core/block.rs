// Block data model, header hashing and the genesis constant

use serde::{Deserialize, Serialize};

use crate::core::{sha256_hex, Address, Amount, MerkleTree, Transaction, ZERO_HASH};

/// Fixed material the reserved genesis payout address derives from. These
/// bytes (with the rest of the genesis constants) are the network identity.
const GENESIS_TAG: &[u8] = b"kaidos-genesis";

/// A block: header fields plus the ordered transaction list. `hash` is the
/// SHA-256 of the canonical header serialization and must carry
/// `difficulty` leading hex zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: f64,
    pub merkle_root: String,
    pub difficulty: u32,
    pub nonce: u64,
    pub hash: String,
    pub transactions: Vec<Transaction>,
}

// Canonical header preimage; lexicographic field order makes the compact
// serde_json output key-sorted.
#[derive(Serialize)]
struct HeaderPreimage<'a> {
    difficulty: u32,
    index: u64,
    merkle_root: &'a str,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: f64,
}

impl Block {
    /// Assemble a block over `transactions`, committing to their txids in
    /// the merkle root. Nonce starts at zero; the caller mines afterwards.
    pub fn new(
        index: u64,
        previous_hash: String,
        timestamp: f64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let txids: Vec<String> = transactions.iter().map(|tx| tx.txid.clone()).collect();
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            merkle_root: MerkleTree::root(&txids),
            difficulty,
            nonce: 0,
            hash: String::new(),
            transactions,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn compute_hash(&self) -> String {
        let preimage = HeaderPreimage {
            difficulty: self.difficulty,
            index: self.index,
            merkle_root: &self.merkle_root,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
        };
        let json = serde_json::to_string(&preimage).expect("header serialization is infallible");
        sha256_hex(json.as_bytes())
    }

    /// Whether a hash satisfies a difficulty (leading hex zeros).
    pub fn satisfies_difficulty(hash: &str, difficulty: u32) -> bool {
        hash.bytes().take(difficulty as usize).all(|b| b == b'0') && hash.len() >= difficulty as usize
    }

    pub fn meets_difficulty(&self) -> bool {
        Self::satisfies_difficulty(&self.hash, self.difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == ZERO_HASH
    }

    /// The merkle root recomputed from the current transaction list.
    pub fn compute_merkle_root(&self) -> String {
        let txids: Vec<String> = self.transactions.iter().map(|tx| tx.txid.clone()).collect();
        MerkleTree::root(&txids)
    }

    /// The reserved address the genesis coinbase pays (zero) to.
    pub fn genesis_address() -> Address {
        Address::derive(Address::PREFIX, GENESIS_TAG)
    }

    /// The deterministic genesis block: index 0, zero previous hash,
    /// timestamp 0, one zero-value coinbase to the reserved address, and
    /// the smallest nonce whose hash meets `difficulty`. Every node
    /// recomputes identical bytes, so the result defines the network.
    pub fn genesis(difficulty: u32) -> Self {
        let coinbase = Transaction::coinbase(0, Self::genesis_address(), Amount::ZERO, 0.0);
        let mut block = Self::new(0, ZERO_HASH.to_string(), 0.0, difficulty, vec![coinbase]);
        while !block.meets_difficulty() {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        block
    }
}
