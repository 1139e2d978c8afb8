// Merkle commitment over the ordered txids of a block

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{is_hex_hash, sha256_hex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("malformed inclusion proof")]
    MalformedProof,
}

/// Which side of the concatenation a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion proof, leaf to root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProofStep {
    pub hash: String,
    pub side: Side,
}

pub struct MerkleTree;

impl MerkleTree {
    /// Root over an ordered list of txids. Leaves are the txids themselves;
    /// a parent is SHA256 over the concatenated hex of its children; an odd
    /// level duplicates its last element.
    pub fn root(txids: &[String]) -> String {
        if txids.is_empty() {
            // never happens for real blocks, every block has a coinbase
            return sha256_hex(b"");
        }

        let mut level: Vec<String> = txids.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let left = &pair[0];
                let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
                next.push(sha256_hex(format!("{left}{right}").as_bytes()));
            }
            level = next;
        }
        level.remove(0)
    }

    /// Inclusion proof for `txid`, or None if it is not in the list.
    pub fn proof(txids: &[String], txid: &str) -> Option<Vec<ProofStep>> {
        let mut index = txids.iter().position(|t| t == txid)?;
        let mut level: Vec<String> = txids.to_vec();
        let mut steps = Vec::new();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for (i, pair) in level.chunks(2).enumerate() {
                let left = &pair[0];
                let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
                if i == index / 2 {
                    if index % 2 == 0 {
                        steps.push(ProofStep {
                            hash: right.clone(),
                            side: Side::Right,
                        });
                    } else {
                        steps.push(ProofStep {
                            hash: left.clone(),
                            side: Side::Left,
                        });
                    }
                }
                next.push(sha256_hex(format!("{left}{right}").as_bytes()));
            }
            index /= 2;
            level = next;
        }

        Some(steps)
    }

    /// Recompute from `txid` along `proof` and compare against `root`.
    pub fn verify(root: &str, txid: &str, proof: &[ProofStep]) -> Result<bool, MerkleError> {
        if !is_hex_hash(txid) {
            return Err(MerkleError::MalformedProof);
        }

        let mut current = txid.to_string();
        for step in proof {
            if !is_hex_hash(&step.hash) {
                return Err(MerkleError::MalformedProof);
            }
            current = match step.side {
                Side::Left => sha256_hex(format!("{}{}", step.hash, current).as_bytes()),
                Side::Right => sha256_hex(format!("{}{}", current, step.hash).as_bytes()),
            };
        }
        Ok(current == root)
    }
}
