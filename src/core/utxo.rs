// UTXO set: the authoritative map from outpoint to unspent output

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Address, Amount, Block, OutPoint, TxOutput};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UtxoError {
    #[error("unknown outpoint: {0}")]
    UnknownOutpoint(OutPoint),
    #[error("outpoint created twice: {0}")]
    DuplicateOutpoint(OutPoint),
}

/// Flat serialized form of one unspent output, shared by the storage
/// snapshot and the `get_utxos` peer RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UtxoEntry {
    pub txid: String,
    pub vout: u32,
    pub address: Address,
    pub amount: Amount,
}

impl UtxoEntry {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid.clone(), self.vout)
    }

    pub fn output(&self) -> TxOutput {
        TxOutput::new(self.address.clone(), self.amount)
    }
}

/// Undo data returned by `apply_block`, enough to make
/// apply-then-revert the identity.
#[derive(Debug, Clone)]
pub struct BlockUndo {
    spent: Vec<(OutPoint, TxOutput)>,
    created: Vec<OutPoint>,
}

/// In-memory UTXO set. Persistence is a cache of this; the set is always
/// rederivable by replaying the chain from genesis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.entries.insert(outpoint, output);
    }

    /// All unspent outputs payable to `address`, ordered by outpoint for
    /// deterministic iteration.
    pub fn by_address(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        let mut found: Vec<(OutPoint, TxOutput)> = self
            .entries
            .iter()
            .filter(|(_, out)| &out.address == address)
            .map(|(op, out)| (op.clone(), out.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.entries
            .values()
            .filter(|out| &out.address == address)
            .fold(Amount::ZERO, |acc, out| {
                acc.checked_add(out.amount).unwrap_or(acc)
            })
    }

    /// Total value held across all entries; None on overflow.
    pub fn total_value(&self) -> Option<Amount> {
        self.entries
            .values()
            .try_fold(Amount::ZERO, |acc, out| acc.checked_add(out.amount))
    }

    /// Remove every outpoint spent by the block's inputs and insert every
    /// output it creates. All-or-nothing: the set is untouched on error.
    pub fn apply_block(&mut self, block: &Block) -> Result<BlockUndo, UtxoError> {
        // pre-flight so a failure cannot leave a half-applied set
        let mut will_spend = Vec::new();
        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                if will_spend.contains(&outpoint) {
                    return Err(UtxoError::DuplicateOutpoint(outpoint));
                }
                will_spend.push(outpoint);
            }
        }
        let mut will_create = Vec::new();
        for tx in &block.transactions {
            for vout in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint::new(tx.txid.clone(), vout);
                if self.entries.contains_key(&outpoint) || will_create.contains(&outpoint) {
                    return Err(UtxoError::DuplicateOutpoint(outpoint));
                }
                will_create.push(outpoint);
            }
        }
        for outpoint in &will_spend {
            // spends of same-block outputs are satisfied by the creations above
            if !self.entries.contains_key(outpoint) && !will_create.contains(outpoint) {
                return Err(UtxoError::UnknownOutpoint(outpoint.clone()));
            }
        }

        let mut undo = BlockUndo {
            spent: Vec::new(),
            created: Vec::new(),
        };
        for tx in &block.transactions {
            for (vout, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(tx.txid.clone(), vout as u32);
                self.entries.insert(outpoint.clone(), output.clone());
                undo.created.push(outpoint);
            }
        }
        for outpoint in will_spend {
            let output = self
                .entries
                .remove(&outpoint)
                .expect("pre-flight guarantees presence");
            if undo.created.contains(&outpoint) {
                // created and spent within this block: nets out to nothing
                undo.created.retain(|op| op != &outpoint);
            } else {
                undo.spent.push((outpoint, output));
            }
        }
        Ok(undo)
    }

    /// Inverse of `apply_block` given the undo data it produced.
    pub fn revert_block(&mut self, undo: BlockUndo) -> Result<(), UtxoError> {
        for outpoint in undo.created {
            if self.entries.remove(&outpoint).is_none() {
                return Err(UtxoError::UnknownOutpoint(outpoint));
            }
        }
        for (outpoint, output) in undo.spent {
            if self.entries.contains_key(&outpoint) {
                return Err(UtxoError::DuplicateOutpoint(outpoint));
            }
            self.entries.insert(outpoint, output);
        }
        Ok(())
    }

    pub fn entries(&self) -> Vec<UtxoEntry> {
        let mut all: Vec<UtxoEntry> = self
            .entries
            .iter()
            .map(|(op, out)| UtxoEntry {
                txid: op.txid.clone(),
                vout: op.vout,
                address: out.address.clone(),
                amount: out.amount,
            })
            .collect();
        all.sort_by(|a, b| (&a.txid, a.vout).cmp(&(&b.txid, b.vout)));
        all
    }

    pub fn from_entries(entries: Vec<UtxoEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            set.insert(entry.outpoint(), entry.output());
        }
        set
    }
}
