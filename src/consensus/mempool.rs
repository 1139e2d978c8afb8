// Mempool: validated transactions waiting for a block

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::consensus::validation::{verify_transaction, SpendView, TxError};
use crate::core::{Amount, Block, OutPoint, Transaction, UtxoSet};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("input already spent by a pending transaction: {0}")]
    DoubleSpendInMempool(OutPoint),
    #[error(transparent)]
    Tx(#[from] TxError),
}

impl MempoolError {
    pub fn kind(&self) -> &'static str {
        match self {
            MempoolError::DoubleSpendInMempool(_) => "double_spend_in_mempool",
            MempoolError::Tx(tx) => tx.kind(),
        }
    }
}

#[derive(Debug, Clone)]
struct MempoolEntry {
    tx: Transaction,
    fee: Amount,
    seq: u64,
}

/// Set of standard transactions, each fully validated against the UTXO set
/// at insertion. No two entries may spend the same outpoint.
#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<String, MempoolEntry>,
    next_seq: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.entries.contains_key(txid)
    }

    /// Every outpoint reserved by a pending transaction.
    pub fn pending_outpoints(&self) -> HashSet<OutPoint> {
        self.entries
            .values()
            .flat_map(|e| e.tx.inputs.iter().map(|i| i.outpoint()))
            .collect()
    }

    /// Validate and admit a transaction. Returns whether the transaction
    /// was newly admitted: resubmitting an already-pending txid is an
    /// accepted no-op. Coinbases are never accepted.
    pub fn submit(&mut self, tx: Transaction, utxos: &UtxoSet) -> Result<bool, MempoolError> {
        if self.contains(&tx.txid) {
            return Ok(false);
        }
        if tx.is_coinbase() {
            return Err(MempoolError::Tx(TxError::MissingInputsOrOutputs));
        }

        let pending = self.pending_outpoints();
        for input in &tx.inputs {
            let outpoint = input.outpoint();
            if pending.contains(&outpoint) {
                return Err(MempoolError::DoubleSpendInMempool(outpoint));
            }
        }

        let view = SpendView::new(utxos);
        let fee = verify_transaction(&tx, &view)?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(tx.txid.clone(), MempoolEntry { tx, fee, seq });
        Ok(true)
    }

    /// Up to `max` transactions for block inclusion, highest fee first,
    /// insertion order breaking ties.
    pub fn take(&self, max: usize) -> Vec<Transaction> {
        let mut pending: Vec<&MempoolEntry> = self.entries.values().collect();
        pending.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.seq.cmp(&b.seq)));
        pending.into_iter().take(max).map(|e| e.tx.clone()).collect()
    }

    /// All pending transactions in insertion order (persistence and the
    /// pending-transactions query).
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut pending: Vec<&MempoolEntry> = self.entries.values().collect();
        pending.sort_by_key(|e| e.seq);
        pending.into_iter().map(|e| e.tx.clone()).collect()
    }

    /// Drop every transaction included in `block`.
    pub fn remove_included(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.entries.remove(&tx.txid);
        }
    }

    /// Re-validate every entry against a new UTXO set, dropping the ones
    /// whose inputs are no longer spendable. Used after chain replacement
    /// and on startup.
    pub fn reconcile(&mut self, utxos: &UtxoSet) {
        let survivors = self.transactions();
        self.entries.clear();
        for tx in survivors {
            let txid = tx.txid.clone();
            if let Err(err) = self.submit(tx, utxos) {
                log::info!("evicting {txid} from mempool: {err}");
            }
        }
    }
}
