// Transaction and block validation against a UTXO snapshot

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::core::{
    address_of_key, verify_signature, Amount, Block, KeyError, OutPoint, Transaction, TxOutput,
    UtxoSet,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("txid does not match transaction contents")]
    BadTxid,
    #[error("referenced output does not exist: {0}")]
    UnknownInput(OutPoint),
    #[error("output already spent: {0}")]
    DoubleSpendInBlock(OutPoint),
    #[error("public key or signature does not bind the input to its owner")]
    SignatureMismatch,
    #[error("output amounts must be greater than zero")]
    NegativeOrZeroAmount,
    #[error("inputs total {inputs} is below outputs total {outputs}")]
    InsufficientInputs { inputs: Amount, outputs: Amount },
    #[error("transaction must have at least one input and one output")]
    MissingInputsOrOutputs,
    #[error("value overflow")]
    ValueOverflow,
    #[error("malformed public key")]
    MalformedKey,
}

impl TxError {
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::BadTxid => "bad_txid",
            TxError::UnknownInput(_) => "unknown_input",
            TxError::DoubleSpendInBlock(_) => "double_spend_in_block",
            TxError::SignatureMismatch => "signature_mismatch",
            TxError::NegativeOrZeroAmount => "negative_or_zero_amount",
            TxError::InsufficientInputs { .. } => "insufficient_inputs",
            TxError::MissingInputsOrOutputs => "missing_inputs_or_outputs",
            TxError::ValueOverflow => "value_overflow",
            TxError::MalformedKey => "malformed_key",
        }
    }
}

impl From<KeyError> for TxError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::MalformedKey => TxError::MalformedKey,
            KeyError::InvalidSignature => TxError::SignatureMismatch,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("block does not link to the previous block")]
    BadBlockLink,
    #[error("stored hash does not match the header")]
    BadHash,
    #[error("hash does not satisfy difficulty {0}")]
    BadPoW(u32),
    #[error("merkle root does not commit to the transactions")]
    BadMerkleRoot,
    #[error("coinbase is malformed or overpays: {0}")]
    BadCoinbase(String),
    #[error("timestamp went backwards relative to the previous block")]
    BadTimestamp,
    #[error(transparent)]
    Tx(#[from] TxError),
}

impl BlockError {
    pub fn kind(&self) -> &'static str {
        match self {
            BlockError::BadBlockLink => "bad_block_link",
            BlockError::BadHash => "bad_hash",
            BlockError::BadPoW(_) => "bad_pow",
            BlockError::BadMerkleRoot => "bad_merkle_root",
            BlockError::BadCoinbase(_) => "bad_coinbase",
            BlockError::BadTimestamp => "bad_timestamp",
            BlockError::Tx(tx) => tx.kind(),
        }
    }
}

/// A UTXO snapshot extended with the effects of transactions seen so far:
/// outpoints they consumed and outputs they created. This is what makes
/// intra-block (and intra-mempool) double-spends visible.
pub struct SpendView<'a> {
    utxos: &'a UtxoSet,
    created: HashMap<OutPoint, TxOutput>,
    spent: HashSet<OutPoint>,
}

impl<'a> SpendView<'a> {
    pub fn new(utxos: &'a UtxoSet) -> Self {
        Self {
            utxos,
            created: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        if self.spent.contains(outpoint) {
            return None;
        }
        self.created
            .get(outpoint)
            .or_else(|| self.utxos.get(outpoint))
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }

    /// Treat `outpoint` as consumed without folding in a whole transaction
    /// (used to overlay mempool reservations).
    pub fn mark_spent(&mut self, outpoint: OutPoint) {
        self.spent.insert(outpoint);
    }

    /// Fold a validated transaction's effects into the view.
    pub fn apply(&mut self, tx: &Transaction) {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                self.spent.insert(input.outpoint());
            }
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.created
                .insert(OutPoint::new(tx.txid.clone(), vout as u32), output.clone());
        }
    }
}

/// Verify a standard (non-coinbase) transaction against `view` and return
/// its fee. The view is not modified; callers fold the transaction in with
/// `SpendView::apply` once accepted.
pub fn verify_transaction(tx: &Transaction, view: &SpendView) -> Result<Amount, TxError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TxError::MissingInputsOrOutputs);
    }
    if tx.txid != tx.compute_txid() {
        return Err(TxError::BadTxid);
    }
    if tx.outputs.iter().any(|o| o.amount.is_zero()) {
        return Err(TxError::NegativeOrZeroAmount);
    }
    let output_total = tx.output_total().ok_or(TxError::ValueOverflow)?;

    let preimage = tx.signing_preimage();
    let mut seen = HashSet::new();
    let mut input_total = Amount::ZERO;

    for input in &tx.inputs {
        let outpoint = input.outpoint();
        if view.is_spent(&outpoint) || !seen.insert(outpoint.clone()) {
            return Err(TxError::DoubleSpendInBlock(outpoint));
        }
        let prev_out = view
            .lookup(&outpoint)
            .ok_or_else(|| TxError::UnknownInput(outpoint.clone()))?;

        // the key must hash to the owning address and sign the shared preimage
        if address_of_key(&input.public_key)? != prev_out.address {
            return Err(TxError::SignatureMismatch);
        }
        verify_signature(&input.public_key, &input.signature, &preimage)?;

        input_total = input_total
            .checked_add(prev_out.amount)
            .ok_or(TxError::ValueOverflow)?;
    }

    input_total
        .checked_sub(output_total)
        .ok_or(TxError::InsufficientInputs {
            inputs: input_total,
            outputs: output_total,
        })
}

/// Verify a full block against its predecessor and the UTXO set at the
/// predecessor's tip. Transactions are checked against an evolving
/// snapshot, so a later transaction may spend an earlier one's outputs and
/// intra-block double-spends are caught.
pub fn verify_block(
    block: &Block,
    previous: &Block,
    expected_difficulty: u32,
    expected_reward: Amount,
    utxos: &UtxoSet,
) -> Result<(), BlockError> {
    if block.previous_hash != previous.hash || block.index != previous.index + 1 {
        return Err(BlockError::BadBlockLink);
    }
    if block.hash != block.compute_hash() {
        return Err(BlockError::BadHash);
    }
    if block.difficulty != expected_difficulty || !block.meets_difficulty() {
        return Err(BlockError::BadPoW(expected_difficulty));
    }
    if block.timestamp < previous.timestamp {
        return Err(BlockError::BadTimestamp);
    }

    let coinbase = match block.transactions.first() {
        Some(tx) if tx.is_coinbase() => tx,
        _ => return Err(BlockError::BadCoinbase("first transaction must be the coinbase".into())),
    };
    if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(BlockError::BadCoinbase("only the first transaction may be a coinbase".into()));
    }
    if coinbase.txid != coinbase.compute_txid() {
        return Err(BlockError::Tx(TxError::BadTxid));
    }
    if coinbase.outputs.is_empty() {
        return Err(BlockError::BadCoinbase("coinbase must pay at least one output".into()));
    }

    if block.merkle_root != block.compute_merkle_root() {
        return Err(BlockError::BadMerkleRoot);
    }

    let mut view = SpendView::new(utxos);
    view.apply(coinbase);
    let mut fees = Amount::ZERO;
    for tx in block.transactions.iter().skip(1) {
        let fee = verify_transaction(tx, &view)?;
        fees = fees.checked_add(fee).ok_or(TxError::ValueOverflow)?;
        view.apply(tx);
    }

    let max_payout = expected_reward
        .checked_add(fees)
        .ok_or(BlockError::Tx(TxError::ValueOverflow))?;
    let paid = coinbase
        .output_total()
        .ok_or(BlockError::Tx(TxError::ValueOverflow))?;
    if paid > max_payout {
        return Err(BlockError::BadCoinbase(format!(
            "coinbase pays {paid}, allowed {max_payout}"
        )));
    }

    Ok(())
}

/// Structured validation report for a transaction, produced without
/// touching any state. Serves the node's debug endpoint.
#[derive(Debug, Serialize)]
pub struct TxDebugReport {
    pub valid: bool,
    pub error: Option<String>,
    pub inputs: Vec<InputDebug>,
    pub input_total: Amount,
    pub output_total: Amount,
    pub fee: Amount,
}

#[derive(Debug, Serialize)]
pub struct InputDebug {
    pub txid: String,
    pub vout: u32,
    pub found: bool,
    pub spent: bool,
    pub signature_valid: bool,
    pub amount: Amount,
}

pub fn debug_transaction(tx: &Transaction, view: &SpendView) -> TxDebugReport {
    let preimage = tx.signing_preimage();
    let mut input_total = Amount::ZERO;
    let mut inputs = Vec::new();

    for input in &tx.inputs {
        let outpoint = input.outpoint();
        let spent = view.is_spent(&outpoint);
        let prev_out = view.lookup(&outpoint);
        let signature_valid = prev_out.is_some_and(|out| {
            address_of_key(&input.public_key).is_ok_and(|addr| addr == out.address)
                && verify_signature(&input.public_key, &input.signature, &preimage).is_ok()
        });
        let amount = prev_out.map(|o| o.amount).unwrap_or(Amount::ZERO);
        if let Some(out) = prev_out {
            input_total = input_total.checked_add(out.amount).unwrap_or(input_total);
        }
        inputs.push(InputDebug {
            txid: input.txid.clone(),
            vout: input.vout,
            found: prev_out.is_some(),
            spent,
            signature_valid,
            amount,
        });
    }

    let output_total = tx.output_total().unwrap_or(Amount::ZERO);
    let result = verify_transaction(tx, view);
    TxDebugReport {
        valid: result.is_ok(),
        error: result.err().map(|e| e.to_string()),
        inputs,
        input_total,
        output_total,
        fee: input_total.saturating_sub(output_total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{KeyPair, Transaction, TxInput};

    /// A signed transaction spending `outpoint` (owned by `owner`) into
    /// the given outputs.
    fn signed_tx(owner: &KeyPair, outpoint: OutPoint, outputs: Vec<TxOutput>) -> Transaction {
        let mut tx = Transaction::new(
            vec![TxInput::new(outpoint.txid, outpoint.vout)],
            outputs,
            42.0,
        );
        let preimage = tx.signing_preimage();
        for input in &mut tx.inputs {
            input.signature = owner.sign(&preimage);
            input.public_key = owner.public_key_hex();
        }
        tx.txid = tx.compute_txid();
        tx
    }

    fn funded_set(owner: &KeyPair, value: Amount) -> (UtxoSet, OutPoint) {
        let mut utxos = UtxoSet::new();
        let outpoint = OutPoint::new("11".repeat(32), 0);
        utxos.insert(outpoint.clone(), TxOutput::new(owner.address.clone(), value));
        (utxos, outpoint)
    }

    #[test]
    fn test_valid_transaction_and_fee() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(50));
        let recipient = KeyPair::generate();

        let tx = signed_tx(
            &owner,
            outpoint,
            vec![
                TxOutput::new(recipient.address, Amount::from_coins(20)),
                TxOutput::new(owner.address.clone(), Amount::from_coins(29)),
            ],
        );

        let view = SpendView::new(&utxos);
        let fee = verify_transaction(&tx, &view).unwrap();
        assert_eq!(fee, Amount::from_coins(1));
    }

    #[test]
    fn test_rejects_bad_txid() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(50));

        let mut tx = signed_tx(
            &owner,
            outpoint,
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(50))],
        );
        tx.txid = "00".repeat(32);

        let view = SpendView::new(&utxos);
        assert_eq!(verify_transaction(&tx, &view), Err(TxError::BadTxid));
    }

    #[test]
    fn test_rejects_unknown_input() {
        let owner = KeyPair::generate();
        let utxos = UtxoSet::new();

        let tx = signed_tx(
            &owner,
            OutPoint::new("22".repeat(32), 0),
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(1))],
        );

        let view = SpendView::new(&utxos);
        assert!(matches!(
            verify_transaction(&tx, &view),
            Err(TxError::UnknownInput(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(50));

        // the thief signs a spend of the owner's output
        let tx = signed_tx(
            &thief,
            outpoint,
            vec![TxOutput::new(thief.address.clone(), Amount::from_coins(50))],
        );

        let view = SpendView::new(&utxos);
        assert_eq!(
            verify_transaction(&tx, &view),
            Err(TxError::SignatureMismatch)
        );
    }

    #[test]
    fn test_rejects_overspend() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(10));

        let tx = signed_tx(
            &owner,
            outpoint,
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(11))],
        );

        let view = SpendView::new(&utxos);
        assert!(matches!(
            verify_transaction(&tx, &view),
            Err(TxError::InsufficientInputs { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_amount_output() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(10));

        let tx = signed_tx(
            &owner,
            outpoint,
            vec![TxOutput::new(owner.address.clone(), Amount::ZERO)],
        );

        let view = SpendView::new(&utxos);
        assert_eq!(
            verify_transaction(&tx, &view),
            Err(TxError::NegativeOrZeroAmount)
        );
    }

    #[test]
    fn test_spend_view_sees_intra_block_spends() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(50));

        let tx = signed_tx(
            &owner,
            outpoint.clone(),
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(50))],
        );

        let mut view = SpendView::new(&utxos);
        verify_transaction(&tx, &view).unwrap();
        view.apply(&tx);

        // a second spend of the same outpoint is now a double-spend
        let again = signed_tx(
            &owner,
            outpoint,
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(49))],
        );
        assert!(matches!(
            verify_transaction(&again, &view),
            Err(TxError::DoubleSpendInBlock(_))
        ));

        // but the freshly created output is spendable
        let chained = signed_tx(
            &owner,
            OutPoint::new(tx.txid.clone(), 0),
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(50))],
        );
        verify_transaction(&chained, &view).unwrap();
    }

    #[test]
    fn test_debug_report() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded_set(&owner, Amount::from_coins(50));

        let tx = signed_tx(
            &owner,
            outpoint,
            vec![TxOutput::new(owner.address.clone(), Amount::from_coins(49))],
        );
        let view = SpendView::new(&utxos);
        let report = debug_transaction(&tx, &view);
        assert!(report.valid);
        assert_eq!(report.fee, Amount::from_coins(1));
        assert!(report.inputs[0].found);
        assert!(report.inputs[0].signature_valid);
    }
}
