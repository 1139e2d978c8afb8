// Transaction data model and canonical serialization

use serde::{Deserialize, Serialize};

use crate::core::{sha256_hex, Address, Amount, OutPoint, ZERO_HASH};

/// Transaction input. For a coinbase, `txid` is the zero hash, `public_key`
/// is empty and `signature` carries the coinbase nonce that keeps coinbase
/// txids unique across heights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxInput {
    pub txid: String,
    pub vout: u32,
    pub signature: String,
    pub public_key: String,
}

impl TxInput {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
            signature: String::new(),
            public_key: String::new(),
        }
    }

    /// Synthetic coinbase input for a block at `height`.
    pub fn coinbase(height: u64) -> Self {
        Self {
            txid: ZERO_HASH.to_string(),
            vout: 0,
            signature: hex::encode(height.to_be_bytes()),
            public_key: String::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid.clone(), self.vout)
    }

    pub fn is_coinbase(&self) -> bool {
        self.txid == ZERO_HASH
    }
}

/// Transaction output: an amount payable to an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

impl TxOutput {
    pub fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }
}

/// A transaction. `txid` is the SHA-256 of the canonical serialization of
/// everything else, including signatures and public keys; the signing
/// preimage excludes them so all inputs share one signature target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: f64,
}

// Preimage shapes. Field declaration order is lexicographic, so compact
// serde_json output is the key-sorted canonical form.
#[derive(Serialize)]
struct SigningInput<'a> {
    txid: &'a str,
    vout: u32,
}

#[derive(Serialize)]
struct TxidInput<'a> {
    public_key: &'a str,
    signature: &'a str,
    txid: &'a str,
    vout: u32,
}

#[derive(Serialize)]
struct Preimage<I> {
    inputs: Vec<I>,
    outputs: Vec<PreimageOutput>,
    timestamp: f64,
}

#[derive(Serialize)]
struct PreimageOutput {
    address: String,
    amount: String,
}

impl Transaction {
    /// Assemble a transaction, computing its txid.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, timestamp: f64) -> Self {
        let mut tx = Self {
            txid: String::new(),
            inputs,
            outputs,
            timestamp,
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Coinbase paying `value` to `miner` for the block at `height`.
    pub fn coinbase(height: u64, miner: Address, value: Amount, timestamp: f64) -> Self {
        Self::new(
            vec![TxInput::coinbase(height)],
            vec![TxOutput::new(miner, value)],
            timestamp,
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    fn preimage_outputs(&self) -> Vec<PreimageOutput> {
        self.outputs
            .iter()
            .map(|o| PreimageOutput {
                address: o.address.as_str().to_string(),
                amount: o.amount.to_string(),
            })
            .collect()
    }

    /// The string every input signs: inputs stripped to their outpoints,
    /// outputs, and the timestamp, as key-sorted compact JSON.
    pub fn signing_preimage(&self) -> String {
        let preimage = Preimage {
            inputs: self
                .inputs
                .iter()
                .map(|i| SigningInput {
                    txid: &i.txid,
                    vout: i.vout,
                })
                .collect(),
            outputs: self.preimage_outputs(),
            timestamp: self.timestamp,
        };
        serde_json::to_string(&preimage).expect("preimage serialization is infallible")
    }

    /// Recompute the txid from the full contents.
    pub fn compute_txid(&self) -> String {
        let preimage = Preimage {
            inputs: self
                .inputs
                .iter()
                .map(|i| TxidInput {
                    public_key: &i.public_key,
                    signature: &i.signature,
                    txid: &i.txid,
                    vout: i.vout,
                })
                .collect(),
            outputs: self.preimage_outputs(),
            timestamp: self.timestamp,
        };
        let json = serde_json::to_string(&preimage).expect("preimage serialization is infallible");
        sha256_hex(json.as_bytes())
    }

    /// Sum of output amounts; None on overflow.
    pub fn output_total(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, o| acc.checked_add(o.amount))
    }
}
