// Transaction building: coin selection, change, signing

use crate::core::{Address, Amount, Transaction, TxInput, TxOutput, UtxoEntry};
use crate::wallet::{Keystore, WalletError};

/// Builds signed transactions from a keystore and a view of the sender's
/// unspent outputs (typically fetched from a node).
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keystore: &'a Keystore) -> Self {
        Self { keystore }
    }

    /// Build and sign a payment of `amount` from `from` to `to`, selecting
    /// from `utxos` greedily largest-first and returning any surplus to the
    /// sender as change. Every input signs the shared preimage.
    pub fn build(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
        utxos: &[UtxoEntry],
        passphrase: Option<&str>,
        timestamp: f64,
    ) -> Result<Transaction, WalletError> {
        let keypair = self.keystore.keypair(from, passphrase)?;

        let mut spendable: Vec<&UtxoEntry> =
            utxos.iter().filter(|u| &u.address == from).collect();
        spendable.sort_by(|a, b| b.amount.cmp(&a.amount));

        let available = spendable
            .iter()
            .fold(Amount::ZERO, |acc, u| acc.checked_add(u.amount).unwrap_or(acc));

        let mut selected = Vec::new();
        let mut covered = Amount::ZERO;
        for utxo in spendable {
            selected.push(utxo);
            covered = covered
                .checked_add(utxo.amount)
                .ok_or(WalletError::InsufficientFunds {
                    available,
                    required: amount,
                })?;
            if covered >= amount {
                break;
            }
        }
        if covered < amount {
            return Err(WalletError::InsufficientFunds {
                available,
                required: amount,
            });
        }

        let inputs: Vec<TxInput> = selected
            .iter()
            .map(|u| TxInput::new(u.txid.clone(), u.vout))
            .collect();

        let mut outputs = vec![TxOutput::new(to.clone(), amount)];
        let change = covered.saturating_sub(amount);
        if !change.is_zero() {
            outputs.push(TxOutput::new(from.clone(), change));
        }

        let mut tx = Transaction::new(inputs, outputs, timestamp);
        let preimage = tx.signing_preimage();
        let signature = keypair.sign(&preimage);
        let public_key = keypair.public_key_hex();
        for input in &mut tx.inputs {
            input.signature = signature.clone();
            input.public_key = public_key.clone();
        }
        tx.txid = tx.compute_txid();
        Ok(tx)
    }
}
