// Wallet: key storage and transaction building

mod keystore;
mod multisig;
mod tx_builder;

pub use keystore::{Keystore, WalletError};
pub use multisig::MultisigWallet;
pub use tx_builder::TransactionBuilder;
