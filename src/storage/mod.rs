// Persistence layer for chain, UTXO snapshot, mempool and peers

mod sled_store;

pub use sled_store::SledStore;

use thiserror::Error;

use crate::core::{Block, Transaction, UtxoSet};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Contract every storage backend fulfills. Writes that alter
/// consensus-critical state (`save_block`, `save_chain`) must be durable
/// before returning. The UTXO snapshot and mempool are caches: losing them
/// costs a rebuild, never consensus state.
pub trait Store: Send + Sync {
    /// Append one block durably.
    fn save_block(&self, block: &Block) -> Result<(), StorageError>;

    /// Durably replace the whole stored chain (chain replacement).
    fn save_chain(&self, blocks: &[Block]) -> Result<(), StorageError>;

    /// All stored blocks ordered by index; `Corrupt` if indexes are not
    /// contiguous from zero or a record fails to decode.
    fn load_chain(&self) -> Result<Vec<Block>, StorageError>;

    fn save_utxo_snapshot(&self, utxos: &UtxoSet) -> Result<(), StorageError>;
    fn load_utxo_snapshot(&self) -> Result<Option<UtxoSet>, StorageError>;

    fn save_mempool(&self, txs: &[Transaction]) -> Result<(), StorageError>;
    fn load_mempool(&self) -> Result<Vec<Transaction>, StorageError>;

    fn save_peer(&self, addr: &str) -> Result<(), StorageError>;
    fn load_peers(&self) -> Result<Vec<String>, StorageError>;
}
