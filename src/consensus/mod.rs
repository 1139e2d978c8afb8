// Consensus: proof of work, validation, mempool and the chain itself

pub mod chain;
pub mod mempool;
pub mod pow;
pub mod sync;
pub mod validation;

pub use chain::{Blockchain, ChainError, ChainParams};
pub use mempool::{Mempool, MempoolError};
pub use pow::{Miner, MiningError, MiningResult};
pub use sync::run_consensus;
pub use validation::{
    debug_transaction, verify_block, verify_transaction, BlockError, SpendView, TxDebugReport,
    TxError,
};
