// sled-backed storage

use std::path::Path;

use sled::Tree;

use crate::core::{Block, Transaction, UtxoEntry, UtxoSet};
use crate::storage::{StorageError, Store};

const STATE_UTXO_KEY: &[u8] = b"utxo";
const STATE_MEMPOOL_KEY: &[u8] = b"mempool";

/// Storage backed by a single sled database with one tree per concern:
/// blocks keyed by big-endian index, a state tree for the UTXO and mempool
/// snapshots, and a peers tree keyed by address.
pub struct SledStore {
    db: sled::Db,
    blocks: Tree,
    state: Tree,
    peers: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// In-memory store for tests.
    pub fn memory() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    fn with_db(db: sled::Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let state = db.open_tree("state")?;
        let peers = db.open_tree("peers")?;
        Ok(Self {
            db,
            blocks,
            state,
            peers,
        })
    }

    fn block_key(index: u64) -> [u8; 8] {
        index.to_be_bytes()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl Store for SledStore {
    fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = serde_json::to_vec(block)?;
        self.blocks.insert(Self::block_key(block.index), value)?;
        self.flush()
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<(), StorageError> {
        self.blocks.clear()?;
        for block in blocks {
            let value = serde_json::to_vec(block)?;
            self.blocks.insert(Self::block_key(block.index), value)?;
        }
        self.flush()
    }

    fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let mut chain = Vec::new();
        for (expected, item) in self.blocks.iter().enumerate() {
            let (key, value) = item?;
            let block: Block = serde_json::from_slice(&value)?;
            let stored_index = key
                .as_ref()
                .try_into()
                .map(u64::from_be_bytes)
                .map_err(|_| StorageError::Corrupt("malformed block key".into()))?;
            if stored_index != expected as u64 || block.index != stored_index {
                return Err(StorageError::Corrupt(format!(
                    "block index {} stored at position {}",
                    block.index, expected
                )));
            }
            chain.push(block);
        }
        Ok(chain)
    }

    fn save_utxo_snapshot(&self, utxos: &UtxoSet) -> Result<(), StorageError> {
        let value = serde_json::to_vec(&utxos.entries())?;
        self.state.insert(STATE_UTXO_KEY, value)?;
        Ok(())
    }

    fn load_utxo_snapshot(&self) -> Result<Option<UtxoSet>, StorageError> {
        match self.state.get(STATE_UTXO_KEY)? {
            Some(value) => {
                let entries: Vec<UtxoEntry> = serde_json::from_slice(&value)?;
                Ok(Some(UtxoSet::from_entries(entries)))
            }
            None => Ok(None),
        }
    }

    fn save_mempool(&self, txs: &[Transaction]) -> Result<(), StorageError> {
        let value = serde_json::to_vec(txs)?;
        self.state.insert(STATE_MEMPOOL_KEY, value)?;
        Ok(())
    }

    fn load_mempool(&self) -> Result<Vec<Transaction>, StorageError> {
        match self.state.get(STATE_MEMPOOL_KEY)? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_peer(&self, addr: &str) -> Result<(), StorageError> {
        self.peers.insert(addr.as_bytes(), &[])?;
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<String>, StorageError> {
        let mut peers = Vec::new();
        for item in self.peers.iter() {
            let (key, _) = item?;
            let addr = String::from_utf8(key.to_vec())
                .map_err(|_| StorageError::Corrupt("peer address is not utf-8".into()))?;
            peers.push(addr);
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use crate::consensus::{Blockchain, ChainParams, Miner};
    use crate::core::{Amount, KeyPair, Transaction};

    fn small_chain(blocks: usize) -> Blockchain {
        let params = ChainParams {
            initial_difficulty: 1,
            ..ChainParams::default()
        };
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(params);
        for _ in 0..blocks {
            let tip = chain.tip();
            let coinbase = Transaction::coinbase(
                tip.index + 1,
                miner.address.clone(),
                chain.next_reward(),
                tip.timestamp + 1.0,
            );
            let mut block = Block::new(
                tip.index + 1,
                tip.hash.clone(),
                tip.timestamp + 1.0,
                chain.next_difficulty(),
                vec![coinbase],
            );
            Miner::new(u64::MAX)
                .mine(&mut block, &AtomicBool::new(false))
                .unwrap();
            chain.add_block(block).unwrap();
        }
        chain
    }

    #[test]
    fn test_chain_round_trip() {
        let chain = small_chain(3);
        let store = SledStore::memory().unwrap();

        for block in chain.blocks() {
            store.save_block(block).unwrap();
        }
        assert_eq!(store.load_chain().unwrap(), chain.blocks());
    }

    #[test]
    fn test_save_chain_replaces() {
        let store = SledStore::memory().unwrap();
        for block in small_chain(4).blocks() {
            store.save_block(block).unwrap();
        }

        let shorter = small_chain(2);
        store.save_chain(shorter.blocks()).unwrap();
        assert_eq!(store.load_chain().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_block_is_corrupt() {
        let store = SledStore::memory().unwrap();
        let chain = small_chain(2);
        // store genesis and block 2, skipping block 1
        store.save_block(&chain.blocks()[0]).unwrap();
        store.save_block(&chain.blocks()[2]).unwrap();

        assert!(matches!(
            store.load_chain(),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_utxo_snapshot_round_trip() {
        let chain = small_chain(2);
        let store = SledStore::memory().unwrap();

        assert!(store.load_utxo_snapshot().unwrap().is_none());
        store.save_utxo_snapshot(chain.utxos()).unwrap();
        let restored = store.load_utxo_snapshot().unwrap().unwrap();
        assert_eq!(&restored, chain.utxos());
        assert!(restored.total_value().unwrap() > Amount::ZERO);
    }

    #[test]
    fn test_mempool_round_trip() {
        let store = SledStore::memory().unwrap();
        assert!(store.load_mempool().unwrap().is_empty());

        let kp = KeyPair::generate();
        let tx = Transaction::coinbase(1, kp.address, Amount::from_coins(50), 1.0);
        store.save_mempool(&[tx.clone()]).unwrap();
        assert_eq!(store.load_mempool().unwrap(), vec![tx]);
    }

    #[test]
    fn test_peers_dedupe() {
        let store = SledStore::memory().unwrap();
        store.save_peer("127.0.0.1:5001").unwrap();
        store.save_peer("127.0.0.1:5002").unwrap();
        store.save_peer("127.0.0.1:5001").unwrap();

        let peers = store.load_peers().unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&"127.0.0.1:5001".to_string()));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let chain = small_chain(1);

        {
            let store = SledStore::open(dir.path()).unwrap();
            store.save_chain(chain.blocks()).unwrap();
            store.save_utxo_snapshot(chain.utxos()).unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.load_chain().unwrap(), chain.blocks());
        assert_eq!(
            store.load_utxo_snapshot().unwrap().unwrap(),
            *chain.utxos()
        );
    }
}
