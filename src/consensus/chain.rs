// Chain state: ordered blocks, derived UTXO set, difficulty and reward

use std::time::Duration;

use thiserror::Error;

use crate::consensus::validation::{verify_block, BlockError, TxError};
use crate::core::{Amount, Block, UtxoError, UtxoSet, COIN};

/// Consensus constants. Everything that defines the network's behavior
/// (and, through the genesis block, its identity) lives here.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Difficulty of the genesis block and of the first retarget window.
    pub initial_difficulty: u32,
    /// Blocks between difficulty retargets (must be at least 2).
    pub retarget_interval: u64,
    /// Desired seconds between blocks.
    pub target_block_time: f64,
    /// Coinbase reward before any halving.
    pub initial_reward: Amount,
    /// Blocks between reward halvings.
    pub halving_interval: u64,
    /// Upper bound of the nonce scan before mining reports a stall.
    pub max_nonce: u64,
    /// Most transactions a mined block will pull from the mempool.
    pub block_tx_limit: usize,
    /// Most peers consulted in one consensus run.
    pub peer_cap: usize,
    /// Per-call timeout for peer RPCs.
    pub rpc_timeout: Duration,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            initial_difficulty: 4,
            retarget_interval: 10,
            target_block_time: 600.0,
            initial_reward: Amount::from_units(50 * COIN),
            halving_interval: 210_000,
            max_nonce: u32::MAX as u64,
            block_tx_limit: 100,
            peer_cap: 16,
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("candidate chain rejected")]
    InvalidCandidateChain,
    #[error(transparent)]
    Block(#[from] BlockError),
}

impl ChainError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::InvalidCandidateChain => "invalid_candidate_chain",
            ChainError::Block(b) => b.kind(),
        }
    }
}

/// The chain and its derived state. Appends and replacements keep the UTXO
/// set exactly consistent with the block list; on any validation failure
/// both are left untouched.
#[derive(Debug, Clone)]
pub struct Blockchain {
    params: ChainParams,
    blocks: Vec<Block>,
    utxos: UtxoSet,
}

impl Blockchain {
    /// Fresh chain holding only the deterministic genesis block.
    pub fn new(params: ChainParams) -> Self {
        let genesis = Block::genesis(params.initial_difficulty);
        Self::with_genesis(params, genesis)
    }

    fn with_genesis(params: ChainParams, genesis: Block) -> Self {
        let mut utxos = UtxoSet::new();
        utxos
            .apply_block(&genesis)
            .expect("genesis applies to an empty set");
        Self {
            params,
            blocks: vec![genesis],
            utxos,
        }
    }

    /// Rebuild a chain from stored blocks, re-validating every link, hash,
    /// proof of work and transaction. The first block must be this
    /// network's genesis.
    pub fn from_blocks(params: ChainParams, blocks: Vec<Block>) -> Result<Self, ChainError> {
        let expected_genesis = Block::genesis(params.initial_difficulty);
        let mut blocks = blocks.into_iter();
        match blocks.next() {
            Some(genesis) if genesis == expected_genesis => {}
            _ => return Err(ChainError::InvalidCandidateChain),
        }

        let mut chain = Self::with_genesis(params, expected_genesis);
        for block in blocks {
            chain.add_block(block)?;
        }
        Ok(chain)
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Block count, genesis included; never zero.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the tip block.
    pub fn height(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain is never empty")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Blocks with `start <= index <= end`, clamped to the chain.
    pub fn range(&self, start: u64, end: Option<u64>) -> &[Block] {
        let last = self.height();
        let end = end.unwrap_or(last).min(last);
        if start > end {
            return &[];
        }
        &self.blocks[start as usize..=end as usize]
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    /// Reward for the block at `height` under the halving schedule: the
    /// first `halving_interval` reward-bearing blocks (heights 1..=interval)
    /// pay the full reward, each later era half the previous, reaching zero
    /// once the halving exceeds the unit precision.
    pub fn reward_at(params: &ChainParams, height: u64) -> Amount {
        let halvings = height.saturating_sub(1) / params.halving_interval.max(1);
        if halvings >= u64::BITS as u64 {
            return Amount::ZERO;
        }
        Amount::from_units(params.initial_reward.units() >> halvings)
    }

    pub fn next_reward(&self) -> Amount {
        Self::reward_at(&self.params, self.blocks.len() as u64)
    }

    /// Expected difficulty of the next block, recomputed from history: at
    /// every `retarget_interval` boundary the mean spacing of the window is
    /// compared against the target; faster than half the target raises
    /// difficulty by one, slower than twice lowers it by one, floor 1.
    pub fn next_difficulty(&self) -> u32 {
        Self::difficulty_at(&self.params, &self.blocks, self.blocks.len() as u64)
    }

    fn difficulty_at(params: &ChainParams, blocks: &[Block], height: u64) -> u32 {
        let interval = params.retarget_interval;
        let mut difficulty = params.initial_difficulty;
        if interval < 2 {
            return difficulty;
        }

        let mut boundary = interval;
        while boundary <= height {
            let window = &blocks[(boundary - interval) as usize..boundary as usize];
            let span = window[window.len() - 1].timestamp - window[0].timestamp;
            let mean_spacing = span / (interval - 1) as f64;

            if mean_spacing < params.target_block_time * 0.5 {
                difficulty += 1;
            } else if mean_spacing > params.target_block_time * 2.0 {
                difficulty = difficulty.saturating_sub(1).max(1);
            }
            boundary += interval;
        }
        difficulty
    }

    /// Validate `block` against the tip and apply it. On error the chain
    /// and UTXO set are unchanged.
    pub fn add_block(&mut self, block: Block) -> Result<(), ChainError> {
        verify_block(
            &block,
            self.tip(),
            self.next_difficulty(),
            self.next_reward(),
            &self.utxos,
        )?;

        self.utxos.apply_block(&block).map_err(|err| match err {
            UtxoError::UnknownOutpoint(op) => BlockError::Tx(TxError::UnknownInput(op)),
            UtxoError::DuplicateOutpoint(op) => BlockError::Tx(TxError::DoubleSpendInBlock(op)),
        })?;
        self.blocks.push(block);
        Ok(())
    }

    /// The consensus fold: adopt `candidate` if and only if it is strictly
    /// longer and fully valid from a genesis identical to ours. The swap is
    /// atomic — the candidate's UTXO set is rebuilt completely before any
    /// local state changes. Ties favor the incumbent chain.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), ChainError> {
        if candidate.len() <= self.blocks.len() {
            return Err(ChainError::InvalidCandidateChain);
        }
        if candidate.first() != Some(&self.blocks[0]) {
            return Err(ChainError::InvalidCandidateChain);
        }

        let rebuilt = Self::from_blocks(self.params.clone(), candidate).map_err(|err| {
            log::warn!("candidate chain failed validation: {err}");
            ChainError::InvalidCandidateChain
        })?;

        self.blocks = rebuilt.blocks;
        self.utxos = rebuilt.utxos;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use crate::consensus::pow::Miner;
    use crate::core::{Address, KeyPair, Transaction};

    /// Small-world parameters: instant mining, fast halvings.
    fn test_params() -> ChainParams {
        ChainParams {
            initial_difficulty: 1,
            retarget_interval: 10,
            halving_interval: 210_000,
            ..ChainParams::default()
        }
    }

    fn mine_next(chain: &Blockchain, miner_addr: &Address, txs: Vec<Transaction>) -> Block {
        let tip = chain.tip();
        let height = tip.index + 1;
        let timestamp = tip.timestamp + 1.0;
        let reward = chain.next_reward();

        let coinbase = Transaction::coinbase(height, miner_addr.clone(), reward, timestamp);
        let mut all = vec![coinbase];
        all.extend(txs);

        let mut block = Block::new(
            height,
            tip.hash.clone(),
            timestamp,
            chain.next_difficulty(),
            all,
        );
        Miner::new(u64::MAX)
            .mine(&mut block, &AtomicBool::new(false))
            .unwrap();
        block
    }

    #[test]
    fn test_new_chain_has_genesis_only() {
        let chain = Blockchain::new(test_params());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_genesis());
        // the zero-value genesis output is the only entry
        assert_eq!(chain.utxos().len(), 1);
        assert_eq!(chain.utxos().total_value(), Some(Amount::ZERO));
    }

    #[test]
    fn test_add_block_extends_chain_and_utxos() {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(test_params());

        let block = mine_next(&chain, &miner.address, vec![]);
        chain.add_block(block).unwrap();

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.utxos().balance(&miner.address), Amount::from_coins(50));
    }

    #[test]
    fn test_add_block_rejects_bad_link() {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(test_params());

        let mut block = mine_next(&chain, &miner.address, vec![]);
        block.previous_hash = "ff".repeat(32);
        block.hash = block.compute_hash();

        let before_len = chain.len();
        assert!(chain.add_block(block).is_err());
        assert_eq!(chain.len(), before_len);
        assert_eq!(chain.utxos().balance(&miner.address), Amount::ZERO);
    }

    #[test]
    fn test_add_block_rejects_overpaying_coinbase() {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(test_params());

        let tip_hash = chain.tip().hash.clone();
        let coinbase = Transaction::coinbase(
            1,
            miner.address.clone(),
            Amount::from_coins(51),
            1.0,
        );
        let mut block = Block::new(1, tip_hash, 1.0, chain.next_difficulty(), vec![coinbase]);
        Miner::new(u64::MAX)
            .mine(&mut block, &AtomicBool::new(false))
            .unwrap();

        assert!(matches!(
            chain.add_block(block),
            Err(ChainError::Block(BlockError::BadCoinbase(_)))
        ));
    }

    #[test]
    fn test_reward_schedule_halves() {
        let params = ChainParams {
            halving_interval: 2,
            ..test_params()
        };
        assert_eq!(Blockchain::reward_at(&params, 1), Amount::from_coins(50));
        assert_eq!(Blockchain::reward_at(&params, 2), Amount::from_coins(50));
        assert_eq!(Blockchain::reward_at(&params, 3), Amount::from_coins(25));
        assert_eq!(Blockchain::reward_at(&params, 5), Amount::from_units(1_250_000_000));
        // deep heights decay to zero
        assert_eq!(Blockchain::reward_at(&params, 2 * 64 + 1), Amount::ZERO);
    }

    #[test]
    fn test_difficulty_raises_on_fast_blocks() {
        let miner = KeyPair::generate();
        let params = ChainParams {
            retarget_interval: 3,
            target_block_time: 600.0,
            ..test_params()
        };
        let mut chain = Blockchain::new(params);

        // mine_next spaces blocks one second apart, far below target/2
        assert_eq!(chain.next_difficulty(), 1);
        for _ in 0..3 {
            let block = mine_next(&chain, &miner.address, vec![]);
            chain.add_block(block).unwrap();
        }
        assert_eq!(chain.next_difficulty(), 2);
    }

    #[test]
    fn test_replace_chain_adopts_longer() {
        let miner = KeyPair::generate();
        let params = test_params();

        let mut ours = Blockchain::new(params.clone());
        let block = mine_next(&ours, &miner.address, vec![]);
        ours.add_block(block).unwrap();

        let rival = KeyPair::generate();
        let mut theirs = Blockchain::new(params);
        for _ in 0..3 {
            let block = mine_next(&theirs, &rival.address, vec![]);
            theirs.add_block(block).unwrap();
        }

        let old_height = ours.height();
        ours.replace_chain(theirs.blocks().to_vec()).unwrap();
        assert!(ours.height() > old_height);
        assert_eq!(ours.height(), 3);
        // balances reflect the adopted chain
        assert_eq!(ours.utxos().balance(&miner.address), Amount::ZERO);
        assert_eq!(ours.utxos().balance(&rival.address), Amount::from_coins(150));
    }

    #[test]
    fn test_replace_chain_rejects_equal_length() {
        let miner = KeyPair::generate();
        let params = test_params();

        let mut ours = Blockchain::new(params.clone());
        let block = mine_next(&ours, &miner.address, vec![]);
        ours.add_block(block).unwrap();

        let mut theirs = Blockchain::new(params);
        let block = mine_next(&theirs, &KeyPair::generate().address, vec![]);
        theirs.add_block(block).unwrap();

        // ties favor incumbency
        assert_eq!(
            ours.replace_chain(theirs.blocks().to_vec()),
            Err(ChainError::InvalidCandidateChain)
        );
        assert_eq!(ours.utxos().balance(&miner.address), Amount::from_coins(50));
    }

    #[test]
    fn test_replace_chain_rejects_tampered_candidate() {
        let params = test_params();
        let mut ours = Blockchain::new(params.clone());

        let rival = KeyPair::generate();
        let mut theirs = Blockchain::new(params);
        for _ in 0..2 {
            let block = mine_next(&theirs, &rival.address, vec![]);
            theirs.add_block(block).unwrap();
        }

        let mut candidate = theirs.blocks().to_vec();
        candidate[1].transactions[0].outputs[0].amount = Amount::from_coins(5000);

        assert_eq!(
            ours.replace_chain(candidate),
            Err(ChainError::InvalidCandidateChain)
        );
        assert_eq!(ours.height(), 0);
    }

    #[test]
    fn test_from_blocks_round_trip() {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(test_params());
        for _ in 0..2 {
            let block = mine_next(&chain, &miner.address, vec![]);
            chain.add_block(block).unwrap();
        }

        let rebuilt =
            Blockchain::from_blocks(test_params(), chain.blocks().to_vec()).unwrap();
        assert_eq!(rebuilt.height(), chain.height());
        assert_eq!(rebuilt.utxos(), chain.utxos());
    }

    #[test]
    fn test_range_clamps() {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(test_params());
        for _ in 0..3 {
            let block = mine_next(&chain, &miner.address, vec![]);
            chain.add_block(block).unwrap();
        }

        assert_eq!(chain.range(0, None).len(), 4);
        assert_eq!(chain.range(1, Some(2)).len(), 2);
        assert_eq!(chain.range(2, Some(100)).len(), 2);
        assert!(chain.range(5, Some(6)).is_empty());
    }
}
