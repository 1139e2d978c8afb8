// Proof of Work mining loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;

use crate::core::Block;

/// How often the cancellation flag is polled, in nonce attempts.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    /// The nonce space was exhausted; bump the timestamp and retry.
    #[error("nonce space exhausted without meeting the difficulty target")]
    MiningStalled,
    /// Normal control flow, not a failure.
    #[error("mining cancelled")]
    MiningCancelled,
}

/// Outcome of a successful mining run.
#[derive(Debug)]
pub struct MiningResult {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
    pub duration: std::time::Duration,
}

impl MiningResult {
    /// Hashes per second over the run.
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

/// Proof of Work miner
pub struct Miner {
    max_nonce: u64,
}

impl Miner {
    pub fn new(max_nonce: u64) -> Self {
        Self { max_nonce }
    }

    /// Scan nonces from 0 until the block hash carries its required number
    /// of leading hex zeros. The cancel flag is polled every
    /// `CANCEL_CHECK_INTERVAL` attempts. On success the block is left with
    /// the winning nonce and hash.
    pub fn mine(&self, block: &mut Block, cancel: &AtomicBool) -> Result<MiningResult, MiningError> {
        let start = Instant::now();
        let mut attempts = 0u64;

        for nonce in 0..=self.max_nonce {
            if attempts % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return Err(MiningError::MiningCancelled);
            }

            block.nonce = nonce;
            block.hash = block.compute_hash();
            attempts += 1;

            if block.meets_difficulty() {
                return Ok(MiningResult {
                    nonce,
                    hash: block.hash.clone(),
                    attempts,
                    duration: start.elapsed(),
                });
            }

            if attempts % 100_000 == 0 {
                let elapsed = start.elapsed();
                log::debug!(
                    "mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        Err(MiningError::MiningStalled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Amount, KeyPair, Transaction};

    fn candidate(difficulty: u32) -> Block {
        let kp = KeyPair::generate();
        let genesis = Block::genesis(1);
        let coinbase = Transaction::coinbase(1, kp.address, Amount::from_coins(50), 10.0);
        Block::new(1, genesis.hash, 10.0, difficulty, vec![coinbase])
    }

    #[test]
    fn test_mine_easy_difficulty() {
        let mut block = candidate(1);
        let miner = Miner::new(1 << 20);
        let cancel = AtomicBool::new(false);

        let result = miner.mine(&mut block, &cancel).unwrap();
        assert!(block.meets_difficulty());
        assert_eq!(block.nonce, result.nonce);
        assert_eq!(block.hash, result.hash);
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_mine_is_deterministic() {
        let cancel = AtomicBool::new(false);

        let mut a = candidate(1);
        let mut b = a.clone();
        Miner::new(1 << 20).mine(&mut a, &cancel).unwrap();
        Miner::new(1 << 20).mine(&mut b, &cancel).unwrap();
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut block = candidate(8);
        let miner = Miner::new(u64::MAX);
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            miner.mine(&mut block, &cancel),
            Err(MiningError::MiningCancelled)
        ));
    }

    #[test]
    fn test_stalls_when_nonce_space_too_small() {
        // difficulty 8 is unreachable within 4 nonces
        let mut block = candidate(8);
        let miner = Miner::new(3);
        let cancel = AtomicBool::new(false);

        assert!(matches!(
            miner.mine(&mut block, &cancel),
            Err(MiningError::MiningStalled)
        ));
    }
}
