// Longest-chain consensus over the peer set

use crate::consensus::{Blockchain, Mempool};
use crate::network::PeerExchange;

/// Ask every known peer (bounded by `peer_cap`) for its chain, then adopt
/// the longest valid candidate that is strictly longer than ours. Peer
/// failures and invalid chains are logged and skipped; consensus itself
/// never fails. Returns the final height.
pub async fn run_consensus(
    chain: &mut Blockchain,
    mempool: &mut Mempool,
    peers: &[String],
    client: &dyn PeerExchange,
) -> u64 {
    let mut candidates = Vec::new();
    for peer in peers.iter().take(chain.params().peer_cap) {
        match client.get_blocks(peer).await {
            Ok(blocks) => candidates.push((peer.clone(), blocks)),
            Err(err) => log::warn!("consensus: skipping peer {peer}: {err}"),
        }
    }

    // longest first; the first valid adoption wins
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    for (peer, blocks) in candidates {
        if blocks.len() <= chain.len() {
            break;
        }
        match chain.replace_chain(blocks) {
            Ok(()) => {
                mempool.reconcile(chain.utxos());
                log::info!(
                    "consensus: adopted chain from {peer}, new height {}",
                    chain.height()
                );
                break;
            }
            Err(err) => log::warn!("consensus: rejecting chain from {peer}: {err}"),
        }
    }

    chain.height()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;

    use crate::consensus::{ChainParams, Miner};
    use crate::core::{Address, Block, KeyPair, Transaction, UtxoEntry};
    use crate::network::NetworkError;

    struct FakeNetwork {
        chains: HashMap<String, Vec<Block>>,
    }

    #[async_trait]
    impl PeerExchange for FakeNetwork {
        async fn get_blocks(&self, peer: &str) -> Result<Vec<Block>, NetworkError> {
            self.chains
                .get(peer)
                .cloned()
                .ok_or_else(|| NetworkError::PeerUnavailable(peer.to_string()))
        }

        async fn get_utxos(
            &self,
            _peer: &str,
            _address: &Address,
        ) -> Result<Vec<UtxoEntry>, NetworkError> {
            Ok(vec![])
        }

        async fn broadcast_tx(
            &self,
            _peer: &str,
            _tx: &Transaction,
        ) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn broadcast_block(
            &self,
            _peer: &str,
            _block: &Block,
        ) -> Result<(), NetworkError> {
            Ok(())
        }

        async fn exchange_peers(&self, _peer: &str) -> Result<Vec<String>, NetworkError> {
            Ok(vec![])
        }
    }

    fn test_params() -> ChainParams {
        ChainParams {
            initial_difficulty: 1,
            ..ChainParams::default()
        }
    }

    fn grown_chain(params: &ChainParams, blocks: usize) -> Blockchain {
        let miner = KeyPair::generate();
        let mut chain = Blockchain::new(params.clone());
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

    #[tokio::test]
    async fn test_adopts_longest_peer_chain() {
        let params = test_params();
        let mut chain = grown_chain(&params, 1);
        let mut mempool = Mempool::new();

        let longer = grown_chain(&params, 4);
        let longest = grown_chain(&params, 6);
        let network = FakeNetwork {
            chains: HashMap::from([
                ("peer-a:5000".to_string(), longer.blocks().to_vec()),
                ("peer-b:5000".to_string(), longest.blocks().to_vec()),
            ]),
        };

        let peers = vec!["peer-a:5000".to_string(), "peer-b:5000".to_string()];
        let height = run_consensus(&mut chain, &mut mempool, &peers, &network).await;
        assert_eq!(height, 6);
        assert_eq!(chain.blocks(), longest.blocks());
    }

    #[tokio::test]
    async fn test_unreachable_peers_are_skipped() {
        let params = test_params();
        let mut chain = grown_chain(&params, 2);
        let mut mempool = Mempool::new();

        let network = FakeNetwork {
            chains: HashMap::new(),
        };
        let peers = vec!["ghost:5000".to_string()];
        let height = run_consensus(&mut chain, &mut mempool, &peers, &network).await;
        assert_eq!(height, 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_longest_on_invalid() {
        let params = test_params();
        let mut chain = grown_chain(&params, 1);
        let mut mempool = Mempool::new();

        let mut forged = grown_chain(&params, 5).blocks().to_vec();
        forged[3].transactions[0].outputs[0].amount =
            crate::core::Amount::from_coins(9_999);
        let honest = grown_chain(&params, 3);

        let network = FakeNetwork {
            chains: HashMap::from([
                ("forger:5000".to_string(), forged),
                ("honest:5000".to_string(), honest.blocks().to_vec()),
            ]),
        };

        let peers = vec!["forger:5000".to_string(), "honest:5000".to_string()];
        let height = run_consensus(&mut chain, &mut mempool, &peers, &network).await;
        assert_eq!(height, 3);
        assert_eq!(chain.blocks(), honest.blocks());
    }
}
