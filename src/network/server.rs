// Node HTTP server: peer RPC plus operator endpoints

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::consensus::{
    debug_transaction, run_consensus, verify_transaction, Blockchain, ChainError, ChainParams,
    Mempool, MempoolError, Miner, MiningError, SpendView, TxDebugReport,
};
use crate::core::{unix_time_now, Address, Amount, Block, Transaction};
use crate::network::client::{normalize_peer_addr, HttpPeerClient};
use crate::network::message::{
    AddPeerRequest, BlocksData, ConsensusData, MineData, MineRequest, PeersData, RpcRequest,
    RpcResponse, SubmitBlockData, SubmitTxData, UtxosData,
};
use crate::network::PeerExchange;
use crate::storage::{StorageError, Store};

/// How many times a mining round is restarted after the tip moved under it.
const MINE_TIP_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Mining(#[from] MiningError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Rejected(String),
}

impl NodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Mempool(e) => e.kind(),
            NodeError::Chain(e) => e.kind(),
            NodeError::Mining(MiningError::MiningStalled) => "mining_stalled",
            NodeError::Mining(MiningError::MiningCancelled) => "mining_cancelled",
            NodeError::Storage(_) => "storage",
            NodeError::Rejected(_) => "rejected",
        }
    }
}

/// Ledger state behind the single write lock: only one writer may touch
/// the chain and mempool at a time, readers see consistent snapshots.
pub struct Ledger {
    pub chain: Blockchain,
    pub mempool: Mempool,
}

/// Everything a running node owns. Handlers get this explicitly; there is
/// no process-wide ledger.
pub struct NodeState {
    ledger: RwLock<Ledger>,
    peers: RwLock<Vec<String>>,
    store: Box<dyn Store>,
    client: HttpPeerClient,
    self_addr: String,
    shutdown: Arc<AtomicBool>,
}

impl NodeState {
    /// Recover a node from storage, creating genesis state on first run.
    /// A chain that fails replay validation is corrupt and refuses to
    /// load; a stale UTXO snapshot is rebuilt from the chain.
    pub fn load(
        store: Box<dyn Store>,
        params: ChainParams,
        self_addr: String,
    ) -> Result<Self, StorageError> {
        let stored = store.load_chain()?;
        let chain = if stored.is_empty() {
            let chain = Blockchain::new(params);
            store.save_chain(chain.blocks())?;
            store.save_utxo_snapshot(chain.utxos())?;
            log::info!("created genesis block {}", chain.tip().hash);
            chain
        } else {
            let chain = Blockchain::from_blocks(params, stored)
                .map_err(|err| StorageError::Corrupt(format!("chain replay failed: {err}")))?;
            match store.load_utxo_snapshot()? {
                Some(snapshot) if &snapshot == chain.utxos() => {}
                Some(_) => {
                    log::warn!("utxo snapshot disagrees with chain replay, rebuilding");
                    store.save_utxo_snapshot(chain.utxos())?;
                }
                None => store.save_utxo_snapshot(chain.utxos())?,
            }
            chain
        };

        let mut mempool = Mempool::new();
        for tx in store.load_mempool()? {
            let txid = tx.txid.clone();
            if let Err(err) = mempool.submit(tx, chain.utxos()) {
                log::info!("dropping persisted mempool tx {txid}: {err}");
            }
        }

        let peers = store.load_peers()?;
        let rpc_timeout = chain.params().rpc_timeout;

        Ok(Self {
            ledger: RwLock::new(Ledger { chain, mempool }),
            peers: RwLock::new(peers),
            store,
            client: HttpPeerClient::new(rpc_timeout),
            self_addr: normalize_peer_addr(&self_addr),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn height(&self) -> u64 {
        self.ledger.read().await.chain.height()
    }

    pub async fn blocks_range(&self, start: Option<u64>, end: Option<u64>) -> BlocksData {
        let ledger = self.ledger.read().await;
        let blocks = ledger.chain.range(start.unwrap_or(0), end).to_vec();
        BlocksData {
            length: blocks.len(),
            blocks,
        }
    }

    pub async fn utxos_for(&self, address: &Address) -> UtxosData {
        let ledger = self.ledger.read().await;
        let utxos = ledger.chain.utxos();
        UtxosData {
            utxos: utxos
                .by_address(address)
                .into_iter()
                .map(|(op, out)| crate::core::UtxoEntry {
                    txid: op.txid,
                    vout: op.vout,
                    address: out.address,
                    amount: out.amount,
                })
                .collect(),
            balance: utxos.balance(address),
        }
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.read().await.mempool.transactions()
    }

    /// Admit a transaction into the mempool, persist it, and gossip it to
    /// peers if it was new.
    pub async fn submit_transaction(
        self: &Arc<Self>,
        tx: Transaction,
    ) -> Result<SubmitTxData, NodeError> {
        let txid = tx.txid.clone();
        let admitted = {
            let mut ledger = self.ledger.write().await;
            let chain_utxos = ledger.chain.utxos().clone();
            let admitted = ledger.mempool.submit(tx.clone(), &chain_utxos)?;
            if admitted {
                self.store.save_mempool(&ledger.mempool.transactions())?;
            }
            admitted
        };

        if admitted {
            let state = Arc::clone(self);
            tokio::spawn(async move {
                state.gossip_tx(tx).await;
            });
        }
        Ok(SubmitTxData { txid })
    }

    /// Validate and append a block from a peer or a local miner, persist
    /// durably, reconcile the mempool and gossip onward if it was new.
    pub async fn accept_block(self: &Arc<Self>, block: Block) -> Result<SubmitBlockData, NodeError> {
        let accepted = {
            let mut ledger = self.ledger.write().await;
            if ledger.chain.tip().hash == block.hash {
                // already have it, nothing to do and nothing to gossip
                false
            } else {
                ledger.chain.add_block(block.clone())?;
                self.store.save_block(&block)?;
                ledger.mempool.remove_included(&block);
                let chain_utxos = ledger.chain.utxos().clone();
                ledger.mempool.reconcile(&chain_utxos);
                self.store.save_utxo_snapshot(ledger.chain.utxos())?;
                self.store.save_mempool(&ledger.mempool.transactions())?;
                true
            }
        };

        if accepted {
            let state = Arc::clone(self);
            let gossip = block.clone();
            tokio::spawn(async move {
                state.gossip_block(gossip).await;
            });
        }
        Ok(SubmitBlockData {
            height: block.index,
            hash: block.hash,
        })
    }

    /// Mine one block to `miner_address`: snapshot the tip and mempool,
    /// search for a nonce off the ledger lock, then append. Restarts if
    /// another block won the race for the tip.
    pub async fn mine_block(self: &Arc<Self>, miner_address: Address) -> Result<MineData, NodeError> {
        for _ in 0..MINE_TIP_RETRIES {
            let (candidate, reward, tip_hash, max_nonce) = {
                let ledger = self.ledger.read().await;
                let (candidate, reward) = build_candidate(&ledger, &miner_address);
                let tip_hash = ledger.chain.tip().hash.clone();
                (candidate, reward, tip_hash, ledger.chain.params().max_nonce)
            };

            let cancel = Arc::clone(&self.shutdown);
            let mined = tokio::task::spawn_blocking(move || {
                let miner = Miner::new(max_nonce);
                let mut block = candidate;
                loop {
                    match miner.mine(&mut block, &cancel) {
                        Ok(result) => {
                            log::debug!(
                                "found nonce {} after {} attempts ({:.1} KH/s)",
                                result.nonce,
                                result.attempts,
                                result.hash_rate() / 1000.0
                            );
                            return Ok(block);
                        }
                        // stalled: refresh the timestamp and rescan
                        Err(MiningError::MiningStalled) => {
                            block.timestamp = unix_time_now();
                        }
                        Err(err) => return Err(err),
                    }
                }
            })
            .await
            .map_err(|_| NodeError::Mining(MiningError::MiningCancelled))??;

            let raced = {
                let ledger = self.ledger.read().await;
                ledger.chain.tip().hash != tip_hash
            };
            if raced {
                log::info!("tip moved while mining, restarting");
                continue;
            }

            let data = self.accept_block(mined.clone()).await?;
            log::info!("mined block {} at height {}", data.hash, data.height);
            return Ok(MineData {
                block: mined,
                reward,
            });
        }
        Err(NodeError::Rejected("tip kept moving while mining".into()))
    }

    /// One consensus round against the current peer list.
    pub async fn consensus_round(&self) -> Result<ConsensusData, NodeError> {
        let peers = self.peers.read().await.clone();
        let mut ledger = self.ledger.write().await;
        let before = ledger.chain.height();

        let Ledger { chain, mempool } = &mut *ledger;
        run_consensus(chain, mempool, &peers, &self.client).await;

        let replaced = ledger.chain.height() != before;
        if replaced {
            self.store.save_chain(ledger.chain.blocks())?;
            self.store.save_utxo_snapshot(ledger.chain.utxos())?;
            self.store.save_mempool(&ledger.mempool.transactions())?;
        }
        Ok(ConsensusData {
            replaced,
            length: ledger.chain.len(),
        })
    }

    /// Register a peer (normalized, deduplicated, never ourselves), then
    /// introduce ourselves to it and merge its peer list in the background.
    pub async fn add_peer(self: &Arc<Self>, address: &str) -> Result<PeersData, NodeError> {
        let address = normalize_peer_addr(address);
        if address == self.self_addr {
            return Err(NodeError::Rejected("refusing to peer with ourselves".into()));
        }

        {
            let mut peers = self.peers.write().await;
            if !peers.contains(&address) {
                peers.push(address.clone());
                self.store.save_peer(&address)?;
            }
        }

        let state = Arc::clone(self);
        let remote = address.clone();
        tokio::spawn(async move {
            if let Err(err) = state.client.register(&remote, &state.self_addr).await {
                log::warn!("could not introduce ourselves to {remote}: {err}");
            }
            match state.client.exchange_peers(&remote).await {
                Ok(theirs) => state.merge_peers(theirs).await,
                Err(err) => log::warn!("peer exchange with {remote} failed: {err}"),
            }
        });

        Ok(PeersData {
            peers: self.peers.read().await.clone(),
        })
    }

    pub async fn peer_list(&self) -> PeersData {
        PeersData {
            peers: self.peers.read().await.clone(),
        }
    }

    pub async fn debug_tx(&self, tx: &Transaction) -> TxDebugReport {
        let ledger = self.ledger.read().await;
        let mut view = SpendView::new(ledger.chain.utxos());
        for outpoint in ledger.mempool.pending_outpoints() {
            view.mark_spent(outpoint);
        }
        debug_transaction(tx, &view)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn merge_peers(&self, candidates: Vec<String>) {
        let mut peers = self.peers.write().await;
        for candidate in candidates {
            let candidate = normalize_peer_addr(&candidate);
            if candidate != self.self_addr && !peers.contains(&candidate) {
                if let Err(err) = self.store.save_peer(&candidate) {
                    log::warn!("could not persist peer {candidate}: {err}");
                    continue;
                }
                peers.push(candidate);
            }
        }
    }

    async fn gossip_tx(&self, tx: Transaction) {
        let peers = self.peers.read().await.clone();
        for peer in peers {
            if let Err(err) = self.client.broadcast_tx(&peer, &tx).await {
                log::warn!("broadcast of {} to {peer} failed: {err}", tx.txid);
            }
        }
    }

    async fn gossip_block(&self, block: Block) {
        let peers = self.peers.read().await.clone();
        for peer in peers {
            if let Err(err) = self.client.broadcast_block(&peer, &block).await {
                log::warn!("broadcast of block {} to {peer} failed: {err}", block.index);
            }
        }
    }
}

/// Assemble an unmined candidate on top of the current tip: coinbase
/// paying reward plus the fees of the selected mempool transactions.
fn build_candidate(ledger: &Ledger, miner_address: &Address) -> (Block, Amount) {
    let chain = &ledger.chain;
    let tip = chain.tip();
    let height = tip.index + 1;
    // non-decreasing relative to the tip, ties allowed
    let timestamp = unix_time_now().max(tip.timestamp);

    let selected = ledger.mempool.take(chain.params().block_tx_limit);
    let mut view = SpendView::new(chain.utxos());
    let mut fees = Amount::ZERO;
    let mut included = Vec::with_capacity(selected.len());
    for tx in selected {
        // entries were validated on admission; skip any that conflict now
        match verify_transaction(&tx, &view) {
            Ok(fee) => {
                fees = fees.checked_add(fee).unwrap_or(fees);
                view.apply(&tx);
                included.push(tx);
            }
            Err(err) => log::warn!("leaving {} out of candidate: {err}", tx.txid),
        }
    }

    let reward = chain.next_reward();
    let payout = reward.checked_add(fees).unwrap_or(reward);
    let coinbase = Transaction::coinbase(height, miner_address.clone(), payout, timestamp);

    let mut transactions = vec![coinbase];
    transactions.extend(included);
    let block = Block::new(
        height,
        tip.hash.clone(),
        timestamp,
        chain.next_difficulty(),
        transactions,
    );
    (block, payout)
}

fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(serde_json::to_value(RpcResponse::success(data)).expect("response serializes"))
}

fn fail(kind: &str) -> Json<Value> {
    Json(serde_json::to_value(RpcResponse::<()>::failure(kind)).expect("response serializes"))
}

async fn rpc(State(state): State<Arc<NodeState>>, Json(request): Json<RpcRequest>) -> Json<Value> {
    match request {
        RpcRequest::GetBlocks { start, end } => ok(state.blocks_range(start, end).await),
        RpcRequest::GetUtxos { address } => ok(state.utxos_for(&address).await),
        RpcRequest::SubmitTx { tx } => match state.submit_transaction(tx).await {
            Ok(data) => ok(data),
            Err(err) => {
                log::info!("rejected transaction: {err}");
                fail(err.kind())
            }
        },
        RpcRequest::SubmitBlock { block } => match state.accept_block(block).await {
            Ok(data) => ok(data),
            Err(err) => {
                log::info!("rejected block: {err}");
                fail(err.kind())
            }
        },
        RpcRequest::GetPeers => ok(state.peer_list().await),
    }
}

async fn mine(State(state): State<Arc<NodeState>>, Json(req): Json<MineRequest>) -> Json<Value> {
    match state.mine_block(req.miner_address).await {
        Ok(data) => ok(data),
        Err(err) => {
            log::warn!("mining failed: {err}");
            fail(err.kind())
        }
    }
}

async fn consensus(State(state): State<Arc<NodeState>>) -> Json<Value> {
    match state.consensus_round().await {
        Ok(data) => ok(data),
        Err(err) => {
            log::warn!("consensus failed: {err}");
            fail(err.kind())
        }
    }
}

async fn peers(State(state): State<Arc<NodeState>>) -> Json<Value> {
    ok(state.peer_list().await)
}

async fn add_peer(
    State(state): State<Arc<NodeState>>,
    Json(req): Json<AddPeerRequest>,
) -> Json<Value> {
    match state.add_peer(&req.address).await {
        Ok(data) => ok(data),
        Err(err) => fail(err.kind()),
    }
}

async fn transactions(State(state): State<Arc<NodeState>>) -> Json<Value> {
    ok(state.pending_transactions().await)
}

async fn debug_tx(State(state): State<Arc<NodeState>>, Json(tx): Json<Transaction>) -> Json<Value> {
    ok(state.debug_tx(&tx).await)
}

pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/mine", post(mine))
        .route("/consensus", post(consensus))
        .route("/peers", get(peers).post(add_peer))
        .route("/transactions", get(transactions))
        .route("/transactions/debug", post(debug_tx))
        .with_state(state)
}

/// Serve until ctrl-c; the shutdown flag also cancels any in-flight miner.
pub async fn serve(state: Arc<NodeState>, addr: SocketAddr) -> std::io::Result<()> {
    let app = router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("node listening on {addr}");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
            state.request_shutdown();
            Ok(())
        }
    }
}
