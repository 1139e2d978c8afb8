// HTTP peer client

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::core::{Address, Block, Transaction, UtxoEntry};
use crate::network::message::{
    BlocksData, PeersData, RpcRequest, RpcResponse, SubmitBlockData, SubmitTxData, UtxosData,
};

#[derive(Debug, Error, Clone)]
pub enum NetworkError {
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    #[error("peer returned malformed data: {0}")]
    PeerMalformed(String),
    #[error("peer timed out: {0}")]
    Timeout(String),
}

impl NetworkError {
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkError::PeerUnavailable(_) => "peer_unavailable",
            NetworkError::PeerMalformed(_) => "peer_malformed",
            NetworkError::Timeout(_) => "timeout",
        }
    }
}

/// What the ledger requires from any transport. Trust never comes from the
/// peer's identity: everything returned here is fully validated by the
/// caller before it touches local state.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    async fn get_blocks(&self, peer: &str) -> Result<Vec<Block>, NetworkError>;
    async fn get_utxos(&self, peer: &str, address: &Address)
        -> Result<Vec<UtxoEntry>, NetworkError>;
    async fn broadcast_tx(&self, peer: &str, tx: &Transaction) -> Result<(), NetworkError>;
    async fn broadcast_block(&self, peer: &str, block: &Block) -> Result<(), NetworkError>;
    async fn exchange_peers(&self, peer: &str) -> Result<Vec<String>, NetworkError>;
}

/// `localhost` and `0.0.0.0` collapse to `127.0.0.1` so one node never
/// appears in a peer list under several names.
pub fn normalize_peer_addr(addr: &str) -> String {
    let addr = addr.trim_start_matches("http://");
    match addr.split_once(':') {
        Some((host, port)) if host == "localhost" || host == "0.0.0.0" => {
            format!("127.0.0.1:{port}")
        }
        _ => addr.to_string(),
    }
}

/// Peer RPC over HTTP/JSON with a per-call timeout.
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client configuration is valid");
        Self { http }
    }

    fn classify(peer: &str, err: reqwest::Error) -> NetworkError {
        if err.is_timeout() {
            NetworkError::Timeout(peer.to_string())
        } else if err.is_decode() {
            NetworkError::PeerMalformed(format!("{peer}: {err}"))
        } else {
            NetworkError::PeerUnavailable(format!("{peer}: {err}"))
        }
    }

    /// Introduce ourselves to a peer so it can gossip back (operator-level
    /// reciprocity, not part of the peer contract).
    pub async fn register(&self, peer: &str, self_addr: &str) -> Result<(), NetworkError> {
        let url = format!("http://{}/peers", normalize_peer_addr(peer));
        let request = crate::network::message::AddPeerRequest {
            address: self_addr.to_string(),
        };
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify(peer, e))?;
        let _: RpcResponse<PeersData> = response
            .json()
            .await
            .map_err(|e| Self::classify(peer, e))?;
        Ok(())
    }

    async fn call<T: DeserializeOwned + Default>(
        &self,
        peer: &str,
        request: &RpcRequest,
    ) -> Result<T, NetworkError> {
        let url = format!("http://{}/rpc", normalize_peer_addr(peer));
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::classify(peer, e))?;

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Self::classify(peer, e))?;

        match envelope {
            RpcResponse {
                ok: true,
                data: Some(data),
                ..
            } => Ok(data),
            RpcResponse { error, .. } => Err(NetworkError::PeerMalformed(format!(
                "{peer}: {}",
                error.unwrap_or_else(|| "missing data".into())
            ))),
        }
    }
}

impl Default for HttpPeerClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PeerExchange for HttpPeerClient {
    async fn get_blocks(&self, peer: &str) -> Result<Vec<Block>, NetworkError> {
        let data: BlocksData = self
            .call(peer, &RpcRequest::GetBlocks { start: None, end: None })
            .await?;
        Ok(data.blocks)
    }

    async fn get_utxos(
        &self,
        peer: &str,
        address: &Address,
    ) -> Result<Vec<UtxoEntry>, NetworkError> {
        let data: UtxosData = self
            .call(
                peer,
                &RpcRequest::GetUtxos {
                    address: address.clone(),
                },
            )
            .await?;
        Ok(data.utxos)
    }

    async fn broadcast_tx(&self, peer: &str, tx: &Transaction) -> Result<(), NetworkError> {
        let _: SubmitTxData = self
            .call(peer, &RpcRequest::SubmitTx { tx: tx.clone() })
            .await?;
        Ok(())
    }

    async fn broadcast_block(&self, peer: &str, block: &Block) -> Result<(), NetworkError> {
        let _: SubmitBlockData = self
            .call(
                peer,
                &RpcRequest::SubmitBlock {
                    block: block.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn exchange_peers(&self, peer: &str) -> Result<Vec<String>, NetworkError> {
        let data: PeersData = self.call(peer, &RpcRequest::GetPeers).await?;
        Ok(data.peers)
    }
}
