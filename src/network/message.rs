// Peer RPC message types

use serde::{Deserialize, Serialize};

use crate::core::{Address, Amount, Block, Transaction, UtxoEntry};

/// Request body of the peer RPC endpoint, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
    GetBlocks {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end: Option<u64>,
    },
    GetUtxos {
        address: Address,
    },
    SubmitTx {
        tx: Transaction,
    },
    SubmitBlock {
        block: Block,
    },
    GetPeers,
}

/// Uniform response envelope: `{ok:true, data:…}` or `{ok:false, error:…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RpcResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(kind.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlocksData {
    pub blocks: Vec<Block>,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtxosData {
    pub utxos: Vec<UtxoEntry>,
    pub balance: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitTxData {
    pub txid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitBlockData {
    pub hash: String,
    pub height: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeersData {
    pub peers: Vec<String>,
}

// Operator endpoints (outside the peer contract).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MineRequest {
    pub miner_address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MineData {
    pub block: Block,
    pub reward: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusData {
    pub replaced: bool,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddPeerRequest {
    pub address: String,
}
