// Command-line surfaces for the wallet and node binaries

pub mod node_cli;
pub mod wallet_cli;

pub use node_cli::NodeCli;
pub use wallet_cli::WalletCli;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::network::message::RpcResponse;

/// Errors surfaced to the operator, mapped onto the documented exit codes:
/// 1 validation, 2 I/O or network, 3 bad arguments.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Network(String),
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    BadArgs(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation(_) => 1,
            CliError::Network(_) | CliError::Io(_) => 2,
            CliError::BadArgs(_) => 3,
        }
    }
}

impl From<crate::wallet::WalletError> for CliError {
    fn from(err: crate::wallet::WalletError) -> Self {
        match err {
            crate::wallet::WalletError::Io(_) | crate::wallet::WalletError::Codec(_) => {
                CliError::Io(err.to_string())
            }
            _ => CliError::Validation(err.to_string()),
        }
    }
}

impl From<crate::storage::StorageError> for CliError {
    fn from(err: crate::storage::StorageError) -> Self {
        CliError::Io(err.to_string())
    }
}

/// POST a JSON body to a node endpoint and unwrap the `{ok, data, error}`
/// envelope. A transported `ok:false` is a validation failure; transport
/// trouble is a network failure.
pub(crate) async fn node_post<B: Serialize, T: DeserializeOwned + Default>(
    node: &str,
    path: &str,
    body: &B,
) -> Result<T, CliError> {
    let node = crate::network::normalize_peer_addr(node);
    let url = format!("http://{node}{path}");
    let response = reqwest::Client::new()
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| CliError::Network(format!("cannot reach node at {node}: {e}")))?;

    let envelope: RpcResponse<T> = response
        .json()
        .await
        .map_err(|e| CliError::Network(format!("malformed response from {node}: {e}")))?;

    match envelope {
        RpcResponse {
            ok: true,
            data: Some(data),
            ..
        } => Ok(data),
        RpcResponse { error, .. } => Err(CliError::Validation(
            error.unwrap_or_else(|| "node rejected the request".into()),
        )),
    }
}

pub(crate) async fn node_get<T: DeserializeOwned + Default>(node: &str, path: &str) -> Result<T, CliError> {
    let node = crate::network::normalize_peer_addr(node);
    let url = format!("http://{node}{path}");
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| CliError::Network(format!("cannot reach node at {node}: {e}")))?;

    let envelope: RpcResponse<T> = response
        .json()
        .await
        .map_err(|e| CliError::Network(format!("malformed response from {node}: {e}")))?;

    match envelope {
        RpcResponse {
            ok: true,
            data: Some(data),
            ..
        } => Ok(data),
        RpcResponse { error, .. } => Err(CliError::Validation(
            error.unwrap_or_else(|| "node rejected the request".into()),
        )),
    }
}
