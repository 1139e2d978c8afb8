// Peer networking: RPC messages, HTTP client and the node server

pub mod client;
pub mod message;
pub mod server;

pub use client::{normalize_peer_addr, HttpPeerClient, NetworkError, PeerExchange};
pub use message::{RpcRequest, RpcResponse};
pub use server::{serve, NodeError, NodeState};
