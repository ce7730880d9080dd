//! Transport layer for remote contexts.
//!
//! Provides:
//! - Message endpoints over text WebSockets (JSON payloads)
//! - Id-correlated RPC between the Work side and a Host service
//! - Frame adapters for axum (feature: server) and tokio-tungstenite (feature: client)

pub mod rpc;
pub mod wire;

pub use rpc::{HostCall, RemoteService, RpcClient, RpcError, RpcRequest, RpcResponse, expose};
pub use wire::{Endpoint, Frame, ListenerId, MessageEvent, TextFrame, WireError};
