//! `league_protocol` — wire types and HTTP transport for the `league.v2`
//! tournament coordination protocol.
//!
//! This crate is the equivalent of a reusable MCP runtime: it knows nothing
//! about tournaments, matches, or standings. It only knows how to carry a
//! JSON-RPC 2.0 envelope over HTTP, how the `league.v2` message family is
//! shaped, and (behind the `server` feature) how to mount a handler behind
//! an HTTP listener. All tournament semantics live in the `league-core`
//! crate that depends on this one.

pub mod deadlines;
pub mod envelope;
pub mod http_pool;
pub mod messages;
pub mod transport;

#[cfg(feature = "server")]
pub mod server;

pub use envelope::{ErrorCode, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolCallParams};
pub use transport::{RpcHandler, TransportClient, TransportError};
