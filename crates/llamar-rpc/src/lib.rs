//! The MCP wire: newline-delimited JSON-RPC 2.0 dispatch plus the stdio
//! and TCP pumps that carry it.

pub mod handler;
pub mod pump;
pub mod socket;
pub mod stdio;

pub use handler::{RpcHandler, PROTOCOL_VERSION};
