//! JSON-RPC API Layer
//!
//! Implements the JSON-RPC 2.0 server of the job store: job submission,
//! chunk results from processors and sinks, aborts, reruns and queue status.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
