//! Backends for the live routing system.
//!
//! - `rpc` - JSON-RPC node (reads via `eth_call`, writes via node-held accounts)
//! - `simulated` - in-memory routing state for tests and dry runs

pub mod rpc;
pub mod simulated;

pub use rpc::RpcChain;
pub use simulated::{SentTransaction, SimulatedChain};
