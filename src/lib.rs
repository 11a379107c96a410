#![deny(unreachable_pub)]

// Core modules
pub mod consts;
mod errors;
mod prelude;
pub mod req;
pub mod serde_utils;

// Routing model
pub mod contracts;
pub mod desired;
pub mod reader;

// Pipeline
pub mod approval;
pub mod batch;
pub mod driver;
pub mod prepare;
pub mod reconcile;

// Backends and configuration
pub mod chain;
pub mod config;

// Re-exports
pub use approval::{
    ApprovalAuthority, ApprovalDispatcher, ApprovalService, DispatchOutcome, DispatchState,
    ExternalAuthority, SafeTransactionService, SimulatedAuthority,
};
pub use batch::BatchFile;
pub use chain::{RpcChain, SimulatedChain};
pub use config::{AppConfig, ApprovalMode, LogFormat};
pub use consts::{DEFAULT_BATCH_PATH, LOCAL_RPC_URL, MULTI_SEND_CALL_ONLY};
pub use contracts::{RoutingCall, RoutingContracts};
pub use desired::DesiredState;
pub use driver::{ExecutionDriver, PassReport, RunReport};
pub use errors::Error;
pub use prepare::{
    Prepared, PreparedTransaction, ProposedCall, TransactionPreparer, TransactionSender,
};
pub use reader::{Registration, StateReader};
pub use reconcile::{CallSink, Category, ReconcilePolicy, Reconciler, SecondaryCheck};
