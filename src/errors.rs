use thiserror::Error;

/// Main error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    // === Reconciliation ===
    /// A precondition the live system must satisfy before a category may be reconciled.
    #[error("Config invariant violated: {0}")]
    ConfigInvariantViolation(String),

    // === Approval ===
    /// Approval service unavailable or the delegate identity could not be resolved.
    #[error("Approval authority unreachable: {0}")]
    ApprovalAuthorityUnreachable(String),

    // === Batch file ===
    /// Batch file could not be read, parsed or written.
    #[error("Batch file {path}: {message}")]
    BatchFile { path: String, message: String },

    // === Transport ===
    /// Client HTTP error (4xx)
    #[error("Client error: status code: {status_code}, error code: {error_code:?}, error message: {error_message}, error data: {error_data:?}")]
    ClientRequest {
        status_code: u16,
        error_code: Option<u16>,
        error_message: String,
        error_data: Option<String>,
    },

    /// Server HTTP error (5xx)
    #[error("Server error: status code: {status_code}, error message: {error_message}")]
    ServerRequest {
        status_code: u16,
        error_message: String,
    },

    /// Generic request error
    #[error("Generic request error: {0}")]
    GenericRequest(String),

    /// JSON-RPC error object returned by the node
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// `eth_call` reverted
    #[error("Call reverted: {0}")]
    Reverted(String),

    /// Transaction mined with a failure status
    #[error("Transaction {0} reverted")]
    TransactionReverted(String),

    /// Receipt never showed up
    #[error("Receipt for {0} not available")]
    ReceiptNotFound(String),

    // === Encoding ===
    /// ABI decode error
    #[error("ABI decode error: {0}")]
    Abi(String),

    /// Calldata that matches no routing method
    #[error("Unknown routing call: {0}")]
    UnknownCall(String),

    /// JSON parse error
    #[error("Json parse error: {0}")]
    JsonParse(String),

    /// Configuration or descriptor error
    #[error("Config error: {0}")]
    Config(String),

    // === Signing ===
    /// Wallet error
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Private key parse error
    #[error("Private key parse error: {0}")]
    PrivateKeyParse(String),

    /// Signature failure
    #[error("ECDSA signature failed: {0}")]
    SignatureFailure(String),
}

// Convenience constructors for common error patterns
impl Error {
    /// Create a JSON parse error
    pub fn json_parse(msg: impl Into<String>) -> Self {
        Error::JsonParse(msg.into())
    }

    /// Create a batch file error bound to its path
    pub fn batch_file(path: &std::path::Path, msg: impl std::fmt::Display) -> Self {
        Error::BatchFile {
            path: path.display().to_string(),
            message: msg.to_string(),
        }
    }

    /// Create an approval-authority error
    pub fn approval_unreachable(msg: impl Into<String>) -> Self {
        Error::ApprovalAuthorityUnreachable(msg.into())
    }

    /// Create a signature failure error
    pub fn signature_failure(msg: impl Into<String>) -> Self {
        Error::SignatureFailure(msg.into())
    }

    /// True when the error is an on-chain revert rather than a transport failure.
    pub fn is_revert(&self) -> bool {
        matches!(self, Error::Reverted(_))
    }

    /// True for failures on the way to the approval service.
    ///
    /// Used to map transport errors raised during a proposal into
    /// [`Error::ApprovalAuthorityUnreachable`].
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ClientRequest { .. }
                | Error::ServerRequest { .. }
                | Error::GenericRequest(_)
        )
    }
}
