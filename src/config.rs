//! TOML configuration for the `oracle_sync` binary.
//!
//! Every section is optional; a missing file yields the defaults, which
//! target a local development node in simulated mode.

use std::path::{Path, PathBuf};

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use serde::{Deserialize, Serialize};

use crate::{
    consts::{
        DEFAULT_BATCH_PATH, LOCAL_RPC_URL, MAINNET_SAFE_SERVICE_URL, MULTI_SEND_CALL_ONLY,
        SEPOLIA_SAFE_SERVICE_URL,
    },
    contracts::RoutingContracts,
    prelude::*,
    reconcile::ReconcilePolicy,
    Error,
};

const MAINNET_CHAIN_ID: u64 = 1;
const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub contracts: RoutingContracts,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub desired: DesiredConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub reconcile: ReconcilePolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the pending batch is approved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Impersonate the governor on an ephemeral node and execute directly.
    #[default]
    Simulated,
    /// Propose to the Safe Transaction Service.
    External,
}

impl std::str::FromStr for ApprovalMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "simulated" => Ok(ApprovalMode::Simulated),
            "external" => Ok(ApprovalMode::External),
            _ => Err(Error::Config(format!(
                "unknown approval mode '{s}'. Use: simulated, external"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of the node
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Chain id; queried from the node when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub mode: ApprovalMode,
}

fn default_rpc_url() -> String {
    LOCAL_RPC_URL.to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: None,
            mode: ApprovalMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GovernanceConfig {
    /// Identity that owns the routing contracts (usually the Safe)
    #[serde(default)]
    pub governor: Address,
    /// Safe Transaction Service base URL; derived from the chain id when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_service_url: Option<String>,
    #[serde(default = "default_multi_send")]
    pub multi_send: Address,
    /// Address the delegate key must resolve to, when pinned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Address>,
    /// Delegate private key (prefer using ORACLE_SYNC_DELEGATE_KEY env var)
    #[serde(default, skip_serializing)]
    pub delegate_private_key: Option<String>,
}

fn default_multi_send() -> Address {
    MULTI_SEND_CALL_ONLY
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            governor: Address::ZERO,
            safe_service_url: None,
            multi_send: default_multi_send(),
            delegate: None,
            delegate_private_key: None,
        }
    }
}

impl GovernanceConfig {
    /// Parse the delegate key.
    pub fn delegate_wallet(&self) -> Result<PrivateKeySigner> {
        let key = self.delegate_private_key.as_deref().ok_or_else(|| {
            Error::Config(
                "delegate key required. Set via --delegate-key, ORACLE_SYNC_DELEGATE_KEY env var, or config file"
                    .to_string(),
            )
        })?;
        key.trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| Error::PrivateKeyParse(e.to_string()))
    }

    /// Configured service URL, or the public service for known chains.
    pub fn safe_service_url(&self, chain_id: u64) -> Result<String> {
        if let Some(url) = &self.safe_service_url {
            return Ok(url.clone());
        }
        match chain_id {
            MAINNET_CHAIN_ID => Ok(MAINNET_SAFE_SERVICE_URL.to_string()),
            SEPOLIA_CHAIN_ID => Ok(SEPOLIA_SAFE_SERVICE_URL.to_string()),
            _ => Err(Error::Config(format!(
                "no Safe Transaction Service known for chain {chain_id}; set governance.safe_service_url"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DesiredConfig {
    /// Descriptor files, one reconciliation pass each, in order
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_path")]
    pub path: PathBuf,
}

fn default_batch_path() -> PathBuf {
    PathBuf::from(DEFAULT_BATCH_PATH)
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            path: default_batch_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: pretty, json, compact
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file path (logs to both file and stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl AppConfig {
    /// Load `path`, or the defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Check what a run needs before any node is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.contracts.router.is_zero() {
            return Err(Error::Config("contracts.router is not set".to_string()));
        }
        if self.governance.governor.is_zero() {
            return Err(Error::Config("governance.governor is not set".to_string()));
        }
        if self.network.mode == ApprovalMode::External {
            if self.governance.delegate_private_key.is_none() {
                return Err(Error::Config(
                    "external mode needs a delegate key (ORACLE_SYNC_DELEGATE_KEY)".to_string(),
                ));
            }
            if let Some(chain_id) = self.network.chain_id {
                self.governance.safe_service_url(chain_id)?;
            }
        }
        Ok(())
    }

    /// Annotated sample configuration.
    pub fn sample_toml() -> Result<String> {
        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(format!(
            r#"# oracle_sync configuration
# See: oracle_sync --help

{content}
# Note: set the delegate key via ORACLE_SYNC_DELEGATE_KEY environment variable
# or uncomment below (not recommended for security):
# [governance]
# delegate_private_key = "your_private_key_here"
"#
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::SecondaryCheck;
    use alloy::primitives::address;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/oracle_sync.toml")).unwrap();

        assert_eq!(config.network.rpc_url, LOCAL_RPC_URL);
        assert_eq!(config.network.mode, ApprovalMode::Simulated);
        assert_eq!(config.batch.path, PathBuf::from(DEFAULT_BATCH_PATH));
        assert_eq!(config.governance.multi_send, MULTI_SEND_CALL_ONLY);
        assert_eq!(config.reconcile, ReconcilePolicy::default());
    }

    #[test]
    fn test_sample_round_trips() {
        let sample = AppConfig::sample_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&sample).unwrap();

        assert_eq!(parsed.network.rpc_url, LOCAL_RPC_URL);
        assert_eq!(parsed.logging.format, LogFormat::Pretty);
        assert!(parsed.governance.delegate_private_key.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle_sync.toml");
        std::fs::write(
            &path,
            r#"
[network]
mode = "external"
chain_id = 11155111

[contracts]
router = "0x00000000000000000000000000000000000000a1"

[governance]
governor = "0x00000000000000000000000000000000000000f1"
delegate_private_key = "0x01"

[reconcile]
factory_pools = "always"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.network.mode, ApprovalMode::External);
        assert_eq!(
            config.contracts.router,
            address!("0x00000000000000000000000000000000000000a1")
        );
        assert_eq!(config.reconcile.factory_pools, SecondaryCheck::Always);
        assert_eq!(config.reconcile.legacy_pools, SecondaryCheck::Always);
        assert_eq!(config.reconcile.versioned_pools, SecondaryCheck::OnUpdate);
        config.validate().unwrap();
        assert_eq!(
            config.governance.safe_service_url(11_155_111).unwrap(),
            SEPOLIA_SAFE_SERVICE_URL
        );
        // the key never leaks into a written config
        assert!(!toml::to_string(&config).unwrap().contains("delegate_private_key"));
    }

    #[test]
    fn test_validate_requires_router_and_governor() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_err());

        config.contracts.router = address!("0x00000000000000000000000000000000000000a1");
        assert!(config.validate().is_err());

        config.governance.governor = address!("0x00000000000000000000000000000000000000f1");
        config.validate().unwrap();

        config.network.mode = ApprovalMode::External;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_chain_needs_explicit_service_url() {
        let governance = GovernanceConfig::default();
        assert!(governance.safe_service_url(31_337).is_err());
        assert_eq!(
            governance.safe_service_url(1).unwrap(),
            MAINNET_SAFE_SERVICE_URL
        );
    }

    #[test]
    fn test_delegate_wallet() {
        let mut governance = GovernanceConfig::default();
        assert!(matches!(governance.delegate_wallet(), Err(Error::Config(_))));

        governance.delegate_private_key = Some("not a key".to_string());
        assert!(matches!(
            governance.delegate_wallet(),
            Err(Error::PrivateKeyParse(_))
        ));

        governance.delegate_private_key = Some(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
        );
        assert_eq!(
            governance.delegate_wallet().unwrap().address(),
            address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("External".parse::<ApprovalMode>().unwrap(), ApprovalMode::External);
        assert!("manual".parse::<ApprovalMode>().is_err());
    }
}
