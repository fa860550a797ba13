//! Minter configuration.
//!
//! Loaded from a TOML file, then overridden by environment variables:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `CK_ERC20_DEPOSIT_ADDRESS` | `helper_contract_address` |
//! | `EDEN_TOKEN_ADDRESS` or `FORGE_TOKEN_ADDRESS` | `token_address` |
//! | `EDEN_VAULT_RPC_URL` | `rpc_urls` |
//! | `MINTER_PRIVATE_KEY` | `signer_private_key` |
//! | `DFX_NETWORK=local` | `ethereum_network` and `api_address` |

use crate::{
    blocklist::Blocklist,
    identity::Identity,
    lifecycle::{InitArg, UpgradeArg},
    network::{BlockTag, EthereumNetwork},
    numeric::{BlockNumber, Erc20Value, TransactionNonce},
};
use alloy::{
    primitives::{Address, address},
    signers::local::PrivateKeySigner,
};
use candid::Principal;
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const HELPER_ADDRESS_ENV: &str = "CK_ERC20_DEPOSIT_ADDRESS";
pub const TOKEN_ADDRESS_ENV: &str = "EDEN_TOKEN_ADDRESS";
pub const FORGE_TOKEN_ADDRESS_ENV: &str = "FORGE_TOKEN_ADDRESS";
pub const RPC_URL_ENV: &str = "EDEN_VAULT_RPC_URL";
pub const MINTER_PRIVATE_KEY_ENV: &str = "MINTER_PRIVATE_KEY";
pub const DFX_NETWORK_ENV: &str = "DFX_NETWORK";

/// Address the API listens on for local deployments.
pub const LOCAL_API_ADDRESS: &str = "127.0.0.1:4943";

/// First deployment of the first anvil account.
const LOCAL_TOKEN_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
/// Second deployment of the first anvil account.
const LOCAL_HELPER_ADDRESS: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
/// First anvil dev account. Only used on the local network.
const LOCAL_DEV_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: &'static str, reason: String },
    #[error("no signer key configured for {0}, set {MINTER_PRIVATE_KEY_ENV}")]
    MissingSignerKey(EthereumNetwork),
    #[error("invalid signer key: {0}")]
    InvalidSignerKey(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinterConfig {
    #[serde(default)]
    pub ethereum_network: EthereumNetwork,
    /// JSON-RPC providers, tried in order. Empty means the network's defaults.
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub ethereum_block_height: BlockTag,
    pub helper_contract_address: Option<Address>,
    pub token_address: Address,
    #[serde(default = "default_token_symbol")]
    pub token_symbol: String,
    pub minimum_withdrawal_amount: Erc20Value,
    #[serde(default)]
    pub withdraw_fee_value: Erc20Value,
    #[serde(default)]
    pub next_transaction_nonce: TransactionNonce,
    #[serde(default)]
    pub last_scraped_block_number: BlockNumber,
    pub admin: Principal,
    /// Hex-encoded secp256k1 key signing withdrawal transactions.
    #[serde(default, skip_serializing)]
    pub signer_private_key: Option<String>,
    #[serde(default = "default_event_log_path")]
    pub event_log_path: PathBuf,
    #[serde(default = "default_api_address")]
    pub api_address: SocketAddr,
    /// Largest block range requested by a single `eth_getLogs`.
    #[serde(default = "default_max_block_spread")]
    pub max_block_spread: u64,
    #[serde(default = "default_scrape_interval_secs")]
    pub scrape_interval_secs: u64,
    #[serde(default = "default_withdrawal_interval_secs")]
    pub withdrawal_interval_secs: u64,
    #[serde(default = "default_withdrawal_retry_interval_secs")]
    pub withdrawal_retry_interval_secs: u64,
    /// Addresses blocked in addition to the built-in list.
    #[serde(default)]
    pub blocklist: Vec<Address>,
    /// Changes recorded on startup when the event log already exists.
    #[serde(default)]
    pub upgrade: Option<UpgradeArg>,
}

fn default_token_symbol() -> String {
    "ckEDEN".to_string()
}

fn default_event_log_path() -> PathBuf {
    PathBuf::from("eden-vault-events.jsonl")
}

fn default_api_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4943))
}

const fn default_max_block_spread() -> u64 {
    500
}

const fn default_scrape_interval_secs() -> u64 {
    60
}

const fn default_withdrawal_interval_secs() -> u64 {
    360
}

const fn default_withdrawal_retry_interval_secs() -> u64 {
    60
}

impl MinterConfig {
    /// Loads the config at `path` and applies the environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Config of a minter next to a fresh local anvil node, with alice as admin.
    pub fn default_test_config() -> Self {
        Self {
            ethereum_network: EthereumNetwork::Local,
            rpc_urls: Vec::new(),
            ethereum_block_height: BlockTag::Latest,
            helper_contract_address: Some(LOCAL_HELPER_ADDRESS),
            token_address: LOCAL_TOKEN_ADDRESS,
            token_symbol: default_token_symbol(),
            minimum_withdrawal_amount: Erc20Value::new(10),
            withdraw_fee_value: Erc20Value::ZERO,
            next_transaction_nonce: TransactionNonce::ZERO,
            last_scraped_block_number: BlockNumber::ZERO,
            admin: Identity::from_name("alice").principal(),
            signer_private_key: None,
            event_log_path: default_event_log_path(),
            api_address: default_api_address(),
            max_block_spread: default_max_block_spread(),
            scrape_interval_secs: default_scrape_interval_secs(),
            withdrawal_interval_secs: default_withdrawal_interval_secs(),
            withdrawal_retry_interval_secs: default_withdrawal_retry_interval_secs(),
            blocklist: Vec::new(),
            upgrade: None,
        }
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Applies the overrides found by `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let parse_address = |var: &'static str, value: String| {
            Address::from_str(value.trim()).map_err(|e| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
            })
        };

        if let Some(value) = lookup(HELPER_ADDRESS_ENV) {
            self.helper_contract_address = Some(parse_address(HELPER_ADDRESS_ENV, value)?);
        }
        if let Some(value) = lookup(TOKEN_ADDRESS_ENV) {
            self.token_address = parse_address(TOKEN_ADDRESS_ENV, value)?;
        } else if let Some(value) = lookup(FORGE_TOKEN_ADDRESS_ENV) {
            self.token_address = parse_address(FORGE_TOKEN_ADDRESS_ENV, value)?;
        }
        if let Some(value) = lookup(RPC_URL_ENV) {
            self.rpc_urls = value
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = lookup(MINTER_PRIVATE_KEY_ENV) {
            self.signer_private_key = Some(value.trim().to_string());
        }
        if lookup(DFX_NETWORK_ENV).as_deref() == Some("local") {
            self.ethereum_network = EthereumNetwork::Local;
            self.api_address =
                SocketAddr::from_str(LOCAL_API_ADDRESS).map_err(|e| ConfigError::InvalidEnv {
                    var: DFX_NETWORK_ENV,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_block_spread == 0 {
            return Err(ConfigError::Invalid(
                "max_block_spread must be positive".to_string(),
            ));
        }
        for (name, secs) in [
            ("scrape_interval_secs", self.scrape_interval_secs),
            ("withdrawal_interval_secs", self.withdrawal_interval_secs),
            (
                "withdrawal_retry_interval_secs",
                self.withdrawal_retry_interval_secs,
            ),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Arguments of the `Init` event of a fresh minter.
    pub fn init_arg(&self) -> InitArg {
        InitArg {
            ethereum_network: self.ethereum_network,
            ethereum_contract_address: self.helper_contract_address.map(|a| a.to_string()),
            ethereum_block_height: self.ethereum_block_height,
            minimum_withdrawal_amount: self.minimum_withdrawal_amount,
            next_transaction_nonce: self.next_transaction_nonce,
            last_scraped_block_number: self.last_scraped_block_number,
            admin: self.admin,
            ckerc20_token_address: self.token_address.to_string(),
            ckerc20_token_symbol: self.token_symbol.clone(),
            withdraw_fee_value: Some(self.withdraw_fee_value),
        }
    }

    pub fn signer(&self) -> Result<PrivateKeySigner, ConfigError> {
        let key = match (&self.signer_private_key, self.ethereum_network) {
            (Some(key), _) => key.as_str(),
            (None, EthereumNetwork::Local) => LOCAL_DEV_PRIVATE_KEY,
            (None, network) => return Err(ConfigError::MissingSignerKey(network)),
        };
        PrivateKeySigner::from_str(key).map_err(|e| ConfigError::InvalidSignerKey(e.to_string()))
    }

    pub fn rpc_urls(&self) -> Vec<String> {
        if self.rpc_urls.is_empty() {
            self.ethereum_network.default_rpc_urls()
        } else {
            self.rpc_urls.clone()
        }
    }

    pub fn blocklist(&self) -> Blocklist {
        Blocklist::new(self.blocklist.iter().copied())
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn withdrawal_interval(&self) -> Duration {
        Duration::from_secs(self.withdrawal_interval_secs)
    }

    pub fn withdrawal_retry_interval(&self) -> Duration {
        Duration::from_secs(self.withdrawal_retry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ADMIN: &str = "2vxsx-fae";

    fn minimal_toml() -> String {
        format!(
            r#"
ethereum_network = "sepolia"
token_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
helper_contract_address = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"
minimum_withdrawal_amount = "1000"
admin = "{ADMIN}"
"#
        )
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minter.toml");
        std::fs::write(&path, minimal_toml()).unwrap();

        let config = MinterConfig::load(&path).unwrap();
        assert_eq!(config.ethereum_network, EthereumNetwork::Sepolia);
        assert_eq!(config.minimum_withdrawal_amount, Erc20Value::new(1000));
        assert_eq!(config.token_symbol, "ckEDEN");
        assert_eq!(config.max_block_spread, 500);
        assert_eq!(config.withdrawal_interval(), Duration::from_secs(360));
        assert_eq!(config.rpc_urls(), EthereumNetwork::Sepolia.default_rpc_urls());
        assert!(config.upgrade.is_none());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let toml = format!("{}\nunknown = 1\n", minimal_toml());
        assert!(toml::from_str::<MinterConfig>(&toml).is_err());
    }

    #[test]
    fn test_upgrade_section_is_parsed() {
        let toml = format!(
            "{}\n[upgrade]\nwithdraw_fee_value = \"5\"\n",
            minimal_toml()
        );
        let config: MinterConfig = toml::from_str(&toml).unwrap();
        assert_eq!(
            config.upgrade,
            Some(UpgradeArg {
                withdraw_fee_value: Some(Erc20Value::new(5)),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (HELPER_ADDRESS_ENV, "0x1111111111111111111111111111111111111111"),
            (FORGE_TOKEN_ADDRESS_ENV, "0x2222222222222222222222222222222222222222"),
            (RPC_URL_ENV, "http://a:8545, http://b:8545"),
            (DFX_NETWORK_ENV, "local"),
        ]);
        let mut config: MinterConfig = toml::from_str(&minimal_toml()).unwrap();
        config.api_address = "0.0.0.0:8080".parse().unwrap();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.helper_contract_address,
            Some(Address::repeat_byte(0x11))
        );
        assert_eq!(config.token_address, Address::repeat_byte(0x22));
        assert_eq!(config.rpc_urls, vec!["http://a:8545", "http://b:8545"]);
        assert_eq!(config.ethereum_network, EthereumNetwork::Local);
        assert_eq!(config.api_address.to_string(), LOCAL_API_ADDRESS);
    }

    #[test]
    fn test_invalid_env_address() {
        let mut config = MinterConfig::default_test_config();
        let err = config
            .apply_overrides(|var| (var == TOKEN_ADDRESS_ENV).then(|| "0x12".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: TOKEN_ADDRESS_ENV,
                ..
            }
        ));
    }

    #[test]
    fn test_signer_key_is_required_outside_local() {
        let mut config = MinterConfig::default_test_config();
        assert!(config.signer().is_ok());

        config.ethereum_network = EthereumNetwork::Sepolia;
        assert!(matches!(
            config.signer(),
            Err(ConfigError::MissingSignerKey(EthereumNetwork::Sepolia))
        ));

        config.signer_private_key = Some("not a key".to_string());
        assert!(matches!(
            config.signer(),
            Err(ConfigError::InvalidSignerKey(_))
        ));
    }

    #[test]
    fn test_init_arg_round_trips_through_state() {
        let config = MinterConfig::default_test_config();
        let state = crate::state::State::try_from(config.init_arg()).unwrap();
        assert_eq!(
            state.ckerc20_token.erc20_contract_address,
            config.token_address
        );
        assert_eq!(state.erc20_helper_contract_address, config.helper_contract_address);
        assert_eq!(state.admin, config.admin);
    }
}
