//! Supported EVM networks and their public RPC providers.

use serde::{Deserialize, Serialize};
use std::fmt;

const MAINNET_PROVIDERS: &[&str] = &[
    "https://ethereum.blockpi.network/v1/rpc/public",
    "https://ethereum-rpc.publicnode.com",
    "https://eth.llamarpc.com",
];

const SEPOLIA_PROVIDERS: &[&str] = &[
    "https://ethereum-sepolia.blockpi.network/v1/rpc/public",
    "https://ethereum-sepolia-rpc.publicnode.com",
    "https://rpc.sepolia.org",
];

const BSC_PROVIDERS: &[&str] = &[
    "https://bsc.blockpi.network/v1/rpc/public",
    "https://bsc-rpc.publicnode.com",
    "https://bsc.drpc.org",
];

const BSC_TESTNET_PROVIDERS: &[&str] = &[
    "https://bsc-testnet.blockpi.network/v1/rpc/public",
    "https://bsc-testnet-rpc.publicnode.com",
];

pub const LOCAL_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EthereumNetwork {
    Mainnet,
    Sepolia,
    Bsc,
    BscTestnet,
    #[default]
    Local,
}

impl EthereumNetwork {
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Sepolia => 11_155_111,
            Self::Bsc => 56,
            Self::BscTestnet => 97,
            Self::Local => 31_337,
        }
    }

    /// Public RPC endpoints used when the configuration does not name any.
    pub fn default_rpc_urls(&self) -> Vec<String> {
        let urls: &[&str] = match self {
            Self::Mainnet => MAINNET_PROVIDERS,
            Self::Sepolia => SEPOLIA_PROVIDERS,
            Self::Bsc => BSC_PROVIDERS,
            Self::BscTestnet => BSC_TESTNET_PROVIDERS,
            Self::Local => &[LOCAL_RPC_URL],
        };
        urls.iter().map(|url| url.to_string()).collect()
    }
}

impl TryFrom<u64> for EthereumNetwork {
    type Error = String;

    fn try_from(chain_id: u64) -> Result<Self, Self::Error> {
        [
            Self::Mainnet,
            Self::Sepolia,
            Self::Bsc,
            Self::BscTestnet,
            Self::Local,
        ]
        .into_iter()
        .find(|network| network.chain_id() == chain_id)
        .ok_or_else(|| format!("unknown chain id {chain_id}"))
    }
}

impl fmt::Display for EthereumNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mainnet => write!(f, "Ethereum Mainnet"),
            Self::Sepolia => write!(f, "Ethereum Testnet Sepolia"),
            Self::Bsc => write!(f, "BSC"),
            Self::BscTestnet => write!(f, "BSC Testnet"),
            Self::Local => write!(f, "Local Testnet"),
        }
    }
}

/// Block height at which the minter observes the chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    /// The latest mined block.
    #[default]
    Latest,
    /// The latest safe head block.
    Safe,
    /// The latest finalized block.
    Finalized,
}

impl From<BlockTag> for alloy::eips::BlockNumberOrTag {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => Self::Latest,
            BlockTag::Safe => Self::Safe,
            BlockTag::Finalized => Self::Finalized,
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Safe => write!(f, "safe"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}
