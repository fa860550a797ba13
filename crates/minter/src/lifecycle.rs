//! Arguments recorded when the minter is first started or reconfigured.

use crate::{
    network::{BlockTag, EthereumNetwork},
    numeric::{BlockNumber, Erc20Value, TransactionNonce},
};
use candid::Principal;
use serde::{Deserialize, Serialize};

/// Configuration of a fresh minter. Recorded as the first event of the log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitArg {
    pub ethereum_network: EthereumNetwork,
    /// Address of the deposit helper contract.
    pub ethereum_contract_address: Option<String>,
    pub ethereum_block_height: BlockTag,
    pub minimum_withdrawal_amount: Erc20Value,
    pub next_transaction_nonce: TransactionNonce,
    /// Deposits are scraped starting right after this block.
    pub last_scraped_block_number: BlockNumber,
    pub admin: Principal,
    pub ckerc20_token_address: String,
    pub ckerc20_token_symbol: String,
    #[serde(default)]
    pub withdraw_fee_value: Option<Erc20Value>,
}

/// Changes applied to an existing minter. Absent fields keep their value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeArg {
    pub next_transaction_nonce: Option<TransactionNonce>,
    pub minimum_withdrawal_amount: Option<Erc20Value>,
    pub ethereum_block_height: Option<BlockTag>,
    pub erc20_helper_contract_address: Option<String>,
    pub last_erc20_scraped_block_number: Option<BlockNumber>,
    pub ckerc20_token_address: Option<String>,
    pub ckerc20_token_symbol: Option<String>,
    pub withdraw_fee_value: Option<Erc20Value>,
}

impl UpgradeArg {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
