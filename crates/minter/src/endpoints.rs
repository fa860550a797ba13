//! Argument, result and error types of the minter's API methods.

use crate::{
    network::{BlockTag, EthereumNetwork},
    numeric::{BlockNumber, Erc20Value, Wei, WeiPerGas},
    state::event::Event,
    users::UserId,
};
use candid::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EthTransaction {
    pub transaction_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrieveErc20Status {
    NotFound,
    Pending,
    TxCreated,
    TxSent(EthTransaction),
    TxFinalized(TxFinalizedStatus),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxFinalizedStatus {
    Success {
        transaction_hash: String,
        effective_transaction_fee: Option<Wei>,
    },
    PendingReimbursement(EthTransaction),
    Reimbursed {
        transaction_hash: String,
        reimbursed_amount: Erc20Value,
    },
}

impl fmt::Display for RetrieveErc20Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Not Found"),
            Self::Pending => write!(f, "Pending"),
            Self::TxCreated => write!(f, "Created"),
            Self::TxSent(tx) => write!(f, "Sent({})", tx.transaction_hash),
            Self::TxFinalized(TxFinalizedStatus::Success {
                transaction_hash, ..
            }) => write!(f, "Confirmed({transaction_hash})"),
            Self::TxFinalized(TxFinalizedStatus::PendingReimbursement(tx)) => {
                write!(f, "PendingReimbursement({})", tx.transaction_hash)
            }
            Self::TxFinalized(TxFinalizedStatus::Reimbursed {
                transaction_hash,
                reimbursed_amount,
            }) => write!(
                f,
                "Failure({transaction_hash}, reimbursed: {reimbursed_amount})"
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    TxCreated,
    TxSent(EthTransaction),
    TxFinalized(TxFinalizedStatus),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalSearchParameter {
    ByWithdrawalId(u64),
    ByRecipient(String),
    BySender(Principal),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalDetail {
    pub withdrawal_id: u64,
    pub recipient_address: String,
    pub from: Principal,
    pub user_id: Option<String>,
    pub token_symbol: String,
    pub withdrawal_amount: Erc20Value,
    pub max_transaction_fee: Option<Wei>,
    pub status: WithdrawalStatus,
    pub withdraw_vault_fee_value: Erc20Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawErc20Arg {
    pub amount: Erc20Value,
    pub recipient: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveErc20Request {
    pub max_transaction_fee: Wei,
    pub withdrawal_amount: Erc20Value,
    pub withdraw_vault_fee_value: Erc20Value,
    pub destination: String,
    pub from: Principal,
    pub created_at: u64,
    pub id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WithdrawErc20Error {
    #[error("anonymous callers cannot withdraw")]
    AnonymousCaller,
    #[error("caller {0} is not a registered user")]
    CallerNotFound(Principal),
    #[error("a withdrawal of this caller is already being processed")]
    AlreadyProcessing,
    #[error("too many withdrawals are being processed")]
    TooManyPendingRequests,
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("recipient address {address} is blocked")]
    RecipientAddressBlocked { address: String },
    #[error("amount is below the minimum withdrawal amount {min_withdrawal_amount}")]
    AmountTooLow { min_withdrawal_amount: Erc20Value },
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Erc20Value,
        required: Erc20Value,
    },
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferErc20Arg {
    pub receiver: Principal,
    pub amount: Erc20Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TransferErc20Error {
    #[error("caller {0} is not a registered user")]
    CallerNotFound(Principal),
    #[error("recipient {0} is not a registered user")]
    RecipientNotFound(String),
    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Erc20Value,
        required: Erc20Value,
    },
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum UserError {
    #[error("caller {0} is not a registered user")]
    CallerNotFound(Principal),
    #[error("user {0} not found")]
    RecipientNotFound(String),
    #[error("user already exists")]
    UserAlreadyExists,
    #[error("caller is not the admin")]
    NotAdmin,
    #[error("principal is the admin")]
    UserIsAdmin,
    #[error("the anonymous principal cannot be used")]
    AnonymousPrincipal,
    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CallError {
    #[error("anonymous callers are not allowed")]
    AnonymousCaller,
    #[error("caller {0} is not a registered user")]
    CallerNotFound(Principal),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateNewUserArg {
    pub principal: Principal,
    pub user_id: UserId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub deposit_count: u64,
    pub started_withdrawals: u64,
    pub transfers_from: u64,
    pub transfers_in: u64,
    pub ended_withdrawals: u64,
    pub user_balance: Erc20Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEventsArg {
    pub start: u64,
    pub length: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEventsResult {
    pub events: Vec<Event>,
    pub total_event_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasFeeEstimateInfo {
    pub max_fee_per_gas: WeiPerGas,
    pub max_priority_fee_per_gas: WeiPerGas,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterInfo {
    pub minter_address: String,
    pub admin: Principal,
    pub ethereum_network: EthereumNetwork,
    pub chain_id: u64,
    pub erc20_helper_contract_address: Option<String>,
    pub ckerc20_token_address: String,
    pub ckerc20_token_symbol: String,
    pub minimum_withdrawal_amount: Erc20Value,
    pub withdraw_fee_value: Erc20Value,
    pub ethereum_block_height: BlockTag,
    pub first_scraped_block_number: BlockNumber,
    pub last_erc20_scraped_block_number: BlockNumber,
    pub last_observed_block_number: Option<BlockNumber>,
    pub last_gas_fee_estimate: Option<GasFeeEstimateInfo>,
    pub total_erc20_balance: Erc20Value,
    pub total_event_count: u64,
    pub pending_withdrawals: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub event_count: u64,
    /// `None` when the replayed state matches the live one.
    pub mismatch: Option<String>,
}
