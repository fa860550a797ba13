use crate::{
    eth_logs::{EventSource, ReceivedErc20Event},
    lifecycle::{InitArg, UpgradeArg},
    numeric::{BlockNumber, Erc20Value},
    state::transactions::Erc20WithdrawalRequest,
    tx::{Eip1559TransactionRequest, SignedEip1559TransactionRequest, TransactionReceipt},
    users::UserId,
};
use alloy::primitives::{Address, B256};
use candid::Principal;
use serde::{Deserialize, Serialize};

/// A minter state transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    /// Initialization. Must be the first event of the log.
    Init(InitArg),
    Upgrade(UpgradeArg),
    /// A deposit found in the helper contract logs, waiting to be minted.
    AcceptedErc20Deposit(ReceivedErc20Event),
    /// A deposit that will never be minted.
    InvalidDeposit {
        event_source: EventSource,
        reason: String,
    },
    MintedCkErc20 {
        event_source: EventSource,
        principal: Principal,
        amount: Erc20Value,
    },
    /// A deposit set aside without minting. Needs manual intervention.
    QuarantinedDeposit { event_source: EventSource },
    /// Helper contract logs were processed up to this block (inclusive).
    SyncedErc20ToBlock { block_number: BlockNumber },
    /// A block whose logs could not be fetched.
    SkippedBlockForContract {
        contract_address: Address,
        block_number: BlockNumber,
    },
    AcceptedErc20WithdrawalRequest(Erc20WithdrawalRequest),
    CreatedTransaction {
        withdrawal_id: u64,
        transaction: Eip1559TransactionRequest,
    },
    SignedTransaction {
        withdrawal_id: u64,
        transaction: SignedEip1559TransactionRequest,
    },
    /// A new transaction with higher fees for an already sent nonce.
    ReplacedTransaction {
        withdrawal_id: u64,
        transaction: Eip1559TransactionRequest,
    },
    FinalizedTransaction {
        withdrawal_id: u64,
        transaction_receipt: TransactionReceipt,
    },
    /// The amount of a failed withdrawal was credited back to its sender.
    ReimbursedErc20Withdrawal {
        withdrawal_id: u64,
        reimbursed_amount: Erc20Value,
        transaction_hash: B256,
    },
    Erc20TransferCompleted {
        from: Principal,
        to: Principal,
        amount: Erc20Value,
    },
    UserCreated {
        principal: Principal,
        user_id: UserId,
    },
    AdminChanged { admin: Principal },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Nanoseconds since the Unix epoch at which the event was recorded.
    pub timestamp: u64,
    pub payload: EventType,
}
