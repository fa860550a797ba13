//! In-memory minter state, rebuilt from the event log on startup.

pub mod audit;
pub mod balances;
pub mod event;
pub mod transactions;

use crate::{
    eth_logs::{EventSource, ReceivedErc20Event},
    lifecycle::{InitArg, UpgradeArg},
    network::{BlockTag, EthereumNetwork},
    numeric::{BlockNumber, Erc20Value},
    state::{
        balances::Erc20Balances,
        transactions::{Erc20WithdrawalRequest, EthTransactions},
    },
    tx::{GasFeeEstimate, TransactionReceipt, TransactionStatus},
    users::{User, UserId, Users},
};
use alloy::primitives::{Address, B256};
use candid::Principal;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet, btree_map},
    fmt,
    str::FromStr,
};

const MAX_CK_TOKEN_SYMBOL_LENGTH: usize = 20;

/// Symbol of the token balances held in the vault, e.g. `ckEDEN`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CkTokenSymbol(String);

impl CkTokenSymbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CkTokenSymbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with("ck") {
            return Err(format!("token symbol `{s}` does not start with `ck`"));
        }
        if s.len() > MAX_CK_TOKEN_SYMBOL_LENGTH {
            return Err(format!(
                "token symbol `{s}` is longer than {MAX_CK_TOKEN_SYMBOL_LENGTH} characters"
            ));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("token symbol `{s}` is not alphanumeric"));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for CkTokenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CkErc20Token {
    pub erc20_contract_address: Address,
    pub ckerc20_token_symbol: CkTokenSymbol,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    ScrapLogs,
    Mint,
    ProcessWithdrawals,
    RefreshGasFeeEstimate,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScrapLogs => write!(f, "scrap_logs"),
            Self::Mint => write!(f, "mint"),
            Self::ProcessWithdrawals => write!(f, "process_withdrawals"),
            Self::RefreshGasFeeEstimate => write!(f, "refresh_gas_fee_estimate"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStateError {
    #[error("invalid transaction nonce: {0}")]
    InvalidTransactionNonce(String),
    #[error("invalid minimum withdrawal amount: {0}")]
    InvalidMinimumWithdrawalAmount(String),
    #[error("invalid helper contract address: {0}")]
    InvalidEthereumContractAddress(String),
    #[error("invalid last scraped block number: {0}")]
    InvalidLastScrapedBlockNumber(String),
    #[error("invalid token address: {0}")]
    InvalidCkErc20Address(String),
    #[error("invalid token symbol: {0}")]
    InvalidCkTokenSymbol(String),
}

/// An event that cannot be applied to the current state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("state is already initialized")]
    AlreadyInitialized,
    #[error("deposit {0} was already processed")]
    DuplicateEvent(EventSource),
    #[error("deposit {0} is not waiting to be minted")]
    UnknownEvent(EventSource),
    #[error("insufficient balance of {principal}: available {available}, required {required}")]
    InsufficientBalance {
        principal: Principal,
        available: Erc20Value,
        required: Erc20Value,
    },
    #[error("arithmetic overflow")]
    Overflow,
    #[error("withdrawal {0} already exists")]
    DuplicateWithdrawal(u64),
    #[error("unknown withdrawal {0}")]
    UnknownWithdrawal(u64),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("expected withdrawal id {expected}, got {actual}")]
    UnexpectedWithdrawalId { expected: u64, actual: u64 },
    #[error("user id or principal already registered")]
    DuplicateUser,
    #[error("block {block_number} of {contract_address} was already skipped")]
    SkippedBlockAlreadyRecorded {
        contract_address: Address,
        block_number: BlockNumber,
    },
    #[error(transparent)]
    InvalidUpgrade(#[from] InvalidStateError),
    #[error("{0}")]
    Invariant(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub ethereum_network: EthereumNetwork,
    pub erc20_helper_contract_address: Option<Address>,
    pub ckerc20_token: CkErc20Token,
    pub minimum_withdrawal_amount: Erc20Value,
    /// Vault fee charged on every withdrawal and credited to the admin.
    pub withdraw_fee_value: Erc20Value,
    pub ethereum_block_height: BlockTag,
    pub admin: Principal,

    pub first_scraped_block_number: BlockNumber,
    pub last_erc20_scraped_block_number: BlockNumber,
    pub last_observed_block_number: Option<BlockNumber>,

    pub events_to_mint: BTreeMap<EventSource, ReceivedErc20Event>,
    pub minted_events: BTreeMap<EventSource, ReceivedErc20Event>,
    pub invalid_events: BTreeMap<EventSource, String>,
    pub quarantined_deposits: BTreeSet<EventSource>,
    pub skipped_blocks: BTreeMap<Address, BTreeSet<BlockNumber>>,

    pub eth_transactions: EthTransactions,
    pub erc20_balances: Erc20Balances,
    pub users: Users,
    /// Id of the last accepted withdrawal.
    pub withdraw_count: u64,

    /// Principals with a withdrawal being accepted right now.
    pub pending_withdrawal_principals: BTreeSet<Principal>,
    pub active_tasks: HashSet<TaskType>,
    /// Last gas fee estimate and the time (ns) it was fetched at.
    pub last_transaction_price_estimate: Option<(u64, GasFeeEstimate)>,
}

fn parse_address(address: &str) -> Result<Address, String> {
    Address::from_str(address).map_err(|e| format!("`{address}`: {e}"))
}

impl TryFrom<InitArg> for State {
    type Error = InvalidStateError;

    fn try_from(
        InitArg {
            ethereum_network,
            ethereum_contract_address,
            ethereum_block_height,
            minimum_withdrawal_amount,
            next_transaction_nonce,
            last_scraped_block_number,
            admin,
            ckerc20_token_address,
            ckerc20_token_symbol,
            withdraw_fee_value,
        }: InitArg,
    ) -> Result<Self, Self::Error> {
        let erc20_helper_contract_address = ethereum_contract_address
            .as_deref()
            .map(parse_address)
            .transpose()
            .map_err(InvalidStateError::InvalidEthereumContractAddress)?;
        let first_scraped_block_number =
            last_scraped_block_number.checked_increment().ok_or_else(|| {
                InvalidStateError::InvalidLastScrapedBlockNumber(
                    "last_scraped_block_number is at maximum value".to_string(),
                )
            })?;
        let erc20_contract_address = parse_address(&ckerc20_token_address)
            .map_err(InvalidStateError::InvalidCkErc20Address)?;
        let ckerc20_token_symbol = CkTokenSymbol::from_str(&ckerc20_token_symbol)
            .map_err(InvalidStateError::InvalidCkTokenSymbol)?;

        let state = Self {
            ethereum_network,
            erc20_helper_contract_address,
            ckerc20_token: CkErc20Token {
                erc20_contract_address,
                ckerc20_token_symbol,
            },
            minimum_withdrawal_amount,
            withdraw_fee_value: withdraw_fee_value.unwrap_or_default(),
            ethereum_block_height,
            admin,
            first_scraped_block_number,
            last_erc20_scraped_block_number: last_scraped_block_number,
            last_observed_block_number: None,
            events_to_mint: BTreeMap::new(),
            minted_events: BTreeMap::new(),
            invalid_events: BTreeMap::new(),
            quarantined_deposits: BTreeSet::new(),
            skipped_blocks: BTreeMap::new(),
            eth_transactions: EthTransactions::new(next_transaction_nonce),
            erc20_balances: Erc20Balances::default(),
            users: Users::default(),
            withdraw_count: 0,
            pending_withdrawal_principals: BTreeSet::new(),
            active_tasks: HashSet::new(),
            last_transaction_price_estimate: None,
        };
        state.validate_config()?;
        Ok(state)
    }
}

impl State {
    pub fn validate_config(&self) -> Result<(), InvalidStateError> {
        if self.minimum_withdrawal_amount.is_zero() {
            return Err(InvalidStateError::InvalidMinimumWithdrawalAmount(
                "minimum_withdrawal_amount must be positive".to_string(),
            ));
        }
        if self.erc20_helper_contract_address == Some(Address::ZERO) {
            return Err(InvalidStateError::InvalidEthereumContractAddress(
                "helper contract address cannot be the zero address".to_string(),
            ));
        }
        if self.ckerc20_token.erc20_contract_address == Address::ZERO {
            return Err(InvalidStateError::InvalidCkErc20Address(
                "token address cannot be the zero address".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies the present fields of `upgrade_args`. The state is left untouched on error.
    pub fn upgrade(&mut self, upgrade_args: UpgradeArg) -> Result<(), InvalidStateError> {
        let mut upgraded = self.clone();
        upgraded.apply_upgrade(upgrade_args)?;
        *self = upgraded;
        Ok(())
    }

    fn apply_upgrade(&mut self, upgrade_args: UpgradeArg) -> Result<(), InvalidStateError> {
        let UpgradeArg {
            next_transaction_nonce,
            minimum_withdrawal_amount,
            ethereum_block_height,
            erc20_helper_contract_address,
            last_erc20_scraped_block_number,
            ckerc20_token_address,
            ckerc20_token_symbol,
            withdraw_fee_value,
        } = upgrade_args;
        if let Some(nonce) = next_transaction_nonce {
            let current = self.eth_transactions.next_transaction_nonce();
            if nonce < current && self.eth_transactions.has_pending_requests() {
                return Err(InvalidStateError::InvalidTransactionNonce(format!(
                    "cannot move the next nonce back from {current} to {nonce} with transactions in flight"
                )));
            }
            self.eth_transactions.update_next_transaction_nonce(nonce);
        }
        if let Some(amount) = minimum_withdrawal_amount {
            self.minimum_withdrawal_amount = amount;
        }
        if let Some(tag) = ethereum_block_height {
            self.ethereum_block_height = tag;
        }
        if let Some(address) = erc20_helper_contract_address {
            self.erc20_helper_contract_address = Some(
                parse_address(&address).map_err(InvalidStateError::InvalidEthereumContractAddress)?,
            );
        }
        if let Some(block_number) = last_erc20_scraped_block_number {
            self.last_erc20_scraped_block_number = block_number;
        }
        if let Some(address) = ckerc20_token_address {
            self.ckerc20_token.erc20_contract_address =
                parse_address(&address).map_err(InvalidStateError::InvalidCkErc20Address)?;
        }
        if let Some(symbol) = ckerc20_token_symbol {
            self.ckerc20_token.ckerc20_token_symbol =
                CkTokenSymbol::from_str(&symbol).map_err(InvalidStateError::InvalidCkTokenSymbol)?;
        }
        if let Some(fee) = withdraw_fee_value {
            self.withdraw_fee_value = fee;
        }
        self.validate_config()
    }

    /// Whether the deposit was already seen, whatever its outcome.
    pub fn is_processed(&self, source: &EventSource) -> bool {
        self.events_to_mint.contains_key(source)
            || self.minted_events.contains_key(source)
            || self.invalid_events.contains_key(source)
            || self.quarantined_deposits.contains(source)
    }

    pub fn record_event_to_mint(&mut self, event: &ReceivedErc20Event) -> Result<(), StateError> {
        let source = event.source();
        if self.is_processed(&source) {
            return Err(StateError::DuplicateEvent(source));
        }
        self.events_to_mint.insert(source, event.clone());
        Ok(())
    }

    /// Returns `false` if the deposit was already known to be invalid.
    pub fn record_invalid_deposit(
        &mut self,
        source: EventSource,
        reason: String,
    ) -> Result<bool, StateError> {
        if self.events_to_mint.contains_key(&source) || self.minted_events.contains_key(&source) {
            return Err(StateError::DuplicateEvent(source));
        }
        match self.invalid_events.entry(source) {
            btree_map::Entry::Occupied(_) => Ok(false),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(reason);
                Ok(true)
            }
        }
    }

    pub fn record_successful_mint(
        &mut self,
        source: EventSource,
        principal: Principal,
        amount: Erc20Value,
    ) -> Result<(), StateError> {
        let event = self
            .events_to_mint
            .get(&source)
            .ok_or(StateError::UnknownEvent(source))?;
        if event.principal != principal || event.value != amount {
            return Err(StateError::Invariant(format!(
                "mint of {amount} to {principal} does not match deposit {source}"
            )));
        }
        self.erc20_balances.mint(principal, amount)?;
        if let Some(event) = self.events_to_mint.remove(&source) {
            self.minted_events.insert(source, event);
        }
        Ok(())
    }

    pub fn record_quarantined_deposit(&mut self, source: EventSource) -> Result<(), StateError> {
        self.events_to_mint
            .remove(&source)
            .ok_or(StateError::UnknownEvent(source))?;
        self.quarantined_deposits.insert(source);
        Ok(())
    }

    pub fn record_skipped_block_for_contract(
        &mut self,
        contract_address: Address,
        block_number: BlockNumber,
    ) -> Result<(), StateError> {
        if !self
            .skipped_blocks
            .entry(contract_address)
            .or_default()
            .insert(block_number)
        {
            return Err(StateError::SkippedBlockAlreadyRecorded {
                contract_address,
                block_number,
            });
        }
        Ok(())
    }

    pub fn next_withdrawal_id(&self) -> u64 {
        self.withdraw_count.saturating_add(1)
    }

    pub fn record_erc20_withdrawal_request(
        &mut self,
        request: Erc20WithdrawalRequest,
    ) -> Result<(), StateError> {
        let expected = self.next_withdrawal_id();
        if request.id != expected {
            return Err(StateError::UnexpectedWithdrawalId {
                expected,
                actual: request.id,
            });
        }
        self.erc20_balances.withdraw(
            request.from,
            request.withdrawal_amount,
            request.withdrawal_fee,
            self.admin,
        )?;
        self.withdraw_count = request.id;
        self.eth_transactions.record_withdrawal_request(request)
    }

    pub fn record_finalized_transaction(
        &mut self,
        withdrawal_id: u64,
        receipt: &TransactionReceipt,
    ) -> Result<(), StateError> {
        self.eth_transactions
            .record_finalized_transaction(withdrawal_id, receipt.clone())?;
        if receipt.status == TransactionStatus::Success {
            let amount = self
                .eth_transactions
                .get_processed_withdrawal_request(withdrawal_id)
                .map(|request| request.withdrawal_amount)
                .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
            self.erc20_balances.finalize_withdrawal(amount)?;
        }
        Ok(())
    }

    pub fn record_reimbursement(
        &mut self,
        withdrawal_id: u64,
        reimbursed_amount: Erc20Value,
        transaction_hash: B256,
    ) -> Result<(), StateError> {
        let request = self
            .eth_transactions
            .reimbursement_requests
            .get(&withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        if request.reimbursed_amount != reimbursed_amount
            || request.transaction_hash != transaction_hash
        {
            return Err(StateError::Invariant(format!(
                "reimbursement of withdrawal {withdrawal_id} does not match its request"
            )));
        }
        let to = request.to;
        self.erc20_balances.reimburse(to, reimbursed_amount)?;
        self.eth_transactions.record_reimbursement(withdrawal_id)?;
        Ok(())
    }

    pub fn record_transfer(
        &mut self,
        from: Principal,
        to: Principal,
        amount: Erc20Value,
    ) -> Result<(), StateError> {
        self.erc20_balances.transfer(from, to, amount)
    }

    pub fn record_user(&mut self, principal: Principal, id: UserId) -> Result<(), StateError> {
        if !self.users.insert(User { id, principal }) {
            return Err(StateError::DuplicateUser);
        }
        Ok(())
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.admin == *principal
    }

    /// The admin or a registered user.
    pub fn is_authorized(&self, principal: &Principal) -> bool {
        self.is_admin(principal) || self.users.get_by_principal(principal).is_some()
    }

    pub fn balance_of(&self, principal: &Principal) -> Erc20Value {
        self.erc20_balances.balance_of(principal)
    }

    /// Checks whether two states are equivalent, ignoring runtime-only fields.
    pub fn is_equivalent_to(&self, other: &Self) -> Result<(), String> {
        macro_rules! ensure_eq {
            ($field:ident) => {
                if self.$field != other.$field {
                    return Err(format!(
                        "{} differs: {:?} != {:?}",
                        stringify!($field),
                        self.$field,
                        other.$field
                    ));
                }
            };
        }

        ensure_eq!(ethereum_network);
        ensure_eq!(erc20_helper_contract_address);
        ensure_eq!(ckerc20_token);
        ensure_eq!(minimum_withdrawal_amount);
        ensure_eq!(withdraw_fee_value);
        ensure_eq!(ethereum_block_height);
        ensure_eq!(admin);
        ensure_eq!(first_scraped_block_number);
        ensure_eq!(last_erc20_scraped_block_number);
        ensure_eq!(events_to_mint);
        ensure_eq!(minted_events);
        ensure_eq!(invalid_events);
        ensure_eq!(quarantined_deposits);
        ensure_eq!(skipped_blocks);
        ensure_eq!(erc20_balances);
        ensure_eq!(users);
        ensure_eq!(withdraw_count);
        self.eth_transactions
            .is_equivalent_to(&other.eth_transactions)
            .map_err(|e| format!("eth_transactions: {e}"))
    }
}
