//! The minter handle shared by the background tasks and the API.
//!
//! Every state change goes through [`Minter::process_event`]: the event is
//! applied to the in-memory state and then appended to the event log, both
//! under the log lock so that the log order matches the application order.

use crate::{
    address::{AddressValidationError, validate_address_as_destination},
    blocklist::Blocklist,
    config::{ConfigError, MinterConfig},
    endpoints::{
        self, AuditReport, CallError, CreateNewUserArg, GasFeeEstimateInfo, GetEventsArg,
        GetEventsResult, MinterInfo, RetrieveErc20Request, RetrieveErc20Status,
        TransferErc20Arg, TransferErc20Error, UserError, UserStats, WithdrawErc20Arg,
        WithdrawErc20Error, WithdrawalDetail,
    },
    guard::{TimerGuard, WithdrawGuard},
    metrics::MinterMetrics,
    network::BlockTag,
    numeric::{BlockNumber, Erc20Value},
    rpc::EthRpc,
    state::{
        InvalidStateError, State, StateError, TaskType,
        audit::{ReplayError, apply_state_transition, replay_events},
        event::{Event, EventType},
        transactions::{Erc20WithdrawalRequest, WithdrawalSearchParameter},
    },
    storage::{EventLog, StorageError},
    tx::{GasFeeEstimate, estimate_transaction_fee},
    users::compute_user_stats,
    withdraw::ERC20_WITHDRAWAL_TRANSACTION_GAS_LIMIT,
};
use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use candid::Principal;
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error, info, warn};

/// Maximum number of events returned by a single [`Minter::get_events`] call.
pub const MAX_EVENTS_PER_PAGE: u64 = 100;

const FEE_HISTORY_BLOCK_COUNT: u64 = 5;
const FEE_HISTORY_REWARD_PERCENTILE: f64 = 50.0;
const GAS_FEE_ESTIMATE_MAX_AGE_NANOS: u64 = 60 * 1_000_000_000;

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum MinterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to replay the event log: {0}")]
    Replay(#[from] ReplayError),
    #[error("invalid minter arguments: {0}")]
    InvalidArguments(#[from] InvalidStateError),
    #[error("event rejected: {0}")]
    Rejected(#[from] StateError),
}

struct MinterInner {
    state: RwLock<State>,
    log: Mutex<EventLog>,
    rpc: Arc<dyn EthRpc>,
    signer: PrivateKeySigner,
    blocklist: Blocklist,
    metrics: MinterMetrics,
    max_block_spread: u64,
}

#[derive(Clone)]
pub struct Minter {
    inner: Arc<MinterInner>,
}

impl fmt::Debug for Minter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Minter")
            .field("address", &self.inner.signer.address())
            .field("max_block_spread", &self.inner.max_block_spread)
            .finish_non_exhaustive()
    }
}

impl Minter {
    /// Starts a minter on `log`.
    ///
    /// An empty log is initialized from the config. Otherwise the state is
    /// replayed from the log and the config's `upgrade` section, if any, is
    /// recorded on top of it.
    pub fn initialize(
        config: &MinterConfig,
        mut log: EventLog,
        rpc: Arc<dyn EthRpc>,
    ) -> Result<Self, MinterError> {
        let signer = config.signer()?;
        let state = if log.is_empty() {
            let init_arg = config.init_arg();
            let state = State::try_from(init_arg.clone())?;
            log.append(&Event {
                timestamp: now_nanos(),
                payload: EventType::Init(init_arg),
            })?;
            info!(
                network = %state.ethereum_network,
                token = %state.ckerc20_token.erc20_contract_address,
                "Initialized minter"
            );
            state
        } else {
            let mut state = replay_events(log.iter().cloned())?;
            info!(events = log.len(), "Replayed event log");
            if let Some(upgrade_arg) = config.upgrade.clone().filter(|arg| !arg.is_empty()) {
                state.upgrade(upgrade_arg.clone())?;
                log.append(&Event {
                    timestamp: now_nanos(),
                    payload: EventType::Upgrade(upgrade_arg),
                })?;
                info!("Recorded minter upgrade");
            }
            state
        };

        Ok(Self {
            inner: Arc::new(MinterInner {
                state: RwLock::new(state),
                log: Mutex::new(log),
                rpc,
                signer,
                blocklist: config.blocklist(),
                metrics: MinterMetrics::default(),
                max_block_spread: config.max_block_spread,
            }),
        })
    }

    pub fn read_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Mutates fields that are not reconstructed from the event log.
    pub(crate) fn mutate_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.inner.state.write())
    }

    /// Applies `payload` and appends it to the event log.
    pub fn process_event(&self, payload: EventType) -> Result<(), MinterError> {
        self.record_event(|_| (payload, ()))
    }

    /// Builds an event from the current state, then applies and records it
    /// without letting another event in between.
    ///
    /// The live state only changes once the event is durably appended.
    pub(crate) fn record_event<T>(
        &self,
        build: impl FnOnce(&State) -> (EventType, T),
    ) -> Result<T, MinterError> {
        let mut log = self.inner.log.lock();
        let mut state = self.inner.state.write();
        let (payload, output) = build(&state);
        let mut next = state.clone();
        apply_state_transition(&mut next, &payload)?;
        let event = Event {
            timestamp: now_nanos(),
            payload,
        };
        if let Err(e) = log.append(&event) {
            error!(error = %e, event = ?event.payload, "Event could not be persisted, state left unchanged");
            return Err(e.into());
        }
        *state = next;
        Ok(output)
    }

    pub(crate) fn rpc(&self) -> &dyn EthRpc {
        self.inner.rpc.as_ref()
    }

    pub(crate) fn signer(&self) -> &PrivateKeySigner {
        &self.inner.signer
    }

    pub(crate) fn blocklist(&self) -> &Blocklist {
        &self.inner.blocklist
    }

    pub(crate) fn metrics(&self) -> &MinterMetrics {
        &self.inner.metrics
    }

    pub(crate) fn max_block_spread(&self) -> u64 {
        self.inner.max_block_spread
    }

    /// Gas fee estimate at most one minute old, fetched from the fee history
    /// of the last blocks when the cached one is stale.
    pub async fn lazy_refresh_gas_fee_estimate(&self) -> Option<GasFeeEstimate> {
        let cached = self.read_state(|s| s.last_transaction_price_estimate.clone());
        if let Some((fetched_at, estimate)) = &cached {
            if now_nanos().saturating_sub(*fetched_at) < GAS_FEE_ESTIMATE_MAX_AGE_NANOS {
                return Some(estimate.clone());
            }
        }

        let _guard = match TimerGuard::new(self, TaskType::RefreshGasFeeEstimate) {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "Using cached gas fee estimate");
                return cached.map(|(_, estimate)| estimate);
            }
        };

        let fee_history = match self
            .rpc()
            .fee_history(
                FEE_HISTORY_BLOCK_COUNT,
                BlockTag::Latest,
                &[FEE_HISTORY_REWARD_PERCENTILE],
            )
            .await
        {
            Ok(fee_history) => fee_history,
            Err(e) => {
                self.metrics().record_rpc_failure();
                warn!(error = %e, "Failed to get fee history");
                return None;
            }
        };
        match estimate_transaction_fee(&fee_history) {
            Ok(estimate) => {
                debug!(?estimate, "Refreshed gas fee estimate");
                self.mutate_state(|s| {
                    s.last_transaction_price_estimate = Some((now_nanos(), estimate.clone()))
                });
                Some(estimate)
            }
            Err(e) => {
                warn!(error = %e, "Failed to estimate transaction fee");
                None
            }
        }
    }

    /// Records the scraping progress so a restart resumes from it.
    pub fn shutdown(&self) -> Result<(), MinterError> {
        let block_number = self.read_state(|s| s.last_erc20_scraped_block_number);
        self.process_event(EventType::SyncedErc20ToBlock { block_number })?;
        info!(%block_number, "Minter stopped");
        Ok(())
    }

    pub fn minter_address(&self) -> Address {
        self.inner.signer.address()
    }

    pub fn retrieve_eth_status(&self, withdrawal_id: u64) -> RetrieveErc20Status {
        self.read_state(|s| s.eth_transactions.transaction_status(withdrawal_id))
    }

    pub fn withdrawal_status(
        &self,
        parameter: endpoints::WithdrawalSearchParameter,
    ) -> Result<Vec<WithdrawalDetail>, String> {
        let parameter = WithdrawalSearchParameter::try_from(parameter)?;
        Ok(self.read_state(|s| {
            let token_symbol = s.ckerc20_token.ckerc20_token_symbol.to_string();
            s.eth_transactions
                .withdrawal_status(&parameter)
                .into_iter()
                .map(|(request, status, tx)| WithdrawalDetail {
                    withdrawal_id: request.id,
                    recipient_address: request.destination.to_string(),
                    from: request.from,
                    user_id: s.users.user_id_hex(&request.from),
                    token_symbol: token_symbol.clone(),
                    withdrawal_amount: request.withdrawal_amount,
                    max_transaction_fee: tx.map(|tx| tx.transaction_price().max_transaction_fee()),
                    status,
                    withdraw_vault_fee_value: request.withdrawal_fee,
                })
                .collect()
        }))
    }

    pub async fn withdraw_erc20(
        &self,
        caller: Principal,
        WithdrawErc20Arg { amount, recipient }: WithdrawErc20Arg,
    ) -> Result<RetrieveErc20Request, WithdrawErc20Error> {
        if caller == Principal::anonymous() {
            return Err(WithdrawErc20Error::AnonymousCaller);
        }
        if !self.read_state(|s| s.is_authorized(&caller)) {
            return Err(WithdrawErc20Error::CallerNotFound(caller));
        }
        let _guard = WithdrawGuard::new(self, caller)?;

        let destination = validate_address_as_destination(&recipient, self.blocklist())
            .map_err(|e| match e {
                AddressValidationError::Blocked(address) => {
                    WithdrawErc20Error::RecipientAddressBlocked {
                        address: address.to_string(),
                    }
                }
                other => WithdrawErc20Error::InvalidDestination(other.to_string()),
            })?;

        let (minimum_withdrawal_amount, withdrawal_fee, available) = self.read_state(|s| {
            (
                s.minimum_withdrawal_amount,
                s.withdraw_fee_value,
                s.balance_of(&caller),
            )
        });
        if amount < minimum_withdrawal_amount {
            return Err(WithdrawErc20Error::AmountTooLow {
                min_withdrawal_amount: minimum_withdrawal_amount,
            });
        }
        let required = amount.saturating_add(withdrawal_fee);
        if available < required {
            return Err(WithdrawErc20Error::InsufficientFunds {
                available,
                required,
            });
        }

        let gas_fee_estimate = self.lazy_refresh_gas_fee_estimate().await.ok_or_else(|| {
            WithdrawErc20Error::TemporarilyUnavailable(
                "Failed to retrieve current gas fee".to_string(),
            )
        })?;
        let max_transaction_fee = gas_fee_estimate
            .to_price(ERC20_WITHDRAWAL_TRANSACTION_GAS_LIMIT)
            .max_transaction_fee();

        let created_at = now_nanos();
        let request = self
            .record_event(|s| {
                let request = Erc20WithdrawalRequest {
                    max_transaction_fee,
                    withdrawal_amount: amount,
                    withdrawal_fee,
                    destination,
                    from: caller,
                    created_at,
                    id: s.next_withdrawal_id(),
                };
                (
                    EventType::AcceptedErc20WithdrawalRequest(request.clone()),
                    request,
                )
            })
            .map_err(|e| match e {
                MinterError::Rejected(StateError::InsufficientBalance {
                    available,
                    required,
                    ..
                }) => WithdrawErc20Error::InsufficientFunds {
                    available,
                    required,
                },
                other => WithdrawErc20Error::TemporarilyUnavailable(other.to_string()),
            })?;

        self.metrics().record_withdrawal_accepted();
        self.metrics().set_pending_withdrawals(
            self.read_state(|s| s.eth_transactions.withdrawal_requests_len()),
        );
        info!(
            withdrawal_id = request.id,
            from = %caller,
            %destination,
            amount = %request.withdrawal_amount,
            "Accepted withdrawal request"
        );

        Ok(RetrieveErc20Request {
            max_transaction_fee: request.max_transaction_fee,
            withdrawal_amount: request.withdrawal_amount,
            withdraw_vault_fee_value: request.withdrawal_fee,
            destination: request.destination.to_string(),
            from: request.from,
            created_at: request.created_at,
            id: request.id,
        })
    }

    /// Whether `address` is blocked. Unparsable addresses are not.
    pub fn is_address_blocked(&self, address: &str) -> bool {
        Address::from_str(address)
            .map(|address| self.blocklist().is_blocked(&address))
            .unwrap_or(false)
    }

    pub fn get_minter_info(&self) -> MinterInfo {
        let total_event_count = self.inner.log.lock().len();
        let minter_address = self.minter_address().to_string();
        self.read_state(|s| MinterInfo {
            minter_address,
            admin: s.admin,
            ethereum_network: s.ethereum_network,
            chain_id: s.ethereum_network.chain_id(),
            erc20_helper_contract_address: s
                .erc20_helper_contract_address
                .map(|address| address.to_string()),
            ckerc20_token_address: s.ckerc20_token.erc20_contract_address.to_string(),
            ckerc20_token_symbol: s.ckerc20_token.ckerc20_token_symbol.to_string(),
            minimum_withdrawal_amount: s.minimum_withdrawal_amount,
            withdraw_fee_value: s.withdraw_fee_value,
            ethereum_block_height: s.ethereum_block_height,
            first_scraped_block_number: s.first_scraped_block_number,
            last_erc20_scraped_block_number: s.last_erc20_scraped_block_number,
            last_observed_block_number: s.last_observed_block_number,
            last_gas_fee_estimate: s.last_transaction_price_estimate.as_ref().map(
                |(timestamp, estimate)| GasFeeEstimateInfo {
                    max_fee_per_gas: estimate.min_max_fee_per_gas(),
                    max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
                    timestamp: *timestamp,
                },
            ),
            total_erc20_balance: s.erc20_balances.total(),
            total_event_count,
            pending_withdrawals: s.eth_transactions.withdrawal_requests_len() as u64,
        })
    }

    pub fn get_events(&self, GetEventsArg { start, length }: GetEventsArg) -> GetEventsResult {
        let log = self.inner.log.lock();
        GetEventsResult {
            events: log.range(start, length.min(MAX_EVENTS_PER_PAGE)).to_vec(),
            total_event_count: log.len(),
        }
    }

    /// Replays the whole event log and compares the result with the live state.
    pub fn check_audit_log(&self) -> Result<AuditReport, MinterError> {
        let log = self.inner.log.lock();
        let replayed = replay_events(log.iter().cloned())?;
        let mismatch = self.read_state(|s| replayed.is_equivalent_to(s).err());
        if let Some(mismatch) = &mismatch {
            error!(%mismatch, "Replayed state differs from the live state");
        }
        Ok(AuditReport {
            event_count: log.len(),
            mismatch,
        })
    }

    pub fn set_admin(&self, caller: Principal, admin: Principal) -> Result<(), UserError> {
        if !self.read_state(|s| s.is_admin(&caller)) {
            return Err(UserError::NotAdmin);
        }
        if admin == Principal::anonymous() {
            return Err(UserError::AnonymousPrincipal);
        }
        if self.read_state(|s| s.users.get_by_principal(&admin).is_some()) {
            return Err(UserError::UserAlreadyExists);
        }
        self.process_event(EventType::AdminChanged { admin })
            .map_err(|e| UserError::TemporarilyUnavailable(e.to_string()))?;
        info!(previous = %caller, %admin, "Admin changed");
        Ok(())
    }

    pub fn erc20_my_balance(&self, caller: Principal) -> Result<Erc20Value, CallError> {
        if caller == Principal::anonymous() {
            return Err(CallError::AnonymousCaller);
        }
        self.read_state(|s| {
            if !s.is_authorized(&caller) {
                return Err(CallError::CallerNotFound(caller));
            }
            Ok(s.balance_of(&caller))
        })
    }

    pub fn erc20_balance_of(&self, principal: &Principal) -> Erc20Value {
        self.read_state(|s| s.balance_of(principal))
    }

    pub fn get_user_erc20_stats(&self, principal: &Principal) -> UserStats {
        let log = self.inner.log.lock();
        let balance = self.erc20_balance_of(principal);
        compute_user_stats(principal, log.iter().map(|event| &event.payload), balance)
    }

    /// Total amount of tokens held by the minter on-chain.
    pub fn erc20_balance(&self) -> Erc20Value {
        self.read_state(|s| s.erc20_balances.total())
    }

    pub fn erc20_transfer(
        &self,
        caller: Principal,
        TransferErc20Arg { receiver, amount }: TransferErc20Arg,
    ) -> Result<(), TransferErc20Error> {
        self.read_state(|s| {
            if !s.is_authorized(&caller) {
                return Err(TransferErc20Error::CallerNotFound(caller));
            }
            if !s.is_authorized(&receiver) {
                return Err(TransferErc20Error::RecipientNotFound(receiver.to_text()));
            }
            let available = s.balance_of(&caller);
            if available < amount {
                return Err(TransferErc20Error::InsufficientFunds {
                    available,
                    required: amount,
                });
            }
            Ok(())
        })?;
        self.process_event(EventType::Erc20TransferCompleted {
            from: caller,
            to: receiver,
            amount,
        })
        .map_err(|e| match e {
            MinterError::Rejected(StateError::InsufficientBalance {
                available,
                required,
                ..
            }) => TransferErc20Error::InsufficientFunds {
                available,
                required,
            },
            other => TransferErc20Error::TemporarilyUnavailable(other.to_string()),
        })
    }

    /// Address of the deposit helper contract, or `N/A`.
    pub fn smart_contract_address(&self) -> String {
        self.read_state(|s| s.erc20_helper_contract_address)
            .map(|address| address.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }

    pub fn create_new_user(
        &self,
        caller: Principal,
        CreateNewUserArg { principal, user_id }: CreateNewUserArg,
    ) -> Result<(), UserError> {
        self.read_state(|s| {
            if !s.is_admin(&caller) {
                return Err(UserError::NotAdmin);
            }
            if s.is_admin(&principal) {
                return Err(UserError::UserIsAdmin);
            }
            if principal == Principal::anonymous() {
                return Err(UserError::AnonymousPrincipal);
            }
            if s.users.get_by_principal(&principal).is_some() || s.users.get_by_id(&user_id).is_some()
            {
                return Err(UserError::UserAlreadyExists);
            }
            Ok(())
        })?;
        self.process_event(EventType::UserCreated { principal, user_id })
            .map_err(|e| match e {
                MinterError::Rejected(StateError::DuplicateUser) => UserError::UserAlreadyExists,
                other => UserError::TemporarilyUnavailable(other.to_string()),
            })?;
        info!(%principal, %user_id, "Created user");
        Ok(())
    }

    pub fn last_scraped_block_number(&self) -> BlockNumber {
        self.read_state(|s| s.last_erc20_scraped_block_number)
    }
}
