use super::{
    State, StateError,
    event::{Event, EventType},
};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("the event log is empty")]
    EmptyLog,
    #[error("the first event must be Init, got {0:?}")]
    MissingInit(Box<EventType>),
    #[error("invalid init arguments: {0}")]
    InvalidInit(#[from] super::InvalidStateError),
    #[error("event #{index} cannot be applied: {source}")]
    InvalidEvent {
        index: u64,
        #[source]
        source: StateError,
    },
}

/// Updates the state to reflect the given state transition.
pub fn apply_state_transition(state: &mut State, payload: &EventType) -> Result<(), StateError> {
    match payload {
        EventType::Init(_) => Err(StateError::AlreadyInitialized),
        EventType::Upgrade(upgrade_arg) => Ok(state.upgrade(upgrade_arg.clone())?),
        EventType::AcceptedErc20Deposit(event) => state.record_event_to_mint(event),
        EventType::InvalidDeposit {
            event_source,
            reason,
        } => state
            .record_invalid_deposit(*event_source, reason.clone())
            .map(|_| ()),
        EventType::MintedCkErc20 {
            event_source,
            principal,
            amount,
        } => state.record_successful_mint(*event_source, *principal, *amount),
        EventType::QuarantinedDeposit { event_source } => {
            state.record_quarantined_deposit(*event_source)
        }
        EventType::SyncedErc20ToBlock { block_number } => {
            state.last_erc20_scraped_block_number = *block_number;
            Ok(())
        }
        EventType::SkippedBlockForContract {
            contract_address,
            block_number,
        } => state.record_skipped_block_for_contract(*contract_address, *block_number),
        EventType::AcceptedErc20WithdrawalRequest(request) => {
            state.record_erc20_withdrawal_request(request.clone())
        }
        EventType::CreatedTransaction {
            withdrawal_id,
            transaction,
        } => state
            .eth_transactions
            .record_created_transaction(*withdrawal_id, transaction.clone()),
        EventType::SignedTransaction { transaction, .. } => state
            .eth_transactions
            .record_signed_transaction(transaction.clone()),
        EventType::ReplacedTransaction { transaction, .. } => state
            .eth_transactions
            .record_resubmit_transaction(transaction.clone()),
        EventType::FinalizedTransaction {
            withdrawal_id,
            transaction_receipt,
        } => state.record_finalized_transaction(*withdrawal_id, transaction_receipt),
        EventType::ReimbursedErc20Withdrawal {
            withdrawal_id,
            reimbursed_amount,
            transaction_hash,
        } => state.record_reimbursement(*withdrawal_id, *reimbursed_amount, *transaction_hash),
        EventType::Erc20TransferCompleted { from, to, amount } => {
            debug!(%from, %to, %amount, "ERC20 transfer completed");
            state.record_transfer(*from, *to, *amount)
        }
        EventType::UserCreated { principal, user_id } => state.record_user(*principal, *user_id),
        EventType::AdminChanged { admin } => {
            state.admin = *admin;
            Ok(())
        }
    }
}

/// Recomputes the minter state from the event log.
pub fn replay_events<T: IntoIterator<Item = Event>>(events: T) -> Result<State, ReplayError> {
    let mut events = events.into_iter();
    let mut state = match events.next() {
        None => return Err(ReplayError::EmptyLog),
        Some(Event {
            payload: EventType::Init(init_arg),
            ..
        }) => State::try_from(init_arg)?,
        Some(other) => return Err(ReplayError::MissingInit(Box::new(other.payload))),
    };
    for (index, event) in (1u64..).zip(events) {
        apply_state_transition(&mut state, &event.payload)
            .map_err(|source| ReplayError::InvalidEvent { index, source })?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        numeric::Erc20Value,
        tests::fixtures::{deposit_event, init_arg, principal},
    };

    fn event(payload: EventType) -> Event {
        Event {
            timestamp: 0,
            payload,
        }
    }

    #[test]
    fn test_replay_requires_init_first() {
        assert!(matches!(replay_events(vec![]), Err(ReplayError::EmptyLog)));
        let events = vec![event(EventType::AdminChanged {
            admin: principal(1),
        })];
        assert!(matches!(
            replay_events(events),
            Err(ReplayError::MissingInit(_))
        ));
    }

    #[test]
    fn test_second_init_is_rejected() {
        let events = vec![
            event(EventType::Init(init_arg())),
            event(EventType::Init(init_arg())),
        ];
        assert!(matches!(
            replay_events(events),
            Err(ReplayError::InvalidEvent {
                index: 1,
                source: StateError::AlreadyInitialized
            })
        ));
    }

    #[test]
    fn test_replay_mints_accepted_deposit() {
        let deposit = deposit_event(1, principal(1), 1_000);
        let events = vec![
            event(EventType::Init(init_arg())),
            event(EventType::AcceptedErc20Deposit(deposit.clone())),
            event(EventType::MintedCkErc20 {
                event_source: deposit.source(),
                principal: deposit.principal,
                amount: deposit.value,
            }),
        ];
        let state = replay_events(events).unwrap();
        assert_eq!(state.balance_of(&principal(1)), Erc20Value::new(1_000));
        assert_eq!(state.erc20_balances.total(), Erc20Value::new(1_000));
        assert!(state.minted_events.contains_key(&deposit.source()));
        assert!(state.events_to_mint.is_empty());
    }

    #[test]
    fn test_duplicate_deposit_is_rejected() {
        let deposit = deposit_event(1, principal(1), 1_000);
        let events = vec![
            event(EventType::Init(init_arg())),
            event(EventType::AcceptedErc20Deposit(deposit.clone())),
            event(EventType::AcceptedErc20Deposit(deposit.clone())),
        ];
        assert!(matches!(
            replay_events(events),
            Err(ReplayError::InvalidEvent {
                index: 2,
                source: StateError::DuplicateEvent(_)
            })
        ));
    }

    #[test]
    fn test_transfer_beyond_balance_is_rejected() {
        let mut state = State::try_from(init_arg()).unwrap();
        let result = apply_state_transition(
            &mut state,
            &EventType::Erc20TransferCompleted {
                from: principal(1),
                to: principal(2),
                amount: Erc20Value::ONE,
            },
        );
        assert!(matches!(
            result,
            Err(StateError::InsufficientBalance { .. })
        ));
    }
}
