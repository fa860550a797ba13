//! Deposit events emitted by the helper contract.

use crate::numeric::{BlockNumber, Erc20Value};
use alloy::{
    primitives::{Address, B256, b256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use candid::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;

sol! {
    /// Emitted by the helper contract for every ERC20 deposit.
    #[derive(Debug)]
    event ReceivedErc20(
        address indexed erc20ContractAddress,
        address indexed owner,
        uint256 amount,
        bytes32 indexed principal
    );

    /// Deposit helper contract.
    interface IErc20DepositHelper {
        function deposit(address erc20Address, uint256 amount, bytes32 principal) external;
    }

    /// Subset of the ERC20 interface used by the minter and its tests.
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// `keccak256("ReceivedErc20(address,address,uint256,bytes32)")`
pub const RECEIVED_ERC20_EVENT_TOPIC: B256 =
    b256!("4d69d0bd4287b7f66c548f90154dc81bc98f65a1b362775df5ae171a2ccd262b");

/// Position of a log on chain. Uniquely identifies a deposit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventSource {
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.log_index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedErc20Event {
    pub transaction_hash: B256,
    pub block_number: BlockNumber,
    pub log_index: u64,
    pub from_address: Address,
    pub value: Erc20Value,
    pub principal: Principal,
    pub erc20_contract_address: Address,
}

impl ReceivedErc20Event {
    pub fn source(&self) -> EventSource {
        EventSource {
            transaction_hash: self.transaction_hash,
            log_index: self.log_index,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EventSourceError {
    #[error("failed to decode principal from bytes {invalid_principal}")]
    InvalidPrincipal { invalid_principal: B256 },
    #[error("invalid ReceivedErc20 event: {0}")]
    InvalidEvent(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReceivedEventError {
    /// The log is not yet part of a block and carries no position.
    #[error("{0} is missing, the log entry is still pending")]
    PendingLogEntry(&'static str),
    #[error("invalid deposit {event_source}: {error}")]
    InvalidEventSource {
        event_source: EventSource,
        #[source]
        error: EventSourceError,
    },
}

/// Decodes a `ReceivedErc20` log returned by `eth_getLogs`.
pub fn parse_received_erc20_log(log: &Log) -> Result<ReceivedErc20Event, ReceivedEventError> {
    let block_number = log
        .block_number
        .ok_or(ReceivedEventError::PendingLogEntry("block number"))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(ReceivedEventError::PendingLogEntry("transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or(ReceivedEventError::PendingLogEntry("log index"))?;
    let event_source = EventSource {
        transaction_hash,
        log_index,
    };
    let invalid = |error| ReceivedEventError::InvalidEventSource {
        event_source,
        error,
    };

    if log.removed {
        return Err(invalid(EventSourceError::InvalidEvent(
            "the log has been removed from the chain".to_string(),
        )));
    }

    let event = ReceivedErc20::decode_log_data(&log.inner.data)
        .map_err(|e| invalid(EventSourceError::InvalidEvent(e.to_string())))?;
    let principal = principal_from_bytes32(&event.principal).map_err(|_| {
        invalid(EventSourceError::InvalidPrincipal {
            invalid_principal: event.principal,
        })
    })?;
    let value = Erc20Value::from_u256(event.amount);
    if value.is_zero() {
        return Err(invalid(EventSourceError::InvalidEvent(
            "deposit of zero tokens".to_string(),
        )));
    }

    Ok(ReceivedErc20Event {
        transaction_hash,
        block_number: BlockNumber::from(block_number),
        log_index,
        from_address: event.owner,
        value,
        principal,
        erc20_contract_address: event.erc20ContractAddress,
    })
}

/// Packs a principal into the `bytes32` argument of the helper's `deposit`.
///
/// Byte 0 holds the principal's length, followed by its bytes, zero padded.
pub fn principal_to_bytes32(principal: &Principal) -> B256 {
    let bytes = principal.as_slice();
    let mut packed = [0u8; 32];
    packed[0] = bytes.len() as u8;
    packed[1..1 + bytes.len()].copy_from_slice(bytes);
    B256::from(packed)
}

pub fn principal_from_bytes32(packed: &B256) -> Result<Principal, String> {
    const MAX_PRINCIPAL_LENGTH: usize = 29;

    let len = packed[0] as usize;
    if len == 0 || len > MAX_PRINCIPAL_LENGTH {
        return Err(format!("invalid principal length {len}"));
    }
    if packed[1 + len..].iter().any(|byte| *byte != 0) {
        return Err("non-zero bytes after the principal".to_string());
    }
    Principal::try_from_slice(&packed[1..1 + len]).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use alloy::primitives::{Bytes, LogData, U256, keccak256};

    fn received_erc20_log(principal: B256, amount: U256) -> Log {
        let token = Address::repeat_byte(0x11);
        let owner = Address::repeat_byte(0x22);
        let data = LogData::new_unchecked(
            vec![
                RECEIVED_ERC20_EVENT_TOPIC,
                token.into_word(),
                owner.into_word(),
                principal,
            ],
            Bytes::from(amount.to_be_bytes::<32>().to_vec()),
        );
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xDE),
                data,
            },
            block_hash: Some(B256::repeat_byte(0x01)),
            block_number: Some(42),
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0x02)),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn test_topic_matches_event_signature() {
        assert_eq!(
            keccak256("ReceivedErc20(address,address,uint256,bytes32)"),
            RECEIVED_ERC20_EVENT_TOPIC
        );
        assert_eq!(ReceivedErc20::SIGNATURE_HASH, RECEIVED_ERC20_EVENT_TOPIC);
    }

    #[test]
    fn test_parse_deposit_log() {
        let alice = Identity::from_name("alice").principal();
        let log = received_erc20_log(principal_to_bytes32(&alice), U256::from(1_000u64));

        let event = parse_received_erc20_log(&log).unwrap();
        assert_eq!(event.principal, alice);
        assert_eq!(event.value, Erc20Value::new(1_000));
        assert_eq!(event.erc20_contract_address, Address::repeat_byte(0x11));
        assert_eq!(event.from_address, Address::repeat_byte(0x22));
        assert_eq!(event.block_number, BlockNumber::new(42));
        assert_eq!(
            event.source(),
            EventSource {
                transaction_hash: B256::repeat_byte(0x02),
                log_index: 3
            }
        );
    }

    #[test]
    fn test_pending_log_is_not_an_invalid_deposit() {
        let alice = Identity::from_name("alice").principal();
        let mut log = received_erc20_log(principal_to_bytes32(&alice), U256::from(1u64));
        log.block_number = None;
        assert_eq!(
            parse_received_erc20_log(&log),
            Err(ReceivedEventError::PendingLogEntry("block number"))
        );
    }

    #[test]
    fn test_invalid_principal_and_zero_amount() {
        let garbage = B256::repeat_byte(0xFF);
        let log = received_erc20_log(garbage, U256::from(1u64));
        let err = parse_received_erc20_log(&log).unwrap_err();
        assert!(matches!(
            err,
            ReceivedEventError::InvalidEventSource {
                error: EventSourceError::InvalidPrincipal { .. },
                ..
            }
        ));
        let cause = std::error::Error::source(&err).expect("the decoding error is the cause");
        assert!(cause.to_string().starts_with("failed to decode principal"), "{cause}");

        let alice = Identity::from_name("alice").principal();
        let log = received_erc20_log(principal_to_bytes32(&alice), U256::ZERO);
        assert!(matches!(
            parse_received_erc20_log(&log),
            Err(ReceivedEventError::InvalidEventSource {
                error: EventSourceError::InvalidEvent(_),
                ..
            })
        ));
    }

    #[test]
    fn test_principal_packing() {
        let alice = Identity::from_name("alice").principal();
        let packed = principal_to_bytes32(&alice);
        assert_eq!(packed[0], 29);
        assert_eq!(principal_from_bytes32(&packed), Ok(alice));

        let mut trailing = packed;
        trailing[31] = 1;
        assert!(principal_from_bytes32(&trailing).is_err());

        let anonymous = Principal::anonymous();
        assert_eq!(
            principal_from_bytes32(&principal_to_bytes32(&anonymous)),
            Ok(anonymous)
        );
    }
}
