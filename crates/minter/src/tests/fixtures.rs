//! Test fixtures for minter tests.
//!
//! Provides a scriptable chain mock, anvil accounts and helpers building
//! deposits, withdrawal requests and receipts.

use crate::{
    config::MinterConfig,
    endpoints::CreateNewUserArg,
    eth_logs::{RECEIVED_ERC20_EVENT_TOPIC, ReceivedErc20Event, principal_to_bytes32},
    lifecycle::InitArg,
    minter::Minter,
    network::{BlockTag, EthereumNetwork},
    numeric::{BlockNumber, Erc20Value, GasAmount, TransactionCount, TransactionNonce, WeiPerGas},
    rpc::{EthRpc, FeeHistory, LogFilter, RpcError, SendRawTransactionResult},
    state::{event::EventType, transactions::Erc20WithdrawalRequest},
    storage::EventLog,
    tx::{GasFeeEstimate, SignedEip1559TransactionRequest, TransactionReceipt, TransactionStatus},
    users::UserId,
};
use alloy::{
    primitives::{Address, B256, Bytes, LogData, U256, address},
    rpc::types::Log,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use candid::Principal;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

pub(crate) const TOKEN_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

pub(crate) const HELPER_ADDRESS: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");

pub(crate) const DEPOSITOR: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

pub(crate) const GAS_LIMIT: GasAmount = GasAmount::new(65_000);

pub(crate) const ANVIL_KEYS: [&str; 2] = [
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
    "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
];

pub(crate) fn principal(byte: u8) -> Principal {
    Principal::from_slice(&[byte; 29])
}

pub(crate) fn admin() -> Principal {
    crate::identity::Identity::from_name("alice").principal()
}

pub(crate) fn init_arg() -> InitArg {
    InitArg {
        ethereum_network: EthereumNetwork::Local,
        ethereum_contract_address: Some(HELPER_ADDRESS.to_string()),
        ethereum_block_height: BlockTag::Latest,
        minimum_withdrawal_amount: Erc20Value::new(10),
        next_transaction_nonce: TransactionNonce::ZERO,
        last_scraped_block_number: BlockNumber::new(100),
        admin: admin(),
        ckerc20_token_address: TOKEN_ADDRESS.to_string(),
        ckerc20_token_symbol: "ckEDEN".to_string(),
        withdraw_fee_value: Some(Erc20Value::ONE),
    }
}

/// Config whose [`MinterConfig::init_arg`] is [`init_arg`].
pub(crate) fn test_config() -> MinterConfig {
    MinterConfig {
        helper_contract_address: Some(HELPER_ADDRESS),
        token_address: TOKEN_ADDRESS,
        withdraw_fee_value: Erc20Value::ONE,
        last_scraped_block_number: BlockNumber::new(100),
        admin: admin(),
        ..MinterConfig::default_test_config()
    }
}

pub(crate) fn minter_signer() -> PrivateKeySigner {
    ANVIL_KEYS[0].parse().unwrap()
}

pub(crate) fn deposit_event(log_index: u64, principal: Principal, value: u64) -> ReceivedErc20Event {
    ReceivedErc20Event {
        transaction_hash: B256::repeat_byte(0xAB),
        block_number: BlockNumber::new(101),
        log_index,
        from_address: DEPOSITOR,
        value: Erc20Value::from(value),
        principal,
        erc20_contract_address: TOKEN_ADDRESS,
    }
}

pub(crate) fn deposit_log(block: u64, log_index: u64, principal: Principal, value: u64) -> Log {
    deposit_log_from(DEPOSITOR, block, log_index, principal, value)
}

/// A `ReceivedErc20` log of the helper contract. Every block holds a single
/// deposit transaction.
pub(crate) fn deposit_log_from(
    sender: Address,
    block: u64,
    log_index: u64,
    principal: Principal,
    value: u64,
) -> Log {
    let data = LogData::new_unchecked(
        vec![
            RECEIVED_ERC20_EVENT_TOPIC,
            TOKEN_ADDRESS.into_word(),
            sender.into_word(),
            principal_to_bytes32(&principal),
        ],
        Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
    );
    Log {
        inner: alloy::primitives::Log {
            address: HELPER_ADDRESS,
            data,
        },
        block_hash: Some(B256::repeat_byte(0x01)),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(B256::left_padding_from(&block.to_be_bytes())),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

pub(crate) fn withdrawal_request(id: u64, from: Principal, amount: u64) -> Erc20WithdrawalRequest {
    Erc20WithdrawalRequest {
        max_transaction_fee: gas_fee_estimate().to_price(GAS_LIMIT).max_transaction_fee(),
        withdrawal_amount: Erc20Value::from(amount),
        withdrawal_fee: Erc20Value::ZERO,
        destination: address!("4242424242424242424242424242424242424242"),
        from,
        created_at: id * 1_000_000_000,
        id,
    }
}

/// 10 gwei base fee and the minimum priority fee.
pub(crate) fn gas_fee_estimate() -> GasFeeEstimate {
    GasFeeEstimate {
        base_fee_per_gas: WeiPerGas::new(10_000_000_000),
        max_priority_fee_per_gas: WeiPerGas::new(1_500_000_000),
    }
}

/// Fee history from which [`gas_fee_estimate`] is derived.
pub(crate) fn fee_history() -> FeeHistory {
    FeeHistory {
        oldest_block: BlockNumber::new(96),
        base_fee_per_gas: vec![WeiPerGas::new(10_000_000_000); 6],
        reward: vec![vec![WeiPerGas::new(1_000_000_000)]; 5],
    }
}

pub(crate) fn receipt(
    signed: &SignedEip1559TransactionRequest,
    status: TransactionStatus,
) -> TransactionReceipt {
    TransactionReceipt {
        block_hash: B256::repeat_byte(0xBB),
        block_number: BlockNumber::new(120),
        effective_gas_price: signed.transaction.max_priority_fee_per_gas,
        gas_used: GasAmount::new(50_000),
        status,
        transaction_hash: signed.hash,
    }
}

/// Registers `user` if needed and mints `amount` to it through a deposit.
pub(crate) fn fund_user(minter: &Minter, user: Principal, amount: u64) {
    if minter.read_state(|s| s.users.get_by_principal(&user).is_none()) {
        let mut user_id = [0u8; 12];
        for (dst, src) in user_id.iter_mut().zip(user.as_slice()) {
            *dst = *src;
        }
        minter
            .create_new_user(
                admin(),
                CreateNewUserArg {
                    principal: user,
                    user_id: UserId(user_id),
                },
            )
            .unwrap();
    }
    let log_index = minter.read_state(|s| s.minted_events.len() + s.events_to_mint.len()) as u64;
    let deposit = deposit_event(log_index, user, amount);
    let event_source = deposit.source();
    minter
        .process_event(EventType::AcceptedErc20Deposit(deposit))
        .unwrap();
    minter
        .process_event(EventType::MintedCkErc20 {
            event_source,
            principal: user,
            amount: Erc20Value::from(amount),
        })
        .unwrap();
}

/// Scriptable [`EthRpc`].
///
/// Logs are filtered by block range only. Queries matching more than
/// `max_logs_per_response` logs fail as too large.
#[derive(Debug)]
pub(crate) struct MockEthRpc {
    block_number: Mutex<Option<BlockNumber>>,
    logs: Mutex<Vec<Log>>,
    max_logs_per_response: Mutex<Option<usize>>,
    log_queries: Mutex<Vec<LogFilter>>,
    fee_history: Mutex<Option<FeeHistory>>,
    transaction_count: Mutex<TransactionCount>,
    send_result: Mutex<SendRawTransactionResult>,
    sent: Mutex<Vec<Bytes>>,
    receipts: Mutex<HashMap<B256, TransactionReceipt>>,
}

impl Default for MockEthRpc {
    fn default() -> Self {
        Self {
            block_number: Mutex::new(Some(BlockNumber::new(100))),
            logs: Mutex::default(),
            max_logs_per_response: Mutex::default(),
            log_queries: Mutex::default(),
            fee_history: Mutex::new(Some(fee_history())),
            transaction_count: Mutex::new(TransactionCount::ZERO),
            send_result: Mutex::new(SendRawTransactionResult::Ok),
            sent: Mutex::default(),
            receipts: Mutex::default(),
        }
    }
}

impl MockEthRpc {
    pub(crate) fn set_block_number(&self, block_number: Option<BlockNumber>) {
        *self.block_number.lock() = block_number;
    }

    pub(crate) fn push_log(&self, log: Log) {
        self.logs.lock().push(log);
    }

    pub(crate) fn set_max_logs_per_response(&self, max: Option<usize>) {
        *self.max_logs_per_response.lock() = max;
    }

    pub(crate) fn log_queries(&self) -> Vec<LogFilter> {
        self.log_queries.lock().clone()
    }

    pub(crate) fn set_fee_history(&self, fee_history: Option<FeeHistory>) {
        *self.fee_history.lock() = fee_history;
    }

    pub(crate) fn set_transaction_count(&self, count: TransactionCount) {
        *self.transaction_count.lock() = count;
    }

    pub(crate) fn set_send_result(&self, result: SendRawTransactionResult) {
        *self.send_result.lock() = result;
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn add_receipt(&self, receipt: TransactionReceipt) {
        self.receipts.lock().insert(receipt.transaction_hash, receipt);
    }

    fn unavailable() -> RpcError {
        RpcError::Transport {
            provider: "mock".to_string(),
            message: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl EthRpc for MockEthRpc {
    async fn block_number(&self, tag: BlockTag) -> Result<BlockNumber, RpcError> {
        (*self.block_number.lock()).ok_or(RpcError::BlockNotFound(tag))
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<Log>, RpcError> {
        self.log_queries.lock().push(filter.clone());
        let logs: Vec<Log> = self
            .logs
            .lock()
            .iter()
            .filter(|log| {
                log.block_number.is_some_and(|block| {
                    let block = BlockNumber::from(block);
                    filter.from_block <= block && block <= filter.to_block
                })
            })
            .cloned()
            .collect();
        match *self.max_logs_per_response.lock() {
            Some(max) if logs.len() > max => Err(RpcError::ResponseTooLarge(format!(
                "query returned more than {max} results"
            ))),
            _ => Ok(logs),
        }
    }

    async fn fee_history(
        &self,
        _block_count: u64,
        _newest_block: BlockTag,
        _reward_percentiles: &[f64],
    ) -> Result<FeeHistory, RpcError> {
        self.fee_history.lock().clone().ok_or_else(Self::unavailable)
    }

    async fn transaction_count(
        &self,
        _address: Address,
        _tag: BlockTag,
    ) -> Result<TransactionCount, RpcError> {
        Ok(*self.transaction_count.lock())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<SendRawTransactionResult, RpcError> {
        self.sent.lock().push(raw);
        Ok(*self.send_result.lock())
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        Ok(self.receipts.lock().get(&hash).cloned())
    }
}

/// Builder for a [`Minter`] on an in-memory log and a [`MockEthRpc`].
pub(crate) struct TestMinter {
    pub(crate) config: MinterConfig,
    pub(crate) log: EventLog,
    pub(crate) rpc: Arc<MockEthRpc>,
}

impl TestMinter {
    pub(crate) fn new() -> Self {
        Self {
            config: test_config(),
            log: EventLog::in_memory(),
            rpc: Arc::new(MockEthRpc::default()),
        }
    }

    pub(crate) fn with_config(mut self, config: MinterConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    pub(crate) fn with_rpc(mut self, rpc: Arc<MockEthRpc>) -> Self {
        self.rpc = rpc;
        self
    }

    pub(crate) fn build(self) -> Minter {
        Minter::initialize(&self.config, self.log, self.rpc).unwrap()
    }
}
