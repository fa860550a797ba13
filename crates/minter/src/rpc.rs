//! JSON-RPC access to the EVM chain.

use crate::{
    network::BlockTag,
    numeric::{BlockNumber, GasAmount, TransactionCount, WeiPerGas},
    retry::{RetryPolicy, Transient, is_transient_message, with_retry_policy},
    tx::{TransactionReceipt, TransactionStatus},
};
use alloy::{
    eips::BlockId,
    network::ReceiptResponse,
    primitives::{Address, B256, Bytes},
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError as TransportRpcError, TransportResult},
};
use async_trait::async_trait;
use tracing::{debug, warn};

/// `eth_getLogs` query for one contract and event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    pub address: Address,
    pub event_signature: B256,
    /// Accepted values of the first indexed topic. Empty matches any value.
    pub topic1: Vec<B256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeeHistory {
    pub oldest_block: BlockNumber,
    /// Base fee of each block in the range plus the one following it.
    pub base_fee_per_gas: Vec<WeiPerGas>,
    /// Requested reward percentiles of each block.
    pub reward: Vec<Vec<WeiPerGas>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SendRawTransactionResult {
    Ok,
    InsufficientFunds,
    NonceTooLow,
    NonceTooHigh,
}

impl SendRawTransactionResult {
    /// Maps a node's rejection message to a known outcome.
    fn from_error_message(message: &str) -> Option<Self> {
        let message = message.to_lowercase();
        if message.contains("already known") {
            Some(Self::Ok)
        } else if message.contains("nonce too low") {
            Some(Self::NonceTooLow)
        } else if message.contains("nonce too high") {
            Some(Self::NonceTooHigh)
        } else if message.contains("insufficient funds") {
            Some(Self::InsufficientFunds)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("no RPC provider configured")]
    NoProvider,
    #[error("invalid RPC url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport error from {provider}: {message}")]
    Transport { provider: String, message: String },
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i64, message: String },
    #[error("response too large: {0}")]
    ResponseTooLarge(String),
    #[error("block `{0}` not found")]
    BlockNotFound(BlockTag),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn is_response_too_large(&self) -> bool {
        matches!(self, Self::ResponseTooLarge(_))
    }

    fn from_transport(provider: &str, error: alloy::transports::TransportError) -> Self {
        match error {
            TransportRpcError::ErrorResp(payload) => {
                let message = payload.message.to_string();
                if is_too_large_message(&message) {
                    Self::ResponseTooLarge(message)
                } else {
                    Self::JsonRpc {
                        code: payload.code,
                        message,
                    }
                }
            }
            other => {
                let message = other.to_string();
                if is_too_large_message(&message) {
                    Self::ResponseTooLarge(message)
                } else {
                    Self::Transport {
                        provider: provider.to_string(),
                        message,
                    }
                }
            }
        }
    }
}

impl Transient for RpcError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::JsonRpc { message, .. } => is_transient_message(message),
            _ => false,
        }
    }
}

fn is_too_large_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("query returned more than")
        || message.contains("response size")
        || message.contains("too large")
        || message.contains("limit exceeded")
}

/// The chain queries the minter depends on.
#[async_trait]
pub trait EthRpc: Send + Sync {
    async fn block_number(&self, tag: BlockTag) -> Result<BlockNumber, RpcError>;

    async fn logs(&self, filter: LogFilter) -> Result<Vec<Log>, RpcError>;

    async fn fee_history(
        &self,
        block_count: u64,
        newest_block: BlockTag,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, RpcError>;

    async fn transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<TransactionCount, RpcError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<SendRawTransactionResult, RpcError>;

    async fn transaction_receipt(&self, hash: B256)
    -> Result<Option<TransactionReceipt>, RpcError>;
}

/// [`EthRpc`] over HTTP providers, tried in order.
#[derive(Clone, Debug)]
pub struct AlloyRpcClient {
    providers: Vec<(String, RootProvider)>,
    retry_policy: RetryPolicy,
}

impl AlloyRpcClient {
    pub fn new(urls: &[String]) -> Result<Self, RpcError> {
        if urls.is_empty() {
            return Err(RpcError::NoProvider);
        }
        let providers = urls
            .iter()
            .map(|url| {
                let parsed = reqwest::Url::parse(url).map_err(|e| RpcError::InvalidUrl {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
                Ok((url.clone(), RootProvider::new_http(parsed)))
            })
            .collect::<Result<Vec<_>, RpcError>>()?;
        Ok(Self {
            providers,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Runs `call` against each provider until one answers.
    ///
    /// Transient failures are retried against the same provider first. Errors returned
    /// by the node itself are not worth asking another provider about.
    async fn call<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, RpcError>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_error = RpcError::NoProvider;
        for (url, provider) in &self.providers {
            let result = with_retry_policy(operation, self.retry_policy, || {
                let request = call(provider.clone());
                async move {
                    request
                        .await
                        .map_err(|e| RpcError::from_transport(url, e))
                }
            })
            .await;
            match result {
                Ok(value) => return Ok(value),
                Err(error @ RpcError::Transport { .. }) => {
                    warn!(operation, provider = %url, error = %error, "Provider failed, trying next");
                    last_error = error;
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl EthRpc for AlloyRpcClient {
    async fn block_number(&self, tag: BlockTag) -> Result<BlockNumber, RpcError> {
        let number = self
            .call("eth_getBlockByNumber", |provider| async move {
                provider
                    .get_block_by_number(tag.into())
                    .await
                    .map(|block| block.map(|block| block.header.number))
            })
            .await?
            .ok_or(RpcError::BlockNotFound(tag))?;
        Ok(BlockNumber::from(number))
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<Log>, RpcError> {
        let mut query = Filter::new()
            .address(filter.address)
            .from_block(filter.from_block.to_u64().unwrap_or(u64::MAX))
            .to_block(filter.to_block.to_u64().unwrap_or(u64::MAX))
            .event_signature(filter.event_signature);
        if !filter.topic1.is_empty() {
            query = query.topic1(filter.topic1.clone());
        }
        debug!(from = %filter.from_block, to = %filter.to_block, "eth_getLogs");
        self.call("eth_getLogs", |provider| {
            let query = query.clone();
            async move { provider.get_logs(&query).await }
        })
        .await
    }

    async fn fee_history(
        &self,
        block_count: u64,
        newest_block: BlockTag,
        reward_percentiles: &[f64],
    ) -> Result<FeeHistory, RpcError> {
        let history = self
            .call("eth_feeHistory", |provider| {
                let percentiles = reward_percentiles.to_vec();
                async move {
                    provider
                        .get_fee_history(block_count, newest_block.into(), &percentiles)
                        .await
                }
            })
            .await?;
        Ok(FeeHistory {
            oldest_block: BlockNumber::from(history.oldest_block),
            base_fee_per_gas: history
                .base_fee_per_gas
                .into_iter()
                .map(WeiPerGas::from)
                .collect(),
            reward: history
                .reward
                .unwrap_or_default()
                .into_iter()
                .map(|rewards| rewards.into_iter().map(WeiPerGas::from).collect())
                .collect(),
        })
    }

    async fn transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<TransactionCount, RpcError> {
        let count = self
            .call("eth_getTransactionCount", |provider| async move {
                provider
                    .get_transaction_count(address)
                    .block_id(BlockId::Number(tag.into()))
                    .await
            })
            .await?;
        Ok(TransactionCount::from(count))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<SendRawTransactionResult, RpcError> {
        let result = self
            .call("eth_sendRawTransaction", |provider| {
                let raw = raw.clone();
                async move { provider.send_raw_transaction(&raw).await.map(|_| ()) }
            })
            .await;
        match result {
            Ok(()) => Ok(SendRawTransactionResult::Ok),
            Err(RpcError::JsonRpc { code, message }) => {
                SendRawTransactionResult::from_error_message(&message)
                    .ok_or(RpcError::JsonRpc { code, message })
            }
            Err(error) => Err(error),
        }
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let receipt = self
            .call("eth_getTransactionReceipt", |provider| async move {
                provider.get_transaction_receipt(hash).await
            })
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let block_hash = receipt
            .block_hash
            .ok_or_else(|| RpcError::InvalidResponse(format!("receipt {hash} has no block hash")))?;
        let block_number = receipt.block_number.ok_or_else(|| {
            RpcError::InvalidResponse(format!("receipt {hash} has no block number"))
        })?;
        Ok(Some(TransactionReceipt {
            block_hash,
            block_number: BlockNumber::from(block_number),
            effective_gas_price: WeiPerGas::from(receipt.effective_gas_price),
            gas_used: GasAmount::from(receipt.gas_used),
            status: if receipt.status() {
                TransactionStatus::Success
            } else {
                TransactionStatus::Failure
            },
            transaction_hash: receipt.transaction_hash,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_errors_are_classified() {
        assert_eq!(
            SendRawTransactionResult::from_error_message("nonce too low: next nonce 5, tx nonce 4"),
            Some(SendRawTransactionResult::NonceTooLow)
        );
        assert_eq!(
            SendRawTransactionResult::from_error_message("already known"),
            Some(SendRawTransactionResult::Ok)
        );
        assert_eq!(
            SendRawTransactionResult::from_error_message(
                "insufficient funds for gas * price + value"
            ),
            Some(SendRawTransactionResult::InsufficientFunds)
        );
        assert_eq!(
            SendRawTransactionResult::from_error_message("execution reverted"),
            None
        );
    }

    #[test]
    fn test_too_large_responses() {
        assert!(is_too_large_message("query returned more than 10000 results"));
        assert!(is_too_large_message("Log response size exceeded"));
        assert!(!is_too_large_message("header not found"));
    }

    #[test]
    fn test_only_transport_errors_are_transient() {
        let transport = RpcError::Transport {
            provider: "http://127.0.0.1:8545".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(transport.is_transient());
        assert!(!RpcError::ResponseTooLarge("too large".to_string()).is_transient());
        assert!(
            !RpcError::JsonRpc {
                code: -32000,
                message: "nonce too low".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_client_needs_a_valid_url() {
        assert_eq!(AlloyRpcClient::new(&[]).unwrap_err(), RpcError::NoProvider);
        assert!(matches!(
            AlloyRpcClient::new(&["not a url".to_string()]),
            Err(RpcError::InvalidUrl { .. })
        ));
        assert!(AlloyRpcClient::new(&["http://127.0.0.1:8545".to_string()]).is_ok());
    }
}
