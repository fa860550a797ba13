//! EIP-1559 withdrawal transactions: pricing, resubmission and signing.

use crate::{
    numeric::{BlockNumber, GasAmount, TransactionNonce, Wei, WeiPerGas},
    rpc::FeeHistory,
};
use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEnvelope},
    eips::{eip2718::Encodable2718, eip2930::AccessList},
    primitives::{Address, B256, Bytes, TxKind},
    signers::{SignerSync, local::PrivateKeySigner},
};
use serde::{Deserialize, Serialize};

/// Floor of the priority fee suggested to block builders.
pub const MIN_MAX_PRIORITY_FEE_PER_GAS: WeiPerGas = WeiPerGas::new(1_500_000_000);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip1559TransactionRequest {
    pub chain_id: u64,
    pub nonce: TransactionNonce,
    pub max_priority_fee_per_gas: WeiPerGas,
    pub max_fee_per_gas: WeiPerGas,
    pub gas_limit: GasAmount,
    pub destination: Address,
    pub amount: Wei,
    pub data: Bytes,
    #[serde(default)]
    pub access_list: AccessList,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("{field} {value} does not fit in the transaction encoding")]
    Overflow { field: &'static str, value: String },
    #[error("failed to sign transaction: {0}")]
    Signing(String),
}

impl Eip1559TransactionRequest {
    pub fn transaction_price(&self) -> TransactionPrice {
        TransactionPrice {
            gas_limit: self.gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }

    fn to_consensus(&self) -> Result<TxEip1559, TransactionError> {
        fn overflow(field: &'static str, value: impl ToString) -> TransactionError {
            TransactionError::Overflow {
                field,
                value: value.to_string(),
            }
        }

        Ok(TxEip1559 {
            chain_id: self.chain_id,
            nonce: self.nonce.to_u64().ok_or_else(|| overflow("nonce", self.nonce))?,
            gas_limit: self
                .gas_limit
                .to_u64()
                .ok_or_else(|| overflow("gas limit", self.gas_limit))?,
            max_fee_per_gas: self
                .max_fee_per_gas
                .to_u128()
                .ok_or_else(|| overflow("max fee per gas", self.max_fee_per_gas))?,
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .to_u128()
                .ok_or_else(|| overflow("max priority fee per gas", self.max_priority_fee_per_gas))?,
            to: TxKind::Call(self.destination),
            value: self.amount.into_inner(),
            access_list: self.access_list.clone(),
            input: self.data.clone(),
        })
    }

    pub fn sign(
        self,
        signer: &PrivateKeySigner,
    ) -> Result<SignedEip1559TransactionRequest, TransactionError> {
        let tx = self.to_consensus()?;
        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| TransactionError::Signing(e.to_string()))?;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let raw = TxEnvelope::from(signed).encoded_2718();
        Ok(SignedEip1559TransactionRequest {
            transaction: self,
            hash,
            raw: raw.into(),
        })
    }

    /// Whether `other` is this transaction with possibly different fees or amount.
    pub fn equal_ignoring_fee_and_amount(&self, other: &Self) -> bool {
        let mut other = other.clone();
        other.max_fee_per_gas = self.max_fee_per_gas;
        other.max_priority_fee_per_gas = self.max_priority_fee_per_gas;
        other.amount = self.amount;
        self == &other
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEip1559TransactionRequest {
    pub transaction: Eip1559TransactionRequest,
    pub hash: B256,
    /// EIP-2718 encoding, ready for `eth_sendRawTransaction`.
    pub raw: Bytes,
}

impl SignedEip1559TransactionRequest {
    pub fn nonce(&self) -> TransactionNonce {
        self.transaction.nonce
    }

    pub fn raw_transaction_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    /// Pairs the transaction with its receipt after checking they match.
    pub fn try_finalize(
        self,
        receipt: TransactionReceipt,
    ) -> Result<FinalizedEip1559Transaction, String> {
        if self.hash != receipt.transaction_hash {
            return Err(format!(
                "receipt for {} does not match transaction {}",
                receipt.transaction_hash, self.hash
            ));
        }
        if receipt.effective_gas_price > self.transaction.max_fee_per_gas {
            return Err(format!(
                "effective gas price {} exceeds max fee per gas {}",
                receipt.effective_gas_price, self.transaction.max_fee_per_gas
            ));
        }
        if receipt.gas_used > self.transaction.gas_limit {
            return Err(format!(
                "gas used {} exceeds gas limit {}",
                receipt.gas_used, self.transaction.gas_limit
            ));
        }
        Ok(FinalizedEip1559Transaction {
            transaction: self.transaction,
            receipt,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Success,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub block_hash: B256,
    pub block_number: BlockNumber,
    pub effective_gas_price: WeiPerGas,
    pub gas_used: GasAmount,
    pub status: TransactionStatus,
    pub transaction_hash: B256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedEip1559Transaction {
    pub transaction: Eip1559TransactionRequest,
    pub receipt: TransactionReceipt,
}

impl FinalizedEip1559Transaction {
    pub fn transaction_hash(&self) -> B256 {
        self.receipt.transaction_hash
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.receipt.status
    }

    pub fn effective_transaction_fee(&self) -> Wei {
        self.receipt
            .effective_gas_price
            .transaction_cost(self.receipt.gas_used)
            .unwrap_or(Wei::MAX)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasFeeEstimate {
    pub base_fee_per_gas: WeiPerGas,
    pub max_priority_fee_per_gas: WeiPerGas,
}

impl GasFeeEstimate {
    /// Lowest max fee that stays valid if the base fee doubles.
    pub fn min_max_fee_per_gas(&self) -> WeiPerGas {
        self.base_fee_per_gas
            .checked_mul(2)
            .and_then(|fee| fee.checked_add(self.max_priority_fee_per_gas))
            .unwrap_or(WeiPerGas::MAX)
    }

    pub fn to_price(&self, gas_limit: GasAmount) -> TransactionPrice {
        TransactionPrice {
            gas_limit,
            max_fee_per_gas: self.min_max_fee_per_gas(),
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPrice {
    pub gas_limit: GasAmount,
    pub max_fee_per_gas: WeiPerGas,
    pub max_priority_fee_per_gas: WeiPerGas,
}

impl TransactionPrice {
    pub fn max_transaction_fee(&self) -> Wei {
        self.max_fee_per_gas
            .transaction_cost(self.gas_limit)
            .unwrap_or(Wei::MAX)
    }

    /// Price of a replacement transaction under `new_gas_fee`.
    ///
    /// Returns `self` when the current price still covers the estimate. Otherwise the
    /// priority fee is raised by at least 10%, which nodes require to replace a
    /// transaction with the same nonce.
    pub fn resubmit_transaction_price(self, new_gas_fee: GasFeeEstimate) -> Self {
        let plus_10_percent = |amount: WeiPerGas| {
            amount
                .checked_div_ceil(10)
                .and_then(|increase| amount.checked_add(increase))
                .unwrap_or(WeiPerGas::MAX)
        };

        if self.max_fee_per_gas >= new_gas_fee.min_max_fee_per_gas()
            && self.max_priority_fee_per_gas >= new_gas_fee.max_priority_fee_per_gas
        {
            return self;
        }

        let max_priority_fee_per_gas =
            plus_10_percent(self.max_priority_fee_per_gas).max(new_gas_fee.max_priority_fee_per_gas);
        let new_gas_fee = GasFeeEstimate {
            max_priority_fee_per_gas,
            ..new_gas_fee
        };
        let max_fee_per_gas = new_gas_fee.min_max_fee_per_gas().max(self.max_fee_per_gas);
        Self {
            gas_limit: self.gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResubmissionStrategy {
    /// The recipient receives the full amount. Fee increases are bounded by the
    /// fee estimated when the withdrawal was accepted.
    GuaranteeEthAmount { allowed_max_transaction_fee: Wei },
}

impl ResubmissionStrategy {
    pub fn allowed_max_transaction_fee(&self) -> Wei {
        match self {
            Self::GuaranteeEthAmount {
                allowed_max_transaction_fee,
            } => *allowed_max_transaction_fee,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResubmitTransactionError {
    #[error("max transaction fee {actual_max_transaction_fee} exceeds allowed {allowed_max_transaction_fee}")]
    InsufficientTransactionFee {
        allowed_max_transaction_fee: Wei,
        actual_max_transaction_fee: Wei,
    },
}

/// A created transaction waiting to be signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub transaction: Eip1559TransactionRequest,
    pub resubmission: ResubmissionStrategy,
}

/// A signed transaction that was (or is about to be) sent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransactionRequest {
    pub transaction: SignedEip1559TransactionRequest,
    pub resubmission: ResubmissionStrategy,
}

impl SignedTransactionRequest {
    /// Replacement for this transaction under `new_gas_fee`, if one is needed.
    pub fn resubmit(
        &self,
        new_gas_fee: GasFeeEstimate,
    ) -> Result<Option<Eip1559TransactionRequest>, ResubmitTransactionError> {
        let transaction = &self.transaction.transaction;
        let last_price = transaction.transaction_price();
        let new_price = last_price.clone().resubmit_transaction_price(new_gas_fee);
        if new_price == last_price {
            return Ok(None);
        }
        let allowed_max_transaction_fee = self.resubmission.allowed_max_transaction_fee();
        if new_price.max_transaction_fee() > allowed_max_transaction_fee {
            return Err(ResubmitTransactionError::InsufficientTransactionFee {
                allowed_max_transaction_fee,
                actual_max_transaction_fee: new_price.max_transaction_fee(),
            });
        }
        Ok(Some(Eip1559TransactionRequest {
            max_priority_fee_per_gas: new_price.max_priority_fee_per_gas,
            max_fee_per_gas: new_price.max_fee_per_gas,
            gas_limit: new_price.gas_limit,
            ..transaction.clone()
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransactionFeeEstimationError {
    #[error("fee history has no base fee")]
    MissingBaseFee,
    #[error("fee history has no rewards")]
    MissingRewards,
}

/// Fee estimate for the next block from recent fee history.
///
/// The base fee is the one the history predicts for the next block. The priority fee
/// is the median of the sampled rewards, floored at 1.5 gwei.
pub fn estimate_transaction_fee(
    fee_history: &FeeHistory,
) -> Result<GasFeeEstimate, TransactionFeeEstimationError> {
    let base_fee_per_gas = *fee_history
        .base_fee_per_gas
        .last()
        .ok_or(TransactionFeeEstimationError::MissingBaseFee)?;
    let mut rewards: Vec<WeiPerGas> = fee_history.reward.iter().flatten().copied().collect();
    if rewards.is_empty() {
        return Err(TransactionFeeEstimationError::MissingRewards);
    }
    rewards.sort_unstable();
    let median = rewards[rewards.len() / 2];
    Ok(GasFeeEstimate {
        base_fee_per_gas,
        max_priority_fee_per_gas: median.max(MIN_MAX_PRIORITY_FEE_PER_GAS),
    })
}
