
use crate::{
    endpoints::{self, EthTransaction, RetrieveErc20Status, TxFinalizedStatus, WithdrawalStatus},
    eth_logs::IERC20,
    map::MultiKeyMap,
    network::EthereumNetwork,
    numeric::{Erc20Value, GasAmount, TransactionCount, TransactionNonce, Wei},
    state::StateError,
    tx::{
        self, Eip1559TransactionRequest, FinalizedEip1559Transaction, GasFeeEstimate,
        ResubmissionStrategy, SignedEip1559TransactionRequest, SignedTransactionRequest,
        TransactionReceipt, TransactionRequest, TransactionStatus,
    },
};
use alloy::{
    primitives::{Address, B256, Bytes},
    sol_types::SolCall,
};
use candid::Principal;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    str::FromStr,
};
use tracing::debug;

/// Upper bound on nonces that are created or sent but not yet finalized.
const MAX_NUM_PENDING_TRANSACTION_NONCES: usize = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WithdrawalSearchParameter {
    ByWithdrawalId(u64),
    ByRecipient(Address),
    BySender(Principal),
}

impl TryFrom<endpoints::WithdrawalSearchParameter> for WithdrawalSearchParameter {
    type Error = String;

    fn try_from(parameter: endpoints::WithdrawalSearchParameter) -> Result<Self, Self::Error> {
        use endpoints::WithdrawalSearchParameter::*;
        match parameter {
            ByWithdrawalId(id) => Ok(Self::ByWithdrawalId(id)),
            ByRecipient(address) => Address::from_str(&address)
                .map(Self::ByRecipient)
                .map_err(|e| format!("invalid recipient address {address}: {e}")),
            BySender(principal) => Ok(Self::BySender(principal)),
        }
    }
}

/// ERC20 withdrawal accepted from a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20WithdrawalRequest {
    /// Upper bound on the Ethereum fee the minter pays for this withdrawal.
    pub max_transaction_fee: Wei,
    /// Amount the recipient receives.
    pub withdrawal_amount: Erc20Value,
    /// Vault fee charged on top of the amount and credited to the admin.
    pub withdrawal_fee: Erc20Value,
    pub destination: Address,
    pub from: Principal,
    /// Nanoseconds since the Unix epoch.
    pub created_at: u64,
    pub id: u64,
}

impl Erc20WithdrawalRequest {
    pub fn match_parameter(&self, parameter: &WithdrawalSearchParameter) -> bool {
        match parameter {
            WithdrawalSearchParameter::ByWithdrawalId(id) => self.id == *id,
            WithdrawalSearchParameter::ByRecipient(address) => self.destination == *address,
            WithdrawalSearchParameter::BySender(principal) => self.from == *principal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReimbursementRequest {
    pub withdrawal_id: u64,
    pub reimbursed_amount: Erc20Value,
    pub to: Principal,
    /// Hash of the failed transaction.
    pub transaction_hash: B256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reimbursed {
    pub withdrawal_id: u64,
    pub reimbursed_amount: Erc20Value,
    pub transaction_hash: B256,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CreateTransactionError {
    #[error(
        "withdrawal {withdrawal_id}: max transaction fee {actual_max_transaction_fee} exceeds allowed {allowed_max_transaction_fee}"
    )]
    InsufficientTransactionFee {
        withdrawal_id: u64,
        allowed_max_transaction_fee: Wei,
        actual_max_transaction_fee: Wei,
    },
    #[error("gas limit must be positive")]
    ZeroGasLimit,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResubmitTransactionError {
    #[error(
        "withdrawal {withdrawal_id} (nonce {transaction_nonce}): max transaction fee {max_transaction_fee} exceeds allowed {allowed_max_transaction_fee}"
    )]
    InsufficientTransactionFee {
        withdrawal_id: u64,
        transaction_nonce: TransactionNonce,
        allowed_max_transaction_fee: Wei,
        max_transaction_fee: Wei,
    },
}

/// Withdrawal transactions issued by the minter.
///
/// A withdrawal request waits in a FIFO queue until a transaction is created
/// for it with the next free nonce. The created transaction is then signed and
/// sent, possibly several times with increasing fees. Exactly one of the sent
/// transactions for a nonce is finalized. A failed transaction leads to a
/// reimbursement of the withdrawn amount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthTransactions {
    pub(crate) pending_withdrawal_requests: VecDeque<Erc20WithdrawalRequest>,
    pub(crate) processed_withdrawal_requests: BTreeMap<u64, Erc20WithdrawalRequest>,
    pub(crate) created_tx: MultiKeyMap<TransactionNonce, u64, TransactionRequest>,
    pub(crate) sent_tx: MultiKeyMap<TransactionNonce, u64, Vec<SignedTransactionRequest>>,
    pub(crate) finalized_tx: MultiKeyMap<TransactionNonce, u64, FinalizedEip1559Transaction>,
    pub(crate) next_nonce: TransactionNonce,

    pub(crate) maybe_reimburse: BTreeSet<u64>,
    pub(crate) reimbursement_requests: BTreeMap<u64, ReimbursementRequest>,
    pub(crate) reimbursed: BTreeMap<u64, Reimbursed>,
}

impl EthTransactions {
    pub fn new(next_nonce: TransactionNonce) -> Self {
        Self {
            pending_withdrawal_requests: VecDeque::new(),
            processed_withdrawal_requests: BTreeMap::new(),
            created_tx: MultiKeyMap::default(),
            sent_tx: MultiKeyMap::default(),
            finalized_tx: MultiKeyMap::default(),
            next_nonce,
            maybe_reimburse: BTreeSet::new(),
            reimbursement_requests: BTreeMap::new(),
            reimbursed: BTreeMap::new(),
        }
    }

    pub fn next_transaction_nonce(&self) -> TransactionNonce {
        self.next_nonce
    }

    pub fn update_next_transaction_nonce(&mut self, nonce: TransactionNonce) {
        self.next_nonce = nonce;
    }

    fn is_known_withdrawal(&self, withdrawal_id: u64) -> bool {
        self.pending_withdrawal_requests
            .iter()
            .any(|request| request.id == withdrawal_id)
            || self.processed_withdrawal_requests.contains_key(&withdrawal_id)
    }

    pub fn record_withdrawal_request(
        &mut self,
        request: Erc20WithdrawalRequest,
    ) -> Result<(), StateError> {
        if self.is_known_withdrawal(request.id) {
            return Err(StateError::DuplicateWithdrawal(request.id));
        }
        self.pending_withdrawal_requests.push_back(request);
        Ok(())
    }

    /// Moves a pending withdrawal request to the back of the queue.
    pub fn reschedule_withdrawal_request(&mut self, withdrawal_id: u64) -> Result<(), StateError> {
        let position = self
            .pending_withdrawal_requests
            .iter()
            .position(|request| request.id == withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        if let Some(request) = self.pending_withdrawal_requests.remove(position) {
            self.pending_withdrawal_requests.push_back(request);
        }
        Ok(())
    }

    pub fn record_created_transaction(
        &mut self,
        withdrawal_id: u64,
        transaction: Eip1559TransactionRequest,
    ) -> Result<(), StateError> {
        let position = self
            .pending_withdrawal_requests
            .iter()
            .position(|request| request.id == withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        if transaction.amount != Wei::ZERO {
            return Err(StateError::InvalidTransaction(format!(
                "ERC20 transfer for withdrawal {withdrawal_id} carries a non-zero amount"
            )));
        }
        let nonce = self.next_nonce;
        if transaction.nonce != nonce {
            return Err(StateError::InvalidTransaction(format!(
                "expected nonce {nonce}, got {}",
                transaction.nonce
            )));
        }
        self.next_nonce = nonce.checked_increment().ok_or(StateError::Overflow)?;
        let request = self
            .pending_withdrawal_requests
            .remove(position)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        let transaction_request = TransactionRequest {
            transaction,
            resubmission: ResubmissionStrategy::GuaranteeEthAmount {
                allowed_max_transaction_fee: request.max_transaction_fee,
            },
        };
        self.created_tx
            .try_insert(nonce, withdrawal_id, transaction_request)
            .map_err(|e| StateError::Invariant(format!("created transaction {nonce}: {e}")))?;
        self.processed_withdrawal_requests.insert(withdrawal_id, request);
        self.maybe_reimburse.insert(withdrawal_id);
        Ok(())
    }

    pub fn record_signed_transaction(
        &mut self,
        signed_transaction: SignedEip1559TransactionRequest,
    ) -> Result<(), StateError> {
        let nonce = signed_transaction.nonce();
        let created_tx = self.created_tx.get(&nonce).ok_or_else(|| {
            StateError::InvalidTransaction(format!("no created transaction with nonce {nonce}"))
        })?;
        if created_tx.transaction != signed_transaction.transaction {
            return Err(StateError::InvalidTransaction(format!(
                "signed transaction {} does not match the created one",
                signed_transaction.hash
            )));
        }
        let resubmission = created_tx.resubmission.clone();
        let (nonce, withdrawal_id, _) = self.created_tx.remove_entry(&nonce).ok_or_else(|| {
            StateError::Invariant(format!("created transaction {nonce} vanished"))
        })?;
        let signed_tx = SignedTransactionRequest {
            transaction: signed_transaction,
            resubmission,
        };
        match self.sent_tx.get_mut(&nonce) {
            Some(sent_txs) => sent_txs.push(signed_tx),
            None => self
                .sent_tx
                .try_insert(nonce, withdrawal_id, vec![signed_tx])
                .map_err(|e| StateError::Invariant(format!("sent transaction {nonce}: {e}")))?,
        }
        Ok(())
    }

    /// Transactions replacing sent ones whose nonce was not mined yet.
    ///
    /// Stops at the first error: later nonces cannot be mined before the
    /// failing one anyway.
    pub fn create_resubmit_transactions(
        &self,
        latest_transaction_count: TransactionCount,
        current_gas_fee: GasFeeEstimate,
    ) -> Vec<Result<(u64, Eip1559TransactionRequest), ResubmitTransactionError>> {
        let first_pending_tx_nonce: TransactionNonce = latest_transaction_count.change_units();
        let mut transactions_to_resubmit = Vec::new();
        for (nonce, withdrawal_id, sent_txs) in self
            .sent_tx
            .iter()
            .filter(|(nonce, _, _)| **nonce >= first_pending_tx_nonce)
        {
            let Some(last_sent_tx) = sent_txs.last() else {
                continue;
            };
            match last_sent_tx.resubmit(current_gas_fee.clone()) {
                Ok(Some(new_tx)) => transactions_to_resubmit.push(Ok((*withdrawal_id, new_tx))),
                // Fees are still current, the last transaction is resent as is.
                Ok(None) => {}
                Err(tx::ResubmitTransactionError::InsufficientTransactionFee {
                    allowed_max_transaction_fee,
                    actual_max_transaction_fee,
                }) => {
                    transactions_to_resubmit.push(Err(
                        ResubmitTransactionError::InsufficientTransactionFee {
                            withdrawal_id: *withdrawal_id,
                            transaction_nonce: *nonce,
                            allowed_max_transaction_fee,
                            max_transaction_fee: actual_max_transaction_fee,
                        },
                    ));
                    return transactions_to_resubmit;
                }
            }
        }
        transactions_to_resubmit
    }

    pub fn record_resubmit_transaction(
        &mut self,
        new_tx: Eip1559TransactionRequest,
    ) -> Result<(), StateError> {
        let nonce = new_tx.nonce;
        let (withdrawal_id, last_sent_tx) = self
            .sent_tx
            .get_entry(&nonce)
            .and_then(|(withdrawal_id, txs)| txs.last().map(|tx| (*withdrawal_id, tx)))
            .ok_or_else(|| {
                StateError::InvalidTransaction(format!("no sent transaction with nonce {nonce}"))
            })?;
        if !last_sent_tx
            .transaction
            .transaction
            .equal_ignoring_fee_and_amount(&new_tx)
        {
            return Err(StateError::InvalidTransaction(format!(
                "resubmitted transaction with nonce {nonce} differs from the sent one"
            )));
        }
        let resubmission = last_sent_tx.resubmission.clone();
        self.cleanup_failed_resubmitted_transaction(&nonce);
        self.created_tx
            .try_insert(
                nonce,
                withdrawal_id,
                TransactionRequest {
                    transaction: new_tx,
                    resubmission,
                },
            )
            .map_err(|e| StateError::Invariant(format!("resubmitted transaction {nonce}: {e}")))
    }

    /// Hashes of all sent transactions whose nonce is below the finalized count.
    pub fn sent_transactions_to_finalize(
        &self,
        finalized_transaction_count: &TransactionCount,
    ) -> BTreeMap<B256, u64> {
        let first_non_finalized_tx_nonce: TransactionNonce =
            finalized_transaction_count.change_units();
        self.sent_tx
            .iter()
            .filter(|(nonce, _, _)| **nonce < first_non_finalized_tx_nonce)
            .flat_map(|(_, withdrawal_id, sent_txs)| {
                sent_txs
                    .iter()
                    .map(move |sent_tx| (sent_tx.transaction.hash, *withdrawal_id))
            })
            .collect()
    }

    pub fn record_finalized_transaction(
        &mut self,
        withdrawal_id: u64,
        receipt: TransactionReceipt,
    ) -> Result<(), StateError> {
        let sent_tx = self
            .sent_tx
            .get_alt(&withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?
            .iter()
            .find(|sent_tx| sent_tx.transaction.hash == receipt.transaction_hash)
            .ok_or_else(|| {
                StateError::InvalidTransaction(format!(
                    "no sent transaction matches receipt {}",
                    receipt.transaction_hash
                ))
            })?;
        let nonce = sent_tx.transaction.nonce();
        let finalized_tx = sent_tx
            .transaction
            .clone()
            .try_finalize(receipt.clone())
            .map_err(StateError::InvalidTransaction)?;

        self.sent_tx.remove_entry(&nonce);
        self.cleanup_failed_resubmitted_transaction(&nonce);
        self.finalized_tx
            .try_insert(nonce, withdrawal_id, finalized_tx)
            .map_err(|e| StateError::Invariant(format!("finalized transaction {nonce}: {e}")))?;

        if !self.maybe_reimburse.remove(&withdrawal_id) {
            return Err(StateError::Invariant(format!(
                "withdrawal {withdrawal_id} was not awaiting finalization"
            )));
        }
        let request = self
            .processed_withdrawal_requests
            .get(&withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        if receipt.status == TransactionStatus::Failure {
            let reimbursement = ReimbursementRequest {
                withdrawal_id,
                reimbursed_amount: request.withdrawal_amount,
                to: request.from,
                transaction_hash: receipt.transaction_hash,
            };
            self.record_reimbursement_request(reimbursement)?;
        }
        Ok(())
    }

    fn record_reimbursement_request(
        &mut self,
        request: ReimbursementRequest,
    ) -> Result<(), StateError> {
        let withdrawal_id = request.withdrawal_id;
        if self.maybe_reimburse.contains(&withdrawal_id)
            || self.reimbursed.contains_key(&withdrawal_id)
            || self.reimbursement_requests.contains_key(&withdrawal_id)
        {
            return Err(StateError::Invariant(format!(
                "withdrawal {withdrawal_id} cannot be reimbursed twice"
            )));
        }
        self.reimbursement_requests.insert(withdrawal_id, request);
        Ok(())
    }

    /// Marks a reimbursement request as paid out.
    pub fn record_reimbursement(&mut self, withdrawal_id: u64) -> Result<&Reimbursed, StateError> {
        let request = self
            .reimbursement_requests
            .remove(&withdrawal_id)
            .ok_or(StateError::UnknownWithdrawal(withdrawal_id))?;
        let reimbursed = self.reimbursed.entry(withdrawal_id).or_insert(Reimbursed {
            withdrawal_id,
            reimbursed_amount: request.reimbursed_amount,
            transaction_hash: request.transaction_hash,
        });
        Ok(reimbursed)
    }

    pub fn reimbursement_requests_iter(
        &self,
    ) -> impl Iterator<Item = (&u64, &ReimbursementRequest)> {
        self.reimbursement_requests.iter()
    }

    pub fn reimbursed_iter(&self) -> impl Iterator<Item = (&u64, &Reimbursed)> {
        self.reimbursed.iter()
    }

    pub fn withdrawal_status(
        &self,
        parameter: &WithdrawalSearchParameter,
    ) -> Vec<(
        &Erc20WithdrawalRequest,
        WithdrawalStatus,
        Option<&Eip1559TransactionRequest>,
    )> {
        let pending = self
            .pending_withdrawal_requests
            .iter()
            .filter(|request| request.match_parameter(parameter))
            .map(|request| (request, WithdrawalStatus::Pending, None));

        let processed = self
            .processed_withdrawal_requests
            .values()
            .filter(|request| request.match_parameter(parameter))
            .filter_map(|request| {
                let (status, tx) = self.processed_transaction_status(request.id);
                let status = match status {
                    RetrieveErc20Status::TxCreated => WithdrawalStatus::TxCreated,
                    RetrieveErc20Status::TxSent(sent) => WithdrawalStatus::TxSent(sent),
                    RetrieveErc20Status::TxFinalized(finalized) => {
                        WithdrawalStatus::TxFinalized(finalized)
                    }
                    RetrieveErc20Status::NotFound | RetrieveErc20Status::Pending => {
                        debug!(withdrawal_id = request.id, "processed withdrawal has no transaction");
                        return None;
                    }
                };
                Some((request, status, tx))
            });

        pending.chain(processed).collect()
    }

    pub fn transaction_status(&self, withdrawal_id: u64) -> RetrieveErc20Status {
        if self
            .pending_withdrawal_requests
            .iter()
            .any(|request| request.id == withdrawal_id)
        {
            return RetrieveErc20Status::Pending;
        }
        self.processed_transaction_status(withdrawal_id).0
    }

    fn processed_transaction_status(
        &self,
        withdrawal_id: u64,
    ) -> (RetrieveErc20Status, Option<&Eip1559TransactionRequest>) {
        if let Some(tx) = self.created_tx.get_alt(&withdrawal_id) {
            return (RetrieveErc20Status::TxCreated, Some(&tx.transaction));
        }

        if let Some(tx) = self
            .sent_tx
            .get_alt(&withdrawal_id)
            .and_then(|txs| txs.last())
        {
            return (
                RetrieveErc20Status::TxSent(EthTransaction {
                    transaction_hash: tx.transaction.hash.to_string(),
                }),
                Some(&tx.transaction.transaction),
            );
        }

        if let Some(tx) = self.finalized_tx.get_alt(&withdrawal_id) {
            let transaction_hash = tx.transaction_hash().to_string();
            let status = if let Some(reimbursed) = self.reimbursed.get(&withdrawal_id) {
                TxFinalizedStatus::Reimbursed {
                    transaction_hash,
                    reimbursed_amount: reimbursed.reimbursed_amount,
                }
            } else if tx.transaction_status() == TransactionStatus::Failure {
                TxFinalizedStatus::PendingReimbursement(EthTransaction { transaction_hash })
            } else {
                TxFinalizedStatus::Success {
                    transaction_hash,
                    effective_transaction_fee: Some(tx.effective_transaction_fee()),
                }
            };
            return (
                RetrieveErc20Status::TxFinalized(status),
                Some(&tx.transaction),
            );
        }

        (RetrieveErc20Status::NotFound, None)
    }

    /// Oldest pending requests, limited so that at most
    /// `MAX_NUM_PENDING_TRANSACTION_NONCES` nonces are in flight.
    pub fn withdrawal_requests_batch(&self, requested_batch_size: usize) -> Vec<Erc20WithdrawalRequest> {
        let pending_nonces: BTreeSet<_> =
            self.created_tx.keys().chain(self.sent_tx.keys()).collect();
        let batch_size = MAX_NUM_PENDING_TRANSACTION_NONCES
            .saturating_sub(pending_nonces.len())
            .min(requested_batch_size);
        self.pending_withdrawal_requests
            .iter()
            .take(batch_size)
            .cloned()
            .collect()
    }

    pub fn withdrawal_requests_iter(&self) -> impl Iterator<Item = &Erc20WithdrawalRequest> {
        self.pending_withdrawal_requests.iter()
    }

    pub fn withdrawal_requests_len(&self) -> usize {
        self.pending_withdrawal_requests.len()
    }

    pub fn maybe_reimburse_requests_iter(&self) -> impl Iterator<Item = &Erc20WithdrawalRequest> {
        self.processed_withdrawal_requests
            .iter()
            .filter(|(id, _)| self.maybe_reimburse.contains(id))
            .map(|(_, request)| request)
    }

    pub fn transactions_to_sign_batch(
        &self,
        batch_size: usize,
    ) -> Vec<(u64, Eip1559TransactionRequest)> {
        self.created_tx
            .iter()
            .take(batch_size)
            .map(|(_, withdrawal_id, tx)| (*withdrawal_id, tx.transaction.clone()))
            .collect()
    }

    /// Last signed transaction of every nonce that was not mined yet.
    pub fn transactions_to_send_batch(
        &self,
        latest_transaction_count: TransactionCount,
        batch_size: usize,
    ) -> Vec<SignedEip1559TransactionRequest> {
        let first_pending_tx_nonce: TransactionNonce = latest_transaction_count.change_units();
        self.sent_tx
            .iter()
            .filter(|(nonce, _, _)| **nonce >= first_pending_tx_nonce)
            .filter_map(|(_, _, txs)| txs.last())
            .take(batch_size)
            .map(|tx| tx.transaction.clone())
            .collect()
    }

    pub fn sent_transactions_iter(
        &self,
    ) -> impl Iterator<Item = (&TransactionNonce, &u64, &[SignedTransactionRequest])> {
        self.sent_tx
            .iter()
            .map(|(nonce, withdrawal_id, txs)| (nonce, withdrawal_id, txs.as_slice()))
    }

    pub fn get_finalized_transaction(
        &self,
        withdrawal_id: u64,
    ) -> Option<&FinalizedEip1559Transaction> {
        self.finalized_tx.get_alt(&withdrawal_id)
    }

    pub fn get_processed_withdrawal_request(
        &self,
        withdrawal_id: u64,
    ) -> Option<&Erc20WithdrawalRequest> {
        self.processed_withdrawal_requests.get(&withdrawal_id)
    }

    pub fn finalized_transactions_iter(
        &self,
    ) -> impl Iterator<Item = (&TransactionNonce, &u64, &FinalizedEip1559Transaction)> {
        self.finalized_tx.iter()
    }

    pub fn is_sent_tx_empty(&self) -> bool {
        self.sent_tx.is_empty()
    }

    pub fn has_pending_requests(&self) -> bool {
        !self.pending_withdrawal_requests.is_empty()
            || !self.created_tx.is_empty()
            || !self.sent_tx.is_empty()
    }

    pub fn oldest_incomplete_withdrawal_timestamp(&self) -> Option<u64> {
        self.withdrawal_requests_iter()
            .chain(self.maybe_reimburse_requests_iter())
            .map(|request| request.created_at)
            .min()
    }

    fn cleanup_failed_resubmitted_transaction(&mut self, nonce: &TransactionNonce) {
        if let Some((_, withdrawal_id, _)) = self.created_tx.remove_entry(nonce) {
            debug!(
                %nonce,
                withdrawal_id, "dropping resubmitted transaction that was never signed"
            );
        }
    }

    /// Compares two transaction states, ignoring the order of the pending queue.
    pub fn is_equivalent_to(&self, other: &Self) -> Result<(), String> {
        fn sorted(requests: &VecDeque<Erc20WithdrawalRequest>) -> Vec<&Erc20WithdrawalRequest> {
            let mut sorted: Vec<_> = requests.iter().collect();
            sorted.sort_unstable_by_key(|request| request.id);
            sorted
        }

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

        let (lhs, rhs) = (
            sorted(&self.pending_withdrawal_requests),
            sorted(&other.pending_withdrawal_requests),
        );
        if lhs != rhs {
            return Err(format!(
                "pending_withdrawal_requests differs: {lhs:?} != {rhs:?}"
            ));
        }
        ensure_eq!(processed_withdrawal_requests);
        ensure_eq!(created_tx);
        ensure_eq!(sent_tx);
        ensure_eq!(finalized_tx);
        ensure_eq!(next_nonce);
        ensure_eq!(maybe_reimburse);
        ensure_eq!(reimbursement_requests);
        ensure_eq!(reimbursed);
        Ok(())
    }
}

/// Builds the ERC20 `transfer` transaction paying out `request`.
///
/// The whole `max_transaction_fee` of the request is allocated to the max fee
/// per gas so that the transaction survives base fee increases without being
/// resubmitted.
pub fn create_transaction(
    request: &Erc20WithdrawalRequest,
    nonce: TransactionNonce,
    gas_fee_estimate: GasFeeEstimate,
    gas_limit: GasAmount,
    ethereum_network: EthereumNetwork,
    erc20_contract_address: Address,
) -> Result<Eip1559TransactionRequest, CreateTransactionError> {
    let request_max_fee_per_gas = request
        .max_transaction_fee
        .into_wei_per_gas(gas_limit)
        .ok_or(CreateTransactionError::ZeroGasLimit)?;
    let actual_min_max_fee_per_gas = gas_fee_estimate.min_max_fee_per_gas();
    if actual_min_max_fee_per_gas > request_max_fee_per_gas {
        return Err(CreateTransactionError::InsufficientTransactionFee {
            withdrawal_id: request.id,
            allowed_max_transaction_fee: request.max_transaction_fee,
            actual_max_transaction_fee: actual_min_max_fee_per_gas
                .transaction_cost(gas_limit)
                .unwrap_or(Wei::MAX),
        });
    }
    Ok(Eip1559TransactionRequest {
        chain_id: ethereum_network.chain_id(),
        nonce,
        max_priority_fee_per_gas: gas_fee_estimate.max_priority_fee_per_gas,
        max_fee_per_gas: request_max_fee_per_gas,
        gas_limit,
        destination: erc20_contract_address,
        amount: Wei::ZERO,
        data: TransactionCallData::Erc20Transfer {
            to: request.destination,
            value: request.withdrawal_amount,
        }
        .encode(),
        access_list: Default::default(),
    })
}

/// Decoded input of a minter transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionCallData {
    Erc20Transfer { to: Address, value: Erc20Value },
}

impl TransactionCallData {
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Erc20Transfer { to, value } => IERC20::transferCall {
                to: *to,
                amount: value.into_inner(),
            }
            .abi_encode()
            .into(),
        }
    }

    pub fn decode(data: impl AsRef<[u8]>) -> Result<Self, String> {
        let data = data.as_ref();
        match data.get(0..4) {
            Some(selector) if selector == IERC20::transferCall::SELECTOR => {
                if data.len() != 68 {
                    return Err(format!("invalid transfer data length {}", data.len()));
                }
                let call = IERC20::transferCall::abi_decode(data).map_err(|e| e.to_string())?;
                Ok(Self::Erc20Transfer {
                    to: call.to,
                    value: Erc20Value::from_u256(call.amount),
                })
            }
            Some(selector) => Err(format!(
                "unknown function selector 0x{}",
                hex::encode(selector)
            )),
            None => Err("missing function selector".to_string()),
        }
    }
}
