//! Pays out accepted withdrawal requests.
//!
//! A run walks every request through the transaction pipeline: pending
//! transactions are resubmitted with fresh fees, new transactions are created
//! for queued requests, then signed, sent, and finally matched with their
//! receipts. Failed transactions are reimbursed at the end of the run.

use crate::{
    guard::TimerGuard,
    minter::Minter,
    network::BlockTag,
    numeric::{GasAmount, TransactionCount},
    rpc::SendRawTransactionResult,
    state::{
        TaskType,
        event::EventType,
        transactions::{CreateTransactionError, ReimbursementRequest, create_transaction},
    },
    tx::{GasFeeEstimate, TransactionReceipt, TransactionStatus},
};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Gas limit of an ERC20 `transfer` call.
pub const ERC20_WITHDRAWAL_TRANSACTION_GAS_LIMIT: GasAmount = GasAmount::new(65_000);

const WITHDRAWAL_REQUESTS_BATCH_SIZE: usize = 5;
const TRANSACTIONS_TO_SIGN_BATCH_SIZE: usize = 5;
const TRANSACTIONS_TO_SEND_BATCH_SIZE: usize = 5;

/// Runs the withdrawal pipeline once.
///
/// Returns whether withdrawals are still in flight, in which case the caller
/// should run it again soon.
pub async fn process_withdrawals(minter: &Minter) -> bool {
    let _guard = match TimerGuard::new(minter, TaskType::ProcessWithdrawals) {
        Ok(guard) => guard,
        Err(e) => {
            debug!(error = %e, "Skipping withdrawal processing");
            return false;
        }
    };

    let (has_pending, has_reimbursements) = minter.read_state(|s| {
        (
            s.eth_transactions.has_pending_requests(),
            s.eth_transactions.reimbursement_requests_iter().next().is_some(),
        )
    });
    if !has_pending && !has_reimbursements {
        return false;
    }

    if has_pending {
        process_transactions(minter).await;
    }
    reimburse_withdrawals(minter);

    let (still_pending, queued) = minter.read_state(|s| {
        (
            s.eth_transactions.has_pending_requests(),
            s.eth_transactions.withdrawal_requests_len(),
        )
    });
    minter.metrics().set_pending_withdrawals(queued);
    still_pending
}

async fn process_transactions(minter: &Minter) {
    let Some(gas_fee_estimate) = minter.lazy_refresh_gas_fee_estimate().await else {
        warn!("No gas fee estimate available, postponing withdrawals");
        return;
    };

    let latest_transaction_count = match minter
        .rpc()
        .transaction_count(minter.minter_address(), BlockTag::Latest)
        .await
    {
        Ok(count) => count,
        Err(e) => {
            minter.metrics().record_rpc_failure();
            warn!(error = %e, "Failed to get the latest transaction count");
            return;
        }
    };

    resubmit_transactions(minter, latest_transaction_count, &gas_fee_estimate);
    create_transactions(minter, &gas_fee_estimate);
    sign_transactions(minter);
    send_transactions(minter, latest_transaction_count).await;
    finalize_transactions(minter).await;
}

fn resubmit_transactions(
    minter: &Minter,
    latest_transaction_count: TransactionCount,
    gas_fee_estimate: &GasFeeEstimate,
) {
    let transactions = minter.read_state(|s| {
        s.eth_transactions
            .create_resubmit_transactions(latest_transaction_count, gas_fee_estimate.clone())
    });
    for result in transactions {
        match result {
            Ok((withdrawal_id, transaction)) => {
                info!(
                    withdrawal_id,
                    nonce = %transaction.nonce,
                    max_fee_per_gas = %transaction.max_fee_per_gas,
                    "Resubmitting transaction"
                );
                if let Err(e) = minter.process_event(EventType::ReplacedTransaction {
                    withdrawal_id,
                    transaction,
                }) {
                    error!(withdrawal_id, error = %e, "Failed to record replaced transaction");
                    return;
                }
            }
            Err(e) => {
                info!(error = %e, "Cannot resubmit transaction yet");
                return;
            }
        }
    }
}

fn create_transactions(minter: &Minter, gas_fee_estimate: &GasFeeEstimate) {
    let requests = minter.read_state(|s| {
        s.eth_transactions
            .withdrawal_requests_batch(WITHDRAWAL_REQUESTS_BATCH_SIZE)
    });
    let mut created = 0;
    for request in requests {
        let (nonce, network, token_address) = minter.read_state(|s| {
            (
                s.eth_transactions.next_transaction_nonce(),
                s.ethereum_network,
                s.ckerc20_token.erc20_contract_address,
            )
        });
        match create_transaction(
            &request,
            nonce,
            gas_fee_estimate.clone(),
            ERC20_WITHDRAWAL_TRANSACTION_GAS_LIMIT,
            network,
            token_address,
        ) {
            Ok(transaction) => {
                debug!(withdrawal_id = request.id, %nonce, "Created transaction");
                match minter.process_event(EventType::CreatedTransaction {
                    withdrawal_id: request.id,
                    transaction,
                }) {
                    Ok(()) => created += 1,
                    Err(e) => {
                        error!(withdrawal_id = request.id, error = %e, "Failed to record created transaction");
                    }
                }
            }
            Err(e @ CreateTransactionError::InsufficientTransactionFee { .. }) => {
                info!(error = %e, "Rescheduling withdrawal request");
                if let Err(e) = minter.mutate_state(|s| {
                    s.eth_transactions
                        .reschedule_withdrawal_request(request.id)
                }) {
                    error!(withdrawal_id = request.id, error = %e, "Failed to reschedule withdrawal");
                }
            }
            Err(e) => {
                error!(withdrawal_id = request.id, error = %e, "Failed to create transaction");
            }
        }
    }
    minter.metrics().record_transactions_created(created);
}

fn sign_transactions(minter: &Minter) {
    let transactions = minter.read_state(|s| {
        s.eth_transactions
            .transactions_to_sign_batch(TRANSACTIONS_TO_SIGN_BATCH_SIZE)
    });
    let mut signed = 0;
    for (withdrawal_id, transaction) in transactions {
        let transaction = match transaction.sign(minter.signer()) {
            Ok(transaction) => transaction,
            Err(e) => {
                error!(withdrawal_id, error = %e, "Failed to sign transaction");
                continue;
            }
        };
        debug!(withdrawal_id, hash = %transaction.hash, "Signed transaction");
        match minter.process_event(EventType::SignedTransaction {
            withdrawal_id,
            transaction,
        }) {
            Ok(()) => signed += 1,
            Err(e) => error!(withdrawal_id, error = %e, "Failed to record signed transaction"),
        }
    }
    minter.metrics().record_transactions_signed(signed);
}

async fn send_transactions(minter: &Minter, latest_transaction_count: TransactionCount) {
    let transactions = minter.read_state(|s| {
        s.eth_transactions
            .transactions_to_send_batch(latest_transaction_count, TRANSACTIONS_TO_SEND_BATCH_SIZE)
    });
    if transactions.is_empty() {
        return;
    }

    let results = join_all(
        transactions
            .iter()
            .map(|tx| minter.rpc().send_raw_transaction(tx.raw.clone())),
    )
    .await;

    let mut sent = 0;
    for (tx, result) in transactions.iter().zip(results) {
        match result {
            Ok(SendRawTransactionResult::Ok) => {
                sent += 1;
                info!(hash = %tx.hash, nonce = %tx.nonce(), "Sent transaction");
            }
            // A transaction with this nonce was already mined.
            Ok(SendRawTransactionResult::NonceTooLow) => {
                debug!(hash = %tx.hash, nonce = %tx.nonce(), "Transaction nonce already used");
            }
            Ok(other) => {
                warn!(hash = %tx.hash, nonce = %tx.nonce(), result = ?other, "Transaction was not accepted");
            }
            Err(e) => {
                minter.metrics().record_rpc_failure();
                warn!(hash = %tx.hash, error = %e, "Failed to send transaction");
            }
        }
    }
    minter.metrics().record_transactions_sent(sent);
}

async fn finalize_transactions(minter: &Minter) {
    let block_height = minter.read_state(|s| s.ethereum_block_height);
    let finalized_transaction_count = match minter
        .rpc()
        .transaction_count(minter.minter_address(), block_height)
        .await
    {
        Ok(count) => count,
        Err(e) => {
            minter.metrics().record_rpc_failure();
            warn!(error = %e, %block_height, "Failed to get the finalized transaction count");
            return;
        }
    };

    let expected = minter.read_state(|s| {
        s.eth_transactions
            .sent_transactions_to_finalize(&finalized_transaction_count)
    });
    if expected.is_empty() {
        return;
    }
    let expected_withdrawal_ids: BTreeSet<u64> = expected.values().copied().collect();

    let results = join_all(
        expected
            .keys()
            .map(|hash| minter.rpc().transaction_receipt(*hash)),
    )
    .await;

    let mut receipts: BTreeMap<u64, TransactionReceipt> = BTreeMap::new();
    for ((hash, withdrawal_id), result) in expected.iter().zip(results) {
        match result {
            Ok(Some(receipt)) => {
                receipts.insert(*withdrawal_id, receipt);
            }
            Ok(None) => {}
            Err(e) => {
                minter.metrics().record_rpc_failure();
                warn!(%hash, error = %e, "Failed to get transaction receipt");
            }
        }
    }

    if receipts.keys().copied().collect::<BTreeSet<_>>() != expected_withdrawal_ids {
        let missing: Vec<_> = expected_withdrawal_ids
            .iter()
            .filter(|id| !receipts.contains_key(id))
            .collect();
        error!(
            ?missing,
            %finalized_transaction_count,
            "Missing receipts for finalized withdrawals"
        );
        return;
    }

    let mut finalized = 0;
    for (withdrawal_id, transaction_receipt) in receipts {
        let status = transaction_receipt.status;
        let hash = transaction_receipt.transaction_hash;
        match minter.process_event(EventType::FinalizedTransaction {
            withdrawal_id,
            transaction_receipt,
        }) {
            Ok(()) => {
                finalized += 1;
                match status {
                    TransactionStatus::Success => {
                        info!(withdrawal_id, %hash, "Withdrawal finalized");
                    }
                    TransactionStatus::Failure => {
                        warn!(withdrawal_id, %hash, "Withdrawal transaction failed");
                    }
                }
            }
            Err(e) => error!(withdrawal_id, %hash, error = %e, "Failed to record finalized transaction"),
        }
    }
    minter.metrics().record_transactions_finalized(finalized);
}

fn reimburse_withdrawals(minter: &Minter) {
    let requests: Vec<ReimbursementRequest> = minter.read_state(|s| {
        s.eth_transactions
            .reimbursement_requests_iter()
            .map(|(_, request)| request.clone())
            .collect()
    });
    for request in requests {
        match minter.process_event(EventType::ReimbursedErc20Withdrawal {
            withdrawal_id: request.withdrawal_id,
            reimbursed_amount: request.reimbursed_amount,
            transaction_hash: request.transaction_hash,
        }) {
            Ok(()) => {
                minter.metrics().record_reimbursement();
                info!(
                    withdrawal_id = request.withdrawal_id,
                    to = %request.to,
                    amount = %request.reimbursed_amount,
                    "Reimbursed failed withdrawal"
                );
            }
            Err(e) => error!(
                withdrawal_id = request.withdrawal_id,
                error = %e,
                "Failed to reimburse withdrawal"
            ),
        }
    }
}
