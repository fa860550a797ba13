//! Counters for the minter's deposit and withdrawal pipelines.

use metrics::{Counter, Gauge, counter, gauge};

/// Minter metrics, registered under the `eden_vault` prefix.
#[derive(Clone)]
pub struct MinterMetrics {
    /// Deposits accepted from scraped logs
    pub deposits_accepted: Counter,

    /// Deposit logs rejected as invalid
    pub deposits_invalid: Counter,

    /// Deposits credited to a principal
    pub deposits_minted: Counter,

    /// Withdrawal requests accepted
    pub withdrawals_accepted: Counter,

    /// Withdrawal transactions created
    pub transactions_created: Counter,

    /// Withdrawal transactions signed
    pub transactions_signed: Counter,

    /// Withdrawal transactions broadcast
    pub transactions_sent: Counter,

    /// Withdrawal transactions finalized
    pub transactions_finalized: Counter,

    /// Failed withdrawals credited back
    pub reimbursements: Counter,

    /// RPC calls that failed after retries
    pub rpc_failures: Counter,

    /// Withdrawal requests waiting for a transaction
    pub pending_withdrawals: Gauge,
}

impl Default for MinterMetrics {
    fn default() -> Self {
        Self {
            deposits_accepted: counter!("eden_vault_deposits_accepted"),
            deposits_invalid: counter!("eden_vault_deposits_invalid"),
            deposits_minted: counter!("eden_vault_deposits_minted"),
            withdrawals_accepted: counter!("eden_vault_withdrawals_accepted"),
            transactions_created: counter!("eden_vault_transactions_created"),
            transactions_signed: counter!("eden_vault_transactions_signed"),
            transactions_sent: counter!("eden_vault_transactions_sent"),
            transactions_finalized: counter!("eden_vault_transactions_finalized"),
            reimbursements: counter!("eden_vault_reimbursements"),
            rpc_failures: counter!("eden_vault_rpc_failures"),
            pending_withdrawals: gauge!("eden_vault_pending_withdrawals"),
        }
    }
}

impl MinterMetrics {
    #[inline]
    pub fn record_deposit_accepted(&self) {
        self.deposits_accepted.increment(1);
    }

    #[inline]
    pub fn record_deposit_invalid(&self) {
        self.deposits_invalid.increment(1);
    }

    #[inline]
    pub fn record_deposit_minted(&self) {
        self.deposits_minted.increment(1);
    }

    #[inline]
    pub fn record_withdrawal_accepted(&self) {
        self.withdrawals_accepted.increment(1);
    }

    #[inline]
    pub fn record_transactions_created(&self, count: usize) {
        self.transactions_created.increment(count as u64);
    }

    #[inline]
    pub fn record_transactions_signed(&self, count: usize) {
        self.transactions_signed.increment(count as u64);
    }

    #[inline]
    pub fn record_transactions_sent(&self, count: usize) {
        self.transactions_sent.increment(count as u64);
    }

    #[inline]
    pub fn record_transactions_finalized(&self, count: usize) {
        self.transactions_finalized.increment(count as u64);
    }

    #[inline]
    pub fn record_reimbursement(&self) {
        self.reimbursements.increment(1);
    }

    #[inline]
    pub fn record_rpc_failure(&self) {
        self.rpc_failures.increment(1);
    }

    #[inline]
    pub fn set_pending_withdrawals(&self, count: usize) {
        self.pending_withdrawals.set(count as f64);
    }
}
