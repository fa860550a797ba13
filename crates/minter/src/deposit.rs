//! Discovers deposits in the helper contract logs and mints them.

use crate::{
    eth_logs::{RECEIVED_ERC20_EVENT_TOPIC, ReceivedEventError, parse_received_erc20_log},
    guard::TimerGuard,
    minter::Minter,
    numeric::BlockNumber,
    rpc::LogFilter,
    state::{TaskType, event::EventType},
};
use alloy::{primitives::Address, rpc::types::Log};
use tracing::{debug, error, info, warn};

/// Refreshes the last observed block number from the chain.
///
/// Falls back to the previously observed block number when the query fails.
pub async fn update_last_observed_block_number(minter: &Minter) -> Option<BlockNumber> {
    let block_height = minter.read_state(|s| s.ethereum_block_height);
    match minter.rpc().block_number(block_height).await {
        Ok(block_number) => {
            minter.mutate_state(|s| s.last_observed_block_number = Some(block_number));
            Some(block_number)
        }
        Err(e) => {
            minter.metrics().record_rpc_failure();
            warn!(error = %e, %block_height, "Failed to get the last block number");
            minter.read_state(|s| s.last_observed_block_number)
        }
    }
}

/// Scrapes the helper contract logs from the last scraped block up to the
/// last observed one, at most `max_block_spread` blocks per query.
pub async fn scrape_logs(minter: &Minter) {
    let _guard = match TimerGuard::new(minter, TaskType::ScrapLogs) {
        Ok(guard) => guard,
        Err(e) => {
            debug!(error = %e, "Skipping log scraping");
            return;
        }
    };

    let Some(last_observed) = update_last_observed_block_number(minter).await else {
        return;
    };
    let (helper_address, token_address) = minter.read_state(|s| {
        (
            s.erc20_helper_contract_address,
            s.ckerc20_token.erc20_contract_address,
        )
    });
    let Some(helper_address) = helper_address else {
        debug!("No helper contract configured, not scraping logs");
        return;
    };
    let spread = BlockNumber::from(minter.max_block_spread().saturating_sub(1));

    let mut last_scraped = minter.read_state(|s| s.last_erc20_scraped_block_number);
    while last_scraped < last_observed {
        let Some(from) = last_scraped.checked_increment() else {
            return;
        };
        let to = from.saturating_add(spread).min(last_observed);
        match scrape_logs_range_inclusive(minter, helper_address, token_address, from, to).await {
            Some(scraped) => last_scraped = scraped,
            None => return,
        }
    }
}

/// Scrapes `from..=to`, halving the range while the provider answers that the
/// response is too large. Returns the last block that was fully processed.
async fn scrape_logs_range_inclusive(
    minter: &Minter,
    helper_address: Address,
    token_address: Address,
    from: BlockNumber,
    to: BlockNumber,
) -> Option<BlockNumber> {
    let mut subrange_to = to;
    loop {
        let filter = LogFilter {
            from_block: from,
            to_block: subrange_to,
            address: helper_address,
            event_signature: RECEIVED_ERC20_EVENT_TOPIC,
            topic1: vec![token_address.into_word()],
        };
        match minter.rpc().logs(filter).await {
            Ok(logs) => {
                debug!(%from, to = %subrange_to, count = logs.len(), "Fetched deposit logs");
                process_logs(minter, token_address, logs);
                return record_synced_block(minter, subrange_to);
            }
            Err(e) if e.is_response_too_large() => {
                if from == subrange_to {
                    warn!(block_number = %from, error = %e, "Skipping block with too many logs");
                    if let Err(e) = minter.process_event(EventType::SkippedBlockForContract {
                        contract_address: helper_address,
                        block_number: from,
                    }) {
                        error!(block_number = %from, error = %e, "Failed to record skipped block");
                        return None;
                    }
                    return record_synced_block(minter, from);
                }
                let half = subrange_to.checked_sub(from)?.div_by_two();
                subrange_to = from.checked_add(half)?;
                debug!(%from, to = %subrange_to, "Response too large, retrying with a smaller range");
            }
            Err(e) => {
                minter.metrics().record_rpc_failure();
                warn!(%from, to = %subrange_to, error = %e, "Failed to get deposit logs");
                return None;
            }
        }
    }
}

fn record_synced_block(minter: &Minter, block_number: BlockNumber) -> Option<BlockNumber> {
    match minter.process_event(EventType::SyncedErc20ToBlock { block_number }) {
        Ok(()) => Some(block_number),
        Err(e) => {
            error!(%block_number, error = %e, "Failed to record scraping progress");
            None
        }
    }
}

fn process_logs(minter: &Minter, token_address: Address, logs: Vec<Log>) {
    for log in logs {
        let (event_source, payload) = match parse_received_erc20_log(&log) {
            Ok(event) => {
                let event_source = event.source();
                if minter.read_state(|s| s.is_processed(&event_source)) {
                    debug!(%event_source, "Deposit already processed");
                    continue;
                }
                let rejection = if event.erc20_contract_address != token_address {
                    Some(format!("unsupported token {}", event.erc20_contract_address))
                } else if minter.blocklist().is_blocked(&event.from_address) {
                    Some(format!("blocked address {}", event.from_address))
                } else {
                    None
                };
                match rejection {
                    Some(reason) => (event_source, EventType::InvalidDeposit {
                        event_source,
                        reason,
                    }),
                    None => {
                        info!(
                            %event_source,
                            principal = %event.principal,
                            amount = %event.value,
                            "Accepted deposit"
                        );
                        (event_source, EventType::AcceptedErc20Deposit(event))
                    }
                }
            }
            Err(ReceivedEventError::InvalidEventSource {
                event_source,
                error,
            }) => {
                if minter.read_state(|s| s.is_processed(&event_source)) {
                    continue;
                }
                (event_source, EventType::InvalidDeposit {
                    event_source,
                    reason: error.to_string(),
                })
            }
            Err(e @ ReceivedEventError::PendingLogEntry(_)) => {
                warn!(error = %e, "Ignoring pending log entry");
                continue;
            }
        };

        let accepted = matches!(payload, EventType::AcceptedErc20Deposit(_));
        if let EventType::InvalidDeposit { reason, .. } = &payload {
            warn!(%event_source, %reason, "Invalid deposit");
        }
        match minter.process_event(payload) {
            Ok(()) if accepted => minter.metrics().record_deposit_accepted(),
            Ok(()) => minter.metrics().record_deposit_invalid(),
            Err(e) => error!(%event_source, error = %e, "Failed to record deposit"),
        }
    }
}

/// Credits every accepted deposit to its principal.
///
/// Deposits of a token other than the current one are quarantined instead.
pub fn mint(minter: &Minter) {
    let _guard = match TimerGuard::new(minter, TaskType::Mint) {
        Ok(guard) => guard,
        Err(e) => {
            debug!(error = %e, "Skipping minting");
            return;
        }
    };

    let (events, token_address) = minter.read_state(|s| {
        (
            s.events_to_mint.values().cloned().collect::<Vec<_>>(),
            s.ckerc20_token.erc20_contract_address,
        )
    });
    for event in events {
        let event_source = event.source();
        let minted = event.erc20_contract_address == token_address;
        let payload = if minted {
            EventType::MintedCkErc20 {
                event_source,
                principal: event.principal,
                amount: event.value,
            }
        } else {
            warn!(
                %event_source,
                token = %event.erc20_contract_address,
                "Quarantining deposit of a token that is no longer supported"
            );
            EventType::QuarantinedDeposit { event_source }
        };
        match minter.process_event(payload) {
            Ok(()) if minted => {
                minter.metrics().record_deposit_minted();
                info!(%event_source, principal = %event.principal, amount = %event.value, "Minted deposit");
            }
            Ok(()) => {}
            Err(e) => error!(%event_source, error = %e, "Failed to record mint"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MinterConfig,
        lifecycle::UpgradeArg,
        numeric::Erc20Value,
        tests::fixtures::{
            HELPER_ADDRESS, TestMinter, deposit_log, deposit_log_from, principal, test_config,
        },
    };
    use alloy::primitives::address;

    const BLOCKED_SENDER: Address = address!("722122dF12D4e14e13Ac3b6895a86e84145b6967");

    fn config_with_spread(max_block_spread: u64) -> MinterConfig {
        MinterConfig {
            max_block_spread,
            ..test_config()
        }
    }

    #[tokio::test]
    async fn test_deposits_are_scraped_and_minted() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(110)));
        rpc.push_log(deposit_log(105, 0, principal(1), 500));
        rpc.push_log(deposit_log(107, 1, principal(2), 700));
        let minter = test.build();

        scrape_logs(&minter).await;
        assert_eq!(minter.last_scraped_block_number(), BlockNumber::new(110));
        assert_eq!(minter.read_state(|s| s.events_to_mint.len()), 2);

        mint(&minter);
        assert_eq!(minter.erc20_balance_of(&principal(1)), Erc20Value::new(500));
        assert_eq!(minter.erc20_balance_of(&principal(2)), Erc20Value::new(700));
        assert_eq!(minter.erc20_balance(), Erc20Value::new(1_200));

        let queries = rpc.log_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].address, HELPER_ADDRESS);
        assert_eq!(
            (queries[0].from_block, queries[0].to_block),
            (BlockNumber::new(101), BlockNumber::new(110))
        );
        assert_eq!(minter.check_audit_log().unwrap().mismatch, None);
    }

    #[tokio::test]
    async fn test_rescraping_does_not_mint_twice() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(110)));
        rpc.push_log(deposit_log(105, 0, principal(1), 500));
        let minter = test.build();

        scrape_logs(&minter).await;
        mint(&minter);
        minter
            .process_event(EventType::Upgrade(UpgradeArg {
                last_erc20_scraped_block_number: Some(BlockNumber::new(100)),
                ..Default::default()
            }))
            .unwrap();
        scrape_logs(&minter).await;
        mint(&minter);
        assert_eq!(minter.erc20_balance_of(&principal(1)), Erc20Value::new(500));
    }

    #[tokio::test]
    async fn test_ranges_respect_max_block_spread() {
        let test = TestMinter::new().with_config(config_with_spread(4));
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(110)));
        let minter = test.build();

        scrape_logs(&minter).await;
        let ranges: Vec<_> = rpc
            .log_queries()
            .iter()
            .map(|q| (q.from_block, q.to_block))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (BlockNumber::new(101), BlockNumber::new(104)),
                (BlockNumber::new(105), BlockNumber::new(108)),
                (BlockNumber::new(109), BlockNumber::new(110)),
            ]
        );
        assert_eq!(minter.last_scraped_block_number(), BlockNumber::new(110));
    }

    #[tokio::test]
    async fn test_too_large_response_halves_the_range() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(108)));
        rpc.set_max_logs_per_response(Some(1));
        rpc.push_log(deposit_log(102, 0, principal(1), 10));
        rpc.push_log(deposit_log(106, 0, principal(2), 20));
        let minter = test.build();

        scrape_logs(&minter).await;
        mint(&minter);
        assert_eq!(minter.erc20_balance_of(&principal(1)), Erc20Value::new(10));
        assert_eq!(minter.erc20_balance_of(&principal(2)), Erc20Value::new(20));
        assert_eq!(minter.last_scraped_block_number(), BlockNumber::new(108));
        assert!(minter.read_state(|s| s.skipped_blocks.is_empty()));
    }

    #[tokio::test]
    async fn test_block_with_too_many_logs_is_skipped() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(101)));
        rpc.set_max_logs_per_response(Some(1));
        rpc.push_log(deposit_log(101, 0, principal(1), 10));
        rpc.push_log(deposit_log(101, 1, principal(2), 20));
        let minter = test.build();

        scrape_logs(&minter).await;
        assert_eq!(minter.last_scraped_block_number(), BlockNumber::new(101));
        assert!(minter.read_state(|s| {
            s.skipped_blocks
                .get(&HELPER_ADDRESS)
                .is_some_and(|blocks| blocks.contains(&BlockNumber::new(101)))
        }));
        assert!(minter.read_state(|s| s.events_to_mint.is_empty()));
    }

    #[tokio::test]
    async fn test_invalid_deposits_are_recorded() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(110)));
        rpc.push_log(deposit_log_from(BLOCKED_SENDER, 103, 0, principal(1), 10));
        rpc.push_log(deposit_log(104, 0, principal(2), 0));
        let minter = test.build();

        scrape_logs(&minter).await;
        let reasons: Vec<String> =
            minter.read_state(|s| s.invalid_events.values().cloned().collect());
        assert_eq!(reasons.len(), 2);
        assert!(reasons.iter().any(|r| r.contains("blocked address")));
        assert!(minter.read_state(|s| s.events_to_mint.is_empty()));
    }

    #[tokio::test]
    async fn test_rpc_failure_keeps_progress() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(None);
        let minter = test.build();

        scrape_logs(&minter).await;
        assert_eq!(minter.last_scraped_block_number(), BlockNumber::new(100));
        assert!(rpc.log_queries().is_empty());

        rpc.set_block_number(Some(BlockNumber::new(120)));
        assert_eq!(
            update_last_observed_block_number(&minter).await,
            Some(BlockNumber::new(120))
        );
        rpc.set_block_number(None);
        assert_eq!(
            update_last_observed_block_number(&minter).await,
            Some(BlockNumber::new(120))
        );
    }

    #[tokio::test]
    async fn test_deposit_of_replaced_token_is_quarantined() {
        let test = TestMinter::new();
        let rpc = test.rpc.clone();
        rpc.set_block_number(Some(BlockNumber::new(110)));
        rpc.push_log(deposit_log(105, 0, principal(1), 500));
        let minter = test.build();

        scrape_logs(&minter).await;
        minter
            .process_event(EventType::Upgrade(UpgradeArg {
                ckerc20_token_address: Some(
                    "0x1111111111111111111111111111111111111111".to_string(),
                ),
                ..Default::default()
            }))
            .unwrap();
        mint(&minter);

        assert_eq!(minter.erc20_balance_of(&principal(1)), Erc20Value::ZERO);
        assert_eq!(minter.read_state(|s| s.quarantined_deposits.len()), 1);
        assert_eq!(minter.check_audit_log().unwrap().mismatch, None);
    }
}
