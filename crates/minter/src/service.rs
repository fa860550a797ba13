//! Long-running minter: the deposit scraper, the withdrawal processor and the API.

use crate::{
    api,
    config::MinterConfig,
    deposit::{mint, scrape_logs},
    minter::Minter,
    rpc::{AlloyRpcClient, EthRpc},
    storage::EventLog,
    withdraw::process_withdrawals,
};
use eyre::WrapErr;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

/// Periods of the background tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskIntervals {
    pub scrape: Duration,
    pub withdrawal: Duration,
    /// Used instead of `withdrawal` while transactions are still pending.
    pub withdrawal_retry: Duration,
}

impl From<&MinterConfig> for TaskIntervals {
    fn from(config: &MinterConfig) -> Self {
        Self {
            scrape: config.scrape_interval(),
            withdrawal: config.withdrawal_interval(),
            withdrawal_retry: config.withdrawal_retry_interval(),
        }
    }
}

/// Starts the minter described by `config` and runs it until ctrl-c.
pub async fn run(config: MinterConfig) -> eyre::Result<()> {
    let rpc = AlloyRpcClient::new(&config.rpc_urls()).wrap_err("failed to set up the RPC client")?;
    let log = EventLog::open(&config.event_log_path).wrap_err_with(|| {
        format!(
            "failed to open the event log at {}",
            config.event_log_path.display()
        )
    })?;
    let rpc: Arc<dyn EthRpc> = Arc::new(rpc);
    let minter =
        Minter::initialize(&config, log, rpc).wrap_err("failed to initialize the minter")?;
    info!(
        address = %minter.minter_address(),
        api = %config.api_address,
        "Minter started"
    );

    run_minter(minter, &config, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "Failed to listen for ctrl-c");
        }
        info!("Shutting down");
    })
    .await
}

/// Runs the background tasks and the API of `minter` until `shutdown` resolves.
pub async fn run_minter(
    minter: Minter,
    config: &MinterConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let tasks = spawn_tasks(&minter, TaskIntervals::from(config), stop_rx.clone());

    let mut api_stop = stop_rx;
    let api = tokio::spawn(api::serve(minter.clone(), config.api_address, async move {
        let _ = api_stop.changed().await;
    }));

    shutdown.await;
    let _ = stop_tx.send(true);
    let served = api.await.wrap_err("API task panicked")?;
    for task in tasks {
        if let Err(err) = task.await {
            warn!(%err, "Background task failed");
        }
    }
    minter
        .shutdown()
        .wrap_err("failed to record the last synced block")?;
    served.wrap_err("API server failed")
}

/// Spawns the scraping and withdrawal loops. They stop once `stop` turns true.
pub fn spawn_tasks(
    minter: &Minter,
    intervals: TaskIntervals,
    stop: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(scrape_loop(minter.clone(), intervals.scrape, stop.clone())),
        tokio::spawn(withdrawal_loop(minter.clone(), intervals, stop)),
    ]
}

async fn scrape_loop(minter: Minter, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scrape_logs(&minter).await;
                mint(&minter);
            }
            _ = stop.changed() => break,
        }
    }
}

async fn withdrawal_loop(minter: Minter, intervals: TaskIntervals, mut stop: watch::Receiver<bool>) {
    let mut delay = intervals.withdrawal;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                delay = if process_withdrawals(&minter).await {
                    intervals.withdrawal_retry
                } else {
                    intervals.withdrawal
                };
            }
            _ = stop.changed() => break,
        }
    }
}
