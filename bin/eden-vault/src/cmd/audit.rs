use crate::opts::ConnectionArgs;
use clap::Parser;
use eyre::{Result, bail, eyre};

#[derive(Parser, Debug)]
pub struct CheckAuditArgs {}

impl CheckAuditArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let report = conn
            .client()?
            .check_audit_log()
            .await?
            .map_err(|e| eyre!("{e}"))?;
        if let Some(mismatch) = report.mismatch {
            bail!("replay of {} events differs from the live state: {mismatch}", report.event_count);
        }
        println!("Replayed {} events, state matches", report.event_count);
        Ok(())
    }
}
