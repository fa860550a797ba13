use super::parse_principal;
use crate::opts::ConnectionArgs;
use candid::Principal;
use clap::Parser;
use eyre::{Result, eyre};

#[derive(Parser, Debug)]
pub struct BalanceArgs {
    /// Principal to look up instead of the caller
    #[arg(long, value_parser = parse_principal, conflicts_with = "total")]
    of: Option<Principal>,

    /// Total amount held by the minter
    #[arg(long)]
    total: bool,
}

impl BalanceArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let client = conn.client()?;
        let balance = if self.total {
            client.erc20_balance().await?
        } else if let Some(principal) = self.of {
            client.erc20_balance_of(principal).await?
        } else {
            client
                .erc20_my_balance()
                .await?
                .map_err(|e| eyre!("{e}"))?
        };
        println!("{balance}");
        Ok(())
    }
}
