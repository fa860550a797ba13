use super::parse_principal;
use crate::opts::ConnectionArgs;
use candid::Principal;
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Principal to look up, the caller by default
    #[arg(value_parser = parse_principal)]
    principal: Option<Principal>,
}

impl StatsArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let client = conn.client()?;
        let principal = self.principal.unwrap_or_else(|| client.principal());
        let stats = client.get_user_erc20_stats(principal).await?;

        println!("Stats of {principal}");
        println!("  Deposits:             {}", stats.deposit_count);
        println!("  Transfers sent:       {}", stats.transfers_from);
        println!("  Transfers received:   {}", stats.transfers_in);
        println!("  Withdrawals started:  {}", stats.started_withdrawals);
        println!("  Withdrawals ended:    {}", stats.ended_withdrawals);
        println!("  Balance:              {}", stats.user_balance);
        Ok(())
    }
}
