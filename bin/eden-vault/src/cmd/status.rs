use crate::opts::ConnectionArgs;
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print the raw JSON instead
    #[arg(long)]
    json: bool,
}

impl StatusArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let client = conn.client()?;
        let info = client.get_minter_info().await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }

        println!("Minter Status");
        println!("=============");
        println!();
        println!("  Network:             {} (chain id {})", info.ethereum_network, info.chain_id);
        println!("  Minter address:      {}", info.minter_address);
        println!(
            "  Helper contract:     {}",
            info.erc20_helper_contract_address.as_deref().unwrap_or("N/A")
        );
        println!(
            "  Token:               {} ({})",
            info.ckerc20_token_symbol, info.ckerc20_token_address
        );
        println!("  Admin:               {}", info.admin);
        println!("  Minimum withdrawal:  {}", info.minimum_withdrawal_amount);
        println!("  Withdrawal fee:      {}", info.withdraw_fee_value);
        println!();
        println!("Sync:");
        println!("  Block height tag:    {}", info.ethereum_block_height);
        println!("  First scraped block: {}", info.first_scraped_block_number);
        println!("  Last scraped block:  {}", info.last_erc20_scraped_block_number);
        match info.last_observed_block_number {
            Some(block) => println!("  Last observed block: {block}"),
            None => println!("  Last observed block: unknown"),
        }
        println!();
        println!("Balances:");
        println!("  Total held:          {}", info.total_erc20_balance);
        println!("  Pending withdrawals: {}", info.pending_withdrawals);
        println!("  Events:              {}", info.total_event_count);
        if let Some(fee) = info.last_gas_fee_estimate {
            println!(
                "  Last gas estimate:   max {} / priority {} wei per gas",
                fee.max_fee_per_gas, fee.max_priority_fee_per_gas
            );
        }

        Ok(())
    }
}
