use super::parse_principal;
use crate::opts::ConnectionArgs;
use candid::Principal;
use clap::{ArgGroup, Parser};
use eden_vault_minter::{
    endpoints::{TransferErc20Arg, WithdrawErc20Arg, WithdrawalSearchParameter},
    numeric::Erc20Value,
};
use eyre::{Result, eyre};

#[derive(Parser, Debug)]
pub struct TransferArgs {
    /// Registered user receiving the amount
    #[arg(value_parser = parse_principal)]
    to: Principal,

    amount: Erc20Value,
}

impl TransferArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        conn.client()?
            .erc20_transfer(TransferErc20Arg {
                receiver: self.to,
                amount: self.amount,
            })
            .await?
            .map_err(|e| eyre!("{e}"))?;
        println!("Transferred {} to {}", self.amount, self.to);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct WithdrawArgs {
    /// Ethereum address receiving the tokens
    recipient: String,

    /// Amount to withdraw, the withdrawal fee is charged on top
    amount: Erc20Value,
}

impl WithdrawArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let request = conn
            .client()?
            .withdraw_erc20(WithdrawErc20Arg {
                amount: self.amount,
                recipient: self.recipient,
            })
            .await?
            .map_err(|e| eyre!("{e}"))?;
        println!("Withdrawal {} accepted", request.id);
        println!("  Amount:          {}", request.withdrawal_amount);
        println!("  Fee:             {}", request.withdraw_vault_fee_value);
        println!("  Destination:     {}", request.destination);
        println!("  Max gas fee:     {} wei", request.max_transaction_fee);
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("search").required(true).args(["id", "sender", "recipient"])))]
pub struct WithdrawalStatusArgs {
    /// Withdrawal id
    #[arg(long)]
    id: Option<u64>,

    /// Principal that requested the withdrawals
    #[arg(long, value_parser = parse_principal)]
    sender: Option<Principal>,

    /// Ethereum address receiving the withdrawals
    #[arg(long)]
    recipient: Option<String>,
}

impl WithdrawalStatusArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        let client = conn.client()?;
        let parameter = match (self.id, self.sender, self.recipient) {
            (Some(id), _, _) => {
                println!("Withdrawal {id}: {}", client.retrieve_eth_status(id).await?);
                WithdrawalSearchParameter::ByWithdrawalId(id)
            }
            (None, Some(sender), _) => WithdrawalSearchParameter::BySender(sender),
            (None, None, Some(recipient)) => WithdrawalSearchParameter::ByRecipient(recipient),
            (None, None, None) => return Err(eyre!("no search parameter given")),
        };
        let details = client
            .withdrawal_status(parameter)
            .await?
            .map_err(|e| eyre!("{e}"))?;
        if details.is_empty() {
            println!("No withdrawals found");
        }
        for detail in details {
            println!(
                "{:>6} {} {} -> {} {:?}",
                detail.withdrawal_id,
                detail.withdrawal_amount,
                detail.token_symbol,
                detail.recipient_address,
                detail.status
            );
        }
        Ok(())
    }
}
