use crate::cmd::{
    audit::CheckAuditArgs, balance::BalanceArgs, events::EventsArgs, identities::IdentitiesArgs,
    run::RunArgs, stats::StatsArgs, status::StatusArgs, users::{CreateUserArgs, SetAdminArgs},
    withdraw::{TransferArgs, WithdrawArgs, WithdrawalStatusArgs},
};
use clap::{Args, Parser, Subcommand};
use eden_vault_minter::{VaultClient, identity::Identity};

#[derive(Parser, Debug)]
#[command(name = "eden-vault")]
#[command(version, about = "Run and operate the eden vault ERC20 minter", long_about = None)]
pub struct VaultCli {
    #[command(flatten)]
    pub conn: ConnectionArgs,

    #[command(subcommand)]
    pub cmd: VaultSubcommand,
}

/// How to reach the minter and who to call it as.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Minter API URL
    #[arg(long, global = true, env = "EDEN_VAULT_URL", default_value = "http://127.0.0.1:4943")]
    pub url: String,

    /// Caller identity: `anonymous`, a deterministic name (alice, bob, charle, ...)
    /// or a hex-encoded 32-byte Ed25519 seed
    #[arg(
        long,
        global = true,
        env = "EDEN_VAULT_IDENTITY",
        default_value = "anonymous",
        hide_env_values = true
    )]
    pub identity: String,
}

impl ConnectionArgs {
    pub fn client(&self) -> eyre::Result<VaultClient> {
        let identity = match self.identity.as_str() {
            "anonymous" => None,
            seed if is_hex_seed(seed) => Some(Identity::from_hex_seed(seed)?),
            name => Some(Identity::from_name(name)),
        };
        Ok(VaultClient::new(&self.url, identity))
    }
}

fn is_hex_seed(value: &str) -> bool {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    digits.len() == 64 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Subcommand, Debug)]
pub enum VaultSubcommand {
    /// Run the minter until ctrl-c
    Run(RunArgs),

    /// Print the deterministic test identities and their principals
    Identities(IdentitiesArgs),

    /// Show the minter configuration and sync progress
    Status(StatusArgs),

    /// List recorded events
    Events(EventsArgs),

    /// Show a balance, or the total held by the minter
    Balance(BalanceArgs),

    /// Show the deposit, transfer and withdrawal counts of a principal
    Stats(StatsArgs),

    /// Register a user (admin only)
    CreateUser(CreateUserArgs),

    /// Hand the admin role to another principal (admin only)
    SetAdmin(SetAdminArgs),

    /// Move balance to another registered user
    Transfer(TransferArgs),

    /// Withdraw balance to an Ethereum address
    Withdraw(WithdrawArgs),

    /// Look up withdrawals by id, sender or recipient
    WithdrawalStatus(WithdrawalStatusArgs),

    /// Replay the event log and compare it with the live state
    CheckAudit(CheckAuditArgs),
}
