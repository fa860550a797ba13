use clap::Parser;
use opts::{VaultCli, VaultSubcommand};

mod cmd;
mod opts;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = VaultCli::parse();
    let conn = &args.conn;

    match args.cmd {
        VaultSubcommand::Run(cmd) => cmd.run().await,
        VaultSubcommand::Identities(cmd) => cmd.run(),
        VaultSubcommand::Status(cmd) => cmd.run(conn).await,
        VaultSubcommand::Events(cmd) => cmd.run(conn).await,
        VaultSubcommand::Balance(cmd) => cmd.run(conn).await,
        VaultSubcommand::Stats(cmd) => cmd.run(conn).await,
        VaultSubcommand::CreateUser(cmd) => cmd.run(conn).await,
        VaultSubcommand::SetAdmin(cmd) => cmd.run(conn).await,
        VaultSubcommand::Transfer(cmd) => cmd.run(conn).await,
        VaultSubcommand::Withdraw(cmd) => cmd.run(conn).await,
        VaultSubcommand::WithdrawalStatus(cmd) => cmd.run(conn).await,
        VaultSubcommand::CheckAudit(cmd) => cmd.run(conn).await,
    }
}
