use clap::Parser;
use eden_vault_minter::identity::{Identity, default_identities};
use eyre::Result;

#[derive(Parser, Debug)]
pub struct IdentitiesArgs {
    /// Additional identity names to derive
    names: Vec<String>,
}

impl IdentitiesArgs {
    pub fn run(self) -> Result<()> {
        let extra = self.names.iter().map(|name| Identity::from_name(name));
        for identity in default_identities().into_iter().chain(extra) {
            println!("{:<10} {}", identity.name(), identity.principal());
        }
        Ok(())
    }
}
