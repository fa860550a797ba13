use super::parse_principal;
use crate::opts::ConnectionArgs;
use candid::Principal;
use clap::Parser;
use eden_vault_minter::{endpoints::CreateNewUserArg, users::UserId};
use eyre::{Result, eyre};

#[derive(Parser, Debug)]
pub struct CreateUserArgs {
    /// Principal of the new user
    #[arg(value_parser = parse_principal)]
    principal: Principal,

    /// 12-byte user id, hex-encoded
    user_id: UserId,
}

impl CreateUserArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        conn.client()?
            .create_new_user(CreateNewUserArg {
                principal: self.principal,
                user_id: self.user_id,
            })
            .await?
            .map_err(|e| eyre!("{e}"))?;
        println!("Created user {} ({})", self.principal, self.user_id);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct SetAdminArgs {
    /// Principal of the new admin
    #[arg(value_parser = parse_principal)]
    admin: Principal,
}

impl SetAdminArgs {
    pub async fn run(self, conn: &ConnectionArgs) -> Result<()> {
        conn.client()?
            .set_admin(self.admin)
            .await?
            .map_err(|e| eyre!("{e}"))?;
        println!("Admin is now {}", self.admin);
        Ok(())
    }
}
