pub mod audit;
pub mod balance;
pub mod events;
pub mod identities;
pub mod run;
pub mod stats;
pub mod status;
pub mod users;
pub mod withdraw;

use candid::Principal;

pub fn parse_principal(text: &str) -> Result<Principal, String> {
    Principal::from_text(text).map_err(|e| e.to_string())
}
