//! End-to-end deposit against a local anvil node and a running minter.
//!
//! This test:
//! 1. Checks the minter reports the expected Ethereum address
//! 2. Approves the helper contract and deposits tokens for alice
//! 3. Decodes the ReceivedErc20 event from the deposit receipt
//! 4. Checks a non-admin cannot take over the admin role
//! 5. Polls alice's balance until the deposit is minted
//!
//! Configured through `ALICE_PRIVATE_KEY`, `MINTER_ADDRESS`, `CK_ERC20_DEPOSIT_ADDRESS`
//! and `EDEN_TOKEN_ADDRESS` (or `FORGE_TOKEN_ADDRESS`). With `DFX_NETWORK=local` the
//! minter is reached on the local replica port, otherwise `MINTER_URL` must be set.

use std::time::Duration;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
    sol_types::{SolCall, SolEvent},
};
use eden_vault_minter::{
    VaultClient,
    eth_logs::{IERC20, IErc20DepositHelper, ReceivedErc20, principal_to_bytes32},
    identity::Identity,
    numeric::Erc20Value,
};

const ANVIL_RPC_URL: &str = "http://127.0.0.1:8545";
const LOCAL_MINTER_URL: &str = "http://127.0.0.1:4943";
const DEPOSIT_AMOUNT: u64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_secs(60);
const MAX_POLLS: usize = 10;

fn env_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

/// Minter endpoint for the network named by `DFX_NETWORK`.
fn minter_url_for(network: Option<&str>, explicit: Option<String>) -> Option<String> {
    match network {
        Some("local") => Some(LOCAL_MINTER_URL.to_string()),
        _ => explicit,
    }
}

fn minter_url() -> String {
    minter_url_for(
        std::env::var("DFX_NETWORK").ok().as_deref(),
        std::env::var("MINTER_URL").ok(),
    )
    .expect("set DFX_NETWORK=local or MINTER_URL")
}

fn env_address(name: &str) -> Address {
    env_var(name)
        .parse()
        .unwrap_or_else(|e| panic!("{name} is not an address: {e}"))
}

#[tokio::test]
#[ignore = "requires anvil with the token and helper contracts, and a running minter"]
async fn test_deposit_is_minted() -> eyre::Result<()> {
    let signer: PrivateKeySigner = env_var("ALICE_PRIVATE_KEY").parse()?;
    let minter_address = env_address("MINTER_ADDRESS");
    let helper_address = env_address("CK_ERC20_DEPOSIT_ADDRESS");
    let token_address = std::env::var("EDEN_TOKEN_ADDRESS")
        .or_else(|_| std::env::var("FORGE_TOKEN_ADDRESS"))
        .expect("EDEN_TOKEN_ADDRESS or FORGE_TOKEN_ADDRESS must be set")
        .parse::<Address>()?;

    let minter_url = minter_url();
    let alice = VaultClient::new(&minter_url, Some(Identity::from_name("alice")));
    let bob = VaultClient::new(&minter_url, Some(Identity::from_name("bob")));
    let reported: Address = alice.minter_address().await?.parse()?;
    assert_eq!(reported, minter_address);

    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(ANVIL_RPC_URL.parse()?);

    let amount = U256::from(DEPOSIT_AMOUNT);
    let approve = IERC20::approveCall {
        spender: helper_address,
        amount,
    };
    let tx = TransactionRequest::default()
        .to(token_address)
        .input(approve.abi_encode().into());
    let receipt = provider.send_transaction(tx).await?.get_receipt().await?;
    assert!(receipt.status(), "approve reverted");

    let balance_before = alice.erc20_balance_of(alice.principal()).await?;
    let deposit = IErc20DepositHelper::depositCall {
        erc20Address: token_address,
        amount,
        principal: principal_to_bytes32(&alice.principal()),
    };
    let tx = TransactionRequest::default()
        .to(helper_address)
        .input(deposit.abi_encode().into());
    let receipt = provider.send_transaction(tx).await?.get_receipt().await?;
    assert!(receipt.status(), "deposit reverted");

    let event = receipt
        .inner
        .logs()
        .iter()
        .find(|log| log.topics().first() == Some(&ReceivedErc20::SIGNATURE_HASH))
        .map(|log| ReceivedErc20::decode_log_data(&log.inner.data))
        .expect("ReceivedErc20 event not found")?;
    assert_eq!(event.erc20ContractAddress, token_address);
    assert_eq!(event.amount, amount);
    assert_eq!(event.principal, principal_to_bytes32(&alice.principal()));

    assert!(bob.set_admin(bob.principal()).await?.is_err());

    let expected = balance_before
        .checked_add(Erc20Value::from(DEPOSIT_AMOUNT))
        .expect("balance overflow");
    for _ in 0..MAX_POLLS {
        let balance = alice.erc20_balance_of(alice.principal()).await?;
        println!("alice balance: {balance}, expecting {expected}");
        if balance >= expected {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    eyre::bail!("deposit was not minted after {MAX_POLLS} polls")
}

#[test]
fn test_minter_url_follows_network() {
    assert_eq!(
        minter_url_for(Some("local"), Some("http://elsewhere:1".into())).as_deref(),
        Some(LOCAL_MINTER_URL)
    );
    assert_eq!(
        minter_url_for(Some("ic"), Some("https://vault.example".into())).as_deref(),
        Some("https://vault.example")
    );
    assert_eq!(minter_url_for(None, None), None);
}
