//! Typed client of the minter's HTTP API.

use crate::{
    endpoints::{
        AuditReport, CallError, CreateNewUserArg, GetEventsArg, GetEventsResult, MinterInfo,
        RetrieveErc20Request, RetrieveErc20Status, TransferErc20Arg, TransferErc20Error,
        UserError, UserStats, WithdrawErc20Arg, WithdrawErc20Error, WithdrawalDetail,
        WithdrawalSearchParameter,
    },
    identity::{Envelope, Identity},
    minter::now_nanos,
    numeric::Erc20Value,
};
use candid::Principal;
use eyre::{WrapErr, eyre};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Lifetime given to the envelopes sent by the client.
const INGRESS_EXPIRY_NANOS: u64 = 4 * 60 * 1_000_000_000;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Calls minter methods as `identity`, or anonymously.
#[derive(Clone, Debug)]
pub struct VaultClient {
    http: reqwest::Client,
    url: String,
    identity: Option<Identity>,
}

impl VaultClient {
    pub fn new(url: impl Into<String>, identity: Option<Identity>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            identity,
        }
    }

    /// Principal the calls are made as.
    pub fn principal(&self) -> Principal {
        self.identity
            .as_ref()
            .map_or_else(Principal::anonymous, Identity::principal)
    }

    async fn call<A, T, E>(&self, method: &str, arg: &A) -> eyre::Result<Result<T, E>>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
        E: DeserializeOwned,
    {
        let arg = serde_json::to_string(arg)?;
        let ingress_expiry = now_nanos().saturating_add(INGRESS_EXPIRY_NANOS);
        let envelope = match &self.identity {
            Some(identity) => identity.sign_call(method, arg, ingress_expiry),
            None => Envelope::unsigned(arg, ingress_expiry),
        };
        let response = self
            .http
            .post(format!("{}/api/v1/call/{method}", self.url))
            .json(&envelope)
            .send()
            .await
            .wrap_err_with(|| format!("failed to call {method}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|body| body.error)
                .unwrap_or(body);
            return Err(eyre!("{method} failed with {status}: {message}"));
        }
        response
            .json()
            .await
            .wrap_err_with(|| format!("invalid response to {method}"))
    }

    async fn query<A, T>(&self, method: &str, arg: &A) -> eyre::Result<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let result: Result<T, serde_json::Value> = self.call(method, arg).await?;
        result.map_err(|e| eyre!("{method} returned an error: {e}"))
    }

    pub async fn minter_address(&self) -> eyre::Result<String> {
        self.query("minter_address", &()).await
    }

    pub async fn smart_contract_address(&self) -> eyre::Result<String> {
        self.query("smart_contract_address", &()).await
    }

    pub async fn whoami(&self) -> eyre::Result<Principal> {
        self.query("whoami", &()).await
    }

    pub async fn get_minter_info(&self) -> eyre::Result<MinterInfo> {
        self.query("get_minter_info", &()).await
    }

    pub async fn get_events(&self, start: u64, length: u64) -> eyre::Result<GetEventsResult> {
        self.query("get_events", &GetEventsArg { start, length }).await
    }

    pub async fn retrieve_eth_status(&self, withdrawal_id: u64) -> eyre::Result<RetrieveErc20Status> {
        self.query("retrieve_eth_status", &withdrawal_id).await
    }

    pub async fn withdrawal_status(
        &self,
        parameter: WithdrawalSearchParameter,
    ) -> eyre::Result<Result<Vec<WithdrawalDetail>, String>> {
        self.call("withdrawal_status", &parameter).await
    }

    pub async fn is_address_blocked(&self, address: &str) -> eyre::Result<bool> {
        self.query("is_address_blocked", address).await
    }

    pub async fn check_audit_log(&self) -> eyre::Result<Result<AuditReport, String>> {
        self.call("check_audit_log", &()).await
    }

    pub async fn erc20_balance(&self) -> eyre::Result<Erc20Value> {
        self.query("erc20_balance", &()).await
    }

    pub async fn erc20_balance_of(&self, principal: Principal) -> eyre::Result<Erc20Value> {
        self.query("erc20_balance_of", &principal).await
    }

    pub async fn erc20_my_balance(&self) -> eyre::Result<Result<Erc20Value, CallError>> {
        self.call("erc20_my_balance", &()).await
    }

    pub async fn get_user_erc20_stats(&self, principal: Principal) -> eyre::Result<UserStats> {
        self.query("get_user_erc20_stats", &principal).await
    }

    pub async fn create_new_user(
        &self,
        arg: CreateNewUserArg,
    ) -> eyre::Result<Result<(), UserError>> {
        self.call("create_new_user", &arg).await
    }

    pub async fn set_admin(&self, admin: Principal) -> eyre::Result<Result<(), UserError>> {
        self.call("set_admin", &admin).await
    }

    pub async fn erc20_transfer(
        &self,
        arg: TransferErc20Arg,
    ) -> eyre::Result<Result<(), TransferErc20Error>> {
        self.call("erc20_transfer", &arg).await
    }

    pub async fn withdraw_erc20(
        &self,
        arg: WithdrawErc20Arg,
    ) -> eyre::Result<Result<RetrieveErc20Request, WithdrawErc20Error>> {
        self.call("withdraw_erc20", &arg).await
    }

    /// Health of the minter, as reported by `GET /health`.
    pub async fn health(&self) -> eyre::Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/health", self.url))
            .send()
            .await
            .wrap_err("failed to reach the minter")?;
        Ok(response.error_for_status()?.json().await?)
    }
}
