//! HTTP surface of the minter.
//!
//! Every endpoint is reached through `POST /api/v1/call/{method}` with a JSON
//! [`Envelope`] body. The envelope's signature authenticates the caller, whose
//! principal is then passed to the [`Minter`] method. A signed envelope is accepted
//! once; replaying it before it expires is refused. Method results are returned
//! as `{"Ok": ..}` or `{"Err": ..}`; transport level failures use a 4xx status
//! with an `{"error": ..}` body.

use crate::{
    endpoints::{
        CreateNewUserArg, GetEventsArg, TransferErc20Arg, WithdrawErc20Arg,
        WithdrawalSearchParameter,
    },
    identity::{Envelope, IdentityError, call_message, verify_call},
    minter::{Minter, now_nanos},
};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use candid::Principal;
use serde::{Serialize, de::DeserializeOwned};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{collections::BTreeSet, future::Future, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Envelopes may not expire further than this in the future.
pub const MAX_INGRESS_EXPIRY_NANOS: u64 = 5 * 60 * 1_000_000_000;

/// Bound on the signed calls remembered until they expire.
pub const MAX_SEEN_CALLS: usize = 100_000;

/// Methods served under `/api/v1/call/{method}`.
pub const METHODS: [&str; 17] = [
    "minter_address",
    "smart_contract_address",
    "retrieve_eth_status",
    "withdrawal_status",
    "withdraw_erc20",
    "is_address_blocked",
    "get_minter_info",
    "get_events",
    "check_audit_log",
    "set_admin",
    "erc20_my_balance",
    "erc20_balance_of",
    "get_user_erc20_stats",
    "erc20_balance",
    "erc20_transfer",
    "create_new_user",
    "whoami",
];

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown method {0}")]
    UnknownMethod(String),
    #[error("invalid caller: {0}")]
    InvalidCaller(#[from] IdentityError),
    #[error("call expired at {expiry}, now is {now}")]
    Expired { expiry: u64, now: u64 },
    #[error("ingress expiry {expiry} is too far in the future")]
    ExpiryTooFar { expiry: u64 },
    #[error("call was already submitted")]
    Replayed,
    #[error("too many calls in flight, retry later")]
    Overloaded,
    #[error("invalid argument for {method}: {reason}")]
    InvalidArgument { method: String, reason: String },
    #[error("failed to encode the result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownMethod(_) => StatusCode::NOT_FOUND,
            Self::InvalidCaller(_) => StatusCode::UNAUTHORIZED,
            Self::Expired { .. } | Self::ExpiryTooFar { .. } | Self::InvalidArgument { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Replayed => StatusCode::CONFLICT,
            Self::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encode(_) | Self::Bind { .. } | Self::Serve(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!(error = %self, "Rejected API call");
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Signed calls accepted so far, kept until their ingress expiry passes.
///
/// A signed envelope stays valid until it expires, so each one is accepted once.
#[derive(Debug, Default)]
struct SeenCalls {
    calls: BTreeSet<(u64, Principal, [u8; 32])>,
}

impl SeenCalls {
    fn insert(
        &mut self,
        caller: Principal,
        message: [u8; 32],
        expiry: u64,
        now: u64,
    ) -> Result<(), ApiError> {
        while self.calls.first().is_some_and(|(expiry, _, _)| *expiry < now) {
            self.calls.pop_first();
        }
        let key = (expiry, caller, message);
        if self.calls.contains(&key) {
            return Err(ApiError::Replayed);
        }
        if self.calls.len() >= MAX_SEEN_CALLS {
            return Err(ApiError::Overloaded);
        }
        self.calls.insert(key);
        Ok(())
    }

    fn len(&self) -> usize {
        self.calls.len()
    }
}

#[derive(Clone)]
struct ApiState {
    minter: Minter,
    seen_calls: Arc<Mutex<SeenCalls>>,
}

pub fn router(minter: Minter) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/call/{method}", post(handle_call))
        .with_state(ApiState {
            minter,
            seen_calls: Arc::default(),
        })
}

/// Serves the API on `addr` until `shutdown` resolves.
pub async fn serve(
    minter: Minter,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ApiError::Bind { addr, source })?;
    serve_on(listener, minter, shutdown).await
}

/// Serves the API on an already bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: TcpListener,
    minter: Minter,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "API listening");
    }
    axum::serve(listener, router(minter).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ApiError::Serve)
}

async fn health(State(api): State<ApiState>) -> impl IntoResponse {
    let last_scraped = api.minter.last_scraped_block_number();
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "last_scraped_block_number": last_scraped })),
    )
}

async fn handle_call(
    State(api): State<ApiState>,
    Path(method): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<Json<Value>, ApiError> {
    if !METHODS.contains(&method.as_str()) {
        return Err(ApiError::UnknownMethod(method));
    }
    let now = now_nanos();
    check_ingress_expiry(envelope.ingress_expiry, now)?;
    let caller = verify_call(&method, &envelope)?;
    if envelope.signature.is_some() {
        let message = call_message(&method, envelope.ingress_expiry, &envelope.arg);
        api.seen_calls
            .lock()
            .insert(caller, message, envelope.ingress_expiry, now)
            .inspect_err(|err| warn!(%method, %caller, %err, "Rejected signed call"))?;
    }
    debug!(%method, caller = %caller, "API call");
    dispatch(&api.minter, caller, &method, &envelope.arg)
        .await
        .map(Json)
}

fn check_ingress_expiry(expiry: u64, now: u64) -> Result<(), ApiError> {
    if expiry < now {
        return Err(ApiError::Expired { expiry, now });
    }
    if expiry - now > MAX_INGRESS_EXPIRY_NANOS {
        return Err(ApiError::ExpiryTooFar { expiry });
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(method: &str, arg: &str) -> Result<T, ApiError> {
    let arg = if arg.trim().is_empty() { "null" } else { arg };
    serde_json::from_str(arg).map_err(|e| ApiError::InvalidArgument {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn ok<T: Serialize>(value: T) -> Result<Value, ApiError> {
    encode(Ok::<T, ()>(value))
}

fn encode<T: Serialize, E: Serialize>(result: Result<T, E>) -> Result<Value, ApiError> {
    Ok(serde_json::to_value(result)?)
}

async fn dispatch(
    minter: &Minter,
    caller: Principal,
    method: &str,
    arg: &str,
) -> Result<Value, ApiError> {
    match method {
        "minter_address" => ok(minter.minter_address().to_string()),
        "smart_contract_address" => ok(minter.smart_contract_address()),
        "retrieve_eth_status" => ok(minter.retrieve_eth_status(decode::<u64>(method, arg)?)),
        "withdrawal_status" => encode(
            minter.withdrawal_status(decode::<WithdrawalSearchParameter>(method, arg)?),
        ),
        "withdraw_erc20" => encode(
            minter
                .withdraw_erc20(caller, decode::<WithdrawErc20Arg>(method, arg)?)
                .await,
        ),
        "is_address_blocked" => {
            ok(minter.is_address_blocked(&decode::<String>(method, arg)?))
        }
        "get_minter_info" => ok(minter.get_minter_info()),
        "get_events" => ok(minter.get_events(decode::<GetEventsArg>(method, arg)?)),
        "check_audit_log" => encode(minter.check_audit_log().map_err(|e| e.to_string())),
        "set_admin" => encode(minter.set_admin(caller, decode::<Principal>(method, arg)?)),
        "erc20_my_balance" => encode(minter.erc20_my_balance(caller)),
        "erc20_balance_of" => ok(minter.erc20_balance_of(&decode::<Principal>(method, arg)?)),
        "get_user_erc20_stats" => {
            ok(minter.get_user_erc20_stats(&decode::<Principal>(method, arg)?))
        }
        "erc20_balance" => ok(minter.erc20_balance()),
        "erc20_transfer" => {
            encode(minter.erc20_transfer(caller, decode::<TransferErc20Arg>(method, arg)?))
        }
        "create_new_user" => {
            encode(minter.create_new_user(caller, decode::<CreateNewUserArg>(method, arg)?))
        }
        "whoami" => ok(caller),
        _ => Err(ApiError::UnknownMethod(method.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::Identity,
        numeric::{BlockNumber, Erc20Value},
        tests::fixtures::{TestMinter, admin, fund_user, principal},
        users::UserId,
    };

    async fn spawn_api(minter: Minter) -> (String, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(serve_on(listener, minter, async move {
            let _ = rx.await;
        }));
        (url, tx)
    }

    async fn post(url: &str, method: &str, envelope: &Envelope) -> (StatusCode, Value) {
        let response = reqwest::Client::new()
            .post(format!("{url}/api/v1/call/{method}"))
            .json(envelope)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    fn expiry() -> u64 {
        now_nanos() + 60 * 1_000_000_000
    }

    #[test]
    fn test_ingress_expiry_window() {
        let now = 1_000_000_000_000;
        assert!(check_ingress_expiry(now, now).is_ok());
        assert!(check_ingress_expiry(now + MAX_INGRESS_EXPIRY_NANOS, now).is_ok());
        assert!(matches!(
            check_ingress_expiry(now - 1, now),
            Err(ApiError::Expired { .. })
        ));
        assert!(matches!(
            check_ingress_expiry(now + MAX_INGRESS_EXPIRY_NANOS + 1, now),
            Err(ApiError::ExpiryTooFar { .. })
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::UnknownMethod("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidCaller(IdentityError::IncompleteEnvelope).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Expired { expiry: 0, now: 1 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Replayed.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_seen_calls_are_accepted_once_until_expiry() {
        let mut seen = SeenCalls::default();
        let message = call_message("erc20_transfer", 100, "{}");
        seen.insert(principal(1), message, 100, 50).unwrap();
        assert!(matches!(
            seen.insert(principal(1), message, 100, 60),
            Err(ApiError::Replayed)
        ));
        // Same message from another caller.
        seen.insert(principal(2), message, 100, 60).unwrap();
        assert_eq!(seen.len(), 2);

        // Expired entries are dropped on the next insert.
        let later = call_message("erc20_transfer", 300, "{}");
        seen.insert(principal(1), later, 300, 101).unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_calls_are_bounded() {
        let mut seen = SeenCalls::default();
        for i in 0..MAX_SEEN_CALLS as u64 {
            seen.insert(principal(1), [0; 32], 1_000 + i, 0).unwrap();
        }
        assert!(matches!(
            seen.insert(principal(1), [1; 32], 1_000, 0),
            Err(ApiError::Overloaded)
        ));
        // Room is made again once calls expire.
        seen.insert(principal(1), [1; 32], u64::MAX, 1_010).unwrap();
        assert_eq!(seen.len(), MAX_SEEN_CALLS - 9);
    }

    #[test]
    fn test_empty_argument_decodes_as_null() {
        assert_eq!(decode::<Option<u64>>("m", "").unwrap(), None);
        assert_eq!(decode::<u64>("m", "7").unwrap(), 7);
        assert!(matches!(
            decode::<u64>("m", "\"seven\""),
            Err(ApiError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_signed_call_reaches_the_minter() {
        let minter = TestMinter::new().build();
        let bob = Identity::from_name("bob");
        assert_ne!(bob.principal(), admin());
        fund_user(&minter, bob.principal(), 40);
        let (url, _shutdown) = spawn_api(minter).await;

        let envelope = bob.sign_call("erc20_my_balance", "null", expiry());
        let (status, body) = post(&url, "erc20_my_balance", &envelope).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "Ok": Erc20Value::new(40) }));

        let (_, body) = post(&url, "whoami", &bob.sign_call("whoami", "", expiry())).await;
        assert_eq!(body, json!({ "Ok": bob.principal() }));
    }

    #[tokio::test]
    async fn test_signed_transfer_is_applied_once() {
        let minter = TestMinter::new().build();
        let bob = Identity::from_name("bob");
        let charle = Identity::from_name("charle");
        fund_user(&minter, bob.principal(), 100);
        minter
            .create_new_user(
                admin(),
                CreateNewUserArg {
                    principal: charle.principal(),
                    user_id: UserId([0xc4; 12]),
                },
            )
            .unwrap();
        let (url, _shutdown) = spawn_api(minter.clone()).await;

        let arg = serde_json::to_string(&TransferErc20Arg {
            receiver: charle.principal(),
            amount: Erc20Value::new(30),
        })
        .unwrap();
        let envelope = bob.sign_call("erc20_transfer", arg, expiry());
        let (status, body) = post(&url, "erc20_transfer", &envelope).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "Ok": null }));

        for _ in 0..2 {
            let (status, body) = post(&url, "erc20_transfer", &envelope).await;
            assert_eq!(status, StatusCode::CONFLICT);
            assert!(body["error"].as_str().unwrap().contains("already submitted"));
        }
        assert_eq!(minter.erc20_balance_of(&bob.principal()), Erc20Value::new(70));
        assert_eq!(minter.erc20_balance_of(&charle.principal()), Erc20Value::new(30));
    }

    #[tokio::test]
    async fn test_rejected_calls() {
        let (url, _shutdown) = spawn_api(TestMinter::new().build()).await;
        let alice = Identity::from_name("alice");

        let envelope = Envelope::unsigned("null", expiry());
        let (status, _) = post(&url, "no_such_method", &envelope).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = post(&url, "erc20_balance", &Envelope::unsigned("null", 1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("expired"));

        // Signed for another method.
        let mut envelope = alice.sign_call("erc20_balance", "null", expiry());
        let (status, _) = post(&url, "erc20_my_balance", &envelope).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        envelope.signature = None;
        let (status, _) = post(&url, "erc20_balance", &envelope).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let envelope = Envelope::unsigned("\"one\"", expiry());
        let (status, _) = post(&url, "retrieve_eth_status", &envelope).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_anonymous_caller_gets_method_error() {
        let (url, _shutdown) = spawn_api(TestMinter::new().build()).await;
        let envelope = Envelope::unsigned("null", expiry());
        let (status, body) = post(&url, "erc20_my_balance", &envelope).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "Err": "AnonymousCaller" }));
    }

    #[tokio::test]
    async fn test_health() {
        let (url, _shutdown) = spawn_api(TestMinter::new().build()).await;
        let body: Value = reqwest::get(format!("{url}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(
            body["last_scraped_block_number"],
            json!(BlockNumber::new(100))
        );
    }
}
