//! Counterparty Bank Gateway
//!
//! Synchronous RPC client for the prepare / commit / cancel handshake.
//! All calls are idempotent by transfer id on the counterparty side.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use super::types::{PrepareVote, SettlementPayload};
use crate::config::CounterpartyConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Counterparty request timed out")]
    Timeout,

    #[error("Counterparty unavailable: {0}")]
    Unavailable(String),

    #[error("Counterparty rejected request with HTTP {0}")]
    Rejected(u16),

    #[error("Invalid response from counterparty: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::Unavailable(e.to_string())
        }
    }
}

/// Counterparty gateway contract
///
/// The gateway is stateless: it never touches the ledger or the transfer store.
#[async_trait]
pub trait CounterpartyGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    /// Ask the counterparty to vote on the transfer
    async fn prepare(&self, payload: &SettlementPayload) -> Result<PrepareVote, GatewayError>;

    /// Tell the counterparty to apply the prepared transfer
    async fn commit(&self, payload: &SettlementPayload) -> Result<(), GatewayError>;

    /// Tell the counterparty to drop the transfer (best-effort)
    async fn cancel(&self, payload: &SettlementPayload) -> Result<(), GatewayError>;
}

/// HTTP gateway (`POST {base_url}/prepare|/commit|/cancel`)
pub struct HttpGateway {
    client: Client,
    base_url: String,
    /// Bearer credential, swappable without restarting
    token: ArcSwap<String>,
}

impl HttpGateway {
    pub fn new(config: &CounterpartyConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: ArcSwap::from_pointee(config.api_token.clone()),
        })
    }

    /// Replace the bearer credential used for subsequent calls
    pub fn rotate_credential(&self, token: impl Into<String>) {
        self.token.store(Arc::new(token.into()));
        debug!("Counterparty credential rotated");
    }

    pub fn credential(&self) -> Arc<String> {
        self.token.load_full()
    }

    async fn post(
        &self,
        path: &'static str,
        payload: &SettlementPayload,
    ) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/{}", self.base_url, path);
        let token = self.token.load_full();

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        debug!(
            transfer_id = %payload.transfer_id,
            path,
            status = status.as_u16(),
            "Counterparty responded"
        );

        if !status.is_success() {
            return Err(GatewayError::Rejected(status.as_u16()));
        }
        Ok(response)
    }

    async fn post_json<R: DeserializeOwned>(
        &self,
        path: &'static str,
        payload: &SettlementPayload,
    ) -> Result<R, GatewayError> {
        let response = self.post(path, payload).await?;
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl CounterpartyGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn prepare(&self, payload: &SettlementPayload) -> Result<PrepareVote, GatewayError> {
        match self.post_json::<PrepareVote>("prepare", payload).await {
            // A 4xx on prepare is an explicit refusal, not an outage
            Err(GatewayError::Rejected(code))
                if StatusCode::from_u16(code).is_ok_and(|s| s.is_client_error()) =>
            {
                Ok(PrepareVote::decline(format!("HTTP {}", code)))
            }
            other => other,
        }
    }

    async fn commit(&self, payload: &SettlementPayload) -> Result<(), GatewayError> {
        self.post("commit", payload).await.map(|_| ())
    }

    async fn cancel(&self, payload: &SettlementPayload) -> Result<(), GatewayError> {
        self.post("cancel", payload).await.map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{AccountNumber, TransferId};
    use crate::money::Currency;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::post;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn payload() -> SettlementPayload {
        SettlementPayload {
            transfer_id: TransferId::new(),
            from_account: AccountNumber::parse("111000100000000011").unwrap(),
            to_account: AccountNumber::parse("222000100000000099").unwrap(),
            amount: dec!(400),
            currency: Currency::new("RSD").unwrap(),
            purpose: None,
            reference_number: None,
            payment_code: None,
        }
    }

    /// Fake counterparty bank on an ephemeral port
    async fn spawn_counterparty(seen_tokens: Arc<Mutex<Vec<String>>>) -> String {
        let app = Router::new()
            .route(
                "/prepare",
                post(move |headers: HeaderMap| {
                    let token = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    seen_tokens.lock().unwrap().push(token);
                    async {
                        axum::Json(serde_json::json!({
                            "accepted": true,
                            "message": "ok",
                            "final_amount": "400.00",
                            "currency": "RSD"
                        }))
                    }
                }),
            )
            .route(
                "/commit",
                post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/cancel",
                post(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    AxumStatus::OK
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn gateway(base_url: String) -> HttpGateway {
        HttpGateway::new(&CounterpartyConfig {
            base_url,
            request_timeout_ms: 200,
            api_token: "first".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_prepare_and_rotation() {
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let gw = gateway(spawn_counterparty(tokens.clone()).await);

        let vote = gw.prepare(&payload()).await.unwrap();
        assert!(vote.accepted);
        assert_eq!(vote.final_amount, Some(dec!(400)));

        gw.rotate_credential("second");
        gw.prepare(&payload()).await.unwrap();

        let seen = tokens.lock().unwrap().clone();
        assert_eq!(seen, vec!["Bearer first", "Bearer second"]);
    }

    #[tokio::test]
    async fn test_http_commit_rejected() {
        let gw = gateway(spawn_counterparty(Arc::new(Mutex::new(Vec::new()))).await);
        assert_eq!(gw.commit(&payload()).await, Err(GatewayError::Rejected(500)));
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let gw = gateway(spawn_counterparty(Arc::new(Mutex::new(Vec::new()))).await);
        assert_eq!(gw.cancel(&payload()).await, Err(GatewayError::Timeout));
    }

    #[tokio::test]
    async fn test_http_unreachable() {
        // Port 9 (discard) is not listening in test environments
        let gw = gateway("http://127.0.0.1:9".to_string());
        assert!(matches!(
            gw.prepare(&payload()).await,
            Err(GatewayError::Unavailable(_)) | Err(GatewayError::Timeout)
        ));
    }
}
