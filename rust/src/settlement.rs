use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementErrorKind {
    Unauthorized,
    Rejected,
    Network,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SettlementError {
    pub kind: SettlementErrorKind,
    pub message: String,
}

impl SettlementError {
    pub fn new(kind: SettlementErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == SettlementErrorKind::Unauthorized
    }
}

/// Moves money for an accepted payment request. Implementations block the
/// calling thread; the core only invokes them off the actor thread.
pub trait SettlementClient: Send + Sync + 'static {
    fn submit(
        &self,
        runtime: &tokio::runtime::Handle,
        bearer: &str,
        peer: &str,
        amount_cents: i64,
    ) -> Result<(), SettlementError>;
}

pub type SharedSettlementClient = Arc<RwLock<Arc<dyn SettlementClient>>>;

#[derive(Debug, Serialize)]
struct WalletSendRequest<'a> {
    username: &'a str,
    amount_cents: i64,
}

#[derive(Debug, Deserialize)]
struct WalletErrorBody {
    #[serde(default)]
    error: String,
}

/// Settles against the wallet REST endpoint: `POST {api_base_url}/api/wallet/send`.
#[derive(Debug, Clone)]
pub struct HttpSettlementClient {
    client: reqwest::Client,
    api_base_url: String,
    timeout: Duration,
}

impl HttpSettlementClient {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.trim().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/wallet/send", self.api_base_url)
    }

    async fn send(&self, bearer: &str, peer: &str, amount_cents: i64) -> Result<(), SettlementError> {
        if self.api_base_url.is_empty() {
            return Err(SettlementError::new(
                SettlementErrorKind::Other,
                "Payments are not configured",
            ));
        }
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(bearer)
            .timeout(self.timeout)
            .json(&WalletSendRequest {
                username: peer,
                amount_cents,
            })
            .send()
            .await
            .map_err(|e| SettlementError::new(SettlementErrorKind::Network, format!("{e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SettlementError::new(
                SettlementErrorKind::Unauthorized,
                "Session expired",
            ));
        }

        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<WalletErrorBody>(&text)
            .ok()
            .map(|b| b.error.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("Payment failed ({status})"));
        Err(SettlementError::new(SettlementErrorKind::Rejected, message))
    }
}

impl SettlementClient for HttpSettlementClient {
    fn submit(
        &self,
        runtime: &tokio::runtime::Handle,
        bearer: &str,
        peer: &str,
        amount_cents: i64,
    ) -> Result<(), SettlementError> {
        runtime.block_on(self.send(bearer, peer, amount_cents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slash() {
        let client = HttpSettlementClient::new("https://chat.example.com/");
        assert_eq!(client.endpoint(), "https://chat.example.com/api/wallet/send");
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(WalletSendRequest {
            username: "alice",
            amount_cents: 1000,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"username": "alice", "amount_cents": 1000}));
    }

    #[test]
    fn unconfigured_base_url_fails_without_network() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let client = HttpSettlementClient::new("  ");
        let err = client.submit(rt.handle(), "tok", "alice", 100).unwrap_err();
        assert_eq!(err.kind, SettlementErrorKind::Other);
    }
}
