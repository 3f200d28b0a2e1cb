//! Delegated signing agents
//!
//! A delegated identity does not hold its private key locally. Signatures are
//! requested from an external agent (a wallet extension bridge, a remote
//! signer, a hardware daemon) which may ask the user for approval before
//! answering. The agent must support raw-byte signing; agents that only sign
//! structured payloads cannot authenticate uploads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SignerError;
use crate::endpoints::{parse_http_url, service_url};

/// What an agent can do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Agent can sign arbitrary bytes
    #[serde(default)]
    pub sign_raw: bool,
}

/// Raw signing request, `data` is `0x`-prefixed hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRawRequest {
    pub address: String,
    pub data: String,
    #[serde(rename = "type")]
    pub payload_type: String,
}

impl SignRawRequest {
    pub fn bytes(address: &str, payload: &[u8]) -> Self {
        Self {
            address: address.to_string(),
            data: format!("0x{}", hex::encode(payload)),
            payload_type: "bytes".to_string(),
        }
    }
}

/// Raw signing response, `signature` is hex with optional `0x` prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRawResponse {
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// External signer reachable under a source name
#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Source identifier the keyring refers to
    fn source(&self) -> &str;

    /// Probe what the agent supports.
    async fn capabilities(&self) -> Result<AgentCapabilities, SignerError>;

    /// Sign raw bytes. May wait for user approval.
    async fn sign_raw(&self, request: &SignRawRequest) -> Result<SignRawResponse, SignerError>;
}

/// Error body returned by agents
#[derive(Debug, Deserialize)]
struct AgentErrorResponse {
    error: String,
}

/// Agent spoken to over HTTP.
///
/// - `GET {source}/capabilities` → `{"signRaw": bool}`
/// - `POST {source}/sign-raw` → `{"signature": "0x..."}`
pub struct HttpSigningAgent {
    source: String,
    http: reqwest::Client,
}

impl HttpSigningAgent {
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_client(source, reqwest::Client::new())
    }

    pub fn with_client(source: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            source: source.into(),
            http,
        }
    }

    fn url(&self, path: &str) -> Result<reqwest::Url, SignerError> {
        service_url(&self.source, &[path]).map_err(SignerError::Agent)
    }

    async fn error_from(response: reqwest::Response) -> SignerError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        if let Ok(err) = serde_json::from_str::<AgentErrorResponse>(&body) {
            return SignerError::Agent(format!("{} ({})", err.error, status));
        }
        SignerError::Agent(format!("{} ({})", body, status))
    }
}

#[async_trait]
impl SigningAgent for HttpSigningAgent {
    fn source(&self) -> &str {
        &self.source
    }

    async fn capabilities(&self) -> Result<AgentCapabilities, SignerError> {
        let response = self
            .http
            .get(self.url("capabilities")?)
            .send()
            .await
            .map_err(|e| SignerError::Agent(format!("Agent unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json::<AgentCapabilities>()
            .await
            .map_err(|e| SignerError::Agent(format!("Failed to parse capabilities: {e}")))
    }

    async fn sign_raw(&self, request: &SignRawRequest) -> Result<SignRawResponse, SignerError> {
        debug!(source = %self.source, address = %request.address, "Requesting raw signature");

        let response = self
            .http
            .post(self.url("sign-raw")?)
            .json(request)
            .send()
            .await
            .map_err(|e| SignerError::Agent(format!("Agent unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json::<SignRawResponse>()
            .await
            .map_err(|e| SignerError::Agent(format!("Failed to parse signature: {e}")))
    }
}

/// Looks up agents by source name.
///
/// Explicitly registered agents win; `http://` and `https://` sources without
/// a registration get an [`HttpSigningAgent`].
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn SigningAgent>>,
    http: reqwest::Client,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client for on-demand agents
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            agents: HashMap::new(),
            http,
        }
    }

    pub fn register(&mut self, agent: Arc<dyn SigningAgent>) {
        self.agents.insert(agent.source().to_string(), agent);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SigningAgent>> {
        if let Some(agent) = self.agents.get(source) {
            return Some(agent.clone());
        }
        if parse_http_url(source).is_ok() {
            return Some(Arc::new(HttpSigningAgent::with_client(source, self.http.clone())));
        }
        None
    }
}
