//! Server API boundary.
//!
//! The sync layer talks to exactly three endpoints:
//!
//! - `POST /records/{kind}` with `{id, payload}` — idempotent on `id`, 2xx
//!   means durable acceptance, anything else is a retryable failure.
//! - `GET /notifications/public-key` — the push key exchange.
//! - `POST /notifications/subscribe` with `{subscription, topic}`.
//!
//! [`ServerApi`] is the seam tests substitute; [`HttpServerApi`] is the
//! reqwest-backed production client. No timeout is imposed here — the
//! reqwest client owns timeout policy, and a timeout surfaces as an ordinary
//! transport failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::push::PushEndpoint;
use crate::queue::RecordKind;

/// Server write and push endpoints consumed by the sync layer.
#[allow(async_fn_in_trait)]
pub trait ServerApi: Send + Sync {
    /// Submit one record; `id` is the idempotency key.
    async fn put_record(&self, kind: RecordKind, id: &str, payload: &Value) -> Result<()>;

    /// Fetch the server's push exchange public key.
    async fn push_public_key(&self) -> Result<String>;

    /// Notify the server of an (endpoint, topic) subscription pair.
    async fn subscribe(&self, subscription: &PushEndpoint, topic: &str) -> Result<()>;
}

#[derive(Serialize)]
struct RecordBody<'a> {
    id: &'a str,
    payload: &'a Value,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    #[serde(rename = "publicKey")]
    public_key: String,
}

#[derive(Serialize)]
struct SubscribeBody<'a> {
    subscription: &'a PushEndpoint,
    topic: &'a str,
}

/// reqwest-backed server client.
#[derive(Clone)]
pub struct HttpServerApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpServerApi {
    /// Build a client for the given base URL (trailing slash tolerated).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn check_status(endpoint: &str, status: reqwest::StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::ServerStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl ServerApi for HttpServerApi {
    async fn put_record(&self, kind: RecordKind, id: &str, payload: &Value) -> Result<()> {
        let url = format!("{}/records/{}", self.base_url, kind.path_segment());
        debug!(kind = %kind, id = %id, "submitting record");
        let response = self
            .client
            .post(&url)
            .json(&RecordBody { id, payload })
            .send()
            .await
            .map_err(|source| Error::Transport {
                endpoint: url.clone(),
                source,
            })?;
        Self::check_status(&url, response.status())
    }

    async fn push_public_key(&self) -> Result<String> {
        let url = format!("{}/notifications/public-key", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| Error::Transport {
                endpoint: url.clone(),
                source,
            })?;
        Self::check_status(&url, response.status())?;
        let body: PublicKeyResponse =
            response.json().await.map_err(|source| Error::Transport {
                endpoint: url,
                source,
            })?;
        Ok(body.public_key)
    }

    async fn subscribe(&self, subscription: &PushEndpoint, topic: &str) -> Result<()> {
        let url = format!("{}/notifications/subscribe", self.base_url);
        debug!(topic = %topic, "registering push topic with server");
        let response = self
            .client
            .post(&url)
            .json(&SubscribeBody {
                subscription,
                topic,
            })
            .send()
            .await
            .map_err(|source| Error::Transport {
                endpoint: url.clone(),
                source,
            })?;
        Self::check_status(&url, response.status())
    }
}

// =============================================================================
// Tests
// =============================================================================
