//! Push Subscription Manager — permission negotiation, key exchange, and
//! per-topic subscription state.
//!
//! One subscription object per device, created on first use and reused. The
//! topic set is idempotent: subscribing to an already-subscribed topic makes
//! no server call. A network failure anywhere in [`PushManager::subscribe`]
//! leaves the persisted state without a partial topic, so retrying is always
//! safe.
//!
//! Platform specifics (the permission prompt, subscription creation) sit
//! behind [`PushPlatform`] so hosts and tests inject their own.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::server::ServerApi;
use crate::store::{DurableStore, Partition};

/// Fixed row id: one subscription per device.
const STATE_KEY: &str = "device";

/// Outcome of permission negotiation, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    /// Refused by the user. Terminal: never re-prompted automatically.
    Denied,
    /// The platform has no notification capability.
    Unsupported,
}

/// Platform-side permission prompt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Granted,
    Denied,
    /// The user has never been asked.
    NotAsked,
}

/// Platform push subscription, in Web Push wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEndpoint {
    /// Opaque delivery URL issued by the platform push service.
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Client key material the server encrypts against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Capability probe for the platform's notification machinery.
pub trait PushPlatform: Send + Sync {
    /// Whether the platform has a push capability at all.
    fn supported(&self) -> bool;

    /// Current permission state, without prompting.
    fn permission(&self) -> PromptState;

    /// Show the permission prompt. Only called when the state is
    /// [`PromptState::NotAsked`].
    fn request_permission(&self) -> PromptState;

    /// Create a push subscription keyed by the server's public key.
    fn create_subscription(&self, server_public_key: &str) -> Result<PushEndpoint>;
}

/// A host without any push capability.
pub struct UnsupportedPushPlatform;

impl PushPlatform for UnsupportedPushPlatform {
    fn supported(&self) -> bool {
        false
    }

    fn permission(&self) -> PromptState {
        PromptState::Denied
    }

    fn request_permission(&self) -> PromptState {
        PromptState::Denied
    }

    fn create_subscription(&self, _server_public_key: &str) -> Result<PushEndpoint> {
        Err(Error::Unsupported {
            capability: "push subscription",
        })
    }
}

/// Persisted per-device subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionState {
    /// The one subscription object for this device, if created.
    pub endpoint: Option<PushEndpoint>,
    /// Topics the server has been told about.
    pub topics: BTreeSet<String>,
}

/// Negotiates permission and keeps the topic set idempotent.
pub struct PushManager<S, P> {
    store: Arc<dyn DurableStore>,
    server: Arc<S>,
    platform: P,
}

impl<S: ServerApi, P: PushPlatform> PushManager<S, P> {
    pub fn new(store: Arc<dyn DurableStore>, server: Arc<S>, platform: P) -> Self {
        Self {
            store,
            server,
            platform,
        }
    }

    /// Negotiate notification permission. A previously-denied permission is
    /// reported as denied without re-prompting; only
    /// [`Self::request_permission_again`] (a fresh explicit user action)
    /// re-attempts.
    pub fn ensure_permission(&self) -> Permission {
        if !self.platform.supported() {
            return Permission::Unsupported;
        }
        match self.platform.permission() {
            PromptState::Granted => Permission::Granted,
            PromptState::Denied => Permission::Denied,
            PromptState::NotAsked => match self.platform.request_permission() {
                PromptState::Granted => Permission::Granted,
                _ => Permission::Denied,
            },
        }
    }

    /// Re-run the permission prompt on explicit user intent, regardless of a
    /// prior denial.
    pub fn request_permission_again(&self) -> Permission {
        if !self.platform.supported() {
            return Permission::Unsupported;
        }
        match self.platform.request_permission() {
            PromptState::Granted => Permission::Granted,
            _ => Permission::Denied,
        }
    }

    /// Subscribe this device to a notification topic.
    ///
    /// Creates the device subscription on first use (key exchange + platform
    /// subscription + persist), then notifies the server of the
    /// `(endpoint, topic)` pair and records the topic only after the server
    /// call succeeds.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        match self.ensure_permission() {
            Permission::Granted => {}
            Permission::Denied => return Err(Error::PermissionDenied),
            Permission::Unsupported => {
                return Err(Error::Unsupported {
                    capability: "push subscription",
                });
            }
        }

        let mut state = self.load_state()?;

        let endpoint = if let Some(endpoint) = state.endpoint.clone() {
            endpoint
        } else {
            let public_key = self.server.push_public_key().await?;
            let endpoint = self.platform.create_subscription(&public_key)?;
            state.endpoint = Some(endpoint.clone());
            self.save_state(&state)?;
            info!("created push subscription for device");
            endpoint
        };

        if state.topics.contains(topic) {
            debug!(topic = %topic, "topic already subscribed, skipping");
            return Ok(());
        }

        // Server first; the topic is only persisted once the server knows.
        self.server.subscribe(&endpoint, topic).await?;
        state.topics.insert(topic.to_string());
        self.save_state(&state)?;
        info!(topic = %topic, "subscribed to push topic");
        Ok(())
    }

    /// Current persisted subscription state.
    pub fn subscription_state(&self) -> Result<PushSubscriptionState> {
        self.load_state()
    }

    fn load_state(&self) -> Result<PushSubscriptionState> {
        match self.store.get(Partition::PushState, STATE_KEY)? {
            Some(body) => Ok(serde_json::from_value(body)?),
            None => Ok(PushSubscriptionState::default()),
        }
    }

    fn save_state(&self, state: &PushSubscriptionState) -> Result<()> {
        let body = serde_json::to_value(state)?;
        self.store.put(Partition::PushState, STATE_KEY, &body)
    }
}

// =============================================================================
// Tests
// =============================================================================
