//! Headless platform capabilities for the CLI host.
//!
//! A terminal has no notification prompt and no install surface; these
//! implementations describe that honestly so the engine's state machines
//! behave the same way they would on a constrained device.

use std::time::{SystemTime, UNIX_EPOCH};

use caresync_core::error::Result;
use caresync_core::install::{InstallChoice, InstallPlatform, OfferToken};
use caresync_core::push::{PromptState, PushEndpoint, PushKeys, PushPlatform};

/// Push capability of a headless host: no interactive prompt, so permission
/// is implicitly granted and the "subscription" is a synthetic endpoint the
/// server can still associate topics with.
pub struct HeadlessPushPlatform;

impl PushPlatform for HeadlessPushPlatform {
    fn supported(&self) -> bool {
        true
    }

    fn permission(&self) -> PromptState {
        PromptState::Granted
    }

    fn request_permission(&self) -> PromptState {
        PromptState::Granted
    }

    fn create_subscription(&self, server_public_key: &str) -> Result<PushEndpoint> {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Ok(PushEndpoint {
            endpoint: format!("headless://device-{ts_ms:x}"),
            keys: PushKeys {
                p256dh: server_public_key.to_string(),
                auth: format!("cli-{ts_ms:x}"),
            },
        })
    }
}

/// Install capability of a headless host: there is no prompt to show, so a
/// triggered offer is reported as declined.
pub struct HeadlessInstallPlatform;

impl InstallPlatform for HeadlessInstallPlatform {
    fn prompt(&self, _token: OfferToken) -> Result<InstallChoice> {
        Ok(InstallChoice::Declined)
    }
}
