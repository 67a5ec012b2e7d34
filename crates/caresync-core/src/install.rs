//! Install-Lifecycle Tracker — a one-shot state machine around the
//! platform's deferred install offer.
//!
//! ```text
//! NoOffer ──offer event──► Offered ──┬─trigger()──► Consumed
//!                                    ├─dismiss()──► Consumed (+ persisted flag)
//!                                    └─invalidate─► Invalidated
//! ```
//!
//! The platform's offer event hands the tracker a one-shot [`OfferToken`];
//! `trigger` consumes it exactly once. Calling `trigger` or `dismiss` outside
//! `Offered` is treated as best-effort by callers, so both are defensive
//! no-ops rather than errors. Permanent dismissal is persisted: once set, the
//! offer is never surfaced again on this device, and the tracker refuses new
//! offer events without consulting the platform.
//!
//! Constructed once at process start and passed by reference — there is no
//! module-global offer state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::store::{DurableStore, Partition};

/// Fixed row id for the persisted dismissal flag.
const STATE_KEY: &str = "device";

/// Lifecycle phase of the install offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferPhase {
    /// No offer captured; the platform has not signalled installability.
    NoOffer,
    /// An offer is held and may be triggered or dismissed exactly once.
    Offered,
    /// The one-shot was spent (triggered or dismissed).
    Consumed,
    /// Navigation or reload invalidated the captured offer.
    Invalidated,
}

/// User's choice when the install prompt is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallChoice {
    Accepted,
    Declined,
}

/// One-shot capability handed over by the platform's offer event. Not
/// cloneable: consuming it is consuming the offer.
#[derive(Debug)]
pub struct OfferToken(u64);

impl OfferToken {
    #[must_use]
    pub fn new(offer_id: u64) -> Self {
        Self(offer_id)
    }

    #[must_use]
    pub fn offer_id(&self) -> u64 {
        self.0
    }
}

/// Platform seam for surfacing the actual install prompt.
pub trait InstallPlatform: Send + Sync {
    /// Show the platform prompt for the captured offer and report the
    /// user's choice. Takes the token by value: one prompt per offer.
    fn prompt(&self, token: OfferToken) -> Result<InstallChoice>;
}

/// Persisted install state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct InstallState {
    dismissed_permanently: bool,
}

struct Inner {
    phase: OfferPhase,
    token: Option<OfferToken>,
}

/// Tracks the platform's install offer through its one-shot lifecycle.
pub struct InstallTracker<I> {
    store: Arc<dyn DurableStore>,
    platform: I,
    inner: Mutex<Inner>,
    dismissed: AtomicBool,
}

impl<I: InstallPlatform> InstallTracker<I> {
    /// Build the tracker, loading the persisted dismissal flag.
    pub fn new(store: Arc<dyn DurableStore>, platform: I) -> Result<Self> {
        let dismissed = match store.get(Partition::InstallState, STATE_KEY)? {
            Some(body) => serde_json::from_value::<InstallState>(body)?.dismissed_permanently,
            None => false,
        };
        Ok(Self {
            store,
            platform,
            inner: Mutex::new(Inner {
                phase: OfferPhase::NoOffer,
                token: None,
            }),
            dismissed: AtomicBool::new(dismissed),
        })
    }

    /// Inbound message: the platform signalled an installable state and
    /// deferred its offer. Ignored when the user permanently dismissed the
    /// offer — the platform is not consulted again on this device.
    pub fn on_offer_available(&self, token: OfferToken) {
        if self.dismissed.load(Ordering::SeqCst) {
            debug!("install offer ignored: permanently dismissed");
            return;
        }
        let mut inner = self.lock();
        match inner.phase {
            OfferPhase::NoOffer | OfferPhase::Invalidated | OfferPhase::Consumed => {
                inner.phase = OfferPhase::Offered;
                inner.token = Some(token);
                info!(offer_id = token_id(&inner.token), "install offer captured");
            }
            OfferPhase::Offered => {
                // Platform re-fired before the previous offer was spent;
                // keep the newest token.
                warn!("install offer replaced while one was already held");
                inner.token = Some(token);
            }
        }
    }

    /// Consume the one-shot offer and surface the platform prompt. Returns
    /// `None` (a no-op, not an error) outside the `Offered` phase.
    pub fn trigger(&self) -> Result<Option<InstallChoice>> {
        let token = {
            let mut inner = self.lock();
            if inner.phase != OfferPhase::Offered {
                debug!(phase = ?inner.phase, "install trigger ignored: no offer held");
                return Ok(None);
            }
            inner.phase = OfferPhase::Consumed;
            inner.token.take()
        };
        let Some(token) = token else {
            // Offered with no token would be a state-machine bug.
            debug_assert!(false, "offered phase without a token");
            return Ok(None);
        };
        let choice = self.platform.prompt(token)?;
        info!(choice = ?choice, "install offer consumed");
        Ok(Some(choice))
    }

    /// Record that the user dismissed the offer for good. Consumes the
    /// one-shot and persists the flag; a no-op outside `Offered`.
    pub fn dismiss(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.phase != OfferPhase::Offered {
                debug!(phase = ?inner.phase, "install dismiss ignored: no offer held");
                return Ok(());
            }
            inner.phase = OfferPhase::Consumed;
            inner.token = None;
        }
        let body = serde_json::to_value(InstallState {
            dismissed_permanently: true,
        })?;
        self.store.put(Partition::InstallState, STATE_KEY, &body)?;
        self.dismissed.store(true, Ordering::SeqCst);
        info!("install offer permanently dismissed");
        Ok(())
    }

    /// Inbound message: navigation or reload invalidated a held offer.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if inner.phase == OfferPhase::Offered {
            inner.phase = OfferPhase::Invalidated;
            inner.token = None;
            debug!("install offer invalidated");
        }
    }

    /// Whether offer UI should be shown right now. Checks the persisted
    /// dismissal flag without re-checking the platform offer event.
    pub fn is_installable(&self) -> bool {
        !self.dismissed.load(Ordering::SeqCst) && self.lock().phase == OfferPhase::Offered
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> OfferPhase {
        self.lock().phase
    }

    /// Persisted permanent-dismissal flag.
    pub fn dismissed_permanently(&self) -> bool {
        self.dismissed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn token_id(token: &Option<OfferToken>) -> u64 {
    token.as_ref().map_or(0, OfferToken::offer_id)
}

// =============================================================================
// Tests
// =============================================================================
