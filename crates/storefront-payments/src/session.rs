//! Checkout Sessions
//!
//! Short-lived tokens binding a buyer to one product before payment starts.
//! A session is read when the checkout page loads and flipped to `used`
//! exactly once, when the sale it produced settles. Sessions are never
//! deleted.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::catalog::is_mock_product;
use crate::error::{PaymentError, Result};

const TOKEN_BYTES: usize = 16;

/// Upper bound on a configured session lifetime (one year)
const MAX_TTL_HOURS: f64 = 24.0 * 365.0;

/// Opaque checkout token (32 lowercase hex chars)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate from the OS-seeded CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Expiry policy for checkout sessions
#[derive(Clone, Debug)]
pub struct SessionPolicy {
    /// Lifetime stamped into `expires_at`
    pub ttl: Duration,

    /// Reject expired sessions on the checkout display path.
    ///
    /// Payment submission and settlement never check expiry: a buyer already
    /// confirming on their phone must not be dropped by a timer.
    pub enforce_on_display: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(1),
            enforce_on_display: false,
        }
    }
}

impl SessionPolicy {
    pub fn from_env() -> Self {
        let hours = std::env::var("CHECKOUT_EXPIRE_HOURS")
            .ok()
            .and_then(|h| h.parse::<f64>().ok())
            .filter(|h| h.is_finite() && *h > 0.0)
            .unwrap_or(1.0);
        let enforce_on_display = std::env::var("CHECKOUT_ENFORCE_EXPIRY")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            ttl: Self::ttl_from_hours(hours),
            enforce_on_display,
        }
    }

    /// Lifetime for a configured hour count, capped at [`MAX_TTL_HOURS`]
    pub fn ttl_from_hours(hours: f64) -> Duration {
        if hours > MAX_TTL_HOURS {
            tracing::warn!(hours, max = MAX_TTL_HOURS, "Checkout lifetime capped");
        }
        let hours = hours.min(MAX_TTL_HOURS);
        #[allow(clippy::cast_possible_truncation)]
        Duration::seconds((hours * 3600.0) as i64)
    }
}

/// A checkout session record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub token: SessionToken,
    pub product_id: String,
    /// Product resolves through the static showcase table
    pub is_mock: bool,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(product_id: impl Into<String>, ttl: Duration) -> Self {
        let product_id = product_id.into();
        let now = Utc::now();
        Self {
            token: SessionToken::generate(),
            is_mock: is_mock_product(&product_id),
            product_id,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            used: false,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Session storage trait
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session; a token collision fails with `Conflict`
    async fn insert(&self, session: &CheckoutSession) -> Result<()>;

    /// Fetch an unused session. Expiry is not checked here.
    async fn get_active(&self, token: &SessionToken) -> Result<CheckoutSession>;

    /// Set `used = true`. Idempotent.
    async fn mark_used(&self, token: &SessionToken) -> Result<()>;
}

/// In-memory session store (for development)
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, CheckoutSession>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &CheckoutSession) -> Result<()> {
        let mut sessions = self.sessions.write()?;
        if sessions.contains_key(&session.token) {
            return Err(PaymentError::Conflict(format!(
                "checkout token {} already exists",
                session.token
            )));
        }
        sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn get_active(&self, token: &SessionToken) -> Result<CheckoutSession> {
        let sessions = self.sessions.read()?;
        match sessions.get(token) {
            Some(session) if session.used => {
                Err(PaymentError::SessionAlreadyUsed(token.to_string()))
            }
            Some(session) => Ok(session.clone()),
            None => Err(PaymentError::SessionNotFound(token.to_string())),
        }
    }

    async fn mark_used(&self, token: &SessionToken) -> Result<()> {
        let mut sessions = self.sessions.write()?;
        let session = sessions
            .get_mut(token)
            .ok_or_else(|| PaymentError::SessionNotFound(token.to_string()))?;
        session.used = true;
        Ok(())
    }
}
