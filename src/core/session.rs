//! Access-token source for AI calls.
//!
//! Sign-in and session storage live outside the core; the core only asks the
//! provider for the current token and, when it has expired, for a refresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, warn};

/// Refresh this long before the recorded expiry.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expiry| expiry - Duration::seconds(EXPIRY_LEEWAY_SECS) <= now)
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session")]
    NoSession,

    #[error("session refresh failed: {0}")]
    Refresh(String),
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn current(&self) -> Option<AuthSession>;

    async fn refresh(&self) -> Result<AuthSession, SessionError>;
}

/// Return a usable access token, refreshing first when the session has
/// expired. Refresh failures are logged and the current token is used
/// anyway; the edge function decides whether it is still acceptable.
pub async fn ensure_fresh_token(provider: &dyn SessionProvider) -> Option<String> {
    let session = provider.current()?;
    if !session.needs_refresh(Utc::now()) {
        return Some(session.access_token);
    }

    debug!("access token expired; refreshing session");
    match provider.refresh().await {
        Ok(refreshed) => Some(refreshed.access_token),
        Err(error) => {
            warn!(error = %error, "session refresh failed; continuing with current token");
            Some(session.access_token)
        }
    }
}

/// A fixed token, e.g. from `PARLEY_ACCESS_TOKEN`. Never expires.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionProvider {
    token: Option<String>,
}

impl StaticSessionProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    fn current(&self) -> Option<AuthSession> {
        self.token.clone().map(AuthSession::new)
    }

    async fn refresh(&self) -> Result<AuthSession, SessionError> {
        self.current().ok_or(SessionError::NoSession)
    }
}
