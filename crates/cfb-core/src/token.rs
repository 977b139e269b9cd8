//! Admin token lifecycle.
//!
//! Holds the identity provider's short-lived admin credential and refreshes it
//! when it gets close to expiry. The check and the login run under the same
//! lock, so concurrent callers collapse into a single login request. Callers
//! that queued behind a failed login get that login's error instead of trying
//! again themselves.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    domain::{AdminToken, CacheStatus},
    ports::{AdminCredentials, AdminLogin},
    Error, Result,
};

/// Refresh when less than this many seconds of validity remain.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Default)]
struct TokenSlot {
    token: Option<AdminToken>,
    /// Attempt number and error of the most recent login, if it failed.
    last_failure: Option<(u64, Error)>,
}

pub struct TokenManager {
    login: Arc<dyn AdminLogin>,
    creds: AdminCredentials,
    margin_seconds: i64,
    /// Completed login attempts; readable without the lock.
    attempts: AtomicU64,
    slot: Mutex<TokenSlot>,
}

impl TokenManager {
    pub fn new(login: Arc<dyn AdminLogin>, creds: AdminCredentials) -> Self {
        Self {
            login,
            creds,
            margin_seconds: DEFAULT_REFRESH_MARGIN_SECS,
            attempts: AtomicU64::new(0),
            slot: Mutex::new(TokenSlot::default()),
        }
    }

    pub fn with_margin_seconds(mut self, margin_seconds: i64) -> Self {
        self.margin_seconds = margin_seconds.max(0);
        self
    }

    /// Return an access token with at least the safety margin of validity left,
    /// logging in again if needed.
    ///
    /// A failed login returns `Error::Auth` and leaves the held token as it was.
    pub async fn get_valid_token(&self) -> Result<String> {
        let seen = self.attempts.load(Ordering::SeqCst);
        let mut slot = self.slot.lock().await;

        if let Some(token) = slot.token.as_ref() {
            if !token.needs_refresh(Utc::now(), self.margin_seconds) {
                return Ok(token.access_token.clone());
            }
        }

        // A login finished while we waited for the lock and it failed.
        if let Some((attempt, err)) = slot.last_failure.as_ref() {
            if *attempt > seen {
                return Err(err.clone());
            }
        }

        let stale = slot.token.is_some();
        tracing::info!(stale, realm = %self.creds.realm, "refreshing admin token");

        let outcome = self.login.login(&self.creds).await;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match outcome {
            Ok(grant) => {
                let token = AdminToken::from_grant(grant, Utc::now());
                let access = token.access_token.clone();
                tracing::info!(
                    expires_in = token.expires_in_seconds,
                    "admin token refreshed"
                );
                slot.token = Some(token);
                slot.last_failure = None;
                Ok(access)
            }
            Err(e) => {
                tracing::warn!(stale, attempt, error = %e, "admin token refresh failed");
                let err = match e {
                    Error::Auth(_) => e,
                    other => Error::Auth(format!("admin login failed: {other}")),
                };
                slot.last_failure = Some((attempt, err.clone()));
                Err(err)
            }
        }
    }

    /// Snapshot of the held token, without refreshing.
    pub async fn current(&self) -> Option<AdminToken> {
        self.slot.lock().await.token.clone()
    }

    pub async fn status(&self) -> CacheStatus {
        match self.slot.lock().await.token.as_ref() {
            None => CacheStatus::NeverPopulated,
            Some(t) if t.needs_refresh(Utc::now(), self.margin_seconds) => {
                CacheStatus::StaleButUsable
            }
            Some(_) => CacheStatus::Fresh,
        }
    }
}
