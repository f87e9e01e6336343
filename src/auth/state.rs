//! CSRF state tokens for the authorization redirect round-trip.
//!
//! Tokens are single-use and expire a fixed window after issuance. The store
//! is owned by the callback server and shared by the `/auth` and
//! `/auth/callback` handlers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// How long an issued state token stays valid
pub const STATE_TOKEN_EXPIRY_SECS: i64 = 600;

const TOKEN_BYTES: usize = 32;

#[derive(Clone)]
pub struct StateStore {
    tokens: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    expiry: Duration,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(STATE_TOKEN_EXPIRY_SECS)
    }
}

impl StateStore {
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            tokens: Arc::new(Mutex::new(HashMap::new())),
            expiry: Duration::seconds(expiry_seconds),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // The map stays consistent even if a holder panicked mid-insert
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn issue(&self) -> String {
        self.issue_at(Utc::now())
    }

    /// Issue a token stamped with `now`, pruning anything already expired.
    pub fn issue_at(&self, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let mut tokens = self.lock();
        tokens.retain(|_, issued| now - *issued <= self.expiry);
        tokens.insert(token.clone(), now);
        token
    }

    pub fn validate_and_consume(&self, token: &str) -> bool {
        self.validate_and_consume_at(token, Utc::now())
    }

    /// True iff `token` is known and no older than the expiry window.
    /// The entry is removed either way, so a token can succeed at most once.
    pub fn validate_and_consume_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        let Some(issued) = self.lock().remove(token) else {
            return false;
        };
        now - issued <= self.expiry
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}
