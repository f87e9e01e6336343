//! OAuth token lifecycle: persisted credentials, CSRF state, refresh-on-demand.

mod oauth;
mod state;
mod store;

pub use oauth::OAuthClient;
pub use state::StateStore;
pub use store::TokenStore;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::CredentialRecord;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Tokens are treated as expired this many seconds before `expires_at`
pub const EXPIRY_BUFFER_SECS: i64 = 300;

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub fn is_expired(record: &CredentialRecord, now: i64) -> bool {
    now >= record.expires_at.saturating_sub(EXPIRY_BUFFER_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuthStatus {
    NotAuthenticated,
    Valid { expires_at: i64 },
    Expired { refreshable: bool },
}

/// Hands out usable access tokens, refreshing lazily when the cached one is stale.
pub struct TokenManager {
    store: TokenStore,
    oauth: OAuthClient,
    // Collapses concurrent refreshes into one provider round-trip
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(store: TokenStore, oauth: OAuthClient) -> Self {
        Self {
            store,
            oauth,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            TokenStore::new(&config.token_store_path),
            OAuthClient::new(config)?,
        ))
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// A bearer token good for at least the expiry buffer, or `None` when the
    /// user has to go through the authorization flow.
    pub async fn get_valid_access_token(&self) -> Option<String> {
        let record = self.store.load()?;
        if !is_expired(&record, unix_now()) {
            return Some(record.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        let record = self.store.load()?;
        if !is_expired(&record, unix_now()) {
            debug!("Token refreshed by a concurrent caller");
            return Some(record.access_token);
        }

        info!("Token expired, attempting refresh");
        match self.refresh(&record).await {
            Ok(fresh) => Some(fresh.access_token),
            Err(e) => {
                warn!(error = %e, "Token refresh failed; re-authentication required");
                None
            }
        }
    }

    /// Like [`get_valid_access_token`](Self::get_valid_access_token) but as a `Result`.
    pub async fn require_access_token(&self) -> Result<String> {
        self.get_valid_access_token()
            .await
            .ok_or(Error::NotAuthenticated)
    }

    /// Refresh regardless of expiry.
    pub async fn force_refresh(&self) -> Result<CredentialRecord> {
        let _guard = self.refresh_lock.lock().await;
        let record = self.store.load().ok_or(Error::NotAuthenticated)?;
        self.refresh(&record).await
    }

    pub fn status(&self) -> AuthStatus {
        match self.store.load() {
            None => AuthStatus::NotAuthenticated,
            Some(r) if r.access_token.is_empty() => AuthStatus::NotAuthenticated,
            Some(r) if is_expired(&r, unix_now()) => AuthStatus::Expired {
                refreshable: r.refresh_token.as_deref().is_some_and(|t| !t.is_empty()),
            },
            Some(r) => AuthStatus::Valid {
                expires_at: r.expires_at,
            },
        }
    }

    #[instrument(skip(self, record))]
    async fn refresh(&self, record: &CredentialRecord) -> Result<CredentialRecord> {
        let refresh_token = record
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::OAuth {
                error: "missing_refresh_token".into(),
                description: "No refresh token stored".into(),
            })?;

        let resp = self.oauth.refresh(refresh_token).await?;
        let mut fresh = CredentialRecord::from_token_response(resp, unix_now());
        if fresh.refresh_token.is_none() {
            fresh.refresh_token = record.refresh_token.clone();
        }
        if fresh.scope.is_none() {
            fresh.scope = record.scope.clone();
        }

        // Persistence is best-effort; the new token is still good for this call
        if let Err(e) = self.store.save(&fresh) {
            warn!(error = %e, path = %self.store.path().display(), "Failed to persist refreshed tokens");
        }

        info!(expires_at = fresh.expires_at, "Access token refreshed");
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::sync::Arc;
    use tempfile::TempDir;

    const TOKEN_PATH: &str = "/consumers/oauth2/v2.0/token";

    fn record(access: &str, refresh: Option<&str>, expires_at: i64) -> CredentialRecord {
        CredentialRecord {
            access_token: access.into(),
            refresh_token: refresh.map(String::from),
            expires_at,
            scope: Some("Mail.Read".into()),
        }
    }

    fn manager(server: &ServerGuard, dir: &TempDir) -> TokenManager {
        let config = Config {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            authority_url: server.url(),
            token_store_path: dir.path().join("tokens.json"),
            ..Config::default()
        };
        TokenManager::from_config(&config).unwrap()
    }

    #[test]
    fn test_is_expired_buffer_boundary() {
        let now = 1_000_000;
        assert!(is_expired(&record("a", None, now + 300), now));
        assert!(is_expired(&record("a", None, now + 299), now));
        assert!(!is_expired(&record("a", None, now + 301), now));
        assert!(is_expired(&record("a", None, 0), now));
    }

    #[test]
    fn test_is_expired_extreme_timestamps() {
        assert!(is_expired(&record("a", None, i64::MIN), 0));
        assert!(is_expired(&record("a", None, i64::MIN), i64::MIN));
        assert!(!is_expired(&record("a", None, i64::MAX), 0));
    }

    #[tokio::test]
    async fn test_no_record_returns_none() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", TOKEN_PATH).expect(0).create_async().await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        assert!(tokens.get_valid_access_token().await.is_none());
        assert_eq!(tokens.status(), AuthStatus::NotAuthenticated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fresh_token_returned_without_network() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", TOKEN_PATH).expect(0).create_async().await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        let expires_at = unix_now() + 3600;
        tokens
            .store()
            .save(&record("cached", Some("rt"), expires_at))
            .unwrap();

        assert_eq!(tokens.get_valid_access_token().await.as_deref(), Some("cached"));
        assert_eq!(tokens.status(), AuthStatus::Valid { expires_at });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_token_inside_buffer_is_refreshed_and_persisted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "old-rt".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token": "fresh", "refresh_token": "new-rt", "expires_in": 3600}"#)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        tokens
            .store()
            .save(&record("stale", Some("old-rt"), unix_now() + 200))
            .unwrap();

        assert_eq!(tokens.get_valid_access_token().await.as_deref(), Some("fresh"));
        mock.assert_async().await;

        let saved = tokens.store().load().unwrap();
        assert_eq!(saved.access_token, "fresh");
        assert_eq!(saved.refresh_token.as_deref(), Some("new-rt"));
        assert!(saved.expires_at > unix_now() + 3000);
    }

    #[tokio::test]
    async fn test_refresh_keeps_old_refresh_token_when_not_rotated() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token": "fresh", "expires_in": 3600}"#)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        tokens
            .store()
            .save(&record("stale", Some("keep-me"), 0))
            .unwrap();

        assert!(tokens.get_valid_access_token().await.is_some());
        let saved = tokens.store().load().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(saved.scope.as_deref(), Some("Mail.Read"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_returns_none() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", TOKEN_PATH).expect(0).create_async().await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        tokens.store().save(&record("stale", None, 0)).unwrap();

        assert!(tokens.get_valid_access_token().await.is_none());
        assert_eq!(
            tokens.status(),
            AuthStatus::Expired { refreshable: false }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_provider_error_returns_none_and_keeps_record() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant", "error_description": "revoked"}"#)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        tokens.store().save(&record("stale", Some("rt"), 0)).unwrap();

        assert!(tokens.get_valid_access_token().await.is_none());
        assert!(matches!(
            tokens.require_access_token().await,
            Err(Error::NotAuthenticated)
        ));
        assert_eq!(tokens.store().load().unwrap().access_token, "stale");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token": "fresh", "refresh_token": "rt2", "expires_in": 3600}"#)
            .expect(1)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let tokens = Arc::new(manager(&server, &dir));
        tokens.store().save(&record("stale", Some("rt"), 0)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tokens = Arc::clone(&tokens);
                tokio::spawn(async move { tokens.get_valid_access_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some("fresh"));
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_expiry() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token": "forced", "expires_in": 3600}"#)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let tokens = manager(&server, &dir);
        tokens
            .store()
            .save(&record("valid", Some("rt"), unix_now() + 3600))
            .unwrap();

        let fresh = tokens.force_refresh().await.unwrap();
        assert_eq!(fresh.access_token, "forced");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_returns_fresh_token_when_save_fails() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(200)
            .with_body(r#"{"access_token": "fresh", "refresh_token": "rt2", "expires_in": 3600}"#)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        // A directory at the token path makes every save fail
        std::fs::create_dir(dir.path().join("tokens.json")).unwrap();

        let tokens = manager(&server, &dir);
        let fresh = tokens
            .refresh(&record("stale", Some("rt"), 0))
            .await
            .unwrap();

        assert_eq!(fresh.access_token, "fresh");
        assert!(tokens.store().path().is_dir());
        assert!(tokens.store().load().is_none());
        mock.assert_async().await;
    }
}
