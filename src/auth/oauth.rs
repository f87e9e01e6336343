//! Identity provider token endpoint: authorize URL, code exchange, refresh grant.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::TokenResponse;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

const TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct OAuthClient {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scope: String,
    authorize_url: String,
    token_url: String,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(TIMEOUT).build()?;

        Ok(Self {
            client,
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().to_string(),
            redirect_uri: config.redirect_uri(),
            scope: config.scope_string(),
            authorize_url: config.authorize_url(),
            token_url: config.token_url(),
        })
    }

    /// URL the user's browser is redirected to, carrying the CSRF `state`.
    pub fn authorization_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
            ("response_mode", "query"),
            ("state", state),
        ];
        // Serializing a flat list of string pairs cannot fail
        let query = serde_urlencoded::to_string(&params[..]).unwrap_or_default();
        format!("{}?{}", self.authorize_url, query)
    }

    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        debug!(token_url = %self.token_url, "Exchanging authorization code");
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
            ("scope", self.scope.as_str()),
        ];
        self.token_request(&form).await
    }

    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!(token_url = %self.token_url, "Refreshing access token");
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", self.scope.as_str()),
        ];
        self.token_request(&form).await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        // The provider reports grant failures as a JSON body with an `error` field,
        // usually alongside a 400
        let body: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(Error::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }
            Err(e) => return Err(Error::Parse(e.to_string())),
        };

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            return Err(Error::OAuth {
                error: error.into(),
                description: description.into(),
            });
        }

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let token: TokenResponse = serde_json::from_value(body)?;
        debug!(
            has_refresh_token = token.refresh_token.is_some(),
            expires_in = token.expires_in,
            "Token endpoint returned tokens"
        );
        Ok(token)
    }
}
