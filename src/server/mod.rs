//! Local HTTP server for the OAuth authorization-code leg.
//!
//! `/auth` issues a CSRF state token and redirects the browser to the identity
//! provider; `/auth/callback` validates the state, exchanges the code and
//! writes the resulting credentials to the token store.

mod pages;

pub use pages::escape_html;

use crate::auth::{OAuthClient, StateStore, TokenStore, unix_now};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::CredentialRecord;
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything the handlers share. Built once per process.
pub struct AuthServerState {
    pub config: Config,
    pub oauth: OAuthClient,
    pub states: StateStore,
    pub store: TokenStore,
}

impl AuthServerState {
    pub fn from_config(config: Config) -> Result<Self> {
        Ok(Self {
            oauth: OAuthClient::new(&config)?,
            states: StateStore::default(),
            store: TokenStore::new(&config.token_store_path),
            config,
        })
    }
}

/// Query parameters the identity provider appends to the redirect URI
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub fn create_auth_router(state: Arc<AuthServerState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/auth", get(auth))
        .route("/auth/callback", get(auth_callback))
        .with_state(state)
}

/// Bind `config.bind_addr` and serve until the task is dropped.
pub async fn run_server(config: Config) -> Result<()> {
    if !config.has_client_credentials() {
        warn!("MS_CLIENT_ID / MS_CLIENT_SECRET are not set; /auth will report a configuration error");
    }

    let bind_addr = config.bind_addr.clone();
    info!(
        %bind_addr,
        redirect_uri = %config.redirect_uri(),
        token_store = %config.token_store_path.display(),
        "Starting authentication server"
    );

    let state = Arc::new(AuthServerState::from_config(config)?);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, create_auth_router(state)).await?;
    Ok(())
}

fn html(status: StatusCode, body: String) -> Response {
    (status, Html(body)).into_response()
}

/// GET /
async fn root(State(state): State<Arc<AuthServerState>>) -> Html<String> {
    Html(pages::root(&state.config.auth_server_url))
}

/// GET /auth
async fn auth(State(state): State<Arc<AuthServerState>>) -> Response {
    info!("Auth request received, redirecting to Microsoft login");

    if !state.config.has_client_credentials() {
        error!("Client credentials are not configured");
        return html(StatusCode::INTERNAL_SERVER_ERROR, pages::configuration_error());
    }

    let token = state.states.issue();
    debug!(pending = state.states.len(), "Issued state token");
    let url = state.oauth.authorization_url(&token);
    Redirect::temporary(&url).into_response()
}

/// GET /auth/callback?code&state&error&error_description
async fn auth_callback(
    State(state): State<Arc<AuthServerState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(token) = params.state.as_deref()
        && !state.states.validate_and_consume(token)
    {
        error!("Invalid or expired state token - possible CSRF attack");
        return html(
            StatusCode::FORBIDDEN,
            pages::error(
                "Security Error",
                "<p>Invalid or expired security token. Please try authenticating again.</p>",
            ),
        );
    }

    if let Some(err) = params.error.as_deref() {
        error!(
            error = err,
            description = params.error_description.as_deref().unwrap_or_default(),
            "Authentication error from identity provider"
        );
        let description = params
            .error_description
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(escape_html)
            .unwrap_or_else(|| "No description provided".into());
        let content = format!(
            "<p><strong>Error:</strong> {}</p>\n<p><strong>Description:</strong> {}</p>",
            escape_html(err),
            description
        );
        return html(
            StatusCode::BAD_REQUEST,
            pages::error("Authentication Error", &content),
        );
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        error!("No authorization code provided");
        return html(
            StatusCode::BAD_REQUEST,
            pages::error(
                "Missing Authorization Code",
                "<p>No authorization code was provided in the callback.</p>",
            ),
        );
    };

    info!("Authorization code received, exchanging for tokens");
    match exchange_and_store(&state, code).await {
        Ok(()) => {
            info!("Token exchange successful");
            html(StatusCode::OK, pages::success())
        }
        Err(e) => {
            error!(error = %e, "Token exchange error");
            let content = format!("<p>{}</p>", escape_html(&token_exchange_message(&e)));
            html(
                StatusCode::INTERNAL_SERVER_ERROR,
                pages::error("Token Exchange Error", &content),
            )
        }
    }
}

fn token_exchange_message(err: &Error) -> String {
    match err {
        Error::OAuth { description, .. } => format!("Token exchange failed: {}", description),
        other => other.to_string(),
    }
}

async fn exchange_and_store(state: &AuthServerState, code: &str) -> Result<()> {
    let resp = state.oauth.exchange_code(code).await?;
    let record = CredentialRecord::from_token_response(resp, unix_now());
    state.store.save(&record)?;
    info!(path = %state.store.path().display(), "Tokens saved");
    Ok(())
}
