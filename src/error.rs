use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication required. Use the `authenticate` tool or open the auth server first.")]
    NotAuthenticated,

    #[error("Unauthorized: access token expired or revoked")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API call failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("OAuth error: {error}: {description}")]
    OAuth { error: String, description: String },

    #[error("Error parsing API response: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the only way forward is sending the user through the OAuth flow again.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Error::NotAuthenticated | Error::Unauthorized)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
