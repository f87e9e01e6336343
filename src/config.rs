use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_AUTH_SERVER_URL: &str = "http://localhost:3333";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3333";
const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_TENANT: &str = "consumers";
const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";
const TOKEN_FILE_NAME: &str = ".outlook-mcp-tokens.json";

const DEFAULT_SCOPES: &[&str] = &[
    "offline_access",
    "User.Read",
    "Mail.Read",
    "Mail.ReadWrite",
    "Mail.Send",
    "Calendars.Read",
    "Calendars.ReadWrite",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Public base URL of the callback server, used to build the redirect URI
    pub auth_server_url: String,
    /// Socket address the callback server listens on
    pub bind_addr: String,
    pub scopes: Vec<String>,
    pub token_store_path: PathBuf,
    pub tenant: String,
    pub authority_url: String,
    pub graph_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        let token_store_path = dirs::home_dir()
            .map(|home| home.join(TOKEN_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(TOKEN_FILE_NAME));

        Self {
            client_id: None,
            client_secret: None,
            auth_server_url: DEFAULT_AUTH_SERVER_URL.into(),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            token_store_path,
            tenant: DEFAULT_TENANT.into(),
            authority_url: DEFAULT_AUTHORITY_URL.into(),
            graph_endpoint: DEFAULT_GRAPH_ENDPOINT.into(),
        }
    }
}

impl Config {
    fn config_dir() -> Result<PathBuf> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not find home directory".into()))?
            .join(".outlook-mcp");
        Ok(dir)
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load `~/.outlook-mcp/config.toml` (if present), then apply `MS_*` env overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MS_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = get("MS_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = get("MS_AUTH_SERVER_URL") {
            self.auth_server_url = v;
        }
        if let Some(v) = get("MS_AUTH_SERVER_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = get("MS_SCOPES") {
            self.scopes = v
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get("MS_TOKEN_STORE_PATH") {
            self.token_store_path = PathBuf::from(v);
        }
        if let Some(v) = get("MS_TENANT") {
            self.tenant = v;
        }
        if let Some(v) = get("MS_AUTHORITY_URL") {
            self.authority_url = v;
        }
        if let Some(v) = get("MS_GRAPH_ENDPOINT") {
            self.graph_endpoint = v;
        }
    }

    pub fn has_client_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.client_id) && set(&self.client_secret)
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }

    pub fn client_secret(&self) -> &str {
        self.client_secret.as_deref().unwrap_or_default()
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.auth_server_url.trim_end_matches('/'))
    }

    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    fn oauth_base(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0",
            self.authority_url.trim_end_matches('/'),
            self.tenant
        )
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.oauth_base())
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.oauth_base())
    }
}
