//! Authenticated Microsoft Graph requests.

mod folders;
mod search;

pub use folders::{list_folders, resolve_folder};
pub use search::{EMAIL_SELECT_FIELDS, progressive_search};

use crate::error::{Error, Result};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, instrument};

const TIMEOUT: Duration = Duration::from_secs(30);
const FILTER_PARAM: &str = "$filter";

/// Fields fetched when reading a single message
pub const EMAIL_DETAIL_FIELDS: &str = "id,subject,from,toRecipients,ccRecipients,bccRecipients,receivedDateTime,bodyPreview,body,hasAttachments,importance,isRead,internetMessageHeaders";

/// Ordered OData query parameters (`$top`, `$select`, `$filter`, ...).
pub type QueryParams = Vec<(&'static str, String)>;

#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
}

impl GraphClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Full request URL for `path` relative to the Graph endpoint.
    pub fn url(&self, path: &str, query: &[(&str, String)]) -> String {
        let encoded_path = encode_path(path.trim_start_matches('/'));
        let query_string = encode_query(query);
        if query_string.is_empty() {
            format!("{}/{}", self.base_url, encoded_path)
        } else {
            format!("{}/{}?{}", self.base_url, encoded_path, query_string)
        }
    }

    /// Issue a request and return the parsed JSON body.
    ///
    /// 401 maps to [`Error::Unauthorized`]; other non-2xx statuses carry the
    /// status and raw body. A 2xx with an empty body (202/204) yields `Null`.
    #[instrument(skip(self, access_token, body, query))]
    pub async fn request(
        &self,
        access_token: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = self.url(path, query);
        debug!(%url, "Graph request");

        let mutating = method == Method::POST || method == Method::PATCH || method == Method::PUT;
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(access_token)
            .header("Content-Type", "application/json");

        if let Some(body) = body
            && mutating
        {
            req = req.json(body);
        }

        let resp = req.send().await.inspect_err(|e| {
            error!(error = %e, "Error calling Graph API");
        })?;

        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| Error::Parse(e.to_string()));
        }

        if status.as_u16() == 401 {
            return Err(Error::Unauthorized);
        }

        error!(status = status.as_u16(), "Graph API call failed");
        Err(Error::Api {
            status: status.as_u16(),
            body: text,
        })
    }

    pub async fn get(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        self.request(access_token, Method::GET, path, None, query)
            .await
    }

    pub async fn post(&self, access_token: &str, path: &str, body: &Value) -> Result<Value> {
        self.request(access_token, Method::POST, path, Some(body), &[])
            .await
    }

    pub async fn delete(&self, access_token: &str, path: &str) -> Result<Value> {
        self.request(access_token, Method::DELETE, path, None, &[])
            .await
    }
}

/// Percent-encode each `/`-separated segment on its own.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Form-encode every parameter except `$filter`, whose value is percent-encoded
/// separately and appended last so its operators are not double-encoded.
fn encode_query(query: &[(&str, String)]) -> String {
    let regular: Vec<(&str, &str)> = query
        .iter()
        .filter(|(k, _)| *k != FILTER_PARAM)
        .map(|(k, v)| (*k, v.as_str()))
        .collect();
    let filter = query
        .iter()
        .find(|(k, _)| *k == FILTER_PARAM)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty());

    let mut out = serde_urlencoded::to_string(&regular[..]).unwrap_or_default();
    if let Some(filter) = filter {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(FILTER_PARAM);
        out.push('=');
        out.push_str(&urlencoding::encode(filter));
    }
    out
}
