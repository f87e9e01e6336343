use serde::{Deserialize, Serialize};

/// The persisted access/refresh token bundle. Field names are the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds). Absent in a file means "already expired".
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl CredentialRecord {
    /// Build a record from a token endpoint response received at `now`.
    pub fn from_token_response(resp: TokenResponse, now: i64) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_at: now.saturating_add(resp.expires_in),
            scope: resp.scope,
        }
    }
}

/// Successful body of the identity provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime relative to issuance, in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

// ============ Graph resources ============

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub address: String,
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{} ({})", name, self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email_address: EmailAddress,
}

impl Recipient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            email_address: EmailAddress {
                name: None,
                address: address.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from: Option<Recipient>,
    #[serde(default)]
    pub to_recipients: Vec<Recipient>,
    #[serde(default)]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub bcc_recipients: Vec<Recipient>,
    #[serde(default)]
    pub received_date_time: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub importance: Option<String>,
    #[serde(default = "default_true")]
    pub is_read: bool,
}

fn default_true() -> bool {
    true
}

impl Message {
    pub fn sender_display(&self) -> String {
        self.from
            .as_ref()
            .map(|r| r.email_address.to_string())
            .unwrap_or_else(|| "Unknown (unknown)".into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub parent_folder_id: Option<String>,
    #[serde(default)]
    pub child_folder_count: u32,
    #[serde(default)]
    pub total_item_count: u32,
    #[serde(default)]
    pub unread_item_count: u32,
}

/// Graph collection envelope (`{"value": [...]}`).
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

// ============ Search ============

/// Request-scoped free-text and boolean filters for a mailbox search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchTerms {
    pub query: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub has_attachments: bool,
    pub unread_only: bool,
}

impl SearchTerms {
    fn non_empty(v: &Option<String>) -> Option<&str> {
        v.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn query(&self) -> Option<&str> {
        Self::non_empty(&self.query)
    }

    pub fn sender(&self) -> Option<&str> {
        Self::non_empty(&self.from)
    }

    pub fn recipient(&self) -> Option<&str> {
        Self::non_empty(&self.to)
    }

    pub fn subject(&self) -> Option<&str> {
        Self::non_empty(&self.subject)
    }

    pub fn has_boolean_filters(&self) -> bool {
        self.has_attachments || self.unread_only
    }
}

/// What a progressive search returned, and how it got there.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub messages: Vec<serde_json::Value>,
    pub strategies: Vec<String>,
    /// True when every targeted strategy came up empty and recent items were returned instead
    pub fell_back: bool,
}

// ============ CLI output ============

#[derive(Debug, Serialize)]
pub struct Output<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> Output<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn success_msg(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn error(err: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.into()),
            message: None,
        }
    }

    pub fn print(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize output: {}", e),
        }
    }
}
