//! MCP (Model Context Protocol) server for Outlook
//!
//! Exposes mailbox and calendar operations as MCP tools. Every tool resolves a
//! token through [`TokenManager`] and talks to Graph through [`GraphClient`];
//! failures come back as tool text, never as protocol errors.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde_json::{Value, json};
use tracing::info;

use crate::auth::{AuthStatus, TokenManager};
use crate::config::Config;
use crate::error::Error;
use crate::graph::{
    EMAIL_DETAIL_FIELDS, EMAIL_SELECT_FIELDS, GraphClient, QueryParams, list_folders,
    progressive_search, resolve_folder,
};
use crate::models::{Collection, Message, SearchTerms};
use crate::util::{body_content_type, clamp_count, parse_addresses};

type ToolResult = std::result::Result<CallToolResult, McpError>;

mod format;
use format::*;

const DEFAULT_COUNT: u32 = 10;
const AUTH_REQUIRED: &str = "Authentication required. Please use the 'authenticate' tool or visit";
const FOREIGN_MAILBOX: &str = "doesn't belong to the targeted mailbox";

// ============ Request Types ============

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct AuthenticateRequest {
    /// Re-authenticate even if a valid token exists
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct ListEmailsRequest {
    /// Folder name ('inbox', 'sent', 'drafts', 'deleted', 'junk', 'archive' or a custom folder). Default: inbox
    #[serde(default)]
    pub folder: Option<String>,
    /// Maximum number of emails to return (default 10, max 50)
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct SearchEmailsRequest {
    /// Folder to search in (default: inbox)
    #[serde(default)]
    pub folder: Option<String>,
    /// Maximum number of results (default 10, max 50)
    #[serde(default)]
    pub count: Option<u32>,
    /// General search text, matched against subject, body and addresses
    #[serde(default)]
    pub query: Option<String>,
    /// Sender address or name
    #[serde(default)]
    pub from: Option<String>,
    /// Recipient address or name
    #[serde(default)]
    pub to: Option<String>,
    /// Subject line text
    #[serde(default)]
    pub subject: Option<String>,
    /// Only emails with attachments
    #[serde(default)]
    pub has_attachments: Option<bool>,
    /// Only unread emails
    #[serde(default)]
    pub unread_only: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct EmailIdRequest {
    /// The email ID (from list_emails or search_emails)
    pub id: String,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct SendEmailRequest {
    /// Recipient email address(es), comma-separated
    pub to: String,
    /// Email subject line
    pub subject: String,
    /// Email body; sent as HTML when it contains an <html> tag
    pub body: String,
    /// CC recipients, comma-separated
    #[serde(default)]
    pub cc: Option<String>,
    /// BCC recipients (hidden), comma-separated
    #[serde(default)]
    pub bcc: Option<String>,
    /// 'low', 'normal' or 'high' (default: normal)
    #[serde(default)]
    pub importance: Option<String>,
    /// Keep a copy in Sent Items (default: true)
    #[serde(default)]
    pub save_to_sent_items: Option<bool>,
}

#[derive(Debug, Default, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateEventRequest {
    /// Event title
    pub subject: String,
    /// Start in ISO format (YYYY-MM-DDTHH:MM:SS)
    pub start_datetime: String,
    /// End in ISO format (YYYY-MM-DDTHH:MM:SS)
    pub end_datetime: String,
    /// IANA or Windows time zone name (default: America/Los_Angeles)
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Event description
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_all_day: Option<bool>,
    /// Attendee email addresses, comma-separated
    #[serde(default)]
    pub attendees: Option<String>,
}

// ============ Server Implementation ============

#[derive(Clone)]
pub struct OutlookMcp {
    tokens: Arc<TokenManager>,
    graph: GraphClient,
    auth_server_url: String,
    tool_router: ToolRouter<Self>,
}

impl OutlookMcp {
    pub fn new(config: &Config) -> crate::error::Result<Self> {
        Ok(Self {
            tokens: Arc::new(TokenManager::from_config(config)?),
            graph: GraphClient::new(&config.graph_endpoint)?,
            auth_server_url: config.auth_server_url.trim_end_matches('/').to_string(),
            tool_router: Self::tool_router(),
        })
    }

    fn text_result(text: impl Into<String>) -> ToolResult {
        Ok(CallToolResult::success(vec![Content::text(text.into())]))
    }

    fn error_result(msg: impl Into<String>) -> ToolResult {
        Ok(CallToolResult::error(vec![Content::text(msg.into())]))
    }

    /// Auth problems become a prompt to authenticate; everything else is
    /// reported with the tool's context.
    fn respond(&self, context: &str, result: crate::error::Result<String>) -> ToolResult {
        match result {
            Ok(text) => Self::text_result(text),
            Err(e) if e.needs_reauth() => Self::text_result(self.auth_required_text()),
            Err(e) => Self::error_result(describe_error(context, &e)),
        }
    }

    fn auth_url(&self) -> String {
        format!("{}/auth", self.auth_server_url)
    }

    fn auth_required_text(&self) -> String {
        format!("{} {}", AUTH_REQUIRED, self.auth_url())
    }

    async fn token(&self) -> crate::error::Result<String> {
        self.tokens.require_access_token().await
    }

    // ============ Tool bodies ============

    fn check_auth_status_text(&self) -> String {
        match self.tokens.status() {
            AuthStatus::NotAuthenticated => "Not authenticated".to_string(),
            AuthStatus::Valid { expires_at } => {
                let when = chrono::DateTime::from_timestamp(expires_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| expires_at.to_string());
                format!("Authenticated and ready (token valid until {})", when)
            }
            AuthStatus::Expired { refreshable: true } => {
                "Authenticated; the access token has expired and will be refreshed on next use"
                    .to_string()
            }
            AuthStatus::Expired { refreshable: false } => format!(
                "Token expired and cannot be refreshed. Please authenticate again: {}",
                self.auth_url()
            ),
        }
    }

    async fn list_folders_text(&self) -> crate::error::Result<String> {
        let token = self.token().await?;
        let folders = list_folders(&self.graph, &token).await?;
        if folders.is_empty() {
            return Ok("No folders found.".to_string());
        }
        let lines: Vec<String> = folders.iter().map(format_folder).collect();
        Ok(format!("Found {} folders:\n\n{}", folders.len(), lines.join("\n")))
    }

    async fn list_emails_text(&self, req: ListEmailsRequest) -> crate::error::Result<String> {
        let token = self.token().await?;
        let folder = req.folder.as_deref().unwrap_or("inbox");
        let count = clamp_count(req.count, DEFAULT_COUNT);
        let endpoint = resolve_folder(&self.graph, &token, Some(folder)).await;

        let query: QueryParams = vec![
            ("$top", count.to_string()),
            ("$orderby", "receivedDateTime desc".into()),
            ("$select", EMAIL_SELECT_FIELDS.into()),
        ];
        let resp = self.graph.get(&token, &endpoint, &query).await?;
        let messages: Collection<Message> = serde_json::from_value(resp)?;

        if messages.value.is_empty() {
            return Ok(format!("No emails found in {}.", folder));
        }
        Ok(format!(
            "Found {} emails in {}:\n\n{}",
            messages.value.len(),
            folder,
            format_message_list(&messages.value)
        ))
    }

    async fn search_emails_text(&self, req: SearchEmailsRequest) -> crate::error::Result<String> {
        let token = self.token().await?;
        let count = clamp_count(req.count, DEFAULT_COUNT);
        let endpoint = resolve_folder(&self.graph, &token, req.folder.as_deref()).await;
        info!(%endpoint, "Searching emails");

        let terms = SearchTerms {
            query: req.query,
            from: req.from,
            to: req.to,
            subject: req.subject,
            has_attachments: req.has_attachments.unwrap_or(false),
            unread_only: req.unread_only.unwrap_or(false),
        };
        let outcome = progressive_search(&self.graph, &token, &endpoint, &terms, count).await?;
        Ok(format_search_outcome(&outcome))
    }

    async fn read_email_text(&self, id: &str) -> crate::error::Result<String> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("Email ID is required.".into()));
        }
        let token = self.token().await?;
        let query: QueryParams = vec![("$select", EMAIL_DETAIL_FIELDS.into())];
        let resp = self
            .graph
            .get(&token, &format!("me/messages/{}", id), &query)
            .await?;
        if resp.is_null() {
            return Err(Error::NotFound(format!("Email with ID {} not found.", id)));
        }
        let message: Message = serde_json::from_value(resp)?;
        Ok(format_message_full(&message))
    }

    async fn send_email_text(&self, req: SendEmailRequest) -> crate::error::Result<String> {
        let to = parse_addresses(&req.to);
        if to.is_empty() {
            return Err(Error::InvalidInput("Recipient (to) is required.".into()));
        }
        if req.subject.trim().is_empty() {
            return Err(Error::InvalidInput("Subject is required.".into()));
        }
        if req.body.is_empty() {
            return Err(Error::InvalidInput("Body content is required.".into()));
        }
        let cc = req.cc.as_deref().map(parse_addresses).unwrap_or_default();
        let bcc = req.bcc.as_deref().map(parse_addresses).unwrap_or_default();

        let token = self.token().await?;

        let mut message = json!({
            "subject": req.subject,
            "body": {
                "contentType": body_content_type(&req.body),
                "content": req.body,
            },
            "toRecipients": to,
            "importance": req.importance.as_deref().unwrap_or("normal"),
        });
        if !cc.is_empty() {
            message["ccRecipients"] = json!(cc);
        }
        if !bcc.is_empty() {
            message["bccRecipients"] = json!(bcc);
        }
        let payload = json!({
            "message": message,
            "saveToSentItems": req.save_to_sent_items.unwrap_or(true),
        });

        self.graph.post(&token, "me/sendMail", &payload).await?;

        let mut recipients = format!("{}", to.len());
        if !cc.is_empty() {
            recipients.push_str(&format!(" + {} CC", cc.len()));
        }
        if !bcc.is_empty() {
            recipients.push_str(&format!(" + {} BCC", bcc.len()));
        }
        Ok(format!(
            "Email sent successfully!\n\nSubject: {}\nRecipients: {}\nMessage Length: {} characters",
            req.subject,
            recipients,
            req.body.chars().count()
        ))
    }

    async fn delete_email_text(&self, id: &str) -> crate::error::Result<String> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("Email ID is required.".into()));
        }
        let token = self.token().await?;
        self.graph
            .delete(&token, &format!("me/messages/{}", id))
            .await?;
        Ok(format!("Email {} deleted successfully.", id))
    }

    async fn create_event_text(&self, req: CreateEventRequest) -> crate::error::Result<String> {
        if req.subject.trim().is_empty() {
            return Err(Error::InvalidInput("Subject is required.".into()));
        }
        if req.start_datetime.trim().is_empty() || req.end_datetime.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Start and end datetime are required (format: YYYY-MM-DDTHH:MM:SS).".into(),
            ));
        }
        let token = self.token().await?;
        let timezone = req.timezone.as_deref().unwrap_or("America/Los_Angeles");

        let mut event = json!({
            "subject": req.subject,
            "start": {"dateTime": req.start_datetime, "timeZone": timezone},
            "end": {"dateTime": req.end_datetime, "timeZone": timezone},
            "isAllDay": req.is_all_day.unwrap_or(false),
        });
        if let Some(location) = req.location.as_deref().filter(|l| !l.is_empty()) {
            event["location"] = json!({"displayName": location});
        }
        if let Some(body) = req.body.as_deref().filter(|b| !b.is_empty()) {
            event["body"] = json!({"contentType": "text", "content": body});
        }
        if let Some(attendees) = req.attendees.as_deref() {
            let list: Vec<Value> = parse_addresses(attendees)
                .into_iter()
                .map(|r| json!({"emailAddress": r.email_address, "type": "required"}))
                .collect();
            if !list.is_empty() {
                event["attendees"] = Value::Array(list);
            }
        }

        let created = self.graph.post(&token, "me/events", &event).await?;

        let mut lines = vec![
            "Event created successfully!\n".to_string(),
            format!("Subject: {}", req.subject),
            format!("Start: {} ({})", req.start_datetime, timezone),
            format!("End: {} ({})", req.end_datetime, timezone),
        ];
        if let Some(location) = req.location.as_deref().filter(|l| !l.is_empty()) {
            lines.push(format!("Location: {}", location));
        }
        if let Some(link) = created.get("webLink").and_then(Value::as_str) {
            lines.push(format!("Link: {}", link));
        }
        Ok(lines.join("\n"))
    }
}

fn describe_error(context: &str, err: &Error) -> String {
    match err {
        Error::InvalidInput(msg) | Error::NotFound(msg) => msg.clone(),
        Error::Api { body, .. } if body.contains(FOREIGN_MAILBOX) => {
            "The email ID seems invalid or doesn't belong to your mailbox.".to_string()
        }
        other => format!("{}: {}", context, other),
    }
}

#[tool_router]
impl OutlookMcp {
    // ============ Auth Tools ============

    #[tool(description = "Information about this Outlook MCP server and what it can do.")]
    async fn about(&self) -> ToolResult {
        Self::text_result(format!(
            "Outlook Assistant MCP Server v{}\n\n\
            Provides access to Microsoft Outlook email and calendar through Microsoft Graph API.",
            env!("CARGO_PKG_VERSION")
        ))
    }

    #[tool(
        description = "Get the URL to authenticate with Microsoft. Open it in a browser to complete sign-in."
    )]
    async fn authenticate(&self, Parameters(req): Parameters<AuthenticateRequest>) -> ToolResult {
        let force = req.force.unwrap_or(false);
        if !force && matches!(self.tokens.status(), AuthStatus::Valid { .. }) {
            return Self::text_result(format!(
                "Already authenticated. To sign in again, visit: {}",
                self.auth_url()
            ));
        }
        Self::text_result(format!(
            "Authentication required. Please visit the following URL to authenticate with Microsoft: {}\n\n\
            After authentication, you will be redirected back to this application.",
            self.auth_url()
        ))
    }

    #[tool(description = "Check whether the server holds a usable Microsoft Graph token.")]
    async fn check_auth_status(&self) -> ToolResult {
        Self::text_result(self.check_auth_status_text())
    }

    // ============ Mail Tools ============

    #[tool(
        description = "List all mail folders with item and unread counts. Use folder names from here with list_emails and search_emails."
    )]
    async fn list_folders(&self) -> ToolResult {
        self.respond("Error listing folders", self.list_folders_text().await)
    }

    #[tool(
        description = "List recent emails in a folder, newest first. Returns sender, subject, date, read status and ID."
    )]
    async fn list_emails(&self, Parameters(req): Parameters<ListEmailsRequest>) -> ToolResult {
        self.respond("Error listing emails", self.list_emails_text(req).await)
    }

    #[tool(
        description = "Search emails by text, sender, recipient or subject, optionally limited to unread or with attachments. Falls back to simpler queries when nothing matches."
    )]
    async fn search_emails(&self, Parameters(req): Parameters<SearchEmailsRequest>) -> ToolResult {
        self.respond("Error searching emails", self.search_emails_text(req).await)
    }

    #[tool(description = "Read the full content of an email by its ID.")]
    async fn read_email(&self, Parameters(req): Parameters<EmailIdRequest>) -> ToolResult {
        self.respond("Failed to read email", self.read_email_text(&req.id).await)
    }

    #[tool(description = "Send an email. Recipients are comma-separated addresses.")]
    async fn send_email(&self, Parameters(req): Parameters<SendEmailRequest>) -> ToolResult {
        self.respond("Error sending email", self.send_email_text(req).await)
    }

    #[tool(description = "Delete an email by its ID (moves it to Deleted Items).")]
    async fn delete_email(&self, Parameters(req): Parameters<EmailIdRequest>) -> ToolResult {
        self.respond("Failed to delete email", self.delete_email_text(&req.id).await)
    }

    // ============ Calendar Tools ============

    #[tool(description = "Create a calendar event, optionally inviting attendees.")]
    async fn create_event(&self, Parameters(req): Parameters<CreateEventRequest>) -> ToolResult {
        self.respond("Error creating event", self.create_event_text(req).await)
    }
}

#[tool_handler]
impl ServerHandler for OutlookMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "outlook-mcp".to_string(),
                title: Some("Outlook MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Outlook MCP Server - Read, search and send Outlook email via Microsoft Graph.\n\n\
                ## Getting Started\n\
                1. Use `check_auth_status`; if not authenticated, use `authenticate` and open the URL\n\
                2. Use `list_folders` to see available folders\n\
                3. Use `list_emails` or `search_emails`, then `read_email` with an ID\n\n\
                ## Safety Rules\n\
                - Confirm recipients and content with the user before `send_email`\n\
                - `delete_email` and `create_event` change the user's mailbox and calendar"
                    .to_string(),
            ),
        }
    }
}

/// Run the MCP server with stdio transport
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    use rmcp::{ServiceExt, transport::stdio};

    let service = OutlookMcp::new(config)?;
    let server = service
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {}", e))?;

    server
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {}", e))?;

    Ok(())
}
