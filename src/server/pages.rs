//! HTML pages rendered by the callback server.

const BASE_STYLE: &str = "body { font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px; } \
     code { background: #f4f4f4; padding: 2px 4px; border-radius: 4px; }";

/// Escape text for inclusion in HTML, including both quote characters.
pub fn escape_html(text: &str) -> String {
    html_escape::encode_quoted_attribute(text).into_owned()
}

fn page(title: &str, style: &str, body: &str) -> String {
    format!(
        "<html>\n<head>\n<title>{title}</title>\n<style>{BASE_STYLE} {style}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n"
    )
}

/// Error page. `title` is a fixed string; `content` must already be escaped.
pub fn error(title: &str, content: &str) -> String {
    page(
        title,
        "h1 { color: #d9534f; } .error-box { background-color: #f8d7da; border: 1px solid #f5c6cb; padding: 15px; border-radius: 4px; }",
        &format!(
            "<h1>{title}</h1>\n<div class=\"error-box\">\n{content}\n</div>\n<p>Please close this window and try again.</p>"
        ),
    )
}

pub fn success() -> String {
    page(
        "Authentication Successful",
        "h1 { color: #5cb85c; } .success-box { background-color: #d4edda; border: 1px solid #c3e6cb; padding: 15px; border-radius: 4px; }",
        "<h1>Authentication Successful!</h1>\n<div class=\"success-box\">\n\
         <p>You have successfully authenticated with Microsoft Graph API.</p>\n\
         <p>The access token has been saved securely.</p>\n</div>\n\
         <p>You can now close this window and return to your MCP client.</p>",
    )
}

pub fn root(server_url: &str) -> String {
    page(
        "Outlook Authentication Server",
        "h1 { color: #0078d4; } .info-box { background-color: #e7f6fd; border: 1px solid #b3e0ff; padding: 15px; border-radius: 4px; }",
        &format!(
            "<h1>Outlook Authentication Server</h1>\n<div class=\"info-box\">\n\
             <p>This server handles Microsoft Graph API authentication callbacks.</p>\n\
             <p>Don't navigate here directly. Use the <code>authenticate</code> tool to start the authentication process.</p>\n\
             <p>Make sure <code>MS_CLIENT_ID</code> and <code>MS_CLIENT_SECRET</code> are set.</p>\n</div>\n\
             <p>Server is running at {}</p>",
            escape_html(server_url)
        ),
    )
}

pub fn configuration_error() -> String {
    error(
        "Configuration Error",
        "<p>Microsoft Graph API credentials are not set. Please set the following environment variables:</p>\n\
         <ul><li><code>MS_CLIENT_ID</code></li><li><code>MS_CLIENT_SECRET</code></li></ul>",
    )
}
