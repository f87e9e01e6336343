use crate::models::{EmailAddress, Recipient};

/// Upper bound on any list/search page size
pub const MAX_RESULT_COUNT: u32 = 50;

pub fn clamp_count(count: Option<u32>, default: u32) -> u32 {
    count.unwrap_or(default).clamp(1, MAX_RESULT_COUNT)
}

/// Parse a comma-separated list of `addr` or `Name <addr>` entries.
pub fn parse_addresses(input: &str) -> Vec<Recipient> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(start) = s.find('<')
                && let Some(end) = s.find('>')
                && start < end
            {
                let name = s[..start].trim();
                let address = s[start + 1..end].trim();
                return Recipient {
                    email_address: EmailAddress {
                        name: (!name.is_empty()).then(|| name.to_string()),
                        address: address.to_string(),
                    },
                };
            }
            Recipient::new(s)
        })
        .collect()
}

/// Graph body content type for outgoing text.
pub fn body_content_type(body: &str) -> &'static str {
    if body.contains("<html") { "html" } else { "text" }
}

/// Drop everything between `<` and `>` and decode entities. Good enough for
/// reading message bodies in a terminal; not an HTML parser.
pub fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    html_escape::decode_html_entities(&out).replace('\u{a0}', " ")
}
