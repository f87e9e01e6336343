//! Formatting helpers for MCP tool output

use crate::models::{MailFolder, Message, Recipient, SearchOutcome};
use crate::util::strip_html_tags;

pub fn format_recipients(recipients: &[Recipient]) -> String {
    if recipients.is_empty() {
        return "None".to_string();
    }
    recipients
        .iter()
        .map(|r| r.email_address.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_folder(f: &MailFolder) -> String {
    let unread = if f.unread_item_count > 0 {
        format!(" ({} unread)", f.unread_item_count)
    } else {
        String::new()
    };
    let indent = if f.parent_folder_id.is_some() && f.child_folder_count == 0 {
        "  "
    } else {
        ""
    };
    format!(
        "{}{}{} - {} items (id: {})",
        indent, f.display_name, unread, f.total_item_count, f.id
    )
}

/// One numbered line block per message, newest first as Graph returned them.
pub fn format_message_list(messages: &[Message]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let unread = if m.is_read { "" } else { "[UNREAD] " };
            let attachment = if m.has_attachments { " [attachment]" } else { "" };
            format!(
                "{}. {}{} - From: {}{}\nSubject: {}\nID: {}\n",
                i + 1,
                unread,
                m.received_date_time.as_deref().unwrap_or("unknown"),
                m.sender_display(),
                attachment,
                m.subject.as_deref().unwrap_or("(no subject)"),
                m.id
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_message_full(m: &Message) -> String {
    let body = match &m.body {
        Some(b) if b.content_type.as_deref() == Some("html") => strip_html_tags(&b.content),
        Some(b) => b.content.clone(),
        None => m
            .body_preview
            .clone()
            .unwrap_or_else(|| "No content".to_string()),
    };

    let mut lines = vec![
        format!("From: {}", m.sender_display()),
        format!("To: {}", format_recipients(&m.to_recipients)),
    ];
    if !m.cc_recipients.is_empty() {
        lines.push(format!("CC: {}", format_recipients(&m.cc_recipients)));
    }
    if !m.bcc_recipients.is_empty() {
        lines.push(format!("BCC: {}", format_recipients(&m.bcc_recipients)));
    }
    lines.push(format!(
        "Subject: {}",
        m.subject.as_deref().unwrap_or("(no subject)")
    ));
    lines.push(format!(
        "Date: {}",
        m.received_date_time.as_deref().unwrap_or("unknown")
    ));
    lines.push(format!(
        "Importance: {}",
        m.importance.as_deref().unwrap_or("normal")
    ));
    lines.push(format!(
        "Has Attachments: {}",
        if m.has_attachments { "Yes" } else { "No" }
    ));

    format!("{}\n\n{}", lines.join("\n"), body.trim())
}

/// Search results plus, when more than one strategy ran, which ones were tried.
pub fn format_search_outcome(outcome: &SearchOutcome) -> String {
    let messages: Vec<Message> = outcome
        .messages
        .iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect();

    if messages.is_empty() {
        return "No emails found matching your search criteria.".to_string();
    }

    let mut text = format!(
        "Found {} emails:\n\n{}",
        messages.len(),
        format_message_list(&messages)
    );

    if outcome.strategies.len() > 1 {
        text.push_str(&format!(
            "\nSearch Information:\nAttempted {} search strategies: {}\n",
            outcome.strategies.len(),
            outcome.strategies.join(", ")
        ));
    }
    if outcome.fell_back {
        text.push_str("No direct matches; showing the most recent emails instead.\n");
    }
    text
}
