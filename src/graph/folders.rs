use super::{GraphClient, QueryParams};
use crate::error::Result;
use crate::models::{Collection, MailFolder};
use serde_json::Value;
use tracing::{error, info, warn};

pub const INBOX_ENDPOINT: &str = "me/messages";

const FOLDER_SELECT_FIELDS: &str =
    "id,displayName,parentFolderId,childFolderCount,totalItemCount,unreadItemCount";

fn well_known(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "inbox" => Some(INBOX_ENDPOINT),
        "drafts" => Some("me/mailFolders/drafts/messages"),
        "sent" => Some("me/mailFolders/sentItems/messages"),
        "deleted" => Some("me/mailFolders/deletedItems/messages"),
        "junk" => Some("me/mailFolders/junkemail/messages"),
        "archive" => Some("me/mailFolders/archive/messages"),
        _ => None,
    }
}

fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn first_id(resp: &Value) -> Option<String> {
    resp.get("value")?
        .as_array()?
        .first()?
        .get("id")?
        .as_str()
        .map(String::from)
}

async fn find_folder_id(graph: &GraphClient, access_token: &str, name: &str) -> Result<Option<String>> {
    let query: QueryParams = vec![(
        "$filter",
        format!("displayName eq '{}'", odata_literal(name)),
    )];
    let resp = graph.get(access_token, "me/mailFolders", &query).await?;
    if let Some(id) = first_id(&resp) {
        return Ok(Some(id));
    }

    info!(folder = name, "No exact match, trying case-insensitive lookup");
    let query: QueryParams = vec![("$top", "100".into())];
    let resp = graph.get(access_token, "me/mailFolders", &query).await?;
    let folders: Collection<MailFolder> = serde_json::from_value(resp)?;
    let wanted = name.to_lowercase();

    Ok(folders
        .value
        .into_iter()
        .find(|f| f.display_name.to_lowercase() == wanted)
        .map(|f| f.id))
}

/// Messages endpoint for a folder name. Never fails: anything that cannot be
/// resolved lands in the inbox.
pub async fn resolve_folder(graph: &GraphClient, access_token: &str, name: Option<&str>) -> String {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return INBOX_ENDPOINT.to_string();
    };

    if let Some(path) = well_known(name) {
        return path.to_string();
    }

    match find_folder_id(graph, access_token, name).await {
        Ok(Some(id)) => {
            info!(folder = name, %id, "Resolved folder");
            format!("me/mailFolders/{}/messages", id)
        }
        Ok(None) => {
            info!(folder = name, "Folder not found, falling back to inbox");
            INBOX_ENDPOINT.to_string()
        }
        Err(e) => {
            error!(folder = name, error = %e, "Error resolving folder");
            INBOX_ENDPOINT.to_string()
        }
    }
}

/// Top-level folders followed by the children of any folder that has them.
pub async fn list_folders(graph: &GraphClient, access_token: &str) -> Result<Vec<MailFolder>> {
    let query: QueryParams = vec![
        ("$top", "100".into()),
        ("$select", FOLDER_SELECT_FIELDS.into()),
    ];
    let resp = graph.get(access_token, "me/mailFolders", &query).await?;
    let top: Collection<MailFolder> = serde_json::from_value(resp)?;

    let mut children = Vec::new();
    for parent in top.value.iter().filter(|f| f.child_folder_count > 0) {
        let path = format!("me/mailFolders/{}/childFolders", parent.id);
        let query: QueryParams = vec![("$select", FOLDER_SELECT_FIELDS.into())];
        let fetched = graph
            .get(access_token, &path, &query)
            .await
            .and_then(|v| Ok(serde_json::from_value::<Collection<MailFolder>>(v)?));
        match fetched {
            Ok(c) => children.extend(c.value),
            Err(e) => warn!(folder = %parent.display_name, error = %e, "Error getting child folders"),
        }
    }

    let mut folders = top.value;
    folders.extend(children);
    Ok(folders)
}
