use super::connect;
use crate::config::Config;
use crate::graph::{EMAIL_SELECT_FIELDS, QueryParams, list_folders as fetch_folders, resolve_folder};
use crate::models::{Collection, Message, Output};

pub async fn list_folders(config: &Config) -> anyhow::Result<()> {
    let (token, graph) = connect(config).await?;

    let folders = fetch_folders(&graph, &token).await?;
    Output::success(folders).print();

    Ok(())
}

pub async fn list_emails(config: &Config, folder: &str, count: u32) -> anyhow::Result<()> {
    let (token, graph) = connect(config).await?;

    let endpoint = resolve_folder(&graph, &token, Some(folder)).await;
    let query: QueryParams = vec![
        ("$top", count.to_string()),
        ("$orderby", "receivedDateTime desc".into()),
        ("$select", EMAIL_SELECT_FIELDS.into()),
    ];
    let resp = graph.get(&token, &endpoint, &query).await?;
    let emails: Collection<Message> = serde_json::from_value(resp)?;

    #[derive(serde::Serialize)]
    struct EmailListResponse {
        folder: String,
        endpoint: String,
        emails: Vec<Message>,
    }

    Output::success(EmailListResponse {
        folder: folder.to_string(),
        endpoint,
        emails: emails.value,
    })
    .print();

    Ok(())
}
