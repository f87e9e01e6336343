use super::connect;
use crate::config::Config;
use crate::graph::{EMAIL_DETAIL_FIELDS, QueryParams};
use crate::models::{Message, Output};

pub async fn read_email(config: &Config, email_id: &str) -> anyhow::Result<()> {
    let (token, graph) = connect(config).await?;

    let query: QueryParams = vec![("$select", EMAIL_DETAIL_FIELDS.into())];
    let resp = graph
        .get(&token, &format!("me/messages/{}", email_id), &query)
        .await?;
    let email: Message = serde_json::from_value(resp)?;
    Output::success(email).print();

    Ok(())
}
