use super::connect;
use crate::config::Config;
use crate::graph::{progressive_search, resolve_folder};
use crate::models::{Output, SearchTerms};

pub async fn search(
    config: &Config,
    folder: Option<&str>,
    terms: &SearchTerms,
    count: u32,
) -> anyhow::Result<()> {
    let (token, graph) = connect(config).await?;

    let endpoint = resolve_folder(&graph, &token, folder).await;
    let outcome = progressive_search(&graph, &token, &endpoint, terms, count).await?;
    Output::success(outcome).print();

    Ok(())
}
