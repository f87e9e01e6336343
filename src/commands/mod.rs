mod auth;
mod list;
mod read;
mod search;

pub use auth::*;
pub use list::*;
pub use read::*;
pub use search::*;

use crate::auth::TokenManager;
use crate::config::Config;
use crate::graph::GraphClient;

/// A usable access token plus a Graph client, or an error telling the user to authenticate.
async fn connect(config: &Config) -> anyhow::Result<(String, GraphClient)> {
    let tokens = TokenManager::from_config(config)?;
    let token = tokens.require_access_token().await?;
    let graph = GraphClient::new(&config.graph_endpoint)?;
    Ok((token, graph))
}
