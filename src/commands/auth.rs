use crate::auth::{AuthStatus, TokenManager};
use crate::config::Config;
use crate::models::Output;

#[derive(serde::Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: AuthStatus,
    token_store: String,
    auth_url: String,
}

pub async fn status(config: &Config) -> anyhow::Result<()> {
    let tokens = TokenManager::from_config(config)?;

    Output::success(StatusResponse {
        status: tokens.status(),
        token_store: config.token_store_path.display().to_string(),
        auth_url: format!("{}/auth", config.auth_server_url.trim_end_matches('/')),
    })
    .print();

    Ok(())
}

pub async fn refresh(config: &Config) -> anyhow::Result<()> {
    let tokens = TokenManager::from_config(config)?;
    let record = tokens.force_refresh().await?;

    Output::<()>::success_msg(format!("Access token refreshed, expires at {}", record.expires_at))
        .print();

    Ok(())
}

pub async fn logout(config: &Config) -> anyhow::Result<()> {
    let tokens = TokenManager::from_config(config)?;

    let message = if tokens.store().delete()? {
        format!("Removed {}", tokens.store().path().display())
    } else {
        "No stored credentials".to_string()
    };
    Output::<()>::success_msg(message).print();

    Ok(())
}
