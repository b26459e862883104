use std::sync::Arc;

use anyhow::Context;

mod auth;
mod browser;
mod config;
mod deep;
mod document;
mod error;
mod extract;
mod models;
mod normalize;
mod page;
mod publish;
mod routes;

use config::Config;
use error::PublishError;
use publish::{ContentRepository, DryRunRepository, GithubRepository};
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let repository = build_repository(&config)?;

    if config.debug_mode {
        tracing::warn!("debug mode: login bypassed, posts are not pushed");
    } else {
        tracing::info!(
            repo = config.github_repo.as_deref().unwrap_or_default(),
            branch = %config.github_branch,
            "publishing to GitHub"
        );
    }

    let addr = config.bind_addr();
    let app = routes::router(AppState {
        config: Arc::new(config),
        repository,
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_repository(config: &Config) -> Result<Arc<dyn ContentRepository>, PublishError> {
    if config.debug_mode {
        return Ok(Arc::new(DryRunRepository));
    }
    match (&config.github_token, &config.github_repo) {
        (Some(token), Some(repo)) => Ok(Arc::new(GithubRepository::new(
            config.github_api_url.as_str(),
            repo.as_str(),
            config.github_branch.as_str(),
            token.as_str(),
        )?)),
        _ => Err(PublishError::NotConfigured),
    }
}
