use anyhow::Context;
use pincart::{
    config::AppConfig,
    observability::{init_tracing, LogFormat},
    run,
};
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env());

    // Optional config file; PINCART_* environment variables override it
    let config_path = env::args().nth(1).map(PathBuf::from);

    let config = AppConfig::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })?;

    run(config).await.context("PinCart server error")?;

    Ok(())
}
