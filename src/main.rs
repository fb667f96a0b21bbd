use anyhow::{Context, Result};
use clap::Parser;
use formgate::config::Config;
use formgate::config_validator::ConfigValidator;
use formgate::constraints::ConstraintSet;
use formgate::mail::LogMailer;
use formgate::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "formgate", version, about = "Form submission gateway with per-client rate limiting")]
struct Cli {
    /// Listen address, overrides BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// JSON file with field rules, overrides RULES_FILE
    #[arg(long)]
    rules: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(rules) = cli.rules {
        config.rules_file = Some(rules);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("formgate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate_config(&config).context("Invalid configuration")?;

    let constraints = match &config.rules_file {
        Some(path) => ConstraintSet::from_file(path)
            .with_context(|| format!("Failed to load rules from {}", path.display()))?,
        None => ConstraintSet::contact_defaults(),
    };

    tracing::info!("Starting formgate service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        endpoint = %config.endpoint_path,
        backend = %config.rate_backend,
        limit = config.rate_limit,
        window_secs = config.rate_window_secs,
        fields = constraints.len(),
        "configuration loaded"
    );

    let server = Server::new(&config, constraints, Arc::new(LogMailer))
        .context("Failed to create server")?;

    server.run().await.context("Server error")?;

    Ok(())
}
