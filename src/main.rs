use clap::Parser;
use tokio::sync::watch;

use screenpilot::config;
use screenpilot::errors::PilotResult;

#[derive(Parser)]
#[command(name = "screenpilot", about = "Vision-model-driven computer operator")]
struct Cli {
    /// What the agent should accomplish.
    objective: String,

    /// Provider id from config.toml.
    #[arg(short, long)]
    provider: String,

    /// Log everything, not just info and above.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> PilotResult<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling session");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = screenpilot::submit(&cli.objective, &cli.provider, &config, cancel_rx).await?;
    println!("{summary}");
    Ok(())
}
