// Numan Thabit 2025
use anyhow::{Context, Result};
use clap::Parser;
use inference_loadtest::{
    config::{CliArgs, Config},
    report, runner,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = CliArgs::parse();
    let config = Config::from_cli(&cli)?;

    let history = runner::run(&config).await?;

    println!("{}", report::render_table(&history));

    report::render_chart(&history, &config.figure_path)
        .with_context(|| format!("failed to render figure at {}", config.figure_path.display()))?;
    info!(path = %config.figure_path.display(), "figure written");

    if let Some(path) = &config.history_json {
        report::write_history_json(path, &history)?;
        info!(path = %path.display(), entries = history.len(), "history persisted");
    }

    Ok(())
}
