// crates/inference-loadtest/src/config.rs
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use humantime::format_duration;
use serde::Deserialize;
use tracing::info;

const DEFAULT_MAX_USER: u64 = 10;
const DEFAULT_SPAWN_RATE: u64 = 1;
const DEFAULT_DURATION_SECS: u64 = 300;
const DEFAULT_FIGURE_PATH: &str = "./figure.jpg";

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Load-test harness for LLM inference endpoints: ramps up users, samples stats, plots latency vs throughput"
)]
pub struct CliArgs {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH", env = "INFERENCE_LOADTEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the target inference server (e.g. http://127.0.0.1:8000).
    #[arg(long)]
    pub host: Option<String>,

    /// Peak number of concurrent simulated users.
    #[arg(long = "max_user")]
    pub max_user: Option<u64>,

    /// Users started per second during ramp-up.
    #[arg(long = "spawn_rate")]
    pub spawn_rate: Option<u64>,

    /// Run length in seconds.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Output path for the latency/throughput chart.
    #[arg(long = "figure_path", value_name = "PATH")]
    pub figure_path: Option<PathBuf>,

    /// Optional path to persist the snapshot history as JSON.
    #[arg(long = "history_json", value_name = "PATH")]
    pub history_json: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub max_user: u64,
    pub spawn_rate: u64,
    pub duration: Duration,
    pub figure_path: PathBuf,
    pub history_json: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    host: Option<String>,
    max_user: Option<u64>,
    spawn_rate: Option<u64>,
    duration: Option<u64>,
    figure_path: Option<PathBuf>,
    history_json: Option<PathBuf>,
}

impl Config {
    pub fn from_cli(cli: &CliArgs) -> Result<Self> {
        let file_cfg =
            load_file_config(cli.config.as_deref()).context("failed to load config file")?;
        let config = merge(cli, file_cfg)?;
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            bail!("host must not be empty");
        }
        if !self.host.starts_with("http://") && !self.host.starts_with("https://") {
            bail!("host must be an http:// or https:// URL, got '{}'", self.host);
        }
        if self.max_user == 0 {
            bail!("max_user must be greater than 0");
        }
        if self.spawn_rate == 0 {
            bail!("spawn_rate must be greater than 0");
        }
        if self.duration.is_zero() {
            bail!("duration must be greater than 0");
        }
        Ok(())
    }

    fn log_summary(&self) {
        info!(
            host = %self.host,
            max_user = self.max_user,
            spawn_rate = self.spawn_rate,
            duration = %format_duration(self.duration),
            figure_path = %self.figure_path.display(),
            history_json = ?self.history_json,
            "inference-loadtest configuration"
        );
    }
}

fn merge(cli: &CliArgs, file_cfg: Option<(PathBuf, FileConfig)>) -> Result<Config> {
    let (cfg_path, file_cfg) = file_cfg.unzip();
    let file_cfg = file_cfg.unwrap_or_default();

    let Some(host) = cli.host.clone().or(file_cfg.host) else {
        bail!("a target host is required: pass --host or set 'host' in the config file");
    };

    let max_user = pick(cli.max_user, file_cfg.max_user, DEFAULT_MAX_USER);
    let spawn_rate = pick(cli.spawn_rate, file_cfg.spawn_rate, DEFAULT_SPAWN_RATE);
    let duration_secs = pick(cli.duration, file_cfg.duration, DEFAULT_DURATION_SECS);
    let figure_path = pick(
        cli.figure_path.clone(),
        file_cfg.figure_path,
        PathBuf::from(DEFAULT_FIGURE_PATH),
    );
    let history_json = cli.history_json.clone().or(file_cfg.history_json);

    Ok(Config {
        host: host.trim_end_matches('/').to_string(),
        max_user,
        spawn_rate,
        duration: Duration::from_secs(duration_secs),
        figure_path,
        history_json,
        config_path: cfg_path,
    })
}

fn pick<T: Clone>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}

fn load_file_config(path: Option<&Path>) -> Result<Option<(PathBuf, FileConfig)>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        bail!("config file {} does not exist", path.display());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: FileConfig = toml::from_str(&data)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some((path.to_path_buf(), cfg)))
}
