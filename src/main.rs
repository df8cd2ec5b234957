use anyhow::Result;
use clap::Parser;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use caseknow_server::case_store::{CaseStore, SqliteCaseStore};
use caseknow_server::config::{self, AppConfig, FileConfig};
use caseknow_server::metrics;
use caseknow_server::server::{run_server, RequestsLoggingLevel};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite case database. Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3100)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the OpenAI-compatible text generation service.
    #[clap(long)]
    pub llm_base_url: Option<String>,

    /// Model name used for answer generation.
    #[clap(long)]
    pub llm_model: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            port: args.port,
            logging_level: args.logging_level.clone(),
            llm_base_url: args.llm_base_url.clone(),
            llm_model: args.llm_model.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&config::CliConfig::from(&cli_args), file_config)?;

    info!("Opening SQLite case database at {:?}...", app_config.db_path);
    let case_store: Arc<dyn CaseStore> = Arc::new(SqliteCaseStore::open(&app_config.db_path)?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    run_server(app_config, case_store).await
}
