mod config;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use queryrange::FrontendError;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(version, about = "Range query frontend")]
enum CliCommand {
    /// Serve range queries against the configured downstream
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the YAML config file
    #[arg(long, short, default_value = "query-frontend.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Frontend(#[from] FrontendError),
}

fn main() -> Result<(), CliError> {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<(), CliError> {
    let config = Config::from_file(&args.config)?;

    let _sentry = config.sentry_dsn().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    init_tracing(config.sentry_dsn().is_some());

    tracing::info!(config = %args.config.display(), "Starting query-frontend");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(queryrange::run(config.frontend))?;

    Ok(())
}

fn init_tracing(with_sentry: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(sentry_layer)
        .try_init();
}
