use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chinadns::config::Config;
use chinadns::server;

#[derive(Parser)]
#[command(name = "chinadns")]
#[command(about = "Pollution-aware split DNS proxy", long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "chinadns.json")]
    config: PathBuf,

    /// Working directory for the config file and relative rule paths
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Log level, overrides the config file
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let listen = config.listen_addr()?;
    let engine = Arc::new(config.build_engine()?);

    let server = server::start(listen, engine)
        .await
        .with_context(|| format!("bind {listen}"))?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received SIGINT, shutting down");
    server.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config, args.workdir.as_deref())
        .with_context(|| format!("load config {}", args.config.display()))?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(config))
}
