use anyhow::Result;
use clap::Parser;
use gin_cli::app;
use gin_cli::cli::CliArgs;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Logs go to stderr so they never mix with command output
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    app::run(args)
}
