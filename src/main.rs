use std::path::PathBuf;

use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use charmroute::config::Config;
use charmroute::pipeline;
use charmroute::route::controller::CancelToken;

#[derive(Parser, Debug)]
#[command(about = "Detail router for placed standard-cell layouts")]
struct Args {
    /// JSON run configuration.
    config: PathBuf,
    /// Override the configured output path.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(output) = args.output {
        config.output = output;
    }

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || handler.cancel())?;

    let (stats, output) = pipeline::run(&config, &cancel)?;
    println!(
        "{}/{} routed | {} ripups | {}",
        stats.success,
        stats.total,
        stats.ripups,
        output.display()
    );
    Ok(())
}
