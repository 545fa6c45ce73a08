//! TCP scenario runner
//!
//! Executes declarative step scripts against a TCP service and reports
//! request/response latency.

use clap::Parser;
use commands::Commands;
use tcpscenario::common::{config::Settings, logging};
use tcpscenario::{cli, commands};

#[derive(Parser)]
#[command(name = "tcp-scenario", about = "Scripted TCP request/response scenarios")]
#[command(version, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write logs to the log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let file_logging = cli.log_file
        || Settings::load()
            .map(|settings| settings.logging.file)
            .unwrap_or(false);

    let _guard = if file_logging {
        logging::init_with_file(cli.verbose)
    } else {
        logging::init_cli(cli.verbose);
        None
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
