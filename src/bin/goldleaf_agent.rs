use std::path::PathBuf;

use clap::Parser;
use log::{error, info, warn};

use goldleaf_host_agent::server::{self, ServerConfig};
use goldleaf_host_agent::transport::{CancelToken, GOLDLEAF_PID, GOLDLEAF_VID};

/// Host-side USB bridge exposing local filesystem paths to Goldleaf.
#[derive(Parser, Debug)]
#[command(name = "goldleaf-agent", version, about)]
struct Cli {
    /// USB vendor id to match, overriding the default Goldleaf vid.
    #[arg(long, default_value_t = GOLDLEAF_VID)]
    vid: u16,

    /// USB product id to match, overriding the default Goldleaf pid.
    #[arg(long, default_value_t = GOLDLEAF_PID)]
    pid: u16,

    /// Path to the special-path catalog YAML file. Defaults to a dotfile in
    /// the user's home directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity; repeat for more (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            warn!("shutdown requested");
            cancel.cancel();
        }) {
            warn!("failed to install ctrl-c handler: {e}");
        }
    }

    let config = ServerConfig {
        vid: cli.vid,
        pid: cli.pid,
        catalog_path: cli.config,
    };

    let task = tokio::task::spawn_blocking(move || server::run(cancel, config));

    match task.await {
        Ok(Ok(())) => {
            info!("clean shutdown");
            std::process::ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("fatal transport failure: {e:#}");
            std::process::ExitCode::FAILURE
        }
        Err(join_err) => {
            error!("protocol loop task failed: {join_err}");
            std::process::ExitCode::FAILURE
        }
    }
}
