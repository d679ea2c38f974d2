use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod context;
mod server;

#[derive(Parser, Debug, Clone)]
#[command(name = "tunebot")]
#[command(author, version, about = "TuneBot - Discord music bot with a status dashboard")]
pub struct Args {
    /// Overrides DASHBOARD_ADDR / DASHBOARD_PORT.
    #[arg(long)]
    dashboard_addr: Option<SocketAddr>,

    /// Run without the HTTP dashboard.
    #[arg(long, default_value = "false")]
    no_dashboard: bool,

    /// Overrides COMMAND_PREFIX.
    #[arg(long)]
    prefix: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("tunebot=info".parse().unwrap_or_default())
        .add_directive("tunebot_core=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    info!("TuneBot starting. no_dashboard={}", args.no_dashboard);

    if let Err(e) = server::run_server(args).await {
        error!("Server error: {:?}", e);
        return Err(e.into());
    }
    info!("Main finished. Goodbye!");
    Ok(())
}
