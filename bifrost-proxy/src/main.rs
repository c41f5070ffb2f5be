#![forbid(unsafe_code)]

use bifrost_proxy_lib::config::{build_table, load_from_path};
use bifrost_proxy_lib::iface::netdev;
use bifrost_proxy_lib::proxy::Proxy;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bifrost: 802.1X EAPOL proxy for MAC-based NAC research")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "/etc/bifrost/bifrost.toml"
    )]
    config: PathBuf,

    /// Validate the configuration file and exit
    #[arg(short, long)]
    test: bool,

    /// Exit instead of restarting the proxy after errors
    #[arg(short, long)]
    oneshot: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let ifaces = match build_table(&cfg) {
        Ok(ifaces) => ifaces,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    if cli.test {
        info!(config = %cli.config.display(), interfaces = ifaces.len(), "configuration is valid");
        return;
    }

    info!(interfaces = ifaces.len(), "configuration loaded");
    if !netdev::running_as_root() {
        warn!("not running as root; raw sockets and MAC changes will likely fail");
    }

    let proxy = Proxy::new(ifaces, cli.oneshot || cfg.oneshot);
    if let Err(err) = proxy.run().await {
        error!(%err, "proxy exited with error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
