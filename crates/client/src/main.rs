mod console;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use skirmish::{ClientConfig, GameClient};

#[derive(Parser)]
#[command(name = "skirmish-client")]
#[command(about = "Interactive lobby console for the skirmish game server")]
struct Args {
    #[arg(long, help = "Server host name or address")]
    host: Option<String>,

    #[arg(long, help = "Server TCP control port")]
    tcp_port: Option<u16>,

    #[arg(long, help = "Server UDP telemetry port")]
    udp_port: Option<u16>,

    #[arg(short, long, help = "RON config file, created with defaults if missing")]
    config: Option<PathBuf>,

    #[arg(long, help = "Log filter, e.g. debug or skirmish=trace")]
    log_level: Option<String>,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load_or_create(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.tcp_port {
            config.tcp_port = port;
        }
        if let Some(port) = self.udp_port {
            config.udp_port = port;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = args.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = args.client_config()?;
    log::info!(
        "Connecting to {}:{} (telemetry port {})",
        config.host,
        config.tcp_port,
        config.udp_port
    );
    let client = GameClient::new(config);
    client
        .connect()
        .with_context(|| format!("connecting to {}", client.config().host))?;

    console::run(&client)?;

    client.disconnect();
    log::info!("Disconnected");
    Ok(())
}
