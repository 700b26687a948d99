mod config;
mod logging;
mod server;

use anyhow::Result;
use clap::Parser;
use confab_sfu::{LoopbackEngine, Sfu};
use std::sync::Arc;
use tracing::info;

use config::Config;
use server::ConfabServer;

#[derive(Parser, Debug)]
#[command(name = "confab")]
#[command(about = "Confab WebRTC SFU signaling server", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "CONFAB_CONFIG")]
    config: Option<String>,

    /// HTTP listen host
    #[arg(long, env = "CONFAB_HOST")]
    host: Option<String>,

    /// HTTP listen port
    #[arg(short, long, env = "CONFAB_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CONFAB_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration, command line overrides file and environment
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Confab server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Media engine and SFU core
    let engine = Arc::new(LoopbackEngine::new(
        config.engine.workers,
        config.engine.announced_ip.clone(),
    ));
    let sfu = Sfu::new(config.sfu.clone(), engine);

    // 5. Serve until shutdown
    ConfabServer::new(config, sfu).start().await
}
