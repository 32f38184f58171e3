use anyhow::Context;
use clap::Parser;
use mimic_stub::config::PassThroughConfig;
use mimic_stub::{MimicConfig, StubEngine, StubServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mimic", version, about = "Contract-driven HTTP stub server")]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "MIMIC_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "MIMIC_HOST")]
    host: Option<String>,

    #[arg(short, long, env = "MIMIC_PORT")]
    port: Option<u16>,

    /// Contract file; may be repeated
    #[arg(long = "contract", env = "MIMIC_CONTRACTS", value_delimiter = ',')]
    contracts: Vec<String>,

    /// Directory of static expectation files; may be repeated
    #[arg(long = "examples", env = "MIMIC_EXAMPLES", value_delimiter = ',')]
    examples: Vec<String>,

    /// Reject unmatched requests instead of generating responses
    #[arg(long, env = "MIMIC_STRICT")]
    strict: bool,

    /// Generate contract error responses for requests that fit no scenario
    #[arg(long, env = "MIMIC_GENERATIVE")]
    generative: bool,

    /// Forward unmatched requests to this upstream
    #[arg(long, env = "MIMIC_PASS_THROUGH")]
    pass_through: Option<String>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<MimicConfig> {
        let mut config = match &self.config {
            Some(path) => MimicConfig::from_file(path)
                .with_context(|| format!("Failed to load config {path}"))?,
            None => MimicConfig::default(),
        };

        if let Some(host) = self.host {
            config.listen.host = host;
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        config.contracts.extend(self.contracts);
        config.examples.extend(self.examples);
        config.strict_mode |= self.strict;
        config.generative |= self.generative;
        if let Some(url) = self.pass_through {
            config.pass_through = Some(PassThroughConfig::new(url));
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let addr: SocketAddr = config
        .listen
        .address()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen.address()))?;

    let engine = Arc::new(StubEngine::load(config)?);
    let server = StubServer::bind(addr, engine).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            let _ = shutdown.send(());
        }
    });

    server.run().await
}
