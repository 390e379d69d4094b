//! palisade: secure local MCP server.
//!
//! Speaks newline-delimited JSON-RPC 2.0 over stdin/stdout. Every tool
//! invocation flows through the fail-closed security engine; diagnostics
//! go to stderr so the protocol stream stays clean.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use palisade_plugins::EchoPlugin;
use palisade_protocol::StdioTransport;
use palisade_server::Server;
use palisade_types::errors::PalisadeError;
use palisade_types::policy::SecurityPolicy;

#[derive(Parser)]
#[command(name = "palisade")]
#[command(about = "Secure local MCP server with a fail-closed security pipeline")]
#[command(version)]
struct Cli {
    /// Path to the security policy YAML file
    #[arg(long, short, value_name = "FILE", default_value = "config/policy.yaml")]
    policy: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Structured logging to stderr only; stdout belongs to the protocol.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, PalisadeError> {
    let policy = Arc::new(SecurityPolicy::load(&cli.policy)?);
    info!(
        policy = %cli.policy.display(),
        version = %policy.version,
        "policy loaded"
    );

    let mut server = Server::new(policy)?;
    server.register_plugin(Arc::new(EchoPlugin))?;

    let mut transport = StdioTransport::stdio();
    info!("palisade MCP server started");

    loop {
        tokio::select! {
            message = transport.read_message() => {
                match message? {
                    Some(raw) => {
                        if let Some(response) = server.handle_message(&raw).await {
                            transport.write_message(&response).await?;
                        }
                    }
                    None => {
                        info!("EOF on stdin, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                server.close().await;
                return Ok(ExitCode::from(130));
            }
        }
    }

    server.close().await;
    Ok(ExitCode::SUCCESS)
}
