//! Minimal command-line demo for the `reudp` reliable-datagram
//! transport: binds an endpoint and either sends one payload (reading
//! stdin or a `--file`) to a peer, or listens and prints every received
//! transfer.
//!
//! ```text
//! reudp-demo listen --port 9000
//! reudp-demo send --remote 127.0.0.1:9000 --file payload.bin
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reudp::{Endpoint, EndpointOptions, Event, Family, PeerKey};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "reudp-demo", about = "Reliable datagram transport demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bind and print every transfer received.
    Listen {
        #[arg(long, default_value_t = 9000)]
        port: u16,
        #[arg(long)]
        address: Option<String>,
    },
    /// Send one payload to a peer and wait for drain or timeout.
    Send {
        /// Destination, e.g. `127.0.0.1:9000`.
        #[arg(long)]
        remote: SocketAddr,
        /// Read the payload from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Local port to bind (0 = ephemeral).
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Listen { port, address } => run_listen(port, address).await,
        Command::Send { remote, file, port } => run_send(remote, file, port).await,
    }
}

async fn run_listen(port: u16, address: Option<String>) -> anyhow::Result<()> {
    let options = EndpointOptions {
        port,
        address,
        ..EndpointOptions::default()
    };
    let (endpoint, mut events) = Endpoint::bind(options).await?;
    tracing::info!(port, "listening");

    while let Some(event) = events.recv().await {
        match event {
            Event::Message { payload, peer, id } => {
                println!(
                    "message: {} bytes from {} (transfer {})",
                    payload.len(),
                    peer,
                    id
                );
            }
            Event::Drain { .. } | Event::Timeout { .. } => {
                // A listener never initiates sends, so these never fire here.
            }
        }
    }

    endpoint.close().await;
    Ok(())
}

async fn run_send(remote: SocketAddr, file: Option<PathBuf>, port: u16) -> anyhow::Result<()> {
    let payload = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            use std::io::Read;
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    tracing::info!(bytes = payload.len(), %remote, "sending");

    let options = EndpointOptions {
        port,
        ..EndpointOptions::default()
    };
    let (endpoint, mut events) = Endpoint::bind(options).await?;

    let peer = PeerKey::new(remote.port(), Some(&remote.ip().to_string()), Family::V4);
    let id = endpoint.send(payload, Some(peer)).await?;

    let Some(id) = id else {
        println!("empty payload, nothing sent");
        endpoint.close().await;
        return Ok(());
    };

    while let Some(event) = events.recv().await {
        match event {
            Event::Drain { id: drained, .. } if drained == id => {
                println!("transfer {id} drained");
                break;
            }
            Event::Timeout { id: timed_out, .. } if timed_out == id => {
                println!("transfer {id} timed out");
                break;
            }
            _ => {}
        }
    }

    endpoint.close().await;
    Ok(())
}
