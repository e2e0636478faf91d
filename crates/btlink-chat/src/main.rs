mod chat;
mod scan;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use btlink_core::{LinkConfig, LinkManager, PeerAddr, Transport, Uuid};
use btlink_tcp::{PeerTable, TcpTransport};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "btlink-chat", about = "Chat over a single btlink session")]
struct Cli {
    /// This device's link address.
    #[arg(short, long, default_value = "00:00:00:00:00:01")]
    addr: PeerAddr,

    /// Socket address to accept inbound sessions on.
    #[arg(short, long, default_value = "0.0.0.0:7301")]
    bind: SocketAddr,

    /// JSON peer table mapping link addresses to socket addresses.
    #[arg(short, long)]
    peers: Option<PathBuf>,

    /// Service name advertised by the listening endpoint.
    #[arg(long)]
    service_name: Option<String>,

    /// Service UUID; overrides BTLINK_SERVICE_UUID.
    #[arg(long)]
    service_uuid: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a peer to connect, then chat.
    Listen,

    /// Dial a peer (while still accepting inbound), then chat.
    Dial {
        /// Peer link address, e.g. 00:1A:7D:DA:71:13.
        peer: PeerAddr,
    },

    /// List peers from the table.
    Peers,

    /// Run a discovery scan and print peers not yet bonded.
    Scan {
        /// Give up after this many seconds.
        #[arg(long, default_value = "10")]
        secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(addr = %cli.addr, bind = %cli.bind, "starting");

    let table = match &cli.peers {
        Some(path) => PeerTable::load(path)?,
        None => PeerTable::default(),
    };
    let transport = Arc::new(
        TcpTransport::new(cli.addr, cli.bind, table).context("creating TCP transport")?,
    );

    let mut config = LinkConfig::new();
    if let Some(name) = cli.service_name {
        config = config.service_name(name);
    }
    if let Some(uuid) = cli.service_uuid {
        config = config.service_uuid(uuid);
    }

    eprintln!("btlink-chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Address: {}", cli.addr);
    eprintln!();

    match cli.command {
        Command::Peers => {
            for entry in transport.peers() {
                let bonded = if entry.bonded { "bonded" } else { "" };
                println!(
                    "{}  {:<16} {:<21} {}",
                    entry.addr,
                    entry.name.as_deref().unwrap_or("-"),
                    entry.primary,
                    bonded
                );
            }
        }

        Command::Scan { secs } => {
            scan::run(transport, std::time::Duration::from_secs(secs)).await?;
        }

        Command::Listen => {
            let dyn_transport: Arc<dyn Transport> = transport;
            let (link, events) = LinkManager::new(dyn_transport, config)?;
            link.start()?;
            eprintln!(
                "Listening for {} ({})",
                link.config().get_service_name(),
                link.config().get_service_uuid()
            );
            chat::run(link, events).await?;
        }

        Command::Dial { peer } => {
            let dyn_transport: Arc<dyn Transport> = transport;
            let (link, events) = LinkManager::new(dyn_transport, config)?;
            link.start()?;
            eprintln!("Dialing {peer}...");
            link.connect(peer);
            chat::run(link, events).await?;
        }
    }

    Ok(())
}
