use std::sync::Arc;
use std::time::Duration;

use btlink_core::{DiscoveryEvent, DiscoveryScanner, Transport};
use btlink_tcp::TcpTransport;

pub async fn run(transport: Arc<TcpTransport>, limit: Duration) -> anyhow::Result<()> {
    let dyn_transport: Arc<dyn Transport> = transport;
    let (scanner, mut events) = DiscoveryScanner::new(dyn_transport, 32)?;
    scanner.start()?;

    let mut found = 0usize;
    let outcome = tokio::time::timeout(limit, async {
        while let Some(event) = events.recv().await {
            match event {
                DiscoveryEvent::Started => eprintln!("Scanning..."),
                DiscoveryEvent::Found(info) => {
                    found += 1;
                    println!("{}  {}", info.addr, info.label());
                }
                DiscoveryEvent::Finished => break,
            }
        }
    })
    .await;

    if outcome.is_err() {
        scanner.stop();
        eprintln!("Scan timed out.");
    }
    eprintln!("{found} new peer(s).");
    Ok(())
}
