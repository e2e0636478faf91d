use std::io::BufRead;

use btlink_core::{LinkEvent, LinkEvents, LinkManager};
use tokio::sync::mpsc::{self, Receiver};

/// Pump stdin lines into the session and print what comes back, until
/// Ctrl+C or end of input.
pub async fn run(link: LinkManager, mut events: LinkEvents) -> anyhow::Result<()> {
    eprintln!("Type a line to send it. Ctrl+C to stop.\n");

    let mut lines = stdin_lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCtrl+C received, shutting down...");
                break;
            }
            line = lines.recv() => match line {
                Some(line) => {
                    if link.connected_peer().is_none() {
                        eprintln!("  (not connected, {} dropped)", line.len());
                        continue;
                    }
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    link.write(&bytes).await;
                }
                None => break,
            },
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
        }
    }

    link.stop();
    eprintln!("{}", serde_json::to_string(&*link.stats())?);
    Ok(())
}

/// Blocking stdin reads on a plain thread; it must not hold up runtime shutdown.
fn stdin_lines() -> Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::PeerConnected { peer } => eprintln!("* connected to {peer}"),
        LinkEvent::BytesReceived { peer, data } => {
            print!("[{peer}] {}", String::from_utf8_lossy(data));
        }
        LinkEvent::ConnectionLost { peer } => eprintln!("* lost {peer}, listening again"),
        LinkEvent::ConnectFailed { peer } => eprintln!("* could not reach {peer}, listening"),
        LinkEvent::WriteFailed { peer, reason } => eprintln!("* write to {peer} failed: {reason}"),
        LinkEvent::ListenFailed { reason } => eprintln!("* not accepting: {reason}"),
    }
}
