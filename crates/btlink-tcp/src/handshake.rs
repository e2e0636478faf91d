//! Connection preamble standing in for the radio's own peer identification.
//!
//! Dialer → acceptor: 16-byte service UUID, then the dialer's 6-byte address.
//! Acceptor → dialer: one byte, [`ACCEPTED`] or [`REJECTED`].
//!
//! A nil UUID skips the service check; fallback dials use it.

use std::io;
use std::time::Duration;

use btlink_core::{PeerAddr, Uuid};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const ACCEPTED: u8 = 0x01;
pub(crate) const REJECTED: u8 = 0x00;

/// Upper bound on how long either side waits for the other's preamble.
pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn offer<S>(io: &mut S, service: Uuid, local: PeerAddr) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = [0u8; 22];
    hello[..16].copy_from_slice(service.as_bytes());
    hello[16..].copy_from_slice(&local.as_bytes());
    io.write_all(&hello).await?;
    io.flush().await?;

    match io.read_u8().await? {
        ACCEPTED => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "service not offered by peer",
        )),
    }
}

/// Read the dialer's preamble and answer it. Returns the dialer's address.
pub(crate) async fn answer<S>(io: &mut S, service: Uuid) -> io::Result<PeerAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = [0u8; 22];
    io.read_exact(&mut hello).await?;

    let mut offered = [0u8; 16];
    offered.copy_from_slice(&hello[..16]);
    let offered = Uuid::from_bytes(offered);
    if !offered.is_nil() && offered != service {
        io.write_u8(REJECTED).await?;
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "service uuid mismatch",
        ));
    }

    let mut addr = [0u8; 6];
    addr.copy_from_slice(&hello[16..]);
    io.write_u8(ACCEPTED).await?;
    io.flush().await?;
    Ok(PeerAddr::new(addr))
}
