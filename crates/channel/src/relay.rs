//! Bidirectional byte relay between two duplex streams.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-direction read buffer size.
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Why a relay stopped.
#[derive(Debug)]
pub enum RelayEnd {
    /// Left side reached EOF
    LeftClosed,
    /// Right side reached EOF
    RightClosed,
    /// A read or write failed
    Failed(io::Error),
}

impl RelayEnd {
    pub fn is_clean(&self) -> bool {
        !matches!(self, RelayEnd::Failed(_))
    }
}

/// Outcome of a finished relay.
#[derive(Debug)]
pub struct RelayStats {
    pub left_to_right: u64,
    pub right_to_left: u64,
    pub end: RelayEnd,
}

/// Copy bytes both ways until either side closes or fails.
///
/// Each direction is its own pump, so a write stalled in one direction
/// never stops the other from draining. Both write halves are shut down
/// before returning, whichever side ended the relay.
pub async fn relay<L, R>(left: L, right: R) -> RelayStats
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut left_read, mut left_write) = tokio::io::split(left);
    let (mut right_read, mut right_write) = tokio::io::split(right);
    let mut left_to_right = 0u64;
    let mut right_to_left = 0u64;

    let end = {
        let forward = pump(&mut left_read, &mut right_write, &mut left_to_right);
        let backward = pump(&mut right_read, &mut left_write, &mut right_to_left);
        tokio::select! {
            result = forward => match result {
                Ok(()) => RelayEnd::LeftClosed,
                Err(e) => RelayEnd::Failed(e),
            },
            result = backward => match result {
                Ok(()) => RelayEnd::RightClosed,
                Err(e) => RelayEnd::Failed(e),
            },
        }
    };

    // Peers may already be gone; shutdown errors carry no information here.
    let _ = left_write.shutdown().await;
    let _ = right_write.shutdown().await;

    debug!(left_to_right, right_to_left, end = ?end, "Relay finished");
    RelayStats {
        left_to_right,
        right_to_left,
        end,
    }
}

/// Run [`relay`] on its own task.
pub fn spawn_relay<L, R>(left: L, right: R) -> JoinHandle<RelayStats>
where
    L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(relay(left, right))
}

/// Copy `reader` into `writer` until EOF, counting forwarded bytes.
async fn pump<Rd, Wr>(reader: &mut Rd, writer: &mut Wr, copied: &mut u64) -> io::Result<()>
where
    Rd: AsyncRead + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *copied += n as u64;
    }
}
