//! Outbound queue — the single writer for a connection.
//!
//! Everything destined for a client goes through its queue. One task runs
//! [`drain`] and owns the connection's write half, so writes from different
//! senders can never interleave mid-item. A file is one queue item: the writer
//! copies the header and then exactly `size` payload bytes before it writes
//! anything else. Items queued while a file is waiting on its sender are
//! moved aside and written once the file is done, so a slow sender never
//! backs up the recipient's queue.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use ferry_core::FileHeader;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Most items held back behind one file before the queue is left to fill.
pub const MAX_HELD_ITEMS: usize = 4096;

/// One item on a session's outbound queue.
#[derive(Debug)]
pub enum Outbound {
    /// Complete, newline-terminated bytes.
    Line(Bytes),
    /// A file relayed from another session.
    File(FileDelivery),
}

/// A file in flight: the header, then its payload as it arrives from the
/// sender.
#[derive(Debug)]
pub struct FileDelivery {
    pub header: FileHeader,
    pub chunks: mpsc::Receiver<Bytes>,
}

pub type OutboundTx = mpsc::Sender<Outbound>;
pub type OutboundRx = mpsc::Receiver<Outbound>;

pub fn channel(capacity: usize) -> (OutboundTx, OutboundRx) {
    mpsc::channel(capacity.max(1))
}

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
    #[error("sender went away with {missing} payload bytes outstanding")]
    Truncated { missing: u64 },
}

/// Time limits for one connection's writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterTimeouts {
    /// Bound on every write to the socket.
    pub write: Duration,
    /// Longest wait for the next payload chunk of a file in flight.
    pub payload: Duration,
}

/// Write queued items to `writer` until every sender is dropped or `kick`
/// fires.
///
/// On error the session is kicked and the connection shut down. A truncated
/// file leaves the recipient's stream unframeable, so closing it is the only
/// way to tell the recipient the file is short.
pub async fn drain<W>(
    mut writer: W,
    mut rx: OutboundRx,
    timeouts: WriterTimeouts,
    kick: CancellationToken,
) -> Result<(), OutboundError>
where
    W: AsyncWrite + Unpin,
{
    let result = pump(&mut writer, &mut rx, timeouts, &kick).await;
    if result.is_err() {
        kick.cancel();
    }
    let _ = tokio::time::timeout(timeouts.write, writer.shutdown()).await;
    result
}

async fn pump<W>(
    writer: &mut W,
    rx: &mut OutboundRx,
    timeouts: WriterTimeouts,
    kick: &CancellationToken,
) -> Result<(), OutboundError>
where
    W: AsyncWrite + Unpin,
{
    let mut held: VecDeque<Outbound> = VecDeque::new();
    loop {
        if kick.is_cancelled() {
            return Ok(());
        }
        let item = match held.pop_front() {
            Some(item) => item,
            None => {
                let next = tokio::select! {
                    biased;
                    _ = kick.cancelled() => return Ok(()),
                    item = rx.recv() => item,
                };
                match next {
                    Some(item) => item,
                    None => return Ok(()),
                }
            }
        };
        match item {
            Outbound::Line(bytes) => write_bounded(writer, &bytes, timeouts.write).await?,
            Outbound::File(delivery) => {
                write_file(writer, delivery, rx, &mut held, timeouts, kick).await?
            }
        }
    }
}

async fn write_file<W>(
    writer: &mut W,
    mut delivery: FileDelivery,
    rx: &mut OutboundRx,
    held: &mut VecDeque<Outbound>,
    timeouts: WriterTimeouts,
    kick: &CancellationToken,
) -> Result<(), OutboundError>
where
    W: AsyncWrite + Unpin,
{
    write_bounded(writer, &delivery.header.encode(), timeouts.write).await?;

    let mut remaining = delivery.header.size;
    let mut deadline = Instant::now() + timeouts.payload;
    while remaining > 0 {
        let chunk = tokio::select! {
            biased;
            _ = kick.cancelled() => return Ok(()),
            chunk = tokio::time::timeout_at(deadline, delivery.chunks.recv()) => chunk,
            Some(item) = rx.recv(), if held.len() < MAX_HELD_ITEMS => {
                held.push_back(item);
                continue;
            }
        };
        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                tracing::warn!(
                    filename = %delivery.header.filename,
                    missing = remaining,
                    "file payload ended early"
                );
                return Err(OutboundError::Truncated { missing: remaining });
            }
            Err(_) => {
                tracing::warn!(
                    filename = %delivery.header.filename,
                    missing = remaining,
                    idle = ?timeouts.payload,
                    "file sender stalled"
                );
                return Err(OutboundError::Truncated { missing: remaining });
            }
        };
        let take = (chunk.len() as u64).min(remaining) as usize;
        write_bounded(writer, &chunk[..take], timeouts.write).await?;
        remaining -= take as u64;
        deadline = Instant::now() + timeouts.payload;
    }

    tracing::trace!(filename = %delivery.header.filename, size = delivery.header.size, "file written");
    Ok(())
}

async fn write_bounded<W>(writer: &mut W, bytes: &[u8], limit: Duration) -> Result<(), OutboundError>
where
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(limit, writer.write_all(bytes))
        .await
        .map_err(|_| OutboundError::WriteTimeout(limit))??;
    Ok(())
}
