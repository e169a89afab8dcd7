//! Relay engine — routes frames from an active session.
//!
//! Chat fans out to every other session. A file header is routed to the
//! first session registered under the recipient's name and the payload that
//! follows is streamed into that session's writer. When there is nobody to
//! deliver to, the payload is still consumed so the sender's stream stays in
//! frame.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ferry_core::{wire, FileHeader, Frame};
use tokio::sync::mpsc::{self, error::SendTimeoutError};

use crate::outbound::{FileDelivery, Outbound};
use crate::registry::{BroadcastReport, SessionHandle, SessionId, SessionRegistry};

/// Where a file's payload is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRoute {
    /// Streaming into the recipient's outbound queue.
    Delivering { recipient: SessionId },
    /// No session has that name. The sender was told; bytes are discarded.
    RecipientNotFound,
    /// The recipient was found but could not take the file. It is evicted,
    /// the sender is told, and bytes are discarded.
    RecipientUnavailable,
}

/// A file whose payload is still arriving from the sender.
#[derive(Debug)]
pub struct Transfer {
    header: FileHeader,
    remaining: u64,
    route: FileRoute,
    recipient: Option<SessionHandle>,
    sink: Option<mpsc::Sender<Bytes>>,
}

impl Transfer {
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn route(&self) -> FileRoute {
        self.route
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// True while payload bytes are reaching the recipient.
    pub fn is_forwarding(&self) -> bool {
        self.sink.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("name frame from an already named session")]
    UnexpectedName,
    #[error("{len} payload bytes with no file in progress")]
    StrayPayload { len: usize },
}

pub struct Relay {
    registry: Arc<SessionRegistry>,
    write_timeout: Duration,
    transfer_buffer: usize,
}

impl Relay {
    pub fn new(registry: Arc<SessionRegistry>, write_timeout: Duration, transfer_buffer: usize) -> Self {
        Self {
            registry,
            write_timeout,
            transfer_buffer: transfer_buffer.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn announce_join(&self, session: &SessionHandle) -> BroadcastReport {
        tracing::info!(session = %session.id, name = %session.name, addr = %session.addr, "joined");
        self.registry.broadcast(wire::joined(&session.name), Some(session.id))
    }

    pub fn announce_leave(&self, session: &SessionHandle) -> BroadcastReport {
        tracing::info!(
            session = %session.id,
            name = %session.name,
            connected = ?session.joined_at.elapsed(),
            "left"
        );
        self.registry.broadcast(wire::left(&session.name), Some(session.id))
    }

    /// Fan `<name>: <text>` out to everyone but the sender.
    pub fn relay_chat(&self, from: &SessionHandle, text: &[u8]) -> BroadcastReport {
        tracing::info!(
            session = %from.id,
            name = %from.name,
            text = %String::from_utf8_lossy(text),
            "chat"
        );
        self.registry.broadcast(wire::chat_line(&from.name, text), Some(from.id))
    }

    /// Handle one frame from an active session.
    ///
    /// `transfer` is the session's in-flight file, if any. The codec
    /// guarantees payload frames only follow a header, so a payload frame
    /// with no transfer means the stream is out of sync.
    pub async fn handle_frame(
        &self,
        from: &SessionHandle,
        transfer: &mut Option<Transfer>,
        frame: Frame,
    ) -> Result<(), RelayError> {
        match frame {
            Frame::Chat(text) => {
                self.relay_chat(from, &text);
            }
            Frame::FileHeader(header) => {
                let started = self.begin_transfer(from, header).await;
                if started.is_complete() {
                    self.finish(from, &started);
                } else {
                    *transfer = Some(started);
                }
            }
            Frame::FileData(data) => {
                let Some(active) = transfer.as_mut() else {
                    return Err(RelayError::StrayPayload { len: data.len() });
                };
                self.forward_chunk(active, data).await;
                if active.is_complete() {
                    if let Some(done) = transfer.take() {
                        self.finish(from, &done);
                    }
                }
            }
            Frame::Name(_) => return Err(RelayError::UnexpectedName),
        }
        Ok(())
    }

    /// Route a file header. The returned transfer consumes the payload.
    pub async fn begin_transfer(&self, from: &SessionHandle, header: FileHeader) -> Transfer {
        let mut transfer = Transfer {
            remaining: header.size,
            header,
            route: FileRoute::RecipientNotFound,
            recipient: None,
            sink: None,
        };

        let Some(recipient) = self.registry.find_by_name(&transfer.header.recipient) else {
            tracing::warn!(
                session = %from.id,
                from = %from.name,
                to = %transfer.header.recipient,
                filename = %transfer.header.filename,
                size = transfer.header.size,
                "file recipient not found"
            );
            self.notify(from, Bytes::from_static(wire::USER_NOT_FOUND)).await;
            return transfer;
        };

        let (sink, chunks) = mpsc::channel(self.transfer_buffer);
        let delivery = Outbound::File(FileDelivery {
            header: transfer.header.clone(),
            chunks,
        });
        match recipient.outbound.send_timeout(delivery, self.write_timeout).await {
            Ok(()) => {
                tracing::info!(
                    from = %from.name,
                    to = %recipient.name,
                    recipient = %recipient.id,
                    filename = %transfer.header.filename,
                    size = transfer.header.size,
                    "file transfer started"
                );
                transfer.route = FileRoute::Delivering { recipient: recipient.id };
                transfer.recipient = Some(recipient);
                transfer.sink = Some(sink);
            }
            Err(e) => {
                tracing::warn!(
                    to = %recipient.name,
                    recipient = %recipient.id,
                    filename = %transfer.header.filename,
                    stalled = matches!(e, SendTimeoutError::Timeout(_)),
                    "recipient could not accept file"
                );
                // Stalled or already closing; either way the recipient is gone.
                self.registry.evict(recipient.id);
                self.notify(from, Bytes::from_static(wire::USER_NOT_FOUND)).await;
                transfer.route = FileRoute::RecipientUnavailable;
            }
        }
        transfer
    }

    /// Account for one payload slice and pass it on if anyone is listening.
    pub async fn forward_chunk(&self, transfer: &mut Transfer, mut data: Bytes) {
        let take = (data.len() as u64).min(transfer.remaining) as usize;
        data.truncate(take);
        transfer.remaining -= take as u64;

        let Some(sink) = transfer.sink.as_ref() else {
            return;
        };
        match sink.send_timeout(data, self.write_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    filename = %transfer.header.filename,
                    remaining = transfer.remaining,
                    "recipient stalled mid-transfer"
                );
                if let Some(recipient) = &transfer.recipient {
                    self.registry.evict(recipient.id);
                }
                transfer.sink = None;
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!(filename = %transfer.header.filename, "recipient left mid-transfer");
                transfer.sink = None;
            }
        }
    }

    fn finish(&self, from: &SessionHandle, transfer: &Transfer) {
        match transfer.route {
            FileRoute::Delivering { recipient } if transfer.is_forwarding() => {
                tracing::info!(
                    from = %from.name,
                    recipient = %recipient,
                    filename = %transfer.header.filename,
                    size = transfer.header.size,
                    "file relayed"
                );
            }
            _ => {
                tracing::debug!(
                    from = %from.name,
                    filename = %transfer.header.filename,
                    size = transfer.header.size,
                    "file payload discarded"
                );
            }
        }
    }

    async fn notify(&self, to: &SessionHandle, line: Bytes) {
        if to.outbound.send_timeout(Outbound::Line(line), self.write_timeout).await.is_err() {
            tracing::debug!(session = %to.id, "could not queue notice");
        }
    }
}
