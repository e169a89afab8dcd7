//! Session lifecycle — one task per accepted connection.
//!
//! ```text
//!   accepted ──name block──▶ registered ──frames──▶ torn down
//!       │                                   ▲
//!       └── timeout / bad name / full ──────┘ (never registered)
//! ```
//!
//! The task owns the read half and runs the relay for every frame. The write
//! half belongs to a writer task draining the session's outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use ferry_core::config::FerryConfig;
use ferry_core::{wire, Frame, FrameCodec, FrameError, FrameLimits};
use ferry_services::outbound::{self, Outbound, WriterTimeouts};
use ferry_services::{Relay, RelayError, SessionHandle, SessionId, Transfer};

/// Per-connection limits and timeouts.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub frame_limits: FrameLimits,
    pub outbound_queue: usize,
    pub name_timeout: Duration,
    pub write_timeout: Duration,
    pub transfer_idle_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &FerryConfig) -> Self {
        Self {
            frame_limits: config.limits.frame_limits(),
            outbound_queue: config.limits.outbound_queue,
            name_timeout: config.timeouts.name_timeout(),
            write_timeout: config.timeouts.write_timeout(),
            transfer_idle_timeout: config.timeouts.transfer_idle_timeout(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum Disconnect {
    #[error("connection closed")]
    Closed,
    #[error("connection error: {0}")]
    Io(std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(FrameError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("no name block within {0:?}")]
    NameTimeout(Duration),
    #[error("stream did not open with a name block")]
    NoName,
    #[error("registry full")]
    RegistryFull,
    #[error("kicked")]
    Kicked,
    #[error("no payload bytes for {0:?} mid-transfer")]
    IdleTimeout(Duration),
    #[error("server shutting down")]
    Shutdown,
}

impl From<FrameError> for Disconnect {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => Disconnect::Io(io),
            other => Disconnect::Protocol(other),
        }
    }
}

pub struct SessionTask<S> {
    id: SessionId,
    addr: SocketAddr,
    stream: S,
    relay: Arc<Relay>,
    settings: SessionSettings,
    shutdown: broadcast::Receiver<()>,
}

impl<S> SessionTask<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        id: SessionId,
        addr: SocketAddr,
        stream: S,
        relay: Arc<Relay>,
        settings: SessionSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            addr,
            stream,
            relay,
            settings,
            shutdown,
        }
    }

    /// Run the session to completion and report why it ended.
    pub async fn run(self) -> Disconnect {
        let (id, addr) = (self.id, self.addr);
        tracing::debug!(session = %id, %addr, "connection accepted");

        let reason = self.serve().await;
        match &reason {
            Disconnect::Closed | Disconnect::Shutdown => {
                tracing::debug!(session = %id, %addr, reason = %reason, "session ended")
            }
            Disconnect::Protocol(_) | Disconnect::Relay(_) | Disconnect::NoName => {
                tracing::warn!(session = %id, %addr, reason = %reason, "session dropped")
            }
            _ => tracing::info!(session = %id, %addr, reason = %reason, "session ended"),
        }
        reason
    }

    async fn serve(self) -> Disconnect {
        let SessionTask {
            id,
            addr,
            stream,
            relay,
            settings,
            mut shutdown,
        } = self;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, FrameCodec::awaiting_name(settings.frame_limits));

        // ── Name phase ───────────────────────────────────────────────────────
        let name = tokio::select! {
            _ = shutdown.recv() => return Disconnect::Shutdown,
            first = tokio::time::timeout(settings.name_timeout, frames.next()) => match first {
                Err(_) => return Disconnect::NameTimeout(settings.name_timeout),
                Ok(None) => return Disconnect::Closed,
                Ok(Some(Err(e))) => return e.into(),
                Ok(Some(Ok(Frame::Name(name)))) => name,
                Ok(Some(Ok(_))) => return Disconnect::NoName,
            },
        };

        // ── Register ─────────────────────────────────────────────────────────
        let (tx, rx) = outbound::channel(settings.outbound_queue);
        let kick = CancellationToken::new();
        let timeouts = WriterTimeouts {
            write: settings.write_timeout,
            payload: settings.transfer_idle_timeout,
        };
        let mut writer = tokio::spawn(outbound::drain(write_half, rx, timeouts, kick.clone()));
        let session = SessionHandle::new(id, name, addr, tx, kick.clone());

        if let Err(e) = relay.registry().add(session.clone()) {
            tracing::info!(session = %id, name = %session.name, error = %e, "rejecting session");
            let _ = session
                .outbound
                .try_send(Outbound::Line(Bytes::from_static(wire::MAX_CLIENTS_REACHED)));
            drop(session);
            let _ = tokio::time::timeout(settings.write_timeout, &mut writer).await;
            writer.abort();
            return Disconnect::RegistryFull;
        }
        relay.announce_join(&session);

        // ── Active ───────────────────────────────────────────────────────────
        let reason = pump(&mut frames, &session, &relay, &settings, &mut shutdown).await;

        // ── Teardown ─────────────────────────────────────────────────────────
        relay.registry().remove(id);
        relay.announce_leave(&session);
        drop(session);

        if tokio::time::timeout(settings.write_timeout, &mut writer)
            .await
            .is_err()
        {
            kick.cancel();
            writer.abort();
        }
        reason
    }
}

async fn pump<R>(
    frames: &mut FramedRead<ReadHalf<R>, FrameCodec>,
    session: &SessionHandle,
    relay: &Relay,
    settings: &SessionSettings,
    shutdown: &mut broadcast::Receiver<()>,
) -> Disconnect
where
    R: AsyncRead,
{
    // Dropping an unfinished transfer closes its chunk channel, which tells
    // the recipient's writer the file is short.
    let mut transfer: Option<Transfer> = None;

    loop {
        let idle = frames
            .decoder()
            .remaining_payload()
            .map(|_| settings.transfer_idle_timeout);
        let read = async {
            match idle {
                Some(limit) => tokio::time::timeout(limit, frames.next())
                    .await
                    .map_err(|_| Disconnect::IdleTimeout(limit)),
                None => Ok(frames.next().await),
            }
        };

        let next = tokio::select! {
            biased;
            _ = shutdown.recv() => return Disconnect::Shutdown,
            _ = session.kick.cancelled() => return Disconnect::Kicked,
            next = read => next,
        };

        let frame = match next {
            Err(reason) => return reason,
            Ok(None) => return Disconnect::Closed,
            Ok(Some(Err(e))) => return e.into(),
            Ok(Some(Ok(frame))) => frame,
        };
        tracing::trace!(session = %session.id, ?frame, "frame");

        if let Err(e) = relay.handle_frame(session, &mut transfer, frame).await {
            return e.into();
        }
    }
}
