//! TCP listener — accepts clients and spawns a session task for each.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use ferry_core::config::FerryConfig;
use ferry_core::wire;
use ferry_services::{Relay, SessionRegistry};

use crate::session::{SessionSettings, SessionTask};

const BACKLOG: u32 = 128;

pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    relay: Arc<Relay>,
    settings: SessionSettings,
}

impl Server {
    /// Bind `bind_addr:port` from the config with address reuse enabled.
    pub async fn bind(config: &FerryConfig) -> io::Result<Self> {
        let addr = SocketAddr::new(config.network.bind_addr, config.network.port);
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(BACKLOG)?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(SessionRegistry::new(config.limits.max_clients));
        let relay = Arc::new(Relay::new(
            registry,
            config.timeouts.write_timeout(),
            config.limits.transfer_buffer,
        ));

        Ok(Self {
            listener,
            local_addr,
            relay,
            settings: SessionSettings::from_config(config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(self.relay.registry())
    }

    /// Accept until `shutdown` fires, then wait briefly for sessions to wind
    /// down. Every session gets its own subscription to `shutdown`.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(addr = %self.local_addr, "listening");
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("listener shutting down");
                    break;
                }

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%addr, error = %e, "set_nodelay failed");
                    }

                    if self.relay.registry().is_full() {
                        tracing::info!(%addr, capacity = self.relay.registry().capacity(), "max clients reached, rejecting");
                        sessions.spawn(reject(stream, self.settings.write_timeout));
                        continue;
                    }

                    let task = SessionTask::new(
                        self.relay.registry().next_id(),
                        addr,
                        stream,
                        Arc::clone(&self.relay),
                        self.settings.clone(),
                        shutdown.resubscribe(),
                    );
                    sessions.spawn(async move {
                        task.run().await;
                    });
                }
            }
        }

        let grace = self.settings.write_timeout;
        if tokio::time::timeout(grace, async { while sessions.join_next().await.is_some() {} })
            .await
            .is_err()
        {
            tracing::warn!(remaining = sessions.len(), "sessions still open after shutdown, aborting");
            sessions.abort_all();
        }
    }
}

/// Tell a connection the server is full, then close it.
///
/// Whatever the client already sent is read off before the socket is dropped
/// so the close is a clean FIN and the notice is not lost to a reset.
async fn reject(mut stream: TcpStream, write_timeout: Duration) {
    let result = tokio::time::timeout(write_timeout, async {
        stream.write_all(wire::MAX_CLIENTS_REACHED).await?;
        stream.shutdown().await?;
        let mut scratch = [0u8; 512];
        while stream.read(&mut scratch).await? > 0 {}
        Ok::<_, io::Error>(())
    })
    .await;
    if let Ok(Err(e)) = result {
        tracing::debug!(error = %e, "rejected connection closed uncleanly");
    }
}
