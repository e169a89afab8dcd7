//! Ferry integration test harness.
//!
//! Every test starts its own in-process `ferryd` server on an OS-assigned
//! loopback port and talks to it over real TCP sockets:
//!
//!   cargo test --test integration
//!
//! Servers are independent, so tests may run in parallel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;

use ferry_core::config::FerryConfig;
use ferry_core::{wire, FileHeader, Frame, FrameCodec, FrameLimits};
use ferry_services::SessionRegistry;
use ferryd::Server;

mod failures;
mod files;
mod limits;

// ── Harness ───────────────────────────────────────────────────────────────────

/// How long any single expectation may take before the test fails.
pub const STEP: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Start a server on 127.0.0.1:0. `configure` may adjust limits and timeouts.
pub async fn start_server(configure: impl FnOnce(&mut FerryConfig)) -> Result<TestServer> {
    let mut config = FerryConfig::default();
    config.network.port = 0;
    config.timeouts.write_secs = 2;
    configure(&mut config);

    let server = Server::bind(&config).await.context("bind test server")?;
    let addr = server.local_addr();
    let registry = server.registry();
    let (shutdown, _) = broadcast::channel(1);
    let task = tokio::spawn(server.run(shutdown.subscribe()));

    Ok(TestServer {
        addr,
        registry,
        shutdown,
        task,
    })
}

impl TestServer {
    /// Wait until exactly `n` sessions are registered.
    pub async fn wait_for_sessions(&self, n: usize) -> Result<()> {
        let deadline = tokio::time::Instant::now() + STEP;
        while self.registry.len() != n {
            if tokio::time::Instant::now() > deadline {
                bail!("expected {n} sessions, have {}", self.registry.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    /// Connect and join as `name`, returning once the session is registered.
    pub async fn join(&self, name: &str) -> Result<TestClient> {
        let before = self.registry.len();
        let client = TestClient::connect(self.addr, name).await?;
        self.wait_for_sessions(before + 1).await?;
        Ok(client)
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(STEP, self.task).await;
    }
}

pub struct TestClient {
    frames: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    /// Open a connection and send the 32-byte name block.
    pub async fn connect(addr: SocketAddr, name: &str) -> Result<Self> {
        let mut client = Self::connect_raw(addr).await?;
        client.send_raw(&wire::encode_name(name)?).await?;
        Ok(client)
    }

    /// Open a connection without sending anything.
    pub async fn connect_raw(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect")?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            frames: FramedRead::new(read_half, FrameCodec::lines(FrameLimits::default().relayed())),
            writer,
        })
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await.context("write")
    }

    pub async fn say(&mut self, text: &str) -> Result<()> {
        self.send_raw(format!("{text}\n").as_bytes()).await
    }

    pub async fn send_file(&mut self, to: &str, filename: &str, body: &[u8]) -> Result<()> {
        let header = FileHeader::new(to, filename, body.len() as u64)?;
        self.send_raw(&header.encode()).await?;
        self.send_raw(body).await
    }

    /// Next frame, failing if none arrives in time or the stream ends.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        match tokio::time::timeout(STEP, self.frames.next()).await {
            Err(_) => bail!("no frame within {STEP:?}"),
            Ok(None) => bail!("connection closed"),
            Ok(Some(frame)) => Ok(frame?),
        }
    }

    /// Next chat line as text.
    pub async fn line(&mut self) -> Result<String> {
        match self.next_frame().await? {
            Frame::Chat(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            other => bail!("expected a line, got {other:?}"),
        }
    }

    /// Skip lines until `expected` arrives.
    pub async fn wait_for_line(&mut self, expected: &str) -> Result<()> {
        loop {
            if self.line().await? == expected {
                return Ok(());
            }
        }
    }

    /// A complete file: its header and exactly `size` payload bytes.
    pub async fn receive_file(&mut self) -> Result<(FileHeader, Vec<u8>)> {
        let header = match self.next_frame().await? {
            Frame::FileHeader(h) => h,
            other => bail!("expected a file header, got {other:?}"),
        };
        let mut body = Vec::with_capacity(header.size as usize);
        while (body.len() as u64) < header.size {
            match self.next_frame().await? {
                Frame::FileData(data) => body.extend_from_slice(&data),
                other => bail!("expected file data, got {other:?}"),
            }
        }
        Ok((header, body))
    }

    /// Collect whatever arrives until the server closes the connection.
    pub async fn until_closed(&mut self) -> Result<Vec<Frame>> {
        let mut seen = Vec::new();
        loop {
            match tokio::time::timeout(STEP, self.frames.next()).await {
                Err(_) => bail!("connection still open after {STEP:?}"),
                Ok(None) | Ok(Some(Err(_))) => return Ok(seen),
                Ok(Some(Ok(frame))) => seen.push(frame),
            }
        }
    }

    /// Assert nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) -> Result<()> {
        match tokio::time::timeout(quiet, self.frames.next()).await {
            Err(_) => Ok(()),
            Ok(other) => bail!("expected silence, got {other:?}"),
        }
    }
}

/// Deterministic test payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
