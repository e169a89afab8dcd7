//! File transfer, client side: streaming a local file out and writing an
//! incoming one to the download directory.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use ferry_core::{FileHeader, WireError};

const READ_BUF: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("cannot announce file: {0}")]
    Header(#[from] WireError),
    #[error("{0} has no usable file name")]
    NoFileName(PathBuf),
    #[error("file shrank while sending: {sent} of {expected} bytes written")]
    Short { sent: u64, expected: u64 },
}

impl TransferError {
    /// True once a header has gone out without its full payload. The stream
    /// cannot be reframed after that.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::Short { .. })
    }
}

/// Short hex form of a digest for display.
pub fn short_digest(digest: &blake3::Hash) -> String {
    hex::encode(&digest.as_bytes()[..8])
}

// ── Sending ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SentFile {
    pub filename: String,
    pub size: u64,
    pub digest: blake3::Hash,
}

/// Announce `path` to `to` and stream exactly its size in bytes.
///
/// Everything that can be checked locally is checked before the header is
/// written, so a failure here leaves the stream in frame unless it is
/// [`TransferError::Short`].
pub async fn send_file<W>(writer: &mut W, to: &str, path: &Path) -> Result<SentFile, TransferError>
where
    W: AsyncWrite + Unpin,
{
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::NoFileName(path.to_path_buf()))?
        .to_string();

    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();
    let header = FileHeader::new(to, filename, size)?;

    writer.write_all(&header.encode()).await?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut sent = 0u64;
    while sent < size {
        let want = (size - sent).min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::Short {
                sent,
                expected: size,
            });
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    writer.flush().await?;

    Ok(SentFile {
        filename: header.filename,
        size,
        digest: hasher.finalize(),
    })
}

// ── Receiving ─────────────────────────────────────────────────────────────────

/// How an incoming file ended.
#[derive(Debug, Clone)]
pub enum Received {
    Complete {
        path: PathBuf,
        size: u64,
        digest: blake3::Hash,
    },
    /// The stream ended before every byte arrived.
    Incomplete {
        path: PathBuf,
        received: u64,
        expected: u64,
    },
    /// The bytes were read off the stream but could not be stored.
    Failed { path: PathBuf, error: String },
}

impl fmt::Display for Received {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Received::Complete { path, size, digest } => write!(
                f,
                "[+] File \"{}\" received successfully ({size} bytes, blake3 {})",
                path.display(),
                short_digest(digest)
            ),
            Received::Incomplete {
                path,
                received,
                expected,
            } => write!(
                f,
                "[-] File \"{}\" incomplete ({received} of {expected} bytes)",
                path.display()
            ),
            Received::Failed { path, error } => {
                write!(f, "[-] File \"{}\" could not be saved: {error}", path.display())
            }
        }
    }
}

struct Incoming {
    path: PathBuf,
    expected: u64,
    received: u64,
    /// `None` once storing has failed; bytes are then only counted.
    file: Option<File>,
    error: Option<String>,
    hasher: blake3::Hasher,
}

/// Writes incoming files under one directory.
pub struct FileReceiver {
    download_dir: PathBuf,
    current: Option<Incoming>,
}

impl FileReceiver {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            current: None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Where a file announced as `filename` will be written. Directory parts
    /// sent by the peer are dropped.
    pub fn target_path(&self, filename: &str) -> PathBuf {
        let base = Path::new(filename)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        self.download_dir.join(base)
    }

    /// Start a new file. Returns the outcome right away for an empty file.
    pub async fn begin(&mut self, header: &FileHeader) -> Option<Received> {
        if let Some(previous) = self.finish() {
            tracing::warn!(%previous, "new file announced before the last one finished");
        }

        let path = self.target_path(&header.filename);
        let (file, error) = match self.create(&path).await {
            Ok(file) => (Some(file), None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot create file, discarding payload");
                (None, Some(e.to_string()))
            }
        };
        tracing::debug!(path = %path.display(), size = header.size, "receiving file");

        self.current = Some(Incoming {
            path,
            expected: header.size,
            received: 0,
            file,
            error,
            hasher: blake3::Hasher::new(),
        });
        if header.size == 0 {
            return self.complete().await;
        }
        None
    }

    /// Store one payload slice. Returns the outcome once the last byte is in.
    pub async fn write(&mut self, data: Bytes) -> Option<Received> {
        let incoming = self.current.as_mut()?;
        let take = (data.len() as u64).min(incoming.expected - incoming.received) as usize;
        let data = &data[..take];

        incoming.hasher.update(data);
        incoming.received += take as u64;
        if let Some(file) = incoming.file.as_mut() {
            if let Err(e) = file.write_all(data).await {
                tracing::warn!(path = %incoming.path.display(), error = %e, "write failed, discarding rest");
                incoming.file = None;
                incoming.error = Some(e.to_string());
            }
        }

        if incoming.received == incoming.expected {
            return self.complete().await;
        }
        None
    }

    /// The stream ended. Reports a file that was still arriving.
    pub fn finish(&mut self) -> Option<Received> {
        let incoming = self.current.take()?;
        Some(Received::Incomplete {
            path: incoming.path,
            received: incoming.received,
            expected: incoming.expected,
        })
    }

    async fn create(&self, path: &Path) -> io::Result<File> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        File::create(path).await
    }

    async fn complete(&mut self) -> Option<Received> {
        let mut incoming = self.current.take()?;
        if let Some(mut file) = incoming.file.take() {
            if let Err(e) = file.flush().await {
                incoming.error.get_or_insert_with(|| e.to_string());
            }
        }
        Some(match incoming.error {
            Some(error) => Received::Failed {
                path: incoming.path,
                error,
            },
            None => Received::Complete {
                path: incoming.path,
                size: incoming.expected,
                digest: incoming.hasher.finalize(),
            },
        })
    }
}
