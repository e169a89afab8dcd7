//! Inbound stream: print chat, save files.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use ferry_core::{Frame, FrameCodec, FrameError, FrameLimits};

use crate::input::prompt;
use crate::transfer::{FileReceiver, Received};

/// Consume the server stream until it ends. A file cut short by the end of
/// the stream is reported as incomplete.
pub async fn run<R>(reader: R, limits: FrameLimits, mut receiver: FileReceiver) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, FrameCodec::lines(limits));

    let result = loop {
        let frame = match frames.next().await {
            None => break Ok(()),
            Some(Err(e)) => break Err(e),
            Some(Ok(frame)) => frame,
        };
        match frame {
            Frame::Chat(line) => {
                println!("\r{}", String::from_utf8_lossy(&line));
                prompt();
            }
            Frame::FileHeader(header) => {
                tracing::debug!(%header, "incoming file");
                report(receiver.begin(&header).await);
            }
            Frame::FileData(data) => report(receiver.write(data).await),
            Frame::Name(_) => {}
        }
    };

    report(receiver.finish());
    result
}

fn report(outcome: Option<Received>) {
    if let Some(outcome) = outcome {
        println!("\r{outcome}");
        prompt();
    }
}
