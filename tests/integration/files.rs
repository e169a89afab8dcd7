use crate::*;

use ferry_core::codec::DEFAULT_CHUNK_BYTES;

async fn relay_file_of(len: usize) -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;

    let body = payload(len);
    let (sent, received) = tokio::join!(
        alice.send_file("bob", "blob.bin", &body),
        bob.receive_file()
    );
    sent?;
    let (header, got) = received?;
    assert_eq!(header, FileHeader::new("bob", "blob.bin", len as u64)?);
    assert_eq!(got.len(), len);
    assert_eq!(blake3::hash(&got), blake3::hash(&body), "payload of {len} bytes differs");

    // The stream is back in line mode afterwards.
    alice.say("after").await?;
    assert_eq!(bob.line().await?, "alice: after");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_file_empty() -> Result<()> {
    relay_file_of(0).await
}

#[tokio::test]
async fn test_file_one_byte() -> Result<()> {
    relay_file_of(1).await
}

#[tokio::test]
async fn test_file_exactly_one_chunk() -> Result<()> {
    relay_file_of(DEFAULT_CHUNK_BYTES).await
}

#[tokio::test]
async fn test_file_several_chunks() -> Result<()> {
    relay_file_of(3 * DEFAULT_CHUNK_BYTES + 17).await
}

#[tokio::test]
async fn test_file_large() -> Result<()> {
    relay_file_of(1024 * 1024 + 3).await
}

/// alice sends a 5000-byte report.txt to bob.
#[tokio::test]
async fn test_report_to_bob() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;

    let body = payload(5000);
    alice.send_file("bob", "report.txt", &body).await?;

    let (header, got) = bob.receive_file().await?;
    assert_eq!(header.to_string(), "FILE:bob:report.txt:5000");
    assert_eq!(got, body);

    server.stop().await;
    Ok(())
}

/// Chat from a third party is queued behind a file in flight, never spliced
/// into its payload.
#[tokio::test]
async fn test_chat_does_not_interleave_with_file() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    let mut carol = server.join("carol").await?;
    bob.wait_for_line("carol has joined").await?;

    let body = payload(20_000);
    let header = FileHeader::new("bob", "big.bin", body.len() as u64)?;
    alice.send_raw(&header.encode()).await?;
    alice.send_raw(&body[..7000]).await?;
    assert_eq!(bob.next_frame().await?, Frame::FileHeader(header));

    carol.say("interrupting").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    alice.send_raw(&body[7000..]).await?;

    let mut got = Vec::new();
    while got.len() < body.len() {
        match bob.next_frame().await? {
            Frame::FileData(data) => got.extend_from_slice(&data),
            other => bail!("payload interrupted by {other:?}"),
        }
    }
    assert_eq!(got, body);
    assert_eq!(bob.line().await?, "carol: interrupting");

    server.stop().await;
    Ok(())
}

/// alice stalls partway through a file to bob while carol keeps talking. bob's
/// chat waits behind the file instead of overflowing his queue, so he stays
/// connected and gets everything once alice finishes.
#[tokio::test]
async fn test_slow_sender_does_not_evict_recipient() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    let mut carol = server.join("carol").await?;
    bob.wait_for_line("carol has joined").await?;

    let body = payload(100);
    let header = FileHeader::new("bob", "slow.bin", body.len() as u64)?;
    alice.send_raw(&header.encode()).await?;
    alice.send_raw(&body[..10]).await?;
    assert_eq!(bob.next_frame().await?, Frame::FileHeader(header));

    for batch in 0..6 {
        let mut lines = String::new();
        for i in 0..50 {
            lines.push_str(&format!("line {}\n", batch * 50 + i));
        }
        carol.send_raw(lines.as_bytes()).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.registry.len(), 3);

    alice.send_raw(&body[10..]).await?;
    let mut got = Vec::new();
    while got.len() < body.len() {
        match bob.next_frame().await? {
            Frame::FileData(data) => got.extend_from_slice(&data),
            other => bail!("payload interrupted by {other:?}"),
        }
    }
    assert_eq!(got, body);
    for i in 0..300 {
        assert_eq!(bob.line().await?, format!("carol: line {i}"));
    }
    assert_eq!(server.registry.len(), 3);

    server.stop().await;
    Ok(())
}

/// A file to carol, who is not connected: one notice to the sender, the
/// payload is swallowed, and nothing else changes.
#[tokio::test]
async fn test_file_to_absent_user() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    alice.wait_for_line("bob has joined").await?;

    alice.send_file("carol", "x.bin", &payload(3000)).await?;
    assert_eq!(alice.line().await?, "[Server] User not found");
    assert_eq!(server.registry.len(), 2);

    alice.say("still here").await?;
    assert_eq!(bob.line().await?, "alice: still here");
    alice.expect_silence(Duration::from_millis(200)).await?;

    server.stop().await;
    Ok(())
}
