use crate::*;

/// A header missing its size ends mallory's session and nobody else's.
#[tokio::test]
async fn test_malformed_header_is_isolated() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    let mut mallory = server.join("mallory").await?;
    alice.wait_for_line("mallory has joined").await?;
    bob.wait_for_line("mallory has joined").await?;

    mallory.send_raw(b"FILE:bob:report.txt\n").await?;
    mallory.until_closed().await?;
    assert_eq!(alice.line().await?, "mallory has left");
    assert_eq!(bob.line().await?, "mallory has left");
    server.wait_for_sessions(2).await?;

    alice.say("still working").await?;
    assert_eq!(bob.line().await?, "alice: still working");

    server.stop().await;
    Ok(())
}

/// The sender vanishes mid-payload. bob sees the header, the bytes that made
/// it, and then the end of the stream instead of a complete file.
#[tokio::test]
async fn test_truncated_transfer_is_detectable() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;

    alice.send_raw(b"FILE:bob:cut.bin:1000\n").await?;
    alice.send_raw(&payload(10)).await?;
    match bob.next_frame().await? {
        Frame::FileHeader(h) => assert_eq!(h.size, 1000),
        other => bail!("expected header, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(alice);

    let rest = bob.until_closed().await?;
    let delivered: usize = rest
        .iter()
        .map(|f| match f {
            Frame::FileData(d) => d.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(delivered, 10);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_silent_connection_is_dropped() -> Result<()> {
    let server = start_server(|c| c.timeouts.name_secs = 1).await?;

    let mut lurker = TestClient::connect_raw(server.addr).await?;
    assert!(lurker.until_closed().await?.is_empty());
    assert!(server.registry.is_empty());

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_partial_name_is_never_registered() -> Result<()> {
    let server = start_server(|_| {}).await?;
    let mut alice = server.join("alice").await?;

    let mut half = TestClient::connect_raw(server.addr).await?;
    half.send_raw(b"bo").await?;
    drop(half);

    alice.expect_silence(Duration::from_millis(300)).await?;
    assert_eq!(server.registry.len(), 1);

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_name_with_colon_is_rejected() -> Result<()> {
    let server = start_server(|_| {}).await?;

    let mut block = [0u8; wire::NAME_BLOCK_LEN];
    block[..3].copy_from_slice(b"a:b");
    let mut bad = TestClient::connect_raw(server.addr).await?;
    bad.send_raw(&block).await?;
    bad.until_closed().await?;
    assert!(server.registry.is_empty());

    server.stop().await;
    Ok(())
}
