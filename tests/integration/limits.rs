use crate::*;

#[tokio::test]
async fn test_max_clients_rejects_extra_connection() -> Result<()> {
    let server = start_server(|c| c.limits.max_clients = 2).await?;
    let mut alice = server.join("alice").await?;
    let _bob = server.join("bob").await?;
    alice.wait_for_line("bob has joined").await?;

    let mut carol = TestClient::connect(server.addr, "carol").await?;
    let seen = carol.until_closed().await?;
    assert_eq!(seen, vec![Frame::Chat("Max clients reached".into())]);

    assert_eq!(server.registry.len(), 2);
    alice.expect_silence(Duration::from_millis(200)).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_slot_frees_after_leave() -> Result<()> {
    let server = start_server(|c| c.limits.max_clients = 1).await?;
    let alice = server.join("alice").await?;
    drop(alice);
    server.wait_for_sessions(0).await?;

    let mut bob = server.join("bob").await?;
    bob.expect_silence(Duration::from_millis(100)).await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_oversized_file_drops_sender() -> Result<()> {
    let server = start_server(|c| c.limits.max_file_bytes = 1000).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    alice.wait_for_line("bob has joined").await?;

    bob.send_raw(b"FILE:alice:huge.bin:1001\n").await?;
    bob.until_closed().await?;
    assert_eq!(alice.line().await?, "bob has left");

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_overlong_line_drops_sender() -> Result<()> {
    let server = start_server(|c| c.limits.max_line_bytes = 64).await?;
    let mut alice = server.join("alice").await?;
    let mut bob = server.join("bob").await?;
    alice.wait_for_line("bob has joined").await?;

    bob.send_raw(&[b'a'; 200]).await?;
    bob.until_closed().await?;
    assert_eq!(alice.line().await?, "bob has left");

    server.stop().await;
    Ok(())
}
