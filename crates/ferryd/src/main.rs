//! ferryd — Ferry chat relay daemon.
//!
//! Usage: `ferryd <port>`

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;
use ferryd::Server;

fn print_usage() {
    eprintln!("Usage: ferryd <port>");
    eprintln!();
    eprintln!("The port may be omitted when the config file or FERRY_PORT sets one.");
}

/// The port to listen on: the single argument, or the configured port when
/// there is no argument. `None` means the invocation is wrong.
fn resolve_port(args: &[String], configured: u16) -> Result<Option<u16>> {
    match args {
        [port] => {
            let port = port
                .parse()
                .with_context(|| format!("invalid port {port:?}; usage: ferryd <port>"))?;
            Ok(Some(port))
        }
        [] if configured != 0 => Ok(Some(configured)),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    match resolve_port(&args, config.network.port)? {
        Some(port) => config.network.port = port,
        None => {
            print_usage();
            std::process::exit(1);
        }
    }

    let server = Server::bind(&config).await.with_context(|| {
        format!(
            "failed to listen on {}:{}",
            config.network.bind_addr, config.network.port
        )
    })?;
    tracing::info!(
        addr = %server.local_addr(),
        max_clients = config.limits.max_clients,
        max_file_bytes = config.limits.max_file_bytes,
        "ferryd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let mut server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            let _ = server_task.await;
        }
        r = &mut server_task => tracing::error!("server task exited: {:?}", r),
    }

    Ok(())
}
