//! ferry-chat — terminal client for a Ferry relay.
//!
//! Usage: `ferry-chat <port> [--name <name>]`

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ferry_core::config::FerryConfig;
use ferry_core::wire;

mod inbound;
mod input;
mod transfer;

use transfer::FileReceiver;

fn print_usage() {
    eprintln!("Usage: ferry-chat <port> [--name <name>]");
    eprintln!();
    eprintln!("Commands once connected:");
    eprintln!("  <text>                      send a chat message");
    eprintln!("  /sendto <user> <filepath>   send a file");
    eprintln!("  exit                        leave");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut name: Option<String> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--name" {
            i += 1;
            name = Some(args.get(i).context("--name requires a value")?.clone());
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    let port: u16 = match remaining.as_slice() {
        [port] => port.parse().context("port must be a number")?,
        _ => {
            print_usage();
            std::process::exit(1);
        }
    };

    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let name = match name {
        Some(name) => name,
        None => {
            print!("Please enter your name: ");
            std::io::Write::flush(&mut std::io::stdout())?;
            lines
                .next_line()
                .await?
                .context("no name entered")?
                .trim()
                .to_string()
        }
    };
    let block = match wire::encode_name(&name) {
        Ok(block) => block,
        Err(e) => bail!(
            "invalid name {name:?}: {e} (1-{} bytes, no ':')",
            wire::MAX_NAME_LEN
        ),
    };

    let addr = SocketAddr::new(config.network.bind_addr, port);
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}; is ferryd running?"))?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(&block).await.context("failed to send name")?;
    tracing::debug!(%addr, %name, "connected");

    println!("=== WELCOME TO THE CHATROOM ===");

    let download_dir = config.client.download_dir.clone();
    let mut inbound_task = tokio::spawn(inbound::run(
        read_half,
        config.limits.frame_limits().relayed(),
        FileReceiver::new(download_dir),
    ));
    let mut input_task = tokio::spawn(input::run(
        lines,
        write_half,
        config.limits.max_line_bytes,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        r = &mut input_task => match r {
            Ok(Err(e)) => eprintln!("\n[-] {e:#}"),
            Err(e) => tracing::error!("input task failed: {e}"),
            Ok(Ok(())) => {}
        },
        r = &mut inbound_task => match r {
            Ok(Ok(())) => println!("\rServer closed the connection"),
            Ok(Err(e)) => eprintln!("\n[-] connection lost: {e}"),
            Err(e) => tracing::error!("inbound task failed: {e}"),
        },
    }

    println!("\nBye");
    // Stdin reads block a runtime thread; exit rather than wait on them.
    std::process::exit(0);
}
