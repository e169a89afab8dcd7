//! Terminal input: turn typed lines into commands and send them.

use std::path::PathBuf;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, Lines};

use ferry_core::wire::FILE_MARKER;

use crate::transfer::{self, short_digest};

pub const PROMPT: &str = "> ";
pub const SENDTO_USAGE: &str = "Usage: /sendto <username> <filepath>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    /// Blank line; nothing is sent.
    Empty,
    Chat(String),
    SendFile { to: String, path: PathBuf },
    /// `/sendto` without both arguments.
    Usage,
    /// Input the server would misread; not sent.
    Refused(&'static str),
    /// Longer than the server accepts; not sent.
    TooLong { len: usize, max: usize },
}

/// Classify one typed line. `max_line_bytes` is the server's line limit.
pub fn parse(line: &str, max_line_bytes: usize) -> Command {
    let line = line.trim_end_matches(&['\r', '\n'][..]);

    if line == "exit" {
        return Command::Exit;
    }
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if let Some(rest) = line.strip_prefix("/sendto") {
        if !rest.is_empty() && !rest.starts_with(' ') {
            return Command::Chat(line.to_string());
        }
        let rest = rest.trim_start();
        return match rest.split_once(' ') {
            Some((to, path)) if !path.trim().is_empty() => Command::SendFile {
                to: to.to_string(),
                path: PathBuf::from(path.trim()),
            },
            _ => Command::Usage,
        };
    }
    if line.as_bytes().starts_with(FILE_MARKER) {
        return Command::Refused("messages starting with FILE: are reserved for file transfers");
    }
    if line.len() > max_line_bytes {
        return Command::TooLong {
            len: line.len(),
            max: max_line_bytes,
        };
    }
    Command::Chat(line.to_string())
}

pub fn prompt() {
    use std::io::Write;
    print!("{PROMPT}");
    let _ = std::io::stdout().flush();
}

/// Read commands from `lines` and write them to the server until `exit` or
/// end of input.
pub async fn run<R, W>(mut lines: Lines<R>, mut writer: W, max_line_bytes: usize) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse(&line, max_line_bytes) {
            Command::Exit => break,
            Command::Empty => {}
            Command::Usage => println!("{SENDTO_USAGE}"),
            Command::Refused(why) => println!("[-] Not sent: {why}"),
            Command::TooLong { len, max } => {
                println!("[-] Not sent: message is {len} bytes, the limit is {max}")
            }
            Command::Chat(text) => {
                writer.write_all(text.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            Command::SendFile { to, path } => {
                match transfer::send_file(&mut writer, &to, &path).await {
                    Ok(sent) => println!(
                        "[+] File \"{}\" sent to {to} ({} bytes, blake3 {})",
                        sent.filename,
                        sent.size,
                        short_digest(&sent.digest)
                    ),
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => println!("[-] {}: {e}", path.display()),
                }
            }
        }
    }

    writer.shutdown().await?;
    Ok(())
}
