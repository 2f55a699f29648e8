//! Thin client for the daemon's local subscriber endpoint.

use std::net::Ipv4Addr;

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use crate::broadcast::OutboundMessage;

use super::output;

async fn connect(port: u16) -> Result<TcpStream> {
    TcpStream::connect((Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("Can't reach the daemon on port {port}. Is it running?"))
}

/// Prints the current snapshot; with `follow` keeps streaming every update
/// the daemon pushes until the connection dies.
pub async fn show_status(port: u16, follow: bool) -> Result<()> {
    let stream = connect(port).await?;
    let (read_half, _write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let message: OutboundMessage = serde_json::from_str(&line)?;
        match message {
            OutboundMessage::InitialStatus { focus, pomodoro, .. }
            | OutboundMessage::StatusUpdate { focus, pomodoro, .. } => {
                output::print_status(&focus, &pomodoro);
                if !follow {
                    return Ok(());
                }
            }
            other if follow => output::print_event(&other),
            _ => {}
        }
    }
    Ok(())
}

/// Sends one command and prints the daemon's reply.
pub async fn send_command(port: u16, command: &str) -> Result<()> {
    let stream = connect(port).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let request = serde_json::json!({ "command": command });
    write_half
        .write_all(format!("{request}\n").as_bytes())
        .await?;

    // The reply shares the stream with broadcasts; skip everything else.
    while let Some(line) = lines.next_line().await? {
        let message: OutboundMessage = serde_json::from_str(&line)?;
        match message {
            OutboundMessage::CommandResponse { success, message, .. } => {
                println!("{message}");
                if success {
                    return Ok(());
                }
                return Err(anyhow!("Command {command} failed"));
            }
            OutboundMessage::Pong { .. } => {
                println!("pong");
                return Ok(());
            }
            OutboundMessage::Error { message } => {
                return Err(anyhow!("Daemon rejected the command: {message}"));
            }
            _ => {}
        }
    }
    Err(anyhow!("Daemon closed the connection without a reply"))
}
