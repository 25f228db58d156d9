//! Control connection handler
//!
//! Runs one FTP session: a reader task frames command lines and forwards
//! them over a channel, while the session loop dispatches commands and
//! watches the transfer in flight, if any.

use log::{debug, error, info, warn};
use socket2::SockRef;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::client::registry::ClientGuard;
use crate::client::state::Session;
use crate::config::ServerConfig;
use crate::error::ProtocolError;
use crate::middleware::{log_command, log_disconnection, log_reply};
use crate::protocol::handlers::handle_cmd_stat_path;
use crate::protocol::responses::{READY, SERVICE_UNAVAILABLE};
use crate::protocol::{
    Command, CommandStatus, Reply, completion_replies, handle_command, handle_protocol_error,
    parse_command, server_status,
};
use crate::transfer::{TransferHandle, TransferOutcome, TransferSettings};

/// Lines buffered between the reader task and the session.
const LINE_QUEUE_DEPTH: usize = 64;

type ParsedLine = Result<Command, ProtocolError>;

/// Handles an FTP client session until QUIT, disconnect or idle timeout.
///
/// - Greets the client with the configured banner.
/// - Dispatches commands using `handle_command`.
/// - While a transfer runs, answers ABOR and STAT immediately and queues
///   everything else until the transfer's final reply has been sent.
pub async fn handle_client(
    stream: TcpStream,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    _guard: ClientGuard,
) {
    if let Err(e) = run_session(stream, client_addr, &config).await {
        error!("Control connection error for {client_addr}: {e}");
    }
    log_disconnection(client_addr);
}

async fn run_session(
    stream: TcpStream,
    client_addr: SocketAddr,
    config: &ServerConfig,
) -> io::Result<()> {
    // An urgent ABOR (sent as TCP out-of-band data) must arrive in the
    // normal byte stream.
    if let Err(e) = SockRef::from(&stream).set_out_of_band_inline(true) {
        warn!("Could not enable OOB-inline for {client_addr}: {e}");
    }
    let local_addr = stream.local_addr()?;
    let (read_half, mut writer) = stream.into_split();

    send_reply(&mut writer, client_addr, &Reply::new(READY, &config.banner)).await?;

    let (tx, mut rx) = mpsc::channel(LINE_QUEUE_DEPTH);
    let reader = tokio::spawn(read_lines(read_half, config.max_command_length, tx));

    let mut session = Session::new(client_addr, local_addr, &config.home);
    let settings = TransferSettings {
        buffer_size: config.buffer_size,
        io_timeout: config.connection_timeout(),
    };
    let mut active: Option<TransferHandle> = None;
    let mut abort_requested = false;
    let mut deferred: VecDeque<ParsedLine> = VecDeque::new();

    let result = loop {
        if active.is_none() {
            if let Some(parsed) = deferred.pop_front() {
                match dispatch(&mut session, parsed, &mut writer, config, settings).await {
                    Ok(Dispatched::Continue) => {}
                    Ok(Dispatched::Started(handle)) => active = Some(handle),
                    Ok(Dispatched::Close) => break Ok(()),
                    Err(e) => break Err(e),
                }
                continue;
            }
        }

        tokio::select! {
            outcome = wait_transfer(&mut active), if active.is_some() => {
                if let Some(handle) = active.take() {
                    log_outcome(&handle, &outcome);
                }
                let replies = completion_replies(&outcome, std::mem::take(&mut abort_requested));
                if let Err(e) = send_replies(&mut writer, client_addr, &replies).await {
                    break Err(e);
                }
            }
            line = rx.recv() => {
                let Some(line) = line else {
                    debug!("Control connection closed by {client_addr}");
                    break Ok(());
                };
                let parsed = line.and_then(|raw| parse_command(&raw));

                if active.is_none() {
                    match dispatch(&mut session, parsed, &mut writer, config, settings).await {
                        Ok(Dispatched::Continue) => {}
                        Ok(Dispatched::Started(handle)) => active = Some(handle),
                        Ok(Dispatched::Close) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                    continue;
                }
                let Some(handle) = active.as_mut() else {
                    continue;
                };

                match parsed {
                    Ok(Command::ABOR) => {
                        info!("{client_addr} aborting {}", handle.label());
                        abort_requested = true;
                        handle.cancel();
                    }
                    Ok(Command::STAT(None)) => {
                        let reply = server_status(&session, config, Some(&*handle));
                        if let Err(e) = send_reply(&mut writer, client_addr, &reply).await {
                            break Err(e);
                        }
                    }
                    Ok(Command::STAT(Some(arg))) => {
                        let result = handle_cmd_stat_path(&session, &arg, config);
                        if let Err(e) = send_reply(&mut writer, client_addr, &result.reply).await {
                            break Err(e);
                        }
                    }
                    other => deferred.push_back(other),
                }
            }
            _ = sleep(config.idle_timeout()), if active.is_none() => {
                info!("Idle timeout for {client_addr}");
                let reply = Reply::new(SERVICE_UNAVAILABLE, "Timeout.");
                break send_reply(&mut writer, client_addr, &reply).await;
            }
        }
    };

    if let Some(handle) = active.take() {
        warn!("Tearing down {} for {client_addr}", handle.label());
        handle.kill();
    }
    reader.abort();
    let _ = writer.shutdown().await;
    result
}

enum Dispatched {
    Continue,
    Started(TransferHandle),
    Close,
}

/// Runs one parsed command and sends its reply.
async fn dispatch(
    session: &mut Session,
    parsed: ParsedLine,
    writer: &mut OwnedWriteHalf,
    config: &ServerConfig,
    settings: TransferSettings,
) -> io::Result<Dispatched> {
    let client_addr = session.peer_addr();
    let result = match parsed {
        Ok(command) => {
            log_command(client_addr, &command);
            handle_command(session, command, config).await
        }
        Err(e) => handle_protocol_error(&e),
    };

    send_reply(writer, client_addr, &result.reply).await?;
    Ok(match result.status {
        CommandStatus::Success | CommandStatus::Failure(_) => Dispatched::Continue,
        CommandStatus::CloseConnection => Dispatched::Close,
        CommandStatus::Transfer(prepared) => {
            Dispatched::Started(TransferHandle::spawn(prepared, settings))
        }
    })
}

async fn wait_transfer(active: &mut Option<TransferHandle>) -> TransferOutcome {
    match active {
        Some(handle) => handle.wait().await,
        None => std::future::pending().await,
    }
}

fn log_outcome(handle: &TransferHandle, outcome: &TransferOutcome) {
    match outcome {
        TransferOutcome::Completed { bytes } => {
            info!("Transfer complete: {} ({bytes} bytes)", handle.label())
        }
        TransferOutcome::Aborted { bytes } => {
            warn!("Transfer aborted: {} after {bytes} bytes", handle.label())
        }
        TransferOutcome::Failed(e) => warn!("Transfer failed: {}: {e}", handle.label()),
    }
}

async fn send_reply(
    writer: &mut OwnedWriteHalf,
    client_addr: SocketAddr,
    reply: &Reply,
) -> io::Result<()> {
    log_reply(client_addr, reply);
    writer.write_all(reply.to_wire().as_bytes()).await?;
    writer.flush().await
}

async fn send_replies(
    writer: &mut OwnedWriteHalf,
    client_addr: SocketAddr,
    replies: &[Reply],
) -> io::Result<()> {
    for reply in replies {
        send_reply(writer, client_addr, reply).await?;
    }
    Ok(())
}

/// Frames CRLF-terminated lines from the control connection.
///
/// Lines longer than `max_len` are discarded up to their terminator and
/// reported as `LineTooLong`. The task ends at EOF, on a read error, or
/// when the session stops listening.
async fn read_lines(
    read_half: OwnedReadHalf,
    max_len: usize,
    tx: mpsc::Sender<Result<Vec<u8>, ProtocolError>>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    let mut oversized = false;

    loop {
        let (consumed, complete) = {
            let available = match reader.fill_buf().await {
                Ok([]) => return,
                Ok(available) => available,
                Err(e) => {
                    debug!("Control read failed: {e}");
                    return;
                }
            };
            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..=i], true),
                None => (available, false),
            };
            if !oversized {
                line.extend_from_slice(chunk);
            }
            (chunk.len(), complete)
        };
        reader.consume(consumed);

        if line.len() > max_len {
            line.clear();
            oversized = true;
        }

        if complete {
            let item = if std::mem::take(&mut oversized) {
                Err(ProtocolError::LineTooLong)
            } else {
                Ok(std::mem::take(&mut line))
            };
            if tx.send(item).await.is_err() {
                return;
            }
        }
    }
}
