//! Data channel command handlers
//!
//! PORT/EPRT/PASV/EPSV arm a data channel on the session; RETR, STOR, APPE,
//! LIST and NLST consume it. A transfer command validates everything it can
//! before the data connection is opened, so that failures such as a restart
//! offset past end of file are reported without touching the data channel.

use log::{info, warn};
use std::io::{Seek, SeekFrom};
use std::net::{IpAddr, Ipv4Addr};

use crate::client::Session;
use crate::config::ServerConfig;
use crate::error::{ErrorKind, TransferError, handle_error};
use crate::protocol::commands::{CommandResult, CommandStatus};
use crate::protocol::handlers::{resolve, storage_failure};
use crate::protocol::responses::*;
use crate::storage::listing::{ListingFormat, collect_entries, render_listing};
use crate::storage::operations;
use crate::transfer::{
    DataChannel, EpsvRequest, PreparedTransfer, TransferJob, TransferOutcome,
    format_pasv_reply, parse_eprt_argument, parse_epsv_argument, parse_port_argument,
    setup_active_mode, setup_data_stream, setup_passive_mode,
};

fn transfer_failure(verb: &str, code: u16, text: impl Into<String>, err: &TransferError) -> CommandResult {
    let kind = err.kind();
    handle_error(verb, kind, err);
    CommandResult::failure(kind, code, text)
}

fn epsv_all_refusal(verb: &str) -> CommandResult {
    CommandResult::failure(
        TransferError::EpsvAllActive.kind(),
        BAD_SEQUENCE,
        format!("{verb} not allowed after EPSV ALL."),
    )
}

/// Handles PORT: arms an active-mode channel.
pub fn handle_port(session: &mut Session, arg: &str, config: &ServerConfig) -> CommandResult {
    if session.is_epsv_all() {
        return epsv_all_refusal("PORT");
    }

    let target = match parse_port_argument(arg) {
        Ok(target) => target,
        Err(e) => return transfer_failure("PORT", SYNTAX_ERROR, "Illegal PORT command.", &e),
    };
    match setup_active_mode(
        target,
        session.peer_addr().ip(),
        config.allow_privileged_ports,
        config.allow_foreign_addresses,
    ) {
        Ok(active) => {
            session.set_data_channel(DataChannel::Active {
                target: active.data_socket,
            });
            CommandResult::success(OK, "PORT command successful. Consider using PASV.")
        }
        Err(e) => transfer_failure("PORT", ARGUMENT_ERROR, "Illegal PORT command.", &e),
    }
}

/// Handles EPRT: like PORT, for either address family.
pub fn handle_eprt(session: &mut Session, arg: &str, config: &ServerConfig) -> CommandResult {
    if session.is_epsv_all() {
        return epsv_all_refusal("EPRT");
    }

    let target = match parse_eprt_argument(arg) {
        Ok(target) => target,
        Err(e @ TransferError::UnsupportedProtocol) => {
            return transfer_failure(
                "EPRT",
                PROTOCOL_NOT_SUPPORTED,
                "Network protocol not supported, use (1,2)",
                &e,
            );
        }
        Err(e) => return transfer_failure("EPRT", SYNTAX_ERROR, "Bad EPRT command.", &e),
    };
    match setup_active_mode(
        target,
        session.peer_addr().ip(),
        config.allow_privileged_ports,
        config.allow_foreign_addresses,
    ) {
        Ok(active) => {
            session.set_data_channel(DataChannel::Active {
                target: active.data_socket,
            });
            CommandResult::success(OK, "EPRT command successful. Consider using EPSV.")
        }
        Err(e) => transfer_failure("EPRT", ARGUMENT_ERROR, "Bad EPRT command.", &e),
    }
}

/// Handles PASV: binds a listener and reports it in the 227 format.
pub async fn handle_pasv(session: &mut Session, config: &ServerConfig) -> CommandResult {
    if session.is_epsv_all() {
        return epsv_all_refusal("PASV");
    }

    let local_ip = session.local_addr().ip().to_canonical();
    let advertised = match &config.pasv_address {
        Some(address) => address.parse::<Ipv4Addr>().ok(),
        None => match local_ip {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        },
    };
    let Some(advertised) = advertised else {
        return CommandResult::failure(
            ErrorKind::BadChannelState,
            CANT_OPEN_DATA,
            "PASV requires an IPv4 address; use EPSV.",
        );
    };

    match setup_passive_mode(local_ip, config.data_port_range()).await {
        Ok(passive) => {
            let port = passive.data_socket.port();
            session.set_data_channel(DataChannel::Passive {
                listener: passive.listener,
            });
            CommandResult::success(PASSIVE_MODE, format_pasv_reply(advertised, port))
        }
        Err(e) => transfer_failure("PASV", CANT_OPEN_DATA, "Can't open passive connection.", &e),
    }
}

/// Handles EPSV, including the sticky `EPSV ALL`.
pub async fn handle_epsv(
    session: &mut Session,
    arg: Option<&str>,
    config: &ServerConfig,
) -> CommandResult {
    let family = session.address_family();
    let unsupported = || {
        CommandResult::failure(
            ErrorKind::Unsupported,
            PROTOCOL_NOT_SUPPORTED,
            format!("Network protocol not supported, use ({})", family.protocol_number()),
        )
    };

    match parse_epsv_argument(arg) {
        Ok(EpsvRequest::All) => {
            session.set_epsv_all();
            return CommandResult::success(OK, "EPSV ALL ok.");
        }
        Ok(EpsvRequest::Family(requested)) if requested != family => return unsupported(),
        Ok(_) => {}
        Err(TransferError::UnsupportedProtocol) => return unsupported(),
        Err(e) => return transfer_failure("EPSV", ARGUMENT_ERROR, "Bad EPSV command.", &e),
    }

    let local_ip = session.local_addr().ip();
    match setup_passive_mode(local_ip, config.data_port_range()).await {
        Ok(passive) => {
            let port = passive.data_socket.port();
            session.set_data_channel(DataChannel::Passive {
                listener: passive.listener,
            });
            CommandResult::success(
                EXTENDED_PASSIVE_MODE,
                format!("Entering Extended Passive Mode (|||{port}|)"),
            )
        }
        Err(e) => transfer_failure("EPSV", CANT_OPEN_DATA, "Can't open passive connection.", &e),
    }
}

/// Takes the armed data channel or produces the 425 reply.
fn take_channel(session: &mut Session, verb: &str) -> Result<DataChannel, CommandResult> {
    session.take_data_channel().ok_or_else(|| {
        let err = TransferError::DataChannelNotInitialized;
        transfer_failure(verb, CANT_OPEN_DATA, err.to_string(), &err)
    })
}

/// Opens the data connection and wraps up the transfer for the session.
async fn start_transfer(
    session: &Session,
    channel: DataChannel,
    job: TransferJob,
    label: String,
    preliminary: String,
    config: &ServerConfig,
) -> CommandResult {
    let verb = label.split(' ').next().unwrap_or_default().to_string();
    match setup_data_stream(
        channel,
        session.peer_addr().ip(),
        config.allow_foreign_addresses,
        config.connection_timeout(),
    )
    .await
    {
        Ok(stream) => CommandResult::with_reply(
            CommandStatus::Transfer(PreparedTransfer { job, stream, label }),
            Reply::new(OPENING_DATA, preliminary),
        ),
        Err(e) => transfer_failure(&verb, CANT_OPEN_DATA, "Failed to establish connection.", &e),
    }
}

/// Handles RETR, honouring a pending restart offset.
pub async fn handle_retr(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    let offset = session.take_restart_offset();
    let channel = match take_channel(session, "RETR") {
        Ok(channel) => channel,
        Err(reply) => return reply,
    };

    let resolved = match resolve(session, path, config) {
        Ok(resolved) => resolved,
        Err(e) => return storage_failure("RETR", Some(FILE_NOT_FOUND), "Failed to open file", e),
    };
    let (mut file, size) = match operations::open_for_retrieve(&resolved, &config.server_root) {
        Ok(opened) => opened,
        Err(e) => return storage_failure("RETR", Some(FILE_NOT_FOUND), "Failed to open file", e),
    };

    if offset > size {
        let err = TransferError::RestartBeyondEof { offset, size };
        return transfer_failure("RETR", FILE_UNAVAILABLE, err.to_string(), &err);
    }
    if offset > 0 {
        if let Err(e) = file.seek(SeekFrom::Start(offset)) {
            return storage_failure("RETR", Some(LOCAL_ERROR), "Failed to seek", e.into());
        }
    }

    let transfer_type = session.transfer_type();
    let preliminary = format!(
        "Opening {transfer_type} mode data connection for {} ({size} bytes).",
        resolved.virtual_path()
    );
    info!("{} RETR {} from offset {offset}", session.peer_addr(), resolved.virtual_path());
    start_transfer(
        session,
        channel,
        TransferJob::Send {
            file: tokio::fs::File::from_std(file),
            transfer_type,
        },
        format!("RETR {}", resolved.virtual_path()),
        preliminary,
        config,
    )
    .await
}

/// Handles STOR and APPE.
///
/// STOR with a restart offset keeps the first `offset` bytes and writes
/// from there; APPE refuses a restart offset.
pub async fn handle_stor(
    session: &mut Session,
    path: &str,
    append: bool,
    config: &ServerConfig,
) -> CommandResult {
    let verb = if append { "APPE" } else { "STOR" };
    let offset = session.take_restart_offset();
    let channel = match take_channel(session, verb) {
        Ok(channel) => channel,
        Err(reply) => return reply,
    };

    if append && offset != 0 {
        let err = TransferError::RestartWithAppend;
        return transfer_failure(verb, FILE_UNAVAILABLE, err.to_string(), &err);
    }

    let resolved = match resolve(session, path, config) {
        Ok(resolved) => resolved,
        Err(e) => return storage_failure(verb, Some(FILE_NOT_FOUND), "Could not create file", e),
    };
    let existing = match operations::existing_length(&resolved, &config.server_root) {
        Ok(existing) => existing,
        Err(e) => return storage_failure(verb, Some(FILE_NOT_FOUND), "Could not create file", e),
    };

    let size = existing.unwrap_or(0);
    if offset > size {
        let err = TransferError::RestartBeyondEof { offset, size };
        return transfer_failure(verb, FILE_UNAVAILABLE, err.to_string(), &err);
    }

    let opened = if append {
        operations::open_for_append(&resolved)
    } else {
        operations::open_for_store(&resolved, offset)
    };
    let file = match opened {
        Ok(file) => file,
        Err(e) => return storage_failure(verb, Some(FILE_NOT_FOUND), "Could not create file", e),
    };

    info!("{} {verb} {} at offset {offset}", session.peer_addr(), resolved.virtual_path());
    start_transfer(
        session,
        channel,
        TransferJob::Receive {
            file: tokio::fs::File::from_std(file),
            transfer_type: session.transfer_type(),
        },
        format!("{verb} {}", resolved.virtual_path()),
        "Ok to send data.".to_string(),
        config,
    )
    .await
}

/// Handles LIST and NLST. The listing is rendered before the data
/// connection opens so that errors can still be reported as 550.
pub async fn handle_list(
    session: &mut Session,
    arg: Option<&str>,
    format: ListingFormat,
    config: &ServerConfig,
) -> CommandResult {
    let verb = match format {
        ListingFormat::Long => "LIST",
        ListingFormat::NameOnly => "NLST",
    };
    let channel = match take_channel(session, verb) {
        Ok(channel) => channel,
        Err(reply) => return reply,
    };

    let entries = match collect_entries(
        &config.server_root,
        &config.home,
        session.current_virtual_path(),
        arg,
    ) {
        Ok(entries) => entries,
        Err(e) => return storage_failure(verb, Some(FILE_NOT_FOUND), "Failed to list directory", e),
    };

    start_transfer(
        session,
        channel,
        TransferJob::Listing {
            data: render_listing(&entries, format),
        },
        format!("{verb} {}", arg.unwrap_or(session.current_virtual_path())),
        "Here comes the directory listing.".to_string(),
        config,
    )
    .await
}

/// Final replies for a finished transfer. `abort_requested` is set when
/// the client sent ABOR while the transfer was running.
pub fn completion_replies(outcome: &TransferOutcome, abort_requested: bool) -> Vec<Reply> {
    let mut replies = Vec::with_capacity(2);
    match outcome {
        TransferOutcome::Completed { .. } => {
            replies.push(Reply::new(TRANSFER_COMPLETE, "Transfer complete."));
            if abort_requested {
                replies.push(Reply::new(DATA_CLOSED_NO_TRANSFER, "No transfer to ABOR."));
            }
            return replies;
        }
        TransferOutcome::Aborted { .. } => {
            replies.push(Reply::new(TRANSFER_ABORTED, "Connection closed; transfer aborted."));
        }
        TransferOutcome::Failed(TransferError::LocalFile(e)) => {
            warn!("Local file error during transfer: {e}");
            replies.push(Reply::new(
                LOCAL_ERROR,
                "Requested action aborted: local error in processing.",
            ));
        }
        TransferOutcome::Failed(_) => {
            replies.push(Reply::new(TRANSFER_ABORTED, "Connection closed; transfer aborted."));
        }
    }
    if abort_requested {
        replies.push(Reply::new(TRANSFER_COMPLETE, "ABOR successful."));
    }
    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::AddressFamily;

    #[test]
    fn abort_of_running_transfer_sends_426_then_226() {
        let replies = completion_replies(&TransferOutcome::Aborted { bytes: 10 }, true);
        let codes: Vec<u16> = replies.iter().map(Reply::code).collect();
        assert_eq!(codes, [426, 226]);
        assert_eq!(replies[1].text(), "ABOR successful.");
    }

    #[test]
    fn completed_transfer_sends_226() {
        let replies = completion_replies(&TransferOutcome::Completed { bytes: 10 }, false);
        assert_eq!(replies, [Reply::new(226, "Transfer complete.")]);
    }

    #[test]
    fn local_errors_are_451() {
        let outcome = TransferOutcome::Failed(TransferError::LocalFile(std::io::Error::other("disk")));
        assert_eq!(completion_replies(&outcome, false)[0].code(), 451);
        let outcome = TransferOutcome::Failed(TransferError::Timeout);
        assert_eq!(completion_replies(&outcome, false)[0].code(), 426);
    }

    #[test]
    fn address_family_numbers() {
        assert_eq!(AddressFamily::V4.protocol_number(), 1);
        assert_eq!(AddressFamily::V6.protocol_number(), 2);
    }
}
