//! Command handlers module for the FTP server.
//!
//! This module defines handler functions for FTP commands, handling
//! authentication, session parameters and file/directory management.
//! Data-channel commands live in `data_handlers`.

use log::{debug, info, warn};

use crate::auth;
use crate::client::Session;
use crate::config::ServerConfig;
use crate::error::{AuthError, ErrorKind, ProtocolError, StorageError, error_to_ftp_code, handle_error};
use crate::navigate::{change_directory, parent_directory, quote_path};
use crate::protocol::commands::{Command, CommandResult, CommandStatus, takes_path_argument};
use crate::protocol::data_handlers;
use crate::protocol::responses::*;
use crate::storage::listing::{ListingFormat, collect_entries, format_lines};
use crate::storage::operations;
use crate::storage::{ResolvedPath, resolve_path};
use crate::transfer::{TransferHandle, TransferType};

/// Features advertised by FEAT.
const FEATURES: &[&str] = &[
    "EPRT", "EPSV", "MDTM", "PASV", "REST STREAM", "SIZE", "TVFS", "UTF8",
];

/// Verbs listed by HELP.
const HELP_VERBS: &[&str] = &[
    "ABOR", "ALLO", "APPE", "CDUP", "CWD", "DELE", "EPRT", "EPSV", "FEAT", "HELP", "LIST", "MDTM",
    "MKD", "MODE", "NLST", "NOOP", "OPTS", "PASS", "PASV", "PORT", "PWD", "QUIT", "REIN", "REST",
    "RETR", "RMD", "RNFR", "RNTO", "SITE", "SIZE", "STAT", "STOR", "STRU", "SYST", "TYPE", "USER",
    "XCUP", "XCWD", "XMKD", "XPWD", "XRMD",
];

/// Dispatches a received FTP command to its corresponding handler.
///
/// # Arguments
///
/// * `session` - State of the control connection issuing the command.
/// * `command` - The parsed FTP command.
/// * `config` - Shared, read-only server configuration.
///
/// # Returns
///
/// * `CommandResult` - Outcome of the command, including the reply to send.
pub async fn handle_command(
    session: &mut Session,
    command: Command,
    config: &ServerConfig,
) -> CommandResult {
    // RNTO must directly follow RNFR; any other command drops the marker.
    let rename_from = session.take_rename_from();

    if !session.is_logged_in() && !command.allowed_before_login() {
        return CommandResult::failure(
            ErrorKind::AuthRequired,
            AUTH_FAILED,
            AuthError::NotLoggedIn.to_string(),
        );
    }

    match command {
        Command::USER(username) => handle_cmd_user(session, username),
        Command::PASS(password) => handle_cmd_pass(session, &password, config),
        Command::QUIT => CommandResult::with_reply(
            CommandStatus::CloseConnection,
            Reply::new(CLOSING, "Goodbye."),
        ),
        Command::NOOP => CommandResult::success(OK, "NOOP ok."),
        Command::SYST => CommandResult::success(SYSTEM_TYPE, "UNIX Type: L8"),
        Command::FEAT => handle_cmd_feat(),
        Command::HELP(_) => handle_cmd_help(),
        Command::OPTS(option) => handle_cmd_opts(&option),
        Command::SITE(arg) => handle_cmd_site(session, &arg, config),
        Command::ALLO => CommandResult::success(NOT_IMPLEMENTED_SUPERFLUOUS, "ALLO command ignored."),
        Command::REIN => {
            CommandResult::failure(ErrorKind::Unsupported, NOT_IMPLEMENTED, "REIN not implemented.")
        }
        Command::PWD => CommandResult::success(
            PATH_CREATED,
            format!("{} is the current directory", quote_path(session.current_virtual_path())),
        ),
        Command::CWD(target) => handle_cmd_cwd(session, target.as_deref(), config),
        Command::CDUP => handle_cmd_cdup(session, config),
        Command::MKD(path) => handle_cmd_mkd(session, &path, config),
        Command::RMD(path) => handle_cmd_rmd(session, &path, config),
        Command::DELE(path) => handle_cmd_dele(session, &path, config),
        Command::RNFR(path) => handle_cmd_rnfr(session, &path, config),
        Command::RNTO(path) => handle_cmd_rnto(session, rename_from, &path, config),
        Command::SIZE(path) => handle_cmd_size(session, &path, config).await,
        Command::MDTM(arg) => handle_cmd_mdtm(session, &arg, config),
        Command::TYPE(arg) => handle_cmd_type(session, &arg),
        Command::STRU(arg) => match arg.trim().to_ascii_uppercase().as_str() {
            "F" => CommandResult::success(OK, "Structure set to F."),
            _ => CommandResult::failure(ErrorKind::SyntaxError, SYNTAX_ERROR, "Bad STRU command."),
        },
        Command::MODE(arg) => match arg.trim().to_ascii_uppercase().as_str() {
            "S" => CommandResult::success(OK, "Mode set to S."),
            _ => CommandResult::failure(ErrorKind::SyntaxError, SYNTAX_ERROR, "Bad MODE command."),
        },
        Command::REST(arg) => handle_cmd_rest(session, &arg),
        Command::PORT(arg) => data_handlers::handle_port(session, &arg, config),
        Command::EPRT(arg) => data_handlers::handle_eprt(session, &arg, config),
        Command::PASV => data_handlers::handle_pasv(session, config).await,
        Command::EPSV(arg) => data_handlers::handle_epsv(session, arg.as_deref(), config).await,
        Command::LIST(arg) => {
            data_handlers::handle_list(session, arg.as_deref(), ListingFormat::Long, config).await
        }
        Command::NLST(arg) => {
            data_handlers::handle_list(session, arg.as_deref(), ListingFormat::NameOnly, config)
                .await
        }
        Command::RETR(path) => data_handlers::handle_retr(session, &path, config).await,
        Command::STOR(path) => data_handlers::handle_stor(session, &path, false, config).await,
        Command::APPE(path) => data_handlers::handle_stor(session, &path, true, config).await,
        Command::STAT(None) => CommandResult::with_reply(
            CommandStatus::Success,
            server_status(session, config, None),
        ),
        Command::STAT(Some(arg)) => handle_cmd_stat_path(session, &arg, config),
        Command::ABOR => {
            // Nothing in flight; an armed but unused channel is discarded.
            session.take_data_channel();
            CommandResult::success(DATA_CLOSED_NO_TRANSFER, "No transfer to ABOR.")
        }
        Command::UNSUPPORTED(verb) => {
            debug!("Refusing unsupported command {verb}");
            CommandResult::failure(ErrorKind::Unsupported, NOT_IMPLEMENTED, "Unknown command.")
        }
    }
}

/// Reply for a control line that could not be parsed.
pub fn handle_protocol_error(err: &ProtocolError) -> CommandResult {
    let kind = err.kind();
    handle_error(err.verb(), kind, err);
    match err {
        ProtocolError::UnknownCommand(_) => {
            CommandResult::failure(ErrorKind::Unsupported, SYNTAX_ERROR, "Unknown command.")
        }
        ProtocolError::LineTooLong => {
            CommandResult::failure(ErrorKind::SyntaxError, SYNTAX_ERROR, "Command too long.")
        }
        ProtocolError::MissingArgument(_) => {
            CommandResult::failure(kind, ARGUMENT_ERROR, err.to_string())
        }
        ProtocolError::InvalidEncoding(verb) if takes_path_argument(verb) => {
            CommandResult::failure(ErrorKind::InvalidRequest, NAME_NOT_ALLOWED, "Invalid request.")
        }
        ProtocolError::InvalidEncoding(_) => CommandResult::failure(
            ErrorKind::SyntaxError,
            ARGUMENT_ERROR,
            "Syntax error in parameters or arguments.",
        ),
    }
}

/// Builds a failure reply from a storage error: `<action>: <cause>`.
///
/// `code` overrides the default reply code for the error's kind.
pub(crate) fn storage_failure(
    verb: &str,
    code: Option<u16>,
    action: &str,
    err: StorageError,
) -> CommandResult {
    let kind = err.kind();
    handle_error(verb, kind, &err);
    CommandResult::failure(
        kind,
        code.unwrap_or_else(|| error_to_ftp_code(kind)),
        format!("{action}: {err}"),
    )
}

/// Resolves a command argument against the session's directory.
pub(crate) fn resolve(
    session: &Session,
    target: &str,
    config: &ServerConfig,
) -> Result<ResolvedPath, StorageError> {
    Ok(resolve_path(
        &config.server_root,
        &config.home,
        session.current_virtual_path(),
        target,
    )?)
}

/// Handles the USER command. Every well-formed name is asked for a
/// password so that account names cannot be probed.
fn handle_cmd_user(session: &mut Session, username: String) -> CommandResult {
    if session.is_logged_in() {
        let err = AuthError::AlreadyLoggedIn;
        return CommandResult::failure(err.kind(), AUTH_FAILED, err.to_string());
    }

    match auth::validate_user(&username) {
        Ok(()) => {
            session.set_pending_user(username);
            CommandResult::success(PASSWORD_REQUIRED, "Please specify the password.")
        }
        Err(e) => {
            session.clear_pending_user();
            handle_error("USER", e.kind(), &e);
            CommandResult::failure(e.kind(), ARGUMENT_ERROR, e.to_string())
        }
    }
}

/// Handles the PASS command: validates the password of the pending user.
fn handle_cmd_pass(session: &mut Session, password: &str, config: &ServerConfig) -> CommandResult {
    if session.is_logged_in() {
        return CommandResult::success(LOGIN_SUCCESS, "Already logged in.");
    }

    let Some(username) = session.pending_user().map(str::to_string) else {
        let err = AuthError::NoUsername;
        return CommandResult::failure(err.kind(), BAD_SEQUENCE, err.to_string());
    };

    match auth::validate_password(&config.users, &username, password) {
        Ok(()) => {
            session.login();
            info!("User {username} logged in from {}", session.peer_addr());
            CommandResult::success(LOGIN_SUCCESS, "Login successful.")
        }
        Err(e) => {
            session.clear_pending_user();
            warn!("Failed login for {username} from {}", session.peer_addr());
            let code = match e {
                AuthError::MalformedInput(_) => ARGUMENT_ERROR,
                _ => AUTH_FAILED,
            };
            CommandResult::failure(e.kind(), code, e.to_string())
        }
    }
}

fn handle_cmd_feat() -> CommandResult {
    CommandResult::with_reply(
        CommandStatus::Success,
        Reply::multiline(
            SYSTEM_STATUS,
            "Features:",
            FEATURES.iter().map(|f| f.to_string()),
            "End",
        ),
    )
}

fn handle_cmd_help() -> CommandResult {
    let rows = HELP_VERBS
        .chunks(8)
        .map(|row| row.iter().map(|verb| format!("{verb:<5}")).collect::<Vec<_>>().join(" "));
    CommandResult::with_reply(
        CommandStatus::Success,
        Reply::multiline(
            HELP,
            "The following commands are recognized.",
            rows.map(|row| row.trim_end().to_string()),
            "Help OK.",
        ),
    )
}

fn handle_cmd_opts(option: &str) -> CommandResult {
    let normalized = option.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
    match normalized.as_str() {
        "UTF8 ON" | "UTF-8 ON" => CommandResult::success(OK, "Always in UTF8 mode."),
        _ => CommandResult::failure(ErrorKind::SyntaxError, ARGUMENT_ERROR, "Option not understood."),
    }
}

/// Handles SITE subcommands. Only HELP and CHMOD exist.
fn handle_cmd_site(session: &mut Session, arg: &str, config: &ServerConfig) -> CommandResult {
    let mut parts = arg.trim().splitn(2, ' ');
    let subcommand = parts.next().unwrap_or_default().to_ascii_uppercase();
    let rest = parts.next().unwrap_or_default().trim_start();

    match subcommand.as_str() {
        "HELP" => CommandResult::success(HELP, "CHMOD HELP"),
        "CHMOD" if !session.is_logged_in() => CommandResult::failure(
            ErrorKind::AuthRequired,
            AUTH_FAILED,
            AuthError::NotLoggedIn.to_string(),
        ),
        "CHMOD" => {
            let Some((mode, path)) = rest.split_once(' ') else {
                return CommandResult::failure(
                    ErrorKind::SyntaxError,
                    ARGUMENT_ERROR,
                    "SITE CHMOD needs 2 arguments.",
                );
            };
            let Ok(mode) = u32::from_str_radix(mode, 8) else {
                return CommandResult::failure(
                    ErrorKind::SyntaxError,
                    ARGUMENT_ERROR,
                    "SITE CHMOD needs an octal mode.",
                );
            };
            match resolve(session, path.trim_start(), config)
                .and_then(|p| operations::change_mode(&p, &config.server_root, mode))
            {
                Ok(()) => CommandResult::success(OK, "SITE CHMOD command ok."),
                Err(e) => storage_failure("SITE CHMOD", Some(FILE_NOT_FOUND), "SITE CHMOD command failed", e),
            }
        }
        _ => CommandResult::failure(ErrorKind::Unsupported, FILE_NOT_FOUND, "Unknown SITE command."),
    }
}

/// Handles CWD. Without an argument the session returns to its home.
fn handle_cmd_cwd(session: &mut Session, target: Option<&str>, config: &ServerConfig) -> CommandResult {
    let target = target.unwrap_or(config.home.as_str());
    match change_directory(
        &config.server_root,
        &config.home,
        session.current_virtual_path(),
        target,
    ) {
        Ok(new_path) => {
            debug!("{} changed directory to {new_path}", session.peer_addr());
            session.set_current_virtual_path(new_path);
            CommandResult::success(FILE_ACTION_OK, "Directory successfully changed.")
        }
        Err(e) => storage_failure("CWD", Some(FILE_NOT_FOUND), "Failed to change directory", e),
    }
}

fn handle_cmd_cdup(session: &mut Session, config: &ServerConfig) -> CommandResult {
    let parent = parent_directory(session.current_virtual_path());
    match change_directory(
        &config.server_root,
        &config.home,
        session.current_virtual_path(),
        &parent,
    ) {
        Ok(new_path) => {
            session.set_current_virtual_path(new_path);
            CommandResult::success(OK, "Directory successfully changed.")
        }
        Err(e) => storage_failure("CDUP", Some(FILE_NOT_FOUND), "Failed to change directory", e),
    }
}

fn handle_cmd_mkd(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    match resolve(session, path, config).and_then(|p| operations::make_directory(&p).map(|_| p)) {
        Ok(created) => CommandResult::success(
            PATH_CREATED,
            format!("{} created", quote_path(created.virtual_path())),
        ),
        Err(e) => storage_failure("MKD", Some(FILE_NOT_FOUND), "Create directory operation failed", e),
    }
}

fn handle_cmd_rmd(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    match resolve(session, path, config).and_then(|p| operations::remove_directory(&p)) {
        Ok(()) => CommandResult::success(FILE_ACTION_OK, "Remove directory operation successful."),
        Err(e) => storage_failure("RMD", Some(FILE_NOT_FOUND), "Remove directory operation failed", e),
    }
}

fn handle_cmd_dele(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    match resolve(session, path, config).and_then(|p| operations::delete_file(&p)) {
        Ok(()) => CommandResult::success(FILE_ACTION_OK, "Delete operation successful."),
        Err(e) => storage_failure("DELE", Some(FILE_NOT_FOUND), "Delete operation failed", e),
    }
}

fn handle_cmd_rnfr(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    let source = resolve(session, path, config)
        .and_then(|p| operations::check_rename_source(&p).map(|_| p));
    match source {
        Ok(source) => {
            session.set_rename_from(source);
            CommandResult::success(PENDING_FURTHER_INFO, "Ready for RNTO.")
        }
        Err(e) => storage_failure("RNFR", Some(FILE_NOT_FOUND), "RNFR command failed", e),
    }
}

fn handle_cmd_rnto(
    session: &mut Session,
    rename_from: Option<ResolvedPath>,
    path: &str,
    config: &ServerConfig,
) -> CommandResult {
    let Some(source) = rename_from else {
        return CommandResult::failure(ErrorKind::BadSequence, BAD_SEQUENCE, "RNFR required first.");
    };

    match resolve(session, path, config).and_then(|to| operations::rename_path(&source, &to)) {
        Ok(()) => CommandResult::success(FILE_ACTION_OK, "Rename successful."),
        Err(e) => storage_failure("RNTO", None, "Rename failed", e),
    }
}

async fn handle_cmd_size(session: &mut Session, path: &str, config: &ServerConfig) -> CommandResult {
    let size = match resolve(session, path, config) {
        Ok(resolved) => {
            operations::file_size_off_thread(
                resolved,
                config.server_root.clone(),
                session.transfer_type(),
            )
            .await
        }
        Err(e) => Err(e),
    };
    match size {
        Ok(size) => CommandResult::success(FILE_STATUS, size.to_string()),
        Err(e) => {
            handle_error("SIZE", e.kind(), &e);
            CommandResult::failure(e.kind(), FILE_NOT_FOUND, "Could not get file size.")
        }
    }
}

/// Handles MDTM. `MDTM <YYYYMMDDHHMMSS> <path>` sets the time instead of
/// reading it.
fn handle_cmd_mdtm(session: &mut Session, arg: &str, config: &ServerConfig) -> CommandResult {
    if let Some((stamp, path)) = arg.split_once(' ') {
        if let Some(time) = operations::parse_mdtm_timestamp(stamp) {
            let result = resolve(session, path, config)
                .and_then(|p| operations::set_modification_time(&p, &config.server_root, time));
            return match result {
                Ok(()) => CommandResult::success(FILE_STATUS, "File modification time set."),
                Err(e) => {
                    handle_error("MDTM", e.kind(), &e);
                    CommandResult::failure(
                        e.kind(),
                        FILE_NOT_FOUND,
                        "Could not set file modification time.",
                    )
                }
            };
        }
    }

    let mtime = resolve(session, arg, config)
        .and_then(|p| operations::modification_time(&p, &config.server_root));
    match mtime {
        Ok(mtime) => CommandResult::success(FILE_STATUS, operations::format_mdtm_timestamp(mtime)),
        Err(e) => {
            handle_error("MDTM", e.kind(), &e);
            CommandResult::failure(e.kind(), FILE_NOT_FOUND, "Could not get file modification time.")
        }
    }
}

fn handle_cmd_type(session: &mut Session, arg: &str) -> CommandResult {
    match TransferType::parse(arg) {
        Some(transfer_type) => {
            session.set_transfer_type(transfer_type);
            let text = match transfer_type {
                TransferType::Ascii => "Switching to ASCII mode.",
                TransferType::Binary => "Switching to Binary mode.",
            };
            CommandResult::success(OK, text)
        }
        None => CommandResult::failure(ErrorKind::SyntaxError, SYNTAX_ERROR, "Unrecognised TYPE command."),
    }
}

/// Handles REST. A malformed offset is accepted as 0.
fn handle_cmd_rest(session: &mut Session, arg: &str) -> CommandResult {
    let offset = arg.trim().parse::<u64>().unwrap_or_else(|_| {
        warn!("Malformed REST argument {arg:?} from {}; using 0", session.peer_addr());
        0
    });
    session.set_restart_offset(offset);
    CommandResult::success(
        PENDING_FURTHER_INFO,
        format!("Restart position accepted ({offset})."),
    )
}

/// STAT with a path: a long listing sent over the control connection.
///
/// Only reads the filesystem, so it is also answered while a transfer runs.
pub(crate) fn handle_cmd_stat_path(session: &Session, arg: &str, config: &ServerConfig) -> CommandResult {
    match collect_entries(
        &config.server_root,
        &config.home,
        session.current_virtual_path(),
        Some(arg),
    ) {
        Ok(entries) => CommandResult::with_reply(
            CommandStatus::Success,
            Reply::multiline(
                FILE_STATUS,
                "Status follows:",
                format_lines(&entries, ListingFormat::Long),
                "End of status",
            ),
        ),
        Err(e) => storage_failure("STAT", Some(FILE_NOT_FOUND), "STAT failed", e),
    }
}

/// Multi-line 211 server status. While a transfer runs it reports the
/// bytes moved so far.
pub fn server_status(
    session: &Session,
    config: &ServerConfig,
    transfer: Option<&TransferHandle>,
) -> Reply {
    let mut body = vec![format!("Connected to {}", session.peer_addr().ip())];
    match session.username() {
        Some(user) => body.push(format!("Logged in as {user}")),
        None => body.push("Not logged in".to_string()),
    }
    body.push(format!("TYPE: {}", session.transfer_type()));
    body.push(format!("Session timeout in seconds is {}", config.idle_timeout_secs));
    body.push("Control connection is plain text".to_string());
    body.push("Data connections will be plain text".to_string());
    if session.has_data_channel() {
        let mode = if session.data_channel_is_passive() { "passive" } else { "active" };
        body.push(format!("Data connection armed ({mode})"));
    }
    if let Some(transfer) = transfer {
        body.push(format!(
            "{}: {} bytes transferred",
            transfer.label(),
            transfer.bytes_transferred()
        ));
    }
    Reply::multiline(SYSTEM_STATUS, "FTP server status:", body, "End of status")
}
