//! Module `command`
//!
//! Defines the FTP command set, control-line parsing and the structured
//! result every handler returns.

use crate::error::{ErrorKind, ProtocolError};
use crate::protocol::responses::Reply;
use crate::transfer::PreparedTransfer;

/// Telnet "interpret as command" escape.
const IAC: u8 = 0xff;

/// Represents an FTP command parsed from the client input.
///
/// Legacy X-prefixed verbs (XCWD, XCUP, XPWD, XMKD, XRMD) parse to their
/// modern equivalents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    USER(String),
    PASS(String),
    QUIT,
    NOOP,
    SYST,
    FEAT,
    HELP(Option<String>),
    OPTS(String),
    SITE(String),
    ALLO,
    REIN,
    PWD,
    CWD(Option<String>),
    CDUP,
    MKD(String),
    RMD(String),
    DELE(String),
    RNFR(String),
    RNTO(String),
    SIZE(String),
    MDTM(String),
    TYPE(String),
    STRU(String),
    MODE(String),
    REST(String),
    PORT(String),
    EPRT(String),
    PASV,
    EPSV(Option<String>),
    LIST(Option<String>),
    NLST(Option<String>),
    STAT(Option<String>),
    RETR(String),
    STOR(String),
    APPE(String),
    ABOR,
    /// Recognised but deliberately not implemented (MFMT, MLST, MLSD, STOU, ...).
    UNSUPPORTED(String),
}

impl Command {
    /// Canonical verb, for logging.
    pub fn verb(&self) -> &str {
        match self {
            Command::USER(_) => "USER",
            Command::PASS(_) => "PASS",
            Command::QUIT => "QUIT",
            Command::NOOP => "NOOP",
            Command::SYST => "SYST",
            Command::FEAT => "FEAT",
            Command::HELP(_) => "HELP",
            Command::OPTS(_) => "OPTS",
            Command::SITE(_) => "SITE",
            Command::ALLO => "ALLO",
            Command::REIN => "REIN",
            Command::PWD => "PWD",
            Command::CWD(_) => "CWD",
            Command::CDUP => "CDUP",
            Command::MKD(_) => "MKD",
            Command::RMD(_) => "RMD",
            Command::DELE(_) => "DELE",
            Command::RNFR(_) => "RNFR",
            Command::RNTO(_) => "RNTO",
            Command::SIZE(_) => "SIZE",
            Command::MDTM(_) => "MDTM",
            Command::TYPE(_) => "TYPE",
            Command::STRU(_) => "STRU",
            Command::MODE(_) => "MODE",
            Command::REST(_) => "REST",
            Command::PORT(_) => "PORT",
            Command::EPRT(_) => "EPRT",
            Command::PASV => "PASV",
            Command::EPSV(_) => "EPSV",
            Command::LIST(_) => "LIST",
            Command::NLST(_) => "NLST",
            Command::STAT(_) => "STAT",
            Command::RETR(_) => "RETR",
            Command::STOR(_) => "STOR",
            Command::APPE(_) => "APPE",
            Command::ABOR => "ABOR",
            Command::UNSUPPORTED(verb) => verb,
        }
    }

    /// Commands accepted before login.
    pub fn allowed_before_login(&self) -> bool {
        matches!(
            self,
            Command::USER(_)
                | Command::PASS(_)
                | Command::QUIT
                | Command::NOOP
                | Command::SYST
                | Command::FEAT
                | Command::HELP(_)
                | Command::OPTS(_)
                | Command::SITE(_)
                | Command::TYPE(_)
                | Command::STRU(_)
                | Command::MODE(_)
                | Command::ALLO
                | Command::REIN
                | Command::ABOR
                | Command::UNSUPPORTED(_)
        )
    }
}

/// Represents the outcome status of executing a command.
#[derive(Debug)]
pub enum CommandStatus {
    Success,
    Failure(ErrorKind),
    CloseConnection,
    /// The data connection is open and the reply is the 150 preliminary;
    /// the session runs the transfer and sends the final reply itself.
    Transfer(PreparedTransfer),
}

/// Struct encapsulating the full result of a command execution.
#[derive(Debug)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub reply: Reply,
}

impl CommandResult {
    pub fn success(code: u16, text: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            reply: Reply::new(code, text),
        }
    }

    pub fn failure(kind: ErrorKind, code: u16, text: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failure(kind),
            reply: Reply::new(code, text),
        }
    }

    pub fn with_reply(status: CommandStatus, reply: Reply) -> Self {
        Self { status, reply }
    }
}

/// Removes telnet IAC sequences (e.g. IP/DM sent ahead of an urgent ABOR).
/// `IAC IAC` stands for a literal 0xFF byte.
fn strip_telnet(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != IAC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(IAC) => out.push(IAC),
            // WILL/WONT/DO/DONT carry an option byte
            Some(0xfb..=0xfe) => {
                bytes.next();
            }
            _ => {}
        }
    }
    out
}

fn required(verb: &str, arg: Option<String>) -> Result<String, ProtocolError> {
    arg.ok_or_else(|| ProtocolError::MissingArgument(verb.to_string()))
}

/// Parses a raw control line received from a client into a `Command`.
///
/// The verb is matched case-insensitively; everything after the first space
/// is the argument, kept verbatim apart from the line terminator.
pub fn parse_command(raw: &[u8]) -> Result<Command, ProtocolError> {
    let mut line = strip_telnet(raw);
    while matches!(line.last(), Some(b'\r' | b'\n')) {
        line.pop();
    }

    let (verb_bytes, arg_bytes) = match line.iter().position(|&b| b == b' ') {
        Some(i) => (&line[..i], Some(&line[i + 1..])),
        None => (&line[..], None),
    };

    let verb = std::str::from_utf8(verb_bytes)
        .map_err(|_| ProtocolError::UnknownCommand(String::from_utf8_lossy(verb_bytes).into()))?
        .trim_start()
        .to_ascii_uppercase();

    let arg = match arg_bytes {
        Some(bytes) => Some(
            String::from_utf8(bytes.to_vec())
                .map_err(|_| ProtocolError::InvalidEncoding(verb.clone()))?,
        ),
        None => None,
    }
    .filter(|a| !a.trim().is_empty());

    let command = match verb.as_str() {
        "USER" => Command::USER(required(&verb, arg)?),
        "PASS" => Command::PASS(arg.unwrap_or_default()),
        "QUIT" => Command::QUIT,
        "NOOP" => Command::NOOP,
        "SYST" => Command::SYST,
        "FEAT" => Command::FEAT,
        "HELP" => Command::HELP(arg),
        "OPTS" => Command::OPTS(required(&verb, arg)?),
        "SITE" => Command::SITE(arg.unwrap_or_default()),
        "ALLO" => Command::ALLO,
        "REIN" => Command::REIN,
        "PWD" | "XPWD" => Command::PWD,
        "CWD" | "XCWD" => Command::CWD(arg),
        "CDUP" | "XCUP" => Command::CDUP,
        "MKD" | "XMKD" => Command::MKD(required(&verb, arg)?),
        "RMD" | "XRMD" => Command::RMD(required(&verb, arg)?),
        "DELE" => Command::DELE(required(&verb, arg)?),
        "RNFR" => Command::RNFR(required(&verb, arg)?),
        "RNTO" => Command::RNTO(required(&verb, arg)?),
        "SIZE" => Command::SIZE(required(&verb, arg)?),
        "MDTM" => Command::MDTM(required(&verb, arg)?),
        "TYPE" => Command::TYPE(arg.unwrap_or_default()),
        "STRU" => Command::STRU(arg.unwrap_or_default()),
        "MODE" => Command::MODE(arg.unwrap_or_default()),
        "REST" => Command::REST(arg.unwrap_or_default()),
        "PORT" => Command::PORT(required(&verb, arg)?),
        "EPRT" => Command::EPRT(required(&verb, arg)?),
        "PASV" => Command::PASV,
        "EPSV" => Command::EPSV(arg),
        "LIST" => Command::LIST(arg),
        "NLST" => Command::NLST(arg),
        "STAT" => Command::STAT(arg),
        "RETR" => Command::RETR(required(&verb, arg)?),
        "STOR" => Command::STOR(required(&verb, arg)?),
        "APPE" => Command::APPE(required(&verb, arg)?),
        "ABOR" => Command::ABOR,
        "MFMT" | "MLST" | "MLSD" | "STOU" | "SMNT" | "ACCT" | "MFCT" | "MFF" => {
            Command::UNSUPPORTED(verb)
        }
        _ => return Err(ProtocolError::UnknownCommand(verb)),
    };

    Ok(command)
}

/// Verbs whose argument is a path; an undecodable argument to one of
/// these is an invalid request rather than a syntax error.
pub fn takes_path_argument(verb: &str) -> bool {
    matches!(
        verb,
        "CWD" | "XCWD" | "MKD" | "XMKD" | "RMD" | "XRMD" | "DELE" | "RNFR" | "RNTO" | "SIZE"
            | "MDTM" | "LIST" | "NLST" | "STAT" | "RETR" | "STOR" | "APPE"
    )
}
