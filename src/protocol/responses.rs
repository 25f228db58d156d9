//! FTP Response handling
//!
//! Defines FTP response codes and reply framing.

/// Standard FTP response codes
pub const OPENING_DATA: u16 = 150;
pub const OK: u16 = 200;
pub const NOT_IMPLEMENTED_SUPERFLUOUS: u16 = 202;
pub const SYSTEM_STATUS: u16 = 211;
pub const FILE_STATUS: u16 = 213;
pub const HELP: u16 = 214;
pub const SYSTEM_TYPE: u16 = 215;
pub const READY: u16 = 220;
pub const CLOSING: u16 = 221;
pub const DATA_CLOSED_NO_TRANSFER: u16 = 225;
pub const TRANSFER_COMPLETE: u16 = 226;
pub const PASSIVE_MODE: u16 = 227;
pub const EXTENDED_PASSIVE_MODE: u16 = 229;
pub const LOGIN_SUCCESS: u16 = 230;
pub const FILE_ACTION_OK: u16 = 250;
pub const PATH_CREATED: u16 = 257;
pub const PASSWORD_REQUIRED: u16 = 331;
pub const PENDING_FURTHER_INFO: u16 = 350;
pub const SERVICE_UNAVAILABLE: u16 = 421;
pub const CANT_OPEN_DATA: u16 = 425;
pub const TRANSFER_ABORTED: u16 = 426;
pub const FILE_UNAVAILABLE: u16 = 450;
pub const LOCAL_ERROR: u16 = 451;
pub const SYNTAX_ERROR: u16 = 500;
pub const ARGUMENT_ERROR: u16 = 501;
pub const NOT_IMPLEMENTED: u16 = 502;
pub const BAD_SEQUENCE: u16 = 503;
pub const PROTOCOL_NOT_SUPPORTED: u16 = 522;
pub const AUTH_FAILED: u16 = 530;
pub const FILE_NOT_FOUND: u16 = 550;
pub const NAME_NOT_ALLOWED: u16 = 553;

/// A complete reply: one line, or a multi-line block whose last entry is
/// the closing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// Multi-line reply: `first` opens the block, `body` lines are sent
    /// indented by one space, `last` closes it.
    pub fn multiline(
        code: u16,
        first: impl Into<String>,
        body: impl IntoIterator<Item = String>,
        last: impl Into<String>,
    ) -> Self {
        let mut lines = vec![first.into()];
        lines.extend(body.into_iter().map(|line| format!(" {line}")));
        lines.push(last.into());
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Text of the final line.
    pub fn text(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    /// Serializes the reply with CRLF line endings.
    pub fn to_wire(&self) -> String {
        match self.lines.split_last() {
            None => format_response(self.code, ""),
            Some((last, [])) => format_response(self.code, last),
            Some((last, rest)) => {
                let mut out = format!("{}-{}\r\n", self.code, rest[0]);
                for line in &rest[1..] {
                    out.push_str(line);
                    out.push_str("\r\n");
                }
                out.push_str(&format_response(self.code, last));
                out
            }
        }
    }
}

/// Format an FTP response message
pub fn format_response(code: u16, message: &str) -> String {
    format!("{code} {message}\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_reply() {
        let reply = Reply::new(OK, "NOOP ok.");
        assert_eq!(reply.to_wire(), "200 NOOP ok.\r\n");
        assert!(!reply.is_multiline());
    }

    #[test]
    fn multiline_reply_framing() {
        let reply = Reply::multiline(
            SYSTEM_STATUS,
            "Features:",
            ["TVFS".to_string(), "UTF8".to_string()],
            "End",
        );
        assert_eq!(reply.to_wire(), "211-Features:\r\n TVFS\r\n UTF8\r\n211 End\r\n");
        assert_eq!(reply.text(), "End");
    }

    #[test]
    fn body_lines_never_look_like_a_closing_line() {
        let reply = Reply::multiline(FILE_STATUS, "Status follows:", ["213 fake".to_string()], "End of status");
        assert!(reply.to_wire().contains("\r\n 213 fake\r\n"));
    }
}
