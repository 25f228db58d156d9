//! FTP transfer types
//!
//! TYPE A translates line endings on the wire; TYPE I sends bytes untouched.
//! The server's native line ending is a bare LF.

use std::fmt;
use std::io::{self, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    #[default]
    Ascii,
    Binary,
}

impl TransferType {
    /// Parses a TYPE argument. Accepts `A`, `A N`, `I` and `L 8`.
    pub fn parse(arg: &str) -> Option<Self> {
        let mut parts = arg.split_whitespace();
        let code = parts.next()?.to_ascii_uppercase();
        let param = parts.next().map(str::to_ascii_uppercase);
        if parts.next().is_some() {
            return None;
        }
        match (code.as_str(), param.as_deref()) {
            ("A", None | Some("N")) => Some(TransferType::Ascii),
            ("I", None) | ("L", Some("8")) => Some(TransferType::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferType::Ascii => write!(f, "ASCII"),
            TransferType::Binary => write!(f, "BINARY"),
        }
    }
}

/// Outbound ASCII translation: LF becomes CRLF, existing CRLF is kept.
#[derive(Debug, Default)]
pub struct AsciiEncoder {
    last_was_cr: bool,
}

impl AsciiEncoder {
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + input.len() / 16);
        for &byte in input {
            if byte == b'\n' && !self.last_was_cr {
                out.push(b'\r');
            }
            out.push(byte);
            self.last_was_cr = byte == b'\r';
        }
    }
}

/// Inbound ASCII translation: CRLF becomes LF. A lone CR is kept.
#[derive(Debug, Default)]
pub struct AsciiDecoder {
    pending_cr: bool,
}

impl AsciiDecoder {
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len());
        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte != b'\n' {
                    out.push(b'\r');
                }
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    /// Flushes a CR left over at end of stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(b'\r');
        }
    }
}

/// Number of bytes `reader` occupies on the wire once ASCII-encoded.
pub fn ascii_encoded_len<R: Read>(mut reader: R) -> io::Result<u64> {
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    let mut last_was_cr = false;
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            return Ok(total);
        }
        for &byte in &buffer[..n] {
            if byte == b'\n' && !last_was_cr {
                total += 1;
            }
            total += 1;
            last_was_cr = byte == b'\r';
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_arguments() {
        assert_eq!(TransferType::parse("A"), Some(TransferType::Ascii));
        assert_eq!(TransferType::parse("a n"), Some(TransferType::Ascii));
        assert_eq!(TransferType::parse("I"), Some(TransferType::Binary));
        assert_eq!(TransferType::parse("L 8"), Some(TransferType::Binary));
        assert_eq!(TransferType::parse("E"), None);
        assert_eq!(TransferType::parse("L 7"), None);
        assert_eq!(TransferType::parse(""), None);
    }

    #[test]
    fn encoder_handles_split_crlf() {
        let mut encoder = AsciiEncoder::default();
        let mut out = Vec::new();
        encoder.encode(b"a\nb\r", &mut out);
        encoder.encode(b"\nc\n", &mut out);
        assert_eq!(out, b"a\r\nb\r\nc\r\n");
    }

    #[test]
    fn decoder_handles_split_crlf_and_lone_cr() {
        let mut decoder = AsciiDecoder::default();
        let mut out = Vec::new();
        decoder.decode(b"a\r\nb\r", &mut out);
        decoder.decode(b"\nc\rd\r", &mut out);
        decoder.finish(&mut out);
        assert_eq!(out, b"a\nb\nc\rd\r");
    }

    #[test]
    fn encoded_len_matches_encoder_output() {
        let input = b"one\ntwo\r\nthree\n\n".repeat(1000);
        let mut encoded = Vec::new();
        AsciiEncoder::default().encode(&input, &mut encoded);
        assert_eq!(ascii_encoded_len(&input[..]).unwrap(), encoded.len() as u64);
    }
}
