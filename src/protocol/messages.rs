// Wire messages of the line protocol: one command per line out, transcript lines back.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::ansi::{highlight, ERROR_BANNER, ERROR_CLOSE, ERROR_MESSAGE, RESET};

/// Lines longer than this are rejected on both sides.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

pub const BAD_REQUEST: &str = "Bad request";
pub const SERVER_ERROR: &str = "Server error";
/// Action name reported when a principal may not run SQL at all.
pub const SQL_ACTION: &str = "indices:data/read/sql";
pub const WELCOME: &str = "welcome";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("connection closed before the transcript sentinel")]
    PrematureEnd,
    #[error("a transcript is still being read; drain it before sending")]
    TranscriptInProgress,
    #[error("no transcript is pending")]
    NoPendingTranscript,
    #[error("no scroll is open on this session")]
    NoOpenScroll,
    #[error("line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("command spans more than one line: {0:?}")]
    MultiLineCommand(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("unexpected response: expected {expected:?}, got {actual:?}")]
    UnexpectedResponse { expected: String, actual: String },
    #[error("transcript has no sentinel")]
    MissingSentinel,
    #[error("line {0} follows the transcript sentinel")]
    TrailingAfterSentinel(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Query(String),
    FetchSize(u32),
    FetchSeparator(String),
    /// Re-arm the session cursor and read the next page.
    FetchNext,
    Hello { principal: String, secret: String },
    /// Lightweight round trip used as the connection probe.
    Info,
    Quit,
}

impl Command {
    /// Render as a single line without the terminator.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let line = match self {
            Command::Query(sql) => sql.trim().to_string(),
            Command::FetchSize(size) => format!("fetch size = {}", size),
            Command::FetchSeparator(sep) => format!("fetch separator = \"{}\"", sep),
            Command::FetchNext => "fetch next".to_string(),
            Command::Hello { principal, secret } => {
                if principal.is_empty() || principal.chars().any(char::is_whitespace) {
                    return Err(ProtocolError::InvalidCommand(format!(
                        "principal {:?} must be a single word",
                        principal
                    )));
                }
                format!("\\hello {} {}", principal, secret)
            }
            Command::Info => "\\info".to_string(),
            Command::Quit => "\\quit".to_string(),
        };
        if line.contains('\n') || line.contains('\r') {
            return Err(ProtocolError::MultiLineCommand(line));
        }
        Ok(line)
    }

    /// Encode with the trailing newline, ready for the socket.
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let line = self.encode()?;
        let mut buf = BytesMut::with_capacity(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("\\hello ") {
            let (principal, secret) = rest
                .split_once(' ')
                .ok_or_else(|| ProtocolError::InvalidCommand("\\hello needs a principal and a secret".into()))?;
            return Ok(Command::Hello {
                principal: principal.to_string(),
                secret: secret.to_string(),
            });
        }
        if trimmed == "\\info" {
            return Ok(Command::Info);
        }
        if trimmed == "\\quit" {
            return Ok(Command::Quit);
        }

        if let Some(value) = fetch_size_value(trimmed) {
            return match value.parse::<u32>() {
                Ok(size) if size > 0 => Ok(Command::FetchSize(size)),
                _ => Err(ProtocolError::InvalidCommand(format!(
                    "fetch size must be a positive integer, got [{}]",
                    value
                ))),
            };
        }
        if let Some(rest) = strip_keyword(trimmed, "fetch") {
            if let Some(value) = strip_keyword(rest, "separator").and_then(strip_equals) {
                return match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                    Some(sep) if value.len() >= 2 => Ok(Command::FetchSeparator(sep.to_string())),
                    _ => Err(ProtocolError::InvalidCommand(format!(
                        "fetch separator must be quoted, got [{}]",
                        value
                    ))),
                };
            }
            if rest.eq_ignore_ascii_case("next") {
                return Ok(Command::FetchNext);
            }
        }

        Ok(Command::Query(trimmed.to_string()))
    }
}

/// The raw value of a `fetch size = <value>` line.
pub fn fetch_size_value(line: &str) -> Option<&str> {
    let rest = strip_keyword(line.trim(), "fetch")?;
    strip_keyword(rest, "size").and_then(strip_equals)
}

/// Case-insensitive leading keyword followed by whitespace, `=` or end of input.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &s[keyword.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() || c == '=' => Some(rest.trim_start()),
        Some(_) => None,
    }
}

fn strip_equals(s: &str) -> Option<&str> {
    s.strip_prefix('=').map(str::trim)
}

// ============================================================================
// Response line shapes
// ============================================================================

pub fn fetch_size_confirmation(size: u32) -> String {
    format!("fetch size set to {}", highlight(&size.to_string()))
}

pub fn fetch_separator_confirmation(separator: &str) -> String {
    format!("fetch separator set to \"{}\"", highlight(separator))
}

/// Marks a page that has more rows behind it.
pub fn continuation_line(separator: &str) -> String {
    highlight(separator)
}

/// The text every authorization denial carries.
pub fn unauthorized_marker(principal: &str) -> String {
    format!("is unauthorized for user [{}]", principal)
}

/// First line of a multi-line error: `Bad request [` and the summary.
pub fn bad_request_banner(summary: &str) -> String {
    format!("{}{} [{}{}", ERROR_BANNER, BAD_REQUEST, ERROR_MESSAGE, summary)
}

/// A one-line server error, closed with the error bracket and reset.
pub fn server_error_line(message: &str) -> String {
    format!(
        "{}{} [{}{}{}]{}",
        ERROR_BANNER, SERVER_ERROR, ERROR_MESSAGE, message, ERROR_CLOSE, RESET
    )
}

pub fn forbidden_line(action: &str, principal: &str) -> String {
    server_error_line(&format!("action [{}] {}", action, unauthorized_marker(principal)))
}

/// Detail line closing a bad request, pointing at `line:column` of the query.
pub fn error_detail(line: usize, column: usize, message: &str) -> String {
    format!("line {}:{}: {}{}]{}", line, column, message, ERROR_CLOSE, RESET)
}

pub fn unknown_index_message(index: &str) -> String {
    format!("Unknown index [{}]", index)
}

pub fn unknown_column_message(column: &str) -> String {
    format!("Unknown column [{}]", column)
}
