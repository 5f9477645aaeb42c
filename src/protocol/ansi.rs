// Terminal escape sequences used by the shell output.
//
// Nothing in here strips escapes from transcripts: callers compare raw lines
// because error banners and confirmations are asserted byte-for-byte.

/// Resets all formatting. A line holding only this is a transcript sentinel.
pub const RESET: &str = "\x1b[0m";
/// Gray highlight used for confirmations and fetch separators.
pub const HIGHLIGHT: &str = "\x1b[90m";
/// Bold red, opens an error banner.
pub const ERROR_BANNER: &str = "\x1b[1;31m";
/// Normal intensity italic yellow, the error message body.
pub const ERROR_MESSAGE: &str = "\x1b[22;3;33m";
/// Bold non-italic red, closes the bracket of an error message.
pub const ERROR_CLOSE: &str = "\x1b[1;23;31m";

const ESC: char = '\x1b';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    /// Select Graphic Rendition parameters, e.g. `[1, 31]` for `ESC[1;31m`.
    Sgr(Vec<u16>),
}

impl Segment {
    pub fn encode(&self) -> String {
        match self {
            Segment::Text(text) => text.clone(),
            Segment::Sgr(params) => encode_sgr(params),
        }
    }
}

pub fn encode_sgr(params: &[u16]) -> String {
    let joined: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    format!("{}[{}m", ESC, joined.join(";"))
}

/// Split a line into text and SGR segments.
///
/// Escape sequences that are not well-formed SGR (`ESC [ digits ; ... m`) are
/// kept as text so that `encode(decode(line)) == line` always holds.
pub fn decode(line: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = line;

    while let Some(idx) = rest.find(ESC) {
        text.push_str(&rest[..idx]);
        let candidate = &rest[idx..];
        match parse_sgr(candidate) {
            Some((params, consumed)) => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Sgr(params));
                rest = &candidate[consumed..];
            }
            None => {
                text.push(ESC);
                rest = &candidate[ESC.len_utf8()..];
            }
        }
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}

pub fn encode(segments: &[Segment]) -> String {
    segments.iter().map(Segment::encode).collect()
}

fn parse_sgr(s: &str) -> Option<(Vec<u16>, usize)> {
    let body = s.strip_prefix("\x1b[")?;
    let end = body.find('m')?;
    let raw = &body[..end];
    if !raw.chars().all(|c| c.is_ascii_digit() || c == ';') {
        return None;
    }
    let params = if raw.is_empty() {
        Vec::new()
    } else {
        raw.split(';')
            // "01" would re-encode as "1"
            .map(|p| p.parse::<u16>().ok().filter(|v| v.to_string() == p))
            .collect::<Option<Vec<_>>>()?
    };
    Some((params, 2 + end + 1))
}

/// Wrap `text` in the gray highlight, as the shell echoes configured values.
pub fn highlight(text: &str) -> String {
    format!("{}{}{}", HIGHLIGHT, text, RESET)
}

pub fn is_reset_line(line: &str) -> bool {
    line == RESET
}

/// Text with every SGR sequence removed. Only for interpreting table
/// structure; never use it to build a transcript.
pub fn visible_text(line: &str) -> String {
    decode(line)
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Text(text) => Some(text),
            Segment::Sgr(_) => None,
        })
        .collect()
}
