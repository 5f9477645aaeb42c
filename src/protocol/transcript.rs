use super::ansi;
use super::messages::ProtocolError;

/// The line that closes a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Empty line: the response is complete.
    Blank,
    /// A lone reset sequence: the page ended but the session cursor has more rows.
    Reset,
}

impl Sentinel {
    pub fn of(line: &str) -> Option<Sentinel> {
        if line.is_empty() {
            Some(Sentinel::Blank)
        } else if ansi::is_reset_line(line) {
            Some(Sentinel::Reset)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::Blank => "",
            Sentinel::Reset => ansi::RESET,
        }
    }
}

/// One line received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Body(String),
    Sentinel(Sentinel),
}

impl Line {
    pub fn classify(raw: String) -> Line {
        match Sentinel::of(&raw) {
            Some(sentinel) => Line::Sentinel(sentinel),
            None => Line::Body(raw),
        }
    }

    /// The raw text, with sentinels rendered as they appeared on the wire.
    pub fn into_text(self) -> String {
        match self {
            Line::Body(text) => text,
            Line::Sentinel(sentinel) => sentinel.as_str().to_string(),
        }
    }
}

/// Every line of one response; the last line is its only sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn from_lines(lines: Vec<String>) -> Result<Self, ProtocolError> {
        match lines.iter().position(|l| Sentinel::of(l).is_some()) {
            None => Err(ProtocolError::MissingSentinel),
            Some(idx) if idx + 1 != lines.len() => Err(ProtocolError::TrailingAfterSentinel(idx + 1)),
            Some(_) => Ok(Self { lines }),
        }
    }

    /// Cut a raw line stream into consecutive transcripts.
    pub fn split_stream<I>(lines: I) -> Result<Vec<Transcript>, ProtocolError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut transcripts = Vec::new();
        let mut current = Vec::new();
        for line in lines {
            let done = Sentinel::of(&line).is_some();
            current.push(line);
            if done {
                transcripts.push(Transcript { lines: std::mem::take(&mut current) });
            }
        }
        if !current.is_empty() {
            return Err(ProtocolError::MissingSentinel);
        }
        Ok(transcripts)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn first_line(&self) -> &str {
        &self.lines[0]
    }

    /// Lines before the sentinel.
    pub fn body(&self) -> &[String] {
        &self.lines[..self.lines.len() - 1]
    }

    pub fn sentinel(&self) -> Sentinel {
        // from_lines and split_stream only build transcripts ending in a sentinel
        Sentinel::of(&self.lines[self.lines.len() - 1]).unwrap_or(Sentinel::Blank)
    }

    /// The backend holds more rows for this result.
    pub fn is_continued(&self) -> bool {
        self.sentinel() == Sentinel::Reset
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sentinel_recognition() {
        assert_eq!(Sentinel::of(""), Some(Sentinel::Blank));
        assert_eq!(Sentinel::of("\x1b[0m"), Some(Sentinel::Reset));
        assert_eq!(Sentinel::of(" "), None);
        assert_eq!(Sentinel::of("\x1b[90m--\x1b[0m"), None);
    }

    #[test]
    fn test_transcript_requires_single_trailing_sentinel() {
        assert!(Transcript::from_lines(lines(&["a", "b", ""])).is_ok());
        assert_eq!(
            Transcript::from_lines(lines(&["a", "b"])),
            Err(ProtocolError::MissingSentinel)
        );
        assert_eq!(
            Transcript::from_lines(lines(&["a", "", "b", ""])),
            Err(ProtocolError::TrailingAfterSentinel(2))
        );
    }

    #[test]
    fn test_rescanning_yields_one_sentinel_at_the_end() {
        let stream = lines(&["h", "--", "r1", "\x1b[90m|\x1b[0m", "\x1b[0m", "r2", "", "ok", ""]);
        let transcripts = Transcript::split_stream(stream).unwrap();
        assert_eq!(transcripts.len(), 3);
        for transcript in &transcripts {
            let again = Transcript::split_stream(transcript.lines().to_vec()).unwrap();
            assert_eq!(again.len(), 1);
            assert_eq!(&again[0], transcript);
            let sentinels = transcript
                .lines()
                .iter()
                .filter(|l| Sentinel::of(l).is_some())
                .count();
            assert_eq!(sentinels, 1);
        }
        assert!(transcripts[0].is_continued());
        assert!(!transcripts[1].is_continued());
    }

    #[test]
    fn test_split_stream_rejects_unterminated_tail() {
        let stream = lines(&["a", "", "dangling"]);
        assert_eq!(Transcript::split_stream(stream), Err(ProtocolError::MissingSentinel));
    }

    #[test]
    fn test_body_excludes_sentinel() {
        let t = Transcript::from_lines(lines(&["x", "y", ""])).unwrap();
        assert_eq!(t.body(), &["x".to_string(), "y".to_string()][..]);
        assert_eq!(t.first_line(), "x");
        assert_eq!(t.sentinel(), Sentinel::Blank);
    }

    #[test]
    fn test_line_into_text_keeps_raw_sentinel() {
        assert_eq!(Line::classify("\x1b[0m".into()).into_text(), "\x1b[0m");
        assert_eq!(Line::classify(String::new()), Line::Sentinel(Sentinel::Blank));
    }
}
