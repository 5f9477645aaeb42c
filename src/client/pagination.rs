// Fetch size / separator settings and the session-scoped scroll cursor.

use super::session::Session;
use crate::error::{ConfigurationError, Result};
use crate::protocol::messages::{
    fetch_separator_confirmation, fetch_size_confirmation, fetch_size_value, Command, ProtocolError,
};
use crate::protocol::table::is_separator_line;
use crate::protocol::transcript::Transcript;

pub const DEFAULT_FETCH_SIZE: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub fetch_size: u32,
    pub fetch_separator: String,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            fetch_separator: String::new(),
        }
    }
}

impl PaginationState {
    /// Record a setting once the backend has echoed its confirmation.
    pub(super) fn apply_confirmed(&mut self, setting: &Command, reply: &str) -> bool {
        match setting {
            Command::FetchSize(size) if reply == fetch_size_confirmation(*size) => {
                self.fetch_size = *size;
                true
            }
            Command::FetchSeparator(sep) if reply == fetch_separator_confirmation(sep) => {
                self.fetch_separator = sep.clone();
                true
            }
            _ => false,
        }
    }
}

pub fn validate_fetch_size(size: i64) -> std::result::Result<u32, ConfigurationError> {
    if size <= 0 {
        return Err(ConfigurationError::NonPositiveFetchSize(size));
    }
    u32::try_from(size).map_err(|_| ConfigurationError::FetchSizeTooLarge(size))
}

/// Parse a shell line, reporting bad fetch sizes as configuration errors.
pub fn parse_command(line: &str) -> Result<Command> {
    if let Some(size) = fetch_size_value(line).and_then(|value| value.parse::<i64>().ok()) {
        validate_fetch_size(size)?;
    }
    Ok(Command::parse(line)?)
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaginationStep {
    FetchSize(i64),
    FetchSeparator(String),
}

/// Meta-commands applied to a fresh session before the query under test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationCustomizer {
    steps: Vec<PaginationStep>,
}

impl PaginationCustomizer {
    pub fn none() -> Self {
        Self::default()
    }

    /// One row per page with a visible separator, so every page boundary shows up.
    pub fn scroll_one_by_one() -> Self {
        Self::none().fetch_size(1).fetch_separator(" -- fetch sep -- ")
    }

    pub fn fetch_size(mut self, size: i64) -> Self {
        self.steps.push(PaginationStep::FetchSize(size));
        self
    }

    pub fn fetch_separator(mut self, separator: impl Into<String>) -> Self {
        self.steps.push(PaginationStep::FetchSeparator(separator.into()));
        self
    }

    pub fn steps(&self) -> &[PaginationStep] {
        &self.steps
    }

    pub async fn apply(&self, session: &mut Session) -> Result<()> {
        for step in &self.steps {
            match step {
                PaginationStep::FetchSize(size) => session.set_fetch_size(*size).await?,
                PaginationStep::FetchSeparator(sep) => session.set_fetch_separator(sep).await?,
            }
        }
        Ok(())
    }
}

/// One page of a scrolled result.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Header and dash line; only the first page has them.
    pub header: Option<(String, String)>,
    pub rows: Vec<String>,
    /// The highlighted separator line when more pages follow.
    pub continuation: Option<String>,
    pub transcript: Transcript,
}

impl Page {
    pub fn from_transcript(transcript: Transcript, first: bool) -> Result<Self> {
        let mut body = transcript.body().to_vec();
        let continuation = if transcript.is_continued() {
            Some(body.pop().ok_or_else(|| ProtocolError::UnexpectedResponse {
                expected: "a continuation marker before the reset sentinel".into(),
                actual: String::new(),
            })?)
        } else {
            None
        };

        let header = if first {
            if body.len() < 2 || !is_separator_line(&body[1]) {
                return Err(ProtocolError::UnexpectedResponse {
                    expected: "a table header".into(),
                    actual: transcript.first_line().to_string(),
                }
                .into());
            }
            let mut rest = body.split_off(2);
            std::mem::swap(&mut body, &mut rest);
            let mut header_lines = rest.into_iter();
            match (header_lines.next(), header_lines.next()) {
                (Some(names), Some(dashes)) => Some((names, dashes)),
                _ => None,
            }
        } else {
            None
        };

        Ok(Self {
            header,
            rows: body,
            continuation,
            transcript,
        })
    }

    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

impl Session {
    pub fn pagination(&self) -> &PaginationState {
        &self.pagination
    }

    pub fn has_open_scroll(&self) -> bool {
        self.scroll_open
    }

    /// Validated before sending; takes effect from the next page on.
    pub async fn set_fetch_size(&mut self, size: i64) -> Result<()> {
        let size = validate_fetch_size(size)?;
        self.expect_confirmation(&Command::FetchSize(size), fetch_size_confirmation(size))
            .await
    }

    pub async fn set_fetch_separator(&mut self, separator: &str) -> Result<()> {
        if separator.contains('\n') || separator.contains('\r') {
            return Err(ConfigurationError::InvalidSeparator(separator.to_string()).into());
        }
        self.expect_confirmation(
            &Command::FetchSeparator(separator.to_string()),
            fetch_separator_confirmation(separator),
        )
        .await
    }

    async fn expect_confirmation(&mut self, command: &Command, expected: String) -> Result<()> {
        let transcript = self.execute(command).await?;
        if transcript.first_line() != expected {
            return Err(ProtocolError::UnexpectedResponse {
                expected,
                actual: transcript.first_line().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Re-arm the cursor and read the raw transcript of the next page.
    pub async fn fetch_next(&mut self) -> Result<Transcript> {
        if !self.scroll_open {
            return Err(ProtocolError::NoOpenScroll.into());
        }
        self.execute(&Command::FetchNext).await
    }

    /// Run `sql` and return its first page.
    pub async fn scroll(&mut self, sql: &str) -> Result<Page> {
        let transcript = self.execute(&Command::Query(sql.to_string())).await?;
        Page::from_transcript(transcript, true)
    }

    /// The next page, or `None` once the result set is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if !self.scroll_open {
            return Ok(None);
        }
        let transcript = self.fetch_next().await?;
        Ok(Some(Page::from_transcript(transcript, false)?))
    }

    /// Scroll `sql` to the end and return every page in order.
    pub async fn collect_pages(&mut self, sql: &str) -> Result<Vec<Page>> {
        let mut pages = vec![self.scroll(sql).await?];
        while let Some(page) = self.next_page().await? {
            pages.push(page);
        }
        Ok(pages)
    }

    /// Row lines of every page, in order.
    pub async fn collect_rows(&mut self, sql: &str) -> Result<Vec<String>> {
        let pages = self.collect_pages(sql).await?;
        Ok(pages.into_iter().flat_map(|page| page.rows).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(raw: &[&str]) -> Transcript {
        Transcript::from_lines(raw.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_first_page_with_continuation() {
        let page = Page::from_transcript(
            transcript(&["  a  ", "-----", "1    ", "\x1b[90m--\x1b[0m", "\x1b[0m"]),
            true,
        )
        .unwrap();
        assert_eq!(page.header, Some(("  a  ".into(), "-----".into())));
        assert_eq!(page.rows, vec!["1    ".to_string()]);
        assert_eq!(page.continuation.as_deref(), Some("\x1b[90m--\x1b[0m"));
        assert!(page.has_more());
    }

    #[test]
    fn test_last_page_without_header() {
        let page = Page::from_transcript(transcript(&["4    ", ""]), false).unwrap();
        assert_eq!(page.header, None);
        assert_eq!(page.rows, vec!["4    ".to_string()]);
        assert!(!page.has_more());
    }

    #[test]
    fn test_error_response_is_not_a_page() {
        let err = Page::from_transcript(transcript(&["\x1b[1;31mBad request [oops", "detail", ""]), true)
            .unwrap_err();
        assert!(err.to_string().contains("table header"));
    }

    #[test]
    fn test_customizer_steps_in_order() {
        let customizer = PaginationCustomizer::scroll_one_by_one();
        assert_eq!(
            customizer.steps(),
            &[
                PaginationStep::FetchSize(1),
                PaginationStep::FetchSeparator(" -- fetch sep -- ".into()),
            ]
        );
        assert!(PaginationCustomizer::none().steps().is_empty());
    }

    #[test]
    fn test_validate_fetch_size() {
        assert_eq!(validate_fetch_size(1), Ok(1));
        assert_eq!(validate_fetch_size(0), Err(ConfigurationError::NonPositiveFetchSize(0)));
        assert_eq!(validate_fetch_size(-3), Err(ConfigurationError::NonPositiveFetchSize(-3)));
        let too_large = u32::MAX as i64 + 1;
        assert_eq!(validate_fetch_size(too_large), Err(ConfigurationError::FetchSizeTooLarge(too_large)));
    }

    #[test]
    fn test_parse_command_reports_fetch_size_as_configuration() {
        let err = parse_command("fetch size = 0").unwrap_err();
        assert!(matches!(err, crate::Error::Configuration(ConfigurationError::NonPositiveFetchSize(0))));
        let err = parse_command("FETCH SIZE = 99999999999").unwrap_err();
        assert!(matches!(err, crate::Error::Configuration(ConfigurationError::FetchSizeTooLarge(_))));
        assert_eq!(parse_command("fetch size = 5").unwrap(), Command::FetchSize(5));
        assert!(matches!(parse_command("fetch size = abc").unwrap_err(), crate::Error::Protocol(_)));
    }

    #[test]
    fn test_confirmed_settings_are_recorded() {
        let mut state = PaginationState::default();
        assert!(!state.apply_confirmed(&Command::FetchSize(5), "fetch size set to 7"));
        assert_eq!(state.fetch_size, DEFAULT_FETCH_SIZE);
        assert!(state.apply_confirmed(&Command::FetchSize(5), &fetch_size_confirmation(5)));
        assert_eq!(state.fetch_size, 5);
        let sep = Command::FetchSeparator("--".into());
        assert!(state.apply_confirmed(&sep, &fetch_separator_confirmation("--")));
        assert_eq!(state.fetch_separator, "--");
        assert!(!state.apply_confirmed(&Command::Info, "anything"));
    }

    #[test]
    fn test_default_state() {
        let state = PaginationState::default();
        assert_eq!(state.fetch_size, DEFAULT_FETCH_SIZE);
        assert_eq!(state.fetch_separator, "");
    }
}
