// Differential authorization oracle: run a query as the admin, replay a
// matched query as a restricted principal, and compare the two transcripts.

pub mod actions;
pub mod classify;

pub use actions::{CliActions, SecurityActions};
pub use classify::{classify, DivergenceOutcome, RunContext};

use crate::client::{PaginationCustomizer, Session};
use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::protocol::messages::Command;
use crate::protocol::transcript::{Line, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleState {
    RunPrivileged,
    CapturedGolden,
    RunRestricted,
    Compared,
    Done,
}

/// Every page one run produced, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pages: Vec<Transcript>,
}

/// The privileged run's capture; never mutated once taken.
pub type GoldenTranscript = Capture;

impl Capture {
    pub fn new(pages: Vec<Transcript>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[Transcript] {
        &self.pages
    }

    /// All pages flattened, sentinels included.
    pub fn lines(&self) -> Vec<&str> {
        self.pages
            .iter()
            .flat_map(|page| page.lines().iter().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Transcript::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Send `sql` and follow the scroll to its end.
pub async fn capture(session: &mut Session, sql: &str) -> Result<Capture> {
    let mut pages = vec![session.execute(&Command::Query(sql.to_string())).await?];
    while session.has_open_scroll() {
        pages.push(session.fetch_next().await?);
    }
    Ok(Capture::new(pages))
}

/// Send `sql` and check each line against `golden` as it arrives.
pub async fn replay_lock_step(
    session: &mut Session,
    sql: &str,
    golden: &GoldenTranscript,
) -> Result<()> {
    let principal = session.principal().to_string();
    let context = RunContext { principal: &principal, query: sql };

    let mut expected = golden.lines().into_iter();
    let mut position = 0;
    session.send(&Command::Query(sql.to_string())).await?;
    loop {
        let line = session.recv().await?;
        let done = matches!(line, Line::Sentinel(_));
        let actual = line.into_text();
        match expected.next() {
            None => {
                return Err(context
                    .divergence(position, None, Some(&actual), "restricted output is longer than the golden transcript")
                    .into())
            }
            Some(e) if e != actual => {
                return Err(context.divergence(position, Some(e), Some(&actual), "transcript mismatch").into())
            }
            Some(_) => {}
        }
        position += 1;
        if done {
            if !session.has_open_scroll() {
                break;
            }
            session.send(&Command::FetchNext).await?;
        }
    }

    if let Some(missing) = expected.next() {
        return Err(context
            .divergence(position, Some(missing), None, "restricted output ended before the golden transcript")
            .into());
    }
    Ok(())
}

/// Drives one privileged and one restricted session per check.
pub struct DifferentialOracle {
    scenario: ScenarioConfig,
    customizer: PaginationCustomizer,
    state: OracleState,
}

impl DifferentialOracle {
    pub fn new(scenario: ScenarioConfig) -> Self {
        Self {
            scenario,
            customizer: PaginationCustomizer::none(),
            state: OracleState::Done,
        }
    }

    pub fn with_customizer(mut self, customizer: PaginationCustomizer) -> Self {
        self.customizer = customizer;
        self
    }

    pub fn state(&self) -> OracleState {
        self.state
    }

    fn enter(&mut self, state: OracleState) {
        tracing::debug!("Oracle {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Admin run of `sql`, every page included.
    pub async fn capture_golden(&mut self, sql: &str) -> Result<GoldenTranscript> {
        self.enter(OracleState::RunPrivileged);
        let golden = self.run(None, true, sql).await?;
        self.enter(OracleState::CapturedGolden);
        Ok(golden)
    }

    /// The restricted transcript must equal the admin one line for line.
    pub async fn expect_matches_admin(&mut self, admin_sql: &str, user: &str, user_sql: &str) -> Result<()> {
        let golden = self.capture_golden(admin_sql).await?;

        self.enter(OracleState::RunRestricted);
        let config = self.scenario.connection(Some(user), true);
        let mut session = Session::open(&config).await?;
        let outcome = async {
            self.customizer.apply(&mut session).await?;
            replay_lock_step(&mut session, user_sql, &golden).await
        }
        .await;
        session.close().await;

        self.enter(OracleState::Compared);
        outcome?;
        self.enter(OracleState::Done);
        Ok(())
    }

    /// Capture both runs in full and say how they differ.
    pub async fn classify_against_admin(
        &mut self,
        admin_sql: &str,
        user: &str,
        user_sql: &str,
        probe_on_connect: bool,
    ) -> Result<DivergenceOutcome> {
        let golden = self.capture_golden(admin_sql).await?;

        self.enter(OracleState::RunRestricted);
        let restricted = self.run(Some(user), probe_on_connect, user_sql).await?;

        self.enter(OracleState::Compared);
        let outcome = classify(&golden, &restricted, RunContext { principal: user, query: user_sql })?;
        tracing::debug!("[{}] {} classified as {:?}", user, user_sql, outcome);
        self.enter(OracleState::Done);
        Ok(outcome)
    }

    async fn run(&self, user: Option<&str>, probe_on_connect: bool, sql: &str) -> Result<Capture> {
        let config = self.scenario.connection(user, probe_on_connect);
        let mut session = Session::open(&config).await?;
        let captured = async {
            self.customizer.apply(&mut session).await?;
            capture(&mut session, sql).await
        }
        .await;
        session.close().await;
        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript(raw: &[&str]) -> Transcript {
        Transcript::from_lines(raw.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_capture_flattens_pages() {
        let capture = Capture::new(vec![
            transcript(&["  a  ", "-----", "1    ", "\x1b[90m--\x1b[0m", "\x1b[0m"]),
            transcript(&["4    ", ""]),
        ]);
        assert_eq!(capture.len(), 7);
        assert_eq!(capture.lines()[4], "\x1b[0m");
        assert_eq!(capture.lines()[6], "");
        assert!(!capture.is_empty());
    }

    #[test]
    fn test_oracle_starts_idle() {
        let scenario = ScenarioConfig::new(
            "127.0.0.1:1",
            crate::config::SecurityConfig::new("test_admin", "x-pack-test-password"),
            "testpass",
        );
        let oracle = DifferentialOracle::new(scenario);
        assert_eq!(oracle.state(), OracleState::Done);
    }
}
