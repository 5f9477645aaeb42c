// Security checks as a capability set; `CliActions` runs them over the line protocol.

use async_trait::async_trait;

use super::{DifferentialOracle, RunContext};
use crate::client::{PaginationCustomizer, Session};
use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::protocol::ansi::{ERROR_BANNER, ERROR_CLOSE, RESET};
use crate::protocol::messages::{unauthorized_marker, BAD_REQUEST};
use crate::protocol::transcript::Sentinel;

#[async_trait]
pub trait SecurityActions {
    /// The admin sees the whole `test` index.
    async fn query_works_as_admin(&self) -> Result<()>;
    async fn expect_matches_admin(&self, admin_sql: &str, user: &str, user_sql: &str) -> Result<()>;
    /// Same as `expect_matches_admin`, one row per page.
    async fn expect_scroll_matches_admin(&self, admin_sql: &str, user: &str, user_sql: &str) -> Result<()>;
    /// `DESCRIBE test` lists exactly `columns` as (name, type). `None` is the admin.
    async fn expect_describe(&self, columns: &[(&str, &str)], user: Option<&str>) -> Result<()>;
    async fn expect_show_tables(&self, tables: &[&str], user: Option<&str>) -> Result<()>;
    async fn expect_forbidden(&self, user: &str, sql: &str) -> Result<()>;
    async fn expect_unknown_index(&self, user: &str, sql: &str) -> Result<()>;
    async fn expect_unknown_column(&self, user: &str, sql: &str, column: &str) -> Result<()>;
}

pub struct CliActions {
    scenario: ScenarioConfig,
}

impl CliActions {
    pub fn new(scenario: ScenarioConfig) -> Self {
        Self { scenario }
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    async fn open(&self, user: Option<&str>, probe_on_connect: bool) -> Result<Session> {
        Session::open(&self.scenario.connection(user, probe_on_connect)).await
    }
}

/// Asserts on one response line, reporting where it went wrong.
struct Expect<'a> {
    context: RunContext<'a>,
    position: usize,
}

impl<'a> Expect<'a> {
    fn new(principal: &'a str, query: &'a str) -> Self {
        Self {
            context: RunContext { principal, query },
            position: 0,
        }
    }

    fn that(&mut self, actual: &str, ok: bool, expected: &str) -> Result<()> {
        let position = self.position;
        self.position += 1;
        if ok {
            return Ok(());
        }
        Err(self
            .context
            .divergence(position, Some(expected), Some(actual), "unexpected response line")
            .into())
    }

    fn contains(&mut self, actual: &str, needle: &str) -> Result<()> {
        self.that(actual, actual.contains(needle), needle)
    }

    fn equals(&mut self, actual: &str, expected: &str) -> Result<()> {
        self.that(actual, actual == expected, expected)
    }

    fn sentinel(&mut self, actual: &str) -> Result<()> {
        self.that(actual, Sentinel::of(actual).is_some(), Sentinel::Blank.as_str())
    }
}

const ADMIN_QUERY: &str = "SELECT * FROM test ORDER BY a";
const TWO_COLUMN_DASHES: &str = "---------------+---------------";

#[async_trait]
impl SecurityActions for CliActions {
    async fn query_works_as_admin(&self) -> Result<()> {
        let mut session = self.open(None, true).await?;
        let principal = session.principal().to_string();
        let result = async {
            let mut expect = Expect::new(&principal, ADMIN_QUERY);
            let header = session.command(ADMIN_QUERY).await?;
            expect.contains(&header, "a       |       b       |       c")?;
            expect.equals(&session.read_line().await?, "---------------+---------------+---------------")?;
            expect.contains(&session.read_line().await?, "1              |2              |3")?;
            expect.contains(&session.read_line().await?, "4              |5              |6")?;
            expect.equals(&session.read_line().await?, "")
        }
        .await;
        session.close().await;
        result
    }

    async fn expect_matches_admin(&self, admin_sql: &str, user: &str, user_sql: &str) -> Result<()> {
        DifferentialOracle::new(self.scenario.clone())
            .expect_matches_admin(admin_sql, user, user_sql)
            .await
    }

    async fn expect_scroll_matches_admin(&self, admin_sql: &str, user: &str, user_sql: &str) -> Result<()> {
        DifferentialOracle::new(self.scenario.clone())
            .with_customizer(PaginationCustomizer::scroll_one_by_one())
            .expect_matches_admin(admin_sql, user, user_sql)
            .await
    }

    async fn expect_describe(&self, columns: &[(&str, &str)], user: Option<&str>) -> Result<()> {
        let sql = "DESCRIBE test";
        let mut session = self.open(user, true).await?;
        let principal = session.principal().to_string();
        let result = async {
            let mut expect = Expect::new(&principal, sql);
            expect.contains(&session.command(sql).await?, "column     |     type")?;
            expect.equals(&session.read_line().await?, TWO_COLUMN_DASHES)?;
            for (name, type_name) in columns {
                let line = session.read_line().await?;
                let wanted = format!("{}...|{}", name, type_name);
                let ok = line.starts_with(name) && line.contains(&format!("|{}", type_name));
                expect.that(&line, ok, &wanted)?;
            }
            expect.equals(&session.read_line().await?, "")
        }
        .await;
        session.close().await;
        result
    }

    async fn expect_show_tables(&self, tables: &[&str], user: Option<&str>) -> Result<()> {
        let sql = "SHOW TABLES";
        let mut session = self.open(user, true).await?;
        let principal = session.principal().to_string();
        let result = async {
            let mut expect = Expect::new(&principal, sql);
            let header = session.command(sql).await?;
            let ok = header.contains("name") && header.contains("type");
            expect.that(&header, ok, "name | type")?;
            expect.equals(&session.read_line().await?, TWO_COLUMN_DASHES)?;
            for table in tables {
                let mut line = session.read_line().await?;
                while line.starts_with(".security") {
                    line = session.read_line().await?;
                }
                expect.contains(&line, table)?;
            }
            expect.equals(&session.read_line().await?, "")
        }
        .await;
        session.close().await;
        result
    }

    async fn expect_forbidden(&self, user: &str, sql: &str) -> Result<()> {
        // no probe, so the query itself is what gets denied
        let mut session = self.open(Some(user), false).await?;
        let result = async {
            let mut expect = Expect::new(user, sql);
            expect.contains(&session.command(sql).await?, &unauthorized_marker(user))?;
            expect.sentinel(&session.read_line().await?)
        }
        .await;
        session.close().await;
        result
    }

    async fn expect_unknown_index(&self, user: &str, sql: &str) -> Result<()> {
        let mut session = self.open(Some(user), true).await?;
        let result = async {
            let mut expect = Expect::new(user, sql);
            expect.contains(&session.command(sql).await?, BAD_REQUEST)?;
            expect.contains(&session.read_line().await?, "Unknown index")?;
            expect.sentinel(&session.read_line().await?)
        }
        .await;
        session.close().await;
        result
    }

    async fn expect_unknown_column(&self, user: &str, sql: &str, column: &str) -> Result<()> {
        let mut session = self.open(Some(user), true).await?;
        let result = async {
            let mut expect = Expect::new(user, sql);
            let banner = format!("{}{}", ERROR_BANNER, BAD_REQUEST);
            expect.contains(&session.command(sql).await?, &banner)?;
            let detail = format!("Unknown column [{}]{}]{}", column, ERROR_CLOSE, RESET);
            expect.contains(&session.read_line().await?, &detail)?;
            expect.sentinel(&session.read_line().await?)
        }
        .await;
        session.close().await;
        result
    }
}
