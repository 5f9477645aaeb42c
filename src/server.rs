// Line-protocol fixture backend: the black box the shell client and the
// authorization oracle talk to in tests and in the fixture-server binary.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;

use crate::backend::sqlite::SqliteBackend;
use crate::catalog::{self, CatalogError};
use crate::protocol::ansi::RESET;
use crate::protocol::messages::*;
use crate::protocol::table::TextTable;
use crate::security::{Policy, Principal};
use crate::sql::guard::{guard, locate, GuardError};

pub const NODE_NAME: &str = "sqlshell-fixture";
/// Action reported when the connection probe is denied.
pub const MONITOR_ACTION: &str = "cluster:monitor/main";

pub struct CliServer {
    backend: Arc<SqliteBackend>,
    policy: Arc<Policy>,
    addr: String,
}

impl CliServer {
    pub fn new(addr: &str, backend: SqliteBackend, policy: Policy) -> Self {
        Self {
            backend: Arc::new(backend),
            policy: Arc::new(policy),
            addr: addr.to_string(),
        }
    }

    pub async fn run(&self) -> Result<(), String> {
        let listener = TcpListener::bind(&self.addr).await
            .map_err(|e| format!("Failed to bind: {}", e))?;
        tracing::info!("sqlshell fixture listening on {}", self.addr);

        loop {
            let (stream, addr) = listener.accept().await
                .map_err(|e| format!("Accept error: {}", e))?;
            tracing::info!("New connection from {}", addr);

            let backend = self.backend.clone();
            let policy = self.policy.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, backend, policy).await {
                    tracing::error!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Public wrapper for integration tests
pub async fn handle_connection_public(
    stream: TcpStream,
    backend: Arc<SqliteBackend>,
    policy: Arc<Policy>,
) -> Result<(), String> {
    handle_connection(stream, backend, policy).await
}

/// Lines written back for one command.
struct Response {
    lines: Vec<String>,
    /// Hang up after writing.
    close: bool,
}

impl Response {
    /// Ends with the blank sentinel.
    fn complete(mut lines: Vec<String>) -> Self {
        lines.push(String::new());
        Self { lines, close: false }
    }

    /// Ends with the reset sentinel: the cursor has more rows.
    fn continued(mut lines: Vec<String>) -> Self {
        lines.push(RESET.to_string());
        Self { lines, close: false }
    }

    fn bad_request(column: usize, message: &str) -> Self {
        Self::complete(vec![
            bad_request_banner("Found 1 problem(s)"),
            error_detail(1, column, message),
        ])
    }

    fn hang_up(mut self) -> Self {
        self.close = true;
        self
    }

    fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for line in &self.lines {
            buf.put_slice(line.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.freeze()
    }
}

/// Server-side scroll position over a fully materialized result.
struct Cursor {
    id: Uuid,
    table: TextTable,
    remaining: VecDeque<Vec<String>>,
}

struct ConnectionState {
    principal: Option<Principal>,
    fetch_size: u32,
    fetch_separator: String,
    cursor: Option<Cursor>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            principal: None,
            fetch_size: crate::client::pagination::DEFAULT_FETCH_SIZE,
            fetch_separator: String::new(),
            cursor: None,
        }
    }

    fn first_page(&mut self, columns: Vec<String>, rows: Vec<Vec<String>>) -> Response {
        let table = TextTable::fit(columns, &rows);
        let lines = vec![table.header(), table.separator()];
        let cursor = Cursor {
            id: Uuid::new_v4(),
            table,
            remaining: rows.into(),
        };
        self.emit_page(cursor, lines)
    }

    /// Up to `fetch_size` rows; keeps the cursor when rows remain.
    fn emit_page(&mut self, mut cursor: Cursor, mut lines: Vec<String>) -> Response {
        let take = (self.fetch_size as usize).min(cursor.remaining.len());
        for row in cursor.remaining.drain(..take) {
            lines.push(cursor.table.row(&row));
        }
        if cursor.remaining.is_empty() {
            return Response::complete(lines);
        }
        lines.push(continuation_line(&self.fetch_separator));
        tracing::debug!("Cursor {} holds {} more rows", cursor.id, cursor.remaining.len());
        self.cursor = Some(cursor);
        Response::continued(lines)
    }
}

async fn handle_connection(
    stream: TcpStream,
    backend: Arc<SqliteBackend>,
    policy: Arc<Policy>,
) -> Result<(), String> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut state = ConnectionState::new();

    loop {
        let line = match read_command_line(&mut reader).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("Client disconnected");
                return Ok(());
            }
            Err(e) => {
                let error = Response::complete(vec![server_error_line(&e)]);
                let _ = write_half.write_all(&error.serialize()).await;
                return Err(e);
            }
        };

        let response = match Command::parse(&line) {
            Ok(command) => dispatch(command, &mut state, &backend, &policy),
            Err(e) => Response::bad_request(1, &e.to_string()),
        };

        write_half.write_all(&response.serialize()).await
            .map_err(|e| format!("Write error: {}", e))?;
        if response.close {
            tracing::info!("Client terminated");
            return Ok(());
        }
    }
}

async fn read_command_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<String>, String> {
    let mut buf = Vec::new();
    let limit = MAX_LINE_LENGTH as u64 + 1;
    let n = reader.take(limit).read_until(b'\n', &mut buf).await
        .map_err(|e| format!("Read error: {}", e))?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && n as u64 >= limit {
        return Err(format!("Line too large (max {} bytes)", MAX_LINE_LENGTH));
    }
    let line = String::from_utf8(buf).map_err(|_| "Line is not valid UTF-8".to_string())?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn dispatch(command: Command, state: &mut ConnectionState, backend: &SqliteBackend, policy: &Policy) -> Response {
    let authenticated = state.principal.is_some();
    match (&command, authenticated) {
        (Command::Quit, _) => return Response { lines: Vec::new(), close: true },
        (Command::Hello { principal, secret }, false) => {
            return match policy.authenticate(principal, secret) {
                Some(user) => {
                    tracing::info!("Authenticated [{}]", user.name);
                    let welcome = format!("{} {}", WELCOME, user.name);
                    state.principal = Some(user);
                    Response::complete(vec![welcome])
                }
                None => {
                    tracing::warn!("Authentication failed for [{}]", principal);
                    let message = format!("unable to authenticate user [{}]", principal);
                    Response::complete(vec![server_error_line(&message)]).hang_up()
                }
            };
        }
        (Command::Hello { .. }, true) => return Response::bad_request(1, "session is already authenticated"),
        _ => {}
    }
    let Some(principal) = state.principal.clone() else {
        return Response::complete(vec![server_error_line("missing authentication")]).hang_up();
    };

    match command {
        Command::Info => {
            if principal.connect {
                Response::complete(vec![format!("{} version {}", NODE_NAME, env!("CARGO_PKG_VERSION"))])
            } else {
                Response::complete(vec![forbidden_line(MONITOR_ACTION, &principal.name)])
            }
        }
        Command::FetchSize(size) => {
            state.fetch_size = size;
            Response::complete(vec![fetch_size_confirmation(size)])
        }
        Command::FetchSeparator(separator) => {
            let confirmation = fetch_separator_confirmation(&separator);
            state.fetch_separator = separator;
            Response::complete(vec![confirmation])
        }
        Command::FetchNext => match state.cursor.take() {
            Some(cursor) => state.emit_page(cursor, Vec::new()),
            None => Response::bad_request(1, "No cursor to fetch from"),
        },
        Command::Query(sql) => {
            // a new statement abandons any open scroll
            state.cursor = None;
            if !principal.sql {
                return Response::complete(vec![forbidden_line(SQL_ACTION, &principal.name)]);
            }
            match run_query(&sql, &principal, backend) {
                Ok((columns, rows)) => state.first_page(columns, rows),
                Err(response) => response,
            }
        }
        Command::Hello { .. } | Command::Quit => Response::bad_request(1, "unexpected command"),
    }
}

fn run_query(
    sql: &str,
    principal: &Principal,
    backend: &SqliteBackend,
) -> Result<(Vec<String>, Vec<Vec<String>>), Response> {
    if sql.is_empty() {
        return Err(Response::bad_request(1, "Empty query"));
    }

    if let Some(query) = catalog::intercept_catalog_query(sql) {
        return catalog::get_catalog_result(&query, backend, principal)
            .map(|result| (result.columns, result.rows))
            .map_err(|e| match e {
                CatalogError::UnknownIndex(index) => {
                    Response::bad_request(locate(sql, &index), &unknown_index_message(&index))
                }
                CatalogError::Backend(message) => internal_error(&message),
            });
    }

    let guarded = guard(sql, principal, backend).map_err(|e| match e {
        GuardError::Parse(message) => Response::bad_request(1, &message),
        GuardError::NotAQuery => Response::bad_request(1, "Only SELECT statements are supported"),
        GuardError::UnknownIndex { index, column } => {
            Response::bad_request(column, &unknown_index_message(&index))
        }
        GuardError::Backend(message) => internal_error(&message),
    })?;
    tracing::debug!("[{}] running {}", principal.name, guarded.sql);

    let result = backend.query(&guarded.sql).map_err(|message| sqlite_error(sql, &message))?;
    let rows = result
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(|v| v.unwrap_or_else(|| "null".to_string())).collect())
        .collect();
    Ok((result.columns, rows))
}

fn internal_error(message: &str) -> Response {
    tracing::error!("Backend failure: {}", message);
    Response::complete(vec![server_error_line(message)])
}

/// Map a SQLite failure onto the shell's error shapes.
fn sqlite_error(sql: &str, message: &str) -> Response {
    if let Some(column) = after_marker(message, "no such column: ") {
        return Response::bad_request(locate(sql, column), &unknown_column_message(column));
    }
    if let Some(table) = after_marker(message, "no such table: ") {
        return Response::bad_request(locate(sql, table), &unknown_index_message(table));
    }
    Response::bad_request(1, message)
}

fn after_marker<'a>(message: &'a str, marker: &str) -> Option<&'a str> {
    let idx = message.find(marker)?;
    message[idx + marker.len()..].split_whitespace().next()
}
