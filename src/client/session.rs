// One socket to the backend: handshake, optional probe, strict request/response.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::pagination::{parse_command, PaginationState};
use crate::config::{ConnectionConfig, SecurityConfig};
use crate::error::{ConnectionError, Result};
use crate::protocol::messages::{Command, ProtocolError, BAD_REQUEST, MAX_LINE_LENGTH, SERVER_ERROR, WELCOME};
use crate::protocol::transcript::{Line, Sentinel, Transcript};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Ready to send.
    Idle,
    /// A command was sent and its sentinel has not been seen yet.
    Reading,
    /// The stream is out of sync or gone; only `close` is meaningful.
    Failed,
    Closed,
}

struct Io {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Closes a session from outside, unblocking a pending read.
#[derive(Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.tx.send_replace(true);
    }
}

pub struct Session {
    endpoint: String,
    principal: String,
    io: Option<Io>,
    read_timeout: Duration,
    phase: Phase,
    /// The pending reply belongs to a query or `fetch next`.
    paging_reply: bool,
    /// A fetch setting awaiting its confirmation line.
    pending_setting: Option<Command>,
    pub(super) scroll_open: bool,
    pub(super) pagination: PaginationState,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

enum ReadOutcome {
    Read(std::result::Result<std::io::Result<usize>, tokio::time::error::Elapsed>),
    Cancelled,
}

impl Session {
    /// Connect, authenticate and, if configured, probe.
    pub async fn open(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        let principal = config.security.principal.clone();
        tracing::info!("Connecting to {} as [{}]", endpoint, principal);

        let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&endpoint)).await {
            Err(_) => return Err(ConnectionError::Timeout(config.connect_timeout).into()),
            Ok(Err(source)) => return Err(ConnectionError::Io { endpoint, source }.into()),
            Ok(Ok(stream)) => stream,
        };
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (close_tx, close_rx) = watch::channel(false);

        let mut session = Session {
            endpoint,
            principal,
            io: Some(Io {
                reader: BufReader::new(read_half),
                writer: write_half,
            }),
            read_timeout: config.read_timeout,
            phase: Phase::Idle,
            paging_reply: false,
            pending_setting: None,
            scroll_open: false,
            pagination: PaginationState::default(),
            close_tx: Arc::new(close_tx),
            close_rx,
        };

        if config.security.enabled {
            tracing::debug!(
                "Transport security requested for [{}]; trust material is passed through untouched",
                session.principal
            );
        }
        session.authenticate(&config.security).await?;
        if config.probe_on_connect {
            session.probe().await?;
        } else {
            tracing::debug!("Skipping connection probe for [{}]", session.principal);
        }
        Ok(session)
    }

    async fn authenticate(&mut self, security: &SecurityConfig) -> Result<()> {
        let hello = Command::Hello {
            principal: security.principal.clone(),
            secret: security.secret.clone(),
        };
        let transcript = self.execute(&hello).await?;
        let expected = format!("{} {}", WELCOME, security.principal);
        if transcript.first_line() != expected {
            return Err(ConnectionError::Authentication {
                principal: security.principal.clone(),
                message: transcript.first_line().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn probe(&mut self) -> Result<()> {
        let transcript = self.execute(&Command::Info).await?;
        let first = transcript.first_line();
        if first.contains(BAD_REQUEST) || first.contains(SERVER_ERROR) {
            return Err(ConnectionError::ProbeRejected {
                principal: self.principal.clone(),
                line: first.to_string(),
            }
            .into());
        }
        tracing::debug!("Probe for [{}] answered: {}", self.principal, first);
        Ok(())
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle { tx: self.close_tx.clone() }
    }

    /// Write one command. The previous transcript must have been drained.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::Reading => return Err(ProtocolError::TranscriptInProgress.into()),
            Phase::Failed | Phase::Closed => return Err(ConnectionError::Closed.into()),
        }
        let bytes = command.serialize()?;
        tracing::debug!("[{}] -> {}", self.principal, loggable(command));

        let io = self.io.as_mut().ok_or(ConnectionError::Closed)?;
        if let Err(source) = io.writer.write_all(&bytes).await {
            self.phase = Phase::Failed;
            return Err(ConnectionError::Io { endpoint: self.endpoint.clone(), source }.into());
        }

        self.paging_reply = matches!(command, Command::Query(_) | Command::FetchNext);
        self.pending_setting = match command {
            Command::FetchSize(_) | Command::FetchSeparator(_) => Some(command.clone()),
            _ => None,
        };
        if matches!(command, Command::Query(_)) {
            // a new query discards the backend cursor
            self.scroll_open = false;
        }
        self.phase = Phase::Reading;
        Ok(())
    }

    /// Next line of the pending transcript, blocking up to the read timeout.
    pub async fn recv(&mut self) -> Result<Line> {
        match self.phase {
            Phase::Reading => {}
            Phase::Idle => return Err(ProtocolError::NoPendingTranscript.into()),
            Phase::Failed | Phase::Closed => return Err(ConnectionError::Closed.into()),
        }
        let line = Line::classify(self.read_raw_line().await?);
        match &line {
            Line::Body(text) => {
                if let Some(setting) = self.pending_setting.take() {
                    self.pagination.apply_confirmed(&setting, text);
                }
            }
            Line::Sentinel(sentinel) => {
                self.phase = Phase::Idle;
                self.pending_setting = None;
                if self.paging_reply {
                    self.scroll_open = *sentinel == Sentinel::Reset;
                }
            }
        }
        Ok(line)
    }

    /// Send a line as the shell would and return the first response line.
    pub async fn command(&mut self, line: &str) -> Result<String> {
        let command = parse_command(line)?;
        self.send(&command).await?;
        self.read_line().await
    }

    /// Next raw line; sentinels come back as their wire text.
    pub async fn read_line(&mut self) -> Result<String> {
        Ok(self.recv().await?.into_text())
    }

    /// Drain the pending response up to and including its sentinel.
    pub async fn read_transcript(&mut self) -> Result<Transcript> {
        let mut lines = Vec::new();
        loop {
            match self.recv().await? {
                Line::Body(text) => lines.push(text),
                Line::Sentinel(sentinel) => {
                    lines.push(sentinel.as_str().to_string());
                    break;
                }
            }
        }
        Ok(Transcript::from_lines(lines)?)
    }

    pub async fn execute(&mut self, command: &Command) -> Result<Transcript> {
        self.send(command).await?;
        self.read_transcript().await
    }

    async fn read_raw_line(&mut self) -> Result<String> {
        if *self.close_rx.borrow() {
            self.phase = Phase::Failed;
            return Err(ConnectionError::Cancelled.into());
        }
        let read_timeout = self.read_timeout;
        let limit = MAX_LINE_LENGTH as u64 + 1;
        let mut buf = Vec::new();

        let outcome = {
            let io = self.io.as_mut().ok_or(ConnectionError::Closed)?;
            let mut limited = (&mut io.reader).take(limit);
            let read = limited.read_until(b'\n', &mut buf);
            tokio::select! {
                res = tokio::time::timeout(read_timeout, read) => ReadOutcome::Read(res),
                _ = self.close_rx.changed() => ReadOutcome::Cancelled,
            }
        };

        let read = match outcome {
            ReadOutcome::Cancelled => {
                self.phase = Phase::Failed;
                return Err(ConnectionError::Cancelled.into());
            }
            ReadOutcome::Read(read) => read,
        };
        let n = match read {
            Err(_) => {
                self.phase = Phase::Failed;
                return Err(ConnectionError::Timeout(read_timeout).into());
            }
            Ok(Err(source)) => {
                self.phase = Phase::Failed;
                return Err(ConnectionError::Io { endpoint: self.endpoint.clone(), source }.into());
            }
            Ok(Ok(n)) => n,
        };

        if buf.last() != Some(&b'\n') {
            self.phase = Phase::Failed;
            if n as u64 >= limit {
                return Err(ProtocolError::LineTooLong.into());
            }
            return Err(ProtocolError::PrematureEnd.into());
        }
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| {
            self.phase = Phase::Failed;
            ProtocolError::InvalidUtf8.into()
        })
    }

    /// Say goodbye and release the socket. Safe to call any number of times.
    pub async fn close(&mut self) {
        self.phase = Phase::Closed;
        self.close_tx.send_replace(true);
        let Some(mut io) = self.io.take() else {
            return;
        };
        if let Ok(quit) = Command::Quit.serialize() {
            let _ = tokio::time::timeout(self.read_timeout, io.writer.write_all(&quit)).await;
        }
        let _ = tokio::time::timeout(self.read_timeout, io.writer.shutdown()).await;
        tracing::info!("Closed session for [{}]", self.principal);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.io.is_some() {
            tracing::debug!("Session for [{}] dropped without close; releasing socket", self.principal);
            self.close_tx.send_replace(true);
        }
    }
}

fn loggable(command: &Command) -> String {
    match command {
        Command::Hello { principal, .. } => format!("\\hello {} <redacted>", principal),
        other => other.encode().unwrap_or_else(|_| "<unencodable>".to_string()),
    }
}
