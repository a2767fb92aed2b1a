//! Command-response port to the modem
//!
//! Every exchange is a command string followed by lines up to a final
//! status token. The token is classified into a closed set of [`Outcome`]s;
//! no response within the caller's timeout is [`Outcome::Timeout`].

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

/// Unsolicited lines kept for [`CommandPort::wait_urc`]
const MAX_UNSOLICITED: usize = 32;

/// Errors on the underlying byte stream
#[derive(Error, Debug)]
pub enum PortError {
    #[error("Port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port closed")]
    Closed,
}

/// Classified final status of an exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error(String),
    /// Data prompt (`> `); the modem is waiting for a payload
    Prompt,
    Timeout,
}

/// Response to one command: final outcome plus any information lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub outcome: Outcome,
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(outcome: Outcome, lines: Vec<String>) -> Self {
        Self { outcome, lines }
    }

    pub fn ok() -> Self {
        Self::new(Outcome::Ok, Vec::new())
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    /// Payload of the first line starting with `prefix`, trimmed
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
    }
}

/// Classify a line as a final status token
fn classify(line: &str) -> Option<Outcome> {
    if line == "OK" {
        return Some(Outcome::Ok);
    }
    if line == "ERROR" {
        return Some(Outcome::Error("ERROR".into()));
    }
    ["+CME ERROR:", "+CMS ERROR:"]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(|detail| Outcome::Error(detail.trim().to_string()))
}

/// Exchange primitive the modem session and transports are built on
#[async_trait]
pub trait CommandPort: Send {
    /// Send a command and wait for its final status token
    async fn command(&mut self, cmd: &str, timeout: Duration) -> Result<Reply, PortError>;

    /// Write a raw payload after a data prompt and wait for the final status token
    async fn write_payload(&mut self, data: &[u8], timeout: Duration) -> Result<Reply, PortError>;

    /// Wait for an unsolicited line starting with `prefix`
    async fn wait_urc(&mut self, prefix: &str, timeout: Duration)
        -> Result<Option<String>, PortError>;

    /// Read exactly `len` raw bytes
    async fn read_raw(&mut self, len: usize, timeout: Duration) -> Result<Option<Bytes>, PortError>;
}

enum Line {
    Text(String),
    Prompt,
}

/// AT command channel over an async byte stream (serial device in production)
pub struct AtChannel<S> {
    stream: S,
    rx: BytesMut,
    unsolicited: VecDeque<String>,
}

impl<S> AtChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            rx: BytesMut::with_capacity(1024),
            unsolicited: VecDeque::new(),
        }
    }

    /// Split the next complete line (or a data prompt) off the buffer
    fn take_line(&mut self) -> Option<Line> {
        while matches!(self.rx.first(), Some(b'\r' | b'\n')) {
            self.rx.advance(1);
        }

        if self.rx.first() == Some(&b'>') {
            self.rx.advance(1);
            if self.rx.first() == Some(&b' ') {
                self.rx.advance(1);
            }
            return Some(Line::Prompt);
        }

        let end = self.rx.iter().position(|&b| b == b'\n')?;
        let raw = self.rx.split_to(end + 1);
        let text = String::from_utf8_lossy(&raw)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        Some(Line::Text(text))
    }

    fn stash(&mut self, line: String) {
        if self.unsolicited.len() == MAX_UNSOLICITED {
            self.unsolicited.pop_front();
        }
        self.unsolicited.push_back(line);
    }

    /// Move complete lines received between exchanges to the unsolicited queue
    fn drain_unsolicited(&mut self) {
        while let Some(line) = self.take_line() {
            if let Line::Text(text) = line {
                self.stash(text);
            }
        }
    }

    /// Read more bytes; false on deadline
    async fn fill(&mut self, deadline: Instant) -> Result<bool, PortError> {
        let mut chunk = [0u8; 256];
        match timeout_at(deadline, self.stream.read(&mut chunk)).await {
            Err(_) => Ok(false),
            Ok(Ok(0)) => Err(PortError::Closed),
            Ok(Ok(n)) => {
                self.rx.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(PortError::Io(e)),
        }
    }

    async fn collect_reply(
        &mut self,
        echo: Option<&str>,
        deadline: Instant,
    ) -> Result<Reply, PortError> {
        let mut lines = Vec::new();
        loop {
            while let Some(line) = self.take_line() {
                let text = match line {
                    Line::Prompt => return Ok(Reply::new(Outcome::Prompt, lines)),
                    Line::Text(text) => text,
                };
                if let Some(outcome) = classify(&text) {
                    return Ok(Reply::new(outcome, lines));
                }
                if !text.is_empty() && Some(text.as_str()) != echo {
                    lines.push(text);
                }
            }
            if !self.fill(deadline).await? {
                return Ok(Reply::new(Outcome::Timeout, lines));
            }
        }
    }
}

#[async_trait]
impl<S> CommandPort for AtChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn command(&mut self, cmd: &str, timeout: Duration) -> Result<Reply, PortError> {
        let deadline = Instant::now() + timeout;
        self.drain_unsolicited();

        self.stream.write_all(cmd.as_bytes()).await?;
        self.stream.write_all(b"\r").await?;
        self.stream.flush().await?;

        self.collect_reply(Some(cmd), deadline).await
    }

    async fn write_payload(&mut self, data: &[u8], timeout: Duration) -> Result<Reply, PortError> {
        let deadline = Instant::now() + timeout;
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        self.collect_reply(None, deadline).await
    }

    async fn wait_urc(
        &mut self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Option<String>, PortError> {
        if let Some(index) = self.unsolicited.iter().position(|l| l.starts_with(prefix)) {
            return Ok(self.unsolicited.remove(index));
        }

        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.take_line() {
                if let Line::Text(text) = line {
                    if text.starts_with(prefix) {
                        return Ok(Some(text));
                    }
                    if !text.is_empty() {
                        self.stash(text);
                    }
                }
            }
            if !self.fill(deadline).await? {
                return Ok(None);
            }
        }
    }

    async fn read_raw(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Bytes>, PortError> {
        let deadline = Instant::now() + timeout;
        while self.rx.len() < len {
            if !self.fill(deadline).await? {
                return Ok(None);
            }
        }
        Ok(Some(self.rx.split_to(len).freeze()))
    }
}
