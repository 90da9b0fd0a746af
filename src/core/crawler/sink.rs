// src/core/crawler/sink.rs

//! The buffered client sink that dump crawls stream into.
//!
//! The worker owns the sink from attach until release. Writes are
//! best-effort: each flush round waits at most one second for the socket
//! to become writable, writes once, and resumes partial writes on the
//! next round. A peer that hangs up latches the sink into a closed state;
//! every later operation reports failure and the scan winds itself down.

use crate::core::errors::CrawlerError;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Minimum free buffer space a mode may assume before its `eval` runs.
pub const MIN_BUFSPACE: usize = 8192;

/// Initial output buffer size.
pub const CRAWLER_WRITEBUF: usize = 16 * MIN_BUFSPACE;

/// How long one flush round waits for socket writability.
const FLUSH_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// A connection handed back to the server once the crawler is done with
/// it, with the reason it is coming back.
#[derive(Debug)]
pub enum ReleasedClient {
    /// Clean completion; the connection should be re-owned by a worker
    /// thread.
    Redispatch(TcpStream),
    /// The peer hung up or errored while the crawler held the
    /// connection.
    SideThreadClosed(TcpStream),
}

/// A connected client waiting to receive a dump, plus the channel the
/// connection is returned through when the crawl ends.
#[derive(Debug)]
pub struct DumpClient {
    stream: TcpStream,
    handoff: mpsc::UnboundedSender<ReleasedClient>,
}

impl DumpClient {
    pub fn new(stream: TcpStream, handoff: mpsc::UnboundedSender<ReleasedClient>) -> Self {
        Self { stream, handoff }
    }
}

/// Outcome of one flush round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Progress was made (possibly a partial write).
    Flushed,
    /// No progress this round; retry on the next batch.
    Retry,
    /// The peer is gone. The sink is now latched closed.
    Closed,
}

/// The crawler's buffered writer.
#[derive(Debug)]
pub struct ClientSink {
    client: Option<DumpClient>,
    buf: Vec<u8>,
    closed: bool,
}

impl ClientSink {
    /// Attaches a client and allocates the output buffer. Allocation
    /// failure surfaces as an error so the start call can abort cleanly.
    pub fn attach(client: DumpClient) -> Result<Self, CrawlerError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(CRAWLER_WRITEBUF)
            .map_err(|_| CrawlerError::OutOfMemory)?;
        Ok(Self {
            client: Some(client),
            buf,
            closed: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn used(&self) -> usize {
        self.buf.len()
    }

    fn free_space(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    /// Whether the headroom contract requires a flush before the next
    /// `eval`.
    pub fn needs_flush(&self) -> bool {
        self.free_space() < MIN_BUFSPACE
    }

    /// Doubles the buffer. On allocation failure the caller aborts the
    /// scan.
    pub fn expand(&mut self) -> Result<(), CrawlerError> {
        let grow_by = self.buf.capacity().max(CRAWLER_WRITEBUF);
        self.buf
            .try_reserve_exact(grow_by)
            .map_err(|_| CrawlerError::OutOfMemory)
    }

    /// Grows the buffer until at least `MIN_BUFSPACE` is free. Used by
    /// the hash walk, which cannot flush mid-bucket.
    pub fn ensure_headroom(&mut self) -> Result<(), CrawlerError> {
        while !self.closed && self.free_space() < MIN_BUFSPACE {
            self.expand()?;
        }
        if self.closed {
            Err(CrawlerError::Internal("sink is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Appends bytes to the output buffer. A no-op once the sink is
    /// closed.
    pub fn append(&mut self, bytes: &[u8]) {
        if !self.closed {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// One flush round: wait up to a second for writability, write once,
    /// keep whatever did not fit for the next round.
    pub async fn flush(&mut self) -> FlushOutcome {
        if self.closed {
            return FlushOutcome::Closed;
        }
        if self.buf.is_empty() {
            return FlushOutcome::Flushed;
        }
        let Some(client) = self.client.as_ref() else {
            return FlushOutcome::Closed;
        };
        match timeout(FLUSH_POLL_TIMEOUT, client.stream.writable()).await {
            Err(_elapsed) => FlushOutcome::Retry,
            Ok(Err(_)) => {
                self.close();
                FlushOutcome::Closed
            }
            Ok(Ok(())) => match client.stream.try_write(&self.buf) {
                Ok(0) => {
                    self.close();
                    FlushOutcome::Closed
                }
                Ok(n) => {
                    self.buf.drain(..n);
                    FlushOutcome::Flushed
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => FlushOutcome::Retry,
                Err(_) => {
                    self.close();
                    FlushOutcome::Closed
                }
            },
        }
    }

    /// Latches the sink closed and returns the connection to the server
    /// as a side-thread close. The buffer is freed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buf = Vec::new();
        if let Some(client) = self.client.take() {
            debug!("crawler client connection closed by peer");
            let _ = client
                .handoff
                .send(ReleasedClient::SideThreadClosed(client.stream));
        }
    }

    /// Hands the connection back for redispatch after a clean crawl.
    pub fn release(mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.handoff.send(ReleasedClient::Redispatch(client.stream));
        }
        self.buf = Vec::new();
    }
}
