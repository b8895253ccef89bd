//! Line-framed TCP endpoint.
//!
//! Presents byte-stream sockets as streams of newline-terminated text
//! lines. A line ends at the first `\n`; a preceding `\r` is stripped. A
//! lone `\r` terminates nothing. Lines past the configured cap close the
//! socket with [`BrokerError::OversizeLine`].
//!
//! Every socket opened through one [`Endpoint`] shares a bounded message
//! queue where unclaimed inbound lines are stashed for late retrieval by
//! origin or by arbitrary predicate. Consumed entries are garbage and get
//! dropped by the next compaction pass.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpListener, TcpStream};

use crate::error::{BrokerError, Result};

const READ_CHUNK: usize = 16 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One buffered inbound line, retained until popped and compacted away.
#[derive(Debug, Clone)]
pub struct TcpMessage {
    pub line: String,
    pub origin: SocketAddr,
    /// Correlation tag attached by the preceding tagged write, if any.
    pub tag: Option<String>,
    consumed: bool,
}

#[derive(Debug)]
struct MessageQueue {
    entries: Vec<TcpMessage>,
    capacity: usize,
}

impl MessageQueue {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    fn push(&mut self, msg: TcpMessage) {
        self.entries.push(msg);
        if self.entries.len() > self.capacity {
            self.compact();
        }
    }

    /// Drop consumed entries; if still over capacity, drop the oldest.
    fn compact(&mut self) {
        self.entries.retain(|m| !m.consumed);
        while self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }

    fn depth(&self) -> usize {
        self.entries.iter().filter(|m| !m.consumed).count()
    }

    fn pop_latest(&mut self) -> Option<TcpMessage> {
        let msg = self.entries.iter_mut().rev().find(|m| !m.consumed)?;
        msg.consumed = true;
        Some(msg.clone())
    }

    fn pop_where<F>(&mut self, pred: F) -> Option<TcpMessage>
    where
        F: Fn(&TcpMessage) -> bool,
    {
        let msg = self
            .entries
            .iter_mut()
            .find(|m| !m.consumed && pred(m))?;
        msg.consumed = true;
        Some(msg.clone())
    }
}

/// Factory and shared state for line-framed sockets.
pub struct Endpoint {
    max_line_bytes: usize,
    messages: Arc<Mutex<MessageQueue>>,
}

impl Endpoint {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            messages: Arc::new(Mutex::new(MessageQueue::new(DEFAULT_QUEUE_CAPACITY))),
        }
    }

    /// Bind a listening socket (server mode).
    pub async fn bind(&self, addr: &str) -> Result<Listener> {
        let resolved = resolve(addr).await?;
        let inner = TcpListener::bind(resolved)
            .await
            .map_err(|source| BrokerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Listener {
            inner,
            max_line_bytes: self.max_line_bytes,
            messages: self.messages.clone(),
        })
    }

    /// Open an outbound connection, bounded by `connect_timeout`.
    pub async fn dial(&self, addr: &str, connect_timeout: Duration) -> Result<LineStream> {
        let resolved = resolve(addr).await?;
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| {
                BrokerError::Socket(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ))
            })??;
        let peer = stream.peer_addr()?;
        Ok(LineStream::new(
            stream,
            peer,
            self.max_line_bytes,
            self.messages.clone(),
        ))
    }

    /// Count of stashed, not-yet-consumed lines.
    pub fn queue_depth(&self) -> usize {
        self.messages.lock().unwrap().depth()
    }

    /// Most recent unconsumed stashed line, marked consumed.
    pub fn pop_latest(&self) -> Option<TcpMessage> {
        self.messages.lock().unwrap().pop_latest()
    }

    /// Oldest unconsumed stashed line matching `pred`, marked consumed.
    /// Per-origin arrival order is preserved.
    pub fn pop_where<F>(&self, pred: F) -> Option<TcpMessage>
    where
        F: Fn(&TcpMessage) -> bool,
    {
        self.messages.lock().unwrap().pop_where(pred)
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    lookup_host(addr)
        .await
        .map_err(|e| BrokerError::Resolve(format!("{addr}: {e}")))?
        .next()
        .ok_or_else(|| BrokerError::Resolve(format!("{addr}: no addresses")))
}

pub struct Listener {
    inner: TcpListener,
    max_line_bytes: usize,
    messages: Arc<Mutex<MessageQueue>>,
}

impl Listener {
    pub async fn accept(&self) -> Result<(LineStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        Ok((
            LineStream::new(stream, peer, self.max_line_bytes, self.messages.clone()),
            peer,
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

/// Outcome of a bounded read.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Line(String),
    /// Peer closed the stream cleanly.
    Eof,
    TimedOut,
}

/// A connected socket with buffered line framing.
pub struct LineStream {
    stream: TcpStream,
    buf: BytesMut,
    max_line: usize,
    peer: SocketAddr,
    pending_tag: Option<String>,
    messages: Arc<Mutex<MessageQueue>>,
}

impl LineStream {
    fn new(
        stream: TcpStream,
        peer: SocketAddr,
        max_line: usize,
        messages: Arc<Mutex<MessageQueue>>,
    ) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_line,
            peer,
            pending_tag: None,
            messages,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read the next line. `Ok(None)` means the peer closed cleanly.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = take_line(&mut self.buf, self.max_line)? {
                return Ok(Some(line));
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }

    /// Bounded read: waits at most `wait` for a complete line.
    pub async fn next_line(&mut self, wait: Duration) -> Result<LineEvent> {
        match tokio::time::timeout(wait, self.read_line()).await {
            Ok(Ok(Some(line))) => Ok(LineEvent::Line(line)),
            Ok(Ok(None)) => Ok(LineEvent::Eof),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(LineEvent::TimedOut),
        }
    }

    /// Write one line, appending `\r\n`, flushing fully.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        write_framed(&mut self.stream, line).await
    }

    /// Like [`write_line`](Self::write_line), but records `tag` so the next
    /// inbound line stashed from this peer carries it.
    pub async fn write_line_tagged(&mut self, line: &str, tag: &str) -> Result<()> {
        self.pending_tag = Some(tag.to_string());
        self.write_line(line).await
    }

    /// Stash a line into the endpoint queue for late retrieval.
    pub fn stash(&mut self, line: String) {
        let msg = TcpMessage {
            line,
            origin: self.peer,
            tag: self.pending_tag.take(),
            consumed: false,
        };
        self.messages.lock().unwrap().push(msg);
    }

    /// Split into reader/writer halves for independent tasks.
    pub fn into_split(self) -> (LineReader, LineWriter) {
        let (read, write) = self.stream.into_split();
        (
            LineReader {
                read,
                buf: self.buf,
                max_line: self.max_line,
                peer: self.peer,
                messages: self.messages,
            },
            LineWriter {
                write,
                peer: self.peer,
            },
        )
    }
}

pub struct LineReader {
    read: OwnedReadHalf,
    buf: BytesMut,
    max_line: usize,
    peer: SocketAddr,
    messages: Arc<Mutex<MessageQueue>>,
}

impl LineReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = take_line(&mut self.buf, self.max_line)? {
                return Ok(Some(line));
            }
            let n = self.read.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }

    pub fn stash(&mut self, line: String) {
        let msg = TcpMessage {
            line,
            origin: self.peer,
            tag: None,
            consumed: false,
        };
        self.messages.lock().unwrap().push(msg);
    }
}

pub struct LineWriter {
    write: OwnedWriteHalf,
    peer: SocketAddr,
}

impl LineWriter {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        write_framed(&mut self.write, line).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

async fn write_framed<W>(write: &mut W, line: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\r\n").await?;
    write.flush().await?;
    Ok(())
}

/// Pull one complete line out of `buf`, or report an oversize buffer.
fn take_line(buf: &mut BytesMut, max_line: usize) -> Result<Option<String>> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            if idx > max_line {
                return Err(BrokerError::OversizeLine { max: max_line });
            }
            let mut raw = buf.split_to(idx + 1);
            raw.truncate(raw.len() - 1);
            if raw.last() == Some(&b'\r') {
                raw.truncate(raw.len() - 1);
            }
            let line = String::from_utf8(raw.to_vec())
                .map_err(|_| BrokerError::Protocol("line is not valid UTF-8".into()))?;
            Ok(Some(line))
        }
        None => {
            if buf.len() > max_line {
                return Err(BrokerError::OversizeLine { max: max_line });
            }
            Ok(None)
        }
    }
}
