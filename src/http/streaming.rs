//! Paced chunked responses.
//!
//! # Responsibilities
//! - Deliver an ordered list of chunks to a sink, one at a time
//! - Write each chunk whole, flush it, then wait the pacing interval
//! - Stop quietly on the first sink failure (the client went away)
//!
//! # State Machine
//! ```text
//! Idle → Writing(i) → Flushed(i) → Paced(i) → Writing(i+1) → ... → Done
//!            │            │
//!            └────────────┴──→ Aborted
//! ```
//! `Done` and `Aborted` are terminal; the sink is not touched afterwards.
//!
//! # Design Decisions
//! - One `run` call is one job; the writer keeps nothing between jobs
//! - Pacing uses `tokio::time::sleep`, so a paced job never blocks a worker
//! - A failed write or flush is an expected outcome, not an error

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue},
    response::Response,
};
use thiserror::Error;
use tracing::Instrument;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::http::error::ApiError;

/// Why a sink refused a chunk.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("flush failed: {0}")]
    Flush(#[source] std::io::Error),

    #[error("chunked framing was not declared before the first write")]
    FramingNotDeclared,

    #[error("receiver closed")]
    Closed,
}

/// Destination of a chunked job.
pub trait ChunkSink: Send {
    /// Commit to chunked transfer framing. Called once, before any write.
    fn declare_chunked(&mut self) -> Result<(), SinkError>;

    /// Accept one whole chunk.
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Push everything written so far to the transport.
    fn flush(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Where a job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Writing(usize),
    Flushed(usize),
    Paced(usize),
    Done,
    Aborted,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Done | StreamState::Aborted)
    }

    fn can_advance_to(self, next: StreamState) -> bool {
        use StreamState::*;
        match (self, next) {
            (Idle, Writing(0)) | (Idle, Done) | (Idle, Aborted) => true,
            (Writing(i), Flushed(j)) => i == j,
            (Flushed(i), Paced(j)) => i == j,
            (Paced(i), Writing(j)) => j == i + 1,
            (Flushed(_), Done) => true,
            (Writing(_), Aborted) | (Flushed(_), Aborted) => true,
            _ => false,
        }
    }
}

/// How a job ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Every chunk was written and flushed.
    Done { delivered: usize },
    /// The sink failed while handling chunk `at`; `delivered` chunks made it.
    Aborted {
        delivered: usize,
        at: usize,
        error: SinkError,
    },
}

impl StreamOutcome {
    pub fn delivered(&self) -> usize {
        match self {
            StreamOutcome::Done { delivered } | StreamOutcome::Aborted { delivered, .. } => *delivered,
        }
    }

    pub fn state(&self) -> StreamState {
        match self {
            StreamOutcome::Done { .. } => StreamState::Done,
            StreamOutcome::Aborted { .. } => StreamState::Aborted,
        }
    }
}

/// Tracks one job through the state machine.
struct Job {
    state: StreamState,
}

impl Job {
    fn advance(&mut self, next: StreamState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal stream transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "stream transition");
        self.state = next;
    }
}

/// Paced chunk writer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    pacing: Duration,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PACING)
    }
}

impl ChunkWriter {
    pub const DEFAULT_PACING: Duration = Duration::from_millis(500);

    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    /// Same writer with a different pause between chunks.
    pub fn with_pacing(self, pacing: Duration) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Run one job to `Done` or `Aborted`.
    pub async fn run<S, I>(&self, sink: &mut S, chunks: I) -> StreamOutcome
    where
        S: ChunkSink,
        I: IntoIterator<Item = Bytes>,
    {
        let mut job = Job {
            state: StreamState::Idle,
        };

        if let Err(error) = sink.declare_chunked() {
            job.advance(StreamState::Aborted);
            return StreamOutcome::Aborted {
                delivered: 0,
                at: 0,
                error,
            };
        }

        let mut chunks = chunks.into_iter().enumerate().peekable();
        let mut delivered = 0;

        while let Some((i, chunk)) = chunks.next() {
            job.advance(StreamState::Writing(i));
            let result = match sink.write(chunk).await {
                Ok(()) => sink.flush().await,
                Err(e) => Err(e),
            };
            if let Err(error) = result {
                job.advance(StreamState::Aborted);
                return StreamOutcome::Aborted {
                    delivered,
                    at: i,
                    error,
                };
            }
            job.advance(StreamState::Flushed(i));
            delivered = i + 1;

            if chunks.peek().is_none() {
                break;
            }
            job.advance(StreamState::Paced(i));
            tokio::time::sleep(self.pacing).await;
        }

        job.advance(StreamState::Done);
        StreamOutcome::Done { delivered }
    }
}

/// Run one paced job against `sink`.
pub async fn write_chunks<S, I>(sink: &mut S, chunks: I, pacing: Duration) -> StreamOutcome
where
    S: ChunkSink,
    I: IntoIterator<Item = Bytes>,
{
    ChunkWriter::new(pacing).run(sink, chunks).await
}

/// One chunk on its way to the response body. `delivered` fires once the
/// body has handed the bytes to the connection.
struct Frame {
    data: Bytes,
    delivered: oneshot::Sender<()>,
}

/// Sink feeding an axum response body.
pub struct ChannelSink {
    head: Option<oneshot::Sender<()>>,
    declared: bool,
    pending: Vec<Bytes>,
    tx: mpsc::Sender<Frame>,
}

impl ChannelSink {
    /// Build a sink, the body it feeds, and a receiver that resolves when the
    /// sink commits to chunked framing.
    pub fn channel() -> (Self, Body, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel::<Frame>(1);
        let (head_tx, head_rx) = oneshot::channel();

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            let frame = rx.recv().await?;
            let _ = frame.delivered.send(());
            Some((Ok::<_, Infallible>(frame.data), rx))
        });

        let sink = Self {
            head: Some(head_tx),
            declared: false,
            pending: Vec::new(),
            tx,
        };
        (sink, Body::from_stream(stream), head_rx)
    }
}

impl ChunkSink for ChannelSink {
    fn declare_chunked(&mut self) -> Result<(), SinkError> {
        if let Some(head) = self.head.take() {
            head.send(()).map_err(|_| SinkError::Closed)?;
        }
        self.declared = true;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        if !self.declared {
            return Err(SinkError::FramingNotDeclared);
        }
        if self.tx.is_closed() {
            return Err(SinkError::Closed);
        }
        self.pending.push(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        let data = match self.pending.len() {
            0 => return Ok(()),
            1 => self.pending.remove(0),
            _ => Bytes::from(std::mem::take(&mut self.pending).concat()),
        };

        let (delivered, ack) = oneshot::channel();
        self.tx
            .send(Frame { data, delivered })
            .await
            .map_err(|_| SinkError::Closed)?;
        ack.await.map_err(|_| SinkError::Closed)
    }
}

/// Sink over any async byte writer (socket, pipe, in-memory duplex).
/// The caller owns the framing on the wire.
pub struct IoSink<W> {
    inner: W,
    declared: bool,
}

impl<W> IoSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            declared: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W> ChunkSink for IoSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn declare_chunked(&mut self) -> Result<(), SinkError> {
        self.declared = true;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        if !self.declared {
            return Err(SinkError::FramingNotDeclared);
        }
        self.inner.write_all(&chunk).await.map_err(SinkError::Write)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush().await.map_err(SinkError::Flush)
    }
}

/// Answer a request with `chunks` delivered by `writer`.
///
/// The job runs on its own task. This returns once the sink has committed
/// to chunked framing, with a response whose body the job feeds.
/// `Transfer-Encoding: chunked` declares the framing for HTTP/1.1; HTTP/2
/// connections drop it and use DATA frames.
pub async fn stream_response(chunks: Vec<Bytes>, writer: ChunkWriter) -> Result<Response, ApiError> {
    let (mut sink, body, head) = ChannelSink::channel();
    let total = chunks.len();

    tokio::spawn(async move {
        match writer.run(&mut sink, chunks).await {
            StreamOutcome::Done { delivered } => {
                tracing::debug!(delivered, "Chunked stream complete");
            }
            StreamOutcome::Aborted { delivered, at, error } => {
                tracing::info!(delivered, at, total, reason = %error, "Chunked stream aborted, client went away");
            }
        }
    }
    .in_current_span());

    head.await.map_err(|_| {
        ApiError::opaque(std::io::Error::other("stream writer stopped before committing framing"))
    })?;

    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    Ok(response)
}
