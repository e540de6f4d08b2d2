//! Link multiplexer: the single arbitration point in front of the transport.
//!
//! All reads go through one reassembly buffer. While no stream is active a
//! command exchange reads the wire itself; while a stream is active only the
//! inventory worker reads, and it hands the one pending command its reply.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::{Result, RfidError};
use crate::frame::{Frame, extract_frames_with_limit};
use crate::protocol::{FrameKind, Mid, classify};
use crate::transport::RfidTransport;

const READ_CHUNK: usize = 256;
const EXCHANGE_POLL_MS: u32 = 20;
const ROUTE_CHECK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    CommandInFlight,
    InventoryStreaming,
}

/// Ownership token for the inventory stream; at most one exists per link.
#[derive(Debug)]
pub struct StreamHandle {
    id: u64,
}

impl StreamHandle {
    /// Distinguishes this stream from earlier ones on the same link.
    pub fn id(&self) -> u64 {
        self.id
    }
}

type Matcher = Arc<dyn Fn(&Frame) -> bool + Send + Sync>;

struct Waiter {
    matcher: Matcher,
    tx: Sender<Frame>,
}

struct Port<T> {
    transport: T,
    pending: Vec<u8>,
    /// Decoded but not yet handed out
    ready: VecDeque<Frame>,
}

pub struct Link<T: RfidTransport> {
    port: Mutex<Port<T>>,
    state: Mutex<LinkState>,
    waiter: Mutex<Option<Waiter>>,
    /// Stream holding `InventoryStreaming`, 0 when none. Written under `state`.
    stream: AtomicU64,
    next_stream: AtomicU64,
    /// Stream whose worker is reading the wire, 0 when none.
    pumping: AtomicU64,
    max_payload: usize,
}

fn transport_error<E: std::fmt::Debug>(e: E) -> RfidError {
    RfidError::Transport(format!("{:?}", e))
}

impl<T: RfidTransport> Link<T> {
    pub fn new(transport: T, max_payload: usize) -> Self {
        Self {
            port: Mutex::new(Port {
                transport,
                pending: Vec::new(),
                ready: VecDeque::new(),
            }),
            state: Mutex::new(LinkState::Idle),
            waiter: Mutex::new(None),
            stream: AtomicU64::new(0),
            next_stream: AtomicU64::new(1),
            pumping: AtomicU64::new(0),
            max_payload,
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Write raw frame bytes.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let mut port = self.port.lock();
        let mut written = 0;
        while written < frame.len() {
            let n = port
                .transport
                .write(&frame[written..])
                .map_err(transport_error)?;
            if n == 0 {
                return Err(RfidError::Transport("Transport accepted no bytes".into()));
            }
            written += n;
        }
        trace!("Wrote {} bytes: {:02X?}", written, frame);
        Ok(())
    }

    /// Drop everything received but not yet consumed, on the wire and in the buffer.
    pub fn flush_input(&self) -> Result<()> {
        let mut port = self.port.lock();
        port.pending.clear();
        port.ready.clear();
        port.transport.flush_input().map_err(transport_error)
    }

    /// One bounded read followed by frame extraction.
    pub fn poll(&self, timeout_ms: u32) -> Result<Vec<Frame>> {
        let mut guard = self.port.lock();
        let port = &mut *guard;
        if !port.ready.is_empty() {
            return Ok(port.ready.drain(..).collect());
        }

        let mut chunk = [0u8; READ_CHUNK];
        let n = port
            .transport
            .read(&mut chunk, timeout_ms)
            .map_err(transport_error)?
            .min(READ_CHUNK);
        if n > 0 {
            trace!("Read {} bytes: {:02X?}", n, &chunk[..n]);
            port.pending.extend_from_slice(&chunk[..n]);
        }
        if port.pending.is_empty() {
            return Ok(Vec::new());
        }

        let (frames, consumed) = extract_frames_with_limit(&port.pending, self.max_payload);
        port.pending.drain(..consumed);
        Ok(frames)
    }

    /// Put frames back in front of anything not yet handed out.
    pub(crate) fn requeue(&self, frames: impl DoubleEndedIterator<Item = Frame>) {
        let mut port = self.port.lock();
        for frame in frames.rev() {
            port.ready.push_front(frame);
        }
    }

    /// Send `request` and wait for its reply or a generic error notification.
    pub fn exchange(&self, request: &Frame, timeout: Duration) -> Result<Frame> {
        let expected = request.mid;
        self.exchange_matching(request, timeout, move |frame| match classify(frame) {
            FrameKind::Response => frame.mid == expected,
            FrameKind::ErrorNotice => true,
            FrameKind::TagReport | FrameKind::ReadEnd => false,
        })
    }

    /// Send `request` and wait for the first frame accepted by `matcher`.
    pub fn exchange_matching<M>(&self, request: &Frame, timeout: Duration, matcher: M) -> Result<Frame>
    where
        M: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        let bytes = request.encode()?;
        let matcher: Matcher = Arc::new(matcher);
        let deadline = Instant::now() + timeout;
        debug!("Sending {}: {:02X?}", request.mid, request.payload);

        let routed = {
            let mut state = self.state.lock();
            match *state {
                LinkState::Idle => {
                    *state = LinkState::CommandInFlight;
                    None
                }
                LinkState::CommandInFlight => return Err(RfidError::LinkBusy),
                LinkState::InventoryStreaming => {
                    let mut waiter = self.waiter.lock();
                    if waiter.is_some() {
                        return Err(RfidError::LinkBusy);
                    }
                    let (tx, rx) = bounded(1);
                    *waiter = Some(Waiter {
                        matcher: Arc::clone(&matcher),
                        tx,
                    });
                    Some(rx)
                }
            }
        };

        let result = match routed {
            Some(rx) => self.await_routed(&bytes, rx, deadline, &matcher, request.mid, timeout),
            None => {
                let result = self
                    .send(&bytes)
                    .and_then(|_| self.await_direct(deadline, &matcher, request.mid, timeout));
                *self.state.lock() = LinkState::Idle;
                result
            }
        };

        if let Ok(frame) = &result {
            debug!("Received {}: {:02X?}", frame.mid, frame.payload);
        }
        result
    }

    fn await_direct(
        &self,
        deadline: Instant,
        matcher: &Matcher,
        expected: Mid,
        timeout: Duration,
    ) -> Result<Frame> {
        let mut unexpected = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait_ms = (remaining.as_millis() as u32).clamp(1, EXCHANGE_POLL_MS);
            let mut frames = self.poll(wait_ms)?.into_iter();
            while let Some(frame) = frames.next() {
                if matcher(&frame) {
                    self.requeue(frames);
                    return Ok(frame);
                }
                if classify(&frame) == FrameKind::Response {
                    unexpected = Some(frame.mid);
                }
                trace!("Ignoring {} while waiting for {}", frame.mid, expected);
            }
        }

        Err(match unexpected {
            Some(got) => RfidError::Protocol { expected, got },
            None => RfidError::Timeout {
                command: expected,
                timeout,
            },
        })
    }

    fn await_routed(
        &self,
        bytes: &[u8],
        rx: Receiver<Frame>,
        deadline: Instant,
        matcher: &Matcher,
        expected: Mid,
        timeout: Duration,
    ) -> Result<Frame> {
        if let Err(e) = self.send(bytes) {
            self.waiter.lock().take();
            return Err(e);
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.waiter.lock().take();
                return Err(RfidError::Timeout {
                    command: expected,
                    timeout,
                });
            }
            match rx.recv_timeout(remaining.min(ROUTE_CHECK)) {
                Ok(frame) => return Ok(frame),
                Err(RecvTimeoutError::Timeout) if self.is_pumping() => {}
                Err(_) => {
                    // The stream worker is gone, so nobody else is reading.
                    self.waiter.lock().take();
                    if let Ok(frame) = rx.try_recv() {
                        return Ok(frame);
                    }
                    debug!("No stream worker, reading {} reply directly", expected);
                    return self.await_direct(deadline, matcher, expected, timeout);
                }
            }
        }
    }

    /// Hand `frame` to the pending command if it is the awaited reply.
    pub(crate) fn offer(&self, frame: &Frame) -> bool {
        let mut slot = self.waiter.lock();
        let matched = slot.as_ref().is_some_and(|waiter| (waiter.matcher)(frame));
        if matched {
            if let Some(waiter) = slot.take() {
                let _ = waiter.tx.try_send(frame.clone());
            }
        }
        matched
    }

    pub fn begin_streaming(&self) -> Result<StreamHandle> {
        let mut state = self.state.lock();
        match *state {
            LinkState::Idle => {
                let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
                self.stream.store(id, Ordering::Release);
                *state = LinkState::InventoryStreaming;
                Ok(StreamHandle { id })
            }
            LinkState::InventoryStreaming => Err(RfidError::AlreadyStreaming),
            LinkState::CommandInFlight => Err(RfidError::LinkBusy),
        }
    }

    /// Release the stream. The caller joins the worker before calling this.
    pub fn end_streaming(&self, handle: StreamHandle) {
        self.release_stream(handle.id);
    }

    /// Return the link to `Idle` if stream `id` still holds it.
    ///
    /// Also used by a worker whose stream ended on its own. A stale id is a
    /// no-op, so an abandoned worker cannot release its successor's stream.
    pub(crate) fn release_stream(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        if *state != LinkState::InventoryStreaming || self.stream.load(Ordering::Acquire) != id {
            return false;
        }
        self.waiter.lock().take();
        self.stream.store(0, Ordering::Release);
        *state = LinkState::Idle;
        true
    }

    pub(crate) fn set_pumping(&self, id: u64) {
        self.pumping.store(id, Ordering::Release);
    }

    /// Clear the pumping mark, but only if stream `id` set it.
    pub(crate) fn clear_pumping(&self, id: u64) {
        let _ = self
            .pumping
            .compare_exchange(id, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Whether an inventory worker is currently reading the wire.
    pub fn is_pumping(&self) -> bool {
        self.pumping.load(Ordering::Acquire) != 0
    }
}
