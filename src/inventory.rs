//! Continuous inventory on a background worker.
//!
//! The worker is the only reader of the link while a stream is active. It
//! hands command replies to a waiting caller through [`Link::offer`] and
//! everything else to the tag and end callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::{debug, error, info, trace, warn};

use crate::error::{Result, RfidError};
use crate::link::{Link, StreamHandle};
use crate::protocol::{FrameKind, Mid, classify};
use crate::reader::Reader;
use crate::transport::RfidTransport;
use crate::types::{AntennaMask, EndReason, InventoryEvent, TagReport};
use crate::write::normalize_epc_hex;

/// Read mode byte of the read command: keep reading until STOP.
const READ_CONTINUOUS: u8 = 0x01;
/// How long the worker may block handing the end event to a full channel.
const END_EVENT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct StreamControl {
    running: AtomicBool,
    muted: AtomicBool,
}

/// A live (or finished but not yet reaped) inventory worker.
pub(crate) struct InventorySession {
    handle: StreamHandle,
    control: Arc<StreamControl>,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl InventorySession {
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|thread| thread.is_finished())
    }

    /// Clear the run flag and wait up to `wait` for the worker to exit.
    ///
    /// On timeout the worker's callbacks are muted and `StopTimedOut` is
    /// returned; the thread is left to exit on its own.
    pub(crate) fn join(&mut self, wait: Duration) -> Result<()> {
        self.control.running.store(false, Ordering::Release);
        match self.done.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        error!("Inventory worker panicked");
                    }
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.control.muted.store(true, Ordering::Release);
                warn!("Inventory worker did not exit within {:?}, muting it", wait);
                Err(RfidError::StopTimedOut(wait))
            }
        }
    }

    pub(crate) fn into_handle(self) -> StreamHandle {
        self.handle
    }
}

/// Hands the link back however the worker exits. Both calls are keyed by the
/// stream id and do nothing once a newer stream owns the link.
struct PumpGuard<'a, T: RfidTransport> {
    link: &'a Link<T>,
    stream: u64,
}

impl<T: RfidTransport> Drop for PumpGuard<'_, T> {
    fn drop(&mut self) {
        self.link.clear_pumping(self.stream);
        if self.link.release_stream(self.stream) {
            debug!("Inventory worker released the link");
        }
    }
}

fn run_stream<T, F, G>(
    link: Arc<Link<T>>,
    stream: u64,
    control: Arc<StreamControl>,
    poll_ms: u32,
    mut on_tag: F,
    on_end: G,
    done: Sender<()>,
) where
    T: RfidTransport,
    F: FnMut(TagReport),
    G: FnOnce(EndReason),
{
    let reason = {
        let _guard = PumpGuard { link: &link, stream };
        pump(&link, &control, poll_ms, &mut on_tag)
    };
    info!("Inventory ended: {}", reason);
    if !control.muted.load(Ordering::Acquire) {
        on_end(reason);
    }
    let _ = done.send(());
}

fn pump<T, F>(link: &Link<T>, control: &StreamControl, poll_ms: u32, on_tag: &mut F) -> EndReason
where
    T: RfidTransport,
    F: FnMut(TagReport),
{
    let mut seen = 0usize;
    while control.running.load(Ordering::Acquire) {
        let frames = match link.poll(poll_ms) {
            Ok(frames) => frames,
            Err(e) => {
                error!("Inventory read failed: {}", e);
                return EndReason::LinkFailed;
            }
        };

        let mut frames = frames.into_iter();
        while let Some(frame) = frames.next() {
            // Abandoned: whatever is left belongs to nobody.
            if control.muted.load(Ordering::Acquire) {
                return EndReason::Cancelled;
            }
            let kind = classify(&frame);
            // An end-of-read can answer STOP and still ends the stream.
            if link.offer(&frame) && kind != FrameKind::ReadEnd {
                continue;
            }
            let ended = match kind {
                FrameKind::TagReport => {
                    match TagReport::decode(&frame.payload) {
                        Ok(tag) => {
                            seen += 1;
                            trace!("Tag {} on antenna {}", tag.epc, tag.antenna);
                            if !control.muted.load(Ordering::Acquire) {
                                on_tag(tag);
                            }
                        }
                        Err(e) => debug!("Dropping tag report: {}", e),
                    }
                    None
                }
                FrameKind::ReadEnd => Some(
                    frame
                        .payload
                        .first()
                        .map_or(EndReason::Other(0xFF), |&code| EndReason::from_code(code)),
                ),
                FrameKind::Response if frame.mid == Mid::READ_EPC => match frame.payload.first() {
                    Some(&code) if code != 0x00 => {
                        error!("Reader refused inventory (code 0x{:02X})", code);
                        Some(EndReason::Refused(code))
                    }
                    _ => {
                        debug!("Inventory acknowledged");
                        None
                    }
                },
                _ => {
                    trace!("Ignoring {} during inventory", frame.mid);
                    None
                }
            };
            if let Some(reason) = ended {
                debug!("{} tag reports in this stream", seen);
                link.requeue(frames);
                return reason;
            }
        }
    }
    EndReason::Cancelled
}

impl<T: RfidTransport + 'static> Reader<T> {
    /// Start continuous inventory on `antennas` (1-based ids).
    ///
    /// `on_tag` runs on the worker thread for every decoded tag report.
    /// `on_end` runs exactly once when the stream ends, unless the worker had
    /// to be abandoned by [`stop_inventory`](Self::stop_inventory).
    pub fn start_inventory<F, G>(&mut self, antennas: &[u8], on_tag: F, on_end: G) -> Result<()>
    where
        F: FnMut(TagReport) + Send + 'static,
        G: FnOnce(EndReason) + Send + 'static,
    {
        let mask = AntennaMask::from_ids(antennas)?;
        if mask.is_empty() {
            return Err(RfidError::InvalidParameter("No antennas selected for inventory".into()));
        }
        self.ensure_idle()?;
        // The STOP that ended the last stream may have left an end-of-read behind.
        self.link().flush_input()?;

        let mut payload = mask.bits().to_be_bytes().to_vec();
        payload.push(READ_CONTINUOUS);
        let request = self.command_frame(Mid::READ_EPC, payload).encode()?;

        let link = Arc::clone(self.link());
        let handle = link.begin_streaming()?;
        let stream = handle.id();
        link.set_pumping(stream);
        if let Err(e) = link.send(&request) {
            link.clear_pumping(stream);
            link.end_streaming(handle);
            return Err(e);
        }

        let control = Arc::new(StreamControl::default());
        control.running.store(true, Ordering::Release);
        let (done_tx, done_rx) = bounded(1);
        let poll_ms = self.config().poll_interval_ms;

        let spawned = thread::Builder::new().name("nation-inventory".into()).spawn({
            let link = Arc::clone(&link);
            let control = Arc::clone(&control);
            move || run_stream(link, stream, control, poll_ms, on_tag, on_end, done_tx)
        });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                link.clear_pumping(stream);
                link.end_streaming(handle);
                return Err(RfidError::Transport(format!("Failed to spawn inventory worker: {}", e)));
            }
        };

        info!("Inventory started on antennas {:?}", mask.ids());
        self.inventory = Some(InventorySession {
            handle,
            control,
            done: done_rx,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Start inventory and deliver events through a bounded channel.
    ///
    /// Tags are dropped with a warning while the channel is full.
    pub fn start_inventory_channel(&mut self, antennas: &[u8]) -> Result<Receiver<InventoryEvent>> {
        let (tx, rx) = bounded(self.config().event_capacity);
        let end_tx = tx.clone();
        self.start_inventory(
            antennas,
            move |tag| {
                if let Err(TrySendError::Full(_)) = tx.try_send(InventoryEvent::Tag(tag)) {
                    warn!("Inventory event channel full, dropping tag");
                }
            },
            move |reason| {
                if end_tx
                    .send_timeout(InventoryEvent::Ended(reason), END_EVENT_TIMEOUT)
                    .is_err()
                {
                    warn!("Could not deliver inventory end event");
                }
            },
        )?;
        Ok(rx)
    }

    /// Stop the reader's inventory and reap the worker.
    ///
    /// Without a session this still sends STOP, so it can be used to quiet a
    /// reader left streaming by someone else. A stream the reader already
    /// ended is only reaped.
    pub fn stop_inventory(&mut self) -> Result<()> {
        let Some(mut session) = self.inventory.take() else {
            return self.send_stop();
        };
        if session.is_finished() {
            return self.reap(session);
        }
        let stopped = self.send_stop();
        let joined = session.join(self.config().join_timeout());
        self.link().end_streaming(session.into_handle());
        joined?;
        stopped?;
        info!("Inventory stopped");
        Ok(())
    }

    /// Join a worker that has already exited and drop its handle.
    fn reap(&mut self, mut session: InventorySession) -> Result<()> {
        let joined = session.join(self.config().join_timeout());
        self.link().end_streaming(session.into_handle());
        debug!("Reaped finished inventory worker");
        joined
    }

    pub fn is_inventory_running(&self) -> bool {
        self.inventory
            .as_ref()
            .is_some_and(|session| !session.is_finished())
    }

    /// Run inventory for at most `window`, returning the first report of `epc_hex`.
    pub fn scan_for_epc(&mut self, epc_hex: &str, antennas: &[u8], window: Duration) -> Result<Option<TagReport>> {
        let wanted = normalize_epc_hex(epc_hex)?;
        self.scan_until(antennas, window, |tag| tag.epc == wanted)
    }

    pub(crate) fn scan_until<P>(&mut self, antennas: &[u8], window: Duration, wanted: P) -> Result<Option<TagReport>>
    where
        P: Fn(&TagReport) -> bool,
    {
        let events = self.start_inventory_channel(antennas)?;
        let deadline = Instant::now() + window;
        let mut found = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match events.recv_timeout(remaining) {
                Ok(InventoryEvent::Tag(tag)) if wanted(&tag) => {
                    found = Some(tag);
                    break;
                }
                Ok(InventoryEvent::Tag(_)) => {}
                Ok(InventoryEvent::Ended(reason)) => {
                    debug!("Scan ended early: {}", reason);
                    break;
                }
                Err(_) => break,
            }
        }

        self.stop_inventory()?;
        Ok(found)
    }
}
