//! Scripted transport shared by the unit and scenario tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ReaderConfig;
use crate::frame::{Frame, parse_frame};
use crate::protocol::Mid;
use crate::transport::RfidTransport;

/// Called for every frame the host writes; returns raw bytes to queue.
pub(crate) type Responder = Box<dyn FnMut(&Frame) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    inbox: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    flushes: usize,
}

pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockTransport`] that has been moved into a reader.
#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockHandle { state },
        )
    }

    pub(crate) fn with_responder<F>(responder: F) -> (Self, MockHandle)
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        let (transport, handle) = Self::new();
        handle.respond_with(responder);
        (transport, handle)
    }
}

impl MockHandle {
    pub(crate) fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Make bytes available to the next read, as if the reader sent them.
    pub(crate) fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbox.extend(bytes.iter().copied());
    }

    /// Every frame the host has written, in order.
    pub(crate) fn written(&self) -> Vec<Frame> {
        self.state
            .lock()
            .written
            .iter()
            .filter_map(|raw| parse_frame(raw).ok())
            .collect()
    }

    pub(crate) fn count(&self, mid: Mid) -> usize {
        self.written().iter().filter(|frame| frame.mid == mid).count()
    }

    pub(crate) fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

impl RfidTransport for MockTransport {
    type Error = std::io::Error;

    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.lock();
        state.written.push(data.to_vec());
        if let Ok(frame) = parse_frame(data) {
            let replies = state
                .responder
                .as_mut()
                .map(|respond| respond(&frame))
                .unwrap_or_default();
            for reply in replies {
                state.inbox.extend(reply);
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, Self::Error> {
        {
            let mut state = self.state.lock();
            if !state.inbox.is_empty() {
                let n = state.inbox.len().min(buf.len());
                for slot in buf[..n].iter_mut() {
                    *slot = state.inbox.pop_front().unwrap_or_default();
                }
                return Ok(n);
            }
        }
        std::thread::sleep(Duration::from_millis(timeout_ms.min(2) as u64));
        Ok(0)
    }

    fn flush_input(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        state.inbox.clear();
        state.flushes += 1;
        Ok(())
    }
}

pub(crate) fn response(mid: Mid, payload: &[u8]) -> Vec<u8> {
    Frame::new(mid, payload.to_vec()).encode().unwrap()
}

pub(crate) fn notification(mid: Mid, payload: &[u8]) -> Vec<u8> {
    let mut frame = Frame::new(mid, payload.to_vec());
    frame.notify = true;
    frame.encode().unwrap()
}

pub(crate) fn tag_frame(epc: &[u8], antenna: u8, rssi: Option<u8>) -> Vec<u8> {
    let mut payload = (epc.len() as u16).to_be_bytes().to_vec();
    payload.extend_from_slice(epc);
    payload.extend_from_slice(&[0x30, 0x00, antenna]);
    if let Some(rssi) = rssi {
        payload.extend_from_slice(&[0x01, rssi]);
    }
    notification(Mid::TAG_REPORT, &payload)
}

pub(crate) fn read_end(reason: u8) -> Vec<u8> {
    notification(Mid::new(0x02, 0x01), &[reason])
}

/// Short budgets so failing paths finish quickly.
pub(crate) fn fast_config() -> ReaderConfig {
    ReaderConfig {
        command_timeout_ms: 200,
        write_timeout_ms: 200,
        stop_attempts: 3,
        stop_timeout_ms: 60,
        stop_pacing_ms: 10,
        join_timeout_ms: 1000,
        poll_interval_ms: 5,
        ..ReaderConfig::default()
    }
}
