use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::ReaderConfig;
use crate::error::{Result, RfidError};
use crate::frame::Frame;
use crate::inventory::InventorySession;
use crate::link::{Link, LinkState};
use crate::protocol::{
    BASEBAND_ERRORS, FrameKind, GENERIC_ERRORS, Mid, NO_ERRORS, POWER_ERRORS, StatusTable,
    TAG_FILTER_ERRORS, classify, describe,
};
use crate::transport::RfidTransport;
use crate::types::{
    AntennaMask, AntennaPowerMap, BasebandProfile, BuzzerMode, ReaderInfo, ReaderProfile, RfBand,
    TagFilter, WorkingFrequency,
};

/// Antenna 1 is the only port enabled on a factory-fresh reader.
const DEFAULT_ANTENNAS: AntennaMask = AntennaMask(0x0000_0001);
/// Separator before the persist flag in configure payloads.
const PID_PERSIST: u8 = 0xFF;

/// Session with a Nation-protocol UHF reader.
///
/// All command methods block for at most their configured timeout. While an
/// inventory stream is running, a background worker owns the read side of the
/// link; commands that need the reader idle stop the stream first.
pub struct Reader<T: RfidTransport + 'static> {
    link: Arc<Link<T>>,
    config: ReaderConfig,
    pub(crate) inventory: Option<InventorySession>,
    buzzer: BuzzerMode,
    antennas: AntennaMask,
}

#[cfg(feature = "serial")]
impl Reader<crate::serial::SerialTransport> {
    /// Open a serial port and connect to the reader behind it.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let transport = crate::serial::SerialTransport::open(path, baud_rate)
            .map_err(|e| RfidError::Transport(format!("Failed to open {}: {}", path, e)))?;
        let mut reader = Self::new(transport);
        reader.connect()?;
        Ok(reader)
    }
}

impl<T: RfidTransport + 'static> Reader<T> {
    /// Create a session with the default configuration
    pub fn new(transport: T) -> Self {
        let config = ReaderConfig::default();
        Self {
            link: Arc::new(Link::new(transport, config.max_frame_payload)),
            config,
            inventory: None,
            buzzer: BuzzerMode::default(),
            antennas: DEFAULT_ANTENNAS,
        }
    }

    pub fn with_config(transport: T, config: ReaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link: Arc::new(Link::new(transport, config.max_frame_payload)),
            config,
            inventory: None,
            buzzer: BuzzerMode::default(),
            antennas: DEFAULT_ANTENNAS,
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub(crate) fn link(&self) -> &Arc<Link<T>> {
        &self.link
    }

    /// Bring the reader to a known idle state.
    ///
    /// Drops stale input and stops any inventory a previous session left
    /// running on the device.
    pub fn connect(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.link.flush_input()?;
        self.send_stop()?;
        info!("Reader connected");
        Ok(())
    }

    /// Stop any inventory, flush input and release the transport.
    pub fn close(mut self) -> Result<()> {
        let stopped = if self.inventory.is_some() {
            self.stop_inventory()
        } else {
            Ok(())
        };
        let flushed = self.link.flush_input();
        info!("Reader closed");
        stopped.and(flushed)
    }

    /// Stop a running stream so the link can be used for commands.
    pub(crate) fn ensure_idle(&mut self) -> Result<()> {
        if self.inventory.is_some() {
            debug!("Releasing inventory before command");
            self.stop_inventory()?;
        }
        match self.link.state() {
            LinkState::Idle => Ok(()),
            _ => Err(RfidError::LinkBusy),
        }
    }

    pub(crate) fn command_frame(&self, mid: Mid, payload: Vec<u8>) -> Frame {
        Frame::new(mid, payload).with_address(self.config.rs485_address)
    }

    /// Send one command and return the payload of its response.
    ///
    /// An error notification is turned into `DeviceRejected`.
    pub(crate) fn exec(&mut self, mid: Mid, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.ensure_idle()?;
        let request = self.command_frame(mid, payload.to_vec());
        let reply = self.link.exchange(&request, timeout)?;
        if reply.mid == Mid::ERROR_NOTIFICATION {
            let code = reply.payload.first().copied().unwrap_or(0);
            let reason = describe(GENERIC_ERRORS, code);
            error!("Reader refused {}: {} (code 0x{:02X})", mid, reason, code);
            return Err(RfidError::DeviceRejected { command: mid, code, reason });
        }
        Ok(reply.payload)
    }

    /// Like [`exec`](Self::exec), for commands whose first response byte is
    /// a status code. Returns the bytes after the status.
    pub(crate) fn exec_status(&mut self, mid: Mid, payload: &[u8], table: StatusTable) -> Result<Vec<u8>> {
        let timeout = self.config.command_timeout();
        let mut data = self.exec(mid, payload, timeout)?;
        match data.first().copied() {
            Some(0x00) => {
                data.remove(0);
                Ok(data)
            }
            Some(code) => {
                let reason = describe(table, code);
                error!("{} failed: {} (code 0x{:02X})", mid, reason, code);
                Err(RfidError::DeviceRejected { command: mid, code, reason })
            }
            None => Err(RfidError::InvalidResponse(format!("Empty status reply to {}", mid))),
        }
    }

    /// Send STOP until the reader confirms it or the attempts run out.
    ///
    /// Works both while streaming (the reply is routed through the worker)
    /// and while idle.
    pub(crate) fn send_stop(&mut self) -> Result<()> {
        let request = self.command_frame(Mid::STOP, Vec::new());
        let attempts = self.config.stop_attempts.max(1);
        let timeout = self.config.stop_timeout();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.link.exchange_matching(&request, timeout, is_stop_confirmation) {
                Ok(reply) => return stop_outcome(&reply),
                Err(e) if e.is_retryable() => {
                    warn!("STOP attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.config.stop_pacing());
                    }
                }
                Err(e) => return Err(e),
            }
        }
        error!("Reader did not confirm STOP after {} attempts", attempts);
        Err(last_error.unwrap_or(RfidError::Timeout {
            command: Mid::STOP,
            timeout,
        }))
    }

    /// Query serial number, uptime and firmware versions
    pub fn query_info(&mut self) -> Result<ReaderInfo> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_INFO, &[], timeout)?;
        ReaderInfo::parse(&data)
    }

    pub fn configure_baseband(&mut self, profile: &BasebandProfile) -> Result<()> {
        profile.validate()?;
        self.exec_status(Mid::CONFIGURE_BASEBAND, &profile.payload(), BASEBAND_ERRORS)?;
        info!("Baseband configured: {:?}", profile);
        Ok(())
    }

    pub fn query_baseband(&mut self) -> Result<BasebandProfile> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_BASEBAND, &[], timeout)?;
        BasebandProfile::parse(&data)
    }

    /// Set the transmit power of one or more antennas.
    pub fn configure_power(&mut self, levels: &AntennaPowerMap) -> Result<()> {
        levels.validate()?;
        self.exec_status(Mid::CONFIGURE_POWER, &levels.payload(), POWER_ERRORS)?;
        info!("Antenna power set: {:?}", levels.levels);
        Ok(())
    }

    pub fn set_antenna_power(&mut self, antenna: u8, dbm: u8, persist: Option<bool>) -> Result<()> {
        self.configure_power(&AntennaPowerMap::new([(antenna, dbm)], persist))
    }

    /// Transmit power per antenna, in dBm
    pub fn query_power(&mut self) -> Result<BTreeMap<u8, u8>> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_POWER, &[], timeout)?;
        Ok(AntennaPowerMap::parse_levels(&data))
    }

    pub fn enable_antenna(&mut self, id: u8, persist: bool) -> Result<()> {
        let mask = self.antennas.enable(id)?;
        self.configure_antennas(mask, persist)
    }

    pub fn disable_antenna(&mut self, id: u8, persist: bool) -> Result<()> {
        let mask = self.antennas.disable(id)?;
        self.configure_antennas(mask, persist)
    }

    fn configure_antennas(&mut self, mask: AntennaMask, persist: bool) -> Result<()> {
        let mut payload = mask.bits().to_be_bytes().to_vec();
        payload.extend_from_slice(&[PID_PERSIST, persist as u8]);
        self.exec_status(Mid::CONFIGURE_ANTENNAS, &payload, NO_ERRORS)?;
        self.antennas = mask;
        info!("Enabled antennas: {:?}", mask.ids());
        Ok(())
    }

    /// Antennas this session has enabled
    pub fn enabled_antennas(&self) -> AntennaMask {
        self.antennas
    }

    pub fn set_buzzer(&mut self, mode: BuzzerMode) -> Result<()> {
        if let Some(command) = mode.ring_command() {
            self.exec_status(Mid::BUZZER_CONTROL, &command, NO_ERRORS)?;
        }
        self.buzzer = mode;
        debug!("Buzzer mode: {:?}", mode);
        Ok(())
    }

    pub fn buzzer(&self) -> BuzzerMode {
        self.buzzer
    }

    pub fn configure_tag_filter(&mut self, filter: &TagFilter) -> Result<()> {
        let payload = filter.payload()?;
        self.exec_status(Mid::CONFIGURE_TAG_FILTER, &payload, TAG_FILTER_ERRORS)?;
        info!("Tag filter configured: {:?}", filter);
        Ok(())
    }

    pub fn query_tag_filter(&mut self) -> Result<TagFilter> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_TAG_FILTER, &[], timeout)?;
        TagFilter::parse(&data)
    }

    pub fn query_rf_band(&mut self) -> Result<RfBand> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_RF_BAND, &[], timeout)?;
        data.first()
            .map(|&code| RfBand::from_code(code))
            .ok_or_else(|| RfidError::InvalidResponse("Empty RF band response".into()))
    }

    pub fn query_working_frequency(&mut self) -> Result<WorkingFrequency> {
        let timeout = self.config.command_timeout();
        let data = self.exec(Mid::QUERY_WORKING_FREQUENCY, &[], timeout)?;
        WorkingFrequency::parse(&data)
    }

    /// Run every configuration query and collect the answers.
    ///
    /// Fails on the first query that fails.
    pub fn profile(&mut self) -> Result<ReaderProfile> {
        let profile = ReaderProfile {
            info: self.query_info()?,
            baseband: self.query_baseband()?,
            power: self.query_power()?,
            rf_band: self.query_rf_band()?,
            working_frequency: self.query_working_frequency()?,
            tag_filter: self.query_tag_filter()?,
            enabled_antennas: self.antennas,
            buzzer: self.buzzer,
        };
        debug!("Reader profile: {:?}", profile);
        Ok(profile)
    }
}

/// Replies that end a STOP exchange.
fn is_stop_confirmation(frame: &Frame) -> bool {
    match classify(frame) {
        FrameKind::Response => frame.mid == Mid::STOP,
        FrameKind::ReadEnd => frame.payload.first() == Some(&1),
        FrameKind::ErrorNotice => true,
        FrameKind::TagReport => false,
    }
}

fn stop_outcome(reply: &Frame) -> Result<()> {
    let code = reply.payload.first().copied();
    match (classify(reply), code) {
        (FrameKind::ReadEnd, _) | (FrameKind::Response, Some(0x00)) => {
            debug!("STOP confirmed by {}", reply.mid);
            Ok(())
        }
        (FrameKind::ErrorNotice, code) => {
            let code = code.unwrap_or(0);
            Err(RfidError::DeviceRejected {
                command: Mid::STOP,
                code,
                reason: describe(GENERIC_ERRORS, code),
            })
        }
        (_, Some(code)) => Err(RfidError::DeviceRejected {
            command: Mid::STOP,
            code,
            reason: describe(NO_ERRORS, code),
        }),
        (_, None) => Err(RfidError::InvalidResponse("Empty STOP acknowledgement".into())),
    }
}

impl<T: RfidTransport + 'static> Drop for Reader<T> {
    fn drop(&mut self) {
        let Some(mut session) = self.inventory.take() else {
            return;
        };
        if let Err(e) = session.join(self.config.join_timeout()) {
            warn!("Dropping reader with a live inventory worker: {}", e);
        }
        self.link.end_streaming(session.into_handle());
    }
}
