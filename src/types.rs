//! Types for reader operations

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, RfidError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Information about a detected RFID tag
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagReport {
    /// EPC as uppercase hex
    pub epc: String,
    pub pc: u16,
    pub antenna: u8,
    /// Raw RSSI byte, when the reader appended one
    pub rssi: Option<u8>,
}

impl PartialEq for TagReport {
    fn eq(&self, other: &Self) -> bool {
        self.epc == other.epc
    }
}

impl TagReport {
    const PID_RSSI: u8 = 0x01;

    /// Decode the payload of a tag-report notification.
    ///
    /// Layout: `epc_len (u16) | epc | pc (u16) | antenna | [0x01 rssi]`
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(RfidError::InvalidResponse("Tag report shorter than EPC length".into()));
        }
        let epc_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        if epc_len == 0 {
            return Err(RfidError::InvalidResponse("Tag report with empty EPC".into()));
        }
        let pc_at = 2 + epc_len;
        let antenna_at = pc_at + 2;
        if data.len() <= antenna_at {
            return Err(RfidError::InvalidResponse(format!(
                "Tag report claims {} EPC bytes but payload only has {} bytes",
                epc_len,
                data.len()
            )));
        }

        let rssi = match data.get(antenna_at + 1..antenna_at + 3) {
            Some(&[Self::PID_RSSI, rssi]) => Some(rssi),
            _ => None,
        };

        Ok(Self {
            epc: hex::encode_upper(&data[2..pc_at]),
            pc: u16::from_be_bytes([data[pc_at], data[pc_at + 1]]),
            antenna: data[antenna_at],
            rssi,
        })
    }

    /// Approximate signal strength in dBm (-100..=-30) from the raw byte.
    pub fn rssi_dbm(&self) -> Option<i16> {
        self.rssi
            .map(|raw| -100 + ((raw as i32 * 70 + 127) / 255) as i16)
    }
}

/// Why an inventory stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EndReason {
    SingleRoundComplete,
    StoppedByCommand,
    HardwareFault,
    /// Undocumented device reason code
    Other(u8),
    /// The reader answered the read command with a non-zero status
    Refused(u8),
    /// The host stopped the worker before the reader reported an end
    Cancelled,
    /// The transport failed under the worker
    LinkFailed,
}

impl EndReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => EndReason::SingleRoundComplete,
            1 => EndReason::StoppedByCommand,
            2 => EndReason::HardwareFault,
            other => EndReason::Other(other),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::SingleRoundComplete => write!(f, "single inventory round complete"),
            EndReason::StoppedByCommand => write!(f, "stopped by STOP command"),
            EndReason::HardwareFault => write!(f, "hardware fault"),
            EndReason::Other(code) => write!(f, "reader reason code {}", code),
            EndReason::Refused(code) => write!(f, "read command refused (code 0x{:02X})", code),
            EndReason::Cancelled => write!(f, "cancelled by host"),
            EndReason::LinkFailed => write!(f, "link failure"),
        }
    }
}

/// Event delivered by [`Reader::start_inventory_channel`](crate::Reader::start_inventory_channel).
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryEvent {
    Tag(TagReport),
    Ended(EndReason),
}

/// Bit `i` set means antenna `i + 1` is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AntennaMask(pub u32);

impl AntennaMask {
    pub const MAX_ANTENNA: u8 = 32;

    fn bit(id: u8) -> Result<u32> {
        if !(1..=Self::MAX_ANTENNA).contains(&id) {
            return Err(RfidError::InvalidParameter(format!(
                "Antenna id {} out of range 1-{}",
                id,
                Self::MAX_ANTENNA
            )));
        }
        Ok(1 << (id - 1))
    }

    pub fn from_ids(ids: &[u8]) -> Result<Self> {
        ids.iter()
            .try_fold(0u32, |mask, &id| -> Result<u32> { Ok(mask | Self::bit(id)?) })
            .map(AntennaMask)
    }

    pub fn enable(self, id: u8) -> Result<Self> {
        Ok(AntennaMask(self.0 | Self::bit(id)?))
    }

    pub fn disable(self, id: u8) -> Result<Self> {
        Ok(AntennaMask(self.0 & !Self::bit(id)?))
    }

    pub fn contains(self, id: u8) -> bool {
        Self::bit(id).is_ok_and(|bit| self.0 & bit != 0)
    }

    pub fn ids(self) -> Vec<u8> {
        (1..=Self::MAX_ANTENNA).filter(|&id| self.contains(id)).collect()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Mask with bit `id - 1` set for every id in `ids` (1-32).
pub fn build_antenna_mask(ids: &[u8]) -> Result<u32> {
    AntennaMask::from_ids(ids).map(AntennaMask::bits)
}

/// Transmit power per antenna port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AntennaPowerMap {
    /// Antenna id (1-64) to power in dBm (0-33)
    pub levels: BTreeMap<u8, u8>,
    /// `Some(true)` keeps the setting across power cycles, `Some(false)`
    /// applies it until reboot, `None` leaves the reader default
    pub persist: Option<bool>,
}

impl AntennaPowerMap {
    pub const MAX_ANTENNA: u8 = 64;
    pub const MAX_POWER_DBM: u8 = 33;
    const PID_PERSIST: u8 = 0xFF;

    pub fn new(levels: impl IntoIterator<Item = (u8, u8)>, persist: Option<bool>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
            persist,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels.is_empty() {
            return Err(RfidError::InvalidParameter("No antenna powers given".into()));
        }
        for (&antenna, &power) in &self.levels {
            if !(1..=Self::MAX_ANTENNA).contains(&antenna) {
                return Err(RfidError::InvalidParameter(format!(
                    "Antenna id {} out of range 1-{}",
                    antenna,
                    Self::MAX_ANTENNA
                )));
            }
            if power > Self::MAX_POWER_DBM {
                return Err(RfidError::InvalidParameter(format!(
                    "Power too high for antenna {}: {} dBm (maximum: {} dBm)",
                    antenna,
                    power,
                    Self::MAX_POWER_DBM
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn payload(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = self
            .levels
            .iter()
            .flat_map(|(&antenna, &power)| [antenna, power])
            .collect();
        if let Some(persist) = self.persist {
            payload.extend_from_slice(&[Self::PID_PERSIST, persist as u8]);
        }
        payload
    }

    /// Decode `(antenna, dBm)` pairs from a power query response.
    pub(crate) fn parse_levels(data: &[u8]) -> BTreeMap<u8, u8> {
        data.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect()
    }
}

/// Air-interface parameters of the inventory engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasebandProfile {
    /// Baseband speed profile: 0-4, or 255 for automatic
    pub speed: u8,
    /// Gen2 Q value (0-15)
    pub q_value: u8,
    /// Gen2 session (0-3)
    pub session: u8,
    /// 0 = flag A, 1 = flag B, 2 = dual target
    pub inventory_flag: u8,
}

impl BasebandProfile {
    const SPEEDS: [u8; 6] = [0, 1, 2, 3, 4, 255];

    pub fn validate(&self) -> Result<()> {
        if !Self::SPEEDS.contains(&self.speed) {
            return Err(RfidError::InvalidParameter(format!(
                "Baseband speed {} not one of {:?}",
                self.speed,
                Self::SPEEDS
            )));
        }
        if self.q_value > 15 {
            return Err(RfidError::InvalidParameter(format!(
                "Q value {} out of range 0-15",
                self.q_value
            )));
        }
        if self.session > 3 {
            return Err(RfidError::InvalidParameter(format!(
                "Session {} out of range 0-3",
                self.session
            )));
        }
        if self.inventory_flag > 2 {
            return Err(RfidError::InvalidParameter(format!(
                "Inventory flag {} out of range 0-2",
                self.inventory_flag
            )));
        }
        Ok(())
    }

    pub(crate) fn payload(&self) -> [u8; 8] {
        [
            0x01,
            self.speed,
            0x02,
            self.q_value,
            0x03,
            self.session,
            0x04,
            self.inventory_flag,
        ]
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        match data {
            [speed, q_value, session, inventory_flag, ..] => Ok(Self {
                speed: *speed,
                q_value: *q_value,
                session: *session,
                inventory_flag: *inventory_flag,
            }),
            _ => Err(RfidError::InvalidResponse(format!(
                "Baseband profile needs 4 bytes, got {:02X?}",
                data
            ))),
        }
    }
}

/// Buzzer behaviour held by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BuzzerMode {
    #[default]
    Quiet,
    Continuous,
    /// Only ring when the application sees a new tag
    OnNewTag,
}

impl BuzzerMode {
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(BuzzerMode::Quiet),
            1 => Ok(BuzzerMode::Continuous),
            2 => Ok(BuzzerMode::OnNewTag),
            other => Err(RfidError::InvalidParameter(format!(
                "Buzzer mode {} not one of 0, 1, 2",
                other
            ))),
        }
    }

    pub fn beeps(self) -> bool {
        self != BuzzerMode::Quiet
    }

    /// `[ring, duration]` for the buzzer command, if the mode needs one now.
    pub(crate) fn ring_command(self) -> Option<[u8; 2]> {
        match self {
            BuzzerMode::Quiet => Some([0, 0]),
            BuzzerMode::Continuous => Some([1, 1]),
            BuzzerMode::OnNewTag => None,
        }
    }
}

/// Tag upload filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TagFilter {
    /// Suppress repeats of the same tag for this long (10 ms resolution)
    pub repeat_time_ms: u32,
    /// Drop tags below this raw RSSI; absent when the reader omits it
    pub rssi_threshold: Option<u8>,
}

impl TagFilter {
    pub const MAX_REPEAT_TIME_MS: u32 = u16::MAX as u32 * 10;

    pub(crate) fn payload(&self) -> Result<Vec<u8>> {
        if self.repeat_time_ms > Self::MAX_REPEAT_TIME_MS {
            return Err(RfidError::InvalidParameter(format!(
                "Repeat time {} ms above maximum {} ms",
                self.repeat_time_ms,
                Self::MAX_REPEAT_TIME_MS
            )));
        }
        let units = (self.repeat_time_ms / 10) as u16;
        let mut payload = vec![0x01];
        payload.extend_from_slice(&units.to_be_bytes());
        payload.extend_from_slice(&[0x02, self.rssi_threshold.unwrap_or(0)]);
        Ok(payload)
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(RfidError::InvalidResponse(format!(
                "Tag filter response too short: {:02X?}",
                data
            )));
        }
        Ok(Self {
            repeat_time_ms: u16::from_be_bytes([data[0], data[1]]) as u32 * 10,
            rssi_threshold: data.get(2).copied(),
        })
    }
}

/// Regulatory band the reader hops in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RfBand {
    Cn920,
    Cn840,
    CnDual,
    Fcc,
    Etsi,
    Jp,
    Tw,
    Id,
    Rus,
    Unknown(u8),
}

impl RfBand {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RfBand::Cn920,
            1 => RfBand::Cn840,
            2 => RfBand::CnDual,
            3 => RfBand::Fcc,
            4 => RfBand::Etsi,
            5 => RfBand::Jp,
            6 => RfBand::Tw,
            7 => RfBand::Id,
            8 => RfBand::Rus,
            other => RfBand::Unknown(other),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RfBand::Cn920 => "CN 920-925 MHz",
            RfBand::Cn840 => "CN 840-845 MHz",
            RfBand::CnDual => "CN dual-band 840-845 + 920-925 MHz",
            RfBand::Fcc => "FCC 902-928 MHz",
            RfBand::Etsi => "ETSI 866-868 MHz",
            RfBand::Jp => "JP 916.8-920.4 MHz",
            RfBand::Tw => "TW 922.25-927.75 MHz",
            RfBand::Id => "ID 923.125-925.125 MHz",
            RfBand::Rus => "RUS 866.6-867.4 MHz",
            RfBand::Unknown(_) => "unknown band",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WorkingFrequency {
    Auto,
    /// Fixed channel list
    Manual(Vec<u8>),
    Unknown(u8),
}

impl WorkingFrequency {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        match data {
            [] => Err(RfidError::InvalidResponse("Empty working frequency response".into())),
            [0x00, ..] => Ok(WorkingFrequency::Auto),
            [0x01, channels @ ..] => Ok(WorkingFrequency::Manual(channels.to_vec())),
            [other, ..] => Ok(WorkingFrequency::Unknown(*other)),
        }
    }
}

/// Identity block returned by the query-info command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReaderInfo {
    pub serial_number: String,
    pub power_on_secs: u32,
    pub baseband_compile_time: String,
    pub app_version: Option<String>,
    pub os_version: Option<String>,
    pub app_compile_time: Option<String>,
}

impl ReaderInfo {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        let serial_number = take_tagged_string(data, &mut offset, "serial number")?;

        let power_on = data
            .get(offset..offset + 4)
            .ok_or_else(|| RfidError::InvalidResponse("Reader info missing power-on time".into()))?;
        let power_on_secs = u32::from_be_bytes([power_on[0], power_on[1], power_on[2], power_on[3]]);
        offset += 4;

        let baseband_compile_time = take_tagged_string(data, &mut offset, "baseband compile time")?;

        let mut info = ReaderInfo {
            serial_number,
            power_on_secs,
            baseband_compile_time,
            ..Default::default()
        };

        while offset + 2 <= data.len() {
            let tag = data[offset];
            let len = data[offset + 1] as usize;
            let end = (offset + 2 + len).min(data.len());
            let value = &data[offset + 2..end];
            offset = end;

            match (tag, value) {
                (0x01, &[a, b, c, d]) => {
                    info.app_version = Some(format!("V{}.{}.{}.{}", a, b, c, d));
                }
                (0x02, _) => info.os_version = Some(ascii(value)),
                (0x03, _) => info.app_compile_time = Some(ascii(value)),
                _ => {}
            }
        }

        Ok(info)
    }
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

/// `tag | len | bytes`, advancing `offset` past it.
fn take_tagged_string(data: &[u8], offset: &mut usize, what: &str) -> Result<String> {
    let len = *data
        .get(*offset + 1)
        .ok_or_else(|| RfidError::InvalidResponse(format!("Reader info missing {}", what)))?
        as usize;
    let start = *offset + 2;
    let value = data.get(start..start + len).ok_or_else(|| {
        RfidError::InvalidResponse(format!("Reader info {} truncated", what))
    })?;
    *offset = start + len;
    Ok(ascii(value))
}

/// Snapshot of everything the reader reports about its configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReaderProfile {
    pub info: ReaderInfo,
    pub baseband: BasebandProfile,
    /// Transmit power per antenna, in dBm
    pub power: BTreeMap<u8, u8>,
    pub rf_band: RfBand,
    pub working_frequency: WorkingFrequency,
    pub tag_filter: TagFilter,
    /// Session-side state, not queried from the device
    pub enabled_antennas: AntennaMask,
    pub buzzer: BuzzerMode,
}
