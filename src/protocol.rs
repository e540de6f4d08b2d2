//! Command identifiers, frame classification and status tables.

use std::fmt;

use crate::frame::Frame;

/// Command identifier: a `(category, command)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mid {
    pub category: u8,
    pub command: u8,
}

impl Mid {
    // Category 0x00: reader notifications
    pub const ERROR_NOTIFICATION: Mid = Mid::new(0x00, 0x00);

    // Category 0x01: reader management
    pub const QUERY_INFO: Mid = Mid::new(0x01, 0x00);
    pub const BUZZER_CONTROL: Mid = Mid::new(0x01, 0x1F);

    // Category 0x02: RFID configuration and operation
    pub const TAG_REPORT: Mid = Mid::new(0x02, 0x00);
    pub const CONFIGURE_POWER: Mid = Mid::new(0x02, 0x01);
    pub const QUERY_POWER: Mid = Mid::new(0x02, 0x02);
    pub const CONFIGURE_ANTENNAS: Mid = Mid::new(0x02, 0x03);
    pub const QUERY_RF_BAND: Mid = Mid::new(0x02, 0x04);
    pub const QUERY_WORKING_FREQUENCY: Mid = Mid::new(0x02, 0x06);
    pub const CONFIGURE_TAG_FILTER: Mid = Mid::new(0x02, 0x09);
    pub const QUERY_TAG_FILTER: Mid = Mid::new(0x02, 0x0A);
    pub const CONFIGURE_BASEBAND: Mid = Mid::new(0x02, 0x0B);
    pub const QUERY_BASEBAND: Mid = Mid::new(0x02, 0x0C);
    pub const READ_EPC: Mid = Mid::new(0x02, 0x10);
    pub const WRITE_EPC: Mid = Mid::new(0x02, 0x11);
    pub const STOP: Mid = Mid::new(0x02, 0xFF);

    pub const fn new(category: u8, command: u8) -> Self {
        Self { category, command }
    }

    pub const fn from_u16(value: u16) -> Self {
        Self::new((value >> 8) as u8, (value & 0xFF) as u8)
    }

    pub const fn to_u16(self) -> u16 {
        ((self.category as u16) << 8) | self.command as u16
    }
}

impl fmt::Display for Mid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.to_u16())
    }
}

/// Command ids of the end-of-read notification in the RFID category.
pub const READ_END_COMMANDS: [u8; 3] = [0x01, 0x21, 0x31];

/// What a decoded frame means to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Reply to a host command
    Response,
    /// Generic error notification
    ErrorNotice,
    /// Tag uploaded during inventory
    TagReport,
    /// Inventory finished; payload byte 0 is the reason
    ReadEnd,
}

pub fn classify(frame: &Frame) -> FrameKind {
    if frame.mid == Mid::ERROR_NOTIFICATION {
        return FrameKind::ErrorNotice;
    }
    if frame.notify && frame.mid.category == Mid::TAG_REPORT.category {
        if frame.mid.command == Mid::TAG_REPORT.command {
            return FrameKind::TagReport;
        }
        if READ_END_COMMANDS.contains(&frame.mid.command) {
            return FrameKind::ReadEnd;
        }
    }
    FrameKind::Response
}

/// Status code to reason text, per command.
pub type StatusTable = &'static [(u8, &'static str)];

pub const GENERIC_ERRORS: StatusTable = &[
    (0x01, "unsupported instruction"),
    (0x02, "CRC or mode error"),
    (0x03, "parameter error"),
    (0x04, "busy"),
    (0x05, "invalid state"),
];

pub const POWER_ERRORS: StatusTable = &[
    (0x01, "reader hardware does not support the antenna port"),
    (0x02, "reader does not support the power level"),
    (0x03, "save failed"),
];

pub const BASEBAND_ERRORS: StatusTable = &[
    (0x01, "unsupported baseband speed"),
    (0x02, "Q parameter error"),
    (0x03, "session parameter error"),
    (0x04, "inventory flag error"),
    (0x05, "other parameter error"),
    (0x06, "save failed"),
];

pub const TAG_FILTER_ERRORS: StatusTable = &[(0x01, "parameter error"), (0x02, "save failed")];

/// Commands whose failure codes are not documented.
pub const NO_ERRORS: StatusTable = &[];

pub fn describe(table: StatusTable, code: u8) -> &'static str {
    table
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, reason)| *reason)
        .unwrap_or("unknown error")
}
