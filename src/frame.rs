//! Frame codec for the Nation reader protocol.
//!
//! ```text
//! 0x5A | PCW (4, BE) | [address] | length (2, BE) | payload | CRC16 (2, BE)
//! ```
//!
//! The protocol-control-word packs type, version, the RS-485 and
//! notification flags, the 4-bit category and the command id. The CRC
//! covers everything between the header byte and the CRC itself.

use log::trace;

use crate::error::FrameError;
use crate::protocol::Mid;

pub const FRAME_HEADER: u8 = 0x5A;
pub const PROTO_TYPE: u8 = 0x00;
pub const PROTO_VERSION: u8 = 0x01;

const RS485_BIT: u32 = 1 << 13;
const NOTIFY_BIT: u32 = 1 << 12;
const MAX_CATEGORY: u8 = 0x0F;

/// Header, PCW, length and CRC of a frame without station address.
pub const MIN_FRAME_LEN: usize = 1 + 4 + 2 + 2;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub proto_type: u8,
    pub proto_version: u8,
    pub notify: bool,
    pub mid: Mid,
    /// Station address, present only on RS-485 frames
    pub address: Option<u8>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A host command frame with the default protocol type and version.
    pub fn new(mid: Mid, payload: Vec<u8>) -> Self {
        Self {
            proto_type: PROTO_TYPE,
            proto_version: PROTO_VERSION,
            notify: false,
            mid,
            address: None,
            payload,
        }
    }

    pub fn with_address(mut self, address: Option<u8>) -> Self {
        self.address = address;
        self
    }

    pub fn rs485(&self) -> bool {
        self.address.is_some()
    }

    fn pcw(&self) -> u32 {
        let mut pcw = ((self.proto_type as u32) << 24) | ((self.proto_version as u32) << 16);
        if self.rs485() {
            pcw |= RS485_BIT;
        }
        if self.notify {
            pcw |= NOTIFY_BIT;
        }
        pcw | ((self.mid.category as u32) << 8) | self.mid.command as u32
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.mid.category > MAX_CATEGORY {
            return Err(FrameError::InvalidCategory(self.mid.category));
        }
        let len = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))?;

        let mut out = Vec::with_capacity(MIN_FRAME_LEN + 1 + self.payload.len());
        out.push(FRAME_HEADER);
        out.extend_from_slice(&self.pcw().to_be_bytes());
        if let Some(address) = self.address {
            out.push(address);
        }
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc16(&out[1..]);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }
}

/// CRC16 with polynomial 0x1021, initial value 0x0000, MSB first.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Build a frame; an RS-485 frame carries station address 0x00.
pub fn build_frame(
    category: u8,
    command: u8,
    payload: &[u8],
    rs485: bool,
    notify: bool,
) -> Result<Vec<u8>, FrameError> {
    let mut frame = Frame::new(Mid::new(category, command), payload.to_vec());
    frame.notify = notify;
    frame.address = rs485.then_some(0x00);
    frame.encode()
}

/// Parse exactly one frame. `raw` must hold the whole frame and nothing else.
pub fn parse_frame(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort {
            len: raw.len(),
            min: MIN_FRAME_LEN,
        });
    }
    if raw[0] != FRAME_HEADER {
        return Err(FrameError::InvalidHeader(raw[0]));
    }

    let crc_at = raw.len() - 2;
    let received = u16::from_be_bytes([raw[crc_at], raw[crc_at + 1]]);
    let computed = crc16(&raw[1..crc_at]);
    if received != computed {
        return Err(FrameError::CrcMismatch { received, computed });
    }

    let pcw = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
    let mut offset = 5;
    let address = if pcw & RS485_BIT != 0 {
        if raw.len() < MIN_FRAME_LEN + 1 {
            return Err(FrameError::TooShort {
                len: raw.len(),
                min: MIN_FRAME_LEN + 1,
            });
        }
        offset += 1;
        Some(raw[5])
    } else {
        None
    };

    let declared = u16::from_be_bytes([raw[offset], raw[offset + 1]]) as usize;
    offset += 2;
    let actual = crc_at - offset;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    Ok(Frame {
        proto_type: (pcw >> 24) as u8,
        proto_version: (pcw >> 16) as u8,
        notify: pcw & NOTIFY_BIT != 0,
        mid: Mid::new(((pcw >> 8) & 0x0F) as u8, pcw as u8),
        address,
        payload: raw[offset..crc_at].to_vec(),
    })
}

enum Candidate {
    Incomplete,
    Noise,
    Complete(usize),
}

/// Size the frame that would start at `rest[0]` from its own header fields.
fn candidate_len(rest: &[u8], max_payload: usize) -> Candidate {
    if rest.len() < 5 {
        return Candidate::Incomplete;
    }
    let rs485 = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]) & RS485_BIT != 0;
    let header_len = 1 + 4 + usize::from(rs485) + 2;
    if rest.len() < header_len {
        return Candidate::Incomplete;
    }
    let declared = u16::from_be_bytes([rest[header_len - 2], rest[header_len - 1]]) as usize;
    if declared > max_payload {
        return Candidate::Noise;
    }
    let total = header_len + declared + 2;
    if rest.len() < total {
        Candidate::Incomplete
    } else {
        Candidate::Complete(total)
    }
}

/// True if a complete, valid frame starts anywhere in `buf`.
fn valid_frame_ahead(buf: &[u8], max_payload: usize) -> bool {
    (0..buf.len())
        .filter(|&j| buf[j] == FRAME_HEADER)
        .any(|j| match candidate_len(&buf[j..], max_payload) {
            Candidate::Complete(len) => parse_frame(&buf[j..j + len]).is_ok(),
            _ => false,
        })
}

/// Pull every valid frame out of `buf`.
///
/// Returns the frames in order and how many leading bytes were consumed;
/// the caller keeps `buf[consumed..]`, which is empty or starts at a header
/// byte of a frame that has not fully arrived yet.
pub fn extract_frames(buf: &[u8]) -> (Vec<Frame>, usize) {
    extract_frames_with_limit(buf, u16::MAX as usize)
}

/// Like [`extract_frames`], but a header whose declared payload exceeds
/// `max_payload` is treated as noise instead of waiting for the rest.
pub fn extract_frames_with_limit(buf: &[u8], max_payload: usize) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut i = 0;

    while i < buf.len() {
        if buf[i] != FRAME_HEADER {
            i += 1;
            continue;
        }
        match candidate_len(&buf[i..], max_payload) {
            Candidate::Complete(len) => match parse_frame(&buf[i..i + len]) {
                Ok(frame) => {
                    frames.push(frame);
                    i += len;
                }
                Err(e) => {
                    trace!("Resyncing past offset {}: {}", i, e);
                    i += 1;
                }
            },
            Candidate::Noise => i += 1,
            Candidate::Incomplete => {
                // A real partial frame is the tail of the stream, so a
                // complete frame after it means this header was noise.
                if valid_frame_ahead(&buf[i + 1..], max_payload) {
                    i += 1;
                } else {
                    break;
                }
            }
        }
    }

    (frames, i)
}
