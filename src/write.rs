//! EPC write workflow: request building, result codes and verification.

use std::fmt;
use std::time::Duration;

use log::{error, info, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, RfidError};
use crate::protocol::Mid;
use crate::reader::Reader;
use crate::transport::RfidTransport;
use crate::types::AntennaMask;

/// Memory bank selector for the EPC area.
const AREA_EPC: u8 = 0x01;
const PID_MATCH: u8 = 0x01;
const PID_PASSWORD: u8 = 0x02;
/// Match filters compare against the EPC proper, after CRC and PC.
const MATCH_START_WORD: u16 = 2;
const MAX_EPC_WORDS: usize = 31;
const MAX_MATCH_BYTES: usize = 31;

/// Outcome code of a tag write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WriteResult {
    Success,
    AntennaError,
    MatchError,
    ParameterError,
    CrcError,
    LowPower,
    Overflow,
    Locked,
    PasswordError,
    TagError,
    TagLost,
    SendError,
    Unknown(u8),
}

impl WriteResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => WriteResult::Success,
            0x01 => WriteResult::AntennaError,
            0x02 => WriteResult::MatchError,
            0x03 => WriteResult::ParameterError,
            0x04 => WriteResult::CrcError,
            0x05 => WriteResult::LowPower,
            0x06 => WriteResult::Overflow,
            0x07 => WriteResult::Locked,
            0x08 => WriteResult::PasswordError,
            0x09 => WriteResult::TagError,
            0x0A => WriteResult::TagLost,
            0x0B => WriteResult::SendError,
            other => WriteResult::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            WriteResult::Success => 0x00,
            WriteResult::AntennaError => 0x01,
            WriteResult::MatchError => 0x02,
            WriteResult::ParameterError => 0x03,
            WriteResult::CrcError => 0x04,
            WriteResult::LowPower => 0x05,
            WriteResult::Overflow => 0x06,
            WriteResult::Locked => 0x07,
            WriteResult::PasswordError => 0x08,
            WriteResult::TagError => 0x09,
            WriteResult::TagLost => 0x0A,
            WriteResult::SendError => 0x0B,
            WriteResult::Unknown(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            WriteResult::Success => "write successful",
            WriteResult::AntennaError => "antenna error",
            WriteResult::MatchError => "match error",
            WriteResult::ParameterError => "write parameter error",
            WriteResult::CrcError => "CRC error",
            WriteResult::LowPower => "low power",
            WriteResult::Overflow => "data area overflow",
            WriteResult::Locked => "data area locked",
            WriteResult::PasswordError => "access password error",
            WriteResult::TagError => "other tag error",
            WriteResult::TagLost => "tag lost",
            WriteResult::SendError => "reader send error",
            WriteResult::Unknown(_) => "unknown result",
        }
    }

    pub fn is_success(self) -> bool {
        self == WriteResult::Success
    }
}

impl fmt::Display for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code 0x{:02X})", self.description(), self.code())
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WriteReport {
    pub start_word: u16,
    pub word_count: u16,
    /// `None` when no verification inventory was run
    pub verified: Option<bool>,
}

/// Strip whitespace and check that `epc_hex` is hex with an even length.
///
/// Returns the bytes padded with `0x00` to a whole 16-bit word.
pub fn validate_epc_hex(epc_hex: &str) -> Result<Vec<u8>> {
    let clean = clean_hex(epc_hex)?;
    if clean.len() % 2 != 0 {
        return Err(RfidError::InvalidParameter(format!(
            "EPC hex '{}' has an odd number of digits",
            clean
        )));
    }
    let mut bytes = decode_hex(&clean)?;
    if bytes.len() % 2 != 0 {
        bytes.push(0x00);
    }
    Ok(bytes)
}

/// Word address the EPC data starts at: 1 when the PC word is rewritten,
/// otherwise 2, shifted by any locked prefix words.
pub fn calculate_start_word(overwrite_pc: bool, prefix_words: u16) -> u16 {
    let base = if overwrite_pc { 1 } else { 2 };
    base + prefix_words
}

/// Uppercase hex with whitespace removed, for comparing against reported EPCs.
pub(crate) fn normalize_epc_hex(epc_hex: &str) -> Result<String> {
    clean_hex(epc_hex)
}

fn clean_hex(epc_hex: &str) -> Result<String> {
    let clean: String = epc_hex
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    if clean.is_empty() {
        return Err(RfidError::InvalidParameter("EPC hex is empty".into()));
    }
    if let Some(bad) = clean.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(RfidError::InvalidParameter(format!(
            "EPC hex contains non-hex character '{}'",
            bad
        )));
    }
    Ok(clean)
}

fn decode_hex(clean: &str) -> Result<Vec<u8>> {
    hex::decode(clean).map_err(|e| RfidError::InvalidParameter(format!("Invalid EPC hex: {}", e)))
}

/// Parameters of an EPC write.
///
/// Build one with [`explicit`](Self::explicit) or [`automatic`](Self::automatic)
/// and refine it with the builder methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpcWriteRequest {
    epc_hex: String,
    content: Vec<u8>,
    start_word: u16,
    word_len: u16,
    pc_bits: Option<u16>,
    antenna: u8,
    match_epc: Option<Vec<u8>>,
    access_password: Option<u32>,
}

impl EpcWriteRequest {
    /// Write `epc_hex` as-is at `start_word`.
    pub fn explicit(epc_hex: &str, start_word: u16) -> Result<Self> {
        let epc = validate_epc_hex(epc_hex)?;
        Ok(Self {
            epc_hex: hex::encode_upper(&epc),
            word_len: (epc.len() / 2) as u16,
            content: epc,
            start_word,
            pc_bits: None,
            antenna: 1,
            match_epc: None,
            access_password: None,
        })
    }

    /// Write `epc_hex` padded on the right to whole words, deriving the PC
    /// length bits. With `overwrite_pc` the PC word is written too.
    pub fn automatic(epc_hex: &str, overwrite_pc: bool) -> Result<Self> {
        let clean = clean_hex(epc_hex)?;
        let word_len = clean.len().div_ceil(4);
        if word_len > MAX_EPC_WORDS {
            return Err(RfidError::InvalidParameter(format!(
                "EPC of {} words exceeds the {} word PC length field",
                word_len, MAX_EPC_WORDS
            )));
        }
        let padded = format!("{:0<width$}", clean, width = word_len * 4);
        let epc = decode_hex(&padded)?;
        let pc = (word_len as u16) << 11;

        let mut content = Vec::with_capacity(epc.len() + 2);
        if overwrite_pc {
            content.extend_from_slice(&pc.to_be_bytes());
        }
        content.extend_from_slice(&epc);

        Ok(Self {
            epc_hex: padded,
            content,
            start_word: calculate_start_word(overwrite_pc, 0),
            word_len: word_len as u16,
            pc_bits: Some(pc),
            antenna: 1,
            match_epc: None,
            access_password: None,
        })
    }

    pub fn antenna(mut self, id: u8) -> Result<Self> {
        AntennaMask::from_ids(&[id])?;
        self.antenna = id;
        Ok(self)
    }

    /// Only write a tag whose EPC starts with `epc_hex`.
    pub fn match_epc(mut self, epc_hex: &str) -> Result<Self> {
        let bytes = validate_epc_hex(epc_hex)?;
        if bytes.len() > MAX_MATCH_BYTES {
            return Err(RfidError::InvalidParameter(format!(
                "Match EPC of {} bytes exceeds {} bytes",
                bytes.len(),
                MAX_MATCH_BYTES
            )));
        }
        self.match_epc = Some(bytes);
        Ok(self)
    }

    pub fn access_password(mut self, password: u32) -> Self {
        self.access_password = Some(password);
        self
    }

    /// Skip `words` leading words, e.g. a locked prefix.
    pub fn prefix_words(mut self, words: u16) -> Self {
        self.start_word = self.start_word.saturating_add(words);
        self
    }

    pub fn epc_hex(&self) -> &str {
        &self.epc_hex
    }

    pub fn start_word(&self) -> u16 {
        self.start_word
    }

    /// EPC length in words
    pub fn word_len(&self) -> u16 {
        self.word_len
    }

    /// PC word derived in automatic mode
    pub fn pc_bits(&self) -> Option<u16> {
        self.pc_bits
    }

    pub fn antenna_id(&self) -> u8 {
        self.antenna
    }

    /// Request payload of the write command.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(16 + self.content.len());
        payload.extend_from_slice(&(1u32 << (self.antenna - 1)).to_be_bytes());
        payload.push(AREA_EPC);
        payload.extend_from_slice(&self.start_word.to_be_bytes());
        payload.extend_from_slice(&(self.content.len() as u16).to_be_bytes());
        payload.extend_from_slice(&self.content);

        if let Some(target) = &self.match_epc {
            let mut body = vec![AREA_EPC];
            body.extend_from_slice(&MATCH_START_WORD.to_be_bytes());
            body.push((target.len() * 8) as u8);
            body.extend_from_slice(target);

            payload.push(PID_MATCH);
            payload.extend_from_slice(&(body.len() as u16).to_be_bytes());
            payload.extend_from_slice(&body);
        }

        if let Some(password) = self.access_password {
            payload.extend_from_slice(&[PID_PASSWORD, 0x00, 0x04]);
            payload.extend_from_slice(&password.to_be_bytes());
        }
        payload
    }

    /// Whether a reported EPC carries the written data at the written offset.
    pub(crate) fn written_into(&self, reported_epc: &str) -> bool {
        let offset = self.start_word.saturating_sub(2) as usize * 4;
        reported_epc
            .get(offset..offset + self.epc_hex.len())
            .is_some_and(|window| window.eq_ignore_ascii_case(&self.epc_hex))
    }
}

/// Split a write response into its result code and failed word address.
pub fn parse_write_response(data: &[u8]) -> Result<(WriteResult, Option<u16>)> {
    let code = *data
        .first()
        .ok_or_else(|| RfidError::InvalidResponse("Empty write response".into()))?;
    let failed_word = match data {
        [_, 0x01, 0x02, hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    };
    Ok((WriteResult::from_code(code), failed_word))
}

impl<T: RfidTransport + 'static> Reader<T> {
    /// Write an EPC to a tag in the field.
    ///
    /// Stops any running inventory and flushes input first.
    pub fn write_epc(&mut self, request: &EpcWriteRequest) -> Result<WriteReport> {
        self.ensure_idle()?;
        self.link().flush_input()?;

        let timeout = self.config().write_timeout();
        let data = self.exec(Mid::WRITE_EPC, &request.payload(), timeout)?;
        let (result, failed_word) = parse_write_response(&data)?;
        if !result.is_success() {
            match failed_word {
                Some(word) => error!("Writing EPC {} failed at word {}: {}", request.epc_hex, word, result),
                None => error!("Writing EPC {} failed: {}", request.epc_hex, result),
            }
            return Err(RfidError::WriteRejected { result, failed_word });
        }

        info!(
            "Wrote EPC {} at word {} on antenna {}",
            request.epc_hex, request.start_word, request.antenna
        );
        Ok(WriteReport {
            start_word: request.start_word,
            word_count: (request.content.len() / 2) as u16,
            verified: None,
        })
    }

    /// Write, then run a short inventory to check the new EPC is reported.
    pub fn write_epc_verified(&mut self, request: &EpcWriteRequest, window: Duration) -> Result<WriteReport> {
        let mut report = self.write_epc(request)?;
        let seen = self.scan_until(&[request.antenna], window, |tag| request.written_into(&tag.epc))?;
        if seen.is_none() {
            warn!("EPC {} not observed after write", request.epc_hex);
        }
        report.verified = Some(seen.is_some());
        Ok(report)
    }

    /// Find `target_epc`, write it with a match filter on that EPC, then verify.
    pub fn write_epc_to_target(
        &mut self,
        target_epc: &str,
        request: EpcWriteRequest,
        window: Duration,
    ) -> Result<WriteReport> {
        let target = normalize_epc_hex(target_epc)?;
        let antenna = request.antenna;
        if self.scan_for_epc(&target, &[antenna], window)?.is_none() {
            return Err(RfidError::TagNotFound(target));
        }
        let request = request.match_epc(&target)?;
        self.write_epc_verified(&request, window)
    }
}
