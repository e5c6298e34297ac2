//! decoder.rs
//! Turns an inbound payload into a finite number.
//!
//! Peers publish the same quantity in three encodings, tried in order:
//! 1. ASCII text, if every byte of the first 64 looks numeric (`0-9 . + - e E` or space)
//! 2. raw little-endian f64 (first 8 bytes), narrowed to f32
//! 3. raw little-endian f32 (first 4 bytes)
//! Anything shorter, or anything that decodes to NaN/inf, is rejected.

use crate::error::DecodeError;

/// Only this prefix is inspected when deciding text vs binary.
pub const TEXT_SCAN_LIMIT: usize = 64;

/// Logical input a topic is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputTag {
    ProportionalGain,
    IntegralTime,
    Setpoint,
    ProcessVariable,
}

impl InputTag {
    pub fn name(&self) -> &'static str {
        match self {
            InputTag::ProportionalGain => "kp",
            InputTag::IntegralTime => "ti",
            InputTag::Setpoint => "setpoint",
            InputTag::ProcessVariable => "process_variable",
        }
    }
}

/// Which of the three encodings matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    WideBinary,
    NarrowBinary,
}

#[inline]
fn is_numeric_text_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'.' | b'+' | b'-' | b'e' | b'E' | b' ')
}

pub fn classify(payload: &[u8]) -> Option<Encoding> {
    let scan = &payload[..payload.len().min(TEXT_SCAN_LIMIT)];
    if scan.iter().copied().all(is_numeric_text_byte) {
        Some(Encoding::Text)
    } else if payload.len() >= 8 {
        Some(Encoding::WideBinary)
    } else if payload.len() >= 4 {
        Some(Encoding::NarrowBinary)
    } else {
        None
    }
}

fn parse_text(payload: &[u8]) -> f32 {
    std::str::from_utf8(payload)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map_or(f32::NAN, |v| v as f32)
}

/// Decode a payload into a finite value, or say why not.
pub fn decode(payload: &[u8]) -> Result<(f32, Encoding), DecodeError> {
    let encoding = classify(payload).ok_or(DecodeError::TooShort(payload.len()))?;

    let value = match encoding {
        Encoding::Text => parse_text(payload),
        Encoding::WideBinary => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&payload[..8]);
            f64::from_le_bytes(raw) as f32
        }
        Encoding::NarrowBinary => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&payload[..4]);
            f32::from_le_bytes(raw)
        }
    };

    if value.is_finite() {
        Ok((value, encoding))
    } else {
        Err(DecodeError::NonFinite(value))
    }
}
