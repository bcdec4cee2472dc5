//! Low-level writers shared by the template engine and the hand-written codecs.
//!
//! Offsets that fall outside the frame are skipped rather than rejected: a
//! template written for a longer frame still encodes the fields that fit.

use crate::{ProtocolError, Result};
use std::collections::BTreeMap;

pub(crate) fn clamp_life_signal(life_signal: i64) -> u16 {
    life_signal.clamp(0, i64::from(u16::MAX)) as u16
}

/// Write a big-endian u16; returns false when it does not fit.
pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) -> bool {
    let end = match offset.checked_add(2) {
        Some(end) => end,
        None => return false,
    };
    match buf.get_mut(offset..end) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_be_bytes());
            true
        }
        None => {
            tracing::trace!(offset, len = buf.len(), "u16 field outside frame, skipped");
            false
        }
    }
}

/// `round(value * factor)` as a u16, or an error when it cannot be represented.
pub(crate) fn scale_to_u16(field: &str, value: f64, factor: f64) -> Result<u16> {
    let raw = (value * factor).round();
    if raw.is_finite() && (0.0..=f64::from(u16::MAX)).contains(&raw) {
        Ok(raw as u16)
    } else {
        Err(ProtocolError::EncodeRange {
            field: field.to_string(),
            value,
            raw,
        })
    }
}

pub(crate) fn or_bits(buf: &mut [u8], bits: &BTreeMap<(usize, u8), bool>) {
    for (&(byte, bit), &on) in bits {
        if !on {
            continue;
        }
        match buf.get_mut(byte) {
            Some(b) if bit < 8 => *b |= 1 << bit,
            _ => tracing::trace!(byte, bit, "command bit outside frame, skipped"),
        }
    }
}

pub(crate) fn put_scaled_map(
    buf: &mut [u8],
    name: &str,
    values: &BTreeMap<usize, f64>,
    factor: f64,
) -> Result<()> {
    for (&offset, &value) in values {
        if !fits_u16(buf, offset) {
            tracing::trace!(field = name, offset, "analog value outside frame, skipped");
            continue;
        }
        let raw = scale_to_u16(&format!("{name}[{offset}]"), value, factor)?;
        put_u16(buf, offset, raw);
    }
    Ok(())
}

pub(crate) fn pack_flags(buf: &mut [u8], offset: usize, flags: &BTreeMap<u8, bool>) {
    let Some(byte) = buf.get_mut(offset) else {
        tracing::trace!(offset, "packed byte outside frame, skipped");
        return;
    };
    for (&bit, &on) in flags {
        if on && bit < 8 {
            *byte |= 1 << bit;
        }
    }
}

pub(crate) fn put_scaled_scalar(
    buf: &mut [u8],
    name: &str,
    offset: usize,
    value: f64,
    factor: f64,
) -> Result<()> {
    if !fits_u16(buf, offset) {
        tracing::trace!(field = name, offset, "scalar outside frame, skipped");
        return Ok(());
    }
    let raw = scale_to_u16(name, value, factor)?;
    put_u16(buf, offset, raw);
    Ok(())
}

fn fits_u16(buf: &[u8], offset: usize) -> bool {
    offset.checked_add(2).is_some_and(|end| end <= buf.len())
}
