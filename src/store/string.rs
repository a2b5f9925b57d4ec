//! String values.
//!
//! A string remembers whether its payload is a canonical decimal i64 so the
//! counter commands can increment without reparsing. All other operations see
//! the rendered byte form.

use bytes::Bytes;

use crate::store::ValueError;

/// Longest value a string may hold, 512 MiB.
pub const MAX_STRING_LENGTH: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum StringValue {
    Int(i64),
    Raw(Bytes),
}

impl StringValue {
    /// Wraps raw bytes, keeping the integer fast path when the payload is a
    /// canonical base-10 i64 (no sign prefix `+`, no leading zeros).
    pub fn from_bytes(data: Bytes) -> Self {
        if let Ok(text) = std::str::from_utf8(&data) {
            if let Ok(value) = text.parse::<i64>() {
                if value.to_string() == text {
                    return StringValue::Int(value);
                }
            }
        }
        StringValue::Raw(data)
    }

    pub fn from_int(value: i64) -> Self {
        StringValue::Int(value)
    }

    pub fn as_bytes(&self) -> Bytes {
        match self {
            StringValue::Int(value) => Bytes::from(value.to_string()),
            StringValue::Raw(data) => data.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StringValue::Int(value) => integer_digit_count(*value),
            StringValue::Raw(data) => data.len(),
        }
    }

    pub fn as_int(&self) -> Result<i64, ValueError> {
        match self {
            StringValue::Int(value) => Ok(*value),
            StringValue::Raw(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or(ValueError::NotAnInteger),
        }
    }

    pub fn as_float(&self) -> Result<f64, ValueError> {
        match self {
            StringValue::Int(value) => Ok(*value as f64),
            StringValue::Raw(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|text| text.trim().parse::<f64>().ok())
                .filter(|value| !value.is_nan())
                .ok_or(ValueError::NotAFloat),
        }
    }

    pub fn increment_by(&mut self, delta: i64) -> Result<i64, ValueError> {
        let current = self.as_int()?;
        let next = current.checked_add(delta).ok_or(ValueError::Overflow)?;
        *self = StringValue::Int(next);
        Ok(next)
    }

    pub fn increment_by_float(&mut self, delta: f64) -> Result<f64, ValueError> {
        let current = self.as_float()?;
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return Err(ValueError::NanOrInfinity);
        }
        *self = StringValue::from_bytes(Bytes::from(format_float(next)));
        Ok(next)
    }

    pub fn append(&mut self, data: &[u8]) -> usize {
        let mut combined = self.as_bytes().to_vec();
        combined.extend_from_slice(data);
        let length = combined.len();
        *self = StringValue::Raw(Bytes::from(combined));
        length
    }

    /// Inclusive range with negative-from-the-end indices; out-of-range
    /// clamps and an inverted range yields empty.
    pub fn get_range(&self, start: i64, end: i64) -> Bytes {
        let data = self.as_bytes();
        let length = data.len() as i64;
        if length == 0 {
            return Bytes::new();
        }

        let from = clamp_index(start, length);
        let to = clamp_index(end, length);
        if from > to {
            return Bytes::new();
        }

        data.slice(from as usize..(to + 1) as usize)
    }

    /// Writes `data` at `offset`, zero-padding any gap. Returns the new
    /// length.
    pub fn set_range(&mut self, offset: usize, data: &[u8]) -> usize {
        let mut buffer = self.as_bytes().to_vec();
        if buffer.len() < offset + data.len() {
            buffer.resize(offset + data.len(), 0);
        }
        buffer[offset..offset + data.len()].copy_from_slice(data);
        let length = buffer.len();
        *self = StringValue::from_bytes(Bytes::from(buffer));
        length
    }

    pub fn get_bit(&self, bit_index: usize) -> bool {
        let data = self.as_bytes();
        let byte_index = bit_index / 8;
        if byte_index >= data.len() {
            return false;
        }
        // Bit 0 is the most significant bit of byte 0.
        data[byte_index] & (1 << (7 - (bit_index % 8))) != 0
    }

    /// Sets one bit and returns its previous state, growing the value as
    /// needed.
    pub fn set_bit(&mut self, bit_index: usize, on: bool) -> bool {
        let byte_index = bit_index / 8;
        let mask = 1u8 << (7 - (bit_index % 8));

        let mut buffer = self.as_bytes().to_vec();
        if buffer.len() <= byte_index {
            buffer.resize(byte_index + 1, 0);
        }

        let previous = buffer[byte_index] & mask != 0;
        if on {
            buffer[byte_index] |= mask;
        } else {
            buffer[byte_index] &= !mask;
        }
        *self = StringValue::Raw(Bytes::from(buffer));
        previous
    }
}

/// Index unit for BITCOUNT/BITPOS ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BitUnit {
    Byte,
    Bit,
}

/// Counts set bits in the inclusive range, interpreted in bytes or bits.
pub fn bit_count(data: &[u8], start: i64, end: i64, unit: BitUnit) -> u64 {
    match unit {
        BitUnit::Byte => {
            let length = data.len() as i64;
            if length == 0 {
                return 0;
            }
            let from = clamp_index(start, length);
            let to = clamp_index(end, length);
            if from > to {
                return 0;
            }
            data[from as usize..(to + 1) as usize]
                .iter()
                .map(|byte| byte.count_ones() as u64)
                .sum()
        }
        BitUnit::Bit => {
            let total_bits = (data.len() * 8) as i64;
            if total_bits == 0 {
                return 0;
            }
            let from = clamp_index(start, total_bits);
            let to = clamp_index(end, total_bits);
            if from > to {
                return 0;
            }
            (from..=to)
                .filter(|&bit| {
                    let byte = data[(bit / 8) as usize];
                    byte & (1 << (7 - (bit % 8))) != 0
                })
                .count() as u64
        }
    }
}

/// Finds the first bit equal to `target`. `end` of `None` means "to the end
/// of the string", which also changes the semantics of searching for a zero
/// bit past the data (a zero is then reported one past the last bit).
pub fn bit_position(
    data: &[u8],
    target: bool,
    start: i64,
    end: Option<i64>,
    unit: BitUnit,
) -> i64 {
    let total_bits = (data.len() * 8) as i64;
    if total_bits == 0 {
        return if target { -1 } else { 0 };
    }

    let (from_bit, to_bit) = match unit {
        BitUnit::Byte => {
            let length = data.len() as i64;
            let from = clamp_index(start, length);
            let to = clamp_index(end.unwrap_or(-1), length);
            (from * 8, to * 8 + 7)
        }
        BitUnit::Bit => {
            let from = clamp_index(start, total_bits);
            let to = clamp_index(end.unwrap_or(-1), total_bits);
            (from, to)
        }
    };

    if from_bit > to_bit {
        return -1;
    }

    for bit in from_bit..=to_bit {
        let byte = data[(bit / 8) as usize];
        if (byte & (1 << (7 - (bit % 8))) != 0) == target {
            return bit;
        }
    }

    // Searching for 0 with no explicit end behaves as if the string were
    // followed by infinite zero bits.
    if !target && end.is_none() {
        return total_bits;
    }
    -1
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BitOperation {
    And,
    Or,
    Xor,
    Not,
}

/// Combines source strings bytewise; shorter inputs are zero-padded to the
/// longest.
pub fn bit_operation(operation: BitOperation, sources: &[Bytes]) -> Vec<u8> {
    if operation == BitOperation::Not {
        return sources
            .first()
            .map(|data| data.iter().map(|byte| !byte).collect())
            .unwrap_or_default();
    }

    let length = sources.iter().map(|data| data.len()).max().unwrap_or(0);
    let mut result = vec![0u8; length];

    for (index, source) in sources.iter().enumerate() {
        for position in 0..length {
            let byte = source.get(position).copied().unwrap_or(0);
            result[position] = match operation {
                BitOperation::And => {
                    if index == 0 {
                        byte
                    } else {
                        result[position] & byte
                    }
                }
                BitOperation::Or => result[position] | byte,
                BitOperation::Xor => result[position] ^ byte,
                BitOperation::Not => unreachable!("handled above"),
            };
        }
    }

    result
}

/// Renders a float the way the counter commands reply: no exponent, no
/// trailing fraction zeros.
pub fn format_float(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        // Display already renders the shortest decimal that round-trips,
        // and never falls back to exponent notation.
        format!("{}", value)
    }
}

fn integer_digit_count(value: i64) -> usize {
    value.to_string().len()
}

fn clamp_index(index: i64, length: i64) -> i64 {
    let resolved = if index < 0 { length + index } else { index };
    resolved.clamp(0, length - 1)
}
