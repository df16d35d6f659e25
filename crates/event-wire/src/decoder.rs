use std::{borrow::Cow, fmt};

use bytes::Bytes;
use thiserror::Error;

use crate::{
    BufferIndex, EventType, ParamInfo, ParamType, WireLimits,
    buffer_index::StrArray,
    header::{EventHeader, HEADER_LEN},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("record too short: {len} bytes")]
    TooShort { len: usize },
    #[error("record of {len} bytes exceeds the {max} bytes limit")]
    RecordTooLarge { len: usize, max: usize },
    #[error("record declares {declared} bytes but {actual} were read")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown event type {0}")]
    UnknownEventType(u16),
    #[error("{event_type} has at most {max} parameters, record declares {got}")]
    TooManyParams {
        event_type: EventType,
        max: usize,
        got: usize,
    },
    #[error("parameter {index} of {event_type} runs past the end of the record")]
    ParamOutOfBounds { event_type: EventType, index: usize },
    #[error("parameter {name} of {event_type} should be {expected} bytes, not {got}")]
    BadParamWidth {
        event_type: EventType,
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("parameter {name} of {event_type} is {len} bytes, over the {max} bytes array limit")]
    ArrayTooLong {
        event_type: EventType,
        name: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{extra} bytes of {event_type} are not covered by any parameter")]
    TrailingBytes { event_type: EventType, extra: usize },
}

/// A decoded record. Parameters are indexes into the record buffer.
///
/// Records may carry fewer parameters than their schema: missing trailing
/// parameters read as [`ParamValue::Empty`].
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub header: EventHeader,
    pub event_type: EventType,
    buffer: Bytes,
    params: Vec<BufferIndex<[u8]>>,
}

/// Value of a single parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue<'a> {
    Empty,
    Int(i64),
    Uint(u64),
    Str(Cow<'a, str>),
    Bytes(&'a [u8]),
    StrArray(Vec<Cow<'a, str>>),
}

impl fmt::Display for ParamValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Empty => Ok(()),
            ParamValue::Int(value) => write!(f, "{value}"),
            ParamValue::Uint(value) => write!(f, "{value}"),
            ParamValue::Str(value) => f.write_str(value),
            ParamValue::Bytes(value) => {
                for byte in value.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            ParamValue::StrArray(values) => f.write_str(&values.join(" ")),
        }
    }
}

/// Decode a single record with the default [`WireLimits`].
pub fn decode(buffer: Bytes) -> Result<RawEvent, DecodeError> {
    decode_with_limits(buffer, &WireLimits::default())
}

/// Decode a single record, rejecting anything a producer bound by `limits` could
/// not have written.
pub fn decode_with_limits(buffer: Bytes, limits: &WireLimits) -> Result<RawEvent, DecodeError> {
    if buffer.len() < HEADER_LEN {
        return Err(DecodeError::TooShort { len: buffer.len() });
    }
    let header = EventHeader::read(&buffer[..HEADER_LEN]);
    if header.len as usize != buffer.len() {
        return Err(DecodeError::LengthMismatch {
            declared: header.len as usize,
            actual: buffer.len(),
        });
    }
    if buffer.len() > limits.max_record_size {
        return Err(DecodeError::RecordTooLarge {
            len: buffer.len(),
            max: limits.max_record_size,
        });
    }
    let event_type = EventType::from_repr(header.event_type)
        .ok_or(DecodeError::UnknownEventType(header.event_type))?;
    let schema = event_type.params();
    let nparams = header.nparams as usize;
    if nparams > schema.len() {
        return Err(DecodeError::TooManyParams {
            event_type,
            max: schema.len(),
            got: nparams,
        });
    }

    let table_end = HEADER_LEN + 2 * nparams;
    if table_end > buffer.len() {
        return Err(DecodeError::ParamOutOfBounds {
            event_type,
            index: 0,
        });
    }
    let mut params = Vec::with_capacity(nparams);
    let mut offset = table_end;
    for (index, param) in schema.iter().take(nparams).enumerate() {
        let at = HEADER_LEN + 2 * index;
        let len = u16::from_le_bytes([buffer[at], buffer[at + 1]]);
        if offset + len as usize > buffer.len() {
            return Err(DecodeError::ParamOutOfBounds { event_type, index });
        }
        if let Some(width) = param.ty.width() {
            if len != 0 && len as usize != width {
                return Err(DecodeError::BadParamWidth {
                    event_type,
                    name: param.name,
                    expected: width,
                    got: len as usize,
                });
            }
        }
        if param.ty == ParamType::CharBufArray && len as usize > limits.max_array_bytes {
            return Err(DecodeError::ArrayTooLong {
                event_type,
                name: param.name,
                len: len as usize,
                max: limits.max_array_bytes,
            });
        }
        params.push(BufferIndex::new(offset as u32, len));
        offset += len as usize;
    }
    if offset != buffer.len() {
        return Err(DecodeError::TrailingBytes {
            event_type,
            extra: buffer.len() - offset,
        });
    }

    Ok(RawEvent {
        header,
        event_type,
        buffer,
        params,
    })
}

impl RawEvent {
    pub fn ts(&self) -> u64 {
        self.header.ts
    }

    pub fn tid(&self) -> i64 {
        self.header.tid
    }

    pub fn cpu(&self) -> u16 {
        self.header.cpu
    }

    /// The raw record this event was decoded from.
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Number of parameters actually present in the record.
    pub fn nparams(&self) -> usize {
        self.params.len()
    }

    pub fn param_info(&self, index: usize) -> Option<&'static ParamInfo> {
        self.event_type.params().get(index)
    }

    pub fn param(&self, index: usize) -> ParamValue<'_> {
        let (Some(info), Some(slice)) = (self.param_info(index), self.params.get(index)) else {
            return ParamValue::Empty;
        };
        let raw = match slice.bytes(&self.buffer) {
            Ok(raw) if !raw.is_empty() => raw,
            _ => return ParamValue::Empty,
        };
        let value = match info.ty {
            ParamType::CharBuf | ParamType::FsPath => {
                slice.cast::<str>().string(&self.buffer).map(ParamValue::Str)
            }
            ParamType::ByteBuf => Ok(ParamValue::Bytes(raw)),
            ParamType::CharBufArray => slice
                .cast::<StrArray>()
                .strings(&self.buffer)
                .map(ParamValue::StrArray),
            ty if ty.is_signed() => Ok(ParamValue::Int(read_signed(raw))),
            _ => Ok(ParamValue::Uint(read_unsigned(raw))),
        };
        value.unwrap_or(ParamValue::Empty)
    }

    /// Integer value of a parameter, whatever its signedness.
    pub fn param_i64(&self, index: usize) -> Option<i64> {
        match self.param(index) {
            ParamValue::Int(value) => Some(value),
            ParamValue::Uint(value) => Some(value as i64),
            _ => None,
        }
    }

    pub fn param_u64(&self, index: usize) -> Option<u64> {
        match self.param(index) {
            ParamValue::Int(value) => Some(value as u64),
            ParamValue::Uint(value) => Some(value),
            _ => None,
        }
    }

    pub fn param_str(&self, index: usize) -> Option<Cow<'_, str>> {
        match self.param(index) {
            ParamValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn param_str_array(&self, index: usize) -> Option<Vec<Cow<'_, str>>> {
        match self.param(index) {
            ParamValue::StrArray(values) => Some(values),
            _ => None,
        }
    }
}

fn read_signed(raw: &[u8]) -> i64 {
    match raw.len() {
        1 => raw[0] as i8 as i64,
        2 => i16::from_le_bytes([raw[0], raw[1]]) as i64,
        4 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
        _ => read_unsigned(raw) as i64,
    }
}

fn read_unsigned(raw: &[u8]) -> u64 {
    let mut le = [0u8; 8];
    let len = raw.len().min(8);
    le[..len].copy_from_slice(&raw[..len]);
    u64::from_le_bytes(le)
}
