//! Record encoding with the same truncation rules as the kernel probes.
//!
//! Parameters are pushed in schema order. Variable-length parameters are truncated to
//! the space left in the record; string arrays are additionally bounded by
//! [`WireLimits::max_array_bytes`]. A fixed-size parameter which doesn't fit fails the
//! whole record, as the probe would fail to reserve it.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::{
    EventType, ParamInfo, ParamType, WireLimits,
    header::{EventHeader, HEADER_LEN},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{event_type} has no parameter at position {index}")]
    TooManyParams { event_type: EventType, index: usize },
    #[error("parameter {name} of {event_type} is {expected:?}, not {got}")]
    ParamTypeMismatch {
        event_type: EventType,
        name: &'static str,
        expected: ParamType,
        got: &'static str,
    },
    #[error("no room left for parameter {name} of {event_type}")]
    RecordFull {
        event_type: EventType,
        name: &'static str,
    },
    #[error("{event_type} expects {expected} parameters, got {got}")]
    MissingParams {
        event_type: EventType,
        expected: usize,
        got: usize,
    },
    #[error("limits leave no room for the parameters of {event_type}")]
    LimitsTooSmall { event_type: EventType },
}

/// Apply the string array truncation rule.
///
/// Every entry costs its length plus a NUL terminator. Entries are kept in order while
/// they fit in `budget`; the first entry which doesn't fit is cut so that its bytes and
/// terminator fill the budget exactly, and everything after it is dropped. Entries are
/// returned without terminators. An entry containing a NUL is cut at the NUL.
pub fn truncate_string_array<S: AsRef<[u8]>>(entries: &[S], budget: usize) -> Vec<&[u8]> {
    let mut kept = Vec::new();
    let mut used = 0;
    for entry in entries {
        let entry = crate::buffer_index::until_nul(entry.as_ref());
        let left = budget - used;
        if entry.len() < left {
            kept.push(entry);
            used += entry.len() + 1;
        } else {
            if left > 0 {
                kept.push(&entry[..left - 1]);
            }
            break;
        }
    }
    kept
}

/// Incremental encoder for a single record.
pub struct RecordBuilder {
    event_type: EventType,
    header: EventHeader,
    limits: WireLimits,
    lengths: Vec<u16>,
    payload: BytesMut,
}

impl RecordBuilder {
    pub fn new(event_type: EventType, ts: u64, tid: i64, cpu: u16) -> Self {
        Self::with_limits(event_type, ts, tid, cpu, WireLimits::default())
    }

    pub fn with_limits(
        event_type: EventType,
        ts: u64,
        tid: i64,
        cpu: u16,
        limits: WireLimits,
    ) -> Self {
        let nparams = event_type.params().len();
        Self {
            event_type,
            header: EventHeader {
                ts,
                tid,
                len: 0,
                event_type: event_type.id(),
                cpu,
                nparams: nparams as u32,
            },
            limits,
            lengths: Vec::with_capacity(nparams),
            payload: BytesMut::new(),
        }
    }

    /// Bytes still available for parameter payloads.
    pub fn remaining(&self) -> usize {
        let fixed = HEADER_LEN + 2 * self.event_type.params().len() + self.payload.len();
        self.limits.max_record_size.saturating_sub(fixed)
    }

    fn next_param(
        &self,
        accepts: fn(ParamType) -> bool,
        got: &'static str,
    ) -> Result<ParamInfo, EncodeError> {
        let index = self.lengths.len();
        let param = self
            .event_type
            .params()
            .get(index)
            .copied()
            .ok_or(EncodeError::TooManyParams {
                event_type: self.event_type,
                index,
            })?;
        if accepts(param.ty) {
            Ok(param)
        } else {
            Err(EncodeError::ParamTypeMismatch {
                event_type: self.event_type,
                name: param.name,
                expected: param.ty,
                got,
            })
        }
    }

    /// Space a single variable-length parameter may take.
    fn variable_budget(&self) -> usize {
        self.remaining().min(u16::MAX as usize)
    }

    fn commit(&mut self, bytes: &[u8]) {
        self.payload.put_slice(bytes);
        self.lengths.push(bytes.len() as u16);
    }

    fn push_fixed(&mut self, param: ParamInfo, le_bytes: &[u8]) -> Result<&mut Self, EncodeError> {
        // width() is Some for every type accepted by the integer pushers
        let width = param.ty.width().unwrap_or(le_bytes.len());
        if width > self.remaining() {
            return Err(EncodeError::RecordFull {
                event_type: self.event_type,
                name: param.name,
            });
        }
        self.commit(&le_bytes[..width]);
        Ok(self)
    }

    /// Push a signed integer parameter (errno, pid, fd, i32, i64).
    pub fn push_int(&mut self, value: i64) -> Result<&mut Self, EncodeError> {
        let param = self.next_param(|ty| ty.is_signed(), "a signed integer")?;
        self.push_fixed(param, &value.to_le_bytes())
    }

    /// Push an unsigned integer parameter (u8 to u64, uid, flags).
    pub fn push_uint(&mut self, value: u64) -> Result<&mut Self, EncodeError> {
        let param = self.next_param(
            |ty| ty.width().is_some() && !ty.is_signed(),
            "an unsigned integer",
        )?;
        self.push_fixed(param, &value.to_le_bytes())
    }

    /// Push an empty parameter, valid for any type.
    pub fn push_empty(&mut self) -> Result<&mut Self, EncodeError> {
        self.next_param(|_| true, "empty")?;
        self.commit(&[]);
        Ok(self)
    }

    /// Push a string, truncated so that it and its terminator fit the record.
    pub fn push_str(&mut self, value: impl AsRef<[u8]>) -> Result<&mut Self, EncodeError> {
        self.next_param(ParamType::is_string, "a string")?;
        let budget = self.variable_budget();
        self.write_entries(&truncate_string_array(&[value.as_ref()], budget));
        Ok(self)
    }

    /// Push raw bytes, truncated to the space left in the record.
    pub fn push_bytes(&mut self, value: &[u8]) -> Result<&mut Self, EncodeError> {
        self.next_param(|ty| ty == ParamType::ByteBuf, "bytes")?;
        let len = value.len().min(self.variable_budget());
        self.commit(&value[..len]);
        Ok(self)
    }

    /// Push a string array (environment, arguments).
    pub fn push_str_array<S: AsRef<[u8]>>(
        &mut self,
        entries: &[S],
    ) -> Result<&mut Self, EncodeError> {
        self.next_param(|ty| ty == ParamType::CharBufArray, "a string array")?;
        let budget = self.array_budget();
        self.write_entries(&truncate_string_array(entries, budget));
        Ok(self)
    }

    /// Push a whole argv as two parameters: the executable (first entry) followed by
    /// the arguments. The array budget applies to the argv as a whole.
    pub fn push_argv<S: AsRef<[u8]>>(&mut self, argv: &[S]) -> Result<&mut Self, EncodeError> {
        self.next_param(ParamType::is_string, "the executable of an argv")?;
        let index = self.lengths.len();
        match self.event_type.params().get(index + 1) {
            Some(args) if args.ty == ParamType::CharBufArray => {}
            _ => {
                return Err(EncodeError::ParamTypeMismatch {
                    event_type: self.event_type,
                    name: self.event_type.params()[index].name,
                    expected: ParamType::CharBufArray,
                    got: "an argv",
                });
            }
        }
        let budget = self.array_budget();
        let kept = truncate_string_array(argv, budget);
        match kept.split_first() {
            Some((exe, args)) => {
                self.write_entries(&[*exe]);
                self.write_entries(args);
            }
            None => {
                self.commit(&[]);
                self.commit(&[]);
            }
        }
        Ok(self)
    }

    fn array_budget(&self) -> usize {
        self.variable_budget().min(self.limits.max_array_bytes)
    }

    fn write_entries(&mut self, entries: &[&[u8]]) {
        let start = self.payload.len();
        for entry in entries {
            self.payload.put_slice(entry);
            self.payload.put_u8(0);
        }
        let len = self.payload.len() - start;
        self.lengths.push(len as u16);
    }

    /// Complete the record. Every parameter of the schema must have been pushed.
    pub fn finish(mut self) -> Result<Bytes, EncodeError> {
        let expected = self.event_type.params().len();
        if self.lengths.len() != expected {
            return Err(EncodeError::MissingParams {
                event_type: self.event_type,
                expected,
                got: self.lengths.len(),
            });
        }
        let len = HEADER_LEN + 2 * expected + self.payload.len();
        if len > self.limits.max_record_size {
            return Err(EncodeError::LimitsTooSmall {
                event_type: self.event_type,
            });
        }
        self.header.len = len as u32;

        let mut record = BytesMut::with_capacity(len);
        self.header.write(&mut record);
        for param_len in &self.lengths {
            record.put_u16_le(*param_len);
        }
        record.put_slice(&self.payload);
        Ok(record.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParamValue, decode};

    fn x(n: usize) -> String {
        "x".repeat(n)
    }

    #[test]
    fn truncation_rule() {
        let entries = ["ab", "cde", "fghij", "k"];
        // 3 + 4 = 7 used, 3 left: "fg" + NUL, "k" dropped
        assert_eq!(
            truncate_string_array(&entries, 10),
            vec![&b"ab"[..], b"cde", b"fg"]
        );
        // exact fit keeps everything
        assert_eq!(truncate_string_array(&entries, 15).len(), 4);
        // one byte left becomes an empty entry
        assert_eq!(
            truncate_string_array(&entries, 8),
            vec![&b"ab"[..], b"cde", b""]
        );
        assert!(truncate_string_array(&entries, 0).is_empty());
    }

    #[test]
    fn argv_over_budget() {
        let argv = [
            "/usr/bin/true".to_string(),
            String::new(),
            "first_argv".to_string(),
            String::new(),
            x(4096),
            "second_argv".to_string(),
        ];
        let mut builder = RecordBuilder::new(EventType::ExecveX, 100, 7, 0);
        builder.push_int(0).unwrap().push_argv(&argv).unwrap();
        let record = fill_execve_tail(builder, &[] as &[&str]);

        let event = decode(record).unwrap();
        assert_eq!(event.param_str(1).as_deref(), Some("/usr/bin/true"));
        let args = event.param_str_array(2).unwrap();
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], "");
        assert_eq!(args[1], "first_argv");
        assert_eq!(args[2], "");
        assert_eq!(args[3], x(4096 - 14 - 11 - 2 - 1));
    }

    #[test]
    fn env_over_budget() {
        let env = [
            "SHELL=/bin/sh".to_string(),
            "FIRST_ENV=first".to_string(),
            x(5000),
            "LAST_ENV=last".to_string(),
        ];
        let mut builder = RecordBuilder::new(EventType::ExecveX, 100, 7, 0);
        builder.push_int(0).unwrap().push_argv(&["/bin/env"]).unwrap();
        let record = fill_execve_tail(builder, &env);

        let event = decode(record).unwrap();
        let decoded = event.param_str_array(8).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], "SHELL=/bin/sh");
        assert_eq!(decoded[1], "FIRST_ENV=first");
        assert_eq!(decoded[2], x(4096 - 14 - 16 - 1));
    }

    #[test]
    fn reencoding_is_a_fixed_point() {
        let argv = ["/bin/sh".to_string(), "-c".to_string(), x(8000)];
        let mut builder = RecordBuilder::new(EventType::ExecveX, 1, 1, 0);
        builder.push_int(0).unwrap().push_argv(&argv).unwrap();
        let first = fill_execve_tail(builder, &["A=1"]);

        let decoded = decode(first.clone()).unwrap();
        let mut argv: Vec<String> = vec![decoded.param_str(1).unwrap().into_owned()];
        argv.extend(
            decoded
                .param_str_array(2)
                .unwrap()
                .into_iter()
                .map(|arg| arg.into_owned()),
        );
        let mut builder = RecordBuilder::new(EventType::ExecveX, 1, 1, 0);
        builder.push_int(0).unwrap().push_argv(&argv).unwrap();
        let second = fill_execve_tail(builder, &["A=1"]);

        assert_eq!(first, second);
    }

    #[test]
    fn record_size_bounds_strings() {
        let limits = WireLimits {
            max_record_size: HEADER_LEN + 2 * 3 + 32,
            max_array_bytes: 4096,
        };
        let mut builder = RecordBuilder::with_limits(EventType::SetpgidX, 1, 1, 0, limits);
        builder.push_int(0).unwrap().push_int(5).unwrap().push_int(5).unwrap();
        let record = builder.finish().unwrap();
        assert_eq!(record.len(), HEADER_LEN + 6 + 24);

        let limits = WireLimits {
            max_record_size: HEADER_LEN + 2 + 10,
            max_array_bytes: 4096,
        };
        let mut builder = RecordBuilder::with_limits(EventType::ExecveE, 1, 1, 0, limits);
        builder.push_str("/etc/passwd.bak").unwrap();
        let record = builder.finish().unwrap();
        assert_eq!(record.len(), limits.max_record_size);
        let event = decode(record).unwrap();
        assert_eq!(event.param_str(0).as_deref(), Some("/etc/pass"));
    }

    #[test]
    fn fixed_param_that_does_not_fit() {
        let limits = WireLimits {
            max_record_size: HEADER_LEN + 2 * 3 + 12,
            max_array_bytes: 4096,
        };
        let mut builder = RecordBuilder::with_limits(EventType::SetpgidX, 1, 1, 0, limits);
        builder.push_int(0).unwrap();
        assert_eq!(
            builder.push_int(5).err(),
            Some(EncodeError::RecordFull {
                event_type: EventType::SetpgidX,
                name: "pid"
            })
        );
    }

    #[test]
    fn schema_is_enforced() {
        let mut builder = RecordBuilder::new(EventType::CloseX, 1, 1, 0);
        assert!(matches!(
            builder.push_str("nope"),
            Err(EncodeError::ParamTypeMismatch { name: "res", .. })
        ));
        builder.push_int(0).unwrap();
        assert!(matches!(
            RecordBuilder::new(EventType::CloseX, 1, 1, 0).finish(),
            Err(EncodeError::MissingParams {
                expected: 2,
                got: 0,
                ..
            })
        ));
        builder.push_int(4).unwrap();
        assert!(matches!(
            builder.push_int(1),
            Err(EncodeError::TooManyParams { index: 2, .. })
        ));
    }

    #[test]
    fn empty_params() {
        let mut builder = RecordBuilder::new(EventType::OpenX, 1, 1, 0);
        builder
            .push_int(3)
            .unwrap()
            .push_empty()
            .unwrap()
            .push_empty()
            .unwrap()
            .push_empty()
            .unwrap();
        let event = decode(builder.finish().unwrap()).unwrap();
        assert_eq!(event.param(0), ParamValue::Int(3));
        assert_eq!(event.param(1), ParamValue::Empty);
        assert_eq!(event.param(3), ParamValue::Empty);
    }

    /// Push everything after `args` in an execve exit record.
    fn fill_execve_tail<S: AsRef<[u8]>>(mut builder: RecordBuilder, env: &[S]) -> Bytes {
        builder
            .push_int(7)
            .unwrap()
            .push_int(7)
            .unwrap()
            .push_int(1)
            .unwrap()
            .push_str("/")
            .unwrap()
            .push_str("true")
            .unwrap()
            .push_str_array(env)
            .unwrap()
            .push_str("/usr/bin/true")
            .unwrap()
            .push_int(7)
            .unwrap()
            .push_uint(0)
            .unwrap();
        builder.finish().unwrap()
    }
}
