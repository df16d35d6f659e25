//! Binary record format shared by the kernel probes and the userspace engine.
//!
//! Every record is a fixed [header](header::EventHeader) followed by a table of
//! parameter lengths and the parameter payloads, in the order given by the
//! [schema](event_type::EventType::params) of its event type:
//!
//! ```text
//! | ts u64 | tid i64 | len u32 | type u16 | cpu u16 | nparams u32 | len[0] u16 .. len[n-1] u16 | payload[0] .. payload[n-1] |
//! ```
//!
//! The encoding side is [`RecordBuilder`], which enforces the [`WireLimits`] and applies
//! the deterministic truncation rules for strings and string arrays. The decoding side
//! is [`decode_with_limits`], which checks the same limits and turns a record into a
//! [`RawEvent`] holding [`BufferIndex`] slices into the original buffer.
//!
//! Records travel from producers to the dispatcher through bounded channels
//! ([`record_channel`]) which drop on overflow instead of blocking, or are read back
//! from capture files with [`CaptureReader`].

pub mod buffer_index;
pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod event_type;
pub mod header;
pub mod producer;

pub use buffer_index::{BufferIndex, IndexError};
pub use capture::{CaptureReader, CaptureWriter};
pub use decoder::{DecodeError, ParamValue, RawEvent, decode, decode_with_limits};
pub use encoder::{EncodeError, RecordBuilder, truncate_string_array};
pub use event_type::{Direction, EventType, ParamInfo, ParamType, clone_flags};
pub use header::{EventHeader, HEADER_LEN};
pub use producer::{ProducerStats, RecordConsumer, RecordProducer, record_channel};

/// Default size of a single ring-buffer slot.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 65536;
/// Default budget for a string array (argv, envp).
pub const DEFAULT_MAX_ARRAY_BYTES: usize = 4096;

/// Size limits applied when encoding a record, and checked again when decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLimits {
    /// Maximum total size of a record, header included.
    pub max_record_size: usize,
    /// Maximum size of a string array parameter, NUL terminators included.
    pub max_array_bytes: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            max_array_bytes: DEFAULT_MAX_ARRAY_BYTES,
        }
    }
}
