use bytes::{Buf, BufMut};

/// Size in bytes of the fixed record header.
pub const HEADER_LEN: usize = 28;

/// Offset of the total length field, used to split concatenated records.
pub(crate) const LEN_OFFSET: usize = 16;

/// Fixed part of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Timestamp in nanoseconds
    pub ts: u64,
    /// Thread which generated the event
    pub tid: i64,
    /// Total record length, header included
    pub len: u32,
    pub event_type: u16,
    pub cpu: u16,
    pub nparams: u32,
}

impl EventHeader {
    /// Parse a header. The caller must provide at least [`HEADER_LEN`] bytes.
    pub(crate) fn read(mut buf: &[u8]) -> Self {
        Self {
            ts: buf.get_u64_le(),
            tid: buf.get_i64_le(),
            len: buf.get_u32_le(),
            event_type: buf.get_u16_le(),
            cpu: buf.get_u16_le(),
            nparams: buf.get_u32_le(),
        }
    }

    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.ts);
        buf.put_i64_le(self.tid);
        buf.put_u32_le(self.len);
        buf.put_u16_le(self.event_type);
        buf.put_u16_le(self.cpu);
        buf.put_u32_le(self.nparams);
    }
}

/// Read the declared length of the record starting at `buf`, if a header fits.
pub(crate) fn peek_len(buf: &[u8]) -> Option<usize> {
    let mut field = buf.get(LEN_OFFSET..LEN_OFFSET + 4)?;
    Some(field.get_u32_le() as usize)
}
