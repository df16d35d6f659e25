//! Capture files: the records of one source, concatenated.

use std::{fs, io, path::Path};

use bytes::{Bytes, BytesMut};

use crate::header::{HEADER_LEN, peek_len};

/// Splits a capture back into records using the length in each header.
///
/// When a header can't be trusted (shorter than a header, or longer than what is
/// left) the rest of the capture is returned as a single record, which the decoder
/// will reject.
#[derive(Debug, Clone)]
pub struct CaptureReader {
    data: Bytes,
}

impl CaptureReader {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(Bytes::from(fs::read(path)?)))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn next_record(&mut self) -> Option<Bytes> {
        if self.data.is_empty() {
            return None;
        }
        let len = match peek_len(&self.data) {
            Some(len) if len >= HEADER_LEN && len <= self.data.len() => len,
            _ => self.data.len(),
        };
        Some(self.data.split_to(len))
    }
}

impl Iterator for CaptureReader {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

#[derive(Debug, Default)]
pub struct CaptureWriter {
    data: BytesMut,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &[u8]) -> &mut Self {
        self.data.extend_from_slice(record);
        self
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
