//! `BufferIndex` points to a sub-slice of a record. Decoded parameters are kept as
//! indexes into the shared [`Bytes`] of the record and only materialized when a
//! value is actually requested.

use std::{borrow::Cow, marker::PhantomData};

use bytes::Bytes;
use thiserror::Error;

#[derive(Debug)]
pub struct BufferIndex<T: ?Sized> {
    /// Start offset of the slice inside the record
    start: u32,
    /// Length of the pointed-at slice
    len: u16,
    /// Annotates what the pointed-at bytes are expected to contain.
    _data: PhantomData<T>,
}

/// Marker for a parameter holding a sequence of NUL-terminated strings.
#[derive(Debug)]
pub enum StrArray {}

// Derives would require `T: Clone`, which `str` and `[u8]` are not.
impl<T: ?Sized> Clone for BufferIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for BufferIndex<T> {}

impl<T: ?Sized> BufferIndex<T> {
    pub(crate) fn new(start: u32, len: u16) -> Self {
        Self {
            start,
            len,
            _data: PhantomData,
        }
    }

    /// Return length of the pointed at slice
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Return if the slice is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Given a buffer, try to extract the pointed at slice of bytes.
    /// Returns `Err(IndexError::IndexOutsideBuffer)` when buffer is too short.
    pub fn bytes<'a>(&self, buffer: &'a Bytes) -> Result<&'a [u8], IndexError> {
        let start = self.start as usize;
        let end = start + self.len as usize;
        if end <= buffer.len() {
            Ok(&buffer[start..end])
        } else {
            Err(IndexError::IndexOutsideBuffer {
                start,
                end,
                len: buffer.len(),
            })
        }
    }

    /// Reinterpret the pointed-at bytes as a different kind of value.
    pub fn cast<U: ?Sized>(self) -> BufferIndex<U> {
        BufferIndex::new(self.start, self.len)
    }
}

impl BufferIndex<str> {
    /// Extract a NUL-terminated string. Bytes after the first NUL are ignored and
    /// invalid utf8 sequences are replaced, so a hostile producer can't make a
    /// string parameter unreadable.
    pub fn string<'a>(&self, buffer: &'a Bytes) -> Result<Cow<'a, str>, IndexError> {
        Ok(String::from_utf8_lossy(until_nul(self.bytes(buffer)?)))
    }
}

impl BufferIndex<StrArray> {
    /// Extract an array of NUL-terminated strings.
    pub fn strings<'a>(&self, buffer: &'a Bytes) -> Result<Vec<Cow<'a, str>>, IndexError> {
        Ok(split_nul(self.bytes(buffer)?)
            .map(String::from_utf8_lossy)
            .collect())
    }
}

pub(crate) fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Split a sequence of NUL-terminated entries. The last terminator does not open a new
/// entry, so `a\0\0b\0` is `["a", "", "b"]` and an empty slice has no entries.
fn split_nul(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    let has_entries = !bytes.is_empty();
    body.split(|b| *b == 0).filter(move |_| has_entries)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("Index [{start}-{end}] is out of event buffer (len {len})")]
    IndexOutsideBuffer {
        start: usize,
        end: usize,
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_buffer() {
        let buffer = Bytes::from_static(b"abc");
        let index = BufferIndex::<[u8]>::new(2, 5);
        assert_eq!(
            index.bytes(&buffer),
            Err(IndexError::IndexOutsideBuffer {
                start: 2,
                end: 7,
                len: 3
            })
        );
    }

    #[test]
    fn string_stops_at_nul() {
        let buffer = Bytes::from_static(b"xx/bin/sh\0garbage");
        let index = BufferIndex::<str>::new(2, 15);
        assert_eq!(index.string(&buffer).unwrap(), "/bin/sh");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let buffer = Bytes::from_static(b"a\xffb\0");
        let index = BufferIndex::<str>::new(0, 4);
        assert_eq!(index.string(&buffer).unwrap(), "a\u{fffd}b");
    }

    #[test]
    fn string_array_entries() {
        let buffer = Bytes::from_static(b"a\0\0b\0");
        let index = BufferIndex::<StrArray>::new(0, 5);
        assert_eq!(index.strings(&buffer).unwrap(), vec!["a", "", "b"]);

        let single_empty = BufferIndex::<StrArray>::new(1, 1);
        assert_eq!(single_empty.strings(&buffer).unwrap(), vec![""]);

        let none = BufferIndex::<StrArray>::new(0, 0);
        assert!(none.strings(&buffer).unwrap().is_empty());
    }
}
