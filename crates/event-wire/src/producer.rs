//! Per-source record buffers.
//!
//! Each producer owns one bounded channel. Writing never blocks: a record which can't
//! be reserved is dropped before being encoded and the drop is counted.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use tokio::sync::mpsc;

pub use tokio::sync::mpsc::error::TryRecvError;

use crate::EncodeError;

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerStats {
    pub written: u64,
    pub dropped: u64,
}

/// Create a buffer holding at most `capacity` records.
pub fn record_channel(capacity: usize) -> (RecordProducer, RecordConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(Counters::default());
    (
        RecordProducer {
            tx,
            counters: counters.clone(),
        },
        RecordConsumer { rx, counters },
    )
}

#[derive(Debug)]
pub struct RecordProducer {
    tx: mpsc::Sender<Bytes>,
    counters: Arc<Counters>,
}

impl RecordProducer {
    /// Reserve a slot and only then encode the record into it.
    ///
    /// Returns `Ok(false)` when the buffer was full (or the consumer is gone) and the
    /// record was dropped without calling `encode`.
    pub fn try_write<F>(&self, encode: F) -> Result<bool, EncodeError>
    where
        F: FnOnce() -> Result<Bytes, EncodeError>,
    {
        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(_) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!("record buffer full, dropping record ({dropped} dropped)");
                return Ok(false);
            }
        };
        permit.send(encode()?);
        self.counters.written.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Submit an already encoded record, dropping it if the buffer is full.
    pub fn submit(&self, record: Bytes) -> bool {
        match self.try_write(|| Ok(record)) {
            Ok(written) => written,
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> ProducerStats {
        stats(&self.counters)
    }
}

#[derive(Debug)]
pub struct RecordConsumer {
    rx: mpsc::Receiver<Bytes>,
    counters: Arc<Counters>,
}

impl RecordConsumer {
    /// Take the next record without waiting.
    pub fn try_recv(&mut self) -> Result<Bytes, TryRecvError> {
        self.rx.try_recv()
    }

    /// Wait for the next record. Returns `None` once the producer is gone and the
    /// buffer is empty.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn stats(&self) -> ProducerStats {
        stats(&self.counters)
    }
}

fn stats(counters: &Counters) -> ProducerStats {
    ProducerStats {
        written: counters.written.load(Ordering::Relaxed),
        dropped: counters.dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventType, RecordBuilder};

    fn close_exit(fd: i64) -> Result<Bytes, EncodeError> {
        let mut builder = RecordBuilder::new(EventType::CloseX, 1, 1, 0);
        builder.push_int(0)?.push_int(fd)?;
        builder.finish()
    }

    #[tokio::test]
    async fn full_buffer_drops_without_blocking() {
        let (producer, mut consumer) = record_channel(2);
        assert_eq!(producer.try_write(|| close_exit(3)), Ok(true));
        assert_eq!(producer.try_write(|| close_exit(4)), Ok(true));

        let mut encoded = false;
        let written = producer.try_write(|| {
            encoded = true;
            close_exit(5)
        });
        assert_eq!(written, Ok(false));
        assert!(!encoded);
        assert_eq!(
            producer.stats(),
            ProducerStats {
                written: 2,
                dropped: 1
            }
        );

        assert!(consumer.try_recv().is_ok());
        assert!(producer.submit(close_exit(6).unwrap()));
        assert!(consumer.recv().await.is_some());
        assert!(consumer.recv().await.is_some());
        assert_eq!(consumer.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn closed_consumer_counts_drops() {
        let (producer, consumer) = record_channel(4);
        drop(consumer);
        assert!(!producer.submit(close_exit(3).unwrap()));
        assert_eq!(producer.stats().dropped, 1);
    }

    #[test]
    fn encode_errors_are_reported() {
        let (producer, _consumer) = record_channel(4);
        let result = producer.try_write(|| {
            let mut builder = RecordBuilder::new(EventType::CloseX, 1, 1, 0);
            builder.push_int(0)?;
            builder.finish()
        });
        assert!(matches!(result, Err(EncodeError::MissingParams { .. })));
        assert_eq!(producer.stats().written, 0);
    }
}
