//! Merge of the per-source record streams into one ordered event stream.
//!
//! Every step the dispatcher tops up the head of each source, picks the oldest
//! head, applies it to the registry and hands the enriched event to the sink.
//! Sources are polled, never awaited: the async [`Dispatcher::run`] loop sleeps for
//! `poll_interval` only when no source has anything ready.

use std::{cmp::Reverse, collections::BinaryHeap, time::Duration};

use bytes::Bytes;
use event_wire::{
    CaptureReader, RawEvent, RecordConsumer, WireLimits, decode_with_limits,
    producer::TryRecvError,
};

use crate::{
    config::{ConfigError, SectionConfig},
    fields::EventContext,
    registry::ThreadRegistry,
    shutdown::ShutdownSignal,
    updates::RegistryUpdate,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Wait between polls when every source is idle.
    pub poll_interval: Duration,
    /// Events dispatched before yielding to the runtime.
    pub batch_size: usize,
    /// Dispatch every ready record before returning on shutdown.
    pub drain_on_shutdown: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            drain_on_shutdown: false,
        }
    }
}

impl TryFrom<&SectionConfig> for DispatcherConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let poll_interval = config
            .optional("poll_interval_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let batch_size = config.with_default("batch_size", DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                value: "0".to_string(),
                err: "must be greater than 0".to_string(),
            });
        }
        Ok(Self {
            poll_interval,
            batch_size,
            drain_on_shutdown: config.with_default("drain_on_shutdown", false)?,
        })
    }
}

pub enum SourcePoll {
    Ready(Bytes),
    /// Nothing now, maybe later.
    Pending,
    /// Nothing ever again.
    Exhausted,
}

/// A stream of records from one producer.
pub trait EventSource {
    fn poll_record(&mut self) -> SourcePoll;
}

impl EventSource for RecordConsumer {
    fn poll_record(&mut self) -> SourcePoll {
        match self.try_recv() {
            Ok(record) => SourcePoll::Ready(record),
            Err(TryRecvError::Empty) => SourcePoll::Pending,
            Err(TryRecvError::Disconnected) => SourcePoll::Exhausted,
        }
    }
}

impl EventSource for CaptureReader {
    fn poll_record(&mut self) -> SourcePoll {
        match self.next_record() {
            Some(record) => SourcePoll::Ready(record),
            None => SourcePoll::Exhausted,
        }
    }
}

/// Consumer of the dispatched events.
pub trait EventSink {
    fn on_event(&mut self, ctx: &EventContext<'_>);
}

impl<F> EventSink for F
where
    F: FnMut(&EventContext<'_>),
{
    fn on_event(&mut self, ctx: &EventContext<'_>) {
        self(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dispatched,
    /// No source had a record ready.
    Idle,
    /// Every source is exhausted and every head dispatched.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub decoded: u64,
    pub corrupt: u64,
    pub dispatched: u64,
    pub registry_errors: u64,
}

pub struct Dispatcher {
    sources: Vec<Box<dyn EventSource + Send>>,
    heads: Vec<Option<RawEvent>>,
    exhausted: Vec<bool>,
    /// Timestamp and source of every head, oldest first.
    queue: BinaryHeap<Reverse<(u64, usize)>>,
    registry: ThreadRegistry,
    config: DispatcherConfig,
    /// Records a producer with these limits could not have written are corrupt.
    limits: WireLimits,
    stats: DispatcherStats,
    next_purge: u64,
}

impl Dispatcher {
    pub fn new(registry: ThreadRegistry, config: DispatcherConfig) -> Self {
        Self {
            sources: Vec::new(),
            heads: Vec::new(),
            exhausted: Vec::new(),
            queue: BinaryHeap::new(),
            registry,
            config,
            limits: WireLimits::default(),
            stats: DispatcherStats::default(),
            next_purge: 0,
        }
    }

    pub fn with_wire_limits(mut self, limits: WireLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a source. Ties between timestamps go to the source added first.
    pub fn add_source<S: EventSource + Send + 'static>(&mut self, source: S) -> usize {
        self.sources.push(Box::new(source));
        self.heads.push(None);
        self.exhausted.push(false);
        self.sources.len() - 1
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ThreadRegistry {
        &mut self.registry
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    fn fill_heads(&mut self) {
        for (index, source) in self.sources.iter_mut().enumerate() {
            if self.heads[index].is_some() || self.exhausted[index] {
                continue;
            }
            loop {
                match source.poll_record() {
                    SourcePoll::Ready(record) => match decode_with_limits(record, &self.limits) {
                        Ok(event) => {
                            self.stats.decoded += 1;
                            self.queue.push(Reverse((event.ts(), index)));
                            self.heads[index] = Some(event);
                            break;
                        }
                        Err(err) => {
                            self.stats.corrupt += 1;
                            log::debug!("source {index}: dropping corrupt record: {err}");
                        }
                    },
                    SourcePoll::Pending => break,
                    SourcePoll::Exhausted => {
                        log::debug!("source {index} exhausted");
                        self.exhausted[index] = true;
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch the oldest ready event, if any.
    pub fn step<K: EventSink + ?Sized>(&mut self, sink: &mut K) -> Step {
        self.fill_heads();
        let event = match self.queue.pop() {
            Some(Reverse((_, index))) => self.heads[index].take(),
            None => None,
        };
        match event {
            Some(event) => {
                self.dispatch(event, sink);
                Step::Dispatched
            }
            None if self.exhausted.iter().all(|exhausted| *exhausted) => Step::Exhausted,
            None => Step::Idle,
        }
    }

    fn dispatch<K: EventSink + ?Sized>(&mut self, event: RawEvent, sink: &mut K) {
        let ts = event.ts();
        if let Some(update) = RegistryUpdate::from_event(&event) {
            if let Err(err) = update.apply(&mut self.registry, ts) {
                self.stats.registry_errors += 1;
                log::debug!("{} at {ts}: {err}", event.event_type);
            }
        }
        self.stats.dispatched += 1;
        let ctx = EventContext::new(self.stats.dispatched, &event, &self.registry);
        sink.on_event(&ctx);

        if ts >= self.next_purge {
            let purged = self.registry.purge_dead(ts);
            if purged > 0 {
                log::trace!("purged {purged} exited threads");
            }
            let interval = u64::try_from(self.registry.config().purge_after.as_nanos())
                .unwrap_or(u64::MAX);
            self.next_purge = ts.saturating_add(interval);
        }
    }

    /// Dispatch everything ready now. Returns the number of events dispatched.
    pub fn drain<K: EventSink + ?Sized>(&mut self, sink: &mut K) -> usize {
        let mut dispatched = 0;
        while self.step(sink) == Step::Dispatched {
            dispatched += 1;
        }
        dispatched
    }

    fn shutdown<K: EventSink + ?Sized>(&mut self, sink: &mut K) {
        log::debug!("dispatcher shutting down");
        if self.config.drain_on_shutdown {
            let drained = self.drain(sink);
            log::debug!("drained {drained} events");
        }
    }

    /// Dispatch until every source is exhausted or shutdown is requested.
    ///
    /// Sources and registry are kept, so `run` can be called again.
    pub async fn run<K: EventSink + ?Sized>(
        &mut self,
        sink: &mut K,
        mut shutdown: ShutdownSignal,
    ) -> DispatcherStats {
        loop {
            if shutdown.is_requested() {
                self.shutdown(sink);
                break;
            }
            let mut last = Step::Idle;
            for _ in 0..self.config.batch_size {
                last = self.step(sink);
                if last != Step::Dispatched {
                    break;
                }
            }
            match last {
                Step::Exhausted => {
                    log::debug!("every source exhausted");
                    break;
                }
                Step::Dispatched => tokio::task::yield_now().await,
                Step::Idle => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.recv() => {
                            self.shutdown(sink);
                            break;
                        }
                    }
                }
            }
        }
        self.stats
    }
}
