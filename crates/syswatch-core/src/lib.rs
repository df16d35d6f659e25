//! Userspace side of syswatch: turns decoded records into enriched events.
//!
//! - [`registry`] keeps every known thread and thread group, updated by the
//!   [`updates`] derived from clone, exec, exit and descriptor events.
//! - [`fields`] resolves filter fields of an event against the registry.
//! - [`dispatcher`] merges the record streams of all producers in timestamp order,
//!   applies each event to the registry and hands it to a sink.
//! - [`procfs`] seeds the registry with the processes running at startup.

pub mod config;
pub mod dispatcher;
pub mod fields;
pub mod procfs;
pub mod registry;
pub mod shutdown;
pub mod thread;
pub mod updates;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, SectionConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, EventSink, EventSource, Step};
pub use fields::{EventContext, FieldTable};
pub use registry::{RegistryConfig, ThreadRegistry};
pub use shutdown::{ShutdownSender, ShutdownSignal};
pub use thread::{ThreadInfo, Tid};
