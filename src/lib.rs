//! syswatch rebuilds process state from syscall records and matches rules on it.
//!
//! The work is split across the workspace:
//!
//! - [`event_wire`] decodes the binary records produced by the probes,
//! - [`syswatch_core`] keeps the thread registry up to date and dispatches every
//!   event in timestamp order,
//! - [`filtercheck`] compiles the rule conditions.
//!
//! This crate glues them into the `syswatch-replay` binary: it loads the
//! [configuration](config), the [rules](rules), replays capture files through a
//! [`Dispatcher`](syswatch_core::Dispatcher) and reports matches with the [sink].
//!
//! ```sh
//! syswatch-replay --rules rules/ --config syswatch.ini cpu0.cap cpu1.cap
//! ```

pub mod cli;
pub mod config;
pub mod rules;
pub mod sink;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Set up `env_logger` for the replay tool.
///
/// Rule matches are logged at `warn` and event lines at `info`, so `info` is the
/// floor unless `-v` flags raise it. `RUST_LOG` filters take precedence over both.
pub fn init_logger(verbosity: Option<log::LevelFilter>) {
    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.filter_level(verbosity.unwrap_or(log::LevelFilter::Info)),
    };
    builder.init();
}
