use std::{env, ffi::OsString, path::PathBuf};

use clap::{ArgAction, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "syswatch-replay", version = crate::metadata::VERSION)]
#[command(about = "Replay captured syscall records through the rules")]
pub struct ReplayOpts {
    /// INI configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Rules file, or directory searched for `*.yaml` rule files
    #[arg(long)]
    pub rules: Option<PathBuf>,
    /// Log every event, not only rule matches
    #[arg(long)]
    pub print_events: bool,
    /// Seed the thread registry with the processes running on this machine
    #[arg(long)]
    pub procfs: bool,
    /// Pass many times for a more verbose output. Passing `-v` adds debug logs, `-vv` enables trace logging
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    /// Capture files, one per source
    #[arg(required = true)]
    pub captures: Vec<PathBuf>,
}

impl ReplayOpts {
    pub fn override_log_level(&self) -> Option<log::LevelFilter> {
        match self.verbose {
            0 => None,
            1 => Some(log::LevelFilter::Debug),
            2..=u8::MAX => Some(log::LevelFilter::Trace),
        }
    }
}

pub fn parse_from_args() -> ReplayOpts {
    ReplayOpts::parse()
}

pub fn try_parse_from<I, T>(args: I) -> Result<ReplayOpts, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    ReplayOpts::try_parse_from(args)
}

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    matches!(env::var("RUST_BACKTRACE"), Ok(value) if value == "1")
}

pub fn report_error(e: &anyhow::Error) {
    if show_backtrace() {
        log::error!("{:?}", e);
    } else {
        log::error!("{:#}", e);
    }
}
