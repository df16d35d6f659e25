use anyhow::{Context, Result};
use event_wire::CaptureReader;
use syswatch::{
    cli::{self, ReplayOpts},
    config::SyswatchConfig,
    rules::{compile_rules, load_user_rules},
    sink::RuleSink,
};
use syswatch_core::{Dispatcher, FieldTable, ShutdownSignal, ThreadRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli::parse_from_args();

    // Override the default log_level if there is a greater verbosity flag
    syswatch::init_logger(options.override_log_level());

    match run_replay(options).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            cli::report_error(&e);
            std::process::exit(1);
        }
    }
}

async fn run_replay(options: ReplayOpts) -> Result<()> {
    let config = match &options.config {
        Some(path) => SyswatchConfig::from_file(path)?,
        None => SyswatchConfig::default(),
    };
    let limits = config.wire_limits()?;

    let fields = FieldTable::new();
    let user_rules = match &options.rules {
        Some(path) => load_user_rules(path)
            .with_context(|| format!("Error loading rules from {}", path.display()))?,
        None => Vec::new(),
    };
    let ruleset = compile_rules(user_rules, &fields)?;
    log::info!("loaded {} rules", ruleset.len());

    let mut registry = ThreadRegistry::new(config.registry()?);
    if options.procfs {
        registry
            .load_from_procfs()
            .context("Error reading running processes")?;
    }

    let mut dispatcher = Dispatcher::new(registry, config.dispatcher()?).with_wire_limits(limits);
    for path in &options.captures {
        let capture = CaptureReader::from_file(path)
            .with_context(|| format!("Error reading capture {}", path.display()))?;
        let source = dispatcher.add_source(capture);
        log::debug!("source {source}: {}", path.display());
    }

    let (shutdown_tx, shutdown) = ShutdownSignal::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, stopping");
            shutdown_tx.send_signal();
        }
    });

    let mut sink = RuleSink::new(ruleset, options.print_events);
    let stats = dispatcher.run(&mut sink, shutdown).await;
    let registry = dispatcher.registry().stats();
    log::info!(
        "{} events dispatched, {} corrupt records, {} rule matches",
        stats.dispatched,
        stats.corrupt,
        sink.matches()
    );
    log::debug!("dispatcher: {stats:?}");
    log::debug!("registry: {registry:?}");
    Ok(())
}
