//! mimir-simulator - multi-protocol exchange simulator
//!
//! Binds one listener per enabled protocol and answers as the exchange
//! would: acks, probabilistic fills, cancels, replaces. Every message in
//! both directions lands in the journal; `mimir-journal` replays it.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use mimir_bins::common;
use mimir_core::journal::Journal;
use mimir_core::net::spawn_engine;
use mimir_core::session::LoggingListener;
use mimir_protocols::engine::EngineHandles;
use mimir_protocols::fix::FixEngine;
use mimir_protocols::ilink::IlinkEngine;
use mimir_protocols::optiq::OptiqEngine;
use mimir_protocols::ouch::{Ouch42Engine, Ouch50Engine};
use mimir_protocols::pillar::PillarEngine;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-protocol exchange simulator")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Journal directory (overrides the config)
    #[arg(short, long)]
    journal_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    common::init_logging(&args.log_level, args.json_logs)?;

    let mut config = common::load_config(args.config.as_deref())?;
    if let Some(dir) = args.journal_dir {
        config.journal_dir = dir;
    }

    let journal = Journal::open(&config.journal_dir)
        .with_context(|| format!("opening journal at {}", config.journal_dir.display()))?;
    tracing::info!(
        dir = %config.journal_dir.display(),
        streams = journal.stream_names().len(),
        entries = journal.entry_count(None),
        "journal ready"
    );

    let handles = EngineHandles::new(config.clone(), journal, Arc::new(LoggingListener));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
        })
        .context("installing ctrl-c handler")?;
    }

    let mut engines = Vec::new();
    let addr = config.listen_addr.clone();

    if let Some(port) = config.fix.port {
        let listener = bind(&addr, port, "fix")?;
        let handles = Arc::clone(&handles);
        let fix_config = config.fix.clone();
        engines.push(spawn_engine(
            format!("fix-{}", fix_config.begin_string),
            listener,
            move |_peer| Ok(FixEngine::new(Arc::clone(&handles), fix_config.clone())),
            Arc::clone(&shutdown),
        ));
    }

    if let Some(port) = config.ouch42.port {
        let listener = bind(&addr, port, "ouch42")?;
        let handles = Arc::clone(&handles);
        engines.push(spawn_engine(
            "ouch42".to_string(),
            listener,
            move |peer| Ok(Ouch42Engine::new(Arc::clone(&handles), peer)),
            Arc::clone(&shutdown),
        ));
    }

    if let Some(port) = config.ouch50.port {
        let listener = bind(&addr, port, "ouch50")?;
        let handles = Arc::clone(&handles);
        engines.push(spawn_engine(
            "ouch50".to_string(),
            listener,
            move |peer| Ok(Ouch50Engine::new(Arc::clone(&handles), peer)),
            Arc::clone(&shutdown),
        ));
    }

    if let Some(port) = config.ilink.port {
        let listener = bind(&addr, port, "ilink3")?;
        let handles = Arc::clone(&handles);
        let ilink_config = config.ilink.clone();
        engines.push(spawn_engine(
            "ilink3".to_string(),
            listener,
            move |peer| {
                Ok(IlinkEngine::new(
                    Arc::clone(&handles),
                    ilink_config.clone(),
                    peer,
                ))
            },
            Arc::clone(&shutdown),
        ));
    }

    if let Some(port) = config.optiq.port {
        let listener = bind(&addr, port, "optiq")?;
        let handles = Arc::clone(&handles);
        engines.push(spawn_engine(
            "optiq".to_string(),
            listener,
            move |peer| Ok(OptiqEngine::new(Arc::clone(&handles), peer)),
            Arc::clone(&shutdown),
        ));
    }

    if let Some(port) = config.pillar.port {
        let listener = bind(&addr, port, "pillar")?;
        let handles = Arc::clone(&handles);
        engines.push(spawn_engine(
            "pillar".to_string(),
            listener,
            move |peer| Ok(PillarEngine::new(Arc::clone(&handles), peer)),
            Arc::clone(&shutdown),
        ));
    }

    if engines.is_empty() {
        anyhow::bail!("no listeners enabled; every protocol port is null");
    }
    tracing::info!(engines = engines.len(), "simulator running");

    for engine in engines {
        engine.join().ok();
    }

    tracing::info!(
        orders = handles.registry.total_count(),
        active = handles.registry.active_count(),
        journal_entries = handles.journal.entry_count(None),
        "simulator stopped"
    );
    Ok(())
}

fn bind(addr: &str, port: u16, what: &str) -> Result<TcpListener> {
    TcpListener::bind((addr, port)).with_context(|| format!("binding {what} on {addr}:{port}"))
}
