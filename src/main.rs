// =============================================================================
// Probedge — Main Entry Point
// =============================================================================
//
// Intraday equities decision terminal: aggregates 5-minute bars for a fixed
// universe, classifies each session with three tags at hard IST cutovers,
// freezes an immutable 09:40 plan from the historical tag-frequency table,
// and paper-trades that plan until the 15:05 force-flat.
//
// Modes: SIM replays a recorded day deterministically on a virtual clock;
// PAPER/LIVE run on wall time with the CSV poll producer feeding ticks.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod clock;
mod config;
mod engine;
mod error;
mod freq;
mod market;
mod plan;
mod session;
mod state;
mod tags;
mod timeline;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiContext};
use crate::clock::{format_ist, millis_at, SessionClock};
use crate::config::Config;
use crate::engine::journal::FillJournal;
use crate::engine::paper::PaperEngine;
use crate::error::StartupError;
use crate::freq::FreqTable;
use crate::market::intraday::read_intraday_csv;
use crate::market::master::MasterTable;
use crate::market::replay::{run_csv_poll, ReplayTickSource};
use crate::market::tick_source::{live_channel, TickFeed};
use crate::plan::snapshot::SnapshotStore;
use crate::session::{run_clock_loop, run_ingestion, run_replay_session, SessionPipeline};
use crate::state::{AgentHeartbeat, StateStore, SystemState};
use crate::timeline::TimelineGate;
use crate::types::{AgentStatus, Mode, RiskStatus};

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        if let Some(startup) = e.downcast_ref::<StartupError>() {
            error!(error = %startup, "startup failed");
            std::process::exit(startup.exit_code());
        }
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Probedge Decision Terminal — Starting Up          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 1. Configuration & environment ───────────────────────────────────
    let config_path =
        std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let mut cfg = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path)
            .map_err(|e| StartupError::Config(format!("{e:#}")))?
    } else {
        warn!(path = %config_path, "config file not found, using defaults");
        Config::default()
    };
    cfg.apply_env()?;
    cfg.validate()?;
    let cfg = Arc::new(cfg);

    info!(
        mode = %cfg.mode,
        symbols = ?cfg.symbols,
        daily_risk_rs = cfg.risk.daily_rs,
        per_trade_rs = cfg.risk.per_trade_rs,
        "configuration resolved"
    );

    // ── 2. Clock & trading date ──────────────────────────────────────────
    let (clock, date, virtual_handle) = match cfg.mode {
        Mode::Sim => {
            let date = latest_session_date(&cfg).ok_or_else(|| {
                StartupError::MissingDependency(
                    "no intraday data found to replay".to_string(),
                )
            })?;
            let start = millis_at(date, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            let (clock, handle) = SessionClock::virtual_at(start);
            info!(date = %date, "virtual clock initialised for replay");
            (clock, date, Some(handle))
        }
        Mode::Live | Mode::Paper => {
            let clock = SessionClock::wall();
            let date = clock.today();
            (clock, date, None)
        }
    };

    // ── 3. Masters & frequency table ─────────────────────────────────────
    let (masters, missing) = MasterTable::load(&cfg.paths, &cfg.symbols);
    if masters.is_empty() {
        return Err(StartupError::MissingDependency(
            "no prior-day masters available for any symbol".to_string(),
        )
        .into());
    }
    if !missing.is_empty() {
        warn!(symbols = ?missing, "symbols without masters will carry null tags");
    }
    let masters = Arc::new(masters);
    let freq = Arc::new(FreqTable::from_masters(&masters, &cfg.symbols));

    // ── 4. State store (with mid-day restart reload) ─────────────────────
    let state_path = cfg.paths.state.join("live_state.json");
    let restored = if cfg.reset_state {
        info!("RESET_STATE set; discarding persisted live state");
        None
    } else {
        StateStore::load_persisted(&state_path, date)
    };
    let fresh_start = restored.is_none();
    let mut initial = restored.unwrap_or_else(|| {
        SystemState::new(cfg.mode, date, cfg.risk.daily_rs, cfg.risk.per_trade_rs)
    });
    initial.meta.mode = cfg.mode;
    initial.meta.sim = cfg.mode.is_sim();
    initial.meta.batch_agent = batch_agent_heartbeat(&cfg, &clock);
    let state = Arc::new(StateStore::new(state_path, initial));

    // ── 5. Plan snapshot store & fill journal ────────────────────────────
    let snapshots = Arc::new(SnapshotStore::open(
        cfg.paths.state.clone(),
        date,
        cfg.mode,
    ));
    let journal = Arc::new(
        FillJournal::open(&cfg.paths.journal, date, cfg.reset_state || cfg.mode.is_sim())
            .context("failed to open fill journal")?,
    );

    // ── 6. Paper engine (re-adopting persisted positions) ────────────────
    let gate = TimelineGate::new(cfg.cutovers);
    let mut paper = PaperEngine::new(gate, cfg.risk.daily_rs, journal.clone());
    if !fresh_start {
        let snapshot = state.snapshot();
        paper.adopt(snapshot.positions.values().map(|p| p.detail.clone()));
        if snapshot.meta.risk_state.status == RiskStatus::Halted {
            paper.restore_halt(
                snapshot
                    .meta
                    .risk_state
                    .reason
                    .clone()
                    .unwrap_or_else(|| "restored".to_string()),
            );
        }
    }
    {
        // A locked plan from before the restart re-arms any rows that have
        // no surviving position; nothing is double-opened.
        let snap = snapshots.current();
        if snap.locked && snap.status.is_ready() {
            if let Some(plan) = snap.portfolio_plan.as_ref() {
                paper.arm(plan);
            }
        }
    }

    // ── 7. Session pipeline ──────────────────────────────────────────────
    let pipeline = Arc::new(Mutex::new(SessionPipeline::new(
        cfg.clone(),
        clock.clone(),
        date,
        masters.clone(),
        freq.clone(),
        snapshots.clone(),
        state.clone(),
        paper,
    )));

    // ── 8. Shutdown signal, persistence, API server ──────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let persist_state = state.clone();
    let persist_shutdown = shutdown_rx.clone();
    let persistence = tokio::spawn(async move {
        persist_state.run_persistence(persist_shutdown).await;
    });

    let api_ctx = ApiContext {
        state: state.clone(),
        snapshots: snapshots.clone(),
        config: cfg.clone(),
    };
    let bind_addr = cfg.bind_addr.clone();
    tokio::spawn(async move {
        let app = router(api_ctx);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "API server listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind API server"),
        }
    });

    // ── 9. Drive the session ─────────────────────────────────────────────
    match cfg.mode {
        Mode::Sim => {
            let handle = virtual_handle.expect("SIM always runs the virtual clock");
            let replay = ReplayTickSource::build(&cfg, date, handle)
                .map_err(|e| StartupError::MissingDependency(format!("{e:#}")))?;

            run_replay_session(pipeline.clone(), TickFeed::Replay(replay)).await;

            let _ = shutdown_tx.send(true);
            let _ = persistence.await;
            info!(
                fills = journal.len(),
                realized_pnl = state.snapshot().meta.pnl.realized,
                "replay finished"
            );
        }
        Mode::Live | Mode::Paper => {
            let (tick_handle, feed) = live_channel();

            // Held so the feed stays open when no producer is spawned.
            let mut _external_handle = None;
            if cfg.enable_agg5 {
                tokio::spawn(run_csv_poll(
                    cfg.clone(),
                    clock.clone(),
                    tick_handle,
                    state.clone(),
                    shutdown_rx.clone(),
                ));
            } else {
                warn!("ENABLE_AGG5 off; no in-process tick producer spawned");
                _external_handle = Some(tick_handle);
            }

            let ingest = tokio::spawn(run_ingestion(
                pipeline.clone(),
                feed,
                shutdown_rx.clone(),
            ));
            let sweep = tokio::spawn(run_clock_loop(
                pipeline.clone(),
                clock.clone(),
                cfg.engine.cadence_secs,
                shutdown_rx.clone(),
            ));

            info!("all subsystems running; Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            warn!("shutdown signal received; stopping gracefully (positions stay as they are)");

            let _ = shutdown_tx.send(true);
            // Cooperative exit: in-flight cycles finish, then state persists.
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
                let _ = ingest.await;
                let _ = sweep.await;
                let _ = persistence.await;
            })
            .await;
        }
    }

    info!("Probedge shut down complete");
    Ok(())
}

// =============================================================================
// Startup helpers
// =============================================================================

/// The session a SIM run replays: the newest date present in the intraday
/// files.
fn latest_session_date(cfg: &Config) -> Option<NaiveDate> {
    let mut latest: Option<NaiveDate> = None;
    for symbol in &cfg.symbols {
        if let Ok(rows) = read_intraday_csv(cfg.paths.intraday_csv(symbol)) {
            if let Some(d) = rows.iter().map(|r| r.date()).max() {
                latest = Some(latest.map_or(d, |cur| cur.max(d)));
            }
        }
    }
    latest
}

/// Judge the overnight master-rebuild job by the age of its newest output.
fn batch_agent_heartbeat(cfg: &Config, clock: &SessionClock) -> Option<AgentHeartbeat> {
    let newest = cfg
        .symbols
        .iter()
        .filter_map(|s| std::fs::metadata(cfg.paths.master_csv(s)).ok())
        .filter_map(|m| m.modified().ok())
        .max()?;
    let modified_ms = newest
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_millis() as i64;

    let age_ms = clock.now_millis() - modified_ms;
    let day_ms = 24 * 60 * 60 * 1000;
    let status = if age_ms <= day_ms {
        AgentStatus::Ok
    } else if age_ms <= 3 * day_ms {
        AgentStatus::Warn
    } else {
        AgentStatus::Down
    };

    Some(AgentHeartbeat {
        status,
        last_heartbeat_ts: format_ist(crate::clock::ist_from_millis(modified_ms)),
        last_heartbeat_ms: modified_ms,
    })
}
