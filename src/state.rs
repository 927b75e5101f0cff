// =============================================================================
// State store — the single authority every collaborator reads
// =============================================================================
//
// One in-process `SystemState` document behind a read-write lock. Writers
// (the session pipeline) apply brief deltas under the write lock; readers
// (the HTTP layer) copy a snapshot out. Disk is a persistence side-effect,
// not an inter-component channel: `live_state.json` is atomically replaced,
// debounced to at most one write per 250 ms, and reloaded on a mid-day
// restart so OPEN positions survive the process.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::engine::paper::PaperPosition;
use crate::types::{
    AgentStatus, Direction, ExitReason, Mode, OpenLocation, OpeningTrend, Pdc, PlanStatus,
    PositionStatus, RiskStatus,
};

/// Debounce window between persisted writes.
const PERSIST_DEBOUNCE_MS: u64 = 250;
/// Soft deadline for one persistence write.
const PERSIST_SOFT_DEADLINE_MS: u128 = 2_000;
/// Heartbeat age thresholds.
pub const AGENT_WARN_AFTER_MS: i64 = 10_000;
pub const AGENT_DOWN_AFTER_MS: i64 = 60_000;

// =============================================================================
// Document types (live_state.json schema)
// =============================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PnlState {
    pub day: f64,
    pub open: f64,
    pub realized: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskStateInfo {
    pub status: RiskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeat {
    pub status: AgentStatus,
    pub last_heartbeat_ts: String,
    pub last_heartbeat_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaState {
    pub mode: Mode,
    pub date: NaiveDate,
    /// Formatted IST wall/virtual clock at the last update.
    pub clock: String,
    pub sim: bool,
    pub plan_status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_built_at: Option<String>,
    pub plan_locked: bool,
    pub daily_risk_rs: f64,
    pub risk_per_trade_rs: f64,
    pub total_planned_risk_rs: f64,
    pub active_trades: u32,
    pub pnl: PnlState,
    pub risk_state: RiskStateInfo,
    /// Heartbeat of the external master-rebuild job, judged from its files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_agent: Option<AgentHeartbeat>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OhlcState {
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteState {
    pub ltp: f64,
    pub ohlc: OhlcState,
    pub volume: f64,
    pub change_pct: f64,
    pub last_update_ts: String,
    pub last_update_ms: i64,
}

/// When each tag was computed; stays for the day once set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagTimes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ot: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagState {
    #[serde(rename = "PDC")]
    pub pdc: Option<Pdc>,
    #[serde(rename = "OL")]
    pub ol: Option<OpenLocation>,
    #[serde(rename = "OT")]
    pub ot: Option<OpeningTrend>,
    #[serde(default)]
    pub computed_at: TagTimes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    pub status: PositionStatus,
    pub qty: u32,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub open_pnl_rs: f64,
    pub realized_pnl_rs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    /// Carried so a restart can rebuild the engine position exactly.
    pub detail: PaperPosition,
}

impl From<&PaperPosition> for PositionState {
    fn from(pos: &PaperPosition) -> Self {
        Self {
            status: pos.status,
            qty: pos.qty,
            direction: pos.direction,
            entry_price: pos.entry_price,
            stop: pos.stop,
            tp1: pos.tp1,
            tp2: pos.tp2,
            open_pnl_rs: pos.open_pnl,
            realized_pnl_rs: pos.realized_pnl,
            exit_reason: pos.exit_reason,
            detail: pos.clone(),
        }
    }
}

/// The whole shared document. BTreeMaps keep serialization byte-stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub meta: MetaState,
    pub quotes: BTreeMap<String, QuoteState>,
    pub tags: BTreeMap<String, TagState>,
    pub positions: BTreeMap<String, PositionState>,
    pub agents: BTreeMap<String, AgentHeartbeat>,
}

impl SystemState {
    pub fn new(mode: Mode, date: NaiveDate, risk_daily: f64, risk_per_trade: f64) -> Self {
        Self {
            meta: MetaState {
                mode,
                date,
                clock: String::new(),
                sim: mode.is_sim(),
                plan_status: PlanStatus::Missing,
                plan_built_at: None,
                plan_locked: false,
                daily_risk_rs: risk_daily,
                risk_per_trade_rs: risk_per_trade,
                total_planned_risk_rs: 0.0,
                active_trades: 0,
                pnl: PnlState::default(),
                risk_state: RiskStateInfo::default(),
                batch_agent: None,
            },
            quotes: BTreeMap::new(),
            tags: BTreeMap::new(),
            positions: BTreeMap::new(),
            agents: BTreeMap::new(),
        }
    }
}

// =============================================================================
// StateStore
// =============================================================================

/// Shared store: one writer per field family, many snapshot readers.
pub struct StateStore {
    inner: RwLock<SystemState>,
    version: AtomicU64,
    dirty: Notify,
    /// Set by the HTTP kill endpoint, consumed by the pipeline.
    kill_requested: AtomicBool,
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, initial: SystemState) -> Self {
        Self {
            inner: RwLock::new(initial),
            version: AtomicU64::new(1),
            dirty: Notify::new(),
            kill_requested: AtomicBool::new(false),
            path: path.into(),
        }
    }

    /// Reload a persisted document if it belongs to `date`.
    pub fn load_persisted(path: &Path, date: NaiveDate) -> Option<SystemState> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<SystemState>(&content) {
            Ok(state) if state.meta.date == date => {
                info!(path = %path.display(), "persisted live state reloaded");
                Some(state)
            }
            Ok(state) => {
                info!(found = %state.meta.date, expected = %date, "stale live state ignored");
                None
            }
            Err(e) => {
                warn!(error = %e, "unparseable live state ignored");
                None
            }
        }
    }

    /// Apply one delta atomically. Returns the new version.
    pub fn update(&self, f: impl FnOnce(&mut SystemState)) -> u64 {
        {
            let mut state = self.inner.write();
            f(&mut state);
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        self.dirty.notify_one();
        version
    }

    /// Immutable copy for readers.
    pub fn snapshot(&self) -> SystemState {
        self.inner.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    // ── Kill switch flag ────────────────────────────────────────────────

    pub fn request_kill(&self) {
        warn!("kill switch requested");
        self.kill_requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending kill request, if any.
    pub fn take_kill_request(&self) -> bool {
        self.kill_requested.swap(false, Ordering::SeqCst)
    }

    // ── Heartbeats ──────────────────────────────────────────────────────

    /// Record a component heartbeat. Status resets to OK; staleness is
    /// re-judged by `sweep_agents`.
    pub fn heartbeat(&self, component: &str, now_ms: i64, ts: String) {
        let mut state = self.inner.write();
        state.agents.insert(
            component.to_string(),
            AgentHeartbeat {
                status: AgentStatus::Ok,
                last_heartbeat_ts: ts,
                last_heartbeat_ms: now_ms,
            },
        );
        drop(state);
        self.version.fetch_add(1, Ordering::SeqCst);
        self.dirty.notify_one();
    }

    /// Re-grade every agent by heartbeat age and return the worst status.
    pub fn sweep_agents(&self, now_ms: i64) -> AgentStatus {
        let mut worst = AgentStatus::Ok;
        let mut state = self.inner.write();
        for hb in state.agents.values_mut() {
            let age = now_ms - hb.last_heartbeat_ms;
            hb.status = if age > AGENT_DOWN_AFTER_MS {
                AgentStatus::Down
            } else if age > AGENT_WARN_AFTER_MS {
                AgentStatus::Warn
            } else {
                AgentStatus::Ok
            };
            worst = worst_of(worst, hb.status);
        }
        worst
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Atomic write-tmp-then-rename of the whole document, with a soft
    /// deadline warning.
    pub fn persist_now(&self) -> Result<()> {
        let started = std::time::Instant::now();

        let content = {
            let state = self.inner.read();
            serde_json::to_string_pretty(&*state).context("failed to serialize live state")?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename into {}", self.path.display()))?;

        let elapsed = started.elapsed().as_millis();
        if elapsed > PERSIST_SOFT_DEADLINE_MS {
            warn!(elapsed_ms = elapsed as u64, "live state persistence exceeded soft deadline");
        }
        Ok(())
    }

    /// Persistence loop: wake on dirty, coalesce for the debounce window,
    /// write, repeat. Writes a final document on shutdown.
    pub async fn run_persistence(&self, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), debounce_ms = PERSIST_DEBOUNCE_MS, "persistence task started");
        loop {
            tokio::select! {
                _ = self.dirty.notified() => {
                    tokio::time::sleep(std::time::Duration::from_millis(PERSIST_DEBOUNCE_MS)).await;
                    if let Err(e) = self.persist_now() {
                        warn!(error = %e, "live state persistence failed");
                    }
                }
                _ = shutdown.changed() => {
                    if let Err(e) = self.persist_now() {
                        warn!(error = %e, "final live state persistence failed");
                    }
                    info!("persistence task stopped");
                    return;
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn worst_of(a: AgentStatus, b: AgentStatus) -> AgentStatus {
    use AgentStatus::*;
    match (a, b) {
        (Down, _) | (_, Down) => Down,
        (Warn, _) | (_, Warn) => Warn,
        _ => Ok,
    }
}
