// =============================================================================
// Plan snapshot — the day's immutable trading directive
// =============================================================================
//
// Built exactly once at 09:40 and written to
// `plan_snapshot_{YYYY-MM-DD}.json` with the atomic tmp + rename pattern.
// Once locked in a READY/READY_PARTIAL status nothing may mutate it — an
// attempted re-install is an invariant breach, not a retry.
//
// Writes retry three times with one-second backoff; if the disk stays
// unwritable the snapshot is marked FAILED and the caller halts new trading.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::{FreqLevel, Mode, OpenLocation, OpeningTrend, Pdc, Pick, PlanStatus};

/// The tag tuple recorded alongside each plan row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTags {
    #[serde(rename = "PrevDayContext")]
    pub prev_day_context: Option<Pdc>,
    #[serde(rename = "OpenLocation")]
    pub open_location: Option<OpenLocation>,
    #[serde(rename = "OpeningTrend")]
    pub opening_trend: Option<OpeningTrend>,
}

/// Per-symbol directive. Prices are zero on ABSTAIN rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRow {
    pub symbol: String,
    pub pick: Pick,
    /// 0–100.
    pub confidence: f64,
    pub level: FreqLevel,
    pub samples: u32,
    pub entry: f64,
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    pub qty: u32,
    pub r_per_share: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub tags: PlanTags,
}

/// The aggregated portfolio directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioPlan {
    pub date: NaiveDate,
    pub daily_risk_rs: f64,
    pub risk_per_trade_rs: f64,
    pub total_planned_risk_rs: f64,
    pub active_trades: u32,
    /// Sorted by symbol so serialization is byte-stable across runs.
    pub plans: Vec<PlanRow>,
}

/// The whole per-day artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub date: NaiveDate,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
    pub status: PlanStatus,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_plan: Option<PortfolioPlan>,
}

impl PlanSnapshot {
    pub fn missing(date: NaiveDate, mode: Mode) -> Self {
        Self {
            date,
            mode,
            built_at: None,
            status: PlanStatus::Missing,
            locked: false,
            portfolio_plan: None,
        }
    }

    /// Find a symbol's row, if the plan carries one.
    pub fn row(&self, symbol: &str) -> Option<&PlanRow> {
        self.portfolio_plan
            .as_ref()?
            .plans
            .iter()
            .find(|r| r.symbol == symbol)
    }
}

// =============================================================================
// SnapshotStore
// =============================================================================

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);

/// Owns the day's snapshot record and its on-disk artifact.
pub struct SnapshotStore {
    dir: PathBuf,
    current: RwLock<PlanSnapshot>,
}

impl SnapshotStore {
    /// Open the store for `date`, reloading an existing artifact (mid-day
    /// restart) or starting from MISSING.
    pub fn open(dir: impl Into<PathBuf>, date: NaiveDate, mode: Mode) -> Self {
        let dir = dir.into();
        let path = snapshot_path(&dir, date);

        let current = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PlanSnapshot>(&content) {
                Ok(snap) if snap.date == date => {
                    info!(path = %path.display(), status = %snap.status, "existing plan snapshot reloaded");
                    snap
                }
                Ok(snap) => {
                    warn!(found = %snap.date, expected = %date, "stale plan snapshot ignored");
                    PlanSnapshot::missing(date, mode)
                }
                Err(e) => {
                    warn!(error = %e, "unparseable plan snapshot ignored");
                    PlanSnapshot::missing(date, mode)
                }
            },
            Err(_) => PlanSnapshot::missing(date, mode),
        };

        Self {
            dir,
            current: RwLock::new(current),
        }
    }

    pub fn current(&self) -> PlanSnapshot {
        self.current.read().clone()
    }

    /// Install and persist the built snapshot. Refuses to touch a locked
    /// snapshot: that is the immutability invariant, and a breach is fatal
    /// for the trading day.
    ///
    /// The write runs on the blocking pool and the retry backoff sleeps
    /// through tokio, so a failing disk never stalls the session pipeline.
    pub async fn install(&self, snapshot: PlanSnapshot) -> Result<()> {
        {
            let current = self.current.read();
            if current.locked && current.status.is_ready() {
                bail!(
                    "plan snapshot for {} is locked; refusing mutation",
                    current.date
                );
            }
        }

        let path = snapshot_path(&self.dir, snapshot.date);
        let content = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialize plan snapshot")?;

        let mut last_err = None;
        for attempt in 1..=WRITE_ATTEMPTS {
            let write_path = path.clone();
            let write_content = content.clone();
            let written =
                tokio::task::spawn_blocking(move || write_atomic(&write_path, &write_content))
                    .await
                    .unwrap_or_else(|e| Err(anyhow::anyhow!("snapshot write task failed: {e}")));

            match written {
                Ok(()) => {
                    info!(
                        path = %path.display(),
                        status = %snapshot.status,
                        locked = snapshot.locked,
                        "plan snapshot written"
                    );
                    *self.current.write() = snapshot;
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "plan snapshot write failed");
                    last_err = Some(e);
                    if attempt < WRITE_ATTEMPTS {
                        tokio::time::sleep(WRITE_BACKOFF).await;
                    }
                }
            }
        }

        error!("plan snapshot write exhausted retries; marking FAILED");
        self.mark_failed();
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("snapshot write failed")))
    }

    /// Record a FAILED snapshot in memory (disk may be the thing that broke).
    pub fn mark_failed(&self) {
        let mut current = self.current.write();
        if !(current.locked && current.status.is_ready()) {
            current.status = PlanStatus::Failed;
            current.locked = false;
            current.portfolio_plan = None;
        }
    }
}

fn snapshot_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("plan_snapshot_{date}.json"))
}

/// Write-tmp-then-rename so readers never observe a torn document.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}
