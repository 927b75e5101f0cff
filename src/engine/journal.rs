// =============================================================================
// Fill journal — append-only JSONL record of every simulated execution
// =============================================================================
//
// One line per fill, `journal/fills_YYYY-MM-DD.jsonl`. Appends go straight to
// disk so the journal survives a crash; the in-memory copy backs the API and
// tests. Cancellations are not fills and never appear here.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::types::Side;

/// A single simulated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub qty: u32,
    pub price: f64,
    /// IST timestamp string.
    pub ts: String,
    /// What produced the fill: ENTRY, TP1, TP2, SL, TIME, KILL.
    pub reason: String,
}

/// Append-only journal for one trading day.
pub struct FillJournal {
    path: PathBuf,
    fills: RwLock<Vec<Fill>>,
}

impl FillJournal {
    /// Open (and on `reset`, truncate) the day's journal. Existing rows are
    /// loaded so a mid-day restart keeps its history visible.
    pub fn open(dir: impl AsRef<Path>, date: NaiveDate, reset: bool) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(format!("fills_{date}.jsonl"));

        if reset && path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to reset {}", path.display()))?;
        }

        let mut fills = Vec::new();
        if let Ok(content) = std::fs::read_to_string(&path) {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<Fill>(line) {
                    Ok(fill) => fills.push(fill),
                    Err(e) => error!(error = %e, "skipping unparseable journal line"),
                }
            }
            if !fills.is_empty() {
                info!(path = %path.display(), fills = fills.len(), "fill journal resumed");
            }
        }

        Ok(Self {
            path,
            fills: RwLock::new(fills),
        })
    }

    /// Record a fill. Disk failure is logged, never fatal — the in-memory
    /// journal stays authoritative for the session.
    pub fn append(&self, fill: Fill) {
        match serde_json::to_string(&fill) {
            Ok(line) => {
                let written = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .and_then(|mut f| writeln!(f, "{line}"));
                if let Err(e) = written {
                    error!(error = %e, path = %self.path.display(), "journal append failed");
                }
            }
            Err(e) => error!(error = %e, "journal serialization failed"),
        }
        self.fills.write().push(fill);
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.fills.read().clone()
    }

    pub fn len(&self) -> usize {
        self.fills.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.read().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
