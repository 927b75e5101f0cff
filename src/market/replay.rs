// =============================================================================
// Replay and CSV-poll tick producers
// =============================================================================
//
// Replay (SIM): the whole day's intraday CSVs are synthesized into one sorted
// tick queue up front. Draining the queue advances the virtual clock, so the
// entire session — cutovers included — plays back deterministically: same
// input files + same seed ⇒ same tick sequence ⇒ same snapshot and journal.
//
// CSV poll (LIVE/PAPER with ENABLE_AGG5): the intraday files are appended by
// an external collaborator; this task re-reads them on a fixed cadence and
// pushes ticks for newly appeared bars into the live channel. Read failures
// back off exponentially (5 s doubling to 60 s) and recover silently.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{format_ist, SessionClock, VirtualClockHandle};
use crate::config::Config;
use crate::market::intraday::{read_intraday_csv, synthesize_ticks};
use crate::market::tick_source::{LiveTickHandle, Tick};
use crate::state::StateStore;

/// Stable per-symbol RNG so adding a symbol to the universe never perturbs
/// another symbol's tick path.
fn symbol_rng(seed: u64, symbol: &str) -> StdRng {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    symbol.hash(&mut hasher);
    StdRng::seed_from_u64(seed ^ hasher.finish())
}

// =============================================================================
// Replay source
// =============================================================================

/// Pre-synthesized tick queue for one session. Popping a tick advances the
/// virtual clock to its timestamp.
pub struct ReplayTickSource {
    ticks: VecDeque<Tick>,
    clock: VirtualClockHandle,
}

impl ReplayTickSource {
    /// Build the queue for `date` from the configured intraday files.
    /// Symbols without a file for the day are skipped with a warning.
    pub fn build(
        cfg: &Config,
        date: NaiveDate,
        clock: VirtualClockHandle,
    ) -> Result<Self> {
        let mut symbols = cfg.symbols.clone();
        symbols.sort();

        let mut ticks: Vec<Tick> = Vec::new();
        for symbol in &symbols {
            let path = cfg.paths.intraday_csv(symbol);
            let rows = match read_intraday_csv(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "no intraday data for replay");
                    continue;
                }
            };

            let mut rng = symbol_rng(cfg.engine.replay_seed, symbol);
            let mut bars = 0usize;
            for row in rows.iter().filter(|r| r.date() == date) {
                ticks.extend(synthesize_ticks(symbol, row, &mut rng));
                bars += 1;
            }
            debug!(symbol = %symbol, bars, "replay ticks synthesized");
        }

        // Deterministic global order: by timestamp, symbol breaking ties.
        ticks.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.symbol.cmp(&b.symbol)));

        info!(date = %date, ticks = ticks.len(), "replay queue ready");
        Ok(Self {
            ticks: ticks.into(),
            clock,
        })
    }

    pub fn next(&mut self) -> Option<Tick> {
        let tick = self.ticks.pop_front()?;
        self.clock.advance_to(tick.ts);
        Some(tick)
    }

    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }
}

// =============================================================================
// CSV poll producer (live/paper)
// =============================================================================

const POLL_BASE_SECS: u64 = 5;
const POLL_MAX_SECS: u64 = 60;

/// Poll the intraday CSVs and push ticks for newly appended bars of the
/// current session. Runs until shutdown.
pub async fn run_csv_poll(
    cfg: Arc<Config>,
    clock: SessionClock,
    handle: LiveTickHandle,
    state: Arc<StateStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut symbols = cfg.symbols.clone();
    symbols.sort();

    // Last bar timestamp already emitted, per symbol.
    let mut seen: HashMap<String, i64> = HashMap::new();
    let mut rngs: HashMap<String, StdRng> = symbols
        .iter()
        .map(|s| (s.clone(), symbol_rng(cfg.engine.replay_seed, s)))
        .collect();

    let mut delay = POLL_BASE_SECS;
    info!(interval_secs = POLL_BASE_SECS, "intraday CSV poll producer started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
        }

        let today = clock.today();
        let mut healthy = true;

        for symbol in &symbols {
            let path = cfg.paths.intraday_csv(symbol);
            let rows = match read_intraday_csv(&path) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "intraday poll read failed");
                    healthy = false;
                    continue;
                }
            };

            let last_seen = seen.get(symbol).copied().unwrap_or(i64::MIN);
            let Some(rng) = rngs.get_mut(symbol) else {
                continue;
            };
            let mut newest = last_seen;

            for row in rows
                .iter()
                .filter(|r| r.date() == today && r.ts_ms > last_seen)
            {
                for tick in synthesize_ticks(symbol, row, rng) {
                    if !handle.push(tick) {
                        debug!("live tick channel closed, poll producer exiting");
                        return;
                    }
                }
                newest = newest.max(row.ts_ms);
            }
            if newest > last_seen {
                seen.insert(symbol.clone(), newest);
            }
        }

        if healthy {
            // Source liveness, not data freshness: a quiet 5-minute stretch
            // between bar closes is not an outage.
            state.heartbeat("tick_source", clock.now_millis(), format_ist(clock.now()));
            delay = POLL_BASE_SECS;
        } else {
            delay = (delay * 2).min(POLL_MAX_SECS);
        }
    }

    info!("intraday CSV poll producer stopped");
}
