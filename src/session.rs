// =============================================================================
// Session pipeline — the single writer driving a trading day
// =============================================================================
//
// One struct owns the aggregator, the paper engine, and the cutover state,
// and is the only writer into the state store's market/tag/plan/position
// families. Two wirings share it:
//
//   LIVE/PAPER — an ingestion task feeds `on_tick`, a cadence task feeds
//                `on_clock` with wall time.
//   SIM        — the replay loop calls `on_tick` then `on_clock` inline with
//                virtual time, which makes the whole day a pure function of
//                the input files and the seed.
//
// Ordering inside `on_clock` is load-bearing: bars flush before cutovers
// fire, cutovers before the kill-switch check, the kill-switch before the
// force-flat sweep.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::{format_ist, ist_from_millis, millis_at, SessionClock};
use crate::config::Config;
use crate::engine::paper::PaperEngine;
use crate::freq::FreqTable;
use crate::market::bar_aggregator::{window_start, BarAggregator, BAR_DURATION_MS};
use crate::market::master::MasterTable;
use crate::market::tick_source::{Tick, TickFeed};
use crate::plan::builder::{PlanBuilder, SymbolInputs};
use crate::plan::snapshot::{PlanSnapshot, SnapshotStore};
use crate::state::{PnlState, PositionState, QuoteState, RiskStateInfo, StateStore};
use crate::tags::{classify_open_location, classify_opening_trend, classify_pdc};
use crate::timeline::{RevealField, TimelineGate};
use crate::types::{AgentStatus, PlanStatus, RiskStatus};

/// Bars in the opening range (09:15–09:40).
const OPENING_RANGE_BARS: i64 = 5;

pub struct SessionPipeline {
    cfg: Arc<Config>,
    clock: SessionClock,
    gate: TimelineGate,
    date: NaiveDate,
    masters: Arc<MasterTable>,
    freq: Arc<FreqTable>,
    snapshots: Arc<SnapshotStore>,
    state: Arc<StateStore>,
    aggregator: BarAggregator,
    engine: PaperEngine,
    pdc_done: bool,
    ol_done: bool,
    ot_done: bool,
    /// Set on an invariant breach; the pipeline stops trading but keeps
    /// serving state for post-mortem.
    fatal: bool,
}

impl SessionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        clock: SessionClock,
        date: NaiveDate,
        masters: Arc<MasterTable>,
        freq: Arc<FreqTable>,
        snapshots: Arc<SnapshotStore>,
        state: Arc<StateStore>,
        engine: PaperEngine,
    ) -> Self {
        // A mid-day restart must not refire cutovers that already ran:
        // computed_at stamps and the snapshot status carry that memory.
        let restored = state.snapshot();
        let pdc_done = restored.tags.values().any(|t| t.computed_at.pdc.is_some());
        let ol_done = restored.tags.values().any(|t| t.computed_at.ol.is_some());
        let ot_done = snapshots.current().status != PlanStatus::Missing
            || restored.tags.values().any(|t| t.computed_at.ot.is_some());

        if pdc_done || ol_done || ot_done {
            info!(pdc_done, ol_done, ot_done, "cutover state restored from persisted day");
        }

        let gate = TimelineGate::new(cfg.cutovers);
        Self {
            cfg,
            clock,
            gate,
            date,
            masters,
            freq,
            snapshots,
            state,
            aggregator: BarAggregator::new(),
            engine,
            pdc_done,
            ol_done,
            ot_done,
            fatal: false,
        }
    }

    pub fn clock(&self) -> SessionClock {
        self.clock.clone()
    }

    // ------------------------------------------------------------------------
    // Tick path
    // ------------------------------------------------------------------------

    pub fn on_tick(&mut self, tick: Tick) {
        if self.fatal {
            return;
        }
        let now = self.clock.now();
        self.state
            .heartbeat("tick_source", self.clock.now_millis(), format_ist(now));

        if let Err(e) = self.aggregator.on_tick(&tick) {
            self.fatal_halt(format!("bar invariant violated: {e}"));
            return;
        }

        self.publish_quote(&tick, now);

        if self.engine.on_quote(&tick.symbol, tick.ltp, now) {
            self.publish_positions();
        }
    }

    fn publish_quote(&self, tick: &Tick, now: DateTime<Tz>) {
        let day = self.aggregator.day(&tick.symbol);
        let prev_close = self
            .masters
            .prev_session(&tick.symbol, self.date)
            .map(|r| r.close);

        let reference = match prev_close {
            Some(pc) if pc > 0.0 => pc,
            _ => day.map(|d| d.open).unwrap_or(tick.ltp),
        };
        let change_pct = if reference > 0.0 {
            (tick.ltp - reference) / reference * 100.0
        } else {
            0.0
        };

        let symbol = tick.symbol.clone();
        let (ts, ltp, ts_string) = (tick.ts, tick.ltp, format_ist(ist_from_millis(tick.ts)));
        self.state.update(move |s| {
            s.meta.clock = format_ist(now);
            let quote = s.quotes.entry(symbol).or_insert(QuoteState {
                ltp,
                ohlc: Default::default(),
                volume: 0.0,
                change_pct: 0.0,
                last_update_ts: ts_string.clone(),
                last_update_ms: ts,
            });
            // Quote timestamps never run backwards; a late tick may widen the
            // day range (below) but not regress the last trade.
            if ts >= quote.last_update_ms {
                quote.ltp = ltp;
                quote.last_update_ms = ts;
                quote.last_update_ts = ts_string;
                quote.change_pct = change_pct;
            }
            if let Some(d) = day {
                quote.ohlc.o = d.open;
                quote.ohlc.h = d.high;
                quote.ohlc.l = d.low;
                quote.ohlc.c = d.last;
                quote.volume = d.volume;
            }
        });
    }

    // ------------------------------------------------------------------------
    // Clock path
    // ------------------------------------------------------------------------

    /// Clock sweep. When the 09:40 cutover builds a plan, the freshly built
    /// snapshot is returned to the caller, which must run
    /// `finish_plan_install` on it *outside* the pipeline lock — the
    /// snapshot write retries with one-second backoff and must never stall
    /// tick ingestion.
    #[must_use]
    pub fn on_clock(&mut self, now: DateTime<Tz>) -> Option<PlanSnapshot> {
        if self.fatal {
            return None;
        }
        let now_ms = now.timestamp_millis();

        if let Err(e) = self.aggregator.flush_until(now_ms) {
            self.fatal_halt(format!("bar invariant violated: {e}"));
            return None;
        }

        if !self.pdc_done && self.gate.reveal(RevealField::TagPdc, now) {
            self.fire_pdc(now);
        }
        if !self.ol_done && self.gate.reveal(RevealField::TagOl, now) {
            self.fire_ol(now);
        }
        let pending_plan = if !self.ot_done && self.gate.reveal(RevealField::TagOt, now) {
            Some(self.fire_ot_and_build_plan(now))
        } else {
            None
        };

        if self.state.take_kill_request() {
            self.engine.kill(now);
            self.publish_positions();
        }

        if self.engine.on_time(now) {
            self.publish_positions();
        }

        self.state
            .heartbeat("pipeline", now_ms, format_ist(now));

        // Staleness grading is a wall-time concern; virtual gaps between
        // replay ticks are not outages.
        if !self.cfg.mode.is_sim() {
            let worst = self.state.sweep_agents(now_ms);
            self.engine
                .set_inputs_ok(worst == AgentStatus::Ok && !self.fatal);
        }

        self.state.update(move |s| {
            s.meta.clock = format_ist(now);
        });

        pending_plan
    }

    // ------------------------------------------------------------------------
    // Cutovers
    // ------------------------------------------------------------------------

    fn fire_pdc(&mut self, now: DateTime<Tz>) {
        self.pdc_done = true;
        let ts = format_ist(now);
        let mut computed = 0usize;

        for symbol in self.cfg.symbols.clone() {
            let tag = self
                .masters
                .prev_session(&symbol, self.date)
                .and_then(classify_pdc);
            if tag.is_none() {
                warn!(symbol = %symbol, "no usable prior-day master; PDC stays null");
            } else {
                computed += 1;
            }
            let stamp = ts.clone();
            self.state.update(move |s| {
                let slot = s.tags.entry(symbol).or_default();
                if slot.computed_at.pdc.is_none() {
                    slot.pdc = tag;
                    slot.computed_at.pdc = Some(stamp);
                }
            });
        }
        info!(at = %ts, computed, universe = self.cfg.symbols.len(), "PDC cutover fired");
    }

    fn fire_ol(&mut self, now: DateTime<Tz>) {
        self.ol_done = true;
        let ts = format_ist(now);
        let mut computed = 0usize;

        for symbol in self.cfg.symbols.clone() {
            let today_open = self.aggregator.day(&symbol).map(|d| d.open);
            let tag = match (today_open, self.masters.prev_session(&symbol, self.date)) {
                (Some(open), Some(prev)) => classify_open_location(open, prev),
                _ => None,
            };
            if tag.is_none() {
                warn!(symbol = %symbol, "missing open or prior-day master; OL stays null");
            } else {
                computed += 1;
            }
            let stamp = ts.clone();
            self.state.update(move |s| {
                let slot = s.tags.entry(symbol).or_default();
                if slot.computed_at.ol.is_none() {
                    slot.ol = tag;
                    slot.computed_at.ol = Some(stamp);
                }
            });
        }
        info!(at = %ts, computed, universe = self.cfg.symbols.len(), "OL cutover fired");
    }

    /// The 09:40 cutover: OT tags, then the one plan build of the day.
    /// Returns the built snapshot for the caller to install; persistence
    /// (with its retry backoff) stays out of the pipeline lock.
    fn fire_ot_and_build_plan(&mut self, now: DateTime<Tz>) -> PlanSnapshot {
        self.ot_done = true;
        let ts = format_ist(now);

        let range_end = window_start(millis_at(self.date, self.gate.cutovers().ot));
        let range_start = range_end - OPENING_RANGE_BARS * BAR_DURATION_MS;

        // OT per symbol from the closed opening-range bars.
        for symbol in self.cfg.symbols.clone() {
            let bars = self.aggregator.bars_between(&symbol, range_start, range_end);
            let tag = classify_opening_trend(&bars, self.cfg.picker.ot_ret_threshold);
            if tag.is_none() {
                warn!(symbol = %symbol, "no opening-range bars; OT stays null");
            }
            let stamp = ts.clone();
            self.state.update(move |s| {
                let slot = s.tags.entry(symbol).or_default();
                if slot.computed_at.ot.is_none() {
                    slot.ot = tag;
                    slot.computed_at.ot = Some(stamp);
                }
            });
        }
        info!(at = %ts, "OT cutover fired");

        self.state.update(|s| {
            s.meta.plan_status = PlanStatus::Building;
        });

        // Gather inputs for every fully-tagged symbol.
        let tags_now = self.state.snapshot().tags;
        let mut gathered: Vec<(String, crate::types::Pdc, crate::types::OpenLocation, crate::types::OpeningTrend, Vec<crate::market::bar_aggregator::Bar>, f64)> =
            Vec::new();
        for symbol in &self.cfg.symbols {
            let Some(slot) = tags_now.get(symbol) else {
                continue;
            };
            let (Some(pdc), Some(ol), Some(ot)) = (slot.pdc, slot.ol, slot.ot) else {
                continue;
            };
            let Some(prev) = self.masters.prev_session(symbol, self.date) else {
                continue;
            };
            let bars = self.aggregator.bars_between(symbol, range_start, range_end);
            gathered.push((symbol.clone(), pdc, ol, ot, bars, prev.close));
        }

        let inputs: Vec<SymbolInputs<'_>> = gathered
            .iter()
            .map(|(symbol, pdc, ol, ot, bars, prev_close)| SymbolInputs {
                symbol: symbol.as_str(),
                pdc: *pdc,
                ol: *ol,
                ot: *ot,
                opening_bars: bars,
                prev_close: *prev_close,
            })
            .collect();

        let builder = PlanBuilder::new(self.freq.as_ref(), &self.cfg.risk, &self.cfg.picker);
        builder.build(
            self.date,
            self.cfg.mode,
            ts,
            inputs,
            self.cfg.symbols.len(),
        )
    }

    /// Second half of the 09:40 cutover, entered after the snapshot store
    /// has accepted or rejected the built plan: publish the plan metadata
    /// and arm the paper engine, or halt new trading on a write failure.
    fn apply_plan_result(&mut self, result: anyhow::Result<()>) {
        match result {
            Ok(()) => {
                let current = self.snapshots.current();
                let status = current.status;
                let locked = current.locked;
                let (total_risk, active) = current
                    .portfolio_plan
                    .as_ref()
                    .map(|p| (p.total_planned_risk_rs, p.active_trades))
                    .unwrap_or((0.0, 0));
                let built_at = current.built_at.clone();
                self.state.update(move |s| {
                    s.meta.plan_status = status;
                    s.meta.plan_built_at = built_at;
                    s.meta.plan_locked = locked;
                    s.meta.total_planned_risk_rs = total_risk;
                    s.meta.active_trades = active;
                });

                if TimelineGate::plan_visible(status, locked) {
                    if let Some(plan) = current.portfolio_plan.as_ref() {
                        self.engine.arm(plan);
                        self.publish_positions();
                    }
                } else {
                    warn!(%status, "plan not tradeable; paper engine stays idle");
                }
            }
            Err(e) => {
                error!(error = %e, "plan snapshot could not be persisted; halting new trading");
                self.state.update(|s| {
                    s.meta.plan_status = PlanStatus::Failed;
                    s.meta.plan_locked = false;
                    s.meta.risk_state = RiskStateInfo {
                        status: RiskStatus::Halted,
                        reason: Some("snapshot_write_failed".to_string()),
                    };
                });
            }
        }
    }

    // ------------------------------------------------------------------------
    // Publishing & failure
    // ------------------------------------------------------------------------

    fn publish_positions(&self) {
        let positions: std::collections::BTreeMap<String, PositionState> = self
            .engine
            .positions()
            .iter()
            .map(|(symbol, pos)| (symbol.clone(), PositionState::from(pos)))
            .collect();
        let realized = self.engine.realized_pnl();
        let open = self.engine.open_pnl();
        let (halted, reason) = self.engine.halt();
        let risk_state = if halted {
            RiskStateInfo {
                status: RiskStatus::Halted,
                reason: reason.map(str::to_string),
            }
        } else {
            RiskStateInfo::default()
        };

        self.state.update(move |s| {
            s.positions = positions;
            s.meta.pnl = PnlState {
                day: realized + open,
                open,
                realized,
            };
            s.meta.risk_state = risk_state;
        });
    }

    /// Invariant breach: stop trading, keep the state readable, leave the
    /// evidence on disk.
    fn fatal_halt(&mut self, reason: String) {
        error!(reason = %reason, "fatal invariant violation; trading halted");
        self.fatal = true;
        self.engine.set_inputs_ok(false);
        self.state.update(move |s| {
            s.meta.risk_state = RiskStateInfo {
                status: RiskStatus::Halted,
                reason: Some(reason),
            };
        });
    }

    /// End of a replay stream: advance to at least the force-flat time so
    /// TIME exits fire even when the input data stops early.
    #[must_use]
    pub fn finish_session(&mut self) -> Option<PlanSnapshot> {
        let eod_ms = millis_at(self.date, self.gate.cutovers().eod_flatten);
        let now_ms = self.clock.now_millis().max(eod_ms);
        self.on_clock(ist_from_millis(now_ms))
    }
}

// =============================================================================
// Runners
// =============================================================================

/// Persist a freshly built plan and feed the outcome back into the pipeline.
/// Runs with the pipeline unlocked: the write retries (1 s backoff, up to
/// three attempts) must not stall tick ingestion.
async fn finish_plan_install(pipeline: &Arc<Mutex<SessionPipeline>>, snapshot: PlanSnapshot) {
    let store = pipeline.lock().snapshots.clone();
    let result = store.install(snapshot).await;
    pipeline.lock().apply_plan_result(result);
}

/// SIM: drain the replay feed, interleaving clock work after every tick.
pub async fn run_replay_session(pipeline: Arc<Mutex<SessionPipeline>>, mut feed: TickFeed) {
    info!("replay session starting");
    while let Some(tick) = feed.next().await {
        let pending = {
            let mut p = pipeline.lock();
            p.on_tick(tick);
            let now = p.clock().now();
            p.on_clock(now)
        };
        if let Some(snapshot) = pending {
            finish_plan_install(&pipeline, snapshot).await;
        }
    }
    let pending = pipeline.lock().finish_session();
    if let Some(snapshot) = pending {
        finish_plan_install(&pipeline, snapshot).await;
    }
    info!("replay session complete");
}

/// LIVE/PAPER: feed ticks into the pipeline until shutdown or end of stream.
pub async fn run_ingestion(
    pipeline: Arc<Mutex<SessionPipeline>>,
    mut feed: TickFeed,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("tick ingestion started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = feed.next() => match next {
                Some(tick) => pipeline.lock().on_tick(tick),
                None => {
                    warn!("tick feed ended");
                    break;
                }
            }
        }
    }
    feed.close();
    info!("tick ingestion stopped");
}

/// LIVE/PAPER: periodic clock sweep at the paper-engine cadence. Sleeping
/// through the session clock keeps this loop correct on either time source.
pub async fn run_clock_loop(
    pipeline: Arc<Mutex<SessionPipeline>>,
    clock: SessionClock,
    cadence_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(cadence_secs, "clock loop started");
    let mut next_ms = clock.now_millis();
    loop {
        next_ms += (cadence_secs * 1000) as i64;
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = clock.wait_until(next_ms) => {
                let now = clock.now();
                let pending = pipeline.lock().on_clock(now);
                if let Some(snapshot) = pending {
                    finish_plan_install(&pipeline, snapshot).await;
                }
            }
        }
    }
    info!("clock loop stopped");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::journal::FillJournal;
    use crate::market::tick_source::TickFeed;
    use crate::types::{ExitReason, Mode, PositionStatus};
    use chrono::NaiveDate;
    use std::io::Write;
    use std::path::Path;

    const DAY: &str = "2025-01-06";

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        write!(f, "{content}").unwrap();
    }

    /// A small but complete world: ten sessions of (BULL, OIM, BULL) → BULL
    /// history, a prior day closing strong, and a gently trending open that
    /// classifies BULL / OIM / BULL today.
    fn build_world(dir: &Path, symbols: &[&str]) -> Arc<Config> {
        let mut master = String::from("Date,Open,High,Low,Close,PDC,OL,OT,Result\n");
        for day in 1..=10 {
            master.push_str(&format!(
                "2024-12-{day:02},100,104,99,103,BULL,OIM,BULL,BULL\n"
            ));
        }
        // Prior session: up day closing in the top of its range (PDC BULL),
        // real body 101–109 so a 105 open lands inside it (OL OIM).
        master.push_str("2025-01-03,101,110,100,109,BULL,OIM,BULL,BULL\n");
        write_file(&dir.join("masters/ALPHA_5MINUTE_MASTER.csv"), &master);

        let intraday = format!(
            "DateTime,Open,High,Low,Close,Volume\n\
             {DAY}T09:15:00+05:30,105.0,105.6,104.9,105.5,1200\n\
             {DAY}T09:20:00+05:30,105.5,106.1,105.4,106.0,900\n\
             {DAY}T09:25:00+05:30,106.0,106.6,105.9,106.5,800\n\
             {DAY}T09:30:00+05:30,106.5,106.6,106.3,106.4,700\n\
             {DAY}T09:35:00+05:30,106.4,107.0,106.3,107.0,900\n\
             {DAY}T09:40:00+05:30,107.0,107.5,106.8,107.3,800\n\
             {DAY}T09:45:00+05:30,107.3,107.9,107.1,107.6,600\n\
             {DAY}T09:50:00+05:30,107.6,108.0,107.2,107.4,500\n"
        );
        write_file(&dir.join("intraday/ALPHA_5minute.csv"), &intraday);

        let mut cfg = Config::default();
        cfg.mode = Mode::Sim;
        cfg.symbols = symbols.iter().map(|s| s.to_string()).collect();
        cfg.paths.intraday = dir.join("intraday");
        cfg.paths.masters = dir.join("masters");
        cfg.paths.journal = dir.join("journal");
        cfg.paths.state = dir.join("state");
        Arc::new(cfg)
    }

    async fn run_day(cfg: Arc<Config>) -> (Arc<StateStore>, Arc<SnapshotStore>, Arc<FillJournal>) {
        let date = NaiveDate::parse_from_str(DAY, "%Y-%m-%d").unwrap();
        let start = millis_at(date, chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        let (clock, handle) = SessionClock::virtual_at(start);

        let (masters, _missing) = MasterTable::load(&cfg.paths, &cfg.symbols);
        let masters = Arc::new(masters);
        let freq = Arc::new(FreqTable::from_masters(&masters, &cfg.symbols));

        let state = Arc::new(StateStore::new(
            cfg.paths.state.join("live_state.json"),
            crate::state::SystemState::new(cfg.mode, date, cfg.risk.daily_rs, cfg.risk.per_trade_rs),
        ));
        let snapshots = Arc::new(SnapshotStore::open(cfg.paths.state.clone(), date, cfg.mode));
        let journal = Arc::new(FillJournal::open(&cfg.paths.journal, date, true).unwrap());
        let engine = PaperEngine::new(
            TimelineGate::new(cfg.cutovers),
            cfg.risk.daily_rs,
            journal.clone(),
        );

        let pipeline = Arc::new(Mutex::new(SessionPipeline::new(
            cfg.clone(),
            clock,
            date,
            masters,
            freq,
            snapshots.clone(),
            state.clone(),
            engine,
        )));

        let replay =
            crate::market::replay::ReplayTickSource::build(&cfg, date, handle).unwrap();
        run_replay_session(pipeline, TickFeed::Replay(replay)).await;
        state.persist_now().unwrap();

        (state, snapshots, journal)
    }

    #[tokio::test]
    async fn full_replay_day_builds_plan_and_trades_it() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = build_world(dir.path(), &["ALPHA"]);
        let (state, snapshots, journal) = run_day(cfg).await;

        // Tags fired in order and stayed set.
        let snap = state.snapshot();
        let tags = &snap.tags["ALPHA"];
        assert_eq!(tags.pdc, Some(crate::types::Pdc::Bull));
        assert_eq!(tags.ol, Some(crate::types::OpenLocation::Oim));
        assert_eq!(tags.ot, Some(crate::types::OpeningTrend::Bull));
        assert!(tags.computed_at.pdc.is_some());

        // Plan is locked and tradeable, artifact on disk.
        let plan = snapshots.current();
        assert_eq!(plan.status, crate::types::PlanStatus::Ready);
        assert!(plan.locked);
        let row = plan.row("ALPHA").unwrap().clone();
        assert_eq!(row.entry, 107.0); // close of the 09:35–09:40 bar
        assert!(row.qty > 0);
        assert!(cfg_plan_file(dir.path()).exists());

        // The entry crossed (107.5 prints after arming) and the day ended
        // flat at the force-flat sweep.
        let pos = &snap.positions["ALPHA"];
        assert_eq!(pos.status, PositionStatus::Closed);
        assert!(matches!(
            pos.exit_reason,
            Some(ExitReason::Time) | Some(ExitReason::Tp1) | Some(ExitReason::Tp2)
        ));
        assert_eq!(journal.fills()[0].reason, "ENTRY");
        assert_eq!(journal.fills()[0].price, row.entry);

        // P&L closes out onto the realized side.
        assert_eq!(snap.meta.pnl.open, 0.0);
        assert_eq!(snap.meta.pnl.day, snap.meta.pnl.realized);
    }

    fn cfg_plan_file(dir: &Path) -> std::path::PathBuf {
        dir.join("state").join(format!("plan_snapshot_{DAY}.json"))
    }

    #[tokio::test]
    async fn symbol_without_master_degrades_to_ready_partial() {
        let dir = tempfile::tempdir().unwrap();
        // GHOST is in the universe but has no master and no intraday data.
        let cfg = build_world(dir.path(), &["ALPHA", "GHOST"]);
        let (state, snapshots, _journal) = run_day(cfg).await;

        let plan = snapshots.current();
        assert_eq!(plan.status, crate::types::PlanStatus::ReadyPartial);
        assert!(plan.locked);
        assert_eq!(plan.portfolio_plan.as_ref().unwrap().plans.len(), 1);
        assert!(plan.row("GHOST").is_none());

        // GHOST's tags are null but stamped as computed.
        let snap = state.snapshot();
        let ghost = &snap.tags["GHOST"];
        assert!(ghost.pdc.is_none() && ghost.ol.is_none() && ghost.ot.is_none());
        assert!(ghost.computed_at.ot.is_some());
    }

    #[tokio::test]
    async fn replay_is_deterministic_end_to_end() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let cfg_a = build_world(dir_a.path(), &["ALPHA"]);
        let cfg_b = build_world(dir_b.path(), &["ALPHA"]);

        let (_sa, _na, journal_a) = run_day(cfg_a).await;
        let (_sb, _nb, journal_b) = run_day(cfg_b).await;

        // Identical plan artifact, byte for byte.
        let plan_a = std::fs::read_to_string(cfg_plan_file(dir_a.path())).unwrap();
        let plan_b = std::fs::read_to_string(cfg_plan_file(dir_b.path())).unwrap();
        assert_eq!(plan_a, plan_b);

        // Identical fill journal.
        let fills_a = std::fs::read_to_string(journal_a.path()).unwrap();
        let fills_b = std::fs::read_to_string(journal_b.path()).unwrap();
        assert_eq!(fills_a, fills_b);
        assert!(!fills_a.is_empty());
    }
}
