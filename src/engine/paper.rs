// =============================================================================
// Paper execution engine — fills, exits, P&L, and the daily loss latch
// =============================================================================
//
// One position per symbol per day, created PENDING when the plan arms and
// driven by quotes from 09:40 until the 15:05 force-flat:
//
//   PENDING → OPEN    quote crosses entry in the plan direction; limit
//                     semantics, fill at the entry level.
//   OPEN    → CLOSED  stop hit (fill at stop), TP2 hit (fill at tp2),
//                     15:05 (fill at last ltp), or kill-switch.
//   TP1               half exit ⌊qty/2⌋ at tp1; the remainder trails with the
//                     stop moved to entry.
//
// Within a single quote the stop is checked before either target, and a
// quote exactly at a level triggers it — ties break against the trader.
//
// The daily loss latch is one-way: once realized P&L breaches −daily_risk_rs,
// every PENDING order is cancelled and no entry fires again that day.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::format_ist;
use crate::engine::journal::{Fill, FillJournal};
use crate::plan::snapshot::PortfolioPlan;
use crate::timeline::TimelineGate;
use crate::types::{Direction, ExitReason, Pick, PositionStatus, Side};

/// A live paper trade for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub symbol: String,
    pub direction: Direction,
    /// Remaining open quantity; reduced by the TP1 partial.
    pub qty: u32,
    pub initial_qty: u32,
    /// Plan entry level; also the fill price under limit semantics.
    pub entry: f64,
    #[serde(default)]
    pub entry_price: f64,
    /// Current stop; moves to entry after the TP1 partial.
    pub stop: f64,
    pub tp1: f64,
    pub tp2: f64,
    #[serde(default)]
    pub tp1_filled: bool,
    pub status: PositionStatus,
    #[serde(default)]
    pub open_pnl: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub exit_reason: Option<ExitReason>,
}

impl PaperPosition {
    fn from_plan_row(row: &crate::plan::snapshot::PlanRow, direction: Direction) -> Self {
        Self {
            symbol: row.symbol.clone(),
            direction,
            qty: row.qty,
            initial_qty: row.qty,
            entry: row.entry,
            entry_price: 0.0,
            stop: row.stop,
            tp1: row.tp1,
            tp2: row.tp2,
            tp1_filled: false,
            status: PositionStatus::Pending,
            open_pnl: 0.0,
            realized_pnl: 0.0,
            exit_reason: None,
        }
    }

    fn entry_side(&self) -> Side {
        match self.direction {
            Direction::Bull => Side::Buy,
            Direction::Bear => Side::Sell,
        }
    }

    fn exit_side(&self) -> Side {
        match self.direction {
            Direction::Bull => Side::Sell,
            Direction::Bear => Side::Buy,
        }
    }
}

// =============================================================================
// PaperEngine
// =============================================================================

/// Owns all paper positions and the day's realized/open P&L.
pub struct PaperEngine {
    gate: TimelineGate,
    daily_risk_rs: f64,
    journal: Arc<FillJournal>,
    /// BTreeMap so every sweep is in symbol order — replay determinism.
    positions: BTreeMap<String, PaperPosition>,
    last_ltp: HashMap<String, f64>,
    /// One-way latch; set by the loss guard or the kill-switch.
    halted: bool,
    halt_reason: Option<String>,
    /// Cleared by the pipeline when any input (clock, quotes, plan) is
    /// reporting non-OK; blocks new entries only.
    inputs_ok: bool,
    flattened: bool,
}

impl PaperEngine {
    pub fn new(gate: TimelineGate, daily_risk_rs: f64, journal: Arc<FillJournal>) -> Self {
        Self {
            gate,
            daily_risk_rs,
            journal,
            positions: BTreeMap::new(),
            last_ltp: HashMap::new(),
            halted: false,
            halt_reason: None,
            inputs_ok: true,
            flattened: false,
        }
    }

    /// Create PENDING positions from the locked plan. Symbols that already
    /// carry a position (mid-day restart) are left untouched so nothing is
    /// double-opened.
    pub fn arm(&mut self, plan: &PortfolioPlan) {
        if self.flattened {
            warn!("force-flat already ran; plan not armed");
            return;
        }
        for row in &plan.plans {
            if row.pick == Pick::Abstain || self.positions.contains_key(&row.symbol) {
                continue;
            }
            let direction = match row.pick {
                Pick::Bull => Direction::Bull,
                Pick::Bear => Direction::Bear,
                Pick::Abstain => unreachable!("abstain filtered above"),
            };
            info!(
                symbol = %row.symbol,
                %direction,
                entry = row.entry,
                stop = row.stop,
                tp1 = row.tp1,
                tp2 = row.tp2,
                qty = row.qty,
                "position armed"
            );
            self.positions.insert(
                row.symbol.clone(),
                PaperPosition::from_plan_row(row, direction),
            );
        }
    }

    /// Re-adopt positions persisted before a restart. No fills are recorded.
    pub fn adopt(&mut self, positions: impl IntoIterator<Item = PaperPosition>) {
        for pos in positions {
            info!(symbol = %pos.symbol, status = %pos.status, "position re-adopted from persisted state");
            self.positions.insert(pos.symbol.clone(), pos);
        }
    }

    /// Re-latch a halt that was active before a restart.
    pub fn restore_halt(&mut self, reason: String) {
        warn!(reason = %reason, "halt restored from persisted state");
        self.halted = true;
        self.halt_reason = Some(reason);
    }

    pub fn set_inputs_ok(&mut self, ok: bool) {
        if self.inputs_ok && !ok {
            warn!("engine inputs degraded; new entries suspended");
        }
        self.inputs_ok = ok;
    }

    // ------------------------------------------------------------------------
    // Quote-driven transitions
    // ------------------------------------------------------------------------

    /// Process one quote. Returns true when any position changed.
    pub fn on_quote(&mut self, symbol: &str, ltp: f64, now: DateTime<Tz>) -> bool {
        if ltp <= 0.0 {
            warn!(symbol, ltp, "non-positive quote ignored");
            return false;
        }
        self.last_ltp.insert(symbol.to_string(), ltp);

        let Some(mut pos) = self.positions.remove(symbol) else {
            return false;
        };
        let mut changed = false;

        // PENDING → OPEN: entry crossed in the plan direction, market open,
        // no halt, inputs healthy.
        if pos.status == PositionStatus::Pending
            && !self.halted
            && self.inputs_ok
            && !self.gate.session_over(now)
        {
            let crossed = match pos.direction {
                Direction::Bull => ltp >= pos.entry,
                Direction::Bear => ltp <= pos.entry,
            };
            if crossed {
                pos.status = PositionStatus::Open;
                pos.entry_price = pos.entry;
                self.journal.append(Fill {
                    symbol: pos.symbol.clone(),
                    side: pos.entry_side(),
                    qty: pos.qty,
                    price: pos.entry_price,
                    ts: format_ist(now),
                    reason: "ENTRY".to_string(),
                });
                info!(symbol, price = pos.entry_price, qty = pos.qty, "entry filled");
                changed = true;
            }
        }

        if pos.status == PositionStatus::Open {
            changed |= self.run_exit_checks(&mut pos, ltp, now);
        }

        self.positions.insert(symbol.to_string(), pos);
        if changed {
            self.enforce_daily_loss(now);
        }
        changed
    }

    /// Stop before targets; a touch is a trigger.
    fn run_exit_checks(&mut self, pos: &mut PaperPosition, ltp: f64, now: DateTime<Tz>) -> bool {
        let sign = pos.direction.sign();

        let sl_hit = match pos.direction {
            Direction::Bull => ltp <= pos.stop,
            Direction::Bear => ltp >= pos.stop,
        };
        if sl_hit {
            self.close_remaining(pos, pos.stop, ExitReason::Sl, now);
            return true;
        }

        let mut changed = false;

        if !pos.tp1_filled {
            let tp1_hit = match pos.direction {
                Direction::Bull => ltp >= pos.tp1,
                Direction::Bear => ltp <= pos.tp1,
            };
            if tp1_hit {
                let half = pos.qty / 2;
                if half > 0 {
                    pos.realized_pnl += sign * (pos.tp1 - pos.entry_price) * half as f64;
                    pos.qty -= half;
                    self.journal.append(Fill {
                        symbol: pos.symbol.clone(),
                        side: pos.exit_side(),
                        qty: half,
                        price: pos.tp1,
                        ts: format_ist(now),
                        reason: "TP1".to_string(),
                    });
                    info!(
                        symbol = %pos.symbol,
                        qty = half,
                        price = pos.tp1,
                        "TP1 partial filled, stop to break-even"
                    );
                }
                pos.tp1_filled = true;
                pos.stop = pos.entry_price;
                changed = true;
            }
        }

        let tp2_hit = match pos.direction {
            Direction::Bull => ltp >= pos.tp2,
            Direction::Bear => ltp <= pos.tp2,
        };
        if tp2_hit {
            self.close_remaining(pos, pos.tp2, ExitReason::Tp2, now);
            return true;
        }

        pos.open_pnl = sign * (ltp - pos.entry_price) * pos.qty as f64;
        changed
    }

    fn close_remaining(
        &mut self,
        pos: &mut PaperPosition,
        price: f64,
        reason: ExitReason,
        now: DateTime<Tz>,
    ) {
        let qty = pos.qty;
        if qty > 0 {
            pos.realized_pnl += pos.direction.sign() * (price - pos.entry_price) * qty as f64;
            self.journal.append(Fill {
                symbol: pos.symbol.clone(),
                side: pos.exit_side(),
                qty,
                price,
                ts: format_ist(now),
                reason: reason.to_string(),
            });
        }
        pos.qty = 0;
        pos.open_pnl = 0.0;
        pos.status = PositionStatus::Closed;
        pos.exit_reason = Some(reason);
        info!(
            symbol = %pos.symbol,
            %reason,
            price,
            realized_pnl = pos.realized_pnl,
            "position closed"
        );
    }

    fn cancel_pending(&mut self, reason: ExitReason) {
        for pos in self.positions.values_mut() {
            if pos.status == PositionStatus::Pending {
                pos.status = PositionStatus::Closed;
                pos.exit_reason = Some(reason);
                info!(symbol = %pos.symbol, %reason, "pending entry cancelled");
            }
        }
    }

    /// One-way latch: realized loss past the daily budget cancels every
    /// PENDING order and blocks entries for the rest of the day.
    fn enforce_daily_loss(&mut self, _now: DateTime<Tz>) {
        if self.halted {
            return;
        }
        let realized = self.realized_pnl();
        if realized < -self.daily_risk_rs {
            warn!(
                realized,
                budget = self.daily_risk_rs,
                "daily loss limit breached; halting new entries"
            );
            self.halted = true;
            self.halt_reason = Some("daily_loss_limit".to_string());
            self.cancel_pending(ExitReason::Kill);
        }
    }

    // ------------------------------------------------------------------------
    // Clock-driven transitions
    // ------------------------------------------------------------------------

    /// Periodic sweep: past the force-flat time, OPEN positions close at the
    /// last ltp and PENDING entries cancel. Returns true on any change.
    pub fn on_time(&mut self, now: DateTime<Tz>) -> bool {
        if self.flattened || !self.gate.session_over(now) {
            return false;
        }
        self.flattened = true;

        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut changed = false;
        for symbol in symbols {
            let Some(mut pos) = self.positions.remove(&symbol) else {
                continue;
            };
            match pos.status {
                PositionStatus::Pending => {
                    pos.status = PositionStatus::Closed;
                    pos.exit_reason = Some(ExitReason::Time);
                    info!(symbol = %pos.symbol, "entry never crossed; cancelled at force-flat");
                    changed = true;
                }
                PositionStatus::Open => {
                    let ltp = self
                        .last_ltp
                        .get(&symbol)
                        .copied()
                        .unwrap_or(pos.entry_price);
                    self.close_remaining(&mut pos, ltp, ExitReason::Time, now);
                    changed = true;
                }
                PositionStatus::Closed => {}
            }
            self.positions.insert(symbol, pos);
        }
        changed
    }

    /// Kill-switch: flatten every OPEN position at the last ltp and cancel
    /// every PENDING one. Latches the halt.
    pub fn kill(&mut self, now: DateTime<Tz>) -> bool {
        warn!("kill switch engaged; flattening all positions");
        let symbols: Vec<String> = self.positions.keys().cloned().collect();
        let mut changed = false;
        for symbol in symbols {
            let Some(mut pos) = self.positions.remove(&symbol) else {
                continue;
            };
            match pos.status {
                PositionStatus::Open => {
                    let ltp = self
                        .last_ltp
                        .get(&symbol)
                        .copied()
                        .unwrap_or(pos.entry_price);
                    self.close_remaining(&mut pos, ltp, ExitReason::Kill, now);
                    changed = true;
                }
                PositionStatus::Pending => {
                    pos.status = PositionStatus::Closed;
                    pos.exit_reason = Some(ExitReason::Kill);
                    changed = true;
                }
                PositionStatus::Closed => {}
            }
            self.positions.insert(symbol, pos);
        }
        self.halted = true;
        self.halt_reason = Some("kill_switch".to_string());
        changed
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn positions(&self) -> &BTreeMap<String, PaperPosition> {
        &self.positions
    }

    pub fn realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn open_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.open_pnl).sum()
    }

    pub fn halt(&self) -> (bool, Option<&str>) {
        (self.halted, self.halt_reason.as_deref())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ist_from_millis, millis_at};
    use crate::plan::snapshot::{PlanRow, PlanTags, PortfolioPlan};
    use crate::timeline::Cutovers;
    use crate::types::{FreqLevel, OpenLocation, OpeningTrend, Pdc};
    use chrono::{NaiveDate, NaiveTime};

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        ist_from_millis(millis_at(date, NaiveTime::from_hms_opt(h, m, 0).unwrap()))
    }

    fn row(symbol: &str, pick: Pick, entry: f64, stop: f64, tp1: f64, tp2: f64, qty: u32) -> PlanRow {
        PlanRow {
            symbol: symbol.into(),
            pick,
            confidence: 78.0,
            level: FreqLevel::L3,
            samples: 9,
            entry,
            stop,
            tp1,
            tp2,
            qty,
            r_per_share: (entry - stop).abs(),
            reason: None,
            tags: PlanTags {
                prev_day_context: Some(Pdc::Bull),
                open_location: Some(OpenLocation::Oim),
                opening_trend: Some(OpeningTrend::Bull),
            },
        }
    }

    fn plan(rows: Vec<PlanRow>) -> PortfolioPlan {
        let active = rows.iter().filter(|r| r.pick != Pick::Abstain).count() as u32;
        PortfolioPlan {
            date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            daily_risk_rs: 10_000.0,
            risk_per_trade_rs: 1_000.0,
            total_planned_risk_rs: rows
                .iter()
                .map(|r| r.qty as f64 * r.r_per_share)
                .sum(),
            active_trades: active,
            plans: rows,
        }
    }

    fn engine(daily_risk: f64) -> (PaperEngine, Arc<FillJournal>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(
            FillJournal::open(
                dir.path(),
                NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
                false,
            )
            .unwrap(),
        );
        let engine = PaperEngine::new(
            TimelineGate::new(Cutovers::default()),
            daily_risk,
            journal.clone(),
        );
        (engine, journal, dir)
    }

    #[test]
    fn bull_tp1_then_time_exit_matches_worked_example() {
        let (mut eng, journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 1250)]));

        // Entry crosses at the first quote at/above 100.
        assert!(eng.on_quote("ALPHA", 100.10, at(9, 41)));
        assert_eq!(
            eng.positions()["ALPHA"].status,
            PositionStatus::Open
        );
        assert_eq!(eng.positions()["ALPHA"].entry_price, 100.0);

        eng.on_quote("ALPHA", 100.50, at(9, 45));
        // TP1 touch: 625 out at 100.80, stop to break-even.
        assert!(eng.on_quote("ALPHA", 100.80, at(9, 50)));
        let pos = &eng.positions()["ALPHA"];
        assert_eq!(pos.qty, 625);
        assert!(pos.tp1_filled);
        assert_eq!(pos.stop, 100.0);
        assert!((pos.realized_pnl - 500.0).abs() < 1e-9);

        eng.on_quote("ALPHA", 100.60, at(10, 0));
        eng.on_quote("ALPHA", 100.30, at(11, 0));
        eng.on_quote("ALPHA", 100.20, at(15, 4));

        // Force-flat at 15:05 closes the remainder at the last ltp.
        assert!(eng.on_time(at(15, 5)));
        let pos = &eng.positions()["ALPHA"];
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_reason, Some(ExitReason::Time));
        assert!((pos.realized_pnl - 625.0).abs() < 1e-9);
        assert_eq!(eng.realized_pnl(), 625.0);

        // ENTRY + TP1 + TIME fills.
        let reasons: Vec<String> = journal.fills().iter().map(|f| f.reason.clone()).collect();
        assert_eq!(reasons, vec!["ENTRY", "TP1", "TIME"]);
    }

    #[test]
    fn bear_stop_hit_fills_at_stop() {
        let (mut eng, journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("BETA", Pick::Bear, 500.0, 504.0, 496.0, 492.0, 250)]));

        eng.on_quote("BETA", 499.0, at(9, 41)); // entry (ltp <= 500)
        eng.on_quote("BETA", 501.0, at(9, 45));
        eng.on_quote("BETA", 503.5, at(9, 50));
        assert!(eng.on_quote("BETA", 504.2, at(9, 55)));

        let pos = &eng.positions()["BETA"];
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_reason, Some(ExitReason::Sl));
        // Fill at the stop, not the traded-through price.
        assert!((pos.realized_pnl - (-1_000.0)).abs() < 1e-9);
        assert_eq!(journal.fills().last().unwrap().price, 504.0);
    }

    #[test]
    fn quote_exactly_at_stop_closes() {
        let (mut eng, _journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100)]));
        eng.on_quote("ALPHA", 100.0, at(9, 41));
        assert!(eng.on_quote("ALPHA", 99.2, at(9, 45)));
        assert_eq!(
            eng.positions()["ALPHA"].exit_reason,
            Some(ExitReason::Sl)
        );
    }

    #[test]
    fn stop_checked_before_target_in_same_quote() {
        // A quote that gaps through both stop and tp2 must resolve as SL.
        let (mut eng, _journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100)]));
        eng.on_quote("ALPHA", 100.0, at(9, 41));
        // Stop touched: conservative ordering closes the position even though
        // this quote alone cannot say which level traded first.
        assert!(eng.on_quote("ALPHA", 99.2, at(9, 42)));
        assert_eq!(
            eng.positions()["ALPHA"].exit_reason,
            Some(ExitReason::Sl)
        );
    }

    #[test]
    fn gap_through_tp1_and_tp2_fills_both() {
        let (mut eng, journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 1000)]));
        eng.on_quote("ALPHA", 100.0, at(9, 41));
        assert!(eng.on_quote("ALPHA", 101.8, at(9, 45)));

        let pos = &eng.positions()["ALPHA"];
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_reason, Some(ExitReason::Tp2));
        // 500 at tp1 (+0.8 each) then 500 at tp2 (+1.6 each).
        assert!((pos.realized_pnl - (500.0 * 0.8 + 500.0 * 1.6)).abs() < 1e-9);
        let reasons: Vec<String> = journal.fills().iter().map(|f| f.reason.clone()).collect();
        assert_eq!(reasons, vec!["ENTRY", "TP1", "TP2"]);
    }

    #[test]
    fn pending_never_crossed_cancels_at_flatten() {
        let (mut eng, journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100)]));
        eng.on_quote("ALPHA", 99.5, at(9, 41));
        eng.on_quote("ALPHA", 99.8, at(14, 0));

        assert!(eng.on_time(at(15, 5)));
        let pos = &eng.positions()["ALPHA"];
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.exit_reason, Some(ExitReason::Time));
        assert_eq!(pos.realized_pnl, 0.0);
        // A cancel is not a fill.
        assert!(journal.is_empty());
    }

    #[test]
    fn no_entries_after_session_over() {
        let (mut eng, _journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100)]));
        assert!(!eng.on_quote("ALPHA", 100.5, at(15, 6)));
        assert_eq!(
            eng.positions()["ALPHA"].status,
            PositionStatus::Pending
        );
    }

    #[test]
    fn daily_loss_latch_cancels_pending_one_way() {
        let (mut eng, _journal, _dir) = engine(10_000.0);
        // Three bear positions engineered to lose 4500, 3000, 3200.
        eng.arm(&plan(vec![
            row("A1", Pick::Bull, 100.0, 95.5, 104.5, 109.0, 1000), // SL → −4500
            row("A2", Pick::Bull, 200.0, 197.0, 203.0, 206.0, 1000), // SL → −3000
            row("A3", Pick::Bull, 300.0, 296.8, 303.2, 306.4, 1000), // SL → −3200
            row("A4", Pick::Bull, 400.0, 396.0, 404.0, 408.0, 250),  // never entered
        ]));

        eng.on_quote("A1", 100.0, at(9, 41));
        eng.on_quote("A2", 200.0, at(9, 41));
        eng.on_quote("A3", 300.0, at(9, 42));

        eng.on_quote("A1", 95.5, at(10, 0));
        assert_eq!(eng.realized_pnl(), -4_500.0);
        let (halted, _) = eng.halt();
        assert!(!halted);

        eng.on_quote("A2", 197.0, at(10, 30));
        assert_eq!(eng.realized_pnl(), -7_500.0);

        // Third loss takes the total to −10 700: latch trips.
        eng.on_quote("A3", 296.8, at(11, 0));
        assert_eq!(eng.realized_pnl(), -10_700.0);
        let (halted, reason) = eng.halt();
        assert!(halted);
        assert_eq!(reason, Some("daily_loss_limit"));

        // The fourth PENDING was cancelled and cannot enter any more.
        assert_eq!(
            eng.positions()["A4"].status,
            PositionStatus::Closed
        );
        assert!(!eng.on_quote("A4", 400.0, at(11, 1)));
    }

    #[test]
    fn kill_switch_flattens_open_and_cancels_pending() {
        let (mut eng, _journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![
            row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100),
            row("BETA", Pick::Bear, 500.0, 504.0, 496.0, 492.0, 50),
        ]));
        eng.on_quote("ALPHA", 100.2, at(9, 41)); // opens, ltp 100.2

        assert!(eng.kill(at(10, 0)));
        let alpha = &eng.positions()["ALPHA"];
        assert_eq!(alpha.status, PositionStatus::Closed);
        assert_eq!(alpha.exit_reason, Some(ExitReason::Kill));
        assert!((alpha.realized_pnl - 100.0 * 0.2).abs() < 1e-6);

        let beta = &eng.positions()["BETA"];
        assert_eq!(beta.status, PositionStatus::Closed);
        assert_eq!(beta.exit_reason, Some(ExitReason::Kill));

        let (halted, reason) = eng.halt();
        assert!(halted);
        assert_eq!(reason, Some("kill_switch"));
    }

    #[test]
    fn adopted_open_position_is_not_refilled() {
        let (mut eng, journal, _dir) = engine(10_000.0);
        eng.adopt(vec![PaperPosition {
            symbol: "ALPHA".into(),
            direction: Direction::Bull,
            qty: 625,
            initial_qty: 1250,
            entry: 100.0,
            entry_price: 100.0,
            stop: 100.0,
            tp1: 100.8,
            tp2: 101.6,
            tp1_filled: true,
            status: PositionStatus::Open,
            open_pnl: 0.0,
            realized_pnl: 500.0,
            exit_reason: None,
        }]);
        // Re-arming the same plan must not recreate the position.
        eng.arm(&plan(vec![row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 1250)]));

        assert!(journal.is_empty());
        eng.on_quote("ALPHA", 100.4, at(11, 30));
        let pos = &eng.positions()["ALPHA"];
        assert_eq!(pos.qty, 625);
        assert_eq!(pos.status, PositionStatus::Open);
        assert!((pos.open_pnl - 625.0 * 0.4).abs() < 1e-9);
    }

    #[test]
    fn degraded_inputs_block_entries_only() {
        let (mut eng, _journal, _dir) = engine(10_000.0);
        eng.arm(&plan(vec![
            row("ALPHA", Pick::Bull, 100.0, 99.2, 100.8, 101.6, 100),
            row("BETA", Pick::Bull, 50.0, 49.5, 50.5, 51.0, 100),
        ]));
        eng.on_quote("ALPHA", 100.1, at(9, 41)); // opens

        eng.set_inputs_ok(false);
        // No new entry while degraded...
        eng.on_quote("BETA", 50.2, at(9, 42));
        assert_eq!(eng.positions()["BETA"].status, PositionStatus::Pending);
        // ...but the open position still honours its stop.
        assert!(eng.on_quote("ALPHA", 99.2, at(9, 43)));
        assert_eq!(
            eng.positions()["ALPHA"].exit_reason,
            Some(ExitReason::Sl)
        );
    }
}
