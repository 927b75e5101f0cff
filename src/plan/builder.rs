// =============================================================================
// Plan builder — turns tags + history into the day's directive, once
// =============================================================================
//
// Fires at the 09:40 cutover. For every symbol with a full tag tuple it runs
// the picker, then derives:
//
//   entry = close of the 09:35–09:40 bar
//   stop  = BULL: min(low of the five opening bars, entry − k·ATR5)
//           BEAR: max(high of the five opening bars, entry + k·ATR5)
//   R     = |entry − stop|   (ABSTAIN "tight_stop" below 0.2 % of price)
//   tp1   = entry ± R, tp2 = entry ± 2R
//   qty   = ⌊risk_per_trade / R⌋   (ABSTAIN "zero_qty" at zero)
//
// ATR5 uses true range against the previous close, seeded by the prior-day
// close from the master row.
// =============================================================================

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::{PickerParams, RiskParams};
use crate::freq::{pick_bias, FreqTable, PickOutcome};
use crate::market::bar_aggregator::Bar;
use crate::plan::snapshot::{PlanRow, PlanSnapshot, PlanTags, PortfolioPlan};
use crate::types::{Direction, Mode, OpenLocation, OpeningTrend, Pdc, Pick, PlanStatus};

/// Floor on risk-per-share as a fraction of entry price. Tighter stops are
/// noise, not structure.
const MIN_RISK_FRAC: f64 = 0.002;

/// Average true range over the opening bars, previous close seeding the
/// first bar's range.
pub fn atr5(bars: &[Bar], prev_close: f64) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    let mut prior = prev_close;
    let mut sum = 0.0;
    for bar in bars {
        let tr = (bar.high - bar.low)
            .max((bar.high - prior).abs())
            .max((bar.low - prior).abs());
        sum += tr;
        prior = bar.close;
    }
    sum / bars.len() as f64
}

/// Everything the builder needs for one symbol.
pub struct SymbolInputs<'a> {
    pub symbol: &'a str,
    pub pdc: Pdc,
    pub ol: OpenLocation,
    pub ot: OpeningTrend,
    /// The 09:15–09:40 closed bars, window order.
    pub opening_bars: &'a [Bar],
    pub prev_close: f64,
}

/// Assembles the portfolio plan from per-symbol inputs.
pub struct PlanBuilder<'a> {
    freq: &'a FreqTable,
    risk: &'a RiskParams,
    picker: &'a PickerParams,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(freq: &'a FreqTable, risk: &'a RiskParams, picker: &'a PickerParams) -> Self {
        Self { freq, risk, picker }
    }

    /// Build the snapshot. `universe_size` is the full configured universe;
    /// fewer resolvable inputs means READY_PARTIAL, zero means FAILED.
    pub fn build(
        &self,
        date: NaiveDate,
        mode: Mode,
        built_at: String,
        mut inputs: Vec<SymbolInputs<'_>>,
        universe_size: usize,
    ) -> PlanSnapshot {
        inputs.sort_by(|a, b| a.symbol.cmp(b.symbol));

        let mut plans = Vec::with_capacity(inputs.len());
        for input in &inputs {
            plans.push(self.build_row(input));
        }

        if plans.is_empty() {
            warn!(date = %date, "no symbol resolvable at 09:40; plan FAILED");
            return PlanSnapshot {
                date,
                mode,
                built_at: Some(built_at),
                status: PlanStatus::Failed,
                locked: false,
                portfolio_plan: None,
            };
        }

        let active_trades = plans.iter().filter(|r| r.pick != Pick::Abstain).count() as u32;
        let total_planned_risk_rs: f64 = plans
            .iter()
            .filter(|r| r.pick != Pick::Abstain)
            .map(|r| r.qty as f64 * r.r_per_share)
            .sum();

        let status = if plans.len() == universe_size {
            PlanStatus::Ready
        } else {
            PlanStatus::ReadyPartial
        };

        info!(
            date = %date,
            %status,
            rows = plans.len(),
            active_trades,
            total_planned_risk_rs,
            "portfolio plan assembled"
        );

        PlanSnapshot {
            date,
            mode,
            built_at: Some(built_at),
            status,
            locked: true,
            portfolio_plan: Some(PortfolioPlan {
                date,
                daily_risk_rs: self.risk.daily_rs,
                risk_per_trade_rs: self.risk.per_trade_rs,
                total_planned_risk_rs,
                active_trades,
                plans,
            }),
        }
    }

    fn build_row(&self, input: &SymbolInputs<'_>) -> PlanRow {
        let outcome = pick_bias(
            self.freq,
            input.symbol,
            input.pdc,
            input.ol,
            input.ot,
            self.picker,
        );

        let tags = PlanTags {
            prev_day_context: Some(input.pdc),
            open_location: Some(input.ol),
            opening_trend: Some(input.ot),
        };

        let Some(direction) = outcome.direction() else {
            return abstain_row(input.symbol, &outcome, tags, outcome.reason.clone());
        };

        let Some(last_bar) = input.opening_bars.last() else {
            return abstain_row(input.symbol, &outcome, tags, Some("no_bars".into()));
        };
        let entry = last_bar.close;

        let low5 = input
            .opening_bars
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);
        let high5 = input
            .opening_bars
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let atr = atr5(input.opening_bars, input.prev_close);

        let stop = match direction {
            Direction::Bull => low5.min(entry - self.risk.r_atr_mult * atr),
            Direction::Bear => high5.max(entry + self.risk.r_atr_mult * atr),
        };

        let r = (entry - stop).abs();
        if r < entry * MIN_RISK_FRAC {
            return abstain_row(input.symbol, &outcome, tags, Some("tight_stop".into()));
        }

        let qty = (self.risk.per_trade_rs / r).floor() as u32;
        if qty == 0 {
            return abstain_row(input.symbol, &outcome, tags, Some("zero_qty".into()));
        }

        let sign = direction.sign();
        PlanRow {
            symbol: input.symbol.to_string(),
            pick: outcome.pick,
            confidence: outcome.confidence * 100.0,
            level: outcome.level,
            samples: outcome.samples,
            entry,
            stop,
            tp1: entry + sign * r,
            tp2: entry + sign * 2.0 * r,
            qty,
            r_per_share: r,
            reason: None,
            tags,
        }
    }
}

fn abstain_row(
    symbol: &str,
    outcome: &PickOutcome,
    tags: PlanTags,
    reason: Option<String>,
) -> PlanRow {
    PlanRow {
        symbol: symbol.to_string(),
        pick: Pick::Abstain,
        confidence: outcome.confidence * 100.0,
        level: outcome.level,
        samples: outcome.samples,
        entry: 0.0,
        stop: 0.0,
        tp1: 0.0,
        tp2: 0.0,
        qty: 0,
        r_per_share: 0.0,
        reason,
        tags,
    }
}
