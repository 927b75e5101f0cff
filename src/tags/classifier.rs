// =============================================================================
// Tag classifier — pure functions of prior-day stats and opening bars
// =============================================================================
//
// Three tags, each computed once at its own cutover:
//   PDC (09:25)    — prior session's range direction and close position.
//   OL  (09:30)    — today's open relative to the prior day's range and body.
//   OT  (09:40:01) — direction and persistence of the five opening bars.
//
// Same inputs, same outputs. Missing or degenerate prior-day data yields
// `None`, which downstream becomes a null tag and a READY_PARTIAL plan.
// =============================================================================

use crate::market::bar_aggregator::Bar;
use crate::market::master::MasterRow;
use crate::types::{OpenLocation, OpeningTrend, Pdc};

/// Close must land in the top (bottom) of the prior range for a BULL (BEAR)
/// context; anything else is trading-range.
const PDC_CLOSE_POS_BULL: f64 = 0.6;
const PDC_CLOSE_POS_BEAR: f64 = 0.4;

/// Bars out of the five that must agree for a directional opening trend.
const OT_MIN_AGREEING_BARS: usize = 4;

/// Previous Day Context from the prior session's OHLC.
pub fn classify_pdc(prev: &MasterRow) -> Option<Pdc> {
    let range = prev.range();
    if range <= 0.0 {
        return None;
    }
    let close_pos = (prev.close - prev.low) / range;

    let tag = if prev.close > prev.open && close_pos >= PDC_CLOSE_POS_BULL {
        Pdc::Bull
    } else if prev.close < prev.open && close_pos <= PDC_CLOSE_POS_BEAR {
        Pdc::Bear
    } else {
        Pdc::Tr
    };
    Some(tag)
}

/// Open Location: where today's 09:15 open sits against the prior day.
/// Outside the range → OAR/OBR; inside the real body → OIM; the remaining
/// upper/lower slices → OOH/OOL.
pub fn classify_open_location(today_open: f64, prev: &MasterRow) -> Option<OpenLocation> {
    if prev.range() <= 0.0 {
        return None;
    }
    let body_hi = prev.open.max(prev.close);
    let body_lo = prev.open.min(prev.close);

    let tag = if today_open > prev.high {
        OpenLocation::Oar
    } else if today_open < prev.low {
        OpenLocation::Obr
    } else if today_open >= body_lo && today_open <= body_hi {
        OpenLocation::Oim
    } else if today_open > body_hi {
        OpenLocation::Ooh
    } else {
        OpenLocation::Ool
    };
    Some(tag)
}

/// Opening Trend from the 09:15–09:40 bars: BULL when at least four of five
/// closed up and the cumulative return clears the threshold; BEAR mirrored;
/// otherwise TR. Fewer than four bars can never satisfy a directional count.
pub fn classify_opening_trend(bars: &[Bar], ret_threshold: f64) -> Option<OpeningTrend> {
    let first = bars.first()?;
    let last = bars.last()?;
    if first.open <= 0.0 {
        return None;
    }

    let up = bars.iter().filter(|b| b.close > b.open).count();
    let down = bars.iter().filter(|b| b.close < b.open).count();
    let cum_ret = (last.close - first.open) / first.open;

    let tag = if up >= OT_MIN_AGREEING_BARS && cum_ret > ret_threshold {
        OpeningTrend::Bull
    } else if down >= OT_MIN_AGREEING_BARS && cum_ret < -ret_threshold {
        OpeningTrend::Bear
    } else {
        OpeningTrend::Tr
    };
    Some(tag)
}
