// =============================================================================
// Bar aggregator — ticks in, canonical closed 5-minute bars out
// =============================================================================
//
// Contract: for each symbol, for each 5-minute aligned window that received at
// least one tick, exactly one closed bar is emitted once the clock passes the
// window end. Windows with no ticks produce nothing — consumers treat them as
// absent, never as zero.
//
// Window arithmetic runs on epoch milliseconds. The IST offset (+05:30) is a
// multiple of five minutes, so the epoch grid and the IST wall grid coincide.
// A tick stamped exactly at a window end belongs to the NEXT window.
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::market::tick_source::Tick;

/// Length of one bar window.
pub const BAR_DURATION_MS: i64 = 5 * 60 * 1000;

/// A closed 5-minute OHLCV bar. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    /// Window start, epoch ms, aligned to the 5-minute grid.
    pub start_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Running day-level OHLCV for a symbol, published to the UI as
/// today_open / running_high / running_low / last.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DayOhlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub last: f64,
    pub volume: f64,
}

/// The in-progress window for one symbol.
#[derive(Debug, Clone)]
struct Window {
    start_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    /// Timestamp of the tick currently supplying `close`. Out-of-order ticks
    /// update high/low but only a tick at or after this moves the close.
    close_ts: i64,
    volume: f64,
}

impl Window {
    fn new(start_ms: i64, tick: &Tick) -> Self {
        Self {
            start_ms,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            close_ts: tick.ts,
            volume: tick.volume,
        }
    }

    fn absorb(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.volume += tick.volume;
        if tick.ts >= self.close_ts {
            self.close = tick.ltp;
            self.close_ts = tick.ts;
        }
    }

    fn into_bar(self, symbol: &str) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            start_ms: self.start_ms,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Align a timestamp down to its window start.
pub fn window_start(ts_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(BAR_DURATION_MS)
}

// =============================================================================
// BarAggregator
// =============================================================================

/// Owns the day's bars. Single writer (the session pipeline); consumers get
/// copies.
#[derive(Debug, Default)]
pub struct BarAggregator {
    windows: HashMap<String, Window>,
    closed: HashMap<String, Vec<Bar>>,
    /// Start of the last emitted window per symbol. Guards the
    /// exactly-once invariant; a second emission for the same window is a
    /// fatal invariant breach.
    last_emitted: HashMap<String, i64>,
    day: HashMap<String, DayOhlc>,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick. Returns any bars that closed as a result (the tick
    /// crossing into a new window closes the previous one).
    pub fn on_tick(&mut self, tick: &Tick) -> Result<Vec<Bar>> {
        let bucket = window_start(tick.ts);
        let mut emitted = Vec::new();

        // Day-level running OHLC for the UI.
        self.day
            .entry(tick.symbol.clone())
            .and_modify(|d| {
                d.high = d.high.max(tick.ltp);
                d.low = d.low.min(tick.ltp);
                d.last = tick.ltp;
                d.volume += tick.volume;
            })
            .or_insert(DayOhlc {
                open: tick.ltp,
                high: tick.ltp,
                low: tick.ltp,
                last: tick.ltp,
                volume: tick.volume,
            });

        // A tick for a window that already closed is late data; drop it.
        if let Some(&last) = self.last_emitted.get(&tick.symbol) {
            if bucket <= last {
                warn!(
                    symbol = %tick.symbol,
                    ts = tick.ts,
                    "late tick for an already-closed window, dropped"
                );
                return Ok(emitted);
            }
        }

        match self.windows.get_mut(&tick.symbol) {
            Some(win) if win.start_ms == bucket => {
                win.absorb(tick);
            }
            Some(win) if win.start_ms < bucket => {
                // Tick crossed into a new window: the previous one closes.
                let done = self.windows.remove(&tick.symbol).unwrap();
                emitted.push(self.emit(&tick.symbol, done)?);
                self.windows
                    .insert(tick.symbol.clone(), Window::new(bucket, tick));
            }
            Some(_) => {
                // Current window is ahead of this tick's bucket: the tick is
                // older than anything still open. Late data; drop.
                warn!(symbol = %tick.symbol, ts = tick.ts, "out-of-order tick behind open window, dropped");
            }
            None => {
                self.windows
                    .insert(tick.symbol.clone(), Window::new(bucket, tick));
            }
        }

        Ok(emitted)
    }

    /// Close every window whose end has passed. Called on clock ticks so a
    /// symbol's final bar closes even when no further tick arrives.
    pub fn flush_until(&mut self, now_ms: i64) -> Result<Vec<Bar>> {
        let due: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, w)| w.start_ms + BAR_DURATION_MS <= now_ms)
            .map(|(sym, _)| sym.clone())
            .collect();

        let mut emitted = Vec::new();
        for sym in due {
            if let Some(win) = self.windows.remove(&sym) {
                emitted.push(self.emit(&sym, win)?);
            }
        }
        Ok(emitted)
    }

    fn emit(&mut self, symbol: &str, win: Window) -> Result<Bar> {
        if let Some(&last) = self.last_emitted.get(symbol) {
            if win.start_ms <= last {
                bail!(
                    "duplicate bar for {} at window {} (last emitted {})",
                    symbol,
                    win.start_ms,
                    last
                );
            }
        }
        self.last_emitted.insert(symbol.to_string(), win.start_ms);

        let bar = win.into_bar(symbol);
        debug!(
            symbol = %bar.symbol,
            start_ms = bar.start_ms,
            o = bar.open,
            h = bar.high,
            l = bar.low,
            c = bar.close,
            v = bar.volume,
            "bar closed"
        );
        self.closed
            .entry(symbol.to_string())
            .or_default()
            .push(bar.clone());
        Ok(bar)
    }

    /// All closed bars for a symbol, in window order.
    pub fn closed_bars(&self, symbol: &str) -> &[Bar] {
        self.closed.get(symbol).map_or(&[], Vec::as_slice)
    }

    /// Closed bars with `from_ms <= start < to_ms`.
    pub fn bars_between(&self, symbol: &str, from_ms: i64, to_ms: i64) -> Vec<Bar> {
        self.closed_bars(symbol)
            .iter()
            .filter(|b| b.start_ms >= from_ms && b.start_ms < to_ms)
            .cloned()
            .collect()
    }

    /// Day-level running OHLC, if any tick has arrived for the symbol.
    pub fn day(&self, symbol: &str) -> Option<DayOhlc> {
        self.day.get(symbol).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn tick(sym: &str, ts: i64, ltp: f64, vol: f64) -> Tick {
        Tick {
            symbol: sym.into(),
            ts,
            ltp,
            volume: vol,
        }
    }

    const W0: i64 = 1_736_135_100_000; // 09:15:00 IST on 2025-01-06, 5-min aligned
    const W1: i64 = W0 + BAR_DURATION_MS;

    #[test]
    fn one_bar_per_window() {
        let mut agg = BarAggregator::new();
        assert!(agg.on_tick(&tick("A", W0, 100.0, 10.0)).unwrap().is_empty());
        assert!(agg
            .on_tick(&tick("A", W0 + 60_000, 101.5, 5.0))
            .unwrap()
            .is_empty());

        // First tick of the next window closes the previous one.
        let bars = agg.on_tick(&tick("A", W1, 101.0, 1.0)).unwrap();
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.start_ms, W0);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 101.5);
        assert_eq!(bar.low, 100.0);
        assert_eq!(bar.close, 101.5);
        assert_eq!(bar.volume, 15.0);
        assert_eq!(agg.closed_bars("A").len(), 1);
    }

    #[test]
    fn tick_at_window_end_belongs_to_next_window() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 0.0)).unwrap();
        let bars = agg.on_tick(&tick("A", W1, 105.0, 0.0)).unwrap();
        // The W1-stamped tick closed W0 without contributing to it.
        assert_eq!(bars[0].close, 100.0);
        assert_eq!(bars[0].high, 100.0);
        // And it opened the next window.
        let next = agg.flush_until(W1 + BAR_DURATION_MS).unwrap();
        assert_eq!(next[0].start_ms, W1);
        assert_eq!(next[0].open, 105.0);
    }

    #[test]
    fn out_of_order_within_window_keeps_open_and_latest_close() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0 + 120_000, 100.0, 0.0)).unwrap();
        // Earlier tick arrives late: widens the range, moves neither open nor close.
        agg.on_tick(&tick("A", W0 + 60_000, 99.0, 0.0)).unwrap();
        agg.on_tick(&tick("A", W0 + 180_000, 100.5, 0.0)).unwrap();

        let bars = agg.flush_until(W1).unwrap();
        let bar = &bars[0];
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 100.5);
    }

    #[test]
    fn missing_window_emits_nothing() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 0.0)).unwrap();
        agg.flush_until(W1).unwrap();
        // No ticks in W1; jump straight to W2.
        let w2 = W1 + BAR_DURATION_MS;
        let bars = agg.on_tick(&tick("A", w2, 101.0, 0.0)).unwrap();
        assert!(bars.is_empty());
        assert_eq!(agg.closed_bars("A").len(), 1);
    }

    #[test]
    fn late_tick_after_close_is_dropped() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 0.0)).unwrap();
        agg.flush_until(W1).unwrap();
        let bars = agg.on_tick(&tick("A", W0 + 1_000, 98.0, 0.0)).unwrap();
        assert!(bars.is_empty());
        // The closed bar is untouched.
        assert_eq!(agg.closed_bars("A")[0].low, 100.0);
    }

    #[test]
    fn flush_closes_due_windows_only() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 0.0)).unwrap();
        agg.on_tick(&tick("B", W1, 50.0, 0.0)).unwrap();

        let bars = agg.flush_until(W1).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol, "A");

        let rest = agg.flush_until(W1 + BAR_DURATION_MS).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].symbol, "B");
    }

    #[test]
    fn day_ohlc_tracks_running_session() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 10.0)).unwrap();
        agg.on_tick(&tick("A", W0 + 60_000, 103.0, 5.0)).unwrap();
        agg.on_tick(&tick("A", W0 + 120_000, 99.0, 5.0)).unwrap();

        let day = agg.day("A").unwrap();
        assert_eq!(day.open, 100.0);
        assert_eq!(day.high, 103.0);
        assert_eq!(day.low, 99.0);
        assert_eq!(day.last, 99.0);
        assert_eq!(day.volume, 20.0);
    }

    #[test]
    fn bars_between_is_half_open() {
        let mut agg = BarAggregator::new();
        agg.on_tick(&tick("A", W0, 100.0, 0.0)).unwrap();
        agg.on_tick(&tick("A", W1, 101.0, 0.0)).unwrap();
        agg.flush_until(W1 + BAR_DURATION_MS).unwrap();

        assert_eq!(agg.bars_between("A", W0, W1).len(), 1);
        assert_eq!(agg.bars_between("A", W0, W1 + BAR_DURATION_MS).len(), 2);
    }
}
