// =============================================================================
// Frequency table & bias picker — historical tag-tuple outcome counts
// =============================================================================
//
// The overnight rebuild job tags every historical session and records how it
// resolved (BULL or BEAR). At startup those rows are aggregated into count
// tables at four key levels per symbol:
//
//   L3  (PDC, OL, OT)          — most specific
//   L2  (OL, OT) and (PDC, OT)
//   L1  (OT)
//   L0  marginal
//
// The picker walks L3 → L2 → L1 → L0 until a level has enough samples, then
// applies the confidence floor and the trend-range guard. The table is
// read-only for the life of the process.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::config::PickerParams;
use crate::market::master::MasterTable;
use crate::types::{Direction, FreqLevel, OpenLocation, OpeningTrend, Pdc, Pick};

/// BULL/BEAR outcome counts behind one key.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counts {
    pub bull: u32,
    pub bear: u32,
}

impl Counts {
    fn add(&mut self, result: Direction) {
        match result {
            Direction::Bull => self.bull += 1,
            Direction::Bear => self.bear += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.bull + self.bear
    }

    /// Majority share; 0 for an empty cell.
    pub fn confidence(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.bull.max(self.bear) as f64 / total as f64
    }

    pub fn majority(&self) -> Direction {
        // Ties lean bearish: broken against the trader's optimism.
        if self.bull > self.bear {
            Direction::Bull
        } else {
            Direction::Bear
        }
    }
}

// =============================================================================
// FreqTable
// =============================================================================

#[derive(Debug, Default)]
pub struct FreqTable {
    l3: HashMap<(String, Pdc, OpenLocation, OpeningTrend), Counts>,
    l2_ol_ot: HashMap<(String, OpenLocation, OpeningTrend), Counts>,
    l2_pdc_ot: HashMap<(String, Pdc, OpeningTrend), Counts>,
    l1: HashMap<(String, OpeningTrend), Counts>,
    l0: HashMap<String, Counts>,
}

impl FreqTable {
    /// Aggregate counts from fully-tagged master rows. Rows missing any tag
    /// or the result column are skipped.
    pub fn from_masters(masters: &MasterTable, symbols: &[String]) -> Self {
        let mut table = Self::default();

        for symbol in symbols {
            for row in masters.history(symbol) {
                let (Some(pdc), Some(ol), Some(ot), Some(result)) =
                    (row.pdc, row.ol, row.ot, row.result)
                else {
                    continue;
                };

                table
                    .l3
                    .entry((symbol.clone(), pdc, ol, ot))
                    .or_default()
                    .add(result);
                table
                    .l2_ol_ot
                    .entry((symbol.clone(), ol, ot))
                    .or_default()
                    .add(result);
                table
                    .l2_pdc_ot
                    .entry((symbol.clone(), pdc, ot))
                    .or_default()
                    .add(result);
                table
                    .l1
                    .entry((symbol.clone(), ot))
                    .or_default()
                    .add(result);
                table.l0.entry(symbol.clone()).or_default().add(result);
            }
        }

        table
    }

    fn l3_counts(&self, sym: &str, pdc: Pdc, ol: OpenLocation, ot: OpeningTrend) -> Counts {
        self.l3
            .get(&(sym.to_string(), pdc, ol, ot))
            .copied()
            .unwrap_or_default()
    }
}

// =============================================================================
// Picker
// =============================================================================

/// What the picker decided and why — recorded in the plan for observability.
#[derive(Debug, Clone, Serialize)]
pub struct PickOutcome {
    pub pick: Pick,
    /// Majority share at the level used, 0..1.
    pub confidence: f64,
    pub level: FreqLevel,
    pub samples: u32,
    /// Set when the pick is ABSTAIN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PickOutcome {
    pub fn direction(&self) -> Option<Direction> {
        match self.pick {
            Pick::Bull => Some(Direction::Bull),
            Pick::Bear => Some(Direction::Bear),
            Pick::Abstain => None,
        }
    }

    fn abstain(level: FreqLevel, conf: f64, samples: u32, reason: &str) -> Self {
        Self {
            pick: Pick::Abstain,
            confidence: conf,
            level,
            samples,
            reason: Some(reason.to_string()),
        }
    }
}

/// Pick a directional bias for one symbol's tag tuple.
pub fn pick_bias(
    table: &FreqTable,
    symbol: &str,
    pdc: Pdc,
    ol: OpenLocation,
    ot: OpeningTrend,
    params: &PickerParams,
) -> PickOutcome {
    // Walk L3 → L2 → L1 → L0 until a level carries enough history.
    let sym = symbol.to_string();
    let candidates: [(FreqLevel, Counts, u32); 5] = [
        (FreqLevel::L3, table.l3_counts(symbol, pdc, ol, ot), params.nmin_l3),
        (
            FreqLevel::L2,
            table
                .l2_ol_ot
                .get(&(sym.clone(), ol, ot))
                .copied()
                .unwrap_or_default(),
            params.nmin_l2,
        ),
        (
            FreqLevel::L2,
            table
                .l2_pdc_ot
                .get(&(sym.clone(), pdc, ot))
                .copied()
                .unwrap_or_default(),
            params.nmin_l2,
        ),
        (
            FreqLevel::L1,
            table.l1.get(&(sym.clone(), ot)).copied().unwrap_or_default(),
            params.nmin_l1,
        ),
        (
            FreqLevel::L0,
            table.l0.get(&sym).copied().unwrap_or_default(),
            1,
        ),
    ];

    let Some((level, counts)) = candidates
        .iter()
        .find(|(_, counts, nmin)| counts.total() >= *nmin)
        .map(|(level, counts, _)| (*level, *counts))
    else {
        return PickOutcome::abstain(FreqLevel::L0, 0.0, 0, "no_history");
    };

    let conf = counts.confidence();
    let samples = counts.total();
    debug!(
        symbol,
        %level,
        samples,
        conf = format!("{conf:.3}"),
        "picker level selected"
    );

    if conf < params.conf_min {
        return PickOutcome::abstain(level, conf, samples, "low_confidence");
    }

    // Trend-range guard: a TR opening only trades on strong, specific history.
    if ot == OpeningTrend::Tr && (level != FreqLevel::L3 || conf < params.tr_guard_conf) {
        return PickOutcome::abstain(level, conf, samples, "trend_range_guard");
    }

    PickOutcome {
        pick: counts.majority().as_pick(),
        confidence: conf,
        level,
        samples,
        reason: None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::master::MasterRow;
    use chrono::NaiveDate;

    fn tagged_row(
        day: u32,
        pdc: Pdc,
        ol: OpenLocation,
        ot: OpeningTrend,
        result: Direction,
    ) -> MasterRow {
        MasterRow {
            date: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .checked_add_days(chrono::Days::new(day as u64))
                .unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            pdc: Some(pdc),
            ol: Some(ol),
            ot: Some(ot),
            result: Some(result),
        }
    }

    fn table_with(rows: Vec<MasterRow>) -> FreqTable {
        let mut masters = MasterTable::default();
        masters.insert_for_test("ALPHA", rows);
        FreqTable::from_masters(&masters, &["ALPHA".to_string()])
    }

    fn params() -> PickerParams {
        PickerParams::default()
    }

    #[test]
    fn l3_majority_wins_with_enough_samples() {
        let mut rows = Vec::new();
        for day in 0..7 {
            rows.push(tagged_row(
                day,
                Pdc::Bull,
                OpenLocation::Oim,
                OpeningTrend::Bull,
                Direction::Bull,
            ));
        }
        rows.push(tagged_row(
            7,
            Pdc::Bull,
            OpenLocation::Oim,
            OpeningTrend::Bull,
            Direction::Bear,
        ));
        let table = table_with(rows);

        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Bull,
            OpenLocation::Oim,
            OpeningTrend::Bull,
            &params(),
        );
        assert_eq!(outcome.pick, Pick::Bull);
        assert_eq!(outcome.level, FreqLevel::L3);
        assert_eq!(outcome.samples, 8);
        assert!((outcome.confidence - 7.0 / 8.0).abs() < 1e-9);
        assert!(outcome.reason.is_none());
    }

    #[test]
    fn thin_l3_falls_back_to_l2() {
        // Only 3 sessions at the exact L3 tuple, but 12 sharing (OL, OT)
        // across different PDCs.
        let mut rows = Vec::new();
        for day in 0..3 {
            rows.push(tagged_row(
                day,
                Pdc::Bull,
                OpenLocation::Ooh,
                OpeningTrend::Bull,
                Direction::Bull,
            ));
        }
        for day in 3..12 {
            rows.push(tagged_row(
                day,
                Pdc::Tr,
                OpenLocation::Ooh,
                OpeningTrend::Bull,
                Direction::Bull,
            ));
        }
        let table = table_with(rows);

        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Bull,
            OpenLocation::Ooh,
            OpeningTrend::Bull,
            &params(),
        );
        assert_eq!(outcome.level, FreqLevel::L2);
        assert_eq!(outcome.samples, 12);
        assert_eq!(outcome.pick, Pick::Bull);
    }

    #[test]
    fn low_confidence_abstains() {
        let mut rows = Vec::new();
        for day in 0..4 {
            rows.push(tagged_row(
                day,
                Pdc::Bull,
                OpenLocation::Oim,
                OpeningTrend::Bull,
                Direction::Bull,
            ));
        }
        for day in 4..8 {
            rows.push(tagged_row(
                day,
                Pdc::Bull,
                OpenLocation::Oim,
                OpeningTrend::Bull,
                Direction::Bear,
            ));
        }
        let table = table_with(rows);

        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Bull,
            OpenLocation::Oim,
            OpeningTrend::Bull,
            &params(),
        );
        assert_eq!(outcome.pick, Pick::Abstain);
        assert_eq!(outcome.reason.as_deref(), Some("low_confidence"));
        assert!((outcome.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn tr_opening_needs_strong_l3() {
        // 20 TR-opening sessions resolving bull, spread over four open
        // locations so every L3 tuple stays thin. The pick falls back to
        // L2 (PDC, OT) with high confidence — and the guard still abstains
        // because a TR opening may only trade on L3 history.
        let ols = [
            OpenLocation::Ooh,
            OpenLocation::Ool,
            OpenLocation::Oim,
            OpenLocation::Oar,
        ];
        let mut rows = Vec::new();
        for day in 0..20 {
            let ol = ols[(day % 4) as usize];
            rows.push(tagged_row(day, Pdc::Bull, ol, OpeningTrend::Tr, Direction::Bull));
        }
        let table = table_with(rows);

        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Bull,
            OpenLocation::Ooh,
            OpeningTrend::Tr,
            &params(),
        );
        assert_eq!(outcome.pick, Pick::Abstain);
        assert_eq!(outcome.reason.as_deref(), Some("trend_range_guard"));
    }

    #[test]
    fn tr_opening_passes_with_strong_specific_history() {
        let mut rows = Vec::new();
        for day in 0..10 {
            rows.push(tagged_row(
                day,
                Pdc::Bull,
                OpenLocation::Ooh,
                OpeningTrend::Tr,
                Direction::Bull,
            ));
        }
        let table = table_with(rows);

        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Bull,
            OpenLocation::Ooh,
            OpeningTrend::Tr,
            &params(),
        );
        assert_eq!(outcome.pick, Pick::Bull);
        assert_eq!(outcome.level, FreqLevel::L3);
        assert!(outcome.confidence >= 0.65);
    }

    #[test]
    fn unknown_symbol_abstains_with_no_history() {
        let table = table_with(Vec::new());
        let outcome = pick_bias(
            &table,
            "ALPHA",
            Pdc::Tr,
            OpenLocation::Oim,
            OpeningTrend::Bull,
            &params(),
        );
        assert_eq!(outcome.pick, Pick::Abstain);
        assert_eq!(outcome.reason.as_deref(), Some("no_history"));
        assert_eq!(outcome.samples, 0);
    }
}
