// =============================================================================
// Master files — per-session statistics from the overnight rebuild job
// =============================================================================
//
// `masters/{SYM}_5MINUTE_MASTER.csv` header:
//   Date,Open,High,Low,Close,PDC,OL,OT,Result
//
// One row per historical session, oldest first. The last row before today
// supplies the prior-day OHLC that seeds the classifier; the tag + Result
// columns feed the frequency table. Tag columns may be empty on old rows —
// such rows contribute nothing to the counts.
//
// A symbol with no master file (or no prior-day row) degrades to null tags
// and a READY_PARTIAL plan; it is never an error past startup.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::Paths;
use crate::types::{Direction, OpenLocation, OpeningTrend, Pdc};

/// One historical session row for a symbol.
#[derive(Debug, Clone)]
pub struct MasterRow {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub pdc: Option<Pdc>,
    pub ol: Option<OpenLocation>,
    pub ot: Option<OpeningTrend>,
    /// How the session resolved after the open; feeds the frequency counts.
    pub result: Option<Direction>,
}

impl MasterRow {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

fn parse_pdc(s: &str) -> Option<Pdc> {
    match s.trim() {
        "BULL" => Some(Pdc::Bull),
        "BEAR" => Some(Pdc::Bear),
        "TR" => Some(Pdc::Tr),
        _ => None,
    }
}

fn parse_ol(s: &str) -> Option<OpenLocation> {
    match s.trim() {
        "OAR" => Some(OpenLocation::Oar),
        "OOH" => Some(OpenLocation::Ooh),
        "OIM" => Some(OpenLocation::Oim),
        "OOL" => Some(OpenLocation::Ool),
        "OBR" => Some(OpenLocation::Obr),
        _ => None,
    }
}

fn parse_ot(s: &str) -> Option<OpeningTrend> {
    match s.trim() {
        "BULL" => Some(OpeningTrend::Bull),
        "BEAR" => Some(OpeningTrend::Bear),
        "TR" => Some(OpeningTrend::Tr),
        _ => None,
    }
}

fn parse_result(s: &str) -> Option<Direction> {
    match s.trim() {
        "BULL" => Some(Direction::Bull),
        "BEAR" => Some(Direction::Bear),
        _ => None,
    }
}

/// Read one master CSV, rows in file order.
pub fn read_master_csv(path: impl AsRef<Path>) -> Result<Vec<MasterRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open master csv {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("bad record at {}:{}", path.display(), i + 2))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let date = NaiveDate::parse_from_str(field(0).trim(), "%Y-%m-%d")
            .with_context(|| format!("bad Date at {}:{}", path.display(), i + 2))?;

        rows.push(MasterRow {
            date,
            open: field(1).trim().parse()?,
            high: field(2).trim().parse()?,
            low: field(3).trim().parse()?,
            close: field(4).trim().parse()?,
            pdc: parse_pdc(field(5)),
            ol: parse_ol(field(6)),
            ot: parse_ot(field(7)),
            result: parse_result(field(8)),
        });
    }
    Ok(rows)
}

// =============================================================================
// MasterTable
// =============================================================================

/// Read-only, loaded once at startup.
#[derive(Debug, Default)]
pub struct MasterTable {
    rows: HashMap<String, Vec<MasterRow>>,
}

impl MasterTable {
    /// Load masters for the whole universe. Symbols whose file is missing or
    /// unreadable are reported back so the caller can degrade them to null
    /// tags.
    pub fn load(paths: &Paths, symbols: &[String]) -> (Self, Vec<String>) {
        let mut rows = HashMap::new();
        let mut missing = Vec::new();

        for symbol in symbols {
            let path = paths.master_csv(symbol);
            match read_master_csv(&path) {
                Ok(mut r) => {
                    r.sort_by_key(|row| row.date);
                    info!(symbol = %symbol, sessions = r.len(), "master loaded");
                    rows.insert(symbol.clone(), r);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "master unavailable, symbol degrades to null tags");
                    missing.push(symbol.clone());
                }
            }
        }

        (Self { rows }, missing)
    }

    /// True when not a single symbol has master history — a startup
    /// dependency failure.
    pub fn is_empty(&self) -> bool {
        self.rows.values().all(Vec::is_empty) || self.rows.is_empty()
    }

    /// Full history for a symbol, oldest first.
    pub fn history(&self, symbol: &str) -> &[MasterRow] {
        self.rows.get(symbol).map_or(&[], Vec::as_slice)
    }

    /// The most recent session strictly before `today`.
    pub fn prev_session(&self, symbol: &str, today: NaiveDate) -> Option<&MasterRow> {
        self.history(symbol)
            .iter()
            .rev()
            .find(|row| row.date < today)
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, symbol: &str, rows: Vec<MasterRow>) {
        self.rows.insert(symbol.to_string(), rows);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_master(dir: &Path, symbol: &str, body: &str) {
        let path = dir.join(format!("{symbol}_5MINUTE_MASTER.csv"));
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "Date,Open,High,Low,Close,PDC,OL,OT,Result").unwrap();
        write!(f, "{body}").unwrap();
    }

    #[test]
    fn reads_rows_with_and_without_tags() {
        let dir = tempfile::tempdir().unwrap();
        write_master(
            dir.path(),
            "ALPHA",
            "2024-12-30,100,104,99,103,BULL,OIM,BULL,BULL\n\
             2024-12-31,103,105,101,102,,,,\n",
        );
        let rows =
            read_master_csv(dir.path().join("ALPHA_5MINUTE_MASTER.csv")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pdc, Some(Pdc::Bull));
        assert_eq!(rows[0].result, Some(Direction::Bull));
        assert!(rows[1].pdc.is_none());
        assert!(rows[1].result.is_none());
        assert_eq!(rows[0].range(), 5.0);
    }

    #[test]
    fn prev_session_skips_today_and_future() {
        let dir = tempfile::tempdir().unwrap();
        write_master(
            dir.path(),
            "ALPHA",
            "2025-01-02,100,104,99,103,BULL,OIM,BULL,BULL\n\
             2025-01-03,103,105,101,102,TR,OOH,TR,BEAR\n\
             2025-01-06,102,106,101,105,BULL,OAR,BULL,BULL\n",
        );
        let paths = Paths {
            masters: dir.path().to_path_buf(),
            ..Paths::default()
        };
        let (table, missing) = MasterTable::load(&paths, &["ALPHA".to_string()]);
        assert!(missing.is_empty());

        let today = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let prev = table.prev_session("ALPHA", today).unwrap();
        assert_eq!(prev.date, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
    }

    #[test]
    fn missing_file_degrades_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            masters: dir.path().to_path_buf(),
            ..Paths::default()
        };
        let (table, missing) =
            MasterTable::load(&paths, &["GHOST".to_string()]);
        assert_eq!(missing, vec!["GHOST".to_string()]);
        assert!(table.is_empty());
        assert!(table
            .prev_session("GHOST", NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
            .is_none());
    }
}
