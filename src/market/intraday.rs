// =============================================================================
// Intraday CSV — 5-minute bar rows and tick synthesis
// =============================================================================
//
// `intraday/{SYM}_5minute.csv` header: DateTime,Open,High,Low,Close,Volume
// with DateTime in IST ISO-8601. The same parser feeds both the whole-day
// replay source and the incremental poll producer.
//
// Tick synthesis per bar (o,h,l,c): a tick at the open, the two extremes at
// +2m and +3m (order decided by the seeded RNG), and the close at +4:59. The
// full bar volume rides on the closing tick so re-aggregation reproduces the
// CSV exactly.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use rand::Rng;

use crate::clock::{ist_from_millis, IST};
use crate::market::tick_source::Tick;

/// One row of an intraday 5-minute CSV.
#[derive(Debug, Clone, Copy)]
pub struct IntradayRow {
    /// Bar start, epoch ms.
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl IntradayRow {
    pub fn date(&self) -> NaiveDate {
        ist_from_millis(self.ts_ms).date_naive()
    }
}

/// Parse the DateTime column: full ISO-8601 with offset, or a naive local
/// stamp interpreted as IST.
fn parse_ist_datetime(raw: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            let dt = IST
                .from_local_datetime(&naive)
                .single()
                .with_context(|| format!("ambiguous IST datetime: {raw}"))?;
            return Ok(dt.timestamp_millis());
        }
    }
    anyhow::bail!("unparseable DateTime: {raw}")
}

/// Read a whole intraday CSV, rows in file order.
pub fn read_intraday_csv(path: impl AsRef<Path>) -> Result<Vec<IntradayRow>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open intraday csv {}", path.display()))?;

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("bad record at {}:{}", path.display(), i + 2))?;
        let field = |idx: usize, name: &str| -> Result<&str> {
            record
                .get(idx)
                .with_context(|| format!("missing {name} at {}:{}", path.display(), i + 2))
        };

        let ts_ms = parse_ist_datetime(field(0, "DateTime")?)?;
        let open: f64 = field(1, "Open")?.trim().parse()?;
        let high: f64 = field(2, "High")?.trim().parse()?;
        let low: f64 = field(3, "Low")?.trim().parse()?;
        let close: f64 = field(4, "Close")?.trim().parse()?;
        let volume: f64 = field(5, "Volume")?.trim().parse().unwrap_or(0.0);

        rows.push(IntradayRow {
            ts_ms,
            open,
            high,
            low,
            close,
            volume,
        });
    }
    Ok(rows)
}

/// Synthesize the minimum deterministic tick path through one bar:
/// open at t, one extreme at +2m, the other at +3m, close at +4:59.
/// Which extreme comes first is a coin flip from the caller's seeded RNG.
pub fn synthesize_ticks(symbol: &str, row: &IntradayRow, rng: &mut impl Rng) -> Vec<Tick> {
    let high_first: bool = rng.gen();
    let (first, second) = if high_first {
        (row.high, row.low)
    } else {
        (row.low, row.high)
    };

    vec![
        Tick {
            symbol: symbol.to_string(),
            ts: row.ts_ms,
            ltp: row.open,
            volume: 0.0,
        },
        Tick {
            symbol: symbol.to_string(),
            ts: row.ts_ms + 120_000,
            ltp: first,
            volume: 0.0,
        },
        Tick {
            symbol: symbol.to_string(),
            ts: row.ts_ms + 180_000,
            ltp: second,
            volume: 0.0,
        },
        Tick {
            symbol: symbol.to_string(),
            ts: row.ts_ms + 299_000,
            ltp: row.close,
            volume: row.volume,
        },
    ]
}
