// =============================================================================
// Timeline gate — the one predicate deciding what may be revealed when
// =============================================================================
//
// Every producer asks the gate before computing or publishing anything that is
// time-gated: the classifier will not compute OT before its cutover even if
// all five opening bars are already present. The HTTP layer never withholds
// data; it serves raw values plus `plan_status` / `plan_locked` and the UI
// applies the same predicate client-side.
// =============================================================================

use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::PlanStatus;

/// A field family whose visibility is governed by the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealField {
    Quote,
    Ohlc,
    TagPdc,
    TagOl,
    TagOt,
}

fn default_pdc_cutover() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 25, 0).unwrap()
}

fn default_ol_cutover() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap()
}

fn default_ot_cutover() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 40, 1).unwrap()
}

fn default_eod_flatten() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 5, 0).unwrap()
}

/// The hard IST cutover schedule. OT fires at 09:40:01, after the
/// 09:35–09:40 bar has closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cutovers {
    #[serde(default = "default_pdc_cutover")]
    pub pdc: NaiveTime,
    #[serde(default = "default_ol_cutover")]
    pub ol: NaiveTime,
    #[serde(default = "default_ot_cutover")]
    pub ot: NaiveTime,
    #[serde(default = "default_eod_flatten")]
    pub eod_flatten: NaiveTime,
}

impl Default for Cutovers {
    fn default() -> Self {
        Self {
            pdc: default_pdc_cutover(),
            ol: default_ol_cutover(),
            ot: default_ot_cutover(),
            eod_flatten: default_eod_flatten(),
        }
    }
}

/// Pure predicate over the clock; holds no mutable state.
#[derive(Debug, Clone, Copy)]
pub struct TimelineGate {
    cutovers: Cutovers,
}

impl TimelineGate {
    pub fn new(cutovers: Cutovers) -> Self {
        Self { cutovers }
    }

    pub fn cutovers(&self) -> &Cutovers {
        &self.cutovers
    }

    /// May `field` be revealed at `now`? Quotes and OHLC are always visible;
    /// tags unlock at their cutovers.
    pub fn reveal(&self, field: RevealField, now: DateTime<Tz>) -> bool {
        let t = now.time();
        match field {
            RevealField::Quote | RevealField::Ohlc => true,
            RevealField::TagPdc => t >= self.cutovers.pdc,
            RevealField::TagOl => t >= self.cutovers.ol,
            RevealField::TagOt => t >= self.cutovers.ot,
        }
    }

    /// Plan visibility is not time-based: the snapshot must be locked in a
    /// tradeable terminal status.
    pub fn plan_visible(status: PlanStatus, locked: bool) -> bool {
        status.is_ready() && locked
    }

    /// Past the force-flat time: no entries, all OPEN positions close.
    pub fn session_over(&self, now: DateTime<Tz>) -> bool {
        now.time() >= self.cutovers.eod_flatten
    }
}
