// =============================================================================
// Shared types used across the Probedge decision terminal
// =============================================================================

use serde::{Deserialize, Serialize};

/// How the terminal is being driven: real broker feed, paper trading on live
/// quotes, or deterministic CSV replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Live,
    Paper,
    Sim,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Paper
    }
}

impl Mode {
    /// Replay mode runs on the virtual clock and must stay deterministic.
    pub fn is_sim(&self) -> bool {
        matches!(self, Self::Sim)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "LIVE"),
            Self::Paper => write!(f, "PAPER"),
            Self::Sim => write!(f, "SIM"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LIVE" => Ok(Self::Live),
            "PAPER" => Ok(Self::Paper),
            "SIM" => Ok(Self::Sim),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

// =============================================================================
// Session tags
// =============================================================================

/// Previous Day Context — how the prior session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pdc {
    Bull,
    Bear,
    Tr,
}

impl std::fmt::Display for Pdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
            Self::Tr => write!(f, "TR"),
        }
    }
}

/// Open Location — where today's 09:15 open sits relative to the prior day's
/// range: above the high, upper half, inside the real body, lower half, or
/// below the low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenLocation {
    Oar,
    Ooh,
    Oim,
    Ool,
    Obr,
}

impl std::fmt::Display for OpenLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oar => write!(f, "OAR"),
            Self::Ooh => write!(f, "OOH"),
            Self::Oim => write!(f, "OIM"),
            Self::Ool => write!(f, "OOL"),
            Self::Obr => write!(f, "OBR"),
        }
    }
}

/// Opening Trend — direction of the first 25 minutes (09:15–09:40).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpeningTrend {
    Bull,
    Bear,
    Tr,
}

impl std::fmt::Display for OpeningTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
            Self::Tr => write!(f, "TR"),
        }
    }
}

// =============================================================================
// Picks and positions
// =============================================================================

/// The day's directional bet for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pick {
    Bull,
    Bear,
    Abstain,
}

impl std::fmt::Display for Pick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
            Self::Abstain => write!(f, "ABSTAIN"),
        }
    }
}

/// Trade direction. Also used for historical session outcomes in the master
/// files (a session resolves either bullish or bearish after the open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bull,
    Bear,
}

impl Direction {
    /// +1.0 for BULL, -1.0 for BEAR; multiplies price deltas into P&L.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Bull => 1.0,
            Self::Bear => -1.0,
        }
    }

    pub fn as_pick(&self) -> Pick {
        match self {
            Self::Bull => Pick::Bull,
            Self::Bear => Pick::Bear,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
        }
    }
}

/// Side of a simulated fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Life-cycle of a paper position: PENDING → OPEN → CLOSED, or
/// PENDING → CLOSED when the entry is never crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Why a position left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Sl,
    Tp1,
    Tp2,
    Time,
    Kill,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sl => write!(f, "SL"),
            Self::Tp1 => write!(f, "TP1"),
            Self::Tp2 => write!(f, "TP2"),
            Self::Time => write!(f, "TIME"),
            Self::Kill => write!(f, "KILL"),
        }
    }
}

// =============================================================================
// Plan and risk statuses
// =============================================================================

/// Status of the day's plan snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Missing,
    Building,
    Ready,
    ReadyPartial,
    Failed,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Missing
    }
}

impl PlanStatus {
    /// A snapshot in a terminal, tradeable state.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready | Self::ReadyPartial)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "MISSING"),
            Self::Building => write!(f, "BUILDING"),
            Self::Ready => write!(f, "READY"),
            Self::ReadyPartial => write!(f, "READY_PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Whether the risk layer is allowing new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskStatus {
    Normal,
    Halted,
}

impl Default for RiskStatus {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// Component liveness derived from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Ok,
    Warn,
    Down,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Specificity of the frequency-table key that produced a pick
/// (L3 most specific, L0 the marginal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreqLevel {
    L0,
    L1,
    L2,
    L3,
}

impl std::fmt::Display for FreqLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L0 => write!(f, "L0"),
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::L3 => write!(f, "L3"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("sim".parse::<Mode>().unwrap(), Mode::Sim);
        assert_eq!(" LIVE ".parse::<Mode>().unwrap(), Mode::Live);
        assert!("robot".parse::<Mode>().is_err());
    }

    #[test]
    fn tag_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&Pdc::Bull).unwrap(), "\"BULL\"");
        assert_eq!(serde_json::to_string(&OpenLocation::Oim).unwrap(), "\"OIM\"");
        assert_eq!(
            serde_json::to_string(&PlanStatus::ReadyPartial).unwrap(),
            "\"READY_PARTIAL\""
        );
        assert_eq!(serde_json::to_string(&ExitReason::Time).unwrap(), "\"TIME\"");
        let ol: OpenLocation = serde_json::from_str("\"OBR\"").unwrap();
        assert_eq!(ol, OpenLocation::Obr);
    }

    #[test]
    fn direction_sign_drives_pnl() {
        assert_eq!(Direction::Bull.sign(), 1.0);
        assert_eq!(Direction::Bear.sign(), -1.0);
        assert_eq!(Direction::Bear.as_pick(), Pick::Bear);
    }

    #[test]
    fn plan_status_readiness() {
        assert!(PlanStatus::Ready.is_ready());
        assert!(PlanStatus::ReadyPartial.is_ready());
        assert!(!PlanStatus::Failed.is_ready());
        assert!(!PlanStatus::Missing.is_ready());
    }
}
