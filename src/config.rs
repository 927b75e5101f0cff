// =============================================================================
// Configuration — YAML settings read once at startup, env-overridable
// =============================================================================
//
// Everything tunable lives here and is threaded explicitly from `main`
// through constructors; no component reads files or env on its own. Every
// field carries a serde default so an older config file never breaks loading.
//
// Environment overrides (applied after the file):
//   MODE         — LIVE | PAPER | SIM
//   DATA_DIR     — prefixes every relative path
//   ENABLE_AGG5  — spawn the 5-minute CSV poll producer (live/paper)
//   RESET_STATE  — discard any persisted live_state.json on startup
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StartupError;
use crate::timeline::Cutovers;
use crate::types::Mode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "RELIANCE".to_string(),
        "HDFCBANK".to_string(),
        "INFY".to_string(),
        "TCS".to_string(),
        "ICICIBANK".to_string(),
    ]
}

fn default_intraday_dir() -> PathBuf {
    PathBuf::from("intraday")
}

fn default_masters_dir() -> PathBuf {
    PathBuf::from("masters")
}

fn default_journal_dir() -> PathBuf {
    PathBuf::from("journal")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_daily_rs() -> f64 {
    10_000.0
}

fn default_per_trade_rs() -> f64 {
    1_000.0
}

fn default_r_atr_mult() -> f64 {
    1.0
}

fn default_nmin_l3() -> u32 {
    8
}

fn default_nmin_l2() -> u32 {
    12
}

fn default_nmin_l1() -> u32 {
    20
}

fn default_conf_min() -> f64 {
    0.55
}

fn default_tr_guard_conf() -> f64 {
    0.65
}

fn default_ot_ret_threshold() -> f64 {
    0.001
}

fn default_cadence_secs() -> u64 {
    2
}

fn default_replay_seed() -> u64 {
    20240915
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Sections
// =============================================================================

/// Filesystem layout for inputs and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    /// `{intraday}/{SYM}_5minute.csv`
    #[serde(default = "default_intraday_dir")]
    pub intraday: PathBuf,
    /// `{masters}/{SYM}_5MINUTE_MASTER.csv`
    #[serde(default = "default_masters_dir")]
    pub masters: PathBuf,
    /// `{journal}/fills_YYYY-MM-DD.jsonl`
    #[serde(default = "default_journal_dir")]
    pub journal: PathBuf,
    /// `{state}/live_state.json` and `{state}/plan_snapshot_YYYY-MM-DD.json`
    #[serde(default = "default_state_dir")]
    pub state: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            intraday: default_intraday_dir(),
            masters: default_masters_dir(),
            journal: default_journal_dir(),
            state: default_state_dir(),
        }
    }
}

impl Paths {
    fn prefix_with(&mut self, base: &Path) {
        for p in [
            &mut self.intraday,
            &mut self.masters,
            &mut self.journal,
            &mut self.state,
        ] {
            if p.is_relative() {
                let joined = base.join(p.as_path());
                *p = joined;
            }
        }
    }

    pub fn intraday_csv(&self, symbol: &str) -> PathBuf {
        self.intraday.join(format!("{symbol}_5minute.csv"))
    }

    pub fn master_csv(&self, symbol: &str) -> PathBuf {
        self.masters.join(format!("{symbol}_5MINUTE_MASTER.csv"))
    }
}

/// Rupee-denominated risk budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskParams {
    /// One-way daily loss latch: realized P&L below −daily_rs halts entries.
    #[serde(default = "default_daily_rs")]
    pub daily_rs: f64,
    /// Risk per trade; qty = ⌊per_trade_rs / R⌋.
    #[serde(default = "default_per_trade_rs")]
    pub per_trade_rs: f64,
    /// ATR multiplier `k` in the stop placement.
    #[serde(default = "default_r_atr_mult")]
    pub r_atr_mult: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            daily_rs: default_daily_rs(),
            per_trade_rs: default_per_trade_rs(),
            r_atr_mult: default_r_atr_mult(),
        }
    }
}

/// Frequency-table picker thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PickerParams {
    /// Minimum L3 samples before the most specific key is trusted.
    #[serde(default = "default_nmin_l3")]
    pub nmin_l3: u32,
    #[serde(default = "default_nmin_l2")]
    pub nmin_l2: u32,
    #[serde(default = "default_nmin_l1")]
    pub nmin_l1: u32,
    /// Below this confidence the pick is ABSTAIN regardless of level.
    #[serde(default = "default_conf_min")]
    pub conf_min: f64,
    /// When OT = TR the pick must come from L3 at or above this confidence.
    #[serde(default = "default_tr_guard_conf")]
    pub tr_guard_conf: f64,
    /// Cumulative-return threshold for the OT classification.
    #[serde(default = "default_ot_ret_threshold")]
    pub ot_ret_threshold: f64,
}

impl Default for PickerParams {
    fn default() -> Self {
        Self {
            nmin_l3: default_nmin_l3(),
            nmin_l2: default_nmin_l2(),
            nmin_l1: default_nmin_l1(),
            conf_min: default_conf_min(),
            tr_guard_conf: default_tr_guard_conf(),
            ot_ret_threshold: default_ot_ret_threshold(),
        }
    }
}

/// Paper-engine loop cadence and replay determinism knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineParams {
    /// Seconds between paper-engine time sweeps (1–2 s band).
    #[serde(default = "default_cadence_secs")]
    pub cadence_secs: u64,
    /// Seed for replay tick synthesis; same seed, same tick sequence.
    #[serde(default = "default_replay_seed")]
    pub replay_seed: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            cadence_secs: default_cadence_secs(),
            replay_seed: default_replay_seed(),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

/// Top-level configuration for the Probedge terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,

    /// The fixed universe tracked today.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub paths: Paths,

    #[serde(default)]
    pub risk: RiskParams,

    #[serde(default)]
    pub cutovers: Cutovers,

    #[serde(default)]
    pub picker: PickerParams,

    #[serde(default)]
    pub engine: EngineParams,

    /// HTTP bind address for the read-only API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Spawn the 5-minute CSV poll producer in live/paper mode.
    #[serde(default = "default_true", skip_serializing)]
    pub enable_agg5: bool,

    /// Discard any persisted live_state.json on startup.
    #[serde(default, skip_serializing)]
    pub reset_state: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            symbols: default_symbols(),
            paths: Paths::default(),
            risk: RiskParams::default(),
            cutovers: Cutovers::default(),
            picker: PickerParams::default(),
            engine: EngineParams::default(),
            bind_addr: default_bind_addr(),
            enable_agg5: true,
            reset_state: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            mode = %config.mode,
            symbols = ?config.symbols,
            "config loaded"
        );

        Ok(config)
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) -> Result<(), StartupError> {
        if let Ok(raw) = std::env::var("MODE") {
            self.mode = raw
                .parse()
                .map_err(|e: String| StartupError::Config(e))?;
        }
        if let Ok(dir) = std::env::var("DATA_DIR") {
            self.paths.prefix_with(Path::new(&dir));
        }
        if let Ok(raw) = std::env::var("ENABLE_AGG5") {
            self.enable_agg5 = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes");
        }
        if let Ok(raw) = std::env::var("RESET_STATE") {
            self.reset_state = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes");
        }
        Ok(())
    }

    /// Validate what must hold before any subsystem starts.
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.symbols.is_empty() {
            return Err(StartupError::Config("symbols list is empty".into()));
        }
        if self.risk.per_trade_rs <= 0.0 || self.risk.daily_rs <= 0.0 {
            return Err(StartupError::Config(
                "risk budgets must be positive".into(),
            ));
        }
        if !(self.picker.conf_min > 0.0 && self.picker.conf_min < 1.0) {
            return Err(StartupError::Config(
                "picker.conf_min must be in (0, 1)".into(),
            ));
        }
        if self.engine.cadence_secs == 0 || self.engine.cadence_secs > 2 {
            return Err(StartupError::Config(
                "engine.cadence_secs must be 1 or 2".into(),
            ));
        }
        if !self.paths.masters.is_dir() {
            return Err(StartupError::MissingDependency(format!(
                "masters directory not found: {}",
                self.paths.masters.display()
            )));
        }
        Ok(())
    }
}
