// =============================================================================
// Tick source — one capability, two transports
// =============================================================================
//
// Live/paper mode consumes ticks from a bounded in-process channel fed by
// whatever transport hosts the broker bridge (here: the 5-minute CSV poll
// producer in `replay.rs`). Replay mode drains a pre-synthesized,
// deterministic tick queue and drives the virtual clock.
//
// Backpressure: the live channel is a ring — when a slow consumer lags, the
// oldest quotes are dropped and counted. Bars are never at risk: they are
// derived downstream by the aggregator from whatever ticks do arrive, and the
// CSV poll producer re-reads closed bars from disk on the next pass.
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::market::replay::ReplayTickSource;

/// Capacity of the live tick ring. At a handful of symbols and one tick per
/// bar-close this is hours of headroom.
const LIVE_CHANNEL_CAPACITY: usize = 4096;

/// A single observed trade: symbol, exchange timestamp (epoch ms), last
/// traded price, and traded volume attributed to this tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub ts: i64,
    pub ltp: f64,
    pub volume: f64,
}

/// Sending half of the live tick channel.
#[derive(Debug, Clone)]
pub struct LiveTickHandle {
    tx: broadcast::Sender<Tick>,
}

impl LiveTickHandle {
    /// Push a tick to the consumer. Returns false when the feed is closed.
    pub fn push(&self, tick: Tick) -> bool {
        self.tx.send(tick).is_ok()
    }
}

/// Create the bounded live tick channel.
pub fn live_channel() -> (LiveTickHandle, TickFeed) {
    let (tx, rx) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
    (LiveTickHandle { tx }, TickFeed::Live(rx))
}

/// The tick source behind which both transports sit. `next()` yields ticks
/// until end-of-stream, `close()` ends the feed early.
pub enum TickFeed {
    Live(broadcast::Receiver<Tick>),
    Replay(ReplayTickSource),
    Closed,
}

impl TickFeed {
    /// Next tick, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<Tick> {
        loop {
            match self {
                Self::Live(rx) => match rx.recv().await {
                    Ok(tick) => return Some(tick),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Ring overflow: oldest quotes dropped, keep reading.
                        warn!(dropped = n, "tick feed lagged, oldest quotes dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("live tick channel closed");
                        return None;
                    }
                },
                Self::Replay(replay) => return replay.next(),
                Self::Closed => return None,
            }
        }
    }

    /// Stop the feed; subsequent `next()` calls return `None`.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}
