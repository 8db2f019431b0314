use std::time::{Duration, Instant};

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::engine::types::{PositionState, Venue};
use crate::retry::with_retry;
use crate::venue::VenueClient;

const IMBALANCE_WARNING_COOLDOWN: Duration = Duration::from_secs(30);
const RESYNC_RETRY_ATTEMPTS: usize = 3;
const RESYNC_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Cached positions per venue with periodic authoritative re-sync and
/// naked-position detection. Mutated only by the `TradeController` task
/// and its order-update handlers, mirroring the teacher's
/// `InventoryManager::apply_fill` single-writer discipline.
pub struct PositionTracker {
    state: PositionState,
    tolerance: Decimal,
    order_qty: Decimal,
    last_sync: Instant,
    last_imbalance_warning: Option<Instant>,
}

impl PositionTracker {
    pub fn new(config: &EngineConfig) -> Self {
        PositionTracker {
            state: PositionState::flat(),
            tolerance: config.position_tolerance,
            order_qty: config.order_quantity,
            last_sync: Instant::now(),
            last_imbalance_warning: None,
        }
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn net(&self) -> Decimal {
        self.state.net()
    }

    pub fn is_naked(&self) -> bool {
        self.state.is_naked(self.tolerance)
    }

    /// Mutates the cache in place from a confirmed fill. Tracks the
    /// maker-venue open timestamp transition: set when `m_pos` moves away
    /// from zero, cleared when it returns to zero.
    pub fn apply_fill(&mut self, venue: Venue, signed_size: Decimal) {
        let was_flat = self.state.m_pos.is_zero();
        match venue {
            Venue::Maker => self.state.m_pos += signed_size,
            Venue::Taker => self.state.t_pos += signed_size,
        }

        if venue == Venue::Maker {
            if was_flat && !self.state.m_pos.is_zero() {
                self.state.open_ts = Some(Instant::now());
            } else if self.state.m_pos.is_zero() {
                self.state.open_ts = None;
            }
        }

        self.maybe_warn_imbalance();
    }

    fn maybe_warn_imbalance(&mut self) {
        let net = self.state.net().abs();
        if net <= self.order_qty / Decimal::TWO {
            return;
        }
        let now = Instant::now();
        let should_log = match self.last_imbalance_warning {
            Some(t) => now.duration_since(t) >= IMBALANCE_WARNING_COOLDOWN,
            None => true,
        };
        if should_log {
            warn!(
                m_pos = %self.state.m_pos, t_pos = %self.state.t_pos, net = %self.state.net(),
                "position tracker: hedge imbalance above half an order's size"
            );
            self.last_imbalance_warning = Some(now);
        }
        if self.is_naked() {
            error!(
                m_pos = %self.state.m_pos, t_pos = %self.state.t_pos,
                "position tracker: naked position detected, same sign on both venues"
            );
        }
    }

    pub fn due_for_resync(&self, interval: Duration) -> bool {
        self.last_sync.elapsed() >= interval
    }

    /// Queries both venues authoritatively and replaces the cache when it
    /// differs from the cached value by more than the configured
    /// tolerance. Called periodically and after every completed trade.
    pub async fn resync<M: VenueClient, T: VenueClient>(
        &mut self,
        maker: &M,
        taker: &T,
        symbol: &str,
    ) -> Result<()> {
        let actual_m = with_retry(RESYNC_RETRY_ATTEMPTS, RESYNC_RETRY_DELAY, || maker.position(symbol)).await?;
        let actual_t = with_retry(RESYNC_RETRY_ATTEMPTS, RESYNC_RETRY_DELAY, || taker.position(symbol)).await?;

        if (actual_m - self.state.m_pos).abs() > self.tolerance {
            warn!(cached = %self.state.m_pos, actual = %actual_m, "position tracker: maker cache mismatch, replacing with actual");
            self.state.m_pos = actual_m;
            self.state.open_ts = if actual_m.is_zero() { None } else { self.state.open_ts.or(Some(Instant::now())) };
        }
        if (actual_t - self.state.t_pos).abs() > self.tolerance {
            warn!(cached = %self.state.t_pos, actual = %actual_t, "position tracker: taker cache mismatch, replacing with actual");
            self.state.t_pos = actual_t;
        }

        self.last_sync = Instant::now();
        Ok(())
    }
}
