use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::engine::book::{fetch_rest_fallback, CacheEntry};
use crate::engine::close_stage::CloseStageSelector;
use crate::engine::datalog::DataLog;
use crate::engine::maker_leg::MakerLeg;
use crate::engine::position::PositionTracker;
use crate::engine::taker_leg::TakerLeg;
use crate::engine::threshold::ThresholdEngine;
use crate::engine::types::{ContractInfo, OrderUpdate, Side, TradeSignal, Venue};
use crate::venue::VenueClient;

const REST_FETCH_BUDGET: Duration = Duration::from_secs(2);
const REST_TIMEOUT_BACKOFF: Duration = Duration::from_millis(100);
const IDLE_SLEEP: Duration = Duration::from_millis(10);
const HOURLY: Duration = Duration::from_secs(3600);
const TRADE_DEADLINE: Duration = Duration::from_secs(180);

/// Pure function from §3: derives the trade signal from the current BBOs,
/// rolling thresholds, the close-stage band, and the cached maker position.
/// Opening a long when `current ≤ 0` also closes a prior short — there is
/// no separate close-threshold branch for a held short, matching the
/// reference implementation's literal (and documented) asymmetry with the
/// short-open branch.
#[allow(clippy::too_many_arguments)]
pub fn derive_signal(
    long_spread: Decimal,
    short_spread: Decimal,
    open_long_th: Decimal,
    open_short_th: Decimal,
    close_short_th: Decimal,
    current: Decimal,
    max_position: Decimal,
) -> TradeSignal {
    if long_spread > open_long_th && current <= Decimal::ZERO && current > -max_position {
        TradeSignal::OpenLong
    } else if current > Decimal::ZERO && short_spread > close_short_th {
        TradeSignal::CloseLong
    } else if current.is_zero() && short_spread > open_short_th && current > -max_position {
        TradeSignal::OpenShort
    } else {
        TradeSignal::None
    }
}

pub struct TradeController<'a, M: VenueClient, T: VenueClient> {
    config: EngineConfig,
    maker: &'a M,
    taker: &'a T,
    maker_contract: ContractInfo,
    taker_contract: ContractInfo,
    cache_m: watch::Receiver<CacheEntry>,
    cache_t: watch::Receiver<CacheEntry>,
    updates_m: mpsc::Receiver<OrderUpdate>,
    updates_t: mpsc::Receiver<OrderUpdate>,
    stop: watch::Receiver<bool>,

    threshold: ThresholdEngine,
    close_stage: CloseStageSelector,
    position: PositionTracker,
    datalog: Option<DataLog>,

    last_bbo_log: Option<Instant>,
    last_status_log: Option<Instant>,
}

#[allow(clippy::too_many_arguments)]
impl<'a, M: VenueClient, T: VenueClient> TradeController<'a, M, T> {
    pub fn new(
        config: EngineConfig,
        maker: &'a M,
        taker: &'a T,
        maker_contract: ContractInfo,
        taker_contract: ContractInfo,
        cache_m: watch::Receiver<CacheEntry>,
        cache_t: watch::Receiver<CacheEntry>,
        updates_m: mpsc::Receiver<OrderUpdate>,
        updates_t: mpsc::Receiver<OrderUpdate>,
        stop: watch::Receiver<bool>,
        datalog: Option<DataLog>,
    ) -> Self {
        let threshold = ThresholdEngine::new(&config);
        let close_stage = CloseStageSelector::new(&config);
        let position = PositionTracker::new(&config);

        TradeController {
            config,
            maker,
            taker,
            maker_contract,
            taker_contract,
            cache_m,
            cache_t,
            updates_m,
            updates_t,
            stop,
            threshold,
            close_stage,
            position,
            datalog,
            last_bbo_log: None,
            last_status_log: None,
        }
    }

    fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }

    /// Hands the data log back to the caller so it can be flushed and
    /// closed explicitly during shutdown rather than dropped mid-write.
    pub fn take_datalog(&mut self) -> Option<DataLog> {
        self.datalog.take()
    }

    /// Applies any order updates waiting on either channel without blocking.
    /// Between trade pipelines these are always stale tickets (S3): they're
    /// folded into the position cache but never trigger a hedge.
    fn drain_stale_updates(&mut self) {
        while let Ok(update) = self.updates_m.try_recv() {
            self.apply_stale(Venue::Maker, update);
        }
        while let Ok(update) = self.updates_t.try_recv() {
            self.apply_stale(Venue::Taker, update);
        }
    }

    fn apply_stale(&mut self, venue: Venue, update: OrderUpdate) {
        use crate::engine::types::OrderStatus;
        if update.effective_status() != OrderStatus::Filled || update.cum_filled_size.is_zero() {
            return;
        }
        warn!(
            client_id = %update.client_id, venue = venue.as_str(), filled = %update.cum_filled_size,
            "controller: stale order update folded into position cache, no hedge triggered"
        );
        let signed = update.cum_filled_size * update.side.signum();
        self.position.apply_fill(venue, signed);
    }

    pub async fn run(&mut self) {
        info!(ticker = %self.config.ticker, "trade controller: starting main loop");

        loop {
            if self.is_stopping() {
                info!("trade controller: stop flag set, exiting loop");
                return;
            }

            if self.position.due_for_resync(self.config.resync_interval) {
                if let Err(err) = self.position.resync(self.maker, self.taker, &self.config.ticker).await {
                    warn!(error = %err, "trade controller: resync failed");
                }
                if self.position.is_naked() {
                    error!("trade controller: naked position detected, halting trading");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            }

            self.drain_stale_updates();

            let bbo_m = match self.snapshot_maker_bbo().await {
                Some(entry) => entry,
                None => {
                    tokio::time::sleep(REST_TIMEOUT_BACKOFF).await;
                    continue;
                }
            };
            let bbo_t = *self.cache_t.borrow();

            if bbo_m.bid.is_zero() || bbo_m.ask.is_zero() || bbo_t.bid.is_zero() || bbo_t.ask.is_zero() {
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }

            let long_spread = bbo_t.bid - bbo_m.bid;
            let short_spread = bbo_m.ask - bbo_t.ask;
            self.threshold.add_sample(long_spread, short_spread);

            let (open_long_th, open_short_th) = self.threshold.current();
            let current = self.position.state().m_pos;
            let stage = self.close_stage.for_age(self.position.state().open_ts, Instant::now());
            let close_short_th = (open_short_th * stage.multiplier).max(stage.min_spread);

            let signal = derive_signal(
                long_spread,
                short_spread,
                open_long_th,
                open_short_th,
                close_short_th,
                current,
                self.config.max_position,
            );

            self.maybe_log_bbo(&bbo_m, &bbo_t, long_spread, short_spread, signal, open_long_th, open_short_th);
            self.maybe_log_status(&bbo_m, &bbo_t, long_spread, short_spread, signal, open_long_th, open_short_th, stage.tag);

            match signal {
                TradeSignal::OpenLong => {
                    self.run_trade(Side::Buy, bbo_m, bbo_t).await;
                }
                TradeSignal::CloseLong | TradeSignal::OpenShort => {
                    // Closing a long and opening a short both execute the
                    // same way: sell on the maker venue.
                    self.run_trade(Side::Sell, bbo_m, bbo_t).await;
                }
                TradeSignal::CloseShort => {
                    self.run_trade(Side::Buy, bbo_m, bbo_t).await;
                }
                TradeSignal::None => {
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
            }
        }
    }

    async fn snapshot_maker_bbo(&mut self) -> Option<CacheEntry> {
        let cached = *self.cache_m.borrow();
        if cached.ready && !cached.bid.is_zero() && !cached.ask.is_zero() {
            return Some(cached);
        }
        fetch_rest_fallback(self.maker, &self.config.ticker, REST_FETCH_BUDGET).await
    }

    /// Runs the two-leg pipeline for one signal: maker leg first (no
    /// overlap with the taker leg), then the taker hedge sized to the
    /// maker's actual fill, then a resync to verify the net position.
    async fn run_trade(&mut self, maker_side: Side, bbo_m: CacheEntry, bbo_t: CacheEntry) {
        if self.is_stopping() {
            return;
        }

        if self.position.net().abs() > self.config.order_quantity * Decimal::TWO {
            error!(net = %self.position.net(), "trade controller: cached net position too large, refusing to trade");
            return;
        }

        // Price-drift guard: re-read BBO(M) and abort before placing any
        // order if it has moved beyond tolerance from the value that
        // triggered the signal.
        let (current_bid, current_ask) = match self.maker.fetch_bbo(&self.config.ticker).await {
            Ok(bbo) => bbo,
            Err(err) => {
                warn!(error = %err, "trade controller: price-drift re-check failed, aborting trade");
                return;
            }
        };
        let reference = match maker_side {
            Side::Buy => bbo_m.ask,
            Side::Sell => bbo_m.bid,
        };
        let current = match maker_side {
            Side::Buy => current_ask,
            Side::Sell => current_bid,
        };
        if !reference.is_zero() {
            let drift_pct = ((current - reference) / reference).abs();
            if drift_pct > self.config.price_tolerance_pct {
                warn!(%drift_pct, tolerance = %self.config.price_tolerance_pct, "trade controller: price drifted past tolerance, aborting trade before placing orders");
                return;
            }
        }

        let maker_leg = MakerLeg::new(self.maker, self.maker_contract.contract_id.clone(), self.maker_contract.tick_size, self.config.fill_timeout);
        let position = &mut self.position;
        let fill = match tokio::time::timeout(
            TRADE_DEADLINE,
            maker_leg.execute(maker_side, self.config.order_quantity, bbo_m.bid, bbo_m.ask, &mut self.updates_m, |stale| {
                if stale.effective_status() == crate::engine::types::OrderStatus::Filled && stale.cum_filled_size > Decimal::ZERO {
                    position.apply_fill(Venue::Maker, stale.cum_filled_size * stale.side.signum());
                }
            }),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(error = %err, "trade controller: maker leg failed");
                return;
            }
            Err(_) => {
                error!("trade controller: maker leg timed out waiting for trade completion");
                return;
            }
        };

        if !fill.filled || fill.cum_filled_size.is_zero() {
            return;
        }

        self.position.apply_fill(Venue::Maker, fill.cum_filled_size * maker_side.signum());
        if let Some(log) = self.datalog.as_mut() {
            if let Err(err) = log.log_trade(&self.config.exchange, maker_side.as_str(), fill.avg_price, fill.cum_filled_size) {
                warn!(error = %err, "trade controller: failed to log maker trade");
            }
        }

        // TakerLeg is launched with the maker's actual cum_filled_size,
        // never the originally requested size.
        let taker_leg = TakerLeg::new(
            self.taker,
            self.taker_contract.contract_id.clone(),
            self.taker_contract.tick_size,
            self.config.slippage_pct,
            self.config.taker_fill_timeout,
        );
        let position = &mut self.position;
        let hedge = taker_leg
            .hedge(maker_side.opposite(), fill.cum_filled_size, bbo_t.bid, bbo_t.ask, &mut self.updates_t, |stale| {
                if stale.effective_status() == crate::engine::types::OrderStatus::Filled && stale.cum_filled_size > Decimal::ZERO {
                    position.apply_fill(Venue::Taker, stale.cum_filled_size * stale.side.signum());
                }
            })
            .await;

        match hedge {
            Ok(result) if !result.filled_size.is_zero() => {
                self.position.apply_fill(Venue::Taker, result.filled_size * maker_side.opposite().signum());
                if let Some(log) = self.datalog.as_mut() {
                    if let Err(err) =
                        log.log_trade(&self.config.exchange, maker_side.opposite().as_str(), result.avg_price, result.filled_size)
                    {
                        warn!(error = %err, "trade controller: failed to log taker trade");
                    }
                }
            }
            Ok(_) => {
                warn!("trade controller: hedge leg reports zero fill, verification resync will detect imbalance");
            }
            Err(err) => {
                error!(error = %err, "trade controller: taker leg errored, verification resync will detect imbalance");
            }
        }

        if let Err(err) = self.position.resync(self.maker, self.taker, &self.config.ticker).await {
            warn!(error = %err, "trade controller: post-trade resync failed");
        }
        info!(
            m_pos = %self.position.state().m_pos, t_pos = %self.position.state().t_pos, net = %self.position.net(),
            "trade controller: trade pipeline complete, position verified"
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn maybe_log_bbo(
        &mut self,
        bbo_m: &CacheEntry,
        bbo_t: &CacheEntry,
        long_spread: Decimal,
        short_spread: Decimal,
        signal: TradeSignal,
        open_long_th: Decimal,
        open_short_th: Decimal,
    ) {
        let due = self.last_bbo_log.map(|t| t.elapsed() >= HOURLY).unwrap_or(true);
        let on_signal = !matches!(signal, TradeSignal::None);
        if !due && !on_signal {
            return;
        }
        if let Some(log) = self.datalog.as_mut() {
            let long_signal = matches!(signal, TradeSignal::OpenLong | TradeSignal::CloseShort);
            let short_signal = matches!(signal, TradeSignal::OpenShort | TradeSignal::CloseLong);
            if let Err(err) = log.log_bbo(
                bbo_m.bid, bbo_m.ask, bbo_t.bid, bbo_t.ask, long_spread, short_spread,
                long_signal, short_signal, open_long_th, open_short_th,
            ) {
                warn!(error = %err, "trade controller: failed to log bbo row");
            }
        }
        if due {
            self.last_bbo_log = Some(Instant::now());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn maybe_log_status(
        &mut self,
        bbo_m: &CacheEntry,
        bbo_t: &CacheEntry,
        long_spread: Decimal,
        short_spread: Decimal,
        signal: TradeSignal,
        open_long_th: Decimal,
        open_short_th: Decimal,
        stage_tag: crate::engine::close_stage::StageTag,
    ) {
        if !matches!(signal, TradeSignal::None) {
            return;
        }
        let due = self.last_status_log.map(|t| t.elapsed() >= HOURLY).unwrap_or(true);
        if !due {
            return;
        }
        info!(
            maker_bid = %bbo_m.bid, maker_ask = %bbo_m.ask, taker_bid = %bbo_t.bid, taker_ask = %bbo_t.ask,
            long_spread = %long_spread, short_spread = %short_spread,
            long_threshold = %open_long_th, short_threshold = %open_short_th,
            m_pos = %self.position.state().m_pos, t_pos = %self.position.state().t_pos, stage = ?stage_tag,
            "trade controller: hourly status"
        );
        self.last_status_log = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn open_long_fires_when_long_spread_exceeds_threshold_and_flat_or_short() {
        let sig = derive_signal(dec!(15.0), dec!(-15.0), dec!(10.0), dec!(10.0), dec!(1.0), Decimal::ZERO, dec!(1.0));
        assert_eq!(sig, TradeSignal::OpenLong);

        let sig_closing_short = derive_signal(dec!(15.0), dec!(-15.0), dec!(10.0), dec!(10.0), dec!(1.0), dec!(-0.5), dec!(1.0));
        assert_eq!(sig_closing_short, TradeSignal::OpenLong);
    }

    #[test]
    fn close_long_fires_when_holding_long_and_short_spread_exceeds_relaxed_threshold() {
        let sig = derive_signal(dec!(0.0), dec!(5.0), dec!(10.0), dec!(10.0), dec!(1.0), dec!(0.5), dec!(1.0));
        assert_eq!(sig, TradeSignal::CloseLong);
    }

    #[test]
    fn stage3_relaxed_close_threshold_fires_on_any_positive_spread() {
        // Stage3: multiplier 0, min_close_spread 0 -> close_short_th == 0.
        let sig = derive_signal(dec!(0.0), dec!(0.01), dec!(10.0), dec!(10.0), Decimal::ZERO, dec!(0.5), dec!(1.0));
        assert_eq!(sig, TradeSignal::CloseLong);
    }

    #[test]
    fn open_short_requires_exactly_flat_position() {
        let sig = derive_signal(dec!(0.0), dec!(15.0), dec!(10.0), dec!(10.0), dec!(1.0), Decimal::ZERO, dec!(1.0));
        assert_eq!(sig, TradeSignal::OpenShort);

        let sig_already_long = derive_signal(dec!(0.0), dec!(15.0), dec!(10.0), dec!(10.0), dec!(1.0), dec!(0.5), dec!(1.0));
        assert_ne!(sig_already_long, TradeSignal::OpenShort);
    }

    #[test]
    fn no_signal_when_neither_spread_clears_its_threshold() {
        let sig = derive_signal(dec!(2.0), dec!(2.0), dec!(10.0), dec!(10.0), dec!(10.0), Decimal::ZERO, dec!(1.0));
        assert_eq!(sig, TradeSignal::None);
    }

    #[test]
    fn at_max_position_open_long_is_suppressed() {
        let sig = derive_signal(dec!(15.0), dec!(-15.0), dec!(10.0), dec!(10.0), dec!(1.0), dec!(-1.0), dec!(1.0));
        assert_eq!(sig, TradeSignal::None);
    }
}
