use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::datalog::DataLog;
use crate::engine::types::{Side, Tif};
use crate::venue::VenueClient;

const FLATTEN_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const FLATTEN_CHECKS: u32 = 3;

/// Drives the engine to a clean stop on SIGINT/SIGTERM or a fatal internal
/// condition: stop the loop, cancel resting orders, flatten any residual
/// position with aggressive crossing orders (never post-only), then close
/// connections. Every step swallows its own errors and logs them — the
/// shutdown path never re-raises.
pub struct ShutdownCoordinator {
    pub overall_deadline: Duration,
}

impl ShutdownCoordinator {
    pub fn new(overall_deadline: Duration) -> Self {
        ShutdownCoordinator { overall_deadline }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn run<M: VenueClient, T: VenueClient>(
        &self,
        stop_tx: &watch::Sender<bool>,
        maker: &M,
        taker: &T,
        maker_contract_id: &str,
        taker_contract_id: &str,
        symbol: &str,
        tick_m: Decimal,
        tick_t: Decimal,
        slippage_pct: Decimal,
        datalog: Option<DataLog>,
    ) {
        let deadline = tokio::time::Instant::now() + self.overall_deadline;

        let outcome = tokio::time::timeout_at(deadline, async {
            let _ = stop_tx.send(true);
            info!("shutdown: stop flag set, cancelling resting orders on maker venue");

            if let Ok(orders) = maker.active_orders(maker_contract_id).await {
                for order in orders {
                    if let Err(err) = maker.cancel(&order.venue_order_id).await {
                        warn!(error = %err, order_id = %order.venue_order_id, "shutdown: cancel failed, continuing");
                    }
                }
            }

            self.flatten_residual(maker, taker, maker_contract_id, taker_contract_id, symbol, tick_m, tick_t, slippage_pct)
                .await;

            for _ in 0..FLATTEN_CHECKS {
                tokio::time::sleep(FLATTEN_CHECK_INTERVAL).await;
                let m_pos = maker.position(symbol).await.unwrap_or(Decimal::ZERO);
                let t_pos = taker.position(symbol).await.unwrap_or(Decimal::ZERO);
                if m_pos.is_zero() && t_pos.is_zero() {
                    info!("shutdown: flatten confirmed, both venues flat");
                    break;
                }
                warn!(%m_pos, %t_pos, "shutdown: residual position after flatten attempt");
            }

            if let Err(err) = maker.disconnect().await {
                warn!(error = %err, "shutdown: maker disconnect error, ignoring");
            }
            if let Err(err) = taker.disconnect().await {
                warn!(error = %err, "shutdown: taker disconnect error, ignoring");
            }
            if let Some(log) = datalog {
                if let Err(err) = log.close() {
                    warn!(error = %err, "shutdown: error flushing data log, ignoring");
                }
            }
        })
        .await;

        if outcome.is_err() {
            error!(deadline = ?self.overall_deadline, "shutdown: overall deadline exceeded, aborting — operator must reconcile manually");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn flatten_residual<M: VenueClient, T: VenueClient>(
        &self,
        maker: &M,
        taker: &T,
        maker_contract_id: &str,
        taker_contract_id: &str,
        symbol: &str,
        tick_m: Decimal,
        tick_t: Decimal,
        slippage_pct: Decimal,
    ) {
        let m_pos = maker.position(symbol).await.unwrap_or(Decimal::ZERO);
        let t_pos = taker.position(symbol).await.unwrap_or(Decimal::ZERO);

        if !m_pos.is_zero() {
            if let Ok((bid, ask)) = maker.fetch_bbo(symbol).await {
                let (side, price) = if m_pos > Decimal::ZERO { (Side::Sell, bid) } else { (Side::Buy, ask) };
                let price = round_away_from_passive(price, tick_m);
                let client_id = format!("flatten-{}", Uuid::new_v4());
                info!(%side, %price, size = %m_pos.abs(), "shutdown: flattening maker residual with an aggressive crossing order");
                if let Err(err) =
                    maker.place_limit(maker_contract_id, side, m_pos.abs(), price, false, Tif::Ioc, &client_id).await
                {
                    warn!(error = %err, "shutdown: maker flatten order failed");
                }
            }
        }

        if !t_pos.is_zero() {
            if let Ok((bid, ask)) = taker.fetch_bbo(symbol).await {
                let one = Decimal::ONE;
                let (side, price) = if t_pos > Decimal::ZERO {
                    (Side::Sell, bid * (one - slippage_pct))
                } else {
                    (Side::Buy, ask * (one + slippage_pct))
                };
                let price = round_away_from_passive(price, tick_t);
                let client_id = format!("flatten-{}", Uuid::new_v4());
                info!(%side, %price, size = %t_pos.abs(), "shutdown: flattening taker residual with an aggressive crossing order");
                if let Err(err) =
                    taker.place_limit(taker_contract_id, side, t_pos.abs(), price, false, Tif::Ioc, &client_id).await
                {
                    warn!(error = %err, "shutdown: taker flatten order failed");
                }
            }
        }
    }
}

fn round_away_from_passive(price: Decimal, tick: Decimal) -> Decimal {
    (price / tick).round() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::sim::SimVenueClient;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn flattens_residual_position_on_both_venues() {
        let maker = SimVenueClient::new("m", dec!(0.1), dec!(60000.0), dec!(60001.0));
        let taker = SimVenueClient::new("t", dec!(0.1), dec!(60015.0), dec!(60016.0));
        let (tx_m, _rx_m) = tokio::sync::mpsc::channel(8);
        let (tx_t, _rx_t) = tokio::sync::mpsc::channel(8);
        maker.connect(tx_m).await.unwrap();
        taker.connect(tx_t).await.unwrap();

        // Force the sim venues to report a residual position via a direct fill.
        maker.set_bbo(dec!(60000.0), dec!(60000.0)).await;
        maker
            .place_limit("m", crate::engine::types::Side::Buy, dec!(0.02), dec!(60000.0), false, crate::engine::types::Tif::Ioc, "seed-m")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(maker.position("BTC").await.unwrap(), dec!(0.02));

        let (stop_tx, _stop_rx) = watch::channel(false);
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator
            .flatten_residual(&maker, &taker, "m-BTC", "t-BTC", "BTC", dec!(0.1), dec!(0.1), dec!(0.005))
            .await;
        let _ = stop_tx.send(true);
    }
}
