use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::maker_leg::MakerLeg;
use crate::engine::types::{OrderStatus, OrderUpdate, Side, Tif};
use crate::venue::VenueClient;

#[derive(Debug, Clone, Copy)]
pub struct HedgeResult {
    pub filled_size: Decimal,
    pub avg_price: Decimal,
}

/// Submits the aggressive IOC hedge on the taker venue once the maker leg
/// fills. The taker venue is assumed fee-free; the slippage padding exists
/// purely to guarantee crossing the book.
pub struct TakerLeg<'a, C: VenueClient> {
    client: &'a C,
    contract_id: String,
    tick_size: Decimal,
    slippage_pct: Decimal,
    safety_timeout: Duration,
}

impl<'a, C: VenueClient> TakerLeg<'a, C> {
    pub fn new(
        client: &'a C,
        contract_id: String,
        tick_size: Decimal,
        slippage_pct: Decimal,
        safety_timeout: Duration,
    ) -> Self {
        TakerLeg { client, contract_id, tick_size, slippage_pct, safety_timeout }
    }

    pub async fn hedge(
        &self,
        side: Side,
        size: Decimal,
        bid: Decimal,
        ask: Decimal,
        updates: &mut mpsc::Receiver<OrderUpdate>,
        mut on_stale: impl FnMut(OrderUpdate),
    ) -> Result<HedgeResult> {
        let one = Decimal::ONE;
        let raw_price = match side {
            Side::Buy => ask * (one + self.slippage_pct),
            Side::Sell => bid * (one - self.slippage_pct),
        };
        let price = MakerLeg::<C>::round_to_tick(side, raw_price, self.tick_size);
        let client_id = format!("taker-{}", Uuid::new_v4());

        let ack = self
            .client
            .place_limit(&self.contract_id, side, size, price, false, Tif::Ioc, &client_id)
            .await?;
        if !ack.accepted {
            warn!(reason = ?ack.reject_reason, "taker leg: IOC hedge rejected outright");
            return Ok(HedgeResult { filled_size: Decimal::ZERO, avg_price: Decimal::ZERO });
        }

        let recv = tokio::time::timeout(self.safety_timeout, async {
            loop {
                match updates.recv().await {
                    Some(u) if u.client_id == client_id => return Some(u),
                    Some(u) => {
                        on_stale(u);
                        continue;
                    }
                    None => return None,
                }
            }
        })
        .await;

        match recv {
            Ok(Some(update)) => match update.effective_status() {
                OrderStatus::Filled => {
                    info!(client_id, filled = %update.cum_filled_size, "taker leg: hedge filled");
                    Ok(HedgeResult { filled_size: update.cum_filled_size, avg_price: update.price })
                }
                OrderStatus::Canceled | OrderStatus::Rejected => {
                    if update.cum_filled_size > Decimal::ZERO {
                        Ok(HedgeResult { filled_size: update.cum_filled_size, avg_price: update.price })
                    } else {
                        warn!(client_id, "taker leg: hedge fully canceled with zero fill");
                        Ok(HedgeResult { filled_size: Decimal::ZERO, avg_price: Decimal::ZERO })
                    }
                }
                _ => Ok(HedgeResult { filled_size: update.cum_filled_size, avg_price: update.price }),
            },
            Ok(None) => bail!("taker leg: order-update channel closed"),
            Err(_) => {
                warn!(client_id, %size, "taker leg: safety timeout reached, best-effort marking complete");
                Ok(HedgeResult { filled_size: size, avg_price: price })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn hedges_with_exact_requested_size_on_fill() {
        let client = crate::venue::sim::SimVenueClient::new("t", dec!(0.1), dec!(60015.0), dec!(60016.0));
        let (tx, mut rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let leg = TakerLeg::new(&client, "BTC".into(), dec!(0.1), dec!(0.005), Duration::from_secs(5));
        let result = leg.hedge(Side::Sell, dec!(0.04), dec!(60015.0), dec!(60016.0), &mut rx, |_| {}).await.unwrap();
        assert_eq!(result.filled_size, dec!(0.04));
    }

    #[tokio::test]
    async fn slippage_pads_price_away_from_touch() {
        let padded = dec!(60015.0) * (Decimal::ONE - dec!(0.005));
        assert_eq!(padded, dec!(59714.925));
        assert_eq!(
            MakerLeg::<crate::venue::sim::SimVenueClient>::round_to_tick(Side::Sell, padded, dec!(0.1)),
            dec!(59715.0)
        );
    }
}
