use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant as TokioInstant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::types::{OrderStatus, OrderUpdate, Side, Tif};
use crate::venue::VenueClient;

const CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct MakerFillResult {
    pub filled: bool,
    pub cum_filled_size: Decimal,
    pub avg_price: Decimal,
}

/// Places the passive, post-only resting leg on the maker venue and
/// drives it to a terminal outcome: filled (fully or partially), or given
/// up. Never more than one live ticket at a time (invariant: the state
/// machine always completes, by fill or cancel, before returning).
pub struct MakerLeg<'a, C: VenueClient> {
    client: &'a C,
    contract_id: String,
    tick_size: Decimal,
    fill_timeout: Duration,
}

impl<'a, C: VenueClient> MakerLeg<'a, C> {
    pub fn new(client: &'a C, contract_id: String, tick_size: Decimal, fill_timeout: Duration) -> Self {
        MakerLeg { client, contract_id, tick_size, fill_timeout }
    }

    /// Rounds toward the passive side so the order never crosses
    /// unintentionally: Buy truncates down (floor), Sell truncates up
    /// (ceil). Deliberately not nearest-rounding.
    pub fn round_to_tick(side: Side, price: Decimal, tick: Decimal) -> Decimal {
        let units = price / tick;
        let rounded = match side {
            Side::Buy => units.floor(),
            Side::Sell => units.ceil(),
        };
        rounded * tick
    }

    /// `on_stale` receives any order-update whose `client_id` doesn't
    /// match this leg's ticket — the controller still applies those to
    /// position tracking, it just must not treat them as this leg's fill.
    pub async fn execute(
        &self,
        side: Side,
        size: Decimal,
        bid: Decimal,
        ask: Decimal,
        updates: &mut mpsc::Receiver<OrderUpdate>,
        mut on_stale: impl FnMut(OrderUpdate),
    ) -> Result<MakerFillResult> {
        let raw_price = match side {
            Side::Buy => ask - self.tick_size,
            Side::Sell => bid + self.tick_size,
        };
        let price = Self::round_to_tick(side, raw_price, self.tick_size);
        let client_id = format!("maker-{}", Uuid::new_v4());

        let ack = self
            .client
            .place_limit(&self.contract_id, side, size, price, true, Tif::Gtc, &client_id)
            .await?;
        if !ack.accepted {
            info!(reason = ?ack.reject_reason, "maker leg: order rejected at submission");
            return Ok(MakerFillResult { filled: false, cum_filled_size: Decimal::ZERO, avg_price: Decimal::ZERO });
        }

        let deadline = TokioInstant::now() + self.fill_timeout;
        let mut cum_filled = Decimal::ZERO;
        let mut avg_price = price;
        let mut canceled = false;

        loop {
            let now = TokioInstant::now();
            if !canceled && now >= deadline {
                debug!(client_id, "maker leg: fill timeout reached, canceling");
                let _ = self.client.cancel(&ack.venue_order_id).await;
                canceled = true;
            }

            let remaining = if canceled { CANCEL_GRACE } else { deadline.saturating_duration_since(now) };
            let recv = tokio::time::timeout(remaining, updates.recv()).await;

            let update = match recv {
                Ok(Some(u)) => u,
                Ok(None) => bail!("maker leg: order-update channel closed"),
                Err(_) if canceled => {
                    warn!(client_id, "maker leg: no terminal status after cancel grace period, treating as gave up");
                    break;
                }
                Err(_) => {
                    continue;
                }
            };

            if update.client_id != client_id {
                on_stale(update);
                continue;
            }

            cum_filled = update.cum_filled_size;
            avg_price = update.price;

            match update.effective_status() {
                OrderStatus::Filled => {
                    info!(client_id, %cum_filled, %avg_price, "maker leg: filled");
                    return Ok(MakerFillResult { filled: cum_filled > Decimal::ZERO, cum_filled_size: cum_filled, avg_price });
                }
                OrderStatus::Rejected => {
                    info!(client_id, "maker leg: rejected");
                    return Ok(MakerFillResult { filled: false, cum_filled_size: Decimal::ZERO, avg_price: Decimal::ZERO });
                }
                OrderStatus::Canceled => {
                    break;
                }
                _ => continue,
            }
        }

        Ok(MakerFillResult { filled: cum_filled > Decimal::ZERO, cum_filled_size: cum_filled, avg_price })
    }

    /// Called when `place_limit` itself fails with a deadline-exceeded
    /// error: the order may or may not have been accepted. Reconciles by
    /// querying active orders for a matching client_id and canceling it
    /// if found, then waiting for the terminal status.
    pub async fn reconcile_after_submit_timeout(
        &self,
        client_id: &str,
        updates: &mut mpsc::Receiver<OrderUpdate>,
    ) -> Result<MakerFillResult> {
        sleep(Duration::from_millis(500)).await;
        let active = self.client.active_orders(&self.contract_id).await?;
        if let Some(found) = active.iter().find(|o| o.client_id == client_id) {
            let _ = self.client.cancel(&found.venue_order_id).await;
        }

        let recv = tokio::time::timeout(CANCEL_GRACE, updates.recv()).await;
        match recv {
            Ok(Some(update)) if update.client_id == client_id => Ok(MakerFillResult {
                filled: update.cum_filled_size > Decimal::ZERO,
                cum_filled_size: update.cum_filled_size,
                avg_price: update.price,
            }),
            _ => Ok(MakerFillResult { filled: false, cum_filled_size: Decimal::ZERO, avg_price: Decimal::ZERO }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_to_tick_truncates_toward_passive_side() {
        assert_eq!(MakerLeg::<crate::venue::sim::SimVenueClient>::round_to_tick(Side::Buy, dec!(60000.97), dec!(0.1)), dec!(60000.9));
        assert_eq!(MakerLeg::<crate::venue::sim::SimVenueClient>::round_to_tick(Side::Sell, dec!(60000.91), dec!(0.1)), dec!(60001.0));
    }

    #[tokio::test]
    async fn fills_completely_within_timeout() {
        let client = std::sync::Arc::new(crate::venue::sim::SimVenueClient::new(
            "m", dec!(0.1), dec!(60000.0), dec!(60001.0),
        ));
        let (tx, mut rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let leg = MakerLeg::new(&*client, "BTC".into(), dec!(0.1), Duration::from_secs(5));

        let mover = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            mover.set_bbo(dec!(60000.0), dec!(60000.9)).await;
        });

        let result = leg
            .execute(Side::Buy, dec!(0.01), dec!(60000.0), dec!(60001.0), &mut rx, |_| {})
            .await
            .unwrap();
        assert!(result.filled);
        assert_eq!(result.cum_filled_size, dec!(0.01));
    }

    #[tokio::test]
    async fn gives_up_on_timeout_with_no_fill() {
        let client = crate::venue::sim::SimVenueClient::new("m", dec!(0.1), dec!(60000.0), dec!(60001.0));
        let (tx, mut rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let leg = MakerLeg::new(&client, "BTC".into(), dec!(0.1), Duration::from_millis(200));
        let result = leg
            .execute(Side::Buy, dec!(0.01), dec!(60000.0), dec!(60001.0), &mut rx, |_| {})
            .await
            .unwrap();
        assert!(!result.filled);
        assert_eq!(result.cum_filled_size, Decimal::ZERO);
    }

    #[tokio::test]
    async fn stale_update_is_routed_to_sink_not_treated_as_fill() {
        let client = crate::venue::sim::SimVenueClient::new("m", dec!(0.1), dec!(60000.0), dec!(60001.0));
        let (tx, mut rx) = mpsc::channel(8);
        client.connect(tx.clone()).await.unwrap();

        tx.send(OrderUpdate {
            client_id: "stale-ticket".into(),
            venue_order_id: "v0".into(),
            side: Side::Buy,
            status: OrderStatus::Filled,
            cum_filled_size: dec!(0.05),
            size: dec!(0.05),
            price: dec!(60000.0),
        })
        .await
        .unwrap();

        let leg = MakerLeg::new(&client, "BTC".into(), dec!(0.1), Duration::from_millis(200));
        let mut stale_seen = Vec::new();
        let result = leg
            .execute(Side::Buy, dec!(0.01), dec!(60000.0), dec!(60001.0), &mut rx, |u| stale_seen.push(u))
            .await
            .unwrap();

        assert!(!result.filled);
        assert_eq!(stale_seen.len(), 1);
        assert_eq!(stale_seen[0].client_id, "stale-ticket");
    }
}
