//! In-memory venue simulator.
//!
//! The real venue clients (HTTP/WS framing, request signing, credential
//! storage) are out of core scope; this adapter stands in for them so the
//! engine has a concrete `VenueClient` to run against without live
//! exchange access, the same role the teacher's `dry_run` branch in
//! `executor.rs` played for the Polymarket SDK.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

use crate::engine::types::{ContractInfo, OrderAck, OrderInfo, OrderStatus, OrderUpdate, Side, Tif};
use crate::venue::VenueClient;

struct OpenOrder {
    client_id: String,
    side: Side,
    price: Decimal,
    size: Decimal,
    filled: Decimal,
}

struct SimState {
    bid: Decimal,
    ask: Decimal,
    position: Decimal,
    open_orders: HashMap<String, OpenOrder>,
}

#[derive(Clone)]
pub struct SimVenueClient {
    name: String,
    tick_size: Decimal,
    state: Arc<Mutex<SimState>>,
}

impl SimVenueClient {
    pub fn new(name: impl Into<String>, tick_size: Decimal, bid: Decimal, ask: Decimal) -> Self {
        SimVenueClient {
            name: name.into(),
            tick_size,
            state: Arc::new(Mutex::new(SimState {
                bid,
                ask,
                position: Decimal::ZERO,
                open_orders: HashMap::new(),
            })),
        }
    }

    /// Test/demo hook: move the simulated book.
    pub async fn set_bbo(&self, bid: Decimal, ask: Decimal) {
        let mut s = self.state.lock().await;
        s.bid = bid;
        s.ask = ask;
    }
}

impl VenueClient for SimVenueClient {
    async fn connect(&self, updates: mpsc::Sender<OrderUpdate>) -> Result<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(25));
            loop {
                tick.tick().await;
                let mut s = state.lock().await;
                let (bid, ask) = (s.bid, s.ask);
                let mut done = Vec::new();
                for (id, order) in s.open_orders.iter_mut() {
                    let crosses = match order.side {
                        Side::Buy => ask > Decimal::ZERO && order.price >= ask,
                        Side::Sell => bid > Decimal::ZERO && order.price <= bid,
                    };
                    if !crosses {
                        continue;
                    }
                    let remaining = order.size - order.filled;
                    order.filled = order.size;
                    if updates
                        .send(OrderUpdate {
                            client_id: order.client_id.clone(),
                            venue_order_id: order.client_id.clone(),
                            side: order.side,
                            status: OrderStatus::Filled,
                            cum_filled_size: order.size,
                            size: order.size,
                            price: order.price,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    let delta = match order.side {
                        Side::Buy => remaining,
                        Side::Sell => -remaining,
                    };
                    done.push((id.clone(), delta));
                }
                for (id, delta) in done {
                    s.position += delta;
                    s.open_orders.remove(&id);
                }
            }
        });
        Ok(())
    }

    async fn fetch_bbo(&self, _symbol: &str) -> Result<(Decimal, Decimal)> {
        let s = self.state.lock().await;
        Ok((s.bid, s.ask))
    }

    async fn contract_info(&self, symbol: &str) -> Result<ContractInfo> {
        Ok(ContractInfo {
            contract_id: format!("{}-{}", self.name, symbol),
            tick_size: self.tick_size,
            size_mult: Decimal::ONE,
            price_mult: Decimal::ONE,
            min_order_size: Decimal::new(1, 3),
        })
    }

    async fn place_limit(
        &self,
        _contract_id: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        post_only: bool,
        tif: Tif,
        client_id: &str,
    ) -> Result<OrderAck> {
        let mut s = self.state.lock().await;
        let would_cross = match side {
            Side::Buy => s.ask > Decimal::ZERO && price >= s.ask,
            Side::Sell => s.bid > Decimal::ZERO && price <= s.bid,
        };
        if post_only && would_cross {
            return Ok(OrderAck {
                venue_order_id: client_id.to_string(),
                accepted: false,
                reject_reason: Some("post_only order would cross the book".into()),
            });
        }

        if tif == Tif::Ioc && !would_cross {
            return Ok(OrderAck {
                venue_order_id: client_id.to_string(),
                accepted: false,
                reject_reason: Some("IOC order did not cross, nothing to fill".into()),
            });
        }

        s.open_orders.insert(
            client_id.to_string(),
            OpenOrder { client_id: client_id.to_string(), side, price, size, filled: Decimal::ZERO },
        );
        Ok(OrderAck { venue_order_id: client_id.to_string(), accepted: true, reject_reason: None })
    }

    async fn cancel(&self, venue_order_id: &str) -> Result<OrderAck> {
        let mut s = self.state.lock().await;
        s.open_orders.remove(venue_order_id);
        Ok(OrderAck { venue_order_id: venue_order_id.to_string(), accepted: true, reject_reason: None })
    }

    async fn active_orders(&self, _contract_id: &str) -> Result<Vec<OrderInfo>> {
        let s = self.state.lock().await;
        Ok(s.open_orders
            .values()
            .map(|o| OrderInfo {
                client_id: o.client_id.clone(),
                venue_order_id: o.client_id.clone(),
                side: o.side,
                price: o.price,
                remaining_size: o.size - o.filled,
            })
            .collect())
    }

    async fn position(&self, _symbol: &str) -> Result<Decimal> {
        let s = self.state.lock().await;
        Ok(s.position)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn ioc_crosses_immediately_and_rejects_otherwise() {
        let client = SimVenueClient::new("t", dec!(0.1), dec!(100.0), dec!(100.1));
        let (tx, _rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let ack = client
            .place_limit("c", Side::Buy, dec!(1.0), dec!(100.1), false, Tif::Ioc, "c1")
            .await
            .unwrap();
        assert!(ack.accepted);

        let ack2 = client
            .place_limit("c", Side::Buy, dec!(1.0), dec!(99.0), false, Tif::Ioc, "c2")
            .await
            .unwrap();
        assert!(!ack2.accepted);
    }

    #[tokio::test]
    async fn post_only_rejects_crossing_order() {
        let client = SimVenueClient::new("t", dec!(0.1), dec!(100.0), dec!(100.1));
        let (tx, _rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let ack = client
            .place_limit("c", Side::Buy, dec!(1.0), dec!(100.1), true, Tif::Gtc, "c1")
            .await
            .unwrap();
        assert!(!ack.accepted);
    }

    #[tokio::test]
    async fn resting_post_only_fills_when_book_crosses() {
        let client = SimVenueClient::new("t", dec!(0.1), dec!(100.0), dec!(100.1));
        let (tx, mut rx) = mpsc::channel(8);
        client.connect(tx).await.unwrap();

        let ack = client
            .place_limit("c", Side::Buy, dec!(1.0), dec!(100.0), true, Tif::Gtc, "c1")
            .await
            .unwrap();
        assert!(ack.accepted);

        client.set_bbo(dec!(100.0), dec!(100.0)).await;

        let upd = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("fill event within timeout")
            .expect("channel open");
        assert_eq!(upd.status, OrderStatus::Filled);
        assert_eq!(client.position("x").await.unwrap(), dec!(1.0));
    }
}
