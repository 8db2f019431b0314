use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, warn};

use anyhow::Result;

use crate::retry::with_retry;
use crate::venue::{FatalVenueError, VenueClient};

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const REST_FALLBACK_RETRY_ATTEMPTS: usize = 3;
const REST_FALLBACK_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts: Instant,
    pub ready: bool,
}

impl CacheEntry {
    pub fn empty() -> Self {
        CacheEntry { bid: Decimal::ZERO, ask: Decimal::ZERO, ts: Instant::now(), ready: false }
    }
}

/// Single-writer-per-venue, many-reader snapshot store backed by a
/// `tokio::sync::watch` channel — writers overwrite atomically, readers
/// take an instantaneous clone, no history is retained.
pub fn new_cache_channel() -> (watch::Sender<CacheEntry>, watch::Receiver<CacheEntry>) {
    watch::channel(CacheEntry::empty())
}

/// Keeps one venue's cache entry within a few hundred milliseconds of
/// ground truth. The venue's own WebSocket subscription detail lives
/// behind `VenueClient` (out of core scope); this loop polls
/// `fetch_bbo` and reconnects with exponential backoff on error, which is
/// the architecture-level contract the core actually depends on.
///
/// An auth failure (`FatalVenueError`) is not retried: the loop stops and
/// returns the error so the caller can escalate to shutdown, per the
/// feed's documented failure semantics. Every other error is transient and
/// retried forever with exponential backoff.
pub async fn run_bbo_feed<C: VenueClient>(
    client: &C,
    symbol: String,
    venue_name: &'static str,
    tx: watch::Sender<CacheEntry>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let mut backoff = RECONNECT_MIN;

    loop {
        if *stop.borrow() {
            return Ok(());
        }

        match client.fetch_bbo(&symbol).await {
            Ok((bid, ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO && bid < ask => {
                backoff = RECONNECT_MIN;
                let _ = tx.send(CacheEntry { bid, ask, ts: Instant::now(), ready: true });
            }
            Ok(_) => {
                // Empty or crossed book; keep the last-known-good quote and retry.
            }
            Err(err) if err.downcast_ref::<FatalVenueError>().is_some() => {
                tracing::error!(venue = venue_name, error = %err, "bbo feed: fatal error, stopping feed");
                return Err(err);
            }
            Err(err) => {
                warn!(venue = venue_name, error = %err, backoff = ?backoff, "bbo feed: fetch failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stop.changed() => { if *stop.borrow() { return Ok(()); } }
                }
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = stop.changed() => { if *stop.borrow() { return Ok(()); } }
        }
    }
}

pub async fn fetch_rest_fallback<C: VenueClient>(client: &C, symbol: &str, budget: Duration) -> Option<CacheEntry> {
    let fetch = with_retry(REST_FALLBACK_RETRY_ATTEMPTS, REST_FALLBACK_RETRY_DELAY, || client.fetch_bbo(symbol));
    match tokio::time::timeout(budget, fetch).await {
        Ok(Ok((bid, ask))) if bid > Decimal::ZERO && ask > Decimal::ZERO => {
            Some(CacheEntry { bid, ask, ts: Instant::now(), ready: true })
        }
        Ok(Ok(_)) => None,
        Ok(Err(err)) => {
            warn!(error = %err, "rest fallback: fetch_bbo failed");
            None
        }
        Err(_) => {
            info!("rest fallback: timed out within budget");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::sim::SimVenueClient;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn feed_marks_ready_on_first_valid_frame_and_stays_ready() {
        let client = SimVenueClient::new("m", dec!(0.1), dec!(100.0), dec!(100.1));
        let (tx_updates, _rx) = tokio::sync::mpsc::channel(8);
        client.connect(tx_updates).await.unwrap();

        let (cache_tx, cache_rx) = new_cache_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let _ = run_bbo_feed(&client, "BTC".into(), "maker", cache_tx, stop_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache_rx.borrow().ready);

        let _ = stop_tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn rest_fallback_returns_none_on_timeout() {
        struct SlowClient;
        impl VenueClient for SlowClient {
            async fn connect(&self, _updates: tokio::sync::mpsc::Sender<crate::engine::types::OrderUpdate>) -> anyhow::Result<()> {
                Ok(())
            }
            async fn fetch_bbo(&self, _symbol: &str) -> anyhow::Result<(Decimal, Decimal)> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok((dec!(1.0), dec!(2.0)))
            }
            async fn contract_info(&self, _symbol: &str) -> anyhow::Result<crate::engine::types::ContractInfo> {
                unimplemented!()
            }
            async fn place_limit(
                &self,
                _contract_id: &str,
                _side: crate::engine::types::Side,
                _size: Decimal,
                _price: Decimal,
                _post_only: bool,
                _tif: crate::engine::types::Tif,
                _client_id: &str,
            ) -> anyhow::Result<crate::engine::types::OrderAck> {
                unimplemented!()
            }
            async fn cancel(&self, _venue_order_id: &str) -> anyhow::Result<crate::engine::types::OrderAck> {
                unimplemented!()
            }
            async fn active_orders(&self, _contract_id: &str) -> anyhow::Result<Vec<crate::engine::types::OrderInfo>> {
                unimplemented!()
            }
            async fn position(&self, _symbol: &str) -> anyhow::Result<Decimal> {
                unimplemented!()
            }
            async fn disconnect(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let result = fetch_rest_fallback(&SlowClient, "BTC", Duration::from_millis(50)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn fatal_auth_error_stops_the_feed_instead_of_retrying() {
        struct UnauthorizedClient;
        impl VenueClient for UnauthorizedClient {
            async fn connect(&self, _updates: tokio::sync::mpsc::Sender<crate::engine::types::OrderUpdate>) -> anyhow::Result<()> {
                Ok(())
            }
            async fn fetch_bbo(&self, _symbol: &str) -> anyhow::Result<(Decimal, Decimal)> {
                Err(anyhow::Error::new(crate::venue::FatalVenueError(anyhow::anyhow!("401 unauthorized"))))
            }
            async fn contract_info(&self, _symbol: &str) -> anyhow::Result<crate::engine::types::ContractInfo> {
                unimplemented!()
            }
            async fn place_limit(
                &self,
                _contract_id: &str,
                _side: crate::engine::types::Side,
                _size: Decimal,
                _price: Decimal,
                _post_only: bool,
                _tif: crate::engine::types::Tif,
                _client_id: &str,
            ) -> anyhow::Result<crate::engine::types::OrderAck> {
                unimplemented!()
            }
            async fn cancel(&self, _venue_order_id: &str) -> anyhow::Result<crate::engine::types::OrderAck> {
                unimplemented!()
            }
            async fn active_orders(&self, _contract_id: &str) -> anyhow::Result<Vec<crate::engine::types::OrderInfo>> {
                unimplemented!()
            }
            async fn position(&self, _symbol: &str) -> anyhow::Result<Decimal> {
                unimplemented!()
            }
            async fn disconnect(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let (cache_tx, _cache_rx) = new_cache_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            run_bbo_feed(&UnauthorizedClient, "BTC".into(), "maker", cache_tx, stop_rx),
        )
        .await
        .expect("feed returns promptly on fatal error instead of backing off");

        assert!(result.is_err());
    }
}
