pub mod sim;

use anyhow::Result;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use crate::engine::types::{ContractInfo, OrderAck, OrderInfo, OrderUpdate, Side, Tif};

/// Wraps a feed error the caller must stop and escalate rather than retry —
/// an authentication failure on the venue's WS subscription. A concrete
/// `VenueClient` wraps its auth errors in this before returning them from
/// `fetch_bbo`; everything else is treated as transient and retried forever.
#[derive(Debug)]
pub struct FatalVenueError(pub anyhow::Error);

impl std::fmt::Display for FatalVenueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fatal venue error: {}", self.0)
    }
}

impl std::error::Error for FatalVenueError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// The only surface the engine's core depends on for a venue. Concrete
/// implementations own all wire-format, auth, and symbol-metadata detail;
/// the core is generic over `impl VenueClient` and never references a
/// concrete venue SDK type.
pub trait VenueClient: Send + Sync {
    /// Establish auth and start the account order-update stream, pushing
    /// every update for our orders onto `updates`.
    async fn connect(&self, updates: mpsc::Sender<OrderUpdate>) -> Result<()>;

    /// Auth failures must be returned wrapped in `FatalVenueError` so
    /// `run_bbo_feed` can tell them apart from a transient socket error.
    async fn fetch_bbo(&self, symbol: &str) -> Result<(Decimal, Decimal)>;

    async fn contract_info(&self, symbol: &str) -> Result<ContractInfo>;

    #[allow(clippy::too_many_arguments)]
    async fn place_limit(
        &self,
        contract_id: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        post_only: bool,
        tif: Tif,
        client_id: &str,
    ) -> Result<OrderAck>;

    async fn cancel(&self, venue_order_id: &str) -> Result<OrderAck>;

    async fn active_orders(&self, contract_id: &str) -> Result<Vec<OrderInfo>>;

    async fn position(&self, symbol: &str) -> Result<Decimal>;

    async fn disconnect(&self) -> Result<()>;
}
