use rust_decimal::Decimal;
use std::time::Instant;

/// The two venues the engine trades across: a resting-liquidity maker
/// venue and an immediate-execution taker venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Maker,
    Taker,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Maker => "maker",
            Venue::Taker => "taker",
        }
    }

    pub fn other(&self) -> Venue {
        match self {
            Venue::Maker => Venue::Taker,
            Venue::Taker => Venue::Maker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed size multiplier: Buy adds to the venue position, Sell
    /// subtracts from it.
    pub fn signum(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best bid/ask snapshot for one venue. Invariant: `0 < bid < ask` once
/// `ready`; a freshly constructed quote before the first frame is all-zero.
#[derive(Debug, Clone, Copy)]
pub struct BboQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub ts: Instant,
}

impl BboQuote {
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.ask > Decimal::ZERO && self.bid < self.ask
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.ts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tif {
    Gtc,
    Ioc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Open,
    PartiallyFilled,
    Filled,
    Canceling,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

/// An order as submitted to a venue. `client_id` is echoed back on every
/// update so the controller can filter stale updates from prior tickets.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub venue: Venue,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub client_id: String,
    pub post_only: bool,
    pub tif: Tif,
}

/// A status push from a venue's order-update stream.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub client_id: String,
    pub venue_order_id: String,
    pub side: Side,
    pub status: OrderStatus,
    pub cum_filled_size: Decimal,
    pub size: Decimal,
    pub price: Decimal,
}

impl OrderUpdate {
    /// A cancel that filled something before it died counts as a (partial)
    /// fill for downstream accounting purposes.
    pub fn effective_status(&self) -> OrderStatus {
        if self.status == OrderStatus::Canceled && self.cum_filled_size > Decimal::ZERO {
            OrderStatus::Filled
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSignal {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    None,
}

/// Cached position per venue plus the open timestamp used by the
/// time-staged close policy.
#[derive(Debug, Clone, Copy)]
pub struct PositionState {
    pub m_pos: Decimal,
    pub t_pos: Decimal,
    pub open_ts: Option<Instant>,
}

impl PositionState {
    pub fn flat() -> Self {
        PositionState { m_pos: Decimal::ZERO, t_pos: Decimal::ZERO, open_ts: None }
    }

    pub fn net(&self) -> Decimal {
        self.m_pos + self.t_pos
    }

    /// True iff both legs are non-zero with the same sign: exposure
    /// instead of an offsetting hedge.
    pub fn is_naked(&self, tolerance: Decimal) -> bool {
        (self.m_pos > tolerance && self.t_pos > tolerance)
            || (self.m_pos < -tolerance && self.t_pos < -tolerance)
    }
}

#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub contract_id: String,
    pub tick_size: Decimal,
    pub size_mult: Decimal,
    pub price_mult: Decimal,
    pub min_order_size: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub venue_order_id: String,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderInfo {
    pub client_id: String,
    pub venue_order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub remaining_size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naked_requires_same_sign_both_legs() {
        let s = PositionState { m_pos: Decimal::new(3, 2), t_pos: Decimal::new(4, 2), open_ts: None };
        assert!(s.is_naked(Decimal::new(1, 2)));

        let hedged = PositionState { m_pos: Decimal::new(3, 2), t_pos: Decimal::new(-3, 2), open_ts: None };
        assert!(!hedged.is_naked(Decimal::new(1, 2)));

        let one_sided = PositionState { m_pos: Decimal::new(3, 2), t_pos: Decimal::ZERO, open_ts: None };
        assert!(!one_sided.is_naked(Decimal::new(1, 2)));
    }

    #[test]
    fn canceled_with_fill_is_effectively_filled() {
        let upd = OrderUpdate {
            client_id: "c1".into(),
            venue_order_id: "v1".into(),
            side: Side::Buy,
            status: OrderStatus::Canceled,
            cum_filled_size: Decimal::new(5, 2),
            size: Decimal::new(10, 2),
            price: Decimal::new(100, 0),
        };
        assert_eq!(upd.effective_status(), OrderStatus::Filled);
    }
}
