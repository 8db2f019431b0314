use std::time::Duration;

use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// `arbitrage --exchange <name> --ticker BTC --size <qty> --fill-timeout 5
/// --max-position N --long-threshold L --short-threshold S`
///
/// CLI flags take precedence over the matching environment variable; any
/// flag left unset falls back to its env var, then to the default below.
#[derive(Parser, Debug)]
#[command(name = "arbitrage", about = "Cross-exchange delta-neutral arbitrage engine")]
pub struct CliArgs {
    /// Maker-venue identifier (determines which VenueClient is wired up).
    #[arg(long)]
    pub exchange: String,

    #[arg(long)]
    pub ticker: String,

    #[arg(long)]
    pub size: Option<Decimal>,

    #[arg(long = "fill-timeout")]
    pub fill_timeout: Option<u64>,

    #[arg(long = "max-position")]
    pub max_position: Option<Decimal>,

    #[arg(long = "long-threshold")]
    pub long_threshold: Option<Decimal>,

    #[arg(long = "short-threshold")]
    pub short_threshold: Option<Decimal>,
}

/// The single immutable configuration value, constructed once at startup
/// from CLI flags layered over environment variables, and threaded through
/// every component constructor. No component reads `std::env` after this
/// is built.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub exchange: String,
    pub ticker: String,
    pub order_quantity: Decimal,
    pub max_position: Decimal,
    pub fill_timeout: Duration,
    pub taker_fill_timeout: Duration,

    pub use_dynamic_threshold: bool,
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
    pub threshold_window: usize,
    pub threshold_update_interval: Duration,
    pub threshold_min: Decimal,
    pub threshold_max: Decimal,
    pub threshold_percentile: f64,
    pub threshold_warmup: usize,

    pub enable_time_based_close: bool,
    pub close_threshold_multiplier: Decimal,
    pub min_close_spread: Decimal,
    pub stage1_hours: f64,
    pub stage1_multiplier: Decimal,
    pub stage1_min_spread: Decimal,
    pub stage2_hours: f64,
    pub stage2_multiplier: Decimal,
    pub stage2_min_spread: Decimal,
    pub stage3_hours: f64,
    pub stage3_multiplier: Decimal,
    pub stage3_min_spread: Decimal,

    pub slippage_pct: Decimal,
    pub price_tolerance_pct: Decimal,
    pub position_tolerance: Decimal,
    pub resync_interval: Duration,
    pub shutdown_deadline: Duration,
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl EngineConfig {
    /// Loads a `.env` file if present (teacher idiom), then builds the
    /// config from CLI args layered over environment variables.
    pub fn load(args: CliArgs) -> Self {
        let _ = dotenv::dotenv();

        EngineConfig {
            exchange: args.exchange,
            ticker: args.ticker,
            order_quantity: args.size.unwrap_or_else(|| env_decimal("ORDER_QUANTITY", dec!(0.01))),
            max_position: args
                .max_position
                .unwrap_or_else(|| env_decimal("MAX_POSITION", dec!(1.0))),
            fill_timeout: Duration::from_secs(
                args.fill_timeout.unwrap_or_else(|| env_u64("FILL_TIMEOUT", 5)),
            ),
            taker_fill_timeout: Duration::from_secs(env_u64("TAKER_FILL_TIMEOUT", 30)),

            use_dynamic_threshold: env_bool("USE_DYNAMIC_THRESHOLD", true),
            long_threshold: args
                .long_threshold
                .unwrap_or_else(|| env_decimal("LONG_THRESHOLD", dec!(10.0))),
            short_threshold: args
                .short_threshold
                .unwrap_or_else(|| env_decimal("SHORT_THRESHOLD", dec!(10.0))),
            threshold_window: env_usize("DYNAMIC_THRESHOLD_WINDOW", 1000),
            threshold_update_interval: Duration::from_secs(env_u64(
                "DYNAMIC_THRESHOLD_UPDATE_INTERVAL",
                300,
            )),
            threshold_min: env_decimal("DYNAMIC_THRESHOLD_MIN", dec!(1.0)),
            threshold_max: env_decimal("DYNAMIC_THRESHOLD_MAX", dec!(20.0)),
            threshold_percentile: env_f64("DYNAMIC_THRESHOLD_PERCENTILE", 0.70),
            threshold_warmup: env_usize("DYNAMIC_THRESHOLD_WARMUP", 100),

            enable_time_based_close: env_bool("ENABLE_TIME_BASED_CLOSE", true),
            close_threshold_multiplier: env_decimal("CLOSE_THRESHOLD_MULTIPLIER", dec!(0.10)),
            min_close_spread: env_decimal("MIN_CLOSE_SPREAD", dec!(0.15)),
            stage1_hours: env_f64("STAGE1_HOURS", 1.0),
            stage1_multiplier: env_decimal("STAGE1_CLOSE_MULTIPLIER", dec!(0.08)),
            stage1_min_spread: env_decimal("STAGE1_MIN_SPREAD", dec!(0.10)),
            stage2_hours: env_f64("STAGE2_HOURS", 2.0),
            stage2_multiplier: env_decimal("STAGE2_CLOSE_MULTIPLIER", dec!(0.05)),
            stage2_min_spread: env_decimal("STAGE2_MIN_SPREAD", dec!(0.0)),
            stage3_hours: env_f64("STAGE3_HOURS", 3.0),
            stage3_multiplier: env_decimal("STAGE3_CLOSE_MULTIPLIER", dec!(0.0)),
            stage3_min_spread: env_decimal("STAGE3_MIN_SPREAD", dec!(0.0)),

            slippage_pct: env_decimal("SLIPPAGE_PCT", dec!(0.005)),
            price_tolerance_pct: env_decimal("PRICE_TOLERANCE_PCT", dec!(0.0005)),
            position_tolerance: env_decimal("POSITION_TOLERANCE", dec!(0.01)),
            resync_interval: Duration::from_secs(env_u64("POSITION_SYNC_INTERVAL", 60)),
            shutdown_deadline: Duration::from_secs(env_u64("SHUTDOWN_DEADLINE", 90)),
        }
    }
}
