use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use csv::Writer;
use rust_decimal::Decimal;

const BBO_FLUSH_ROWS: usize = 100;
const BBO_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Appends trade and BBO rows to CSV, one writer per file, matching the
/// reference logger's flush cadence: trades flush on every row, BBO rows
/// flush every 100 rows or 60 seconds, whichever comes first.
pub struct DataLog {
    trade_writer: Writer<std::fs::File>,
    bbo_writer: Writer<std::fs::File>,
    bbo_rows_since_flush: usize,
    last_bbo_flush: Instant,
}

impl DataLog {
    pub fn new(dir: &Path, exchange: &str, ticker: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).context("creating log directory")?;

        let trade_path: PathBuf = dir.join(format!("{exchange}_{ticker}_trades.csv"));
        let bbo_path: PathBuf = dir.join(format!("{exchange}_{ticker}_bbo_data.csv"));

        let trade_writer = open_writer(&trade_path, &["exchange", "timestamp", "side", "price", "quantity"])?;
        let bbo_writer = open_writer(
            &bbo_path,
            &[
                "timestamp",
                "maker_bid",
                "maker_ask",
                "taker_bid",
                "taker_ask",
                "long_spread",
                "short_spread",
                "long_signal",
                "short_signal",
                "long_threshold",
                "short_threshold",
            ],
        )?;

        Ok(DataLog { trade_writer, bbo_writer, bbo_rows_since_flush: 0, last_bbo_flush: Instant::now() })
    }

    pub fn log_trade(&mut self, exchange: &str, side: &str, price: Decimal, quantity: Decimal) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        self.trade_writer.write_record([exchange, &timestamp, side, &price.to_string(), &quantity.to_string()])?;
        self.trade_writer.flush()?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_bbo(
        &mut self,
        maker_bid: Decimal,
        maker_ask: Decimal,
        taker_bid: Decimal,
        taker_ask: Decimal,
        long_spread: Decimal,
        short_spread: Decimal,
        long_signal: bool,
        short_signal: bool,
        long_threshold: Decimal,
        short_threshold: Decimal,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        self.bbo_writer.write_record(&[
            timestamp,
            maker_bid.to_string(),
            maker_ask.to_string(),
            taker_bid.to_string(),
            taker_ask.to_string(),
            long_spread.to_string(),
            short_spread.to_string(),
            long_signal.to_string(),
            short_signal.to_string(),
            long_threshold.to_string(),
            short_threshold.to_string(),
        ])?;

        self.bbo_rows_since_flush += 1;
        if self.bbo_rows_since_flush >= BBO_FLUSH_ROWS || self.last_bbo_flush.elapsed() >= BBO_FLUSH_INTERVAL {
            self.bbo_writer.flush()?;
            self.bbo_rows_since_flush = 0;
            self.last_bbo_flush = Instant::now();
        }
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.trade_writer.flush()?;
        self.bbo_writer.flush()?;
        Ok(())
    }
}

fn open_writer(path: &Path, header: &[&str]) -> Result<Writer<std::fs::File>> {
    let file_exists = path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = Writer::from_writer(file);
    if !file_exists {
        writer.write_record(header)?;
        writer.flush()?;
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = std::env::temp_dir().join(format!("cross-arb-test-{}", uuid::Uuid::new_v4()));
        let mut log = DataLog::new(&dir, "edgex", "BTC").unwrap();
        log.log_trade("edgex", "BUY", dec!(60000.9), dec!(0.01)).unwrap();
        log.log_bbo(
            dec!(60000.0), dec!(60001.0), dec!(60015.0), dec!(60016.0),
            dec!(15.0), dec!(-15.0), true, false, dec!(10.0), dec!(10.0),
        )
        .unwrap();
        log.close().unwrap();

        let trades = std::fs::read_to_string(dir.join("edgex_BTC_trades.csv")).unwrap();
        assert!(trades.starts_with("exchange,timestamp,side,price,quantity"));
        assert_eq!(trades.lines().count(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }
}
