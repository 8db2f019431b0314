use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use crate::config::EngineConfig;

/// Rolling-percentile spread threshold estimator. Owned and mutated
/// exclusively by the `TradeController` task (no internal locking needed),
/// the same single-writer discipline the teacher gives `InventoryManager`'s
/// cache.
pub struct ThresholdEngine {
    window: usize,
    update_interval: Duration,
    min: Decimal,
    max: Decimal,
    percentile: f64,
    warmup: usize,

    long_spreads: VecDeque<Decimal>,
    short_spreads: VecDeque<Decimal>,

    long_threshold: Decimal,
    short_threshold: Decimal,
    long_mean: Decimal,
    long_std: Decimal,
    short_mean: Decimal,
    short_std: Decimal,

    last_update: Instant,
}

impl ThresholdEngine {
    pub fn new(config: &EngineConfig) -> Self {
        ThresholdEngine {
            window: config.threshold_window,
            update_interval: config.threshold_update_interval,
            min: config.threshold_min,
            max: config.threshold_max,
            percentile: config.threshold_percentile,
            warmup: config.threshold_warmup,
            long_spreads: VecDeque::with_capacity(config.threshold_window),
            short_spreads: VecDeque::with_capacity(config.threshold_window),
            long_threshold: config.threshold_min,
            short_threshold: config.threshold_min,
            long_mean: Decimal::ZERO,
            long_std: Decimal::ZERO,
            short_mean: Decimal::ZERO,
            short_std: Decimal::ZERO,
            last_update: Instant::now(),
        }
    }

    /// Appends one sample to each bounded FIFO (oldest evicted first) and
    /// recomputes thresholds if `update_interval` has elapsed and both
    /// FIFOs have reached warmup.
    pub fn add_sample(&mut self, long_spread: Decimal, short_spread: Decimal) {
        push_bounded(&mut self.long_spreads, long_spread, self.window);
        push_bounded(&mut self.short_spreads, short_spread, self.window);

        if self.last_update.elapsed() >= self.update_interval {
            self.recompute();
            self.last_update = Instant::now();
        }
    }

    /// Recalculates thresholds from the current sample history. Two
    /// consecutive calls with no new samples produce identical state
    /// (idempotent).
    pub fn recompute(&mut self) {
        if self.long_spreads.len() < self.warmup || self.short_spreads.len() < self.warmup {
            info!(
                long_samples = self.long_spreads.len(),
                short_samples = self.short_spreads.len(),
                warmup = self.warmup,
                "threshold engine: insufficient data, using floor thresholds"
            );
            return;
        }

        let (new_long, long_mean, long_std) = percentile_stats(&self.long_spreads, self.percentile);
        let (new_short, short_mean, short_std) = percentile_stats(&self.short_spreads, self.percentile);

        let new_long = new_long.clamp(self.min, self.max);
        let new_short = new_short.clamp(self.min, self.max);

        if new_long != self.long_threshold || new_short != self.short_threshold {
            info!(
                long_old = %self.long_threshold, long_new = %new_long,
                short_old = %self.short_threshold, short_new = %new_short,
                samples = self.long_spreads.len(),
                "threshold engine: recomputed"
            );
        }

        self.long_threshold = new_long;
        self.short_threshold = new_short;
        self.long_mean = long_mean;
        self.long_std = long_std;
        self.short_mean = short_mean;
        self.short_std = short_std;
    }

    pub fn current(&self) -> (Decimal, Decimal) {
        (self.long_threshold, self.short_threshold)
    }

    pub fn statistics(&self) -> ThresholdStatistics {
        ThresholdStatistics {
            long_threshold: self.long_threshold,
            short_threshold: self.short_threshold,
            long_mean: self.long_mean,
            long_std: self.long_std,
            short_mean: self.short_mean,
            short_std: self.short_std,
            sample_count: self.long_spreads.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdStatistics {
    pub long_threshold: Decimal,
    pub short_threshold: Decimal,
    pub long_mean: Decimal,
    pub long_std: Decimal,
    pub short_mean: Decimal,
    pub short_std: Decimal,
    pub sample_count: usize,
}

fn push_bounded(deque: &mut VecDeque<Decimal>, sample: Decimal, window: usize) {
    if deque.len() >= window {
        deque.pop_front();
    }
    deque.push_back(sample);
}

/// Returns `(percentile_p, mean, stddev)`. Percentile index is
/// `floor(len * p)`, matching the reference percentile definition exactly.
fn percentile_stats(samples: &VecDeque<Decimal>, percentile: f64) -> (Decimal, Decimal, Decimal) {
    let mut sorted: Vec<Decimal> = samples.iter().copied().collect();
    sorted.sort();

    let idx = ((sorted.len() as f64) * percentile) as usize;
    let idx = idx.min(sorted.len() - 1);
    let p = sorted[idx];

    let n = Decimal::from(sorted.len() as u64);
    let mean = sorted.iter().sum::<Decimal>() / n;
    let variance = sorted.iter().map(|x| (*x - mean) * (*x - mean)).sum::<Decimal>() / n;
    let std = if variance > Decimal::ZERO {
        Decimal::from_f64_retain(variance.to_f64().unwrap_or(0.0).sqrt()).unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    (p, mean, std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> EngineConfig {
        EngineConfig::load(crate::config::CliArgs {
            exchange: "test".into(),
            ticker: "BTC".into(),
            size: None,
            fill_timeout: None,
            max_position: None,
            long_threshold: None,
            short_threshold: None,
        })
    }

    #[test]
    fn below_warmup_holds_at_floor() {
        let cfg = test_config();
        let mut engine = ThresholdEngine::new(&cfg);
        for _ in 0..50 {
            engine.add_sample(dec!(15.0), dec!(15.0));
        }
        engine.recompute();
        let (l, s) = engine.current();
        assert_eq!(l, cfg.threshold_min);
        assert_eq!(s, cfg.threshold_min);
    }

    #[test]
    fn recompute_is_idempotent_with_no_new_samples() {
        let cfg = test_config();
        let mut engine = ThresholdEngine::new(&cfg);
        for i in 0..200 {
            engine.add_sample(Decimal::from(i % 20), Decimal::from(i % 20));
        }
        engine.recompute();
        let first = engine.current();
        engine.recompute();
        let second = engine.current();
        assert_eq!(first, second);
    }

    #[test]
    fn threshold_always_within_bounds() {
        let cfg = test_config();
        let mut engine = ThresholdEngine::new(&cfg);
        for _ in 0..500 {
            engine.add_sample(dec!(1000.0), dec!(1000.0));
        }
        engine.recompute();
        let (l, s) = engine.current();
        assert!(l >= cfg.threshold_min && l <= cfg.threshold_max);
        assert!(s >= cfg.threshold_min && s <= cfg.threshold_max);
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let mut cfg = test_config();
        cfg.threshold_window = 10;
        cfg.threshold_warmup = 5;
        let mut engine = ThresholdEngine::new(&cfg);
        for i in 0..30 {
            engine.add_sample(Decimal::from(i), Decimal::from(i));
        }
        assert_eq!(engine.long_spreads.len(), 10);
        assert_eq!(engine.long_spreads.front().copied(), Some(Decimal::from(20)));
    }
}
