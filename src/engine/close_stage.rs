use std::time::Instant;

use rust_decimal::Decimal;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTag {
    Default,
    Stage1Relaxed,
    Stage2Breakeven,
    Stage3Force,
}

#[derive(Debug, Clone, Copy)]
pub struct CloseStage {
    pub multiplier: Decimal,
    pub min_spread: Decimal,
    pub tag: StageTag,
}

/// Pure function of position age: the longer a position has been open,
/// the more the close threshold relaxes, down to "close on any positive
/// spread" once the position is old enough. Returns the default band when
/// no position is open or time-staged closing is disabled.
pub struct CloseStageSelector {
    enabled: bool,
    default_mul: Decimal,
    default_min: Decimal,
    stage1_hours: f64,
    stage1_mul: Decimal,
    stage1_min: Decimal,
    stage2_hours: f64,
    stage2_mul: Decimal,
    stage2_min: Decimal,
    stage3_hours: f64,
    stage3_mul: Decimal,
    stage3_min: Decimal,
}

impl CloseStageSelector {
    pub fn new(config: &EngineConfig) -> Self {
        CloseStageSelector {
            enabled: config.enable_time_based_close,
            default_mul: config.close_threshold_multiplier,
            default_min: config.min_close_spread,
            stage1_hours: config.stage1_hours,
            stage1_mul: config.stage1_multiplier,
            stage1_min: config.stage1_min_spread,
            stage2_hours: config.stage2_hours,
            stage2_mul: config.stage2_multiplier,
            stage2_min: config.stage2_min_spread,
            stage3_hours: config.stage3_hours,
            stage3_mul: config.stage3_multiplier,
            stage3_min: config.stage3_min_spread,
        }
    }

    pub fn for_age(&self, open_ts: Option<Instant>, now: Instant) -> CloseStage {
        let default = CloseStage { multiplier: self.default_mul, min_spread: self.default_min, tag: StageTag::Default };

        if !self.enabled {
            return default;
        }
        let Some(open_ts) = open_ts else {
            return default;
        };

        let age_hours = now.saturating_duration_since(open_ts).as_secs_f64() / 3600.0;

        if age_hours >= self.stage3_hours {
            CloseStage { multiplier: self.stage3_mul, min_spread: self.stage3_min, tag: StageTag::Stage3Force }
        } else if age_hours >= self.stage2_hours {
            CloseStage { multiplier: self.stage2_mul, min_spread: self.stage2_min, tag: StageTag::Stage2Breakeven }
        } else if age_hours >= self.stage1_hours {
            CloseStage { multiplier: self.stage1_mul, min_spread: self.stage1_min, tag: StageTag::Stage1Relaxed }
        } else {
            default
        }
    }
}

#[cfg(test)]
fn hours(h: f64) -> std::time::Duration {
    std::time::Duration::from_secs_f64(h * 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn no_open_position_returns_default_band() {
        let cfg = test_config();
        let sel = CloseStageSelector::new(&cfg);
        let stage = sel.for_age(None, Instant::now());
        assert_eq!(stage.tag, StageTag::Default);
    }

    #[test]
    fn stage_monotonically_relaxes_with_age() {
        let cfg = test_config();
        let sel = CloseStageSelector::new(&cfg);
        let now = Instant::now();

        let fresh = sel.for_age(Some(now - hours(0.1)), now);
        let s1 = sel.for_age(Some(now - hours(1.5)), now);
        let s2 = sel.for_age(Some(now - hours(2.5)), now);
        let s3 = sel.for_age(Some(now - hours(4.0)), now);

        assert_eq!(fresh.tag, StageTag::Default);
        assert_eq!(s1.tag, StageTag::Stage1Relaxed);
        assert_eq!(s2.tag, StageTag::Stage2Breakeven);
        assert_eq!(s3.tag, StageTag::Stage3Force);

        assert!(fresh.multiplier >= s1.multiplier);
        assert!(s1.multiplier >= s2.multiplier);
        assert!(s2.multiplier >= s3.multiplier);
        assert!(fresh.min_spread >= s1.min_spread);
        assert!(s1.min_spread >= s2.min_spread);
        assert!(s2.min_spread >= s3.min_spread);
    }

    #[test]
    fn stage3_force_closes_on_any_positive_spread() {
        let cfg = test_config();
        let sel = CloseStageSelector::new(&cfg);
        let now = Instant::now();
        let stage = sel.for_age(Some(now - hours(10.0)), now);
        assert_eq!(stage.multiplier, Decimal::ZERO);
        assert_eq!(stage.min_spread, Decimal::ZERO);
    }

    #[test]
    fn disabled_always_returns_default() {
        let mut cfg = test_config();
        cfg.enable_time_based_close = false;
        let sel = CloseStageSelector::new(&cfg);
        let now = Instant::now();
        let stage = sel.for_age(Some(now - hours(10.0)), now);
        assert_eq!(stage.tag, StageTag::Default);
    }
}
