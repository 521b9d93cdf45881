//! Decides when to open a new anchor.
//!
//! An anchor is a fixed 10 USDT short opened on an overextended coin: price
//! pressed against resistance and near the top of its 7-day range. Every
//! refusal is a structured [`Refusal`], never an error.

use anchor_risk_core::{
    DecisionLog, DecisionRecord, EngineResult, ExecutionMode, GranularityTier, MarginMode,
    MarketConfig, Outcome, Position, PressureLevels, Side,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::anchor_lifecycle::AnchorLifecycleManager;
use crate::context::EngineContext;
use crate::executor;
use crate::protect_orders::AnchorProtectOrderManager;
use crate::rules::{
    is_excluded_instrument, ANCHOR_LEVERAGE, ANCHOR_MAX_DISTANCE_PERCENT, ANCHOR_MIN_PCT_7D,
    ANCHOR_NOTIONAL, ANCHOR_SIDE,
};

pub const COMPONENT: &str = "anchor_trigger";

/// Why an anchor was not opened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Refusal {
    Disabled,
    AnchorNotAllowed,
    ShortNotAllowed,
    ExcludedInstrument,
    ActiveAnchorExists,
    PositionAlreadyOpen,
    RecentlyOpened { seconds_ago: i64 },
    MissingPressureLevels,
    TooFarFromResistance { distance_percent: Decimal },
    PercentileTooLow { pct_7d: Option<Decimal> },
    ExposureCap { exposure_after: Decimal, cap: Decimal },
}

impl std::fmt::Display for Refusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "engine disabled"),
            Self::AnchorNotAllowed => write!(f, "anchors not allowed"),
            Self::ShortNotAllowed => write!(f, "shorts not allowed"),
            Self::ExcludedInstrument => write!(f, "major coin excluded"),
            Self::ActiveAnchorExists => write!(f, "active anchor exists"),
            Self::PositionAlreadyOpen => write!(f, "position already open on anchor side"),
            Self::RecentlyOpened { seconds_ago } => write!(f, "anchor opened {seconds_ago}s ago"),
            Self::MissingPressureLevels => write!(f, "pressure levels missing"),
            Self::TooFarFromResistance { distance_percent } => {
                write!(f, "{distance_percent}% from resistance (max {ANCHOR_MAX_DISTANCE_PERCENT}%)")
            }
            Self::PercentileTooLow { pct_7d } => match pct_7d {
                Some(p) => write!(f, "7d percentile {p} below {ANCHOR_MIN_PCT_7D}"),
                None => write!(f, "7d percentile missing"),
            },
            Self::ExposureCap { exposure_after, cap } => {
                write!(f, "exposure {exposure_after} would exceed cap {cap}")
            }
        }
    }
}

/// A short-only open the evaluator approved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenIntent {
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TriggerDecision {
    Open(OpenIntent),
    Refused(Refusal),
}

/// Everything the trigger rule looks at for one instrument.
#[derive(Debug, Clone)]
pub struct TriggerInputs<'a> {
    pub instrument: &'a str,
    pub config: &'a MarketConfig,
    pub price: Decimal,
    pub levels: &'a PressureLevels,
    /// Notional already open on the instrument, both sides.
    pub exposure: Decimal,
    pub has_active_anchor: bool,
    pub has_open_short: bool,
    pub last_open: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub dedup_window: Duration,
}

/// Distance in percent from `price` to the nearer of the two resistance lines.
#[must_use]
pub fn distance_to_nearer_resistance(price: Decimal, level1: Decimal, level2: Decimal) -> Decimal {
    if price.is_zero() {
        return Decimal::MAX;
    }
    let d1 = ((level1 - price) / price).abs();
    let d2 = ((level2 - price) / price).abs();
    d1.min(d2) * dec!(100)
}

/// Applies the trigger rule, logging each check.
#[must_use]
pub fn evaluate(inputs: &TriggerInputs<'_>, log: &mut DecisionLog) -> TriggerDecision {
    let cfg = inputs.config;
    let refuse = |log: &mut DecisionLog, refusal: Refusal| {
        log.step(format!("refused: {refusal}"));
        TriggerDecision::Refused(refusal)
    };

    if !cfg.enabled {
        return refuse(log, Refusal::Disabled);
    }
    if !cfg.allow_anchor {
        return refuse(log, Refusal::AnchorNotAllowed);
    }
    if !cfg.side_allowed(ANCHOR_SIDE) {
        return refuse(log, Refusal::ShortNotAllowed);
    }
    log.step("subsystem enabled, anchors and shorts allowed");

    if is_excluded_instrument(inputs.instrument) {
        return refuse(log, Refusal::ExcludedInstrument);
    }
    if inputs.has_active_anchor {
        return refuse(log, Refusal::ActiveAnchorExists);
    }
    if inputs.has_open_short {
        return refuse(log, Refusal::PositionAlreadyOpen);
    }
    if let Some(last) = inputs.last_open {
        let elapsed = inputs.now - last;
        if elapsed < inputs.dedup_window {
            return refuse(
                log,
                Refusal::RecentlyOpened {
                    seconds_ago: elapsed.num_seconds(),
                },
            );
        }
    }

    let (Some(level1), Some(level2)) = (inputs.levels.level1, inputs.levels.level2) else {
        return refuse(log, Refusal::MissingPressureLevels);
    };
    let distance = distance_to_nearer_resistance(inputs.price, level1, level2);
    log.step(format!(
        "price={} level1={level1} level2={level2} distance={}%",
        inputs.price,
        distance.round_dp(4)
    ));
    if distance > ANCHOR_MAX_DISTANCE_PERCENT {
        return refuse(
            log,
            Refusal::TooFarFromResistance {
                distance_percent: distance.round_dp(4),
            },
        );
    }

    match inputs.levels.pct_7d {
        Some(p) if p >= ANCHOR_MIN_PCT_7D => log.step(format!("pct_7d={p} >= {ANCHOR_MIN_PCT_7D}")),
        other => return refuse(log, Refusal::PercentileTooLow { pct_7d: other }),
    }

    let cap = cfg.single_coin_cap();
    let exposure_after = inputs.exposure + ANCHOR_NOTIONAL;
    log.step(format!("exposure {} + {ANCHOR_NOTIONAL} vs cap {cap}", inputs.exposure));
    if exposure_after > cap {
        return refuse(log, Refusal::ExposureCap { exposure_after, cap });
    }

    let reason = format!(
        "within {}% of resistance, 7d percentile {}",
        distance.round_dp(2),
        inputs.levels.pct_7d.unwrap_or_default()
    );
    log.step(format!("open {ANCHOR_SIDE} {ANCHOR_NOTIONAL} USDT: {reason}"));
    TriggerDecision::Open(OpenIntent {
        instrument: inputs.instrument.to_string(),
        side: ANCHOR_SIDE,
        size: ANCHOR_NOTIONAL,
        price: inputs.price,
        reason,
    })
}

pub struct AnchorTriggerEvaluator {
    ctx: EngineContext,
    watchlist: Vec<String>,
    dedup_window: Duration,
}

impl AnchorTriggerEvaluator {
    #[must_use]
    pub fn new(ctx: EngineContext, watchlist: Vec<String>, dedup_window_secs: i64) -> Self {
        Self {
            ctx,
            watchlist,
            dedup_window: Duration::seconds(dedup_window_secs),
        }
    }

    /// Scans the watchlist once.
    ///
    /// # Errors
    ///
    /// Returns [`anchor_risk_core::EngineError::ConfigUnavailable`] when the
    /// cycle must be skipped. Per-instrument failures are recorded instead.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let config = self.ctx.config.get_market_config().await?;
        let mut records = Vec::with_capacity(self.watchlist.len());

        for instrument in &self.watchlist {
            let record = match self.evaluate_instrument(instrument, &config, mode).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(instrument, error = %e, "Anchor trigger evaluation failed");
                    let mut log = DecisionLog::new(COMPONENT, instrument, Some(ANCHOR_SIDE), mode);
                    log.step(format!("error: {e}"));
                    log.finish("open_anchor", Outcome::Failed, e.kind())
                }
            };
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }

    async fn evaluate_instrument(
        &self,
        instrument: &str,
        config: &MarketConfig,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, instrument, Some(ANCHOR_SIDE), mode);

        let price = self.ctx.prices.get_current_price(instrument).await?;
        let levels = self.ctx.prices.get_pressure_levels(instrument).await?;
        let positions = self.ctx.store.get_open_positions().await?;
        let exposure: Decimal = positions
            .iter()
            .filter(|p| p.instrument == instrument)
            .map(|p| p.size)
            .sum();
        let has_open_short = positions
            .iter()
            .any(|p| p.instrument == instrument && p.side == ANCHOR_SIDE);
        let has_active_anchor = self.ctx.store.get_active_anchor(instrument, ANCHOR_SIDE).await?.is_some();
        let last_open = self.ctx.store.last_anchor_open_time(instrument).await?;

        let inputs = TriggerInputs {
            instrument,
            config,
            price,
            levels: &levels,
            exposure,
            has_active_anchor,
            has_open_short,
            last_open,
            now: Utc::now(),
            dedup_window: self.dedup_window,
        };

        let intent = match evaluate(&inputs, &mut log) {
            TriggerDecision::Refused(refusal) => {
                return Ok(log.finish("open_anchor", Outcome::Refused, refusal.to_string()));
            }
            TriggerDecision::Open(intent) => intent,
        };

        if !mode.is_live() {
            return Ok(log.finish("open_anchor", Outcome::Simulated, intent.reason));
        }

        self.open(&intent, &mut log).await?;
        Ok(log.finish("open_anchor", Outcome::Executed, intent.reason))
    }

    /// Claims the anchor slot, opens the short, then spawns its protect
    /// orders. The slot is released if the open order fails.
    async fn open(&self, intent: &OpenIntent, log: &mut DecisionLog) -> EngineResult<()> {
        let lifecycle = AnchorLifecycleManager::new(self.ctx.clone());
        let anchor = lifecycle
            .create(&intent.instrument, intent.side, intent.price, intent.size)
            .await?;
        log.step(format!("anchor {} recorded", anchor.id));

        let position = Position::open(
            &intent.instrument,
            intent.side,
            intent.size,
            intent.price,
            ANCHOR_LEVERAGE,
            MarginMode::Cross,
            GranularityTier::Small,
        )?
        .into_anchor();

        if let Err(e) = executor::open_position(&self.ctx, &position, "anchor_open").await {
            log.step(format!("open order failed: {e}"));
            if let Err(release) = lifecycle.release(&anchor).await {
                error!(anchor_id = anchor.id, error = %release, "Failed to release anchor slot");
            }
            return Err(e);
        }
        log.step("anchor short opened");

        let protect = AnchorProtectOrderManager::new(self.ctx.clone());
        match protect.spawn_for(&anchor).await {
            Ok(orders) => log.step(format!("{} protect orders spawned", orders.len())),
            Err(e) => {
                // The protect loop re-spawns missing orders on its next cycle.
                warn!(anchor_id = anchor.id, error = %e, "Protect order spawn failed");
                log.step(format!("protect spawn failed: {e}"));
            }
        }

        info!(
            instrument = %intent.instrument,
            anchor_id = anchor.id,
            price = %intent.price,
            "Anchor opened"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{EngineError, PositionStore};

    fn hot_levels() -> PressureLevels {
        PressureLevels {
            level1: Some(dec!(0.1015)),
            level2: Some(dec!(0.11)),
            pct_7d: Some(dec!(95)),
            pct_48h: Some(dec!(90)),
        }
    }

    fn inputs<'a>(config: &'a MarketConfig, levels: &'a PressureLevels) -> TriggerInputs<'a> {
        TriggerInputs {
            instrument: "DOGE-USDT-SWAP",
            config,
            price: dec!(0.1),
            levels,
            exposure: Decimal::ZERO,
            has_active_anchor: false,
            has_open_short: false,
            last_open: None,
            now: Utc::now(),
            dedup_window: Duration::minutes(5),
        }
    }

    fn run(inputs: &TriggerInputs<'_>) -> TriggerDecision {
        let mut log = DecisionLog::new(COMPONENT, inputs.instrument, Some(Side::Short), ExecutionMode::DryRun);
        evaluate(inputs, &mut log)
    }

    #[test]
    fn fires_when_overextended() {
        let config = MarketConfig::default();
        let levels = hot_levels();
        match run(&inputs(&config, &levels)) {
            TriggerDecision::Open(intent) => {
                assert_eq!(intent.side, Side::Short);
                assert_eq!(intent.size, dec!(10));
                assert!(!intent.reason.is_empty());
            }
            TriggerDecision::Refused(r) => panic!("unexpected refusal: {r}"),
        }
    }

    #[test]
    fn refuses_when_disabled_or_anchor_off() {
        let levels = hot_levels();
        let disabled = MarketConfig {
            enabled: false,
            ..MarketConfig::default()
        };
        assert_eq!(run(&inputs(&disabled, &levels)), TriggerDecision::Refused(Refusal::Disabled));

        let no_anchor = MarketConfig {
            allow_anchor: false,
            ..MarketConfig::default()
        };
        assert_eq!(
            run(&inputs(&no_anchor, &levels)),
            TriggerDecision::Refused(Refusal::AnchorNotAllowed)
        );

        let no_short = MarketConfig {
            allow_short: false,
            ..MarketConfig::default()
        };
        assert_eq!(
            run(&inputs(&no_short, &levels)),
            TriggerDecision::Refused(Refusal::ShortNotAllowed)
        );
    }

    #[test]
    fn refuses_missing_second_level() {
        let config = MarketConfig::default();
        let levels = PressureLevels {
            level2: None,
            ..hot_levels()
        };
        assert_eq!(
            run(&inputs(&config, &levels)),
            TriggerDecision::Refused(Refusal::MissingPressureLevels)
        );
    }

    #[test]
    fn refuses_far_from_resistance() {
        let config = MarketConfig::default();
        // 3% below the nearer line
        let levels = PressureLevels {
            level1: Some(dec!(0.103)),
            level2: Some(dec!(0.12)),
            ..hot_levels()
        };
        assert!(matches!(
            run(&inputs(&config, &levels)),
            TriggerDecision::Refused(Refusal::TooFarFromResistance { .. })
        ));
    }

    #[test]
    fn refuses_low_percentile() {
        let config = MarketConfig::default();
        let levels = PressureLevels {
            pct_7d: Some(dec!(89.9)),
            ..hot_levels()
        };
        assert!(matches!(
            run(&inputs(&config, &levels)),
            TriggerDecision::Refused(Refusal::PercentileTooLow { .. })
        ));
    }

    #[test]
    fn refuses_majors() {
        let config = MarketConfig::default();
        let levels = hot_levels();
        let mut i = inputs(&config, &levels);
        i.instrument = "BTC-USDT-SWAP";
        assert_eq!(run(&i), TriggerDecision::Refused(Refusal::ExcludedInstrument));
    }

    #[test]
    fn refuses_over_single_coin_cap() {
        let config = MarketConfig::default(); // cap 1000
        let levels = hot_levels();
        let mut i = inputs(&config, &levels);
        i.exposure = dec!(995);
        assert!(matches!(run(&i), TriggerDecision::Refused(Refusal::ExposureCap { .. })));
    }

    #[test]
    fn refuses_within_dedup_window() {
        let config = MarketConfig::default();
        let levels = hot_levels();
        let mut i = inputs(&config, &levels);
        i.last_open = Some(i.now - Duration::minutes(2));
        assert!(matches!(run(&i), TriggerDecision::Refused(Refusal::RecentlyOpened { .. })));

        i.last_open = Some(i.now - Duration::minutes(6));
        assert!(matches!(run(&i), TriggerDecision::Open(_)));
    }

    #[test]
    fn refuses_when_anchor_already_active() {
        let config = MarketConfig::default();
        let levels = hot_levels();
        let mut i = inputs(&config, &levels);
        i.has_active_anchor = true;
        assert_eq!(run(&i), TriggerDecision::Refused(Refusal::ActiveAnchorExists));
    }

    #[tokio::test]
    async fn live_open_creates_anchor_position_and_protect_orders() {
        let h = Harness::new();
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.1));
        h.prices.set_levels("DOGE-USDT-SWAP", hot_levels());
        let evaluator = AnchorTriggerEvaluator::new(h.ctx(), vec!["DOGE-USDT-SWAP".to_string()], 300);

        let records = evaluator.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Executed);

        let anchor = h.store.get_active_anchor("DOGE-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        assert_eq!(anchor.anchor_size, dec!(10));
        let pos = h.store.get_position("DOGE-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        assert!(pos.is_anchor);
        assert_eq!(h.store.get_protect_orders(anchor.id).await.unwrap().len(), 2);
        assert_eq!(h.orders.exchange_size("DOGE-USDT-SWAP", Side::Short), dec!(10));

        // Second pass: the active anchor blocks a repeat
        let again = evaluator.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(again[0].outcome, Outcome::Refused);
        assert_eq!(h.store.list_active_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_open_releases_the_anchor_slot() {
        let h = Harness::new();
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.1));
        h.prices.set_levels("DOGE-USDT-SWAP", hot_levels());
        h.orders.reject_next(1);
        let evaluator = AnchorTriggerEvaluator::new(h.ctx(), vec!["DOGE-USDT-SWAP".to_string()], 300);

        let records = evaluator.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Failed);
        assert!(h.store.list_active_anchors().await.unwrap().is_empty());
        assert!(h.store.get_position("DOGE-USDT-SWAP", Side::Short).await.unwrap().is_none());
        assert!(h.store.last_anchor_open_time("DOGE-USDT-SWAP").await.unwrap().is_none());

        // Nothing was opened, so the dedup window does not hold the retry back
        let retry = evaluator.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(retry[0].outcome, Outcome::Executed, "{:?}", retry[0].steps);
        assert_eq!(h.orders.exchange_size("DOGE-USDT-SWAP", Side::Short), dec!(10));
    }

    #[tokio::test]
    async fn dry_run_mutates_nothing() {
        let h = Harness::new();
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.1));
        h.prices.set_levels("DOGE-USDT-SWAP", hot_levels());
        let evaluator = AnchorTriggerEvaluator::new(h.ctx(), vec!["DOGE-USDT-SWAP".to_string()], 300);

        let records = evaluator.run_cycle(ExecutionMode::DryRun).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Simulated);
        assert!(records[0].steps.len() >= 4);
        assert!(h.store.list_active_anchors().await.unwrap().is_empty());
        assert!(h.orders.filled_orders().is_empty());
    }

    #[tokio::test]
    async fn config_outage_skips_cycle() {
        let h = Harness::new();
        h.config.fail();
        let evaluator = AnchorTriggerEvaluator::new(h.ctx(), vec!["DOGE-USDT-SWAP".to_string()], 300);
        assert!(matches!(
            evaluator.run_cycle(ExecutionMode::Live).await,
            Err(EngineError::ConfigUnavailable(_))
        ));
    }
}
