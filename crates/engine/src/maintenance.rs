//! Margin maintenance.
//!
//! Small positions sliding into loss are rescued with a fixed buy and then
//! shrunk back to a target margin, which lowers their average entry. The
//! action count per (instrument, side) and UTC day picks the parameters:
//! three normal actions, then up to two super actions where enabled.
//!
//! Trigger priority:
//! 1. margin at or above `margin_max`: skip
//! 2. profit rate at or below `loss_threshold`: act
//! 3. profit rate within the soft band above it: warn only
//!
//! Margin below `margin_min` is only noted. Small residuals are exactly what
//! the top-up is for.

use anchor_risk_core::{
    retry_on_contention, DecisionLog, DecisionRecord, EngineError, EngineResult, ExecutionMode,
    MaintenanceCounter, MarketConfig, Outcome, Position, Side,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::executor;
use crate::rules::{
    maintenance_stage, MaintenanceKind, MaintenanceStage, MAINTENANCE_COOLDOWN_SECS,
    MAINTENANCE_LEVERAGE, MAINTENANCE_MAX_CORRECTIONS, MAINTENANCE_SOFT_MARGIN_POINTS,
    NORMAL_DAILY_CAP, SUPER_DAILY_CAP,
};
use crate::types::CloseReason;

pub const COMPONENT: &str = "maintenance";

/// How a position's margin and loss compare to the maintenance bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    AboveCeiling,
    Act,
    Warn,
    Healthy,
}

#[must_use]
pub fn classify(config: &MarketConfig, margin: Decimal, profit_rate: Decimal) -> Trigger {
    if margin >= config.margin_max {
        Trigger::AboveCeiling
    } else if profit_rate <= config.loss_threshold {
        Trigger::Act
    } else if profit_rate <= config.loss_threshold + MAINTENANCE_SOFT_MARGIN_POINTS {
        Trigger::Warn
    } else {
        Trigger::Healthy
    }
}

/// Why a due action was held back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Gate {
    Cooldown { remaining_secs: i64 },
    DailyCap { cap: u32 },
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cooldown { remaining_secs } => write!(f, "cooldown, {remaining_secs}s left"),
            Self::DailyCap { cap } => write!(f, "daily cap of {cap} reached"),
        }
    }
}

impl Gate {
    /// Decision reason. A spent daily cap is reported as
    /// [`EngineError::DailyCapReached`].
    fn reason(&self, position: &Position) -> String {
        match self {
            Self::Cooldown { .. } => "cooldown".to_string(),
            Self::DailyCap { cap } => {
                let err = EngineError::DailyCapReached {
                    instrument: position.instrument.clone(),
                    side: position.side,
                    cap: *cap,
                };
                info!(error = %err, "Maintenance held back");
                err.kind().to_string()
            }
        }
    }
}

/// Stage for the next action on `counter`, already rolled to today.
///
/// # Errors
///
/// The [`Gate`] that blocks the action.
pub fn select_stage(
    counter: &MaintenanceCounter,
    config: &MarketConfig,
    side: Side,
    now: DateTime<Utc>,
) -> Result<&'static MaintenanceStage, Gate> {
    if let Some(last) = counter.last_maintenance_time {
        let ready_at = last + Duration::seconds(MAINTENANCE_COOLDOWN_SECS);
        if now < ready_at {
            return Err(Gate::Cooldown {
                remaining_secs: (ready_at - now).num_seconds(),
            });
        }
    }

    let super_enabled = config.super_maintenance_enabled(side);
    if counter.count >= NORMAL_DAILY_CAP && !super_enabled {
        return Err(Gate::DailyCap { cap: NORMAL_DAILY_CAP });
    }
    let stage = maintenance_stage(counter.count).ok_or(Gate::DailyCap {
        cap: NORMAL_DAILY_CAP + SUPER_DAILY_CAP,
    })?;
    if stage.kind == MaintenanceKind::Super && counter.super_count >= SUPER_DAILY_CAP {
        return Err(Gate::DailyCap { cap: SUPER_DAILY_CAP });
    }
    Ok(stage)
}

/// Order notional that brings `margin` back to `stage.target_margin`, if it
/// sits outside the tolerance band. Positive grows, negative shrinks.
#[must_use]
pub fn correction(stage: &MaintenanceStage, margin: Decimal) -> Option<Decimal> {
    let diff = stage.target_margin - margin;
    (diff.abs() > stage.tolerance).then(|| diff * MAINTENANCE_LEVERAGE)
}

pub struct MarginMaintenanceEngine {
    ctx: EngineContext,
}

impl MarginMaintenanceEngine {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Store and order failures. Gate refusals become [`Outcome::Refused`].
    pub async fn evaluate(
        &self,
        config: &MarketConfig,
        position: &Position,
        price: Decimal,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);
        if !config.enabled {
            return Ok(log.finish("maintain", Outcome::NoAction, "disabled"));
        }

        let margin = position.margin();
        let rate = position.profit_rate(price);
        let trigger = classify(config, margin, rate);
        log.step(format!(
            "margin={} band=[{}, {}) profit_rate={} threshold={} -> {trigger:?}",
            margin.round_dp(4),
            config.margin_min,
            config.margin_max,
            rate.round_dp(4),
            config.loss_threshold
        ));
        if margin < config.margin_min {
            log.step(format!("margin below floor {}", config.margin_min));
        }

        match trigger {
            Trigger::AboveCeiling | Trigger::Healthy => {
                return Ok(log.finish("maintain", Outcome::NoAction, format!("{trigger:?}")));
            }
            Trigger::Warn => {
                warn!(
                    instrument = %position.instrument,
                    side = %position.side,
                    profit_rate = %rate.round_dp(2),
                    "Position approaching maintenance threshold"
                );
                return Ok(log.finish("maintain", Outcome::Warned, "inside soft band"));
            }
            Trigger::Act => {}
        }

        let now = Utc::now();
        let counter = self.current_counter(position, now).await?;
        log.step(format!(
            "today: count={} super={} last={:?}",
            counter.count, counter.super_count, counter.last_maintenance_time
        ));
        let stage = match select_stage(&counter, config, position.side, now) {
            Ok(stage) => stage,
            Err(gate) => {
                log.step(gate.to_string());
                return Ok(log.finish("maintain", Outcome::Refused, gate.reason(position)));
            }
        };
        log.step(format!(
            "{} stage: buy {} margin, target {} +/- {}",
            stage.kind, stage.buy_margin, stage.target_margin, stage.tolerance
        ));

        if !mode.is_live() {
            return Ok(log.finish("maintain", Outcome::Simulated, stage.kind.to_string()));
        }

        let claimed = match self.claim(config, position, now).await? {
            Ok(claimed) => claimed,
            Err(gate) => {
                log.step(format!("lost claim: {gate}"));
                return Ok(log.finish("maintain", Outcome::Refused, gate.reason(position)));
            }
        };

        let buy = stage.buy_margin * MAINTENANCE_LEVERAGE;
        let tag = format!("maintenance_{}", stage.kind);
        let grown = match executor::grow_position(&self.ctx, position, buy, price, &tag).await {
            Ok(grown) => grown,
            Err(e) => {
                if let Err(release) = self.release(&claimed, stage).await {
                    error!(
                        instrument = %position.instrument,
                        side = %position.side,
                        error = %release,
                        "Failed to release maintenance claim"
                    );
                }
                return Err(e);
            }
        };
        log.step(format!("bought {buy}, size now {}", grown.size));

        let leverage = self.ctx.orders.get_leverage(&position.instrument, position.side).await?;
        if leverage != MAINTENANCE_LEVERAGE {
            self.ctx
                .orders
                .set_leverage(&position.instrument, position.side, MAINTENANCE_LEVERAGE)
                .await?;
            log.step(format!("leverage {leverage} -> {MAINTENANCE_LEVERAGE}"));
        } else {
            log.step(format!("leverage {leverage} ok"));
        }
        let grown = if grown.leverage == MAINTENANCE_LEVERAGE {
            grown
        } else {
            self.ctx
                .store
                .set_position_leverage(&position.instrument, position.side, MAINTENANCE_LEVERAGE)
                .await?
        };

        let target = stage.target_margin * MAINTENANCE_LEVERAGE;
        let shrink = grown.size - target;
        if shrink > Decimal::ZERO {
            executor::close_position(&self.ctx, &grown, shrink, &CloseReason::MaintenanceShrink).await?;
            log.step(format!("shrunk by {shrink} to {target}"));
        }

        let outcome = self.verify(position, stage, &mut log).await?;
        info!(
            instrument = %position.instrument,
            side = %position.side,
            kind = %stage.kind,
            count = claimed.count,
            outcome = %outcome,
            "Margin maintenance done"
        );
        Ok(log.finish("maintain", outcome, stage.kind.to_string()))
    }

    async fn current_counter(&self, position: &Position, now: DateTime<Utc>) -> EngineResult<MaintenanceCounter> {
        let today = now.date_naive();
        Ok(self
            .ctx
            .store
            .get_maintenance_counter(&position.instrument, position.side)
            .await?
            .map_or_else(
                || MaintenanceCounter::fresh(&position.instrument, position.side, today),
                |c| c.for_date(today),
            ))
    }

    /// Bumps today's counter before any order goes out. Returns the counter
    /// as it was before the bump.
    async fn claim(
        &self,
        config: &MarketConfig,
        position: &Position,
        now: DateTime<Utc>,
    ) -> EngineResult<Result<MaintenanceCounter, Gate>> {
        let store = &self.ctx.store;
        retry_on_contention(self.ctx.retry, "maintenance_counter", || async move {
            let counter = self.current_counter(position, now).await?;
            let stage = match select_stage(&counter, config, position.side, now) {
                Ok(stage) => stage,
                Err(gate) => return Ok(Err(gate)),
            };
            let mut next = counter.clone();
            next.count += 1;
            if stage.kind == MaintenanceKind::Super {
                next.super_count += 1;
            }
            next.last_maintenance_time = Some(now);
            store.set_maintenance_counter(&next).await?;
            Ok(Ok(counter))
        })
        .await
    }

    /// Rolls the counter back to `before` after a failed buy.
    async fn release(&self, before: &MaintenanceCounter, stage: &MaintenanceStage) -> EngineResult<()> {
        let store = &self.ctx.store;
        retry_on_contention(self.ctx.retry, "maintenance_counter", || async move {
            let Some(current) = store.get_maintenance_counter(&before.instrument, before.side).await? else {
                return Ok(());
            };
            if current.date != before.date || current.count == 0 {
                return Ok(());
            }
            let mut next = current;
            next.count -= 1;
            if stage.kind == MaintenanceKind::Super {
                next.super_count = next.super_count.saturating_sub(1);
            }
            next.last_maintenance_time = before.last_maintenance_time;
            store.set_maintenance_counter(&next).await
        })
        .await
    }

    /// Checks the exchange margin against the stage band, correcting up to
    /// the allowed number of times.
    async fn verify(
        &self,
        position: &Position,
        stage: &MaintenanceStage,
        log: &mut DecisionLog,
    ) -> EngineResult<Outcome> {
        for attempt in 0..=MAINTENANCE_MAX_CORRECTIONS {
            let size = match self.exchange_size(position, stage).await {
                Ok(size) => size,
                Err(e @ EngineError::StaleZeroReading { .. }) => {
                    log.step(format!("verification skipped: {e}"));
                    return Ok(Outcome::Warned);
                }
                Err(e) => return Err(e),
            };
            let margin = size / MAINTENANCE_LEVERAGE;
            let Some(delta) = correction(stage, margin) else {
                log.step(format!("verified margin {} within band", margin.round_dp(4)));
                return Ok(Outcome::Executed);
            };
            if attempt == MAINTENANCE_MAX_CORRECTIONS {
                log.step(format!("margin {} still outside band", margin.round_dp(4)));
                break;
            }
            log.step(format!("correction {}: margin {} -> order {delta}", attempt + 1, margin.round_dp(4)));

            let current = self
                .ctx
                .store
                .get_position(&position.instrument, position.side)
                .await?
                .ok_or_else(|| EngineError::PositionNotFound {
                    instrument: position.instrument.clone(),
                    side: position.side,
                })?;
            if delta > Decimal::ZERO {
                let price = self.ctx.prices.get_current_price(&position.instrument).await?;
                executor::grow_position(&self.ctx, &current, delta, price, "maintenance_correction").await?;
            } else {
                let close = (-delta).min(current.size);
                executor::close_position(&self.ctx, &current, close, &CloseReason::MaintenanceCorrection).await?;
            }
        }
        warn!(
            instrument = %position.instrument,
            side = %position.side,
            "Maintenance left margin outside band"
        );
        Ok(Outcome::Warned)
    }

    /// Exchange size for the position, re-read while it comes back zero.
    async fn exchange_size(&self, position: &Position, stage: &MaintenanceStage) -> EngineResult<Decimal> {
        let orders = &self.ctx.orders;
        let expected = stage.target_margin * MAINTENANCE_LEVERAGE;
        retry_on_contention(self.ctx.retry, "exchange_size", || async move {
            let size = orders
                .get_exchange_positions()
                .await?
                .into_iter()
                .find(|p| p.instrument == position.instrument && p.side == position.side)
                .map_or(Decimal::ZERO, |p| p.size);
            if size.is_zero() {
                return Err(EngineError::StaleZeroReading {
                    what: format!("{} {} exchange size", position.instrument, position.side),
                    expected,
                    actual: size,
                });
            }
            Ok(size)
        })
        .await
    }

    /// Evaluates every open position once.
    ///
    /// # Errors
    ///
    /// Returns an error when the config or the position list cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let config = self.ctx.config.get_market_config().await?;
        let positions = self.ctx.store.get_open_positions().await?;
        let mut records = Vec::with_capacity(positions.len());

        for position in positions {
            let result = match self.ctx.prices.get_current_price(&position.instrument).await {
                Ok(price) => self.evaluate(&config, &position, price, mode).await,
                Err(e) => Err(e),
            };
            let record = result.unwrap_or_else(|e| {
                warn!(instrument = %position.instrument, side = %position.side, error = %e, "Maintenance failed");
                let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);
                log.step(format!("error: {e}"));
                log.finish("maintain", Outcome::Failed, e.kind())
            });
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{ExchangePosition, GranularityTier, MarginMode, OrderExecutor, PositionStore};
    use rust_decimal_macros::dec;

    // 12 notional at 10x: margin 1.2, inside the default [0.6, 2.0) band
    async fn small_short(h: &Harness, instrument: &str) -> Position {
        h.open(instrument, Side::Short, dec!(12), dec!(100), dec!(10), GranularityTier::Small)
            .await
    }

    fn counter_with(count: u32, super_count: u32) -> MaintenanceCounter {
        let mut c = MaintenanceCounter::fresh("BTC-USDT-SWAP", Side::Short, Utc::now().date_naive());
        c.count = count;
        c.super_count = super_count;
        c
    }

    #[test]
    fn trigger_priority() {
        let config = MarketConfig::default();
        assert_eq!(classify(&config, dec!(2.0), dec!(-50)), Trigger::AboveCeiling);
        assert_eq!(classify(&config, dec!(0.5), dec!(-50)), Trigger::Act);
        assert_eq!(classify(&config, dec!(0.5), dec!(-1)), Trigger::Healthy);
        assert_eq!(classify(&config, dec!(1), dec!(-10)), Trigger::Act);
        assert_eq!(classify(&config, dec!(1), dec!(-6)), Trigger::Warn);
        assert_eq!(classify(&config, dec!(1), dec!(-4)), Trigger::Healthy);
    }

    #[test]
    fn fourth_action_is_super_when_enabled() {
        let enabled = MarketConfig {
            super_maintain_short: true,
            ..MarketConfig::default()
        };
        let stage = select_stage(&counter_with(3, 0), &enabled, Side::Short, Utc::now()).unwrap();
        assert_eq!(stage.kind, MaintenanceKind::Super);
        assert_eq!(stage.buy_margin, dec!(100));

        let disabled = MarketConfig::default();
        assert_eq!(
            select_stage(&counter_with(3, 0), &disabled, Side::Short, Utc::now()),
            Err(Gate::DailyCap { cap: 3 })
        );
        assert_eq!(
            select_stage(&counter_with(5, 2), &enabled, Side::Short, Utc::now()),
            Err(Gate::DailyCap { cap: 5 })
        );
        assert_eq!(
            select_stage(&counter_with(4, 2), &enabled, Side::Short, Utc::now()),
            Err(Gate::DailyCap { cap: 2 })
        );
    }

    #[test]
    fn cooldown_blocks_regardless_of_loss() {
        let mut counter = counter_with(1, 0);
        let now = Utc::now();
        counter.last_maintenance_time = Some(now - Duration::minutes(10));
        assert!(matches!(
            select_stage(&counter, &MarketConfig::default(), Side::Short, now),
            Err(Gate::Cooldown { remaining_secs }) if remaining_secs > 0
        ));
        counter.last_maintenance_time = Some(now - Duration::minutes(16));
        assert!(select_stage(&counter, &MarketConfig::default(), Side::Short, now).is_ok());
    }

    #[test]
    fn correction_band() {
        let first = maintenance_stage(0).unwrap();
        assert_eq!(correction(first, dec!(10.4)), None);
        assert_eq!(correction(first, dec!(11)), Some(dec!(-10)));
        let third = maintenance_stage(2).unwrap();
        assert_eq!(correction(third, dec!(19.1)), None);
        assert_eq!(correction(third, dec!(18)), Some(dec!(20)));
    }

    #[tokio::test]
    async fn acts_buys_shrinks_and_counts() {
        let h = Harness::new();
        let pos = small_short(&h, "ARB-USDT-SWAP").await;
        let engine = MarginMaintenanceEngine::new(h.ctx());

        // +1% against a 10x short: -10%
        let record = engine
            .evaluate(&MarketConfig::default(), &pos, dec!(101), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Executed, "{:?}", record.steps);
        assert_eq!(h.size_of("ARB-USDT-SWAP", Side::Short).await, Some(dec!(100)));
        assert_eq!(h.orders.exchange_size("ARB-USDT-SWAP", Side::Short), dec!(100));

        let counter = h
            .store
            .get_maintenance_counter("ARB-USDT-SWAP", Side::Short)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.count, 1);
        assert!(counter.last_maintenance_time.is_some());

        // Immediately again: cooldown
        let again = engine
            .evaluate(&MarketConfig::default(), &pos, dec!(101), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(again.outcome, Outcome::Refused);
        assert_eq!(again.reason, "cooldown");
    }

    #[tokio::test]
    async fn spent_daily_cap_is_refused() {
        let h = Harness::new();
        let pos = small_short(&h, "ARB-USDT-SWAP").await;
        let mut counter = counter_with(3, 0);
        counter.instrument = "ARB-USDT-SWAP".to_string();
        counter.last_maintenance_time = Some(Utc::now() - Duration::hours(1));
        h.store.set_maintenance_counter(&counter).await.unwrap();

        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(101), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Refused);
        assert_eq!(record.reason, "daily_cap_reached");
        assert_eq!(h.size_of("ARB-USDT-SWAP", Side::Short).await, Some(dec!(12)));
    }

    #[tokio::test]
    async fn wrong_leverage_is_reset_before_shrinking() {
        let h = Harness::new();
        // 6 notional at 5x: margin 1.2, on the exchange at 5x too
        let pos = h
            .open("ARB-USDT-SWAP", Side::Short, dec!(6), dec!(100), dec!(5), GranularityTier::Small)
            .await;
        assert_eq!(h.orders.get_leverage("ARB-USDT-SWAP", Side::Short).await.unwrap(), dec!(5));

        // +2% against a 5x short: -10%
        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(102), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Executed, "{:?}", record.steps);
        assert_eq!(h.orders.get_leverage("ARB-USDT-SWAP", Side::Short).await.unwrap(), dec!(10));

        let stored = h.store.get_position("ARB-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        assert_eq!(stored.leverage, dec!(10));
        assert_eq!(stored.size, dec!(100));
        assert_eq!(stored.margin(), dec!(10));
    }

    #[tokio::test]
    async fn drifted_exchange_gets_corrected() {
        let h = Harness::new();
        let pos = small_short(&h, "ARB-USDT-SWAP").await;
        // Exchange holds 8 more than the store knows about
        h.orders.seed_position(ExchangePosition {
            instrument: "ARB-USDT-SWAP".to_string(),
            side: Side::Short,
            size: dec!(20),
            margin_mode: MarginMode::Cross,
            leverage: dec!(10),
        });

        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(101), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Executed);
        assert!(record.steps.iter().any(|s| s.starts_with("correction 1")));
        assert_eq!(h.orders.exchange_size("ARB-USDT-SWAP", Side::Short), dec!(100));
    }

    #[tokio::test]
    async fn failed_buy_releases_the_counter() {
        let h = Harness::new();
        let pos = small_short(&h, "ARB-USDT-SWAP").await;
        h.orders.reject_next(1);

        let result = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(101), ExecutionMode::Live)
            .await;
        assert!(result.is_err());
        let counter = h
            .store
            .get_maintenance_counter("ARB-USDT-SWAP", Side::Short)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.count, 0);
        assert!(counter.last_maintenance_time.is_none());
    }

    #[tokio::test]
    async fn residual_below_margin_floor_is_topped_up() {
        let h = Harness::new();
        // Anchor leftover after the post-add close: 5.5 notional at 10x
        let pos = h
            .open("WIF-USDT-SWAP", Side::Short, dec!(5.5), dec!(100), dec!(10), GranularityTier::Small)
            .await;
        assert_eq!(pos.margin(), dec!(0.55));

        // +1.5% against the short: -15%
        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(101.5), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Executed, "{:?}", record.steps);
        assert!(record.steps.iter().any(|s| s.starts_with("margin below floor")));
        let buys: Vec<_> = h
            .orders
            .filled_orders()
            .into_iter()
            .filter(|o| o.tag == "maintenance_normal")
            .collect();
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0].size, dec!(200));
        assert_eq!(h.size_of("WIF-USDT-SWAP", Side::Short).await, Some(dec!(100)));
    }

    #[tokio::test]
    async fn soft_band_only_warns() {
        let h = Harness::new();
        let pos = small_short(&h, "ARB-USDT-SWAP").await;
        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&MarketConfig::default(), &pos, dec!(100.7), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Warned);
        assert_eq!(h.size_of("ARB-USDT-SWAP", Side::Short).await, Some(dec!(12)));
    }

    #[tokio::test]
    async fn count_three_uses_super_parameters() {
        let h = Harness::with_config(MarketConfig {
            super_maintain_short: true,
            ..MarketConfig::default()
        });
        let pos = small_short(&h, "BTC-USDT-SWAP").await;
        let mut counter = counter_with(3, 0);
        counter.last_maintenance_time = Some(Utc::now() - Duration::hours(1));
        h.store.set_maintenance_counter(&counter).await.unwrap();

        let config = MarketConfig {
            super_maintain_short: true,
            ..MarketConfig::default()
        };
        let record = MarginMaintenanceEngine::new(h.ctx())
            .evaluate(&config, &pos, dec!(101), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Executed);
        assert_eq!(record.reason, "super");
        // super target: 10 margin x 10
        assert_eq!(h.size_of("BTC-USDT-SWAP", Side::Short).await, Some(dec!(100)));
        let stored = h
            .store
            .get_maintenance_counter("BTC-USDT-SWAP", Side::Short)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.count, 4);
        assert_eq!(stored.super_count, 1);
    }
}
