//! Polling loops: one independent tokio task per component.
//!
//! Each loop ticks on its own interval and runs one full cycle per tick. The
//! store is the only state the loops share. A failed cycle is logged and the
//! loop waits for its next tick.

use std::str::FromStr;
use std::time::Duration;

use anchor_risk_core::{DecisionRecord, EngineConfig, EngineResult, ExecutionMode, Outcome};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::anchor_lifecycle::AnchorLifecycleManager;
use crate::anchor_trigger::AnchorTriggerEvaluator;
use crate::context::EngineContext;
use crate::hedge_close::HedgeCloseEngine;
use crate::maintenance::MarginMaintenanceEngine;
use crate::position_cycle::PositionCycle;
use crate::protect_orders::AnchorProtectOrderManager;
use crate::reconciler::PositionReconciler;

/// One component driven by a polling loop.
#[async_trait]
pub trait PolicyLoop: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>>;
}

macro_rules! policy_loop {
    ($ty:ty, $name:literal) => {
        #[async_trait]
        impl PolicyLoop for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
                <$ty>::run_cycle(self, mode).await
            }
        }
    };
}

policy_loop!(AnchorTriggerEvaluator, "anchor_trigger");
policy_loop!(AnchorLifecycleManager, "anchor_marks");
policy_loop!(PositionCycle, "position_cycle");
policy_loop!(HedgeCloseEngine, "hedge_close");
policy_loop!(MarginMaintenanceEngine, "maintenance");
policy_loop!(AnchorProtectOrderManager, "protect_orders");
policy_loop!(PositionReconciler, "reconciler");

/// Selectable components, in the order loops are started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    AnchorTrigger,
    AnchorMarks,
    PositionCycle,
    HedgeClose,
    Maintenance,
    ProtectOrders,
    Reconciler,
}

impl Component {
    pub const ALL: [Self; 7] = [
        Self::AnchorTrigger,
        Self::AnchorMarks,
        Self::PositionCycle,
        Self::HedgeClose,
        Self::Maintenance,
        Self::ProtectOrders,
        Self::Reconciler,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnchorTrigger => "anchor_trigger",
            Self::AnchorMarks => "anchor_marks",
            Self::PositionCycle => "position_cycle",
            Self::HedgeClose => "hedge_close",
            Self::Maintenance => "maintenance",
            Self::ProtectOrders => "protect_orders",
            Self::Reconciler => "reconciler",
        }
    }

    /// Builds the component against `ctx`.
    #[must_use]
    pub fn build(self, ctx: EngineContext, config: &EngineConfig) -> Box<dyn PolicyLoop> {
        match self {
            Self::AnchorTrigger => Box::new(AnchorTriggerEvaluator::new(
                ctx,
                config.anchor.watchlist.clone(),
                config.anchor.dedup_window_secs,
            )),
            Self::AnchorMarks => Box::new(AnchorLifecycleManager::new(ctx)),
            Self::PositionCycle => Box::new(PositionCycle::new(ctx)),
            Self::HedgeClose => Box::new(HedgeCloseEngine::new(ctx)),
            Self::Maintenance => Box::new(MarginMaintenanceEngine::new(ctx)),
            Self::ProtectOrders => Box::new(AnchorProtectOrderManager::new(ctx)),
            Self::Reconciler => Box::new(PositionReconciler::new(ctx, config.reconciler.tolerance)),
        }
    }

    #[must_use]
    pub const fn interval(self, config: &EngineConfig) -> Duration {
        let i = &config.intervals;
        let secs = match self {
            Self::AnchorTrigger => i.anchor_trigger_secs,
            Self::AnchorMarks => i.anchor_marks_secs,
            Self::PositionCycle => i.position_cycle_secs,
            Self::HedgeClose => i.hedge_close_secs,
            Self::Maintenance => i.maintenance_secs,
            Self::ProtectOrders => i.protect_orders_secs,
            Self::Reconciler => i.reconciler_secs,
        };
        Duration::from_secs(if secs == 0 { 1 } else { secs })
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown component '{s}', expected one of: {}", names.join(", "))
            })
    }
}

/// Runs one cycle of `component` and returns its decisions.
///
/// # Errors
///
/// Returns the cycle error, e.g. when the market config is unavailable.
pub async fn run_once(
    component: Component,
    ctx: EngineContext,
    config: &EngineConfig,
    mode: ExecutionMode,
) -> EngineResult<Vec<DecisionRecord>> {
    component.build(ctx, config).run_cycle(mode).await
}

fn summarize(name: &str, records: &[DecisionRecord]) {
    let acted = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Executed | Outcome::Simulated))
        .count();
    let failed = records.iter().filter(|r| r.outcome == Outcome::Failed).count();
    if acted > 0 || failed > 0 {
        info!(component = name, evaluated = records.len(), acted, failed, "Cycle complete");
    } else {
        debug!(component = name, evaluated = records.len(), "Cycle complete");
    }
}

async fn drive(policy: Box<dyn PolicyLoop>, every: Duration, mode: ExecutionMode, mut shutdown: watch::Receiver<bool>) {
    let name = policy.name();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(component = name, every_secs = every.as_secs(), %mode, "Loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match policy.run_cycle(mode).await {
            Ok(records) => summarize(name, &records),
            Err(e) => error!(component = name, error = %e, "Cycle skipped"),
        }
    }
    info!(component = name, "Loop stopped");
}

/// Starts every component on its interval and waits until `shutdown` flips
/// to true.
///
/// # Errors
///
/// Returns an error if a loop task panicked.
pub async fn run(ctx: EngineContext, config: &EngineConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let mode = config.mode;
    info!(
        %mode,
        watchlist = config.anchor.watchlist.len(),
        tolerance = %config.reconciler.tolerance,
        "Anchor risk engine started"
    );

    let mut tasks = JoinSet::new();
    for component in Component::ALL {
        let policy = component.build(ctx.clone(), config);
        tasks.spawn(drive(policy, component.interval(config), mode, shutdown.clone()));
    }

    while let Some(joined) = tasks.join_next().await {
        joined?;
    }
    info!("Anchor risk engine stopped");
    Ok(())
}
