//! Types shared by the engine's policies.

use anchor_risk_core::{ProtectOrderKind, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Action a policy decided to take on a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopAction {
    /// Close the entire position.
    CloseAll { reason: CloseReason },
    /// Close part of the position (notional USDT).
    ClosePartial { size: Decimal, reason: CloseReason },
}

impl StopAction {
    /// Notional this action closes from a position of `position_size`.
    #[must_use]
    pub fn close_size(&self, position_size: Decimal) -> Decimal {
        match self {
            Self::CloseAll { .. } => position_size,
            Self::ClosePartial { size, .. } => (*size).min(position_size),
        }
    }

    #[must_use]
    pub const fn reason(&self) -> &CloseReason {
        match self {
            Self::CloseAll { reason } | Self::ClosePartial { reason, .. } => reason,
        }
    }
}

/// Why a position was reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CloseReason {
    LossStop,
    ProfitTier { threshold: Decimal },
    Hedge { profitable_side: Side },
    AnchorPostAdd,
    ProtectOrder { kind: ProtectOrderKind },
    MaintenanceShrink,
    MaintenanceCorrection,
    ReconcileExcess,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LossStop => write!(f, "loss_stop"),
            Self::ProfitTier { threshold } => write!(f, "profit_tier_{threshold}"),
            Self::Hedge { .. } => write!(f, "hedge_close"),
            Self::AnchorPostAdd => write!(f, "anchor_post_add"),
            Self::ProtectOrder { kind } => write!(f, "{kind}"),
            Self::MaintenanceShrink => write!(f, "maintenance_shrink"),
            Self::MaintenanceCorrection => write!(f, "maintenance_correction"),
            Self::ReconcileExcess => write!(f, "reconcile_excess"),
        }
    }
}
