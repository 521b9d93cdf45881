//! Rule tables.
//!
//! Every ladder and fixed parameter the policies act on lives here as plain
//! data, keyed by side, regime flag, or granularity tier, so tests can walk
//! each table exhaustively.

use anchor_risk_core::{GranularityTier, ProtectOrderKind, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

// =============================================================================
// Shared floors
// =============================================================================

/// Positions at or below this margin (USDT) are ignored by the profit ladder
/// and the hedge rule.
pub const MIN_MARGIN: Decimal = dec!(1);

// =============================================================================
// Profit tiers (percent of remaining size)
// =============================================================================

/// What a profit tier does once its threshold is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TierEffect {
    /// Close this percent of the size remaining when the tier fires.
    ClosePercentOfRemaining(Decimal),
    /// Close down to this residual margin (USDT), whatever the size.
    CloseToResidualMargin(Decimal),
    CloseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfitTier {
    /// Leveraged profit rate, percent.
    pub threshold: Decimal,
    pub effect: TierEffect,
}

const fn tier(threshold: Decimal, effect: TierEffect) -> ProfitTier {
    ProfitTier { threshold, effect }
}

const SHORT_WITH_LONGS: [ProfitTier; 3] = [
    tier(dec!(25), TierEffect::ClosePercentOfRemaining(dec!(30))),
    tier(dec!(35), TierEffect::ClosePercentOfRemaining(dec!(50))),
    tier(dec!(50), TierEffect::ClosePercentOfRemaining(dec!(50))),
];

// Starts at 10%: a 15% short must fire one tier and keep 70% of its size.
// The last tier keeps 2 USDT of margin, which is 2 x leverage notional.
const SHORT_ONLY: [ProfitTier; 5] = [
    tier(dec!(10), TierEffect::ClosePercentOfRemaining(dec!(30))),
    tier(dec!(20), TierEffect::ClosePercentOfRemaining(dec!(40))),
    tier(dec!(30), TierEffect::ClosePercentOfRemaining(dec!(50))),
    tier(dec!(40), TierEffect::ClosePercentOfRemaining(dec!(75))),
    tier(dec!(50), TierEffect::CloseToResidualMargin(dec!(2))),
];

const LONG_WITH_LONGS: [ProfitTier; 4] = [
    tier(dec!(10), TierEffect::ClosePercentOfRemaining(dec!(20))),
    tier(dec!(20), TierEffect::ClosePercentOfRemaining(dec!(50))),
    tier(dec!(30), TierEffect::ClosePercentOfRemaining(dec!(75))),
    tier(dec!(40), TierEffect::CloseAll),
];

const LONG_RESTRICTED: [ProfitTier; 5] = [
    tier(dec!(5), TierEffect::ClosePercentOfRemaining(dec!(25))),
    tier(dec!(10), TierEffect::ClosePercentOfRemaining(dec!(50))),
    tier(dec!(20), TierEffect::ClosePercentOfRemaining(dec!(75))),
    tier(dec!(30), TierEffect::ClosePercentOfRemaining(dec!(75))),
    tier(dec!(40), TierEffect::CloseAll),
];

/// Ladder for `side` under the `allow_long` regime flag, ascending by threshold.
#[must_use]
pub const fn profit_ladder(side: Side, allow_long: bool) -> &'static [ProfitTier] {
    match (side, allow_long) {
        (Side::Short, true) => &SHORT_WITH_LONGS,
        (Side::Short, false) => &SHORT_ONLY,
        (Side::Long, true) => &LONG_WITH_LONGS,
        (Side::Long, false) => &LONG_RESTRICTED,
    }
}

// =============================================================================
// Loss stop
// =============================================================================

/// Hard stop threshold (leveraged profit rate, percent).
#[must_use]
pub const fn loss_stop_threshold(side: Side) -> Decimal {
    match side {
        Side::Short => dec!(-30),
        Side::Long => dec!(-20),
    }
}

// =============================================================================
// DCA ladders (percent of available capital)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddStage {
    /// Leveraged profit rate at or below which the stage fires.
    pub trigger_loss_rate: Decimal,
    /// Stage size as percent of available capital.
    pub percent_of_budget: Decimal,
}

const fn stage(trigger_loss_rate: Decimal, percent_of_budget: Decimal) -> AddStage {
    AddStage {
        trigger_loss_rate,
        percent_of_budget,
    }
}

const SMALL_STAGES: [AddStage; 3] = [
    stage(dec!(-1), dec!(1)),
    stage(dec!(-2), dec!(1)),
    stage(dec!(-3), dec!(1)),
];

const MEDIUM_STAGES: [AddStage; 2] = [stage(dec!(-7), dec!(3.5)), stage(dec!(-9), dec!(3.5))];

const LARGE_STAGES: [AddStage; 3] = [
    stage(dec!(-15), dec!(7)),
    stage(dec!(-18), dec!(7)),
    stage(dec!(-21), dec!(7)),
];

#[must_use]
pub const fn add_ladder(tier: GranularityTier) -> &'static [AddStage] {
    match tier {
        GranularityTier::Small => &SMALL_STAGES,
        GranularityTier::Medium => &MEDIUM_STAGES,
        GranularityTier::Large => &LARGE_STAGES,
    }
}

// =============================================================================
// Anchors
// =============================================================================

/// Notional of a freshly opened anchor (USDT).
pub const ANCHOR_NOTIONAL: Decimal = dec!(10);
pub const ANCHOR_LEVERAGE: Decimal = dec!(10);
pub const ANCHOR_SIDE: Side = Side::Short;
/// Price must be within this percent of the nearer resistance line.
pub const ANCHOR_MAX_DISTANCE_PERCENT: Decimal = dec!(2);
/// Minimum 7-day positional percentile.
pub const ANCHOR_MIN_PCT_7D: Decimal = dec!(90);
/// Instrument prefixes never anchored.
pub const ANCHOR_EXCLUDED: [&str; 4] = ["BTC", "ETH", "LTC", "ETC"];

/// The single anchor add fires at or below this leveraged profit rate.
pub const ANCHOR_ADD_TRIGGER: Decimal = dec!(-10);
/// Anchor add size as a multiple of the opening notional.
pub const ANCHOR_ADD_MULTIPLIER: Decimal = dec!(10);
/// Percent of the post-add total closed straight after the anchor add.
pub const ANCHOR_POST_ADD_CLOSE_PERCENT: Decimal = dec!(95);
/// Margin (USDT) the post-add close always leaves in place.
pub const ANCHOR_MIN_RESIDUAL_MARGIN: Decimal = dec!(0.5);
/// Margin (USDT) the hedge rule leaves on a losing anchor.
pub const ANCHOR_HEDGE_FLOOR_MARGIN: Decimal = dec!(1);

#[must_use]
pub fn is_excluded_instrument(instrument: &str) -> bool {
    let base = instrument.split(['-', '/', '_']).next().unwrap_or(instrument);
    ANCHOR_EXCLUDED.iter().any(|coin| base.eq_ignore_ascii_case(coin))
}

// =============================================================================
// Protect orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtectRule {
    pub kind: ProtectOrderKind,
    pub offset_percent: Decimal,
    pub leverage: Decimal,
    pub close_percent: Decimal,
}

/// The two rules spawned for every anchor.
pub const PROTECT_RULES: [ProtectRule; 2] = [
    ProtectRule {
        kind: ProtectOrderKind::Protect1,
        offset_percent: dec!(4),
        leverage: dec!(10),
        close_percent: dec!(95),
    },
    ProtectRule {
        kind: ProtectOrderKind::Protect2,
        offset_percent: dec!(10),
        leverage: dec!(20),
        close_percent: dec!(95),
    },
];

impl ProtectRule {
    #[must_use]
    pub fn trigger_price(&self, anchor_price: Decimal) -> Decimal {
        anchor_price * (Decimal::ONE + self.offset_percent / dec!(100))
    }
}

// =============================================================================
// Margin maintenance
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MaintenanceKind {
    Normal,
    Super,
}

impl std::fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Super => write!(f, "super"),
        }
    }
}

/// Parameters for one maintenance action, selected by how many actions the
/// pair already had today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaintenanceStage {
    pub kind: MaintenanceKind,
    /// Fixed buy, as margin (USDT). The order notional is this times leverage.
    pub buy_margin: Decimal,
    /// Margin the position is shrunk back to after the buy.
    pub target_margin: Decimal,
    /// Accepted distance from `target_margin` when verifying.
    pub tolerance: Decimal,
}

const fn maintenance(
    kind: MaintenanceKind,
    buy_margin: Decimal,
    target_margin: Decimal,
    tolerance: Decimal,
) -> MaintenanceStage {
    MaintenanceStage {
        kind,
        buy_margin,
        target_margin,
        tolerance,
    }
}

const MAINTENANCE_STAGES: [MaintenanceStage; 5] = [
    maintenance(MaintenanceKind::Normal, dec!(20), dec!(10), dec!(0.5)),
    maintenance(MaintenanceKind::Normal, dec!(20), dec!(10), dec!(0.5)),
    maintenance(MaintenanceKind::Normal, dec!(50), dec!(20), dec!(1)),
    maintenance(MaintenanceKind::Super, dec!(100), dec!(10), dec!(0.5)),
    maintenance(MaintenanceKind::Super, dec!(100), dec!(10), dec!(0.5)),
];

pub const NORMAL_DAILY_CAP: u32 = 3;
pub const SUPER_DAILY_CAP: u32 = 2;
pub const MAINTENANCE_COOLDOWN_SECS: i64 = 15 * 60;
pub const MAINTENANCE_LEVERAGE: Decimal = dec!(10);
/// Soft warning band sits this many points above the loss threshold.
pub const MAINTENANCE_SOFT_MARGIN_POINTS: Decimal = dec!(5);
/// Corrective orders allowed when verification lands outside the band.
pub const MAINTENANCE_MAX_CORRECTIONS: u32 = 3;

/// Stage for the action that follows `count_today` earlier actions.
#[must_use]
pub fn maintenance_stage(count_today: u32) -> Option<&'static MaintenanceStage> {
    MAINTENANCE_STAGES.get(usize::try_from(count_today).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_profit_ladder_is_strictly_ascending() {
        for side in [Side::Long, Side::Short] {
            for allow_long in [true, false] {
                let ladder = profit_ladder(side, allow_long);
                assert!(!ladder.is_empty());
                for pair in ladder.windows(2) {
                    assert!(pair[0].threshold < pair[1].threshold, "{side} allow_long={allow_long}");
                }
                for t in ladder {
                    assert!(t.threshold > Decimal::ZERO);
                    if let TierEffect::ClosePercentOfRemaining(p) = t.effect {
                        assert!(p > Decimal::ZERO && p <= dec!(100));
                    }
                }
            }
        }
    }

    #[test]
    fn short_only_ladder_ends_with_residual_close() {
        let ladder = profit_ladder(Side::Short, false);
        assert_eq!(ladder.len(), 5);
        assert_eq!(ladder[0].threshold, dec!(10));
        assert_eq!(ladder[0].effect, TierEffect::ClosePercentOfRemaining(dec!(30)));
        assert!(ladder.iter().all(|t| t.threshold >= dec!(10)));
        assert_eq!(ladder[4].effect, TierEffect::CloseToResidualMargin(dec!(2)));
    }

    #[test]
    fn short_with_longs_ladder() {
        let thresholds: Vec<Decimal> = profit_ladder(Side::Short, true).iter().map(|t| t.threshold).collect();
        assert_eq!(thresholds, vec![dec!(25), dec!(35), dec!(50)]);
    }

    #[test]
    fn add_ladders_descend_and_match_tier_sizes() {
        let cases = [
            (GranularityTier::Small, 3, dec!(1)),
            (GranularityTier::Medium, 2, dec!(3.5)),
            (GranularityTier::Large, 3, dec!(7)),
        ];
        for (tier, len, pct) in cases {
            let ladder = add_ladder(tier);
            assert_eq!(ladder.len(), len);
            assert!(ladder.iter().all(|s| s.percent_of_budget == pct));
            for pair in ladder.windows(2) {
                assert!(pair[1].trigger_loss_rate < pair[0].trigger_loss_rate);
            }
        }
    }

    #[test]
    fn loss_stops_per_side() {
        assert_eq!(loss_stop_threshold(Side::Short), dec!(-30));
        assert_eq!(loss_stop_threshold(Side::Long), dec!(-20));
    }

    #[test]
    fn protect_trigger_prices() {
        assert_eq!(PROTECT_RULES[0].trigger_price(dec!(100)), dec!(104));
        assert_eq!(PROTECT_RULES[1].trigger_price(dec!(100)), dec!(110));
    }

    #[test]
    fn excluded_majors() {
        assert!(is_excluded_instrument("BTC-USDT-SWAP"));
        assert!(is_excluded_instrument("eth-usdt-swap"));
        assert!(is_excluded_instrument("ETC"));
        assert!(!is_excluded_instrument("ETHFI-USDT-SWAP"));
        assert!(!is_excluded_instrument("DOGE-USDT-SWAP"));
    }

    #[test]
    fn maintenance_escalates_to_super_after_three() {
        let kinds: Vec<MaintenanceKind> = (0..5).filter_map(maintenance_stage).map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MaintenanceKind::Normal,
                MaintenanceKind::Normal,
                MaintenanceKind::Normal,
                MaintenanceKind::Super,
                MaintenanceKind::Super,
            ]
        );
        assert!(maintenance_stage(5).is_none());
        // Verification band widens after two actions
        assert_eq!(maintenance_stage(2).map(|s| s.target_margin), Some(dec!(20)));
        assert_eq!(maintenance_stage(2).map(|s| s.tolerance), Some(dec!(1)));
        // Super buys more and targets less than the last normal stage
        let last_normal = maintenance_stage(2).unwrap();
        let first_super = maintenance_stage(3).unwrap();
        assert!(first_super.buy_margin > last_normal.buy_margin);
        assert!(first_super.target_margin < last_normal.target_margin);
    }
}
