//! Bonus tier schedules.
//!
//! A sale runs exactly one [`BonusScheme`], chosen at initialization. Both
//! strategies implement [`BonusSchedule`], so the purchase path resolves the
//! scheme once and never inspects which variant it got.
use soroban_sdk::{contracttype, Env, Vec};

pub const SECONDS_IN_A_DAY: u64 = 86_400;

const PERCENT_DENOMINATOR: i128 = 100;

/// Upper bound (inclusive) of an amount tier, in settlement-currency units of
/// cumulative crowdsale raw amount.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AmountTier {
    pub ceiling: i128,
    pub percent: u32,
}

/// Upper bound (inclusive) of a time tier, in seconds elapsed since the sale
/// started.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeTier {
    pub ends_after: u64,
    pub percent: u32,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct AmountTiered {
    pub tiers: Vec<AmountTier>,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct TimeTiered {
    pub tiers: Vec<TimeTier>,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub enum BonusScheme {
    AmountTiered(AmountTiered),
    TimeTiered(TimeTiered),
}

/// Sale progress a schedule may look at when pricing a purchase.
#[derive(Clone, Copy, Debug, Default)]
pub struct TierContext {
    /// Crowdsale raw amount recorded before this purchase.
    pub raised: i128,
    /// Seconds since the sale started.
    pub elapsed: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Bonus {
    /// Raw amount plus bonus.
    pub amount: i128,
    pub percent: u32,
}

pub trait BonusSchedule {
    fn apply(&self, raw: i128, ctx: &TierContext) -> Bonus;

    /// Boundaries strictly increasing, percents within 0..=100.
    fn is_well_formed(&self) -> bool;
}

/// `raw + floor(raw * percent / 100)`.
pub fn with_flat_bonus(raw: i128, percent: u32) -> i128 {
    raw + raw * percent as i128 / PERCENT_DENOMINATOR
}

impl BonusSchedule for AmountTiered {
    fn apply(&self, raw: i128, ctx: &TierContext) -> Bonus {
        let start = ctx.raised;
        let end = start + raw;
        let mut lower: i128 = 0;
        let mut extra: i128 = 0;
        let mut percent: Option<u32> = None;

        // Each tier only prices the units that fall inside its own range.
        for tier in self.tiers.iter() {
            let from = core::cmp::max(start, lower);
            let to = core::cmp::min(end, tier.ceiling);
            if to > from {
                if percent.is_none() {
                    percent = Some(tier.percent);
                }
                extra += (to - from) * tier.percent as i128 / PERCENT_DENOMINATOR;
            }
            lower = tier.ceiling;
            if lower >= end {
                break;
            }
        }

        Bonus {
            amount: raw + extra,
            percent: percent.unwrap_or(0),
        }
    }

    fn is_well_formed(&self) -> bool {
        let mut previous: i128 = 0;
        for tier in self.tiers.iter() {
            if tier.ceiling <= previous || tier.percent > 100 {
                return false;
            }
            previous = tier.ceiling;
        }
        true
    }
}

impl TimeTiered {
    pub fn percent_at(&self, elapsed: u64) -> u32 {
        for tier in self.tiers.iter() {
            if elapsed <= tier.ends_after {
                return tier.percent;
            }
        }
        0
    }
}

impl BonusSchedule for TimeTiered {
    fn apply(&self, raw: i128, ctx: &TierContext) -> Bonus {
        let percent = self.percent_at(ctx.elapsed);
        Bonus {
            amount: with_flat_bonus(raw, percent),
            percent,
        }
    }

    fn is_well_formed(&self) -> bool {
        let mut previous: Option<u64> = None;
        for tier in self.tiers.iter() {
            if tier.percent > 100 {
                return false;
            }
            if let Some(p) = previous {
                if tier.ends_after <= p {
                    return false;
                }
            }
            previous = Some(tier.ends_after);
        }
        true
    }
}

impl BonusScheme {
    pub fn schedule(&self) -> &dyn BonusSchedule {
        match self {
            BonusScheme::AmountTiered(s) => s,
            BonusScheme::TimeTiered(s) => s,
        }
    }

    /// 20/15/10/5 % over four 12,000,000-unit steps, nothing beyond.
    pub fn standard_amount_tiers(env: &Env) -> Self {
        let step: i128 = 12_000_000;
        let mut tiers = Vec::new(env);
        for (i, percent) in [20u32, 15, 10, 5].iter().enumerate() {
            tiers.push_back(AmountTier {
                ceiling: step * (i as i128 + 1),
                percent: *percent,
            });
        }
        BonusScheme::AmountTiered(AmountTiered { tiers })
    }

    /// 20 % through day 7, 15 % through day 21, 10 % through day 35,
    /// 5 % through day 42.
    pub fn standard_time_tiers(env: &Env) -> Self {
        BonusScheme::TimeTiered(TimeTiered {
            tiers: Self::time_tiers(env, &[(7, 20), (21, 15), (35, 10), (42, 5)]),
        })
    }

    /// Standard time tiers followed by a weekly 4/3/2/1 % tail.
    pub fn extended_time_tiers(env: &Env) -> Self {
        BonusScheme::TimeTiered(TimeTiered {
            tiers: Self::time_tiers(
                env,
                &[
                    (7, 20),
                    (21, 15),
                    (35, 10),
                    (42, 5),
                    (49, 4),
                    (56, 3),
                    (63, 2),
                    (70, 1),
                ],
            ),
        })
    }

    fn time_tiers(env: &Env, days: &[(u64, u32)]) -> Vec<TimeTier> {
        let mut tiers = Vec::new(env);
        for (day, percent) in days {
            tiers.push_back(TimeTier {
                ends_after: day * SECONDS_IN_A_DAY,
                percent: *percent,
            });
        }
        tiers
    }
}
