#![cfg(test)]
use soroban_sdk::{Env, Vec};

use crate::bonus::{
    with_flat_bonus, AmountTier, AmountTiered, Bonus, BonusSchedule, BonusScheme, TierContext,
    TimeTier, TimeTiered, SECONDS_IN_A_DAY,
};

const STEP: i128 = 12_000_000;

fn at(raised: i128) -> TierContext {
    TierContext { raised, elapsed: 0 }
}

fn after_days(days: u64, extra_seconds: u64) -> TierContext {
    TierContext {
        raised: 0,
        elapsed: days * SECONDS_IN_A_DAY + extra_seconds,
    }
}

#[test]
fn flat_bonus_truncates() {
    assert_eq!(with_flat_bonus(99, 5), 103);
    assert_eq!(with_flat_bonus(1, 20), 1);
    assert_eq!(with_flat_bonus(1_000, 0), 1_000);
    assert_eq!(with_flat_bonus(1_000, 30), 1_300);
}

#[test]
fn amount_tiers_inside_first_tier() {
    let env = Env::default();
    let scheme = BonusScheme::standard_amount_tiers(&env);
    assert_eq!(
        scheme.schedule().apply(1_000, &at(0)),
        Bonus { amount: 1_200, percent: 20 }
    );
}

#[test]
fn purchase_ending_on_ceiling_stays_in_tier() {
    let env = Env::default();
    let scheme = BonusScheme::standard_amount_tiers(&env);
    let bonus = scheme.schedule().apply(1_000, &at(STEP - 1_000));
    assert_eq!(bonus, Bonus { amount: 1_200, percent: 20 });

    let next = scheme.schedule().apply(1_000, &at(STEP));
    assert_eq!(next, Bonus { amount: 1_150, percent: 15 });
}

#[test]
fn purchase_spanning_three_tiers_is_priced_per_range() {
    let env = Env::default();
    let scheme = BonusScheme::standard_amount_tiers(&env);
    // 1,000 at 20 %, a full 15 % tier, 1,000 at 10 %.
    let raw = 1_000 + STEP + 1_000;
    let bonus = scheme.schedule().apply(raw, &at(STEP - 1_000));
    assert_eq!(bonus.amount, raw + 200 + STEP * 15 / 100 + 100);
    assert_eq!(bonus.percent, 20);
}

#[test]
fn each_range_is_floored_separately() {
    let env = Env::default();
    let scheme = BonusScheme::standard_amount_tiers(&env);
    // 9 units at 20 % floor to 1, 9 units at 15 % floor to 1.
    let bonus = scheme.schedule().apply(18, &at(STEP - 9));
    assert_eq!(bonus.amount, 18 + 1 + 1);
}

#[test]
fn nothing_beyond_last_tier() {
    let env = Env::default();
    let scheme = BonusScheme::standard_amount_tiers(&env);
    let tail = scheme.schedule().apply(500, &at(4 * STEP - 100));
    assert_eq!(tail.amount, 500 + 5);
    assert_eq!(tail.percent, 5);

    let beyond = scheme.schedule().apply(500, &at(4 * STEP));
    assert_eq!(beyond, Bonus { amount: 500, percent: 0 });
}

#[test]
fn standard_time_tiers_boundaries() {
    let env = Env::default();
    let scheme = BonusScheme::standard_time_tiers(&env);
    let percent = |ctx: TierContext| scheme.schedule().apply(100, &ctx).percent;

    assert_eq!(percent(after_days(0, 0)), 20);
    assert_eq!(percent(after_days(7, 0)), 20);
    assert_eq!(percent(after_days(7, 1)), 15);
    assert_eq!(percent(after_days(21, 0)), 15);
    assert_eq!(percent(after_days(21, 1)), 10);
    assert_eq!(percent(after_days(35, 0)), 10);
    assert_eq!(percent(after_days(42, 0)), 5);
    assert_eq!(percent(after_days(42, 1)), 0);
}

#[test]
fn extended_time_tiers_tail() {
    let env = Env::default();
    let scheme = BonusScheme::extended_time_tiers(&env);
    let percent = |ctx: TierContext| scheme.schedule().apply(100, &ctx).percent;

    assert_eq!(percent(after_days(42, 1)), 4);
    assert_eq!(percent(after_days(56, 0)), 3);
    assert_eq!(percent(after_days(63, 0)), 2);
    assert_eq!(percent(after_days(70, 0)), 1);
    assert_eq!(percent(after_days(70, 1)), 0);
}

#[test]
fn time_tiers_ignore_amount_raised() {
    let env = Env::default();
    let scheme = BonusScheme::standard_time_tiers(&env);
    let ctx = TierContext {
        raised: 10 * STEP,
        elapsed: 0,
    };
    assert_eq!(
        scheme.schedule().apply(1_000, &ctx),
        Bonus { amount: 1_200, percent: 20 }
    );
}

#[test]
fn presets_are_well_formed() {
    let env = Env::default();
    assert!(BonusScheme::standard_amount_tiers(&env).schedule().is_well_formed());
    assert!(BonusScheme::standard_time_tiers(&env).schedule().is_well_formed());
    assert!(BonusScheme::extended_time_tiers(&env).schedule().is_well_formed());
}

#[test]
fn malformed_tiers_are_detected() {
    let env = Env::default();

    let mut repeated = Vec::new(&env);
    repeated.push_back(AmountTier { ceiling: 100, percent: 10 });
    repeated.push_back(AmountTier { ceiling: 100, percent: 5 });
    assert!(!AmountTiered { tiers: repeated }.is_well_formed());

    let mut too_generous = Vec::new(&env);
    too_generous.push_back(TimeTier { ends_after: 10, percent: 101 });
    assert!(!TimeTiered { tiers: too_generous }.is_well_formed());

    let mut unordered = Vec::new(&env);
    unordered.push_back(TimeTier { ends_after: 10, percent: 10 });
    unordered.push_back(TimeTier { ends_after: 5, percent: 5 });
    assert!(!TimeTiered { tiers: unordered }.is_well_formed());

    assert!(AmountTiered { tiers: Vec::new(&env) }.is_well_formed());
}

#[test]
fn empty_schedule_gives_no_bonus() {
    let env = Env::default();
    let none = AmountTiered { tiers: Vec::new(&env) };
    assert_eq!(none.apply(1_000, &at(0)), Bonus { amount: 1_000, percent: 0 });
    let never = TimeTiered { tiers: Vec::new(&env) };
    assert_eq!(never.percent_at(0), 0);
}
