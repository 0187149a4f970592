//! Conversion of recorded purchase value into token units.
use soroban_sdk::contracttype;

use crate::SaleTotals;

/// Denominators frozen by the first delivery after the sale ends. Every
/// ledger entry delivered afterwards is priced against the same snapshot.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SettlementSnapshot {
    /// Early purchases, presale and crowdsale purchases, all with bonus.
    pub total_raised: i128,
    /// Early purchases with bonus.
    pub total_early: i128,
    pub crowdsale_allocation: i128,
    pub early_allocation: i128,
}

impl SettlementSnapshot {
    pub fn freeze(totals: &SaleTotals, crowdsale_allocation: i128, early_allocation: i128) -> Self {
        SettlementSnapshot {
            total_raised: totals.total_raised(),
            total_early: totals.early_amount,
            crowdsale_allocation,
            early_allocation,
        }
    }

    /// Share of the crowdsale allocation earned by `amount` of bonused value.
    pub fn crowdsale_tokens(&self, amount: i128) -> i128 {
        if self.total_raised <= 0 || amount <= 0 {
            return 0;
        }
        self.crowdsale_allocation * amount / self.total_raised
    }

    /// Early purchasers take a pro-rata cut of the early allocation on top of
    /// their crowdsale-allocation share.
    pub fn early_purchase_tokens(&self, amount: i128) -> i128 {
        if amount <= 0 {
            return 0;
        }
        let early = if self.total_early > 0 {
            self.early_allocation * amount / self.total_early
        } else {
            0
        };
        early + self.crowdsale_tokens(amount)
    }
}
