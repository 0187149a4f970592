#![cfg(test)]
//! Generated purchase sequences checked against ledger invariants.
use arbitrary::Unstructured;
use soroban_sdk::{testutils::Address as _, Address, Env, String, Vec};

use crate::bonus::{AmountTier, AmountTiered, BonusScheme, SECONDS_IN_A_DAY};
use crate::settlement::SettlementSnapshot;
use crate::test_mocks::{Sale, ONE_TO_ONE};
use crate::CrowdsaleError;

const SEEDS: u64 = 12;

fn small_amount_tiers(env: &Env) -> BonusScheme {
    let mut tiers = Vec::new(env);
    for (ceiling, percent) in [(10_000i128, 20u32), (20_000, 15), (30_000, 10)] {
        tiers.push_back(AmountTier { ceiling, percent });
    }
    BonusScheme::AmountTiered(AmountTiered { tiers })
}

fn noise(seed: u64) -> [u8; 1024] {
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
    let mut out = [0u8; 1024];
    for byte in out.iter_mut() {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        *byte = (state >> 33) as u8;
    }
    out
}

fn pick(u: &mut Unstructured, pool: &Vec<Address>) -> Address {
    let i = u.int_in_range(0..=pool.len() - 1).unwrap();
    pool.get(i).unwrap()
}

fn assert_totals_match_ledger(sale: &Sale) {
    let mut raw = 0;
    let mut amount = 0;
    let mut presale_raw = 0;
    for i in 0..sale.client.num_of_purchases() {
        let p = sale.client.get_purchase(&i).unwrap();
        if p.invalidated {
            continue;
        }
        if p.presale {
            presale_raw += p.raw_amount;
        } else {
            raw += p.raw_amount;
            amount += p.amount;
        }
    }
    let totals = sale.client.get_totals();
    assert_eq!(totals.crowdsale_raw, raw);
    assert_eq!(totals.crowdsale_amount, amount);
    assert_eq!(totals.presale_raw, presale_raw);
    assert!(raw <= sale.client.max_crowdsale_cap());
}

fn expected_tokens(sale: &Sale, snapshot: &SettlementSnapshot, who: &Address) -> i128 {
    let mut tokens = 0;
    for i in 0..sale.client.num_of_purchases() {
        let p = sale.client.get_purchase(&i).unwrap();
        if !p.invalidated && p.purchaser == *who {
            tokens += snapshot.crowdsale_tokens(p.amount);
        }
    }
    for i in 0..sale.client.num_of_loaded_early_purchases() {
        let e = sale.client.get_loaded_early_purchase(&i).unwrap();
        if e.purchaser == *who {
            tokens += snapshot.early_purchase_tokens(e.amount);
        }
    }
    tokens
}

fn run(seed: u64) {
    let data = noise(seed);
    let mut u = Unstructured::new(&data);

    let cap: i128 = u.int_in_range(5_000..=40_000).unwrap();
    let scheme: fn(&Env) -> BonusScheme = if u.arbitrary::<bool>().unwrap() {
        small_amount_tiers
    } else {
        BonusScheme::standard_time_tiers
    };
    let sale = Sale::with_config(cap, scheme);
    let mut everyone = Vec::new(&sale.env);

    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(1_000_000);
    everyone.push_back(partner.clone());
    let commission: u32 = u.int_in_range(0..=20).unwrap();
    sale.client
        .set_qualified_partner(&partner, &1_000_000, &commission);
    for _ in 0..u.int_in_range(0..=3u32).unwrap() {
        let amount: i128 = u.int_in_range(1..=5_000).unwrap();
        sale.client.purchase_as_qualified_partner(&partner, &amount);
    }

    for _ in 0..u.int_in_range(0..=4u32).unwrap() {
        let early = Address::generate(&sale.env);
        let amount: i128 = u.int_in_range(1..=3_000).unwrap();
        sale.add_early_purchase(&early, amount);
        everyone.push_back(early);
    }
    sale.ready();

    let mut buyers = Vec::new(&sale.env);
    for _ in 0..3 {
        let buyer = sale.funded(1_000_000);
        buyers.push_back(buyer.clone());
        everyone.push_back(buyer);
    }

    for _ in 0..u.int_in_range(1..=25u32).unwrap() {
        let buyer = pick(&mut u, &buyers);
        let amount: i128 = u.int_in_range(1..=8_000).unwrap();
        let wait: u64 = u.int_in_range(0..=10 * SECONDS_IN_A_DAY).unwrap();
        sale.advance(wait, 1);
        let result = sale.client.try_purchase_with_payment(&buyer, &amount);
        if result == Err(Ok(CrowdsaleError::CapExceeded)) {
            break;
        }
        let receipt = result.unwrap().unwrap();
        assert!(receipt.raw_amount <= amount);
        assert_eq!(
            receipt.refunded,
            amount * (amount - receipt.raw_amount) / amount
        );
        assert_totals_match_ledger(&sale);
    }

    if sale.client.start_date() == 0 {
        sale.client.start_crowdsale();
    }
    if !sale.client.is_ended() {
        sale.end();
    }

    for i in 0..sale.client.num_of_purchases() {
        let p = sale.client.get_purchase(&i).unwrap();
        match u.int_in_range(0..=5u8).unwrap() {
            0 => sale.client.invalidate_purchase(&i),
            1 => {
                let raw: i128 = u.int_in_range(1..=p.raw_amount).unwrap();
                let percent: u32 = u.int_in_range(0..=20).unwrap();
                let heir = pick(&mut u, &buyers);
                sale.client.amend_purchase(
                    &i,
                    &heir,
                    &(raw + raw * percent as i128 / 100),
                    &raw,
                    &sale.now(),
                    &String::from_str(&sale.env, "btc:amended"),
                    &percent,
                );
            }
            _ => {}
        }
    }
    assert_totals_match_ledger(&sale);

    loop {
        let batch: u32 = u.int_in_range(1..=4).unwrap();
        if u.arbitrary::<bool>().unwrap() {
            let who = pick(&mut u, &everyone);
            sale.client.withdraw_purchased_tokens(&who, &batch);
        }
        if sale.client.deliver_purchased_tokens(&batch).complete {
            break;
        }
    }

    let snapshot = sale.client.get_settlement().unwrap();
    let mut credited = 0;
    for who in everyone.iter() {
        let got = sale.token_ledger.credited(&who);
        assert_eq!(got, expected_tokens(&sale, &snapshot, &who));
        assert_eq!(
            got,
            sale.client.delivered_tokens_on_crowdsale(&who)
                + sale.client.delivered_tokens_on_early(&who)
        );
        assert_eq!(sale.client.withdraw_purchased_tokens(&who, &0), 0);
        credited += got;
    }
    assert!(credited <= snapshot.crowdsale_allocation + snapshot.early_allocation);
    for i in 0..sale.client.num_of_purchases() {
        let p = sale.client.get_purchase(&i).unwrap();
        assert!(p.delivered != p.invalidated);
    }
}

#[test]
fn generated_sales_keep_ledger_invariants() {
    for seed in 0..SEEDS {
        run(seed);
    }
}
