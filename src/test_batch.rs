#![cfg(test)]
use soroban_sdk::{testutils::Address as _, Address, String, Vec};

use crate::bonus::BonusScheme;
use crate::test_mocks::{Sale, ONE_TO_ONE};
use crate::{
    CrowdsaleError, DEFAULT_CROWDSALE_TOKEN_ALLOCATION, DEFAULT_EARLY_PURCHASE_TOKEN_ALLOCATION,
    MAX_BATCH_ENTRIES,
};

/// Five early entries over three purchasers; entry 1 invalidated and
/// entry 3 amended in the source before any loading.
fn sale_with_early_entries() -> (Sale, Vec<Address>) {
    let sale = Sale::new();
    let mut purchasers = Vec::new(&sale.env);
    for _ in 0..3 {
        purchasers.push_back(Address::generate(&sale.env));
    }
    let owners = [0u32, 1, 0, 2, 1];
    for (i, owner) in owners.iter().enumerate() {
        let purchaser = purchasers.get(*owner).unwrap();
        sale.add_early_purchase(&purchaser, 100 * (i as i128 + 1));
    }
    sale.registry.close_early_purchase();
    sale.registry.invalidate_early_purchase(&1);
    let amended_to = purchasers.get(2).unwrap();
    sale.registry
        .amend_early_purchase(&3, &amended_to, &450, &sale.now());
    (sale, purchasers)
}

fn no_data(sale: &Sale) -> String {
    String::from_str(&sale.env, "")
}

// ── early purchase loader ────────────────────────────────────

#[test]
fn loading_in_small_batches_matches_single_batch() {
    let (whole, whole_purchasers) = sale_with_early_entries();
    let (split, split_purchasers) = sale_with_early_entries();

    assert_eq!(whole.client.load_early_purchases(&0), 5);
    assert_eq!(split.client.load_early_purchases(&2), 2);
    assert!(!split.client.early_purchases_loaded());
    assert_eq!(split.client.load_early_purchases(&2), 4);
    assert_eq!(split.client.load_early_purchases(&2), 5);
    assert!(split.client.early_purchases_loaded());

    assert_eq!(whole.client.get_totals(), split.client.get_totals());
    assert_eq!(whole.client.get_cursors(), split.client.get_cursors());
    assert_eq!(
        whole.client.max_crowdsale_cap(),
        split.client.max_crowdsale_cap()
    );
    assert_eq!(whole.client.num_of_loaded_early_purchases(), 4);
    assert_eq!(split.client.num_of_loaded_early_purchases(), 4);
    for i in 0..4 {
        let a = whole.client.get_loaded_early_purchase(&i).unwrap();
        let b = split.client.get_loaded_early_purchase(&i).unwrap();
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.raw_amount, b.raw_amount);
    }
    for i in 0..3 {
        assert_eq!(
            whole
                .client
                .early_purchased_amount_by(&whole_purchasers.get(i).unwrap()),
            split
                .client
                .early_purchased_amount_by(&split_purchasers.get(i).unwrap())
        );
    }
}

#[test]
fn loader_skips_invalidated_and_uses_amended_values() {
    let (sale, purchasers) = sale_with_early_entries();
    sale.client.load_early_purchases(&0);

    let totals = sale.client.get_totals();
    // 100 + 300 + 450 + 500 raw, 20 % flat bonus.
    assert_eq!(totals.early_raw, 1_350);
    assert_eq!(totals.early_amount, 1_620);
    assert_eq!(
        sale.client.max_crowdsale_cap(),
        crate::DEFAULT_MAX_CAP - 1_350
    );

    let p0 = purchasers.get(0).unwrap();
    let p1 = purchasers.get(1).unwrap();
    let p2 = purchasers.get(2).unwrap();
    assert_eq!(sale.client.early_purchased_amount_by(&p0), 480);
    assert_eq!(sale.client.early_purchased_amount_by(&p1), 600);
    assert_eq!(sale.client.early_purchased_amount_by(&p2), 540);
}

#[test]
fn changes_ahead_of_the_cursor_are_picked_up() {
    let sale = Sale::new();
    let a = Address::generate(&sale.env);
    let b = Address::generate(&sale.env);
    sale.add_early_purchase(&a, 1_000);
    sale.add_early_purchase(&b, 2_000);
    sale.add_early_purchase(&b, 3_000);
    sale.registry.close_early_purchase();

    sale.client.load_early_purchases(&1);
    sale.registry.invalidate_early_purchase(&2);
    sale.registry.amend_early_purchase(&1, &a, &500, &sale.now());
    sale.client.load_early_purchases(&0);

    assert_eq!(sale.client.get_totals().early_raw, 1_500);
    assert_eq!(sale.client.early_purchased_amount_by(&a), 1_800);
    assert_eq!(sale.client.early_purchased_amount_by(&b), 0);
}

#[test]
fn loading_after_completion_is_a_no_op() {
    let (sale, _) = sale_with_early_entries();
    sale.client.load_early_purchases(&0);
    let totals = sale.client.get_totals();

    assert_eq!(sale.client.load_early_purchases(&0), 5);
    assert_eq!(sale.client.get_totals(), totals);
    assert_eq!(sale.client.num_of_loaded_early_purchases(), 4);
}

#[test]
fn loader_budget_is_capped() {
    let sale = Sale::new();
    let purchaser = Address::generate(&sale.env);
    for _ in 0..(MAX_BATCH_ENTRIES + 10) {
        sale.add_early_purchase(&purchaser, 10);
    }
    sale.registry.close_early_purchase();
    assert_eq!(sale.client.load_early_purchases(&100), MAX_BATCH_ENTRIES);
    assert_eq!(sale.client.get_cursors().loaded_early, MAX_BATCH_ENTRIES);
    assert_eq!(
        sale.client.load_early_purchases(&0),
        MAX_BATCH_ENTRIES + 10
    );
    assert_eq!(sale.client.get_totals().early_raw, 600);
}

#[test]
fn empty_source_loads_immediately() {
    let sale = Sale::new();
    sale.registry.close_early_purchase();
    assert_eq!(sale.client.load_early_purchases(&0), 0);
    assert!(sale.client.early_purchases_loaded());
    assert_eq!(sale.client.max_crowdsale_cap(), crate::DEFAULT_MAX_CAP);
}

#[test]
fn final_batch_waits_for_closed_source() {
    let sale = Sale::new();
    let early = Address::generate(&sale.env);
    for _ in 0..3 {
        sale.add_early_purchase(&early, 100);
    }

    assert_eq!(sale.client.load_early_purchases(&2), 2);
    assert_eq!(
        sale.client.try_load_early_purchases(&0),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert!(!sale.client.early_purchases_loaded());
    assert_eq!(sale.client.get_cursors().loaded_early, 2);

    // Still open, so late entries are picked up.
    sale.add_early_purchase(&early, 400);
    sale.registry.close_early_purchase();
    assert_eq!(sale.client.load_early_purchases(&0), 4);
    assert!(sale.client.early_purchases_loaded());
    assert_eq!(sale.client.get_totals().early_raw, 700);
}

// ── delivery ─────────────────────────────────────────────────

/// One early purchaser, one presale partner and one crowdsale buyer, each
/// worth 1,000 raw. The sale has ended.
struct Settled {
    sale: Sale,
    early: Address,
    partner: Address,
    buyer: Address,
}

fn settled_sale() -> Settled {
    let sale = Sale::new();
    let early = Address::generate(&sale.env);
    sale.add_early_purchase(&early, 1_000);

    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(1_000);
    sale.client.set_qualified_partner(&partner, &10_000, &0);
    sale.client.purchase_as_qualified_partner(&partner, &1_000);

    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);
    sale.end();
    Settled {
        sale,
        early,
        partner,
        buyer,
    }
}

#[test]
fn delivery_before_end_fails() {
    let sale = Sale::new();
    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);
    assert_eq!(
        sale.client.try_deliver_purchased_tokens(&0),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(
        sale.client.try_withdraw_purchased_tokens(&buyer, &0),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

#[test]
fn delivery_converts_at_frozen_ratio() {
    let s = settled_sale();
    let progress = s.sale.client.deliver_purchased_tokens(&0);
    assert!(progress.complete);
    assert_eq!(progress.delivered_early, 1);
    assert_eq!(progress.delivered_crowdsale, 2);

    // 1,200 early + 1,300 presale + 1,200 crowdsale.
    let total_raised: i128 = 3_700;
    let snapshot = s.sale.client.get_settlement().unwrap();
    assert_eq!(snapshot.total_raised, total_raised);
    assert_eq!(snapshot.total_early, 1_200);

    let crowdsale_share = |amount: i128| DEFAULT_CROWDSALE_TOKEN_ALLOCATION * amount / total_raised;
    assert_eq!(
        s.sale.token_ledger.credited(&s.early),
        DEFAULT_EARLY_PURCHASE_TOKEN_ALLOCATION + crowdsale_share(1_200)
    );
    assert_eq!(s.sale.token_ledger.credited(&s.partner), crowdsale_share(1_300));
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), crowdsale_share(1_200));
    assert_eq!(
        s.sale.client.delivered_tokens_on_early(&s.early),
        s.sale.token_ledger.credited(&s.early)
    );
    assert_eq!(
        s.sale.client.delivered_tokens_on_crowdsale(&s.buyer),
        crowdsale_share(1_200)
    );
}

#[test]
fn delivery_resumes_across_calls_and_credits_once() {
    let sale = Sale::new();
    for _ in 0..3 {
        let early = Address::generate(&sale.env);
        sale.add_early_purchase(&early, 1_000);
    }
    sale.ready();
    for _ in 0..3 {
        let buyer = sale.funded(500);
        sale.client.purchase_with_payment(&buyer, &500);
    }
    sale.end();

    let first = sale.client.deliver_purchased_tokens(&2);
    assert_eq!((first.delivered_early, first.delivered_crowdsale), (2, 0));
    assert!(!first.complete);

    let second = sale.client.deliver_purchased_tokens(&2);
    assert_eq!((second.delivered_early, second.delivered_crowdsale), (3, 1));

    let last = sale.client.deliver_purchased_tokens(&0);
    assert!(last.complete);
    assert_eq!(sale.token_ledger.credit_calls(), 6);

    let again = sale.client.deliver_purchased_tokens(&0);
    assert!(again.complete);
    assert_eq!(sale.token_ledger.credit_calls(), 6);
}

#[test]
fn second_withdraw_is_a_no_op() {
    let s = settled_sale();
    let credited = s.sale.client.withdraw_purchased_tokens(&s.buyer, &0);
    assert!(credited > 0);
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), credited);

    assert_eq!(s.sale.client.withdraw_purchased_tokens(&s.buyer, &0), 0);
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), credited);
    assert_eq!(s.sale.token_ledger.credit_calls(), 1);
}

#[test]
fn withdraw_touches_only_own_entries() {
    let s = settled_sale();
    s.sale.client.withdraw_purchased_tokens(&s.early, &0);
    assert!(s.sale.token_ledger.credited(&s.early) > 0);
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), 0);
    assert_eq!(s.sale.token_ledger.credited(&s.partner), 0);

    // The batch walk passes over what was already withdrawn.
    s.sale.client.deliver_purchased_tokens(&0);
    assert_eq!(s.sale.token_ledger.credit_calls(), 3);
}

#[test]
fn nobody_is_credited_twice_when_paths_mix() {
    let s = settled_sale();
    s.sale.client.deliver_purchased_tokens(&0);
    let before = s.sale.token_ledger.credited(&s.partner);
    assert_eq!(s.sale.client.withdraw_purchased_tokens(&s.partner, &0), 0);
    assert_eq!(s.sale.token_ledger.credited(&s.partner), before);
}

// ── post-sale corrections ────────────────────────────────────

#[test]
fn corrections_need_ended_sale() {
    let sale = Sale::new();
    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);
    assert_eq!(
        sale.client.try_invalidate_purchase(&0),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(
        sale.client
            .try_amend_purchase(&0, &buyer, &1_100, &1_000, &sale.now(), &no_data(&sale), &10),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

#[test]
fn corrections_after_delivery_are_rejected() {
    let s = settled_sale();
    s.sale.client.withdraw_purchased_tokens(&s.buyer, &0);
    let credited = s.sale.token_ledger.credited(&s.buyer);
    let index = s.sale.client.get_purchase_indices(&s.buyer).get(0).unwrap();

    assert_eq!(
        s.sale.client.try_invalidate_purchase(&index),
        Err(Ok(CrowdsaleError::AlreadyDelivered))
    );
    assert_eq!(
        s.sale.client.try_amend_purchase(
            &index,
            &s.buyer,
            &5_000,
            &5_000,
            &s.sale.now(),
            &no_data(&s.sale),
            &0
        ),
        Err(Ok(CrowdsaleError::AlreadyDelivered))
    );
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), credited);
    assert_eq!(s.sale.client.get_purchase(&index).unwrap().amount, 1_200);
}

#[test]
fn invalidated_purchase_leaves_totals_and_is_never_delivered() {
    let s = settled_sale();
    let index = s.sale.client.get_purchase_indices(&s.buyer).get(0).unwrap();
    s.sale.client.invalidate_purchase(&index);

    let totals = s.sale.client.get_totals();
    assert_eq!(totals.crowdsale_raw, 0);
    assert_eq!(totals.crowdsale_amount, 0);
    assert_eq!(totals.presale_raw, 1_000);
    assert_eq!(s.sale.client.crowdsale_purchase_amount_by(&s.buyer), 0);
    assert_eq!(
        s.sale.client.try_invalidate_purchase(&index),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(
        s.sale.client.try_amend_purchase(
            &index,
            &s.buyer,
            &100,
            &100,
            &s.sale.now(),
            &no_data(&s.sale),
            &0
        ),
        Err(Ok(CrowdsaleError::InvalidState))
    );

    s.sale.client.deliver_purchased_tokens(&0);
    assert_eq!(s.sale.token_ledger.credited(&s.buyer), 0);
    assert_eq!(s.sale.client.get_settlement().unwrap().total_raised, 2_500);
}

#[test]
fn amend_moves_value_to_new_purchaser() {
    let s = settled_sale();
    let index = s.sale.client.get_purchase_indices(&s.buyer).get(0).unwrap();
    let heir = Address::generate(&s.sale.env);
    let reference = String::from_str(&s.sale.env, "btc:cafe");
    s.sale
        .client
        .amend_purchase(&index, &heir, &1_150, &1_000, &s.sale.now(), &reference, &15);

    let totals = s.sale.client.get_totals();
    assert_eq!(totals.crowdsale_raw, 1_000);
    assert_eq!(totals.crowdsale_amount, 1_150);
    assert_eq!(s.sale.client.crowdsale_purchase_amount_by(&s.buyer), 0);
    assert_eq!(s.sale.client.crowdsale_purchase_amount_by(&heir), 1_150);

    let record = s.sale.client.get_purchase(&index).unwrap();
    assert_eq!(record.purchaser, heir);
    assert_eq!(record.bonus_percent, 15);
    assert_eq!(record.data, reference);

    assert_eq!(s.sale.client.withdraw_purchased_tokens(&s.buyer, &0), 0);
    assert!(s.sale.client.withdraw_purchased_tokens(&heir, &0) > 0);
}

#[test]
fn amend_validation() {
    let sale = Sale::with_config(1_000, BonusScheme::standard_amount_tiers);
    sale.ready();
    let buyer = sale.funded(600);
    sale.client.purchase_with_payment(&buyer, &600);
    sale.end();

    assert_eq!(
        sale.client
            .try_amend_purchase(&7, &buyer, &100, &100, &sale.now(), &no_data(&sale), &0),
        Err(Ok(CrowdsaleError::PurchaseNotFound))
    );
    assert_eq!(
        sale.client
            .try_amend_purchase(&0, &buyer, &100, &0, &sale.now(), &no_data(&sale), &0),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    assert_eq!(
        sale.client
            .try_amend_purchase(&0, &buyer, &90, &100, &sale.now(), &no_data(&sale), &0),
        Err(Ok(CrowdsaleError::InvalidAmount))
    );
    assert_eq!(
        sale.client
            .try_amend_purchase(&0, &buyer, &100, &100, &sale.now(), &no_data(&sale), &101),
        Err(Ok(CrowdsaleError::InvalidPercent))
    );
    assert_eq!(
        sale.client.try_amend_purchase(
            &0,
            &buyer,
            &1_100,
            &1_001,
            &sale.now(),
            &no_data(&sale),
            &10
        ),
        Err(Ok(CrowdsaleError::CapExceeded))
    );
    assert_eq!(sale.client.get_totals().crowdsale_raw, 600);

    sale.client
        .amend_purchase(&0, &buyer, &1_100, &1_000, &sale.now(), &no_data(&sale), &10);
    assert_eq!(sale.client.get_totals().crowdsale_raw, 1_000);
}

#[test]
fn settlement_snapshot_is_frozen_at_first_delivery() {
    let s = settled_sale();
    assert_eq!(s.sale.client.get_settlement(), None);
    s.sale.client.withdraw_purchased_tokens(&s.early, &0);
    let frozen = s.sale.client.get_settlement().unwrap();
    assert_eq!(frozen.total_raised, 3_700);

    // The ledger is locked once tokens have been priced.
    let index = s.sale.client.get_purchase_indices(&s.buyer).get(0).unwrap();
    assert_eq!(
        s.sale.client.try_invalidate_purchase(&index),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(s.sale.client.get_totals().total_raised(), 3_700);

    s.sale.client.deliver_purchased_tokens(&0);
    assert_eq!(s.sale.client.get_settlement().unwrap(), frozen);
    assert_eq!(
        s.sale.token_ledger.credited(&s.partner),
        DEFAULT_CROWDSALE_TOKEN_ALLOCATION * 1_300 / frozen.total_raised
    );
}

#[test]
fn amend_after_first_batch_cannot_inflate_delivery() {
    let sale = Sale::new();
    sale.ready();
    let a = sale.funded(1_000);
    let b = sale.funded(1_000);
    sale.client.purchase_with_payment(&a, &1_000);
    sale.client.purchase_with_payment(&b, &1_000);
    sale.end();

    sale.client.deliver_purchased_tokens(&1);
    assert_eq!(
        sale.client.try_amend_purchase(
            &1,
            &b,
            &1_000_000,
            &1_000,
            &sale.now(),
            &no_data(&sale),
            &100
        ),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(sale.client.get_purchase(&1).unwrap().amount, 1_200);

    assert!(sale.client.deliver_purchased_tokens(&0).complete);
    let credited = sale.token_ledger.credited(&a) + sale.token_ledger.credited(&b);
    assert_eq!(credited, DEFAULT_CROWDSALE_TOKEN_ALLOCATION);
}
