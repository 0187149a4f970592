#![cfg(test)]
use soroban_sdk::{
    testutils::{Address as _, MockAuth, MockAuthInvoke},
    Address, IntoVal, String, Val, Vec,
};

use crate::test_mocks::Sale;

/// Replace the mocked auths with one entry signed by a fresh address that
/// holds no role in the sale, authorizing exactly `fn_name(args)`.
fn signed_by_stranger(sale: &Sale, contract: &Address, fn_name: &str, args: Vec<Val>) -> Address {
    let stranger = Address::generate(&sale.env);
    sale.env.mock_auths(&[MockAuth {
        address: &stranger,
        invoke: &MockAuthInvoke {
            contract,
            fn_name,
            args,
            sub_invokes: &[],
        },
    }]);
    stranger
}

fn no_args(sale: &Sale) -> Vec<Val> {
    Vec::new(&sale.env)
}

#[test]
fn rate_updates_require_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();

    signed_by_stranger(&sale, &engine, "update_payment_rate", (100i128,).into_val(&sale.env));
    assert!(sale.client.try_update_payment_rate(&100).is_err());
    signed_by_stranger(&sale, &engine, "update_offchain_rate", (100i128,).into_val(&sale.env));
    assert!(sale.client.try_update_offchain_rate(&100).is_err());
    assert_eq!(sale.client.payment_rate(), 0);

    sale.env.mock_all_auths();
    sale.client.update_payment_rate(&100);
    let auths = sale.env.auths();
    assert_eq!(auths.len(), 1);
    assert_eq!(auths[0].0, sale.operator);
}

#[test]
fn partner_registry_requires_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    let partner = Address::generate(&sale.env);
    sale.client.set_qualified_partner(&partner, &1_000, &5);

    let other = Address::generate(&sale.env);
    signed_by_stranger(
        &sale,
        &engine,
        "set_qualified_partner",
        (other.clone(), 1_000i128, 5u32).into_val(&sale.env),
    );
    assert!(sale.client.try_set_qualified_partner(&other, &1_000, &5).is_err());
    signed_by_stranger(
        &sale,
        &engine,
        "unlist_qualified_partner",
        (partner.clone(),).into_val(&sale.env),
    );
    assert!(sale.client.try_unlist_qualified_partner(&partner).is_err());
    signed_by_stranger(
        &sale,
        &engine,
        "update_qualified_partner_cap",
        (partner.clone(), 5_000i128).into_val(&sale.env),
    );
    assert!(sale
        .client
        .try_update_qualified_partner_cap(&partner, &5_000)
        .is_err());

    assert_eq!(sale.client.get_qualified_partner(&other), None);
    let record = sale.client.get_qualified_partner(&partner).unwrap();
    assert!(record.listed);
    assert_eq!(record.cap, 1_000);
}

#[test]
fn lifecycle_calls_require_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();

    signed_by_stranger(&sale, &engine, "start_crowdsale", no_args(&sale));
    assert!(sale.client.try_start_crowdsale().is_err());
    assert_eq!(sale.client.start_date(), 0);

    sale.env.mock_all_auths();
    sale.client.start_crowdsale();
    let now = sale.now();
    signed_by_stranger(&sale, &engine, "end_crowdsale", (now,).into_val(&sale.env));
    assert!(sale.client.try_end_crowdsale(&now).is_err());
    assert!(!sale.client.is_ended());
}

#[test]
fn offchain_recording_requires_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();
    sale.client.update_offchain_rate(&2_000);

    let buyer = Address::generate(&sale.env);
    let reference = String::from_str(&sale.env, "btc:ff");
    let now = sale.now();
    signed_by_stranger(
        &sale,
        &engine,
        "record_offchain_purchase",
        (buyer.clone(), 1_000i128, now, reference.clone()).into_val(&sale.env),
    );
    assert!(sale
        .client
        .try_record_offchain_purchase(&buyer, &1_000, &now, &reference)
        .is_err());
    assert_eq!(sale.client.num_of_purchases(), 0);
}

#[test]
fn corrections_require_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);
    sale.end();

    signed_by_stranger(&sale, &engine, "invalidate_purchase", (0u32,).into_val(&sale.env));
    assert!(sale.client.try_invalidate_purchase(&0).is_err());

    let now = sale.now();
    let data = String::from_str(&sale.env, "");
    signed_by_stranger(
        &sale,
        &engine,
        "amend_purchase",
        (0u32, buyer.clone(), 1i128, 1i128, now, data.clone(), 0u32).into_val(&sale.env),
    );
    assert!(sale
        .client
        .try_amend_purchase(&0, &buyer, &1, &1, &now, &data, &0)
        .is_err());

    let purchase = sale.client.get_purchase(&0).unwrap();
    assert!(!purchase.invalidated);
    assert_eq!(purchase.amount, 1_200);
}

#[test]
fn fund_sweep_requires_operator() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);

    signed_by_stranger(&sale, &engine, "withdraw_funds", no_args(&sale));
    assert!(sale.client.try_withdraw_funds().is_err());
    assert_eq!(sale.payment.balance(&sale.client.address), 1_000);
}

#[test]
fn purchases_require_purchaser_auth() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();
    let buyer = sale.funded(1_000);

    let args: Vec<Val> = (buyer.clone(), 500i128).into_val(&sale.env);
    signed_by_stranger(&sale, &engine, "purchase_with_payment", args.clone());
    assert!(sale.client.try_purchase_with_payment(&buyer, &500).is_err());
    signed_by_stranger(&sale, &engine, "purchase", args.clone());
    assert!(sale.client.try_purchase(&buyer, &500).is_err());
    signed_by_stranger(&sale, &engine, "purchase_as_qualified_partner", args);
    assert!(sale
        .client
        .try_purchase_as_qualified_partner(&buyer, &500)
        .is_err());
    assert_eq!(sale.payment.balance(&buyer), 1_000);

    sale.env.mock_all_auths();
    sale.client.purchase_with_payment(&buyer, &500);
    assert!(sale.env.auths().iter().any(|(address, _)| *address == buyer));
}

#[test]
fn withdraw_requires_purchaser_but_delivery_is_open() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    sale.ready();
    let buyer = sale.funded(1_000);
    sale.client.purchase_with_payment(&buyer, &1_000);
    sale.end();

    signed_by_stranger(
        &sale,
        &engine,
        "withdraw_purchased_tokens",
        (buyer.clone(), 0u32).into_val(&sale.env),
    );
    assert!(sale.client.try_withdraw_purchased_tokens(&buyer, &0).is_err());
    assert_eq!(sale.client.delivered_tokens_on_crowdsale(&buyer), 0);

    signed_by_stranger(&sale, &engine, "deliver_purchased_tokens", (0u32,).into_val(&sale.env));
    let progress = sale.client.deliver_purchased_tokens(&0);
    assert!(progress.complete);
    assert!(sale.client.delivered_tokens_on_crowdsale(&buyer) > 0);
}

#[test]
fn loading_is_permissionless() {
    let sale = Sale::new();
    let engine = sale.client.address.clone();
    let early = Address::generate(&sale.env);
    sale.add_early_purchase(&early, 1_000);
    sale.registry.close_early_purchase();

    signed_by_stranger(&sale, &engine, "load_early_purchases", (0u32,).into_val(&sale.env));
    assert_eq!(sale.client.load_early_purchases(&0), 1);
    assert!(sale.client.early_purchases_loaded());
}

#[test]
fn registry_changes_require_owner() {
    let sale = Sale::new();
    let registry = sale.registry.address.clone();
    let early = Address::generate(&sale.env);
    sale.add_early_purchase(&early, 1_000);
    let now = sale.now();

    signed_by_stranger(
        &sale,
        &registry,
        "append_early_purchase",
        (early.clone(), 1_000i128, now).into_val(&sale.env),
    );
    assert!(sale
        .registry
        .try_append_early_purchase(&early, &1_000, &now)
        .is_err());
    signed_by_stranger(&sale, &registry, "invalidate_early_purchase", (0u32,).into_val(&sale.env));
    assert!(sale.registry.try_invalidate_early_purchase(&0).is_err());
    signed_by_stranger(&sale, &registry, "close_early_purchase", no_args(&sale));
    assert!(sale.registry.try_close_early_purchase().is_err());

    assert_eq!(sale.registry.early_purchase_count(), 1);
    assert_eq!(sale.registry.early_purchase_closed_at(), 0);
}
