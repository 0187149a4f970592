#![cfg(test)]
use soroban_sdk::{testutils::Address as _, testutils::Ledger as _, Address, Env};

use crate::early_purchase::{EarlyPurchaseRegistry, EarlyPurchaseRegistryClient};
use crate::CrowdsaleError;

fn setup() -> (Env, EarlyPurchaseRegistryClient<'static>, Address) {
    let env = Env::default();
    env.mock_all_auths();
    env.ledger().with_mut(|li| li.timestamp = 1_000_000);
    let id = env.register_contract(None, EarlyPurchaseRegistry);
    let client = EarlyPurchaseRegistryClient::new(&env, &id);
    let owner = Address::generate(&env);
    client.initialize_registry(&owner);
    (env, client, owner)
}

#[test]
fn initialize_once() {
    let (env, client, owner) = setup();
    assert_eq!(client.get_registry_owner(), Some(owner));
    let other = Address::generate(&env);
    assert_eq!(
        client.try_initialize_registry(&other),
        Err(Ok(CrowdsaleError::AlreadyInitialized))
    );
}

#[test]
fn append_tracks_totals() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    let b = Address::generate(&env);

    assert_eq!(client.append_early_purchase(&a, &1_000, &999_000), 0);
    assert_eq!(client.append_early_purchase(&b, &2_000, &999_500), 1);
    assert_eq!(client.append_early_purchase(&a, &500, &1_000_000), 2);

    assert_eq!(client.early_purchase_count(), 3);
    assert_eq!(client.number_of_early_purchases(), 3);
    assert_eq!(client.total_amount_of_early_purchases(), 3_500);
    assert_eq!(client.purchased_amount_by(&a), 1_500);

    let entry = client.early_purchase_at(&1);
    assert_eq!(entry.purchaser, b);
    assert_eq!(entry.amount, 2_000);
    assert_eq!(entry.purchased_at, 999_500);
    assert!(!entry.invalidated);
}

#[test]
fn append_validation() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    assert_eq!(
        client.try_append_early_purchase(&a, &0, &1),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    assert_eq!(
        client.try_append_early_purchase(&a, &10, &1_000_001),
        Err(Ok(CrowdsaleError::InvalidTimestamp))
    );
    assert_eq!(client.early_purchase_count(), 0);
}

#[test]
fn closed_registry_rejects_appends() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    client.append_early_purchase(&a, &10, &1);

    assert_eq!(client.close_early_purchase(), 1_000_000);
    env.ledger().with_mut(|li| li.timestamp = 2_000_000);
    // Closing again keeps the first timestamp.
    assert_eq!(client.close_early_purchase(), 1_000_000);
    assert_eq!(client.early_purchase_closed_at(), 1_000_000);

    assert_eq!(
        client.try_append_early_purchase(&a, &10, &1),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

#[test]
fn invalidate_removes_entry_from_totals() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    client.append_early_purchase(&a, &1_000, &1);
    client.append_early_purchase(&a, &300, &2);
    client.close_early_purchase();

    client.invalidate_early_purchase(&0);
    assert!(client.early_purchase_at(&0).invalidated);
    assert_eq!(client.early_purchase_count(), 2);
    assert_eq!(client.number_of_early_purchases(), 1);
    assert_eq!(client.total_amount_of_early_purchases(), 300);
    assert_eq!(client.purchased_amount_by(&a), 300);

    assert_eq!(
        client.try_invalidate_early_purchase(&0),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(
        client.try_invalidate_early_purchase(&9),
        Err(Ok(CrowdsaleError::PurchaseNotFound))
    );
    assert_eq!(
        client.try_early_purchase_at(&9),
        Err(Ok(CrowdsaleError::PurchaseNotFound))
    );
}

#[test]
fn amend_replaces_fields_after_close() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    let b = Address::generate(&env);
    client.append_early_purchase(&a, &1_000, &1);
    client.close_early_purchase();

    client.amend_early_purchase(&0, &b, &700, &5);
    let entry = client.early_purchase_at(&0);
    assert_eq!(entry.purchaser, b);
    assert_eq!(entry.amount, 700);
    assert_eq!(entry.purchased_at, 5);
    assert_eq!(client.purchased_amount_by(&a), 0);
    assert_eq!(client.purchased_amount_by(&b), 700);
    assert_eq!(client.total_amount_of_early_purchases(), 700);
    assert_eq!(client.number_of_early_purchases(), 1);

    // An amended entry can still be invalidated.
    client.invalidate_early_purchase(&0);
    assert_eq!(client.total_amount_of_early_purchases(), 0);
    assert_eq!(client.purchased_amount_by(&b), 0);
}

#[test]
fn amend_of_invalidated_entry_fails() {
    let (env, client, _owner) = setup();
    let a = Address::generate(&env);
    client.append_early_purchase(&a, &1_000, &1);
    client.invalidate_early_purchase(&0);
    assert_eq!(
        client.try_amend_early_purchase(&0, &a, &10, &1),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(
        client.try_amend_early_purchase(&3, &a, &10, &1),
        Err(Ok(CrowdsaleError::PurchaseNotFound))
    );
}

#[test]
fn owner_calls_fail_before_initialize() {
    let env = Env::default();
    env.mock_all_auths();
    let id = env.register_contract(None, EarlyPurchaseRegistry);
    let client = EarlyPurchaseRegistryClient::new(&env, &id);
    let a = Address::generate(&env);
    assert_eq!(
        client.try_append_early_purchase(&a, &10, &0),
        Err(Ok(CrowdsaleError::NotInitialized))
    );
    assert_eq!(client.early_purchase_count(), 0);
}
