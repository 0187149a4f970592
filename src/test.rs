#![cfg(test)]
use soroban_sdk::{testutils::Address as _, testutils::Events as _, Address, Env, String, Vec};

use crate::bonus::{AmountTier, AmountTiered, BonusScheme, SECONDS_IN_A_DAY};
use crate::test_mocks::{Sale, ONE_TO_ONE, PURCHASABLE_FROM, START_SEQUENCE};
use crate::{Crowdsale, CrowdsaleClient, CrowdsaleError, SaleConfig, SaleState};

// ── initialization ───────────────────────────────────────────

#[test]
fn initialize_stores_config_and_operator() {
    let sale = Sale::new();
    let config = sale.client.get_config().unwrap();
    assert_eq!(config.max_cap, crate::DEFAULT_MAX_CAP);
    assert_eq!(config.presale_bonus_percent, 30);
    assert_eq!(sale.client.get_operator(), Some(sale.operator.clone()));
    assert_eq!(sale.client.get_purchasable_from(), Some(PURCHASABLE_FROM));
    assert_eq!(sale.client.get_sale_state(), SaleState::NotStarted);
    assert!(!sale.env.events().all().is_empty());
}

#[test]
fn initialize_twice_fails() {
    let sale = Sale::new();
    let config = sale.client.get_config().unwrap();
    let result = sale.client.try_initialize(&sale.operator, &config);
    assert_eq!(result, Err(Ok(CrowdsaleError::AlreadyInitialized)));
}

#[test]
fn setup_twice_fails() {
    let sale = Sale::new();
    let ledger = Address::generate(&sale.env);
    let result = sale.client.try_setup(&ledger, &200);
    assert_eq!(result, Err(Ok(CrowdsaleError::AlreadyInitialized)));
    assert_eq!(sale.client.get_purchasable_from(), Some(PURCHASABLE_FROM));
}

fn bare_config(env: &Env) -> SaleConfig {
    SaleConfig::with_defaults(
        Address::generate(env),
        Address::generate(env),
        Address::generate(env),
        Address::generate(env),
        BonusScheme::standard_time_tiers(env),
    )
}

fn bare_client(env: &Env) -> CrowdsaleClient<'static> {
    let id = env.register_contract(None, Crowdsale);
    CrowdsaleClient::new(env, &id)
}

#[test]
fn initialize_rejects_invalid_config() {
    let env = Env::default();
    env.mock_all_auths();
    let client = bare_client(&env);
    let operator = Address::generate(&env);

    let mut config = bare_config(&env);
    config.max_cap = 0;
    assert_eq!(
        client.try_initialize(&operator, &config),
        Err(Ok(CrowdsaleError::InvalidConfig))
    );

    let mut config = bare_config(&env);
    config.presale_bonus_percent = 101;
    assert_eq!(
        client.try_initialize(&operator, &config),
        Err(Ok(CrowdsaleError::InvalidPercent))
    );

    let mut config = bare_config(&env);
    let mut tiers = Vec::new(&env);
    tiers.push_back(AmountTier { ceiling: 2_000, percent: 20 });
    tiers.push_back(AmountTier { ceiling: 1_000, percent: 10 });
    config.bonus_scheme = BonusScheme::AmountTiered(AmountTiered { tiers });
    assert_eq!(
        client.try_initialize(&operator, &config),
        Err(Ok(CrowdsaleError::InvalidConfig))
    );

    assert_eq!(client.get_operator(), None);
    client.initialize(&operator, &bare_config(&env));
    assert_eq!(client.get_operator(), Some(operator));
}

#[test]
fn operator_calls_fail_before_initialize() {
    let env = Env::default();
    env.mock_all_auths();
    let client = bare_client(&env);
    assert_eq!(
        client.try_update_payment_rate(&1),
        Err(Ok(CrowdsaleError::NotInitialized))
    );
    assert_eq!(
        client.try_load_early_purchases(&0),
        Err(Ok(CrowdsaleError::NotInitialized))
    );
    assert_eq!(client.max_crowdsale_cap(), 0);
}

// ── rates ────────────────────────────────────────────────────

#[test]
fn rates_must_be_positive() {
    let sale = Sale::new();
    assert_eq!(
        sale.client.try_update_payment_rate(&0),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    assert_eq!(
        sale.client.try_update_offchain_rate(&-5),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    sale.client.update_payment_rate(&2_000);
    sale.client.update_offchain_rate(&3_000);
    assert_eq!(sale.client.payment_rate(), 2_000);
    assert_eq!(sale.client.offchain_rate(), 3_000);
}

#[test]
fn payment_is_converted_with_token_decimals() {
    let sale = Sale::new();
    sale.ready();
    // 2,000 settlement units per whole payment token.
    sale.client.update_payment_rate(&2_000);
    let buyer = sale.funded(30_000_000);

    let receipt = sale.client.purchase_with_payment(&buyer, &30_000_000);
    assert_eq!(receipt.raw_amount, 6_000);
    assert_eq!(receipt.amount, 7_200);
    assert_eq!(sale.payment.balance(&buyer), 0);
}

#[test]
fn purchase_without_rate_fails() {
    let sale = Sale::new();
    sale.registry.close_early_purchase();
    sale.client.load_early_purchases(&0);
    sale.advance(0, PURCHASABLE_FROM - START_SEQUENCE);
    let buyer = sale.funded(1_000);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &1_000),
        Err(Ok(CrowdsaleError::RateNotSet))
    );
}

#[test]
fn zero_and_dust_payments_fail() {
    let sale = Sale::new();
    sale.ready();
    sale.client.update_payment_rate(&1);
    let buyer = sale.funded(1_000);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &0),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    // 1,000 stroops at one unit per whole token rounds to nothing.
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &1_000),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    assert_eq!(sale.payment.balance(&buyer), 1_000);
}

// ── lifecycle ────────────────────────────────────────────────

#[test]
fn purchase_before_start_ledger_fails() {
    let sale = Sale::new();
    sale.registry.close_early_purchase();
    sale.client.load_early_purchases(&0);
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let buyer = sale.funded(1_000);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &1_000),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    assert_eq!(sale.client.start_date(), 0);
}

#[test]
fn purchase_before_loading_fails() {
    let sale = Sale::new();
    sale.client.update_payment_rate(&ONE_TO_ONE);
    sale.advance(0, PURCHASABLE_FROM - START_SEQUENCE);
    let buyer = sale.funded(1_000);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &1_000),
        Err(Ok(CrowdsaleError::EarlyPurchasesNotLoaded))
    );
}

#[test]
fn first_purchase_opens_sale() {
    let sale = Sale::new();
    sale.ready();
    let buyer = sale.funded(1_000);

    let receipt = sale.client.purchase_with_payment(&buyer, &1_000);
    assert_eq!(receipt.index, 0);
    assert_eq!(receipt.amount, 1_200);
    assert_eq!(receipt.bonus_percent, 20);
    assert_eq!(receipt.refunded, 0);

    assert_eq!(sale.client.get_sale_state(), SaleState::Open);
    assert_eq!(sale.client.start_date(), sale.now());
    assert_eq!(sale.payment.balance(&buyer), 0);
    assert_eq!(sale.payment.balance(&sale.client.address), 1_000);

    let purchase = sale.client.get_purchase(&0).unwrap();
    assert_eq!(purchase.purchaser, buyer);
    assert_eq!(purchase.raw_amount, 1_000);
    assert_eq!(purchase.data, String::from_str(&sale.env, ""));
    assert!(!purchase.presale);
    assert_eq!(sale.client.crowdsale_purchase_amount_by(&buyer), 1_200);
    assert_eq!(sale.client.num_of_purchases(), 1);
}

#[test]
fn start_crowdsale_checks() {
    let sale = Sale::new();
    assert_eq!(
        sale.client.try_start_crowdsale(),
        Err(Ok(CrowdsaleError::InvalidState))
    );
    sale.advance(0, PURCHASABLE_FROM - START_SEQUENCE);
    assert_eq!(
        sale.client.try_start_crowdsale(),
        Err(Ok(CrowdsaleError::EarlyPurchasesNotLoaded))
    );
    sale.registry.close_early_purchase();
    sale.client.load_early_purchases(&0);
    assert_eq!(sale.client.start_crowdsale(), sale.now());
    assert_eq!(
        sale.client.try_start_crowdsale(),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

#[test]
fn start_crowdsale_after_purchase_started_it_fails() {
    let sale = Sale::new();
    sale.ready();
    let buyer = sale.funded(10);
    sale.client.purchase_with_payment(&buyer, &10);
    assert_eq!(
        sale.client.try_start_crowdsale(),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

#[test]
fn end_crowdsale_checks() {
    let sale = Sale::new();
    sale.ready();
    assert_eq!(
        sale.client.try_end_crowdsale(&sale.now()),
        Err(Ok(CrowdsaleError::InvalidState))
    );

    let started = sale.client.start_crowdsale();
    sale.advance(100, 1);
    assert_eq!(
        sale.client.try_end_crowdsale(&(sale.now() + 1)),
        Err(Ok(CrowdsaleError::InvalidTimestamp))
    );
    assert_eq!(
        sale.client.try_end_crowdsale(&(started - 1)),
        Err(Ok(CrowdsaleError::InvalidTimestamp))
    );

    sale.client.end_crowdsale(&(started + 50));
    assert_eq!(sale.client.ended_at(), started + 50);
    assert!(sale.client.is_ended());
    assert_eq!(sale.client.get_sale_state(), SaleState::Ended);
    assert_eq!(
        sale.client.try_end_crowdsale(&sale.now()),
        Err(Ok(CrowdsaleError::InvalidState))
    );

    let buyer = sale.funded(10);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &10),
        Err(Ok(CrowdsaleError::InvalidState))
    );
}

// ── cap enforcement ──────────────────────────────────────────

#[test]
fn early_purchases_reduce_crowdsale_cap() {
    let sale = Sale::new();
    let a = Address::generate(&sale.env);
    let b = Address::generate(&sale.env);
    sale.add_early_purchase(&a, 1_000_000);
    sale.add_early_purchase(&b, 500_000);
    sale.registry.close_early_purchase();
    sale.client.load_early_purchases(&0);

    assert_eq!(sale.client.max_crowdsale_cap(), crate::DEFAULT_MAX_CAP - 1_500_000);
    let totals = sale.client.get_totals();
    assert_eq!(totals.early_raw, 1_500_000);
    assert_eq!(totals.early_amount, 1_800_000);
    assert_eq!(sale.client.early_purchased_amount_by(&a), 1_200_000);
}

#[test]
fn overflowing_purchase_is_partially_filled_and_refunded() {
    let sale = Sale::with_config(1_000_000, BonusScheme::standard_time_tiers);
    sale.ready();
    let buyer = sale.funded(1_500_000);

    let receipt = sale.client.purchase_with_payment(&buyer, &1_500_000);
    assert_eq!(receipt.raw_amount, 1_000_000);
    assert_eq!(receipt.amount, 1_200_000);
    assert_eq!(receipt.refunded, 500_000);

    assert_eq!(sale.payment.balance(&buyer), 500_000);
    assert_eq!(sale.payment.balance(&sale.client.address), 1_000_000);
    assert_eq!(sale.client.get_totals().crowdsale_raw, 1_000_000);
    assert_eq!(sale.client.get_sale_state(), SaleState::Ended);
    assert_eq!(sale.client.ended_at(), sale.now());
}

#[test]
fn purchase_after_cap_reached_fails_without_moving_funds() {
    let sale = Sale::with_config(1_000, BonusScheme::standard_time_tiers);
    sale.ready();
    let first = sale.funded(1_000);
    sale.client.purchase_with_payment(&first, &1_000);
    assert!(sale.client.is_ended());

    let late = sale.funded(500);
    assert_eq!(
        sale.client.try_purchase_with_payment(&late, &500),
        Err(Ok(CrowdsaleError::CapExceeded))
    );
    assert_eq!(sale.payment.balance(&late), 500);
    assert_eq!(sale.client.num_of_purchases(), 1);
}

#[test]
fn crowdsale_total_never_exceeds_cap() {
    let sale = Sale::with_config(10_000, BonusScheme::standard_amount_tiers);
    sale.ready();
    let mut accepted = 0;
    for _ in 0..4 {
        let buyer = sale.funded(3_000);
        if let Ok(Ok(receipt)) = sale.client.try_purchase_with_payment(&buyer, &3_000) {
            accepted += receipt.raw_amount;
        }
    }
    assert_eq!(accepted, 10_000);
    assert_eq!(sale.client.get_totals().crowdsale_raw, 10_000);
    assert!(sale.client.is_ended());
}

// ── bonus through the purchase path ──────────────────────────

#[test]
fn amount_tier_boundary_prices_next_units_at_next_tier() {
    let sale = Sale::new();
    sale.ready();
    let whale = sale.funded(12_000_000);
    let next = sale.funded(1_000);

    let first = sale.client.purchase_with_payment(&whale, &12_000_000);
    assert_eq!(first.amount, 14_400_000);
    assert_eq!(first.bonus_percent, 20);

    let second = sale.client.purchase_with_payment(&next, &1_000);
    assert_eq!(second.amount, 1_150);
    assert_eq!(second.bonus_percent, 15);
    assert_eq!(sale.client.current_bonus_percent(), 15);
}

#[test]
fn purchase_straddling_tier_is_split() {
    let sale = Sale::new();
    sale.ready();
    let whale = sale.funded(11_999_000);
    let buyer = sale.funded(2_000);
    sale.client.purchase_with_payment(&whale, &11_999_000);

    let receipt = sale.client.purchase_with_payment(&buyer, &2_000);
    assert_eq!(receipt.amount, 2_000 + 200 + 150);
    assert_eq!(receipt.bonus_percent, 20);
}

#[test]
fn time_tier_boundary_belongs_to_ending_tier() {
    let sale = Sale::with_config(crate::DEFAULT_MAX_CAP, BonusScheme::standard_time_tiers);
    sale.ready();
    sale.client.start_crowdsale();

    sale.advance(7 * SECONDS_IN_A_DAY, 1);
    let buyer = sale.funded(200);
    let on_edge = sale.client.purchase_with_payment(&buyer, &100);
    assert_eq!(on_edge.bonus_percent, 20);
    assert_eq!(on_edge.amount, 120);

    sale.advance(1, 1);
    let past_edge = sale.client.purchase_with_payment(&buyer, &100);
    assert_eq!(past_edge.bonus_percent, 15);
    assert_eq!(past_edge.amount, 115);
}

#[test]
fn extended_time_tiers_decay_to_one_percent() {
    let sale = Sale::with_config(crate::DEFAULT_MAX_CAP, BonusScheme::extended_time_tiers);
    sale.ready();
    sale.client.start_crowdsale();
    let buyer = sale.funded(300);

    sale.advance(49 * SECONDS_IN_A_DAY, 1);
    assert_eq!(sale.client.purchase_with_payment(&buyer, &100).bonus_percent, 4);
    sale.advance(21 * SECONDS_IN_A_DAY, 1);
    assert_eq!(sale.client.purchase_with_payment(&buyer, &100).bonus_percent, 1);
    sale.advance(1, 1);
    let late = sale.client.purchase_with_payment(&buyer, &100);
    assert_eq!(late.bonus_percent, 0);
    assert_eq!(late.amount, 100);
}

// ── qualified partners ───────────────────────────────────────

#[test]
fn partner_presale_bypasses_cap_and_pays_commission() {
    let sale = Sale::with_config(500_000, BonusScheme::standard_amount_tiers);
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(1_000_000);
    sale.client.set_qualified_partner(&partner, &5_000_000, &10);

    let receipt = sale.client.purchase_as_qualified_partner(&partner, &1_000_000);
    assert_eq!(receipt.raw_amount, 1_000_000);
    assert_eq!(receipt.amount, 1_300_000);
    assert_eq!(receipt.bonus_percent, 30);
    assert_eq!(receipt.commission, 100_000);

    assert_eq!(sale.payment.balance(&partner), 100_000);
    assert_eq!(sale.payment.balance(&sale.client.address), 900_000);

    let totals = sale.client.get_totals();
    assert_eq!(totals.presale_raw, 1_000_000);
    assert_eq!(totals.presale_amount, 1_300_000);
    assert_eq!(totals.crowdsale_raw, 0);
    assert_eq!(sale.client.get_sale_state(), SaleState::NotStarted);
    assert!(sale.client.get_purchase(&0).unwrap().presale);
    assert_eq!(sale.client.get_qualified_partner(&partner).unwrap().amount, 1_000_000);
}

#[test]
fn partner_over_cap_is_rejected_without_transfer() {
    let sale = Sale::new();
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(2_000);
    sale.client.set_qualified_partner(&partner, &1_500, &0);
    sale.client.purchase_as_qualified_partner(&partner, &1_000);

    assert_eq!(
        sale.client.try_purchase_as_qualified_partner(&partner, &501),
        Err(Ok(CrowdsaleError::OverPartnerCap))
    );
    assert_eq!(sale.payment.balance(&partner), 1_000);
    assert_eq!(sale.client.num_of_purchases(), 1);

    sale.client.purchase_as_qualified_partner(&partner, &500);
    assert_eq!(sale.client.get_qualified_partner(&partner).unwrap().amount, 1_500);
}

#[test]
fn unlisted_partner_is_not_qualified() {
    let sale = Sale::new();
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(2_000);
    let stranger = sale.funded(2_000);
    assert_eq!(
        sale.client.try_purchase_as_qualified_partner(&stranger, &100),
        Err(Ok(CrowdsaleError::NotQualified))
    );

    sale.client.set_qualified_partner(&partner, &10_000, &5);
    sale.client.purchase_as_qualified_partner(&partner, &1_000);
    sale.client.unlist_qualified_partner(&partner);
    assert_eq!(
        sale.client.try_purchase_as_qualified_partner(&partner, &100),
        Err(Ok(CrowdsaleError::NotQualified))
    );
    assert_eq!(
        sale.client.try_update_qualified_partner_cap(&partner, &20_000),
        Err(Ok(CrowdsaleError::NotQualified))
    );

    let record = sale.client.get_qualified_partner(&partner).unwrap();
    assert!(!record.listed);
    assert_eq!(record.amount, 1_000);
    assert_eq!(record.commission_percent, 5);
}

#[test]
fn relisting_partner_keeps_contribution() {
    let sale = Sale::new();
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(1_000);
    sale.client.set_qualified_partner(&partner, &1_000, &0);
    sale.client.purchase_as_qualified_partner(&partner, &800);

    sale.client.set_qualified_partner(&partner, &900, &20);
    let record = sale.client.get_qualified_partner(&partner).unwrap();
    assert_eq!(record.amount, 800);
    assert_eq!(record.cap, 900);
    assert_eq!(
        sale.client.try_purchase_as_qualified_partner(&partner, &101),
        Err(Ok(CrowdsaleError::OverPartnerCap))
    );
    sale.client.update_qualified_partner_cap(&partner, &2_000);
    assert_eq!(sale.client.get_qualified_partner(&partner).unwrap().cap, 2_000);
}

#[test]
fn partner_registry_rejects_bad_terms() {
    let sale = Sale::new();
    let partner = Address::generate(&sale.env);
    assert_eq!(
        sale.client.try_set_qualified_partner(&partner, &1_000, &101),
        Err(Ok(CrowdsaleError::InvalidPercent))
    );
    assert_eq!(
        sale.client.try_set_qualified_partner(&partner, &0, &10),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    assert_eq!(
        sale.client.try_unlist_qualified_partner(&partner),
        Err(Ok(CrowdsaleError::NotQualified))
    );
    assert_eq!(sale.client.get_qualified_partner(&partner), None);
}

#[test]
fn partner_after_start_follows_cap_logic() {
    let sale = Sale::with_config(1_000, BonusScheme::standard_amount_tiers);
    sale.ready();
    let partner = sale.funded(1_500);
    sale.client.set_qualified_partner(&partner, &10_000, &10);

    let receipt = sale.client.purchase_as_qualified_partner(&partner, &1_500);
    assert_eq!(receipt.raw_amount, 1_000);
    // Partners keep the presale bonus but go through the cap.
    assert_eq!(receipt.bonus_percent, 30);
    assert_eq!(receipt.amount, 1_300);
    assert_eq!(sale.client.get_totals().crowdsale_amount, 1_300);
    assert_eq!(receipt.refunded, 500);
    // Commission on the accepted 1,000.
    assert_eq!(receipt.commission, 100);
    assert_eq!(sale.payment.balance(&partner), 600);
    assert!(!sale.client.get_purchase(&0).unwrap().presale);
    assert_eq!(sale.client.get_qualified_partner(&partner).unwrap().amount, 1_000);
    assert!(sale.client.is_ended());
}

#[test]
fn partner_keeps_presale_bonus_under_time_tiers() {
    let sale = Sale::with_config(crate::DEFAULT_MAX_CAP, BonusScheme::standard_time_tiers);
    sale.ready();
    sale.client.start_crowdsale();
    let partner = sale.funded(1_000);
    sale.client.set_qualified_partner(&partner, &10_000, &0);

    let receipt = sale.client.purchase_as_qualified_partner(&partner, &1_000);
    assert_eq!(receipt.bonus_percent, 30);
    assert_eq!(receipt.amount, 1_300);
    let purchase = sale.client.get_purchase(&receipt.index).unwrap();
    assert!(!purchase.presale);
    assert_eq!(purchase.bonus_percent, 30);

    let totals = sale.client.get_totals();
    assert_eq!(totals.crowdsale_raw, 1_000);
    assert_eq!(totals.crowdsale_amount, 1_300);
    assert_eq!(totals.presale_raw, 0);

    // Plain buyers still follow the schedule.
    let buyer = sale.funded(1_000);
    assert_eq!(sale.client.purchase_with_payment(&buyer, &1_000).bonus_percent, 20);
}

// ── unsolicited payments ─────────────────────────────────────

#[test]
fn unsolicited_payment_requires_certification() {
    let sale = Sale::new();
    sale.ready();
    let buyer = sale.funded(1_000);
    assert_eq!(
        sale.client.try_purchase(&buyer, &1_000),
        Err(Ok(CrowdsaleError::NotAuthorized))
    );
    assert_eq!(sale.payment.balance(&buyer), 1_000);

    sale.certifier.certify(&buyer);
    let receipt = sale.client.purchase(&buyer, &1_000);
    assert_eq!(receipt.amount, 1_200);
}

#[test]
fn unsolicited_payment_from_partner_takes_partner_path() {
    let sale = Sale::new();
    sale.client.update_payment_rate(&ONE_TO_ONE);
    let partner = sale.funded(1_000);
    sale.client.set_qualified_partner(&partner, &10_000, &0);

    let receipt = sale.client.purchase(&partner, &1_000);
    assert_eq!(receipt.bonus_percent, 30);
    assert!(sale.client.get_purchase(&0).unwrap().presale);
}

// ── off-chain purchases ──────────────────────────────────────

#[test]
fn offchain_purchase_recording() {
    let sale = Sale::new();
    sale.ready();
    let buyer = Address::generate(&sale.env);
    let reference = String::from_str(&sale.env, "btc:1732c342c93f69bb63b62960c422564d");

    assert_eq!(
        sale.client
            .try_record_offchain_purchase(&buyer, &1_000, &sale.now(), &reference),
        Err(Ok(CrowdsaleError::RateNotSet))
    );
    sale.client.update_offchain_rate(&2_000);
    assert_eq!(
        sale.client.try_record_offchain_purchase(
            &buyer,
            &1_000,
            &sale.now(),
            &String::from_str(&sale.env, "")
        ),
        Err(Ok(CrowdsaleError::InvalidReference))
    );
    assert_eq!(
        sale.client
            .try_record_offchain_purchase(&buyer, &1_000, &(sale.now() + 1), &reference),
        Err(Ok(CrowdsaleError::InvalidTimestamp))
    );

    let purchased_at = sale.now() - 3_600;
    let receipt = sale
        .client
        .record_offchain_purchase(&buyer, &1_000, &purchased_at, &reference);
    assert_eq!(receipt.amount, 1_200);
    let purchase = sale.client.get_purchase(&receipt.index).unwrap();
    assert_eq!(purchase.data, reference);
    assert_eq!(purchase.purchased_at, purchased_at);
    assert_eq!(sale.client.get_sale_state(), SaleState::Open);
}

#[test]
fn offchain_purchase_is_clipped_to_cap() {
    let sale = Sale::with_config(1_000, BonusScheme::standard_time_tiers);
    sale.ready();
    sale.client.update_offchain_rate(&2_000);
    let buyer = Address::generate(&sale.env);
    let reference = String::from_str(&sale.env, "btc:ab");

    let receipt = sale
        .client
        .record_offchain_purchase(&buyer, &1_500, &sale.now(), &reference);
    assert_eq!(receipt.raw_amount, 1_000);
    assert!(sale.client.is_ended());
    assert_eq!(
        sale.client
            .try_record_offchain_purchase(&buyer, &1, &sale.now(), &reference),
        Err(Ok(CrowdsaleError::CapExceeded))
    );
}

#[test]
fn oversized_partial_fill_fails_without_transfer() {
    let sale = Sale::with_config(1_000, BonusScheme::standard_amount_tiers);
    sale.ready();
    // Converts without overflow, but the refund share does not fit in i128.
    let offer: i128 = 100_000_000_000_000_000_000;
    let buyer = sale.funded(offer);
    assert_eq!(
        sale.client.try_purchase_with_payment(&buyer, &offer),
        Err(Ok(CrowdsaleError::InvalidAmount))
    );
    assert_eq!(sale.payment.balance(&buyer), offer);
    assert_eq!(sale.client.get_totals().crowdsale_raw, 0);
    assert!(!sale.client.is_ended());
}

// ── fund sweep ───────────────────────────────────────────────

#[test]
fn withdraw_funds_sweeps_to_treasury() {
    let sale = Sale::new();
    assert_eq!(
        sale.client.try_withdraw_funds(),
        Err(Ok(CrowdsaleError::ZeroValue))
    );
    sale.ready();
    let buyer = sale.funded(5_000);
    sale.client.purchase_with_payment(&buyer, &5_000);

    assert_eq!(sale.client.withdraw_funds(), 5_000);
    assert_eq!(sale.payment.balance(&sale.treasury), 5_000);
    assert_eq!(sale.payment.balance(&sale.client.address), 0);
}
