#![cfg(test)]
//! Collaborator mocks and the sale fixture shared by the test modules.
use soroban_sdk::{
    contract, contractimpl, contracttype, testutils::Address as _, testutils::Ledger as _, token,
    Address, Env,
};

use crate::bonus::BonusScheme;
use crate::early_purchase::{EarlyPurchaseRegistry, EarlyPurchaseRegistryClient};
use crate::{Crowdsale, CrowdsaleClient, SaleConfig};

/// Payment-token units per whole unit of the Stellar asset (7 decimals).
pub const PAYMENT_UNIT: i128 = 10_000_000;
/// Rate at which one payment-token stroop buys one settlement-currency unit.
pub const ONE_TO_ONE: i128 = PAYMENT_UNIT;
pub const START_TIMESTAMP: u64 = 1_700_000_000;
pub const START_SEQUENCE: u32 = 100;
pub const PURCHASABLE_FROM: u32 = 110;

#[contracttype]
pub enum MockKey {
    Credited(Address),
    Certified(Address),
    Calls,
}

#[contract]
pub struct MockTokenLedger;

#[contractimpl]
impl MockTokenLedger {
    pub fn credit_tokens(env: Env, to: Address, amount: i128) {
        let key = MockKey::Credited(to);
        let current: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        env.storage().persistent().set(&key, &(current + amount));
        let calls: u32 = env.storage().persistent().get(&MockKey::Calls).unwrap_or(0);
        env.storage().persistent().set(&MockKey::Calls, &(calls + 1));
    }

    pub fn credited(env: Env, account: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&MockKey::Credited(account))
            .unwrap_or(0)
    }

    pub fn credit_calls(env: Env) -> u32 {
        env.storage().persistent().get(&MockKey::Calls).unwrap_or(0)
    }
}

#[contract]
pub struct MockCertifier;

#[contractimpl]
impl MockCertifier {
    pub fn certify(env: Env, account: Address) {
        env.storage()
            .persistent()
            .set(&MockKey::Certified(account), &true);
    }

    pub fn is_certified(env: Env, account: Address) -> bool {
        env.storage()
            .persistent()
            .get(&MockKey::Certified(account))
            .unwrap_or(false)
    }
}

pub struct Sale {
    pub env: Env,
    pub operator: Address,
    pub treasury: Address,
    pub client: CrowdsaleClient<'static>,
    pub registry: EarlyPurchaseRegistryClient<'static>,
    pub token_ledger: MockTokenLedgerClient<'static>,
    pub certifier: MockCertifierClient<'static>,
    pub payment: token::Client<'static>,
    pub payment_admin: token::StellarAssetClient<'static>,
}

impl Sale {
    /// Fresh env with every collaborator registered, config stored and
    /// `setup` done. Early purchases are not loaded and no rate is set.
    pub fn with_config(max_cap: i128, scheme: fn(&Env) -> BonusScheme) -> Sale {
        let env = Env::default();
        env.mock_all_auths();
        env.budget().reset_unlimited();
        env.ledger().with_mut(|li| {
            li.timestamp = START_TIMESTAMP;
            li.sequence_number = START_SEQUENCE;
        });

        let operator = Address::generate(&env);
        let treasury = Address::generate(&env);

        let registry_id = env.register_contract(None, EarlyPurchaseRegistry);
        let registry = EarlyPurchaseRegistryClient::new(&env, &registry_id);
        registry.initialize_registry(&operator);

        let ledger_id = env.register_contract(None, MockTokenLedger);
        let certifier_id = env.register_contract(None, MockCertifier);
        let payment_id = env.register_stellar_asset_contract(Address::generate(&env));

        let mut config = SaleConfig::with_defaults(
            payment_id.clone(),
            treasury.clone(),
            registry_id,
            certifier_id.clone(),
            scheme(&env),
        );
        config.max_cap = max_cap;

        let client_id = env.register_contract(None, Crowdsale);
        let client = CrowdsaleClient::new(&env, &client_id);
        client.initialize(&operator, &config);
        client.setup(&ledger_id, &PURCHASABLE_FROM);

        Sale {
            token_ledger: MockTokenLedgerClient::new(&env, &ledger_id),
            certifier: MockCertifierClient::new(&env, &certifier_id),
            payment: token::Client::new(&env, &payment_id),
            payment_admin: token::StellarAssetClient::new(&env, &payment_id),
            env,
            operator,
            treasury,
            client,
            registry,
        }
    }

    /// Amount-tiered sale with the default cap.
    pub fn new() -> Sale {
        Self::with_config(crate::DEFAULT_MAX_CAP, BonusScheme::standard_amount_tiers)
    }

    /// Close the registry, load whatever it holds, set a one-to-one payment rate and
    /// move past the start ledger. The sale opens on the first purchase.
    pub fn ready(&self) {
        self.registry.close_early_purchase();
        self.client.load_early_purchases(&0);
        self.client.update_payment_rate(&ONE_TO_ONE);
        self.advance(0, PURCHASABLE_FROM - START_SEQUENCE);
    }

    pub fn advance(&self, seconds: u64, ledgers: u32) {
        self.env.ledger().with_mut(|li| {
            li.timestamp += seconds;
            li.sequence_number += ledgers;
        });
    }

    pub fn now(&self) -> u64 {
        self.env.ledger().timestamp()
    }

    /// A purchaser funded with `amount` payment-token stroops.
    pub fn funded(&self, amount: i128) -> Address {
        let account = Address::generate(&self.env);
        self.payment_admin.mint(&account, &amount);
        account
    }

    pub fn add_early_purchase(&self, purchaser: &Address, amount: i128) -> u32 {
        self.registry
            .append_early_purchase(purchaser, &amount, &self.now())
    }

    /// End the sale now.
    pub fn end(&self) {
        self.client.end_crowdsale(&self.now());
    }
}
