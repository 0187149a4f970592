#![no_std]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, Env,
    String, Symbol, Vec,
};

pub mod bonus;
pub mod collaborators;
pub mod early_purchase;
pub mod settlement;

use bonus::{with_flat_bonus, Bonus, BonusScheme, TierContext};
use collaborators::{CertifierClient, EarlyPurchaseSourceClient, TokenLedgerClient};
use settlement::SettlementSnapshot;

/// Contract error codes. Auth failures are signaled by host panic (require_auth).
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
pub enum CrowdsaleError {
    /// Operator or config not set.
    NotInitialized = 1,
    AlreadyInitialized = 2,
    /// Caller is not allowed to take this purchase path.
    NotAuthorized = 3,
    /// Operation not permitted in the current sale state.
    InvalidState = 4,
    /// No headroom left under the crowdsale cap.
    CapExceeded = 5,
    /// Partner path used by an address that is not listed.
    NotQualified = 6,
    /// Partner contribution would exceed the partner's cap.
    OverPartnerCap = 7,
    ZeroValue = 8,
    /// Exchange rate for this purchase path was never set.
    RateNotSet = 9,
    /// Amount out of range or conversion overflowed.
    InvalidAmount = 10,
    /// Percent above 100.
    InvalidPercent = 11,
    /// Timestamp in the future or before the sale started.
    InvalidTimestamp = 12,
    InvalidConfig = 13,
    /// Off-chain purchase recorded without an external reference.
    InvalidReference = 14,
    PurchaseNotFound = 15,
    /// Entry already converted into tokens; it is frozen.
    AlreadyDelivered = 16,
    EarlyPurchasesNotLoaded = 17,
    /// `setup` has not wired the token ledger and start ledger yet.
    NotSetUp = 18,
}

// ── Event symbols ────────────────────────────────────────────
const EVENT_INIT: Symbol = symbol_short!("init");
const EVENT_SETUP: Symbol = symbol_short!("setup");
const EVENT_RATE_PAYMENT: Symbol = symbol_short!("rate_pay");
const EVENT_RATE_OFFCHAIN: Symbol = symbol_short!("rate_off");
const EVENT_PARTNER_SET: Symbol = symbol_short!("qp_set");
const EVENT_PARTNER_UNLIST: Symbol = symbol_short!("qp_unlist");
const EVENT_PARTNER_CAP: Symbol = symbol_short!("qp_cap");
const EVENT_PURCHASE: Symbol = symbol_short!("purchase");
const EVENT_PRESALE: Symbol = symbol_short!("presale");
const EVENT_OFFCHAIN: Symbol = symbol_short!("offchain");
const EVENT_REFUND: Symbol = symbol_short!("refund");
const EVENT_COMMISSION: Symbol = symbol_short!("commiss");
const EVENT_STARTED: Symbol = symbol_short!("started");
const EVENT_ENDED: Symbol = symbol_short!("ended");
const EVENT_EP_LOAD: Symbol = symbol_short!("ep_load");
const EVENT_DELIVER: Symbol = symbol_short!("deliver");
const EVENT_WITHDRAW: Symbol = symbol_short!("withdraw");
const EVENT_AMEND: Symbol = symbol_short!("amend");
const EVENT_INVALIDATE: Symbol = symbol_short!("invalid");
const EVENT_SWEEP: Symbol = symbol_short!("sweep");

const PERCENT_DENOMINATOR: i128 = 100;

/// Token units per whole token of the token being sold.
pub const TOKEN_UNIT: i128 = 1_000_000_000_000_000_000;
/// Settlement-currency ceiling shared by early and crowdsale purchases.
pub const DEFAULT_MAX_CAP: i128 = 67_000_000;
pub const DEFAULT_CROWDSALE_TOKEN_ALLOCATION: i128 = 125_000_000 * TOKEN_UNIT;
pub const DEFAULT_EARLY_PURCHASE_TOKEN_ALLOCATION: i128 = 50_000_000 * TOKEN_UNIT;
pub const DEFAULT_EARLY_PURCHASE_BONUS_PERCENT: u32 = 20;
pub const DEFAULT_PRESALE_BONUS_PERCENT: u32 = 30;

/// Maximum number of ledger entries a batch call walks in one transaction.
/// Keeps compute costs predictable within Soroban limits.
pub const MAX_BATCH_ENTRIES: u32 = 50;

// ── Data structures ──────────────────────────────────────────

/// Deployment configuration, validated once by `initialize`.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct SaleConfig {
    /// SEP-41 token purchasers pay with.
    pub payment_token: Address,
    /// Receives swept funds.
    pub treasury: Address,
    pub early_purchase_source: Address,
    pub certifier: Address,
    /// Settlement-currency ceiling before early purchases are deducted.
    pub max_cap: i128,
    pub crowdsale_token_allocation: i128,
    pub early_token_allocation: i128,
    pub early_purchase_bonus_percent: u32,
    pub presale_bonus_percent: u32,
    pub bonus_scheme: BonusScheme,
}

impl SaleConfig {
    pub fn with_defaults(
        payment_token: Address,
        treasury: Address,
        early_purchase_source: Address,
        certifier: Address,
        bonus_scheme: BonusScheme,
    ) -> Self {
        SaleConfig {
            payment_token,
            treasury,
            early_purchase_source,
            certifier,
            max_cap: DEFAULT_MAX_CAP,
            crowdsale_token_allocation: DEFAULT_CROWDSALE_TOKEN_ALLOCATION,
            early_token_allocation: DEFAULT_EARLY_PURCHASE_TOKEN_ALLOCATION,
            early_purchase_bonus_percent: DEFAULT_EARLY_PURCHASE_BONUS_PERCENT,
            presale_bonus_percent: DEFAULT_PRESALE_BONUS_PERCENT,
            bonus_scheme,
        }
    }

    fn validate(&self) -> Result<(), CrowdsaleError> {
        if self.max_cap <= 0
            || self.crowdsale_token_allocation < 0
            || self.early_token_allocation < 0
        {
            return Err(CrowdsaleError::InvalidConfig);
        }
        if self.early_purchase_bonus_percent > 100 || self.presale_bonus_percent > 100 {
            return Err(CrowdsaleError::InvalidPercent);
        }
        if !self.bonus_scheme.schedule().is_well_formed() {
            return Err(CrowdsaleError::InvalidConfig);
        }
        Ok(())
    }
}

#[contracttype]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaleState {
    NotStarted = 0,
    Open = 1,
    Ended = 2,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct QualifiedPartner {
    /// Settlement-currency contribution ceiling.
    pub cap: i128,
    /// Settlement-currency contributed so far, without bonus.
    pub amount: i128,
    pub commission_percent: u32,
    pub listed: bool,
}

/// One entry of the purchase ledger.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct CrowdsalePurchase {
    pub purchaser: Address,
    /// Settlement-currency value with bonus.
    pub amount: i128,
    /// Settlement-currency value without bonus.
    pub raw_amount: i128,
    pub purchased_at: u64,
    /// External reference such as `btc:<txid>`; empty for on-chain payments.
    pub data: String,
    pub bonus_percent: u32,
    /// Recorded before the sale started through the partner path.
    pub presale: bool,
    pub invalidated: bool,
    pub delivered: bool,
}

/// Early purchase as copied into the engine by the loader.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedEarlyPurchase {
    pub purchaser: Address,
    /// With the flat early-purchase bonus applied.
    pub amount: i128,
    pub raw_amount: i128,
    pub delivered: bool,
}

/// Running totals, in settlement currency.
#[contracttype]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaleTotals {
    pub crowdsale_amount: i128,
    pub crowdsale_raw: i128,
    pub presale_amount: i128,
    pub presale_raw: i128,
    pub early_amount: i128,
    pub early_raw: i128,
}

impl SaleTotals {
    /// Everything tokens are distributed against, bonus included.
    pub fn total_raised(&self) -> i128 {
        self.early_amount + self.crowdsale_amount + self.presale_amount
    }
}

/// Monotonic indices that make the batch processors resumable.
#[contracttype]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cursors {
    /// Source entries examined by the loader.
    pub loaded_early: u32,
    /// Loaded early entries walked by `deliver_purchased_tokens`.
    pub delivered_early: u32,
    /// Ledger entries walked by `deliver_purchased_tokens`.
    pub delivered_crowdsale: u32,
}

/// Per-purchaser progress of `withdraw_purchased_tokens` through the
/// purchaser's own index lists.
#[contracttype]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WithdrawCursor {
    pub early: u32,
    pub crowdsale: u32,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseReceipt {
    pub index: u32,
    pub amount: i128,
    /// Accepted settlement-currency value.
    pub raw_amount: i128,
    pub bonus_percent: u32,
    /// Payment-token amount sent back for the unaccepted part.
    pub refunded: i128,
    /// Payment-token amount paid to a qualified partner.
    pub commission: i128,
}

#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryProgress {
    pub delivered_early: u32,
    pub delivered_crowdsale: u32,
    pub complete: bool,
}

#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    Operator,
    Config,
    /// Token ledger credited on delivery; set by `setup`.
    TokenLedger,
    /// Ledger sequence from which the sale may open.
    PurchasableFrom,
    /// Settlement-currency units per whole payment-token unit.
    PaymentRate,
    /// Settlement-currency units per off-chain currency unit.
    OffchainRate,
    /// Ledger timestamp the sale opened at; absent until then.
    StartDate,
    /// Ledger timestamp the sale ended at; absent until then.
    EndedAt,
    /// Crowdsale ceiling, fixed when early purchases finish loading.
    MaxCrowdsaleCap,
    Totals,
    Cursors,
    EarlyPurchasesLoaded,
    /// Token conversion snapshot frozen at the first delivery.
    Settlement,
    Partner(Address),
    PurchaseCount,
    Purchase(u32),
    /// Ledger indices a purchaser has ever been recorded on, in append order.
    PurchasesOf(Address),
    CrowdsaleAmountBy(Address),
    EarlyEntryCount,
    EarlyEntry(u32),
    EarlyEntriesOf(Address),
    EarlyAmountBy(Address),
    WithdrawCursor(Address),
    DeliveredOnEarly(Address),
    DeliveredOnCrowdsale(Address),
}

/// Outcome of recording one ledger entry.
struct Fill {
    index: u32,
    accepted: i128,
    bonus: Bonus,
}

/// How a new ledger entry is priced.
#[derive(Clone, Copy, PartialEq)]
enum Pricing {
    /// Active bonus schedule, clipped to the cap.
    Schedule,
    /// Flat presale bonus, clipped to the cap.
    Partner,
    /// Flat presale bonus, outside the cap.
    Presale,
}

// ── Contract ─────────────────────────────────────────────────
#[contract]
pub struct Crowdsale;

#[contractimpl]
impl Crowdsale {
    /// Store the operator and a validated config. Can only be called once.
    pub fn initialize(env: Env, operator: Address, config: SaleConfig) -> Result<(), CrowdsaleError> {
        if env.storage().persistent().has(&DataKey::Operator) {
            return Err(CrowdsaleError::AlreadyInitialized);
        }
        operator.require_auth();
        config.validate()?;

        env.storage().persistent().set(&DataKey::Operator, &operator);
        env.storage().persistent().set(&DataKey::Config, &config);
        env.storage()
            .persistent()
            .set(&DataKey::Totals, &SaleTotals::default());
        env.storage()
            .persistent()
            .set(&DataKey::Cursors, &Cursors::default());
        env.events().publish(
            (EVENT_INIT, operator),
            (config.payment_token, config.max_cap),
        );
        Ok(())
    }

    /// Wire the token ledger and the ledger sequence the sale may open at.
    /// The token ledger is deployed after the engine, so this is separate
    /// from `initialize`. Can only be called once.
    pub fn setup(env: Env, token_ledger: Address, purchasable_from: u32) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        if env.storage().persistent().has(&DataKey::TokenLedger) {
            return Err(CrowdsaleError::AlreadyInitialized);
        }
        env.storage()
            .persistent()
            .set(&DataKey::TokenLedger, &token_ledger);
        env.storage()
            .persistent()
            .set(&DataKey::PurchasableFrom, &purchasable_from);
        env.events()
            .publish((EVENT_SETUP, token_ledger), purchasable_from);
        Ok(())
    }

    pub fn update_payment_rate(env: Env, rate: i128) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        if rate <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        env.storage().persistent().set(&DataKey::PaymentRate, &rate);
        env.events().publish((EVENT_RATE_PAYMENT,), rate);
        Ok(())
    }

    pub fn update_offchain_rate(env: Env, rate: i128) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        if rate <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        env.storage().persistent().set(&DataKey::OffchainRate, &rate);
        env.events().publish((EVENT_RATE_OFFCHAIN,), rate);
        Ok(())
    }

    // ── Qualified partners ───────────────────────────────────────

    /// Insert or overwrite a partner. Overwriting keeps what the partner has
    /// already contributed.
    pub fn set_qualified_partner(
        env: Env,
        partner: Address,
        cap: i128,
        commission_percent: u32,
    ) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        if cap <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        if commission_percent > 100 {
            return Err(CrowdsaleError::InvalidPercent);
        }
        let key = DataKey::Partner(partner.clone());
        let contributed = env
            .storage()
            .persistent()
            .get::<DataKey, QualifiedPartner>(&key)
            .map(|p| p.amount)
            .unwrap_or(0);
        let record = QualifiedPartner {
            cap,
            amount: contributed,
            commission_percent,
            listed: true,
        };
        env.storage().persistent().set(&key, &record);
        env.events()
            .publish((EVENT_PARTNER_SET, partner), (cap, commission_percent));
        Ok(())
    }

    pub fn unlist_qualified_partner(env: Env, partner: Address) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        let key = DataKey::Partner(partner.clone());
        let mut record: QualifiedPartner = env
            .storage()
            .persistent()
            .get(&key)
            .ok_or(CrowdsaleError::NotQualified)?;
        record.listed = false;
        env.storage().persistent().set(&key, &record);
        env.events().publish((EVENT_PARTNER_UNLIST, partner), ());
        Ok(())
    }

    pub fn update_qualified_partner_cap(
        env: Env,
        partner: Address,
        cap: i128,
    ) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        if cap <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        let key = DataKey::Partner(partner.clone());
        let mut record = Self::listed_partner(&env, &partner)?;
        record.cap = cap;
        env.storage().persistent().set(&key, &record);
        env.events().publish((EVENT_PARTNER_CAP, partner), cap);
        Ok(())
    }

    pub fn get_qualified_partner(env: Env, partner: Address) -> Option<QualifiedPartner> {
        env.storage().persistent().get(&DataKey::Partner(partner))
    }

    // ── Purchases ────────────────────────────────────────────────

    /// Buy with `amount` of the payment token. The part of the payment the cap
    /// cannot absorb is returned in the same call.
    pub fn purchase_with_payment(
        env: Env,
        purchaser: Address,
        amount: i128,
    ) -> Result<PurchaseReceipt, CrowdsaleError> {
        purchaser.require_auth();
        Self::pay(&env, &purchaser, amount)
    }

    /// Partner path. Before the sale opens this records a presale purchase
    /// outside the cap; afterwards it follows the ordinary cap logic. The
    /// partner's commission is paid back in the same call.
    pub fn purchase_as_qualified_partner(
        env: Env,
        partner: Address,
        amount: i128,
    ) -> Result<PurchaseReceipt, CrowdsaleError> {
        partner.require_auth();
        Self::pay_as_partner(&env, &partner, amount)
    }

    /// Unsolicited payment. Listed partners are routed to the partner path,
    /// everyone else must be certified.
    pub fn purchase(env: Env, purchaser: Address, amount: i128) -> Result<PurchaseReceipt, CrowdsaleError> {
        purchaser.require_auth();
        let config = Self::read_config(&env)?;
        let is_partner = Self::get_qualified_partner(env.clone(), purchaser.clone())
            .map(|p| p.listed)
            .unwrap_or(false);
        if is_partner {
            return Self::pay_as_partner(&env, &purchaser, amount);
        }
        if !CertifierClient::new(&env, &config.certifier).is_certified(&purchaser) {
            return Err(CrowdsaleError::NotAuthorized);
        }
        Self::pay(&env, &purchaser, amount)
    }

    /// Record a purchase settled outside the chain. `amount` is already in
    /// settlement currency and `data` carries the external reference. The
    /// unaccepted remainder is reported in the event for off-chain refund.
    pub fn record_offchain_purchase(
        env: Env,
        purchaser: Address,
        amount: i128,
        purchased_at: u64,
        data: String,
    ) -> Result<PurchaseReceipt, CrowdsaleError> {
        Self::require_operator(&env)?;
        let config = Self::read_config(&env)?;
        let rate = Self::offchain_rate(env.clone());
        if rate <= 0 {
            return Err(CrowdsaleError::RateNotSet);
        }
        if amount <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        if data.len() == 0 {
            return Err(CrowdsaleError::InvalidReference);
        }
        if purchased_at > env.ledger().timestamp() {
            return Err(CrowdsaleError::InvalidTimestamp);
        }

        let fill = Self::settle(&env, &config, &purchaser, amount, purchased_at, &data, Pricing::Schedule)?;
        env.events().publish(
            (EVENT_OFFCHAIN, purchaser),
            (
                fill.index,
                fill.bonus.amount,
                fill.accepted,
                fill.bonus.percent,
                amount - fill.accepted,
                data,
            ),
        );
        Ok(PurchaseReceipt {
            index: fill.index,
            amount: fill.bonus.amount,
            raw_amount: fill.accepted,
            bonus_percent: fill.bonus.percent,
            refunded: 0,
            commission: 0,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the sale explicitly. Rejected once open, before the configured
    /// start ledger, or before early purchases have finished loading.
    pub fn start_crowdsale(env: Env) -> Result<u64, CrowdsaleError> {
        Self::require_operator(&env)?;
        if env.storage().persistent().has(&DataKey::StartDate) {
            return Err(CrowdsaleError::InvalidState);
        }
        Self::open_sale(&env)
    }

    /// End the sale at `ended_at`, which must lie between the start date and now.
    pub fn end_crowdsale(env: Env, ended_at: u64) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        let start_date: u64 = env
            .storage()
            .persistent()
            .get(&DataKey::StartDate)
            .ok_or(CrowdsaleError::InvalidState)?;
        if env.storage().persistent().has(&DataKey::EndedAt) {
            return Err(CrowdsaleError::InvalidState);
        }
        if ended_at > env.ledger().timestamp() || ended_at < start_date {
            return Err(CrowdsaleError::InvalidTimestamp);
        }
        Self::close_sale(&env, ended_at);
        Ok(())
    }

    /// Copy early purchases from the source ledger, resuming at the loader
    /// cursor and examining at most `max_entries` source entries
    /// (0 = up to MAX_BATCH_ENTRIES). Invalidated entries are skipped.
    /// Returns the cursor; loading is complete once it equals the source count.
    ///
    /// Anyone may call this. Finishing the load fixes the crowdsale cap, so
    /// the batch reaching the end of the source needs the source closed.
    pub fn load_early_purchases(env: Env, max_entries: u32) -> Result<u32, CrowdsaleError> {
        let config = Self::read_config(&env)?;
        let mut cursors = Self::get_cursors(env.clone());
        if Self::early_purchases_loaded(env.clone()) {
            return Ok(cursors.loaded_early);
        }

        let source = EarlyPurchaseSourceClient::new(&env, &config.early_purchase_source);
        let count = source.early_purchase_count();
        let start_idx = cursors.loaded_early;
        let end_idx = core::cmp::min(start_idx.saturating_add(batch_budget(max_entries)), count);
        if end_idx == count && source.early_purchase_closed_at() == 0 {
            return Err(CrowdsaleError::InvalidState);
        }

        let mut totals = Self::get_totals(env.clone());
        for i in start_idx..end_idx {
            let entry = source.early_purchase_at(&i);
            if entry.invalidated || entry.amount <= 0 {
                continue;
            }
            let amount = with_flat_bonus(entry.amount, config.early_purchase_bonus_percent);
            Self::append_early_entry(
                &env,
                LoadedEarlyPurchase {
                    purchaser: entry.purchaser,
                    amount,
                    raw_amount: entry.amount,
                    delivered: false,
                },
            );
            totals.early_amount += amount;
            totals.early_raw += entry.amount;
        }

        cursors.loaded_early = end_idx;
        env.storage().persistent().set(&DataKey::Totals, &totals);
        env.storage().persistent().set(&DataKey::Cursors, &cursors);

        if end_idx == count {
            let cap = core::cmp::max(config.max_cap - totals.early_raw, 0);
            env.storage().persistent().set(&DataKey::MaxCrowdsaleCap, &cap);
            env.storage()
                .persistent()
                .set(&DataKey::EarlyPurchasesLoaded, &true);
        }

        env.events()
            .publish((EVENT_EP_LOAD,), (start_idx, end_idx, count));
        Ok(end_idx)
    }

    // ── Post-sale corrections ────────────────────────────────────

    /// Replace the fields of an undelivered ledger entry after the sale ended.
    #[allow(clippy::too_many_arguments)]
    pub fn amend_purchase(
        env: Env,
        index: u32,
        purchaser: Address,
        amount: i128,
        raw_amount: i128,
        purchased_at: u64,
        data: String,
        bonus_percent: u32,
    ) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        Self::require_ended(&env)?;
        let previous = Self::correctable_purchase(&env, index)?;
        if raw_amount <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        if amount < raw_amount {
            return Err(CrowdsaleError::InvalidAmount);
        }
        if bonus_percent > 100 {
            return Err(CrowdsaleError::InvalidPercent);
        }
        if purchased_at > env.ledger().timestamp() {
            return Err(CrowdsaleError::InvalidTimestamp);
        }

        let mut totals = Self::get_totals(env.clone());
        if previous.presale {
            totals.presale_amount += amount - previous.amount;
            totals.presale_raw += raw_amount - previous.raw_amount;
        } else {
            totals.crowdsale_amount += amount - previous.amount;
            totals.crowdsale_raw += raw_amount - previous.raw_amount;
            if totals.crowdsale_raw > Self::max_crowdsale_cap(env.clone()) {
                return Err(CrowdsaleError::CapExceeded);
            }
        }

        Self::add_to(&env, DataKey::CrowdsaleAmountBy(previous.purchaser.clone()), -previous.amount);
        Self::add_to(&env, DataKey::CrowdsaleAmountBy(purchaser.clone()), amount);
        if purchaser != previous.purchaser {
            Self::index_purchase(&env, &purchaser, index);
        }

        let amended = CrowdsalePurchase {
            purchaser: purchaser.clone(),
            amount,
            raw_amount,
            purchased_at,
            data,
            bonus_percent,
            presale: previous.presale,
            invalidated: false,
            delivered: false,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Purchase(index), &amended);
        env.storage().persistent().set(&DataKey::Totals, &totals);
        env.events().publish(
            (EVENT_AMEND, previous.purchaser, purchaser),
            (index, previous.amount, amount),
        );
        Ok(())
    }

    /// Zero an undelivered ledger entry after the sale ended. Its value leaves
    /// every total and it is never delivered.
    pub fn invalidate_purchase(env: Env, index: u32) -> Result<(), CrowdsaleError> {
        Self::require_operator(&env)?;
        Self::require_ended(&env)?;
        let mut purchase = Self::correctable_purchase(&env, index)?;

        let mut totals = Self::get_totals(env.clone());
        if purchase.presale {
            totals.presale_amount -= purchase.amount;
            totals.presale_raw -= purchase.raw_amount;
        } else {
            totals.crowdsale_amount -= purchase.amount;
            totals.crowdsale_raw -= purchase.raw_amount;
        }
        Self::add_to(
            &env,
            DataKey::CrowdsaleAmountBy(purchase.purchaser.clone()),
            -purchase.amount,
        );

        purchase.invalidated = true;
        env.storage()
            .persistent()
            .set(&DataKey::Purchase(index), &purchase);
        env.storage().persistent().set(&DataKey::Totals, &totals);
        env.events().publish(
            (EVENT_INVALIDATE, purchase.purchaser),
            (index, purchase.amount, purchase.raw_amount),
        );
        Ok(())
    }

    // ── Delivery ─────────────────────────────────────────────────

    /// Credit tokens for loaded early entries, then for ledger entries, walking
    /// at most `max_entries` entries (0 = up to MAX_BATCH_ENTRIES) from the
    /// delivery cursors. Entries already delivered or invalidated are passed
    /// over but still count against the budget.
    ///
    /// Anyone may call this once the sale has ended.
    pub fn deliver_purchased_tokens(env: Env, max_entries: u32) -> Result<DeliveryProgress, CrowdsaleError> {
        let token_ledger = Self::require_deliverable(&env)?;
        let snapshot = Self::settlement_snapshot(&env)?;
        let mut budget = batch_budget(max_entries);
        let mut cursors = Self::get_cursors(env.clone());
        let early_count = Self::num_of_loaded_early_purchases(env.clone());
        let purchase_count = Self::num_of_purchases(env.clone());

        let mut credited: i128 = 0;
        while budget > 0 && cursors.delivered_early < early_count {
            credited += Self::deliver_early_entry(&env, &token_ledger, &snapshot, cursors.delivered_early, None);
            cursors.delivered_early += 1;
            budget -= 1;
        }
        while budget > 0 && cursors.delivered_crowdsale < purchase_count {
            credited += Self::deliver_purchase_entry(
                &env,
                &token_ledger,
                &snapshot,
                cursors.delivered_crowdsale,
                None,
            );
            cursors.delivered_crowdsale += 1;
            budget -= 1;
        }
        env.storage().persistent().set(&DataKey::Cursors, &cursors);

        let complete =
            cursors.delivered_early >= early_count && cursors.delivered_crowdsale >= purchase_count;
        env.events().publish(
            (EVENT_DELIVER,),
            (cursors.delivered_early, cursors.delivered_crowdsale, credited),
        );
        Ok(DeliveryProgress {
            delivered_early: cursors.delivered_early,
            delivered_crowdsale: cursors.delivered_crowdsale,
            complete,
        })
    }

    /// Credit tokens for the purchaser's own entries, walking at most
    /// `max_entries` of them. Returns the tokens credited by this call; a
    /// purchaser with nothing left to deliver gets 0.
    pub fn withdraw_purchased_tokens(
        env: Env,
        purchaser: Address,
        max_entries: u32,
    ) -> Result<i128, CrowdsaleError> {
        purchaser.require_auth();
        let token_ledger = Self::require_deliverable(&env)?;
        let snapshot = Self::settlement_snapshot(&env)?;
        let mut budget = batch_budget(max_entries);

        let cursor_key = DataKey::WithdrawCursor(purchaser.clone());
        let mut cursor: WithdrawCursor = env
            .storage()
            .persistent()
            .get(&cursor_key)
            .unwrap_or_default();
        let early_entries = Self::index_list(&env, DataKey::EarlyEntriesOf(purchaser.clone()));
        let purchases = Self::index_list(&env, DataKey::PurchasesOf(purchaser.clone()));

        let mut credited: i128 = 0;
        while budget > 0 && cursor.early < early_entries.len() {
            if let Some(index) = early_entries.get(cursor.early) {
                credited +=
                    Self::deliver_early_entry(&env, &token_ledger, &snapshot, index, Some(&purchaser));
            }
            cursor.early += 1;
            budget -= 1;
        }
        while budget > 0 && cursor.crowdsale < purchases.len() {
            if let Some(index) = purchases.get(cursor.crowdsale) {
                credited +=
                    Self::deliver_purchase_entry(&env, &token_ledger, &snapshot, index, Some(&purchaser));
            }
            cursor.crowdsale += 1;
            budget -= 1;
        }
        env.storage().persistent().set(&cursor_key, &cursor);

        if credited > 0 {
            env.events().publish((EVENT_WITHDRAW, purchaser), credited);
        }
        Ok(credited)
    }

    /// Sweep the whole payment-token balance to the treasury.
    pub fn withdraw_funds(env: Env) -> Result<i128, CrowdsaleError> {
        Self::require_operator(&env)?;
        let config = Self::read_config(&env)?;
        let client = token::Client::new(&env, &config.payment_token);
        let contract_addr = env.current_contract_address();
        let balance = client.balance(&contract_addr);
        if balance <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        client.transfer(&contract_addr, &config.treasury, &balance);
        env.events()
            .publish((EVENT_SWEEP, config.treasury), balance);
        Ok(balance)
    }

    // ── Views ────────────────────────────────────────────────────

    pub fn get_operator(env: Env) -> Option<Address> {
        env.storage().persistent().get(&DataKey::Operator)
    }

    pub fn get_config(env: Env) -> Option<SaleConfig> {
        env.storage().persistent().get(&DataKey::Config)
    }

    pub fn get_token_ledger(env: Env) -> Option<Address> {
        env.storage().persistent().get(&DataKey::TokenLedger)
    }

    pub fn get_purchasable_from(env: Env) -> Option<u32> {
        env.storage().persistent().get(&DataKey::PurchasableFrom)
    }

    pub fn payment_rate(env: Env) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::PaymentRate)
            .unwrap_or(0)
    }

    pub fn offchain_rate(env: Env) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::OffchainRate)
            .unwrap_or(0)
    }

    pub fn get_sale_state(env: Env) -> SaleState {
        if env.storage().persistent().has(&DataKey::EndedAt) {
            SaleState::Ended
        } else if env.storage().persistent().has(&DataKey::StartDate) {
            SaleState::Open
        } else {
            SaleState::NotStarted
        }
    }

    /// Opening timestamp, or 0 before the sale opened.
    pub fn start_date(env: Env) -> u64 {
        env.storage()
            .persistent()
            .get(&DataKey::StartDate)
            .unwrap_or(0)
    }

    /// Closing timestamp, or 0 while the sale has not ended.
    pub fn ended_at(env: Env) -> u64 {
        env.storage()
            .persistent()
            .get(&DataKey::EndedAt)
            .unwrap_or(0)
    }

    pub fn is_ended(env: Env) -> bool {
        env.storage().persistent().has(&DataKey::EndedAt)
    }

    pub fn get_totals(env: Env) -> SaleTotals {
        env.storage()
            .persistent()
            .get(&DataKey::Totals)
            .unwrap_or_default()
    }

    /// Early, presale and crowdsale value with bonus.
    pub fn total_raised_amount(env: Env) -> i128 {
        Self::get_totals(env).total_raised()
    }

    /// Crowdsale ceiling. Until early purchases finish loading this is a
    /// running estimate over the entries loaded so far.
    pub fn max_crowdsale_cap(env: Env) -> i128 {
        if let Some(cap) = env.storage().persistent().get(&DataKey::MaxCrowdsaleCap) {
            return cap;
        }
        match Self::get_config(env.clone()) {
            Some(config) => {
                core::cmp::max(config.max_cap - Self::get_totals(env).early_raw, 0)
            }
            None => 0,
        }
    }

    pub fn early_purchases_loaded(env: Env) -> bool {
        env.storage()
            .persistent()
            .get(&DataKey::EarlyPurchasesLoaded)
            .unwrap_or(false)
    }

    pub fn get_cursors(env: Env) -> Cursors {
        env.storage()
            .persistent()
            .get(&DataKey::Cursors)
            .unwrap_or_default()
    }

    pub fn num_of_purchases(env: Env) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::PurchaseCount)
            .unwrap_or(0)
    }

    pub fn get_purchase(env: Env, index: u32) -> Option<CrowdsalePurchase> {
        env.storage().persistent().get(&DataKey::Purchase(index))
    }

    /// Ledger indices recorded for `purchaser`, in append order. May include
    /// entries since amended over to another purchaser.
    pub fn get_purchase_indices(env: Env, purchaser: Address) -> Vec<u32> {
        Self::index_list(&env, DataKey::PurchasesOf(purchaser))
    }

    /// Number of early entries copied in so far. Invalidated source entries
    /// are not counted.
    pub fn num_of_loaded_early_purchases(env: Env) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::EarlyEntryCount)
            .unwrap_or(0)
    }

    pub fn get_loaded_early_purchase(env: Env, index: u32) -> Option<LoadedEarlyPurchase> {
        env.storage().persistent().get(&DataKey::EarlyEntry(index))
    }

    /// Early-purchase value with bonus loaded for `purchaser`.
    pub fn early_purchased_amount_by(env: Env, purchaser: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::EarlyAmountBy(purchaser))
            .unwrap_or(0)
    }

    /// Crowdsale and presale value with bonus over the purchaser's live entries.
    pub fn crowdsale_purchase_amount_by(env: Env, purchaser: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::CrowdsaleAmountBy(purchaser))
            .unwrap_or(0)
    }

    pub fn delivered_tokens_on_early(env: Env, purchaser: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::DeliveredOnEarly(purchaser))
            .unwrap_or(0)
    }

    pub fn delivered_tokens_on_crowdsale(env: Env, purchaser: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&DataKey::DeliveredOnCrowdsale(purchaser))
            .unwrap_or(0)
    }

    pub fn get_settlement(env: Env) -> Option<SettlementSnapshot> {
        env.storage().persistent().get(&DataKey::Settlement)
    }

    /// Bonus percent the next crowdsale unit would receive right now.
    pub fn current_bonus_percent(env: Env) -> u32 {
        let Some(config) = Self::get_config(env.clone()) else {
            return 0;
        };
        let elapsed = match env
            .storage()
            .persistent()
            .get::<DataKey, u64>(&DataKey::StartDate)
        {
            Some(start) => env.ledger().timestamp().saturating_sub(start),
            None => 0,
        };
        let ctx = TierContext {
            raised: Self::get_totals(env).crowdsale_raw,
            elapsed,
        };
        config.bonus_scheme.schedule().apply(1, &ctx).percent
    }
}

/// Effective per-call entry budget.
fn batch_budget(max_entries: u32) -> u32 {
    if max_entries == 0 || max_entries > MAX_BATCH_ENTRIES {
        MAX_BATCH_ENTRIES
    } else {
        max_entries
    }
}

impl Crowdsale {
    fn read_config(env: &Env) -> Result<SaleConfig, CrowdsaleError> {
        env.storage()
            .persistent()
            .get(&DataKey::Config)
            .ok_or(CrowdsaleError::NotInitialized)
    }

    fn require_operator(env: &Env) -> Result<Address, CrowdsaleError> {
        let operator: Address = env
            .storage()
            .persistent()
            .get(&DataKey::Operator)
            .ok_or(CrowdsaleError::NotInitialized)?;
        operator.require_auth();
        Ok(operator)
    }

    fn require_ended(env: &Env) -> Result<(), CrowdsaleError> {
        if !env.storage().persistent().has(&DataKey::EndedAt) {
            return Err(CrowdsaleError::InvalidState);
        }
        Ok(())
    }

    fn listed_partner(env: &Env, partner: &Address) -> Result<QualifiedPartner, CrowdsaleError> {
        match Self::get_qualified_partner(env.clone(), partner.clone()) {
            Some(record) if record.listed => Ok(record),
            _ => Err(CrowdsaleError::NotQualified),
        }
    }

    fn add_to(env: &Env, key: DataKey, delta: i128) {
        let current: i128 = env.storage().persistent().get(&key).unwrap_or(0);
        env.storage().persistent().set(&key, &(current + delta));
    }

    fn index_list(env: &Env, key: DataKey) -> Vec<u32> {
        env.storage()
            .persistent()
            .get(&key)
            .unwrap_or_else(|| Vec::new(env))
    }

    fn index_purchase(env: &Env, purchaser: &Address, index: u32) {
        let key = DataKey::PurchasesOf(purchaser.clone());
        let mut indices = Self::index_list(env, key.clone());
        indices.push_back(index);
        env.storage().persistent().set(&key, &indices);
    }

    /// Presale window: the sale has not opened and its start ledger is unset
    /// or still ahead.
    fn in_presale_window(env: &Env) -> bool {
        if env.storage().persistent().has(&DataKey::StartDate) {
            return false;
        }
        match env
            .storage()
            .persistent()
            .get::<DataKey, u32>(&DataKey::PurchasableFrom)
        {
            Some(from) => env.ledger().sequence() < from,
            None => true,
        }
    }

    /// Start the sale now. Requires the start ledger to have been reached and
    /// the crowdsale cap to be fixed.
    fn open_sale(env: &Env) -> Result<u64, CrowdsaleError> {
        let from: u32 = env
            .storage()
            .persistent()
            .get(&DataKey::PurchasableFrom)
            .ok_or(CrowdsaleError::NotSetUp)?;
        if env.ledger().sequence() < from {
            return Err(CrowdsaleError::InvalidState);
        }
        if !Self::early_purchases_loaded(env.clone()) {
            return Err(CrowdsaleError::EarlyPurchasesNotLoaded);
        }
        let now = env.ledger().timestamp();
        env.storage().persistent().set(&DataKey::StartDate, &now);
        env.events().publish((EVENT_STARTED,), now);
        Ok(now)
    }

    fn close_sale(env: &Env, ended_at: u64) {
        env.storage().persistent().set(&DataKey::EndedAt, &ended_at);
        let totals = Self::get_totals(env.clone());
        env.events()
            .publish((EVENT_ENDED,), (ended_at, totals.crowdsale_raw, totals.total_raised()));
    }

    /// Start date of an accepting sale, opening it if this is the first
    /// purchase past the start ledger.
    fn accepting_since(env: &Env, totals: &SaleTotals) -> Result<u64, CrowdsaleError> {
        if env.storage().persistent().has(&DataKey::EndedAt) {
            if totals.crowdsale_raw >= Self::max_crowdsale_cap(env.clone()) {
                return Err(CrowdsaleError::CapExceeded);
            }
            return Err(CrowdsaleError::InvalidState);
        }
        match env.storage().persistent().get(&DataKey::StartDate) {
            Some(start) => Ok(start),
            None => Self::open_sale(env),
        }
    }

    /// Convert a payment-token amount to settlement currency.
    fn to_settlement(env: &Env, config: &SaleConfig, amount: i128) -> Result<(i128, i128), CrowdsaleError> {
        if amount <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        let rate = Self::payment_rate(env.clone());
        if rate <= 0 {
            return Err(CrowdsaleError::RateNotSet);
        }
        let decimals = token::Client::new(env, &config.payment_token).decimals();
        let unit = 10i128
            .checked_pow(decimals)
            .ok_or(CrowdsaleError::InvalidAmount)?;
        let raw = amount
            .checked_mul(rate)
            .ok_or(CrowdsaleError::InvalidAmount)?
            / unit;
        if raw == 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        Ok((raw, rate))
    }

    /// Payment-token share of `paid` matching the unaccepted part of `raw`.
    fn refund_for(paid: i128, raw: i128, accepted: i128) -> Result<i128, CrowdsaleError> {
        if accepted >= raw {
            return Ok(0);
        }
        let share = paid
            .checked_mul(raw - accepted)
            .ok_or(CrowdsaleError::InvalidAmount)?;
        Ok(share / raw)
    }

    /// Pull the payment in, then send back the refund and any commission.
    fn collect_payment(env: &Env, config: &SaleConfig, payer: &Address, paid: i128, refund: i128, commission: i128) {
        let client = token::Client::new(env, &config.payment_token);
        let contract_addr = env.current_contract_address();
        client.transfer(payer, &contract_addr, &paid);
        if refund > 0 {
            client.transfer(&contract_addr, payer, &refund);
            env.events().publish((EVENT_REFUND, payer.clone()), refund);
        }
        if commission > 0 {
            client.transfer(&contract_addr, payer, &commission);
            env.events()
                .publish((EVENT_COMMISSION, payer.clone()), commission);
        }
    }

    fn pay(env: &Env, purchaser: &Address, amount: i128) -> Result<PurchaseReceipt, CrowdsaleError> {
        let config = Self::read_config(env)?;
        let (raw, rate) = Self::to_settlement(env, &config, amount)?;
        let data = String::from_str(env, "");
        let fill = Self::settle(env, &config, purchaser, raw, env.ledger().timestamp(), &data, Pricing::Schedule)?;
        let refunded = Self::refund_for(amount, raw, fill.accepted)?;
        Self::collect_payment(env, &config, purchaser, amount, refunded, 0);

        env.events().publish(
            (EVENT_PURCHASE, purchaser.clone()),
            (fill.index, fill.bonus.amount, fill.accepted, rate, fill.bonus.percent),
        );
        Ok(PurchaseReceipt {
            index: fill.index,
            amount: fill.bonus.amount,
            raw_amount: fill.accepted,
            bonus_percent: fill.bonus.percent,
            refunded,
            commission: 0,
        })
    }

    fn pay_as_partner(env: &Env, partner: &Address, amount: i128) -> Result<PurchaseReceipt, CrowdsaleError> {
        let config = Self::read_config(env)?;
        let mut record = Self::listed_partner(env, partner)?;
        let (raw, rate) = Self::to_settlement(env, &config, amount)?;
        if record.amount + raw > record.cap {
            return Err(CrowdsaleError::OverPartnerCap);
        }

        let presale = Self::in_presale_window(env);
        let pricing = if presale { Pricing::Presale } else { Pricing::Partner };
        let data = String::from_str(env, "");
        let fill = Self::settle(env, &config, partner, raw, env.ledger().timestamp(), &data, pricing)?;
        record.amount += fill.accepted;
        env.storage()
            .persistent()
            .set(&DataKey::Partner(partner.clone()), &record);

        let refunded = Self::refund_for(amount, raw, fill.accepted)?;
        let commission = (amount - refunded)
            .checked_mul(record.commission_percent as i128)
            .ok_or(CrowdsaleError::InvalidAmount)?
            / PERCENT_DENOMINATOR;
        Self::collect_payment(env, &config, partner, amount, refunded, commission);

        let topic = if presale { EVENT_PRESALE } else { EVENT_PURCHASE };
        env.events().publish(
            (topic, partner.clone()),
            (fill.index, fill.bonus.amount, fill.accepted, rate, fill.bonus.percent),
        );
        Ok(PurchaseReceipt {
            index: fill.index,
            amount: fill.bonus.amount,
            raw_amount: fill.accepted,
            bonus_percent: fill.bonus.percent,
            refunded,
            commission,
        })
    }

    /// Price `raw` settlement-currency units and append them to the ledger.
    /// Presale entries take the flat presale bonus and bypass the cap; every
    /// other entry is clipped to the remaining headroom and ends the sale when
    /// it consumes the last unit. Partners keep the presale bonus after start.
    fn settle(
        env: &Env,
        config: &SaleConfig,
        purchaser: &Address,
        raw: i128,
        purchased_at: u64,
        data: &String,
        pricing: Pricing,
    ) -> Result<Fill, CrowdsaleError> {
        let presale = pricing == Pricing::Presale;
        let mut totals = Self::get_totals(env.clone());
        let (accepted, bonus) = if presale {
            let percent = config.presale_bonus_percent;
            let bonus = Bonus {
                amount: with_flat_bonus(raw, percent),
                percent,
            };
            totals.presale_amount += bonus.amount;
            totals.presale_raw += raw;
            (raw, bonus)
        } else {
            let start_date = Self::accepting_since(env, &totals)?;
            let cap = Self::max_crowdsale_cap(env.clone());
            let headroom = cap - totals.crowdsale_raw;
            if headroom <= 0 {
                return Err(CrowdsaleError::CapExceeded);
            }
            let accepted = core::cmp::min(raw, headroom);
            let ctx = TierContext {
                raised: totals.crowdsale_raw,
                elapsed: env.ledger().timestamp().saturating_sub(start_date),
            };
            let bonus = match pricing {
                Pricing::Partner => Bonus {
                    amount: with_flat_bonus(accepted, config.presale_bonus_percent),
                    percent: config.presale_bonus_percent,
                },
                _ => config.bonus_scheme.schedule().apply(accepted, &ctx),
            };
            totals.crowdsale_amount += bonus.amount;
            totals.crowdsale_raw += accepted;
            (accepted, bonus)
        };

        let index = Self::num_of_purchases(env.clone());
        let purchase = CrowdsalePurchase {
            purchaser: purchaser.clone(),
            amount: bonus.amount,
            raw_amount: accepted,
            purchased_at,
            data: data.clone(),
            bonus_percent: bonus.percent,
            presale,
            invalidated: false,
            delivered: false,
        };
        env.storage()
            .persistent()
            .set(&DataKey::Purchase(index), &purchase);
        env.storage()
            .persistent()
            .set(&DataKey::PurchaseCount, &(index + 1));
        Self::index_purchase(env, purchaser, index);
        Self::add_to(env, DataKey::CrowdsaleAmountBy(purchaser.clone()), bonus.amount);
        env.storage().persistent().set(&DataKey::Totals, &totals);

        if !presale && totals.crowdsale_raw >= Self::max_crowdsale_cap(env.clone()) {
            Self::close_sale(env, env.ledger().timestamp());
        }

        Ok(Fill {
            index,
            accepted,
            bonus,
        })
    }

    fn append_early_entry(env: &Env, entry: LoadedEarlyPurchase) {
        let index = Self::num_of_loaded_early_purchases(env.clone());
        let list_key = DataKey::EarlyEntriesOf(entry.purchaser.clone());
        let mut indices = Self::index_list(env, list_key.clone());
        indices.push_back(index);
        env.storage().persistent().set(&list_key, &indices);
        Self::add_to(env, DataKey::EarlyAmountBy(entry.purchaser.clone()), entry.amount);
        env.storage()
            .persistent()
            .set(&DataKey::EarlyEntry(index), &entry);
        env.storage()
            .persistent()
            .set(&DataKey::EarlyEntryCount, &(index + 1));
    }

    fn correctable_purchase(env: &Env, index: u32) -> Result<CrowdsalePurchase, CrowdsaleError> {
        let purchase = Self::get_purchase(env.clone(), index).ok_or(CrowdsaleError::PurchaseNotFound)?;
        if purchase.delivered {
            return Err(CrowdsaleError::AlreadyDelivered);
        }
        if purchase.invalidated {
            return Err(CrowdsaleError::InvalidState);
        }
        // Delivered tokens were priced against the frozen totals.
        if env.storage().persistent().has(&DataKey::Settlement) {
            return Err(CrowdsaleError::InvalidState);
        }
        Ok(purchase)
    }

    /// Delivery preconditions; returns the token ledger to credit.
    fn require_deliverable(env: &Env) -> Result<Address, CrowdsaleError> {
        Self::require_ended(env)?;
        if !Self::early_purchases_loaded(env.clone()) {
            return Err(CrowdsaleError::EarlyPurchasesNotLoaded);
        }
        Self::get_token_ledger(env.clone()).ok_or(CrowdsaleError::NotSetUp)
    }

    fn settlement_snapshot(env: &Env) -> Result<SettlementSnapshot, CrowdsaleError> {
        if let Some(snapshot) = Self::get_settlement(env.clone()) {
            return Ok(snapshot);
        }
        let config = Self::read_config(env)?;
        let snapshot = SettlementSnapshot::freeze(
            &Self::get_totals(env.clone()),
            config.crowdsale_token_allocation,
            config.early_token_allocation,
        );
        env.storage()
            .persistent()
            .set(&DataKey::Settlement, &snapshot);
        Ok(snapshot)
    }

    /// Credit one loaded early entry unless already delivered. With `owner`
    /// set, entries of other purchasers are left alone.
    fn deliver_early_entry(
        env: &Env,
        token_ledger: &Address,
        snapshot: &SettlementSnapshot,
        index: u32,
        owner: Option<&Address>,
    ) -> i128 {
        let key = DataKey::EarlyEntry(index);
        let Some(mut entry) = env
            .storage()
            .persistent()
            .get::<DataKey, LoadedEarlyPurchase>(&key)
        else {
            return 0;
        };
        if entry.delivered || owner.map_or(false, |o| *o != entry.purchaser) {
            return 0;
        }
        let tokens = snapshot.early_purchase_tokens(entry.amount);
        if tokens > 0 {
            TokenLedgerClient::new(env, token_ledger).credit_tokens(&entry.purchaser, &tokens);
        }
        Self::add_to(env, DataKey::DeliveredOnEarly(entry.purchaser.clone()), tokens);
        entry.delivered = true;
        env.storage().persistent().set(&key, &entry);
        tokens
    }

    /// Credit one ledger entry unless already delivered or invalidated. With
    /// `owner` set, entries amended over to another purchaser are left alone.
    fn deliver_purchase_entry(
        env: &Env,
        token_ledger: &Address,
        snapshot: &SettlementSnapshot,
        index: u32,
        owner: Option<&Address>,
    ) -> i128 {
        let key = DataKey::Purchase(index);
        let Some(mut purchase) = env
            .storage()
            .persistent()
            .get::<DataKey, CrowdsalePurchase>(&key)
        else {
            return 0;
        };
        if purchase.delivered
            || purchase.invalidated
            || owner.map_or(false, |o| *o != purchase.purchaser)
        {
            return 0;
        }
        let tokens = snapshot.crowdsale_tokens(purchase.amount);
        if tokens > 0 {
            TokenLedgerClient::new(env, token_ledger).credit_tokens(&purchase.purchaser, &tokens);
        }
        Self::add_to(env, DataKey::DeliveredOnCrowdsale(purchase.purchaser.clone()), tokens);
        purchase.delivered = true;
        env.storage().persistent().set(&key, &purchase);
        tokens
    }
}

mod test;
mod test_auth;
mod test_batch;
mod test_bonus;
mod test_early_purchase;
mod test_props;
mod test_mocks;
