//! Amendable ledger of purchases made before the crowdsale engine existed.
//!
//! The owner appends entries while the ledger is open, closes it, and may
//! later invalidate or amend individual entries. The crowdsale engine reads
//! it by index through [`EarlyPurchaseSource`](crate::collaborators::EarlyPurchaseSource).
use soroban_sdk::{contract, contractimpl, contracttype, symbol_short, Address, Env, Symbol};

use crate::collaborators::EarlyPurchase;
use crate::CrowdsaleError;

const EVENT_EP_INIT: Symbol = symbol_short!("ep_init");
const EVENT_EP_ADD: Symbol = symbol_short!("ep_add");
const EVENT_EP_CLOSE: Symbol = symbol_short!("ep_close");
const EVENT_EP_AMEND: Symbol = symbol_short!("ep_amend");
const EVENT_EP_INVALID: Symbol = symbol_short!("ep_inval");

#[contracttype]
pub enum RegistryKey {
    Owner,
    /// Ledger timestamp the registry was closed at; absent while open.
    ClosedAt,
    /// Number of appended entries, invalidated ones included.
    EntryCount,
    Entry(u32),
    /// Number of entries not invalidated.
    ValidCount,
    /// Sum of amounts over entries not invalidated.
    TotalAmount,
    AmountBy(Address),
}

#[contract]
pub struct EarlyPurchaseRegistry;

#[contractimpl]
impl EarlyPurchaseRegistry {
    /// Set the owner. Can only be called once.
    pub fn initialize_registry(env: Env, owner: Address) -> Result<(), CrowdsaleError> {
        if env.storage().persistent().has(&RegistryKey::Owner) {
            return Err(CrowdsaleError::AlreadyInitialized);
        }
        owner.require_auth();
        env.storage().persistent().set(&RegistryKey::Owner, &owner);
        env.events().publish((EVENT_EP_INIT, owner), ());
        Ok(())
    }

    /// Append an entry. Rejected once the registry is closed.
    pub fn append_early_purchase(
        env: Env,
        purchaser: Address,
        amount: i128,
        purchased_at: u64,
    ) -> Result<u32, CrowdsaleError> {
        Self::require_owner(&env)?;
        if env.storage().persistent().has(&RegistryKey::ClosedAt) {
            return Err(CrowdsaleError::InvalidState);
        }
        if amount <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        if purchased_at > env.ledger().timestamp() {
            return Err(CrowdsaleError::InvalidTimestamp);
        }

        let index = Self::early_purchase_count(env.clone());
        let entry = EarlyPurchase {
            purchaser: purchaser.clone(),
            amount,
            purchased_at,
            invalidated: false,
        };
        env.storage()
            .persistent()
            .set(&RegistryKey::Entry(index), &entry);
        env.storage()
            .persistent()
            .set(&RegistryKey::EntryCount, &(index + 1));
        Self::credit_valid(&env, &purchaser, amount, 1);

        env.events()
            .publish((EVENT_EP_ADD, purchaser), (index, amount, purchased_at));
        Ok(index)
    }

    /// Close the registry to further appends. Idempotent.
    pub fn close_early_purchase(env: Env) -> Result<u64, CrowdsaleError> {
        Self::require_owner(&env)?;
        if let Some(closed_at) = env
            .storage()
            .persistent()
            .get::<RegistryKey, u64>(&RegistryKey::ClosedAt)
        {
            return Ok(closed_at);
        }
        let now = env.ledger().timestamp();
        env.storage().persistent().set(&RegistryKey::ClosedAt, &now);
        env.events().publish((EVENT_EP_CLOSE,), now);
        Ok(now)
    }

    /// Mark an entry invalid. Its amount no longer counts anywhere.
    pub fn invalidate_early_purchase(env: Env, index: u32) -> Result<(), CrowdsaleError> {
        Self::require_owner(&env)?;
        let mut entry = Self::read_entry(&env, index)?;
        if entry.invalidated {
            return Err(CrowdsaleError::InvalidState);
        }
        Self::credit_valid(&env, &entry.purchaser, -entry.amount, -1);
        entry.invalidated = true;
        env.storage()
            .persistent()
            .set(&RegistryKey::Entry(index), &entry);
        env.events()
            .publish((EVENT_EP_INVALID, entry.purchaser), index);
        Ok(())
    }

    /// Replace purchaser, amount and timestamp of a valid entry.
    pub fn amend_early_purchase(
        env: Env,
        index: u32,
        purchaser: Address,
        amount: i128,
        purchased_at: u64,
    ) -> Result<(), CrowdsaleError> {
        Self::require_owner(&env)?;
        let entry = Self::read_entry(&env, index)?;
        if entry.invalidated {
            return Err(CrowdsaleError::InvalidState);
        }
        if amount <= 0 {
            return Err(CrowdsaleError::ZeroValue);
        }
        if purchased_at > env.ledger().timestamp() {
            return Err(CrowdsaleError::InvalidTimestamp);
        }

        Self::credit_valid(&env, &entry.purchaser, -entry.amount, 0);
        Self::credit_valid(&env, &purchaser, amount, 0);
        let amended = EarlyPurchase {
            purchaser: purchaser.clone(),
            amount,
            purchased_at,
            invalidated: false,
        };
        env.storage()
            .persistent()
            .set(&RegistryKey::Entry(index), &amended);
        env.events().publish(
            (EVENT_EP_AMEND, entry.purchaser, purchaser),
            (index, entry.amount, amount),
        );
        Ok(())
    }

    // ── Source interface read by the crowdsale engine ────────────

    /// Number of appended entries, invalidated ones included.
    pub fn early_purchase_count(env: Env) -> u32 {
        env.storage()
            .persistent()
            .get(&RegistryKey::EntryCount)
            .unwrap_or(0)
    }

    /// Entry at `index` with its latest amended values.
    pub fn early_purchase_at(env: Env, index: u32) -> Result<EarlyPurchase, CrowdsaleError> {
        Self::read_entry(&env, index)
    }

    // ── Views ────────────────────────────────────────────────────

    pub fn get_registry_owner(env: Env) -> Option<Address> {
        env.storage().persistent().get(&RegistryKey::Owner)
    }

    /// Closing timestamp, or 0 while appends are still accepted.
    pub fn early_purchase_closed_at(env: Env) -> u64 {
        env.storage()
            .persistent()
            .get(&RegistryKey::ClosedAt)
            .unwrap_or(0)
    }

    /// Number of entries that are not invalidated.
    pub fn number_of_early_purchases(env: Env) -> u32 {
        env.storage()
            .persistent()
            .get(&RegistryKey::ValidCount)
            .unwrap_or(0)
    }

    pub fn total_amount_of_early_purchases(env: Env) -> i128 {
        env.storage()
            .persistent()
            .get(&RegistryKey::TotalAmount)
            .unwrap_or(0)
    }

    pub fn purchased_amount_by(env: Env, purchaser: Address) -> i128 {
        env.storage()
            .persistent()
            .get(&RegistryKey::AmountBy(purchaser))
            .unwrap_or(0)
    }
}

impl EarlyPurchaseRegistry {
    fn require_owner(env: &Env) -> Result<Address, CrowdsaleError> {
        let owner: Address = env
            .storage()
            .persistent()
            .get(&RegistryKey::Owner)
            .ok_or(CrowdsaleError::NotInitialized)?;
        owner.require_auth();
        Ok(owner)
    }

    fn read_entry(env: &Env, index: u32) -> Result<EarlyPurchase, CrowdsaleError> {
        env.storage()
            .persistent()
            .get(&RegistryKey::Entry(index))
            .ok_or(CrowdsaleError::PurchaseNotFound)
    }

    /// Apply `amount` to the valid totals of `purchaser` and move the valid
    /// entry count by `count_delta`.
    fn credit_valid(env: &Env, purchaser: &Address, amount: i128, count_delta: i32) {
        let store = env.storage().persistent();

        let by_key = RegistryKey::AmountBy(purchaser.clone());
        let by: i128 = store.get(&by_key).unwrap_or(0);
        store.set(&by_key, &(by + amount));

        let total: i128 = store.get(&RegistryKey::TotalAmount).unwrap_or(0);
        store.set(&RegistryKey::TotalAmount, &(total + amount));

        if count_delta != 0 {
            let count: u32 = store.get(&RegistryKey::ValidCount).unwrap_or(0);
            let next = (count as i64 + count_delta as i64).max(0) as u32;
            store.set(&RegistryKey::ValidCount, &next);
        }
    }
}
