//! Interfaces of the contracts the engine calls out to.
use soroban_sdk::{contractclient, contracttype, Address, Env};

/// One entry of the external early-purchase ledger, as it reads at load time.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct EarlyPurchase {
    pub purchaser: Address,
    /// Settlement-currency amount, without bonus.
    pub amount: i128,
    pub purchased_at: u64,
    pub invalidated: bool,
}

/// Token ledger of the token being sold. The engine is its only minter and
/// calls `credit_tokens` once per delivered ledger entry.
#[contractclient(name = "TokenLedgerClient")]
pub trait TokenLedger {
    fn credit_tokens(env: Env, to: Address, amount: i128);
}

/// Whitelist service gating unsolicited payments.
#[contractclient(name = "CertifierClient")]
pub trait Certifier {
    fn is_certified(env: Env, account: Address) -> bool;
}

#[contractclient(name = "EarlyPurchaseSourceClient")]
pub trait EarlyPurchaseSource {
    fn early_purchase_count(env: Env) -> u32;
    fn early_purchase_at(env: Env, index: u32) -> EarlyPurchase;
    /// Closing timestamp, or 0 while the source still takes appends.
    fn early_purchase_closed_at(env: Env) -> u64;
}
