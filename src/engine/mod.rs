pub mod ledger_tracker;
pub mod limiter;
pub mod retry;
pub mod seed_crypto;
pub mod signing;
pub mod strkey;

pub use ledger_tracker::{HorizonLedgerTracker, LedgerNumberTracker};
pub use limiter::AdmissionLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use seed_crypto::SeedEncrypter;
pub use signing::{SignatureService, StellarSignatureService};
