//! Billing rule engine for per-treatment ledger generation
//!
//! Folds an ordered stream of joined clinical-financial facts into
//! idempotent billing ledger entries:
//! - Consultation fee charged once per consultation
//! - Payment-model dispatch (copay, dental discount, self-pay default)
//! - Skip-if-exists keyed by treatment id, safe to re-run
//!
//! Storage is a collaborator behind the [`FactSource`] and [`LedgerSink`]
//! traits; this crate contains no SQL.

pub mod error;
pub mod generator;
pub mod models;

pub use error::*;
pub use generator::*;
pub use models::*;
