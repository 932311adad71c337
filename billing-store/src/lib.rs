//! Postgres adapter for the billing engine
//!
//! Implements the engine's [`billing_engine::FactSource`] and
//! [`billing_engine::LedgerSink`] collaborators over the clinical schema:
//! the ordered five-table fact join, the ledger existence check, and
//! transactional insertion with an all-or-nothing commit per pass.

pub mod connection;
pub mod repository;

pub use connection::*;
pub use repository::*;
