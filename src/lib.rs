//! Transaction verification and simulation engine.
//!
//! Pending transactions arrive encrypted over a relay. They are decrypted
//! ([`cipher`]), normalized ([`normalizer`]), hashed the way a hardware
//! wallet hashes them ([`hash`]) and simulated ([`simulation`]) so the
//! resulting asset changes ([`events`]) can be shown before signing.

pub mod api;
pub mod cipher;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod normalizer;
pub mod payload;
pub mod relay;
pub mod review;
pub mod rpc;
pub mod safe;
pub mod selectors;
pub mod simulation;
pub mod tokens;
pub mod transaction;
pub mod types;

pub use error::ReviewError;
pub use review::{ReviewOutcome, Reviewer};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
