//! Deployment ledger: append-only JSONL log, replay and BLAKE3 step digests.

pub mod eventlog;
pub mod hasher;
pub mod store;

pub use store::Ledger;
