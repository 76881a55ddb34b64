//! chainplan: resumable, dependency-ordered deployment campaigns.
//!
//! Resolves a step graph into a deterministic plan, dispatches each step
//! exactly once through a resource client, and records every outcome in an
//! append-only ledger so an interrupted campaign resumes where it stopped.

pub mod cli;
pub mod client;
pub mod core;
pub mod export;
pub mod ledger;
