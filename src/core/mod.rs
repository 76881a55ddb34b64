//! Core engine: types, parsing, resolution, preview, execution.

pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;
