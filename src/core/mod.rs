//! Core infrastructure: flow model, parsing, validation, options, orchestration.

pub mod builder;
pub mod error;
pub mod executor;
pub mod options;
pub mod parser;
pub mod transform;
pub mod types;
