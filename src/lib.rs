//! flowplan: multi-agent workflows as cost-optimal planning problems.
//!
//! A flow (operators, memory, goals, mappings, slot preferences) compiles to
//! typed STRIPS with action costs. Plans from any cost-optimal planner lift
//! back into flow terms, and reference plans can be checked for soundness,
//! validity and optimality.

pub mod cli;
pub mod compiler;
pub mod core;
pub mod debug;
pub mod pddl;
pub mod plan;
pub mod planner;
