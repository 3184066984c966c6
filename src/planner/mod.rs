//! FP-017: Planner interface.
//!
//! A planner turns a compiled problem into zero or more raw plans. Failures
//! travel on the response as values: timeouts and unsolvable problems are
//! ordinary answers, not errors.

pub mod cache;
pub mod command;
pub mod search;

use crate::compiler::CompiledProblem;
use crate::core::error::PlannerError;
use serde::Serialize;
use std::time::Duration;

pub use cache::CachedPlanner;
pub use command::CommandPlanner;
pub use search::SearchPlanner;

/// Default wall-clock budget for one planner call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A plan as the planner printed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawPlan {
    pub cost: u64,
    /// `(name arg …)` strings
    pub actions: Vec<String>,
}

/// Everything one planner call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlannerResponse {
    /// Cheapest first
    pub list_of_plans: Vec<RawPlan>,
    pub is_no_solution: bool,
    pub is_timeout: bool,
    pub error: Option<PlannerError>,
    pub planner_output: String,
    pub planner_error: String,
}

impl PlannerResponse {
    pub fn solved(mut plans: Vec<RawPlan>) -> Self {
        plans.sort_by_key(|p| p.cost);
        Self {
            list_of_plans: plans,
            ..Self::default()
        }
    }

    pub fn no_solution() -> Self {
        Self {
            is_no_solution: true,
            error: Some(PlannerError::NoSolution),
            ..Self::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            is_timeout: true,
            error: Some(PlannerError::Timeout),
            ..Self::default()
        }
    }

    pub fn failed(error: PlannerError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// The cheapest plan, if any.
    pub fn best(&self) -> Option<&RawPlan> {
        self.list_of_plans.first()
    }
}

/// Anything that can solve a compiled problem.
pub trait Planner {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse;
}

impl<P: Planner + ?Sized> Planner for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        (**self).plan(problem, timeout)
    }
}

impl<P: Planner + ?Sized> Planner for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        (**self).plan(problem, timeout)
    }
}

/// Run a planner and log the outcome.
pub fn run(planner: &dyn Planner, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
    tracing::info!(
        planner = planner.name(),
        actions = problem.domain.actions.len(),
        timeout_ms = timeout.as_millis() as u64,
        "planner call"
    );
    let response = planner.plan(problem, timeout);
    match (&response.error, response.best()) {
        (Some(e), _) => tracing::warn!(planner = planner.name(), error = %e, "planner failed"),
        (None, Some(best)) => tracing::info!(
            planner = planner.name(),
            plans = response.list_of_plans.len(),
            cost = best.cost,
            "planner solved"
        ),
        (None, None) => tracing::warn!(planner = planner.name(), "planner returned no plans"),
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp017_solved_sorts_by_cost() {
        let r = PlannerResponse::solved(vec![
            RawPlan {
                cost: 9,
                actions: vec!["(b)".into()],
            },
            RawPlan {
                cost: 3,
                actions: vec!["(a)".into()],
            },
        ]);
        assert_eq!(r.best().map(|p| p.cost), Some(3));
        assert!(!r.is_no_solution);
        assert!(r.error.is_none());
    }

    #[test]
    fn test_fp017_failure_flags() {
        let t = PlannerResponse::timeout();
        assert!(t.is_timeout && t.list_of_plans.is_empty());
        assert_eq!(t.error, Some(PlannerError::Timeout));
        let n = PlannerResponse::no_solution();
        assert!(n.is_no_solution && !n.is_timeout);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["is_no_solution"], serde_json::json!(true));
    }
}
