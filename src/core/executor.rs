//! FP-020: Executor: orchestration loop for one planning request.
//!
//! compile → planner → lift the best plan back into flow terms.
//! Validation has already happened by the time a `Flow` exists.

use super::builder::Flow;
use super::error::Error;
use super::options::CompileOptions;
use crate::compiler::{compile, CompiledProblem};
use crate::plan::parser::PlanParser;
use crate::plan::Plan;
use crate::planner::{self, Planner, PlannerResponse};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Result of one planning request.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub problem: CompiledProblem,
    pub response: PlannerResponse,
    /// Best plan in flow terms; `None` when the planner found none
    pub plan: Option<Plan>,
    pub duration: Duration,
}

impl PlanOutcome {
    pub fn is_solved(&self) -> bool {
        self.plan.is_some()
    }
}

/// Compile `flow`, run `planner`, and parse the cheapest plan.
pub fn plan_flow(
    flow: &Flow,
    options: &CompileOptions,
    planner: &dyn Planner,
    timeout: Duration,
) -> Result<PlanOutcome, Error> {
    let start = Instant::now();
    let problem = compile(flow, options)?;
    tracing::debug!(
        flow = %flow.name,
        actions = problem.domain.actions.len(),
        fingerprint = %problem.fingerprint(),
        "compiled flow"
    );

    let response = planner::run(planner, &problem, timeout);
    let plan = match response.best() {
        Some(best) => {
            let parser = PlanParser::new(flow.definition(), options, &problem);
            Some(parser.parse(best.cost, &best.actions)?)
        }
        None => None,
    };

    let duration = start.elapsed();
    tracing::info!(
        flow = %flow.name,
        solved = plan.is_some(),
        steps = plan.as_ref().map_or(0, Plan::len),
        duration_ms = duration.as_millis() as u64,
        "planning finished"
    );
    Ok(PlanOutcome {
        problem,
        response,
        plan,
        duration,
    })
}

/// Write `domain.pddl` and `problem.pddl` into `dir`, creating it if needed.
pub fn write_problem(problem: &CompiledProblem, dir: &Path) -> Result<(PathBuf, PathBuf), Error> {
    let io = |path: &Path, source: std::io::Error| Error::Io {
        path: path.display().to_string(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(|e| io(dir, e))?;
    let domain = dir.join("domain.pddl");
    let problem_path = dir.join("problem.pddl");
    std::fs::write(&domain, problem.domain_text()).map_err(|e| io(&domain, e))?;
    std::fs::write(&problem_path, problem.problem_text()).map_err(|e| io(&problem_path, e))?;
    Ok((domain, problem_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::basic_chain;
    use crate::core::builder::FlowBuilder;
    use crate::core::options::GoalType;
    use crate::core::types::*;
    use crate::plan::PlanStep;
    use crate::planner::{RawPlan, SearchPlanner};

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn solve(flow: &Flow, options: &CompileOptions) -> Plan {
        plan_flow(flow, options, &SearchPlanner::new(), TIMEOUT)
            .unwrap()
            .plan
            .unwrap()
    }

    #[test]
    fn test_fp020_basic_chain() {
        let plan = solve(&basic_chain(), &CompileOptions::default());
        let lines: Vec<String> = plan.steps.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "ask(db_link)",
                "errors = FindErrors(db_link)",
                "FixErrors(errors)"
            ]
        );
        assert_eq!(plan.cost, 100_002);
    }

    #[test]
    fn test_fp020_mapping() {
        let flow = FlowBuilder::new("credit")
            .operator(OperatorDefinition::new("UserInfo").with_outputs(["Username", "AccountID"]))
            .operator(
                OperatorDefinition::new("CreditScore")
                    .with_inputs(["Email", "Account Info"])
                    .with_outputs(["Credit"]),
            )
            .mapping(MappingItem::new("Username", "Email"))
            .mapping(MappingItem::new("AccountID", "Account Info"))
            .goal(GoalItems::new(vec![GoalItem::operator("CreditScore")]))
            .build()
            .unwrap();
        let plan = solve(&flow, &CompileOptions::default());
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.cost, 22);
        assert_eq!(plan.steps[0].name(), "UserInfo");
        assert_eq!(plan.steps[3].name(), "CreditScore");
        let maps: Vec<&PlanStep> = plan.steps[1..3].iter().collect();
        assert!(maps.contains(&&PlanStep::map("Username", "Email")));
        assert!(maps.contains(&&PlanStep::map("AccountID", "Account Info")));
    }

    #[test]
    fn test_fp020_retry_after_history() {
        let flow = FlowBuilder::new("retry")
            .operator(OperatorDefinition::new("A").with_outputs(["y"]).with_max_try(3))
            .history(Step::new("A"))
            .goal(GoalItems::new(vec![GoalItem::operator("A")]))
            .build()
            .unwrap();
        let plan = solve(&flow, &CompileOptions::default());
        assert_eq!(plan.operator_names(), vec!["A"]);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_fp020_partial_order() {
        let flow = FlowBuilder::new("order")
            .operator(OperatorDefinition::new("X").with_outputs(["x"]))
            .operator(OperatorDefinition::new("Y").with_outputs(["y"]))
            .operator(OperatorDefinition::new("Final").with_inputs(["x", "y"]))
            .operator(OperatorDefinition::new("Another").with_inputs(["x", "y"]))
            .partial_order("Final", "Another")
            .starts_with("X")
            .goal(GoalItems::new(vec![
                GoalItem::operator("Final"),
                GoalItem::operator("Another"),
            ]))
            .build()
            .unwrap();
        let plan = solve(&flow, &CompileOptions::default());
        let names = plan.operator_names();
        assert_eq!(names[0], "X");
        let pos = |n: &str| names.iter().position(|m| *m == n).unwrap();
        assert!(pos("Final") < pos("Another"));
        assert_eq!(plan.cost, 4);
    }

    #[test]
    fn test_fp020_and_or_picks_cheapest() {
        let flow = FlowBuilder::new("agents")
            .operator(OperatorDefinition::new("AgentX").with_cost(5))
            .operator(OperatorDefinition::new("AgentY").with_cost(2))
            .operator(OperatorDefinition::new("AgentA").with_cost(1))
            .operator(OperatorDefinition::new("AgentB").with_cost(3))
            .goal(GoalItems::new(vec![GoalItem::operator("AgentX"), GoalItem::operator("AgentY")]))
            .goal(GoalItems::new(vec![GoalItem::operator("AgentA"), GoalItem::operator("AgentB")]))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_goal_type(GoalType::AndOr);
        let plan = solve(&flow, &opts);
        let mut names = plan.operator_names();
        names.sort();
        assert_eq!(names, vec!["AgentA", "AgentY"]);
        assert_eq!(plan.cost, 3);
    }

    #[test]
    fn test_fp020_zero_probability_mapping_never_used() {
        let flow = FlowBuilder::new("forbidden")
            .operator(OperatorDefinition::new("Source").with_outputs(["a"]))
            .operator(OperatorDefinition::new("Sink").with_inputs(["b"]))
            .mapping(MappingItem::new("a", "b").with_probability(0.0))
            .goal(GoalItems::new(vec![GoalItem::operator("Sink")]))
            .build()
            .unwrap();
        let plan = solve(&flow, &CompileOptions::default());
        assert!(!plan.steps.iter().any(|s| matches!(s, PlanStep::Map { .. })));
        assert_eq!(plan.steps[0], PlanStep::ask("b"));
    }

    /// Answers with a fixed outcome and remembers nothing.
    struct Fixed(PlannerResponse);

    impl Planner for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn plan(&self, _: &CompiledProblem, _: Duration) -> PlannerResponse {
            self.0.clone()
        }
    }

    #[test]
    fn test_fp020_no_solution_is_not_an_error() {
        let planner = Fixed(PlannerResponse::no_solution());
        let out = plan_flow(&basic_chain(), &CompileOptions::default(), &planner, TIMEOUT).unwrap();
        assert!(!out.is_solved());
        assert!(out.response.is_no_solution);
    }

    #[test]
    fn test_fp020_unliftable_plan_is_an_error() {
        let planner = Fixed(PlannerResponse::solved(vec![RawPlan {
            cost: 1,
            actions: vec!["(nonsense x)".into()],
        }]));
        let result = plan_flow(&basic_chain(), &CompileOptions::default(), &planner, TIMEOUT);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_fp020_write_problem() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pddl");
        let problem = compile(&basic_chain(), &CompileOptions::default()).unwrap();
        let (domain, prob) = write_problem(&problem, &out).unwrap();
        let text = std::fs::read_to_string(domain).unwrap();
        assert!(text.contains("(define (domain errors)"));
        assert!(std::fs::read_to_string(prob).unwrap().contains("(:goal"));
    }
}
