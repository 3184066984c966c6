//! FP-018: Reference-plan debugger.
//!
//! Checks a reference plan against a flow. SOUND asks whether the steps can
//! run in order; VALID whether they reach the goal without edits; OPTIMAL
//! whether they are also as cheap as the best plan.

pub mod diff;
pub mod tokens;

use crate::compiler::Compilation;
use crate::core::builder::Flow;
use crate::core::error::{DebugError, Error};
use crate::core::options::{CompileOptions, DebugFlag};
use crate::core::types::{Constraint, ReferencePlan, ReferenceStep, Step, TruthValue};
use crate::plan::parser::{split_action, PlanParser};
use crate::plan::{Plan, PlanStep};
use crate::planner::{self, Planner, PlannerResponse};
use diff::{align, Diff};
use serde::Serialize;
use std::time::Duration;
use tokens::{instrument, tokenize_index, untokenize_index, Instrumented, TokenMode};

/// Outcome of one debug call.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// `None` when the planner gave no answer
    pub determination: Option<bool>,
    pub plan_diff_obj: Vec<Diff>,
    pub plan_diff_str: Vec<String>,
    pub planner_response: PlannerResponse,
    pub invalid_steps: Vec<DebugError>,
}

impl Report {
    fn new(determination: Option<bool>, diff: Vec<Diff>, response: PlannerResponse, invalid: Vec<DebugError>) -> Self {
        Self {
            determination,
            plan_diff_str: diff.iter().map(|d| d.to_string()).collect(),
            plan_diff_obj: diff,
            planner_response: response,
            invalid_steps: invalid,
        }
    }

    fn unanswered(response: PlannerResponse, invalid: Vec<DebugError>) -> Self {
        Self::new(None, Vec::new(), response, invalid)
    }
}

/// A reference plan equivalent to a lifted plan.
pub fn reference_from_plan(plan: &Plan) -> ReferencePlan {
    let mut steps = Vec::new();
    for step in &plan.steps {
        match step {
            PlanStep::Ask { items } | PlanStep::Confirm { items } => {
                for item in items {
                    steps.push(ReferenceStep::Step(Step::new(step.name()).with_parameters([item])));
                }
            }
            PlanStep::Map { pairs } => {
                for (x, y) in pairs {
                    steps.push(ReferenceStep::Step(Step::new("map").with_parameters([x, y])));
                }
            }
            PlanStep::Operator {
                name, parameters, ..
            } => steps.push(ReferenceStep::Step(
                Step::new(name.clone()).with_parameters(parameters.iter().cloned()),
            )),
            PlanStep::Constraint {
                constraint,
                parameters,
                truth_value,
            } => {
                let truth = if *truth_value {
                    TruthValue::True
                } else {
                    TruthValue::False
                };
                steps.push(ReferenceStep::Constraint(
                    Constraint::new(constraint.clone())
                        .with_parameters(parameters.iter().cloned())
                        .with_truth(truth),
                ));
            }
        }
    }
    ReferencePlan { plan: steps }
}

/// Runs instrumented compilations through a planner.
pub struct Debugger<'p> {
    planner: &'p dyn Planner,
    timeout: Duration,
}

impl<'p> Debugger<'p> {
    pub fn new(planner: &'p dyn Planner, timeout: Duration) -> Self {
        Self { planner, timeout }
    }

    /// Check `reference` under `flag`.
    pub fn debug(
        &self,
        flow: &Flow,
        options: &CompileOptions,
        reference: &ReferencePlan,
        flag: DebugFlag,
    ) -> Result<Report, Error> {
        // Reference constraints need their check actions compiled
        let flow = if flow.reference.as_ref() == Some(reference) {
            flow.clone()
        } else {
            let mut def = flow.definition().clone();
            def.reference = Some(reference.clone());
            Flow::from_definition(def)?
        };
        tracing::info!(flow = %flow.name, steps = reference.plan.len(), %flag, "debugging reference plan");
        match flag {
            DebugFlag::Sound => self.tokenized(&flow, options, &reference.plan, TokenMode::Sound),
            DebugFlag::Valid => self.tokenized(&flow, options, &reference.plan, TokenMode::Valid),
            DebugFlag::Optimal => self.optimal(&flow, options, &reference.plan),
        }
    }

    /// Check the reference stored on the flow.
    pub fn debug_flow(&self, flow: &Flow, options: &CompileOptions, flag: DebugFlag) -> Result<Report, Error> {
        let reference = flow.reference.clone().unwrap_or_default();
        self.debug(flow, options, &reference, flag)
    }

    fn tokenized(
        &self,
        flow: &Flow,
        options: &CompileOptions,
        reference: &[ReferenceStep],
        mode: TokenMode,
    ) -> Result<Report, Error> {
        let (response, info, diff) = self.solve_tokenized(flow, options, reference, mode)?;
        let Some(diff) = diff else {
            return Ok(Report::unanswered(response, info.invalid));
        };
        let determination = !diff.iter().any(Diff::is_edit);
        Ok(Report::new(Some(determination), diff, response, info.invalid))
    }

    fn solve_tokenized(
        &self,
        flow: &Flow,
        options: &CompileOptions,
        reference: &[ReferenceStep],
        mode: TokenMode,
    ) -> Result<(PlannerResponse, Instrumented, Option<Vec<Diff>>), Error> {
        let mut comp = Compilation::build(flow, options)?;
        let info = instrument(&mut comp, reference, mode);
        let problem = comp.finish();
        let response = planner::run(self.planner, &problem, self.timeout);
        let diff = match response.best() {
            Some(best) => {
                let parser = PlanParser::new(flow.definition(), options, &problem);
                Some(tokenized_diff(&parser, &info, &best.actions, mode))
            }
            None => None,
        };
        Ok((response, info, diff))
    }

    fn optimal(&self, flow: &Flow, options: &CompileOptions, reference: &[ReferenceStep]) -> Result<Report, Error> {
        let (valid_response, info, valid_diff) = self.solve_tokenized(flow, options, reference, TokenMode::Valid)?;
        let Some(valid_diff) = valid_diff else {
            return Ok(Report::unanswered(valid_response, info.invalid));
        };
        let valid = !valid_diff.iter().any(Diff::is_edit);
        // Tokenized steps cost nothing, so the rest of the instrumented plan
        // is what the reference pays for goals, enablers and surrogates.
        let overhead = valid_response.best().map_or(0, |b| b.cost);
        let reference_total = info.reference_cost + overhead;

        let problem = crate::compiler::compile(flow, options)?;
        let response = planner::run(self.planner, &problem, self.timeout);
        let Some(best) = response.best() else {
            return Ok(Report::unanswered(response, info.invalid));
        };
        let optimum = best.cost;
        tracing::debug!(valid, reference_total, optimum, "optimality check");
        if valid && reference_total <= optimum {
            return Ok(Report::new(Some(true), valid_diff, valid_response, info.invalid));
        }
        let plan = PlanParser::new(flow.definition(), options, &problem).parse(best.cost, &best.actions)?;
        let diff = align(&info.steps, &plan.steps);
        Ok(Report::new(Some(false), diff, response, info.invalid))
    }
}

/// Diff read off an instrumented plan: tokenized steps are kept, skipped
/// steps deleted, and any other real step added.
fn tokenized_diff(parser: &PlanParser, info: &Instrumented, actions: &[String], mode: TokenMode) -> Vec<Diff> {
    let mut state = parser.initial_state();
    let mut out = Vec::new();
    let mut next = 0;
    for raw in actions {
        let name = match split_action(raw) {
            Ok((key, _)) => key.name,
            Err(e) => {
                tracing::warn!(action = %raw, error = %e, "unreadable planner action");
                continue;
            }
        };
        if let Some(i) = tokenize_index(&name) {
            if let Some(step) = info.steps.get(i) {
                parser.observe(step, &mut state);
                out.push(Diff::keep(step.clone()));
                next = i + 1;
            }
            continue;
        }
        if let Some(i) = untokenize_index(&name) {
            if let Some(step) = info.steps.get(i) {
                out.push(Diff::delete(step.clone()));
                next = i + 1;
            }
            continue;
        }
        match parser.parse_action(raw, &mut state) {
            Ok(Some(step)) => out.push(Diff::add(step)),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(action = %raw, error = %e, "planner action could not be lifted");
                out.push(Diff::add(PlanStep::operator(raw.clone())));
            }
        }
    }
    if mode == TokenMode::Valid {
        out.extend(info.steps[next.min(info.steps.len())..].iter().cloned().map(Diff::delete));
    }
    out
}
