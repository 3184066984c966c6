//! Raw planner actions to plan steps.
//!
//! Accepts `(name arg …)` and `name----baked----baked` forms. Bookkeeping
//! actions are dropped, names are reverted to the user's spelling, and runs
//! of asks, maps or confirms are coalesced when the options ask for it.

use super::{Plan, PlanStep};
use crate::compiler::vocabulary::{
    is_restricted, ASK, ASK_ALL_FOR, ASK_LAST_RESORT, CONFIRM, CONSTRAINT_TO_FALSE,
    CONSTRAINT_TO_TRUE, MAP, MAP_FREE_ALT, TRY_LEVEL_PREFIX,
};
use crate::compiler::CompiledProblem;
use crate::core::error::PlanParseError;
use crate::core::options::{CompileOptions, LifeCycleOption, MappingOption, SlotOption};
use crate::core::types::{unpack, FlowDefinition, MemoryState};
use crate::pddl::ActionKey;
use indexmap::IndexSet;

/// Split a raw action into its key and trailing arguments.
pub fn split_action(raw: &str) -> Result<(ActionKey, Vec<String>), PlanParseError> {
    let body = raw.trim().trim_start_matches('(').trim_end_matches(')');
    let mut tokens = body.split_whitespace();
    let head = tokens.next().ok_or(PlanParseError::EmptyAction)?;
    let key = ActionKey::decode(&head.to_lowercase());
    if key.name.is_empty() {
        return Err(PlanParseError::EmptyAction);
    }
    let args = tokens.map(str::to_lowercase).collect();
    Ok((key, args))
}

/// Lifts raw actions of one compiled problem.
pub struct PlanParser<'a> {
    flow: &'a FlowDefinition,
    options: &'a CompileOptions,
    problem: &'a CompiledProblem,
}

/// Items known so far while walking a plan.
#[derive(Debug, Clone, Default)]
pub struct ParseState {
    pub cached_items: IndexSet<String>,
}

impl<'a> PlanParser<'a> {
    pub fn new(flow: &'a FlowDefinition, options: &'a CompileOptions, problem: &'a CompiledProblem) -> Self {
        Self {
            flow,
            options,
            problem,
        }
    }

    /// State before the first step: every item memory already knows.
    pub fn initial_state(&self) -> ParseState {
        let cached_items = self
            .flow
            .memory_items
            .iter()
            .filter(|m| m.item_state == MemoryState::Known)
            .map(|m| m.item_id.clone())
            .collect();
        ParseState { cached_items }
    }

    fn revert(&self, id: &str) -> String {
        self.problem.transforms.revert(id)
    }

    /// Parse a whole plan and apply the grouping options.
    pub fn parse(&self, cost: u64, actions: &[String]) -> Result<Plan, PlanParseError> {
        let mut state = self.initial_state();
        let mut steps = Vec::new();
        for raw in actions {
            if let Some(step) = self.parse_action(raw, &mut state)? {
                steps.push(step);
            }
        }
        Ok(Plan {
            cost,
            steps: self.group(steps),
        })
    }

    /// Lift one raw action. Bookkeeping actions yield `None`.
    pub fn parse_action(&self, raw: &str, state: &mut ParseState) -> Result<Option<PlanStep>, PlanParseError> {
        let (key, args) = split_action(raw)?;
        if is_restricted(&key.name) {
            return Ok(None);
        }
        let step = match key.name.as_str() {
            ASK | ASK_LAST_RESORT => {
                let item = key
                    .baked
                    .iter()
                    .chain(args.iter())
                    .last()
                    .ok_or_else(|| missing(&key, 1, 0))?;
                PlanStep::ask(self.revert(item))
            }
            ASK_ALL_FOR => {
                let op_id = key.baked.first().ok_or_else(|| missing(&key, 1, 0))?;
                let name = self.revert(op_id);
                let op = self
                    .flow
                    .operator(&name)
                    .ok_or_else(|| PlanParseError::UnknownAction(key.encode()))?;
                let items = op
                    .required_inputs()
                    .into_iter()
                    .map(|p| p.item_id)
                    .filter(|i| !state.cached_items.contains(i))
                    .collect();
                PlanStep::Ask { items }
            }
            MAP | MAP_FREE_ALT => self.map_step(&key, &args)?,
            CONFIRM => {
                let item = args.first().ok_or_else(|| missing(&key, 1, 0))?;
                PlanStep::confirm(self.revert(item))
            }
            CONSTRAINT_TO_TRUE | CONSTRAINT_TO_FALSE => self.constraint_step(&key)?,
            _ => self.operator_step(&key, &args, state)?,
        };
        self.update_cache(&step, state);
        Ok(Some(step))
    }

    fn map_step(&self, key: &ActionKey, args: &[String]) -> Result<PlanStep, PlanParseError> {
        match args {
            [x, y, ..] => Ok(PlanStep::map(self.revert(x), self.revert(y))),
            _ => Err(missing(key, 2, args.len())),
        }
    }

    fn constraint_step(&self, key: &ActionKey) -> Result<PlanStep, PlanParseError> {
        let id = key.baked.first().ok_or_else(|| missing(key, 1, 0))?;
        let entry = self
            .problem
            .constraints
            .by_id(id)
            .ok_or_else(|| PlanParseError::UnknownConstraint(id.clone()))?;
        Ok(PlanStep::Constraint {
            constraint: entry.constraint.constraint.clone(),
            parameters: key.baked[1..].iter().map(|p| self.revert(p)).collect(),
            truth_value: key.name == CONSTRAINT_TO_TRUE,
        })
    }

    fn operator_step(&self, key: &ActionKey, args: &[String], state: &ParseState) -> Result<PlanStep, PlanParseError> {
        let name = self.revert(&key.name);
        let op = self
            .flow
            .operator(&name)
            .ok_or_else(|| PlanParseError::UnknownAction(key.encode()))?;

        let outcome = key
            .baked
            .iter()
            .find_map(|b| b.strip_prefix("outcome_"))
            .and_then(|k| k.parse::<usize>().ok());
        let outputs = match outcome.and_then(|k| op.outputs.get(k)) {
            Some(o) => o.parameters(),
            None => op.output_parameters(),
        };
        let parameters: Vec<String> = args
            .iter()
            .filter(|a| !a.starts_with(TRY_LEVEL_PREFIX))
            .map(|a| self.revert(a))
            .collect();
        let inputs = unpack(&op.inputs)
            .into_iter()
            .map(|p| p.item_id)
            .filter(|i| state.cached_items.contains(i))
            .collect();
        Ok(PlanStep::Operator {
            name: op.name.clone(),
            inputs,
            outputs: outputs.into_iter().map(|p| p.item_id).collect(),
            parameters,
        })
    }

    /// Record a step lifted elsewhere, as if it had been parsed.
    pub fn observe(&self, step: &PlanStep, state: &mut ParseState) {
        self.update_cache(step, state);
    }

    fn update_cache(&self, step: &PlanStep, state: &mut ParseState) {
        let cache = &mut state.cached_items;
        match step {
            PlanStep::Ask { items } | PlanStep::Confirm { items } => cache.extend(items.iter().cloned()),
            PlanStep::Map { pairs } => cache.extend(pairs.iter().map(|(_, t)| t.clone())),
            PlanStep::Operator { inputs, outputs, .. } => {
                if self.options.life_cycle(LifeCycleOption::UncertainOnUse) {
                    for i in inputs {
                        cache.shift_remove(i);
                    }
                }
                cache.extend(outputs.iter().cloned());
            }
            PlanStep::Constraint { .. } => {}
        }
    }

    /// Coalesce contiguous runs of the same step kind.
    fn group(&self, steps: Vec<PlanStep>) -> Vec<PlanStep> {
        let slots = self.options.slot(SlotOption::GroupSlots);
        let maps = self.options.mapping(MappingOption::GroupMaps);
        let confirms = self.options.group_confirms();
        let mut out: Vec<PlanStep> = Vec::with_capacity(steps.len());
        for step in steps {
            if let Some(last) = out.last_mut() {
                let absorbed = match (last, &step) {
                    (PlanStep::Ask { items }, PlanStep::Ask { items: more }) if slots => {
                        items.extend(more.iter().cloned());
                        true
                    }
                    (PlanStep::Map { pairs }, PlanStep::Map { pairs: more }) if maps => {
                        pairs.extend(more.iter().cloned());
                        true
                    }
                    (PlanStep::Confirm { items }, PlanStep::Confirm { items: more }) if confirms => {
                        items.extend(more.iter().cloned());
                        true
                    }
                    _ => false,
                };
                if absorbed {
                    continue;
                }
            }
            out.push(step);
        }
        out
    }
}

fn missing(key: &ActionKey, expected: usize, got: usize) -> PlanParseError {
    PlanParseError::MissingParameters {
        action: key.encode(),
        expected,
        got,
    }
}
