//! Token instrumentation of a built compilation.
//!
//! Step `i` of the reference becomes `tokenize_<i>` actions (the real
//! semantics of the step, grounded, plus `token_i -> token_{i+1}`) and one
//! `untokenize_<i>` action that skips the step without checking anything.

use crate::compiler::costs::CostTier;
use crate::compiler::vocabulary::{ASK, CONFIRM, MAP, SORT_LABEL};
use crate::compiler::{ActionOrigin, Compilation, DataSymbol};
use crate::core::error::DebugError;
use crate::core::transform::canonical;
use crate::core::types::{unpack, ReferenceStep, Step};
use crate::pddl::{Action, ActionKey, ConstId, Effect, Expr, Fact, NumExpr, PredId, Term};
use crate::plan::PlanStep;
use indexmap::IndexMap;

/// How the tokens drive the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenMode {
    /// Reaching the last token is the goal; skipping a step is expensive.
    Sound,
    /// The flow's goal stands; skipping a step costs an edit.
    Valid,
}

/// What instrumentation learned about the reference.
#[derive(Debug, Clone)]
pub struct Instrumented {
    /// Reference steps in plan vocabulary, by index
    pub steps: Vec<PlanStep>,
    pub invalid: Vec<DebugError>,
    /// Sum of the cheapest grounding of every valid step
    pub reference_cost: u64,
    pub untokenize_cost: u64,
}

impl Instrumented {
    pub fn is_invalid(&self, index: usize) -> bool {
        self.invalid
            .iter()
            .any(|DebugError::InvalidToken { index: i, .. }| *i == index)
    }
}

/// Predicate name of token `i`.
pub fn token_name(i: usize) -> String {
    format!("token_{}", i)
}

/// Index of a `tokenize_<i>` action, if `name` is one.
pub fn tokenize_index(name: &str) -> Option<usize> {
    name.strip_prefix("tokenize_")?.parse().ok()
}

/// Index of an `untokenize_<i>` action, if `name` is one.
pub fn untokenize_index(name: &str) -> Option<usize> {
    name.strip_prefix("untokenize_")?.parse().ok()
}

/// A reference step in plan vocabulary.
pub fn lift(comp: &Compilation, step: &ReferenceStep) -> PlanStep {
    match step {
        ReferenceStep::Constraint(c) => PlanStep::Constraint {
            constraint: c.constraint.clone(),
            parameters: c.parameters.iter().cloned().collect(),
            truth_value: c.truth_value.holds(),
        },
        ReferenceStep::Step(s) => match (s.name.as_str(), s.parameters.as_slice()) {
            (ASK, items) => PlanStep::Ask {
                items: items.to_vec(),
            },
            (CONFIRM, items) => PlanStep::Confirm {
                items: items.to_vec(),
            },
            (MAP, [x, y, ..]) => PlanStep::map(x.clone(), y.clone()),
            _ => match comp.flow.operator(&s.name) {
                Some(op) => PlanStep::Operator {
                    name: op.name.clone(),
                    inputs: unpack(&op.inputs).into_iter().map(|p| p.item_id).collect(),
                    outputs: op.output_parameters().into_iter().map(|p| p.item_id).collect(),
                    parameters: s.parameters.clone(),
                },
                None => PlanStep::Operator {
                    name: s.name.clone(),
                    inputs: Vec::new(),
                    outputs: Vec::new(),
                    parameters: s.parameters.clone(),
                },
            },
        },
    }
}

/// Label bookkeeping, present only when some reference step is labeled.
struct Labels {
    tag: PredId,
    available: PredId,
    assigned: PredId,
    ready: PredId,
    constants: IndexMap<String, ConstId>,
}

impl Labels {
    fn declare(comp: &mut Compilation, reference: &[ReferenceStep]) -> Option<Self> {
        let names: Vec<String> = reference
            .iter()
            .filter_map(|s| match s {
                ReferenceStep::Step(Step { label: Some(l), .. }) => Some(l.clone()),
                _ => None,
            })
            .collect();
        if names.is_empty() {
            return None;
        }
        let v = comp.vocab.clone();
        let sort = comp.symbols.declare_sort(SORT_LABEL, None);
        let tag = comp.symbols.declare_predicate("label_tag", vec![v.generic, sort]);
        let available = comp.symbols.declare_predicate("available", vec![sort]);
        let assigned = comp.symbols.declare_predicate("assigned_to", vec![v.operator, sort]);
        let ready = comp.symbols.declare_predicate("ready_for_token", vec![]);
        let mut constants = IndexMap::new();
        for name in names {
            let c = comp
                .symbols
                .declare_constant(&format!("label_{}", canonical(&name)), sort);
            comp.push_fact(available, vec![c]);
            constants.insert(name, c);
        }
        comp.push_fact(ready, vec![]);
        Some(Self {
            tag,
            available,
            assigned,
            ready,
            constants,
        })
    }
}

/// Instrument `comp` for checking `reference`.
pub fn instrument(comp: &mut Compilation, reference: &[ReferenceStep], mode: TokenMode) -> Instrumented {
    let n = reference.len();
    let tokens: Vec<PredId> = (0..=n)
        .map(|i| comp.symbols.declare_predicate(&token_name(i), vec![]))
        .collect();
    comp.push_fact(tokens[0], vec![]);
    let labels = Labels::declare(comp, reference);

    let mut steps = Vec::with_capacity(n);
    let mut invalid = Vec::new();
    let mut groundings: Vec<Vec<Action>> = Vec::with_capacity(n);
    let mut reference_cost = 0;
    for (i, step) in reference.iter().enumerate() {
        steps.push(lift(comp, step));
        match ground_step(comp, i, step, reference, labels.as_ref()) {
            Ok(actions) => {
                reference_cost += actions
                    .iter()
                    .filter_map(|a| evaluate(&comp.init, &a.cost))
                    .min()
                    .unwrap_or(0);
                groundings.push(actions);
            }
            Err(e) => {
                tracing::debug!(error = %e, "reference step cannot be tokenized");
                invalid.push(e);
                groundings.push(Vec::new());
            }
        }
    }

    let untokenize_cost = match mode {
        TokenMode::Sound => CostTier::HIGH.max(reference_cost + CostTier::UNIT),
        TokenMode::Valid => CostTier::EDIT,
    };

    for (i, actions) in groundings.into_iter().enumerate() {
        let label = match &reference[i] {
            ReferenceStep::Step(s) => s.label.as_ref(),
            ReferenceStep::Constraint(_) => None,
        };
        let op_const = match &reference[i] {
            ReferenceStep::Step(s) => comp.operators.get(&s.name).map(|o| o.constant),
            ReferenceStep::Constraint(_) => None,
        };
        for (k, real) in actions.into_iter().enumerate() {
            let mut baked = vec![real.key.name.clone()];
            baked.extend(real.key.baked.iter().cloned());
            baked.push(format!("v{}", k));
            let mut t = real;
            t.key = ActionKey::baked(format!("tokenize_{}", i), baked);
            t.require(Expr::atom(tokens[i], vec![]));
            t.effect(Effect::del(tokens[i], vec![]));
            t.effect(Effect::add(tokens[i + 1], vec![]));
            if let Some(l) = &labels {
                t.require(Expr::atom(l.ready, vec![]));
                if let (Some(name), Some(op)) = (label, op_const) {
                    if let Some(c) = l.constants.get(name) {
                        t.effect(Effect::add(l.assigned, vec![Term::Const(op), Term::Const(*c)]));
                        t.effect(Effect::del(l.ready, vec![]));
                    }
                }
            }
            t.cost = NumExpr::Const(CostTier::ZERO);
            comp.push_action(t, ActionOrigin::Instrumentation);
        }

        let mut skip = Action::new(ActionKey::new(format!("untokenize_{}", i)));
        skip.require(Expr::atom(tokens[i], vec![]));
        if let Some(l) = &labels {
            skip.require(Expr::atom(l.ready, vec![]));
        }
        skip.effect(Effect::del(tokens[i], vec![]));
        skip.effect(Effect::add(tokens[i + 1], vec![]));
        skip.cost = NumExpr::Const(untokenize_cost);
        comp.push_action(skip, ActionOrigin::Instrumentation);
    }

    if let Some(l) = &labels {
        label_makers(comp, reference, l);
    }

    if mode == TokenMode::Sound {
        comp.goal = vec![Expr::atom(tokens[n], vec![])];
        map_surrogates(comp, reference, &tokens);
    }

    tracing::debug!(
        steps = n,
        invalid = invalid.len(),
        reference_cost,
        untokenize_cost,
        ?mode,
        "instrumented reference"
    );
    Instrumented {
        steps,
        invalid,
        reference_cost,
        untokenize_cost,
    }
}

/// `label_maker----<l>----<o>`: tie label `l` to an output of its operator.
fn label_makers(comp: &mut Compilation, reference: &[ReferenceStep], labels: &Labels) {
    let flow = comp.flow;
    for step in reference {
        let ReferenceStep::Step(Step {
            name,
            label: Some(label),
            ..
        }) = step
        else {
            continue;
        };
        let (Some(op), Some(l)) = (comp.operators.get(name), labels.constants.get(label)) else {
            continue;
        };
        let op_const = op.constant;
        let outputs: Vec<DataSymbol> = match flow.operator(name) {
            Some(def) if !def.output_parameters().is_empty() => def
                .output_parameters()
                .iter()
                .filter_map(|p| comp.data.get(&p.item_id).cloned())
                .collect(),
            _ => comp.all_objects().cloned().collect(),
        };
        let label_id = comp.symbols.constant(*l).name.clone();
        for o in outputs {
            let object_id = comp.symbols.constant(o.constant).name.clone();
            let mut a = Action::new(ActionKey::baked(
                "label_maker",
                [label_id.clone(), object_id],
            ));
            a.require(Expr::atom(
                labels.assigned,
                vec![Term::Const(op_const), Term::Const(*l)],
            ));
            a.require(Expr::atom(labels.available, vec![Term::Const(*l)]));
            a.effect(Effect::del(labels.available, vec![Term::Const(*l)]));
            a.effect(Effect::add(labels.tag, vec![Term::Const(o.constant), Term::Const(*l)]));
            a.effect(Effect::add(labels.ready, vec![]));
            a.cost = NumExpr::Const(CostTier::ZERO);
            comp.push_action(a, ActionOrigin::Instrumentation);
        }
    }
}

/// A mapped target must be consumed after the map: `token_{100(i+1)}`.
fn map_surrogates(comp: &mut Compilation, reference: &[ReferenceStep], tokens: &[PredId]) {
    let been_used = comp.vocab.been_used;
    for (i, step) in reference.iter().enumerate() {
        let ReferenceStep::Step(s) = step else {
            continue;
        };
        if s.name != MAP {
            continue;
        }
        let Some(target) = s.parameters.get(1).and_then(|y| comp.data.get(y)) else {
            continue;
        };
        let target = target.constant;
        let surrogate = comp
            .symbols
            .declare_predicate(&token_name(100 * (i + 1)), vec![]);
        let mut a = Action::new(ActionKey::new(format!("tokenize_check_{}", i)));
        a.require(Expr::atom(been_used, vec![Term::Const(target)]));
        a.require(Expr::Or(
            tokens[i + 1..]
                .iter()
                .map(|t| Expr::atom(*t, vec![]))
                .collect(),
        ));
        a.effect(Effect::add(surrogate, vec![]));
        a.cost = NumExpr::Const(CostTier::ZERO);
        comp.push_action(a, ActionOrigin::Instrumentation);
        comp.goal.push(Expr::atom(surrogate, vec![]));
    }
}

/// Ground copies of every compiled action that realizes `step`.
fn ground_step(
    comp: &Compilation,
    index: usize,
    step: &ReferenceStep,
    reference: &[ReferenceStep],
    labels: Option<&Labels>,
) -> Result<Vec<Action>, DebugError> {
    let invalid = |reason: String| DebugError::InvalidToken { index, reason };
    let s = match step {
        ReferenceStep::Constraint(c) => {
            let entry = comp
                .constraints
                .iter()
                .find(|e| {
                    e.constraint.constraint == c.constraint
                        && (c.parameters.is_empty() || e.constraint.parameters == c.parameters)
                })
                .ok_or_else(|| invalid(format!("unknown constraint '{}'", c.constraint)))?;
            let truth = c.truth_value.holds();
            let found: Vec<Action> = comp
                .actions
                .iter()
                .zip(&comp.origins)
                .filter(|(_, o)| {
                    matches!(o, ActionOrigin::Constraint { id, truth: t } if *id == entry.id && *t == truth)
                })
                .map(|(a, _)| a.clone())
                .collect();
            return non_empty(found, || invalid(format!("no check for '{}'", c.constraint)));
        }
        ReferenceStep::Step(s) => s,
    };

    // Labels introduced by earlier steps
    let introduced: Vec<&str> = reference[..index]
        .iter()
        .filter_map(|r| match r {
            ReferenceStep::Step(Step { label: Some(l), .. }) => Some(l.as_str()),
            _ => None,
        })
        .collect();
    let argument = |name: &str| -> Result<Arg, DebugError> {
        if introduced.contains(&name) {
            if let Some(c) = labels.and_then(|l| l.constants.get(name)) {
                return Ok(Arg::Label(*c));
            }
        }
        comp.data
            .get(name)
            .map(|d| Arg::Datum(d.clone()))
            .ok_or_else(|| invalid(format!("unknown parameter '{}'", name)))
    };
    let args: Vec<Arg> = s
        .parameters
        .iter()
        .map(|p| argument(p))
        .collect::<Result<_, _>>()?;

    let found = match s.name.as_str() {
        ASK => {
            let [arg] = args.as_slice() else {
                return Err(invalid(format!("ask takes 1 parameter, got {}", args.len())));
            };
            let item = arg.datum_name();
            comp.actions
                .iter()
                .zip(&comp.origins)
                .filter_map(|(a, o)| match o {
                    ActionOrigin::Ask { item: None } => bind(comp, a, &args, labels),
                    ActionOrigin::Ask { item: Some(i) } if Some(i.as_str()) == item => Some(a.clone()),
                    _ => None,
                })
                .collect()
        }
        CONFIRM | MAP => {
            let (expected, origin) = if s.name == MAP {
                (2, ActionOrigin::Map)
            } else {
                (1, ActionOrigin::Confirm)
            };
            if args.len() != expected {
                return Err(invalid(format!(
                    "{} takes {} parameters, got {}",
                    s.name,
                    expected,
                    args.len()
                )));
            }
            comp.actions
                .iter()
                .zip(&comp.origins)
                .filter(|(_, o)| **o == origin)
                .filter_map(|(a, _)| bind(comp, a, &args, labels))
                .collect()
        }
        name => {
            if comp.flow.operator(name).is_none() {
                return Err(invalid(format!("unknown operator '{}'", name)));
            }
            let mut found = Vec::new();
            for (a, o) in comp.actions.iter().zip(&comp.origins) {
                let ActionOrigin::Operator {
                    operator,
                    instances,
                    ..
                } = o
                else {
                    continue;
                };
                if operator != name {
                    continue;
                }
                if *instances == 0 || args.is_empty() {
                    found.push(a.clone());
                    continue;
                }
                if args.len() != *instances {
                    return Err(invalid(format!(
                        "{} takes {} parameters, got {}",
                        name,
                        instances,
                        args.len()
                    )));
                }
                if let Some(bound) = bind(comp, a, &args, labels) {
                    found.push(bound);
                }
            }
            found
        }
    };
    non_empty(found, || invalid(format!("no action realizes '{}'", s.name)))
}

fn non_empty(found: Vec<Action>, err: impl FnOnce() -> DebugError) -> Result<Vec<Action>, DebugError> {
    if found.is_empty() {
        Err(err())
    } else {
        Ok(found)
    }
}

/// A reference-step argument.
#[derive(Debug, Clone)]
enum Arg {
    Datum(DataSymbol),
    Label(ConstId),
}

impl Arg {
    fn datum_name(&self) -> Option<&str> {
        match self {
            Self::Datum(d) => Some(d.name.as_str()),
            Self::Label(_) => None,
        }
    }
}

/// Bind the leading parameters of `action` to `args`. Labels stay free and
/// require their tag. `None` when a datum does not fit the parameter sort.
fn bind(comp: &Compilation, action: &Action, args: &[Arg], labels: Option<&Labels>) -> Option<Action> {
    if action.params.len() < args.len() {
        return None;
    }
    let mut a = action.clone();
    let mut bindings = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Arg::Datum(d) => {
                if !comp.symbols.is_subsort(d.sort, action.params[i].sort) {
                    return None;
                }
                bindings.push((i, d.constant));
            }
            Arg::Label(l) => {
                let tag = labels?.tag;
                a.require(Expr::atom(tag, vec![Term::Var(i), Term::Const(*l)]));
            }
        }
    }
    Some(a.bind_all(&bindings))
}

/// Value of a ground cost term in the initial state.
fn evaluate(init: &[Fact], cost: &NumExpr) -> Option<u64> {
    match cost {
        NumExpr::Const(v) => Some(*v),
        NumExpr::Fluent(id, args) => {
            let args: Option<Vec<ConstId>> = args
                .iter()
                .map(|t| match t {
                    Term::Const(c) => Some(*c),
                    Term::Var(_) => None,
                })
                .collect();
            let args = args?;
            init.iter().find_map(|f| match f {
                Fact::Value(fid, a, v) if fid == id && *a == args => Some(*v),
                _ => None,
            })
        }
    }
}
