//! In-process optimal planner.
//!
//! Grounds every action schema over the constants of its parameter sorts,
//! folds static predicates and equalities against the initial state, then
//! runs uniform-cost search over bitset states. Plans are cost-optimal.

use super::{Planner, PlannerResponse, RawPlan};
use crate::compiler::CompiledProblem;
use crate::core::error::PlannerError;
use crate::pddl::{Action, ConstId, Effect, Expr, Fact, NumExpr, PredId, Term};
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Expansions between two clock checks.
const CLOCK_INTERVAL: usize = 1024;

/// Default cap on expanded states.
pub const DEFAULT_MAX_STATES: usize = 500_000;

type GroundAtom = (PredId, Vec<ConstId>);

// ============================================================================
// Grounding
// ============================================================================

/// Precondition over fact indices.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cond {
    True,
    False,
    Fact(usize),
    Not(Box<Cond>),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

impl Cond {
    fn and(items: Vec<Cond>) -> Self {
        let mut kept = Vec::with_capacity(items.len());
        for c in items {
            match c {
                Cond::True => {}
                Cond::False => return Cond::False,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Cond::True,
            1 => kept.pop().unwrap_or(Cond::True),
            _ => Cond::And(kept),
        }
    }

    fn or(items: Vec<Cond>) -> Self {
        let mut kept = Vec::with_capacity(items.len());
        for c in items {
            match c {
                Cond::False => {}
                Cond::True => return Cond::True,
                other => kept.push(other),
            }
        }
        match kept.len() {
            0 => Cond::False,
            1 => kept.pop().unwrap_or(Cond::False),
            _ => Cond::Or(kept),
        }
    }

    fn not(inner: Cond) -> Self {
        match inner {
            Cond::True => Cond::False,
            Cond::False => Cond::True,
            Cond::Not(c) => *c,
            other => Cond::Not(Box::new(other)),
        }
    }

    fn holds(&self, state: &[u64]) -> bool {
        match self {
            Cond::True => true,
            Cond::False => false,
            Cond::Fact(i) => test(state, *i),
            Cond::Not(c) => !c.holds(state),
            Cond::And(items) => items.iter().all(|c| c.holds(state)),
            Cond::Or(items) => items.iter().any(|c| c.holds(state)),
        }
    }
}

#[derive(Debug, Clone)]
struct GroundAction {
    label: String,
    pre: Cond,
    add: Vec<usize>,
    del: Vec<usize>,
    cost: u64,
}

/// Ground atoms, static facts and ground actions of one problem.
struct Grounder<'p> {
    problem: &'p CompiledProblem,
    dynamic: FxHashSet<PredId>,
    static_facts: FxHashSet<GroundAtom>,
    facts: IndexSet<GroundAtom>,
}

impl<'p> Grounder<'p> {
    fn new(problem: &'p CompiledProblem) -> Self {
        let dynamic: FxHashSet<PredId> = problem
            .domain
            .actions
            .iter()
            .flat_map(|a| a.effects.iter().map(|e| e.atom().pred))
            .collect();
        let mut static_facts = FxHashSet::default();
        let mut facts = IndexSet::new();
        for fact in &problem.problem.init {
            if let Fact::Atom(pred, args) = fact {
                if dynamic.contains(pred) {
                    facts.insert((*pred, args.clone()));
                } else {
                    static_facts.insert((*pred, args.clone()));
                }
            }
        }
        Self {
            problem,
            dynamic,
            static_facts,
            facts,
        }
    }

    /// Facts true in the initial state occupy the first indices.
    fn initial_len(&self) -> usize {
        self.facts.len()
    }

    fn resolve(binding: &[Option<ConstId>], t: &Term) -> Option<ConstId> {
        match t {
            Term::Const(c) => Some(*c),
            Term::Var(i) => binding.get(*i).copied().flatten(),
        }
    }

    fn resolve_all(binding: &[Option<ConstId>], terms: &[Term]) -> Option<Vec<ConstId>> {
        terms.iter().map(|t| Self::resolve(binding, t)).collect()
    }

    /// Ground `expr`. `None` while some referenced parameter is unbound.
    fn cond(&mut self, expr: &Expr, binding: &[Option<ConstId>]) -> Option<Cond> {
        Some(match expr {
            Expr::True => Cond::True,
            Expr::False => Cond::False,
            Expr::Eq(a, b) => {
                if Self::resolve(binding, a)? == Self::resolve(binding, b)? {
                    Cond::True
                } else {
                    Cond::False
                }
            }
            Expr::Atom(atom) => {
                let args = Self::resolve_all(binding, &atom.args)?;
                let key = (atom.pred, args);
                if !self.dynamic.contains(&atom.pred) {
                    if self.static_facts.contains(&key) {
                        Cond::True
                    } else {
                        Cond::False
                    }
                } else {
                    Cond::Fact(self.facts.insert_full(key).0)
                }
            }
            Expr::Not(inner) => Cond::not(self.cond(inner, binding)?),
            Expr::And(items) => {
                let parts: Option<Vec<Cond>> = items.iter().map(|e| self.cond(e, binding)).collect();
                Cond::and(parts?)
            }
            Expr::Or(items) => {
                let parts: Option<Vec<Cond>> = items.iter().map(|e| self.cond(e, binding)).collect();
                Cond::or(parts?)
            }
        })
    }

    /// True when a fully bound conjunct already fails statically.
    fn pruned(&mut self, action: &Action, binding: &[Option<ConstId>]) -> bool {
        action
            .precondition
            .iter()
            .any(|e| matches!(self.cond(e, binding), Some(Cond::False)))
    }

    fn cost(&self, cost: &NumExpr, binding: &[Option<ConstId>]) -> Option<u64> {
        match cost {
            NumExpr::Const(v) => Some(*v),
            NumExpr::Fluent(id, args) => {
                let args = Self::resolve_all(binding, args)?;
                self.problem.problem.value_of(*id, &args)
            }
        }
    }

    fn ground_all(&mut self) -> Vec<GroundAction> {
        let problem = self.problem;
        let mut out = Vec::new();
        for action in &problem.domain.actions {
            let domains: Vec<Vec<ConstId>> = action
                .params
                .iter()
                .map(|p| problem.domain.symbols.constants_of(p.sort))
                .collect();
            let mut binding = vec![None; action.params.len()];
            self.enumerate(action, &domains, 0, &mut binding, &mut out);
        }
        out
    }

    fn enumerate(
        &mut self,
        action: &Action,
        domains: &[Vec<ConstId>],
        depth: usize,
        binding: &mut [Option<ConstId>],
        out: &mut Vec<GroundAction>,
    ) {
        if self.pruned(action, binding) {
            return;
        }
        if depth == domains.len() {
            if let Some(ground) = self.instantiate(action, binding) {
                out.push(ground);
            }
            return;
        }
        for c in &domains[depth] {
            binding[depth] = Some(*c);
            self.enumerate(action, domains, depth + 1, binding, out);
        }
        binding[depth] = None;
    }

    fn instantiate(&mut self, action: &Action, binding: &[Option<ConstId>]) -> Option<GroundAction> {
        let Some(cost) = self.cost(&action.cost, binding) else {
            tracing::debug!(action = %action.key.encode(), "skipping grounding with undefined cost");
            return None;
        };
        let parts: Option<Vec<Cond>> = action.precondition.iter().map(|e| self.cond(e, binding)).collect();
        let pre = Cond::and(parts?);
        if pre == Cond::False {
            return None;
        }
        let mut add = Vec::new();
        let mut del = Vec::new();
        for effect in &action.effects {
            let atom = effect.atom();
            let args = Self::resolve_all(binding, &atom.args)?;
            let index = self.facts.insert_full((atom.pred, args)).0;
            match effect {
                Effect::Add(_) => add.push(index),
                Effect::Del(_) => del.push(index),
            }
        }
        let symbols = &self.problem.domain.symbols;
        let mut label = format!("({}", action.key.encode());
        for c in binding.iter().flatten() {
            label.push(' ');
            label.push_str(&symbols.constant(*c).name);
        }
        label.push(')');
        Some(GroundAction {
            label,
            pre,
            add,
            del,
            cost,
        })
    }
}

// ============================================================================
// Search
// ============================================================================

fn words(facts: usize) -> usize {
    facts.div_ceil(64).max(1)
}

fn test(state: &[u64], i: usize) -> bool {
    state.get(i / 64).is_some_and(|w| *w & (1u64 << (i % 64)) != 0)
}

fn set(state: &mut [u64], i: usize, on: bool) {
    if let Some(w) = state.get_mut(i / 64) {
        if on {
            *w |= 1u64 << (i % 64);
        } else {
            *w &= !(1u64 << (i % 64));
        }
    }
}

struct Node {
    parent: Option<(usize, usize)>,
    state: Vec<u64>,
}

/// Uniform-cost search over the grounded problem.
#[derive(Debug, Clone)]
pub struct SearchPlanner {
    max_states: usize,
}

impl Default for SearchPlanner {
    fn default() -> Self {
        Self {
            max_states: DEFAULT_MAX_STATES,
        }
    }
}

impl SearchPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_states(mut self, max_states: usize) -> Self {
        self.max_states = max_states;
        self
    }

    fn search(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        let started = Instant::now();
        let mut grounder = Grounder::new(problem);
        let initial = grounder.initial_len();
        let goal_parts: Option<Vec<Cond>> = problem
            .problem
            .goal
            .iter()
            .map(|e| grounder.cond(e, &[]))
            .collect();
        let Some(goal) = goal_parts.map(Cond::and) else {
            return PlannerResponse::failed(PlannerError::RanError(
                "goal mentions a parameter".into(),
            ));
        };
        let actions = grounder.ground_all();
        let width = words(grounder.facts.len());
        tracing::debug!(
            facts = grounder.facts.len(),
            ground_actions = actions.len(),
            "grounded problem"
        );

        let mut start = vec![0u64; width];
        for i in 0..initial {
            set(&mut start, i, true);
        }

        let mut nodes = vec![Node {
            parent: None,
            state: start.clone(),
        }];
        let mut best: FxHashMap<Vec<u64>, u64> = FxHashMap::default();
        best.insert(start, 0);
        let mut open = BinaryHeap::new();
        open.push(Reverse((0u64, 0usize)));
        let mut expanded = 0usize;

        while let Some(Reverse((g, id))) = open.pop() {
            if best.get(&nodes[id].state).is_some_and(|b| *b < g) {
                continue;
            }
            if goal.holds(&nodes[id].state) {
                let plan = RawPlan {
                    cost: g,
                    actions: trace(&nodes, &actions, id),
                };
                let mut response = PlannerResponse::solved(vec![plan]);
                response.planner_output = format!("expanded {} states", expanded);
                return response;
            }
            expanded += 1;
            if expanded % CLOCK_INTERVAL == 0 && started.elapsed() > timeout {
                return PlannerResponse::timeout();
            }
            if expanded > self.max_states {
                tracing::warn!(max_states = self.max_states, "search state limit reached");
                return PlannerResponse::timeout();
            }
            for (a, action) in actions.iter().enumerate() {
                if !action.pre.holds(&nodes[id].state) {
                    continue;
                }
                let mut next = nodes[id].state.clone();
                for i in &action.del {
                    set(&mut next, *i, false);
                }
                for i in &action.add {
                    set(&mut next, *i, true);
                }
                let cost = g + action.cost;
                if best.get(&next).is_some_and(|b| *b <= cost) {
                    continue;
                }
                best.insert(next.clone(), cost);
                nodes.push(Node {
                    parent: Some((id, a)),
                    state: next,
                });
                open.push(Reverse((cost, nodes.len() - 1)));
            }
        }
        let mut response = PlannerResponse::no_solution();
        response.planner_output = format!("expanded {} states", expanded);
        response
    }
}

fn trace(nodes: &[Node], actions: &[GroundAction], mut id: usize) -> Vec<String> {
    let mut out = Vec::new();
    while let Some((parent, action)) = nodes[id].parent {
        out.push(actions[action].label.clone());
        id = parent;
    }
    out.reverse();
    out
}

impl Planner for SearchPlanner {
    fn name(&self) -> &str {
        "search"
    }

    fn plan(&self, problem: &CompiledProblem, timeout: Duration) -> PlannerResponse {
        self.search(problem, timeout)
    }
}
