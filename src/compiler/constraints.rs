//! Constraint registry and constraint actions.
//!
//! Each distinct constraint gets an id `c0, c1, …` by first appearance and a
//! predicate `status_<id>(p1 … pk, v)`. Expressions stay opaque; only the
//! variables they mention matter.

use super::costs::CostTier;
use super::vocabulary::{CONSTRAINT_TO_FALSE, CONSTRAINT_TO_TRUE};
use super::{ActionOrigin, Compilation};
use crate::core::error::CompileError;
use crate::core::types::{Constraint, GoalName, ReferenceStep};
use crate::pddl::{Action, ActionKey, ConstId, Effect, Expr, NumExpr, PredId, Term};
use indexmap::IndexMap;
use regex::Regex;

/// A registered constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEntry {
    pub id: String,
    /// Expression with parameters resolved
    pub constraint: Constraint,
    pub predicate: PredId,
}

/// Distinct constraints in first-appearance order.
#[derive(Debug, Clone, Default)]
pub struct ConstraintTable {
    entries: IndexMap<(String, Vec<String>), ConstraintEntry>,
}

impl ConstraintTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstraintEntry> {
        self.entries.values()
    }

    pub fn by_id(&self, id: &str) -> Option<&ConstraintEntry> {
        self.entries.values().find(|e| e.id == id)
    }

    /// Entry for a constraint whose parameters are already resolved.
    pub fn get(&self, constraint: &Constraint) -> Option<&ConstraintEntry> {
        let params: Vec<String> = constraint.parameters.iter().cloned().collect();
        self.entries.get(&(constraint.constraint.clone(), params))
    }
}

/// Parameters of a constraint: the declared ones, or every data item the
/// expression mentions as a whole word.
pub fn resolve_parameters<'n, I>(constraint: &Constraint, data: I) -> Vec<String>
where
    I: IntoIterator<Item = &'n String>,
{
    if !constraint.parameters.is_empty() {
        return constraint.parameters.iter().cloned().collect();
    }
    data.into_iter()
        .filter(|name| {
            let pattern = format!(r"\b{}\b", regex::escape(name));
            Regex::new(&pattern)
                .map(|re| re.is_match(&constraint.constraint))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

impl Compilation<'_> {
    /// Register a constraint, declaring its predicate on first sight.
    pub fn register_constraint(&mut self, constraint: &Constraint) -> ConstraintEntry {
        let params = resolve_parameters(constraint, self.data.keys());
        let key = (constraint.constraint.clone(), params.clone());
        if let Some(entry) = self.constraints.entries.get(&key) {
            return entry.clone();
        }
        let id = format!("c{}", self.constraints.entries.len());
        let mut sorts = vec![self.vocab.generic; params.len()];
        sorts.push(self.vocab.constraint_status);
        let predicate = self
            .symbols
            .declare_predicate(&format!("status_{}", id), sorts);
        let mut resolved = constraint.clone();
        resolved.parameters = params.into_iter().collect();
        let entry = ConstraintEntry {
            id,
            constraint: resolved,
            predicate,
        };
        self.constraints.entries.insert(key, entry.clone());
        entry
    }

    /// Constants of a registered constraint's parameters.
    pub fn constraint_args(&self, entry: &ConstraintEntry) -> Result<Vec<ConstId>, CompileError> {
        entry
            .constraint
            .parameters
            .iter()
            .map(|p| self.datum(p).map(|d| d.constant))
            .collect()
    }

    /// `status_<id>(params, v)` for a constraint occurrence.
    pub fn constraint_atom(
        &mut self,
        constraint: &Constraint,
        value: bool,
    ) -> Result<(PredId, Vec<Term>), CompileError> {
        let entry = self.register_constraint(constraint);
        let mut args: Vec<Term> = self
            .constraint_args(&entry)?
            .into_iter()
            .map(Term::Const)
            .collect();
        args.push(Term::Const(self.vocab.truth(value)));
        Ok((entry.predicate, args))
    }

    /// Precondition asserting a constraint occurrence's truth value.
    pub fn constraint_holds(&mut self, constraint: &Constraint) -> Result<Expr, CompileError> {
        let (pred, args) = self.constraint_atom(constraint, constraint.truth_value.holds())?;
        Ok(Expr::atom(pred, args))
    }

    /// Effects that set a constraint to its occurrence's truth value.
    pub fn constraint_effects(&mut self, constraint: &Constraint) -> Result<Vec<Effect>, CompileError> {
        let value = constraint.truth_value.holds();
        let (pred, args) = self.constraint_atom(constraint, value)?;
        let (_, opposite) = self.constraint_atom(constraint, !value)?;
        Ok(vec![Effect::del(pred, opposite), Effect::add(pred, args)])
    }
}

/// Register every constraint in first-appearance order.
pub fn register_all(comp: &mut Compilation) -> Result<(), CompileError> {
    let flow = comp.flow;
    for c in &flow.constraints {
        comp.register_constraint(c);
    }
    for op in &flow.operators {
        for item in &op.inputs {
            for c in &item.constraints {
                comp.register_constraint(c);
            }
        }
        for outcome in &op.outputs {
            for c in &outcome.conditions {
                comp.register_constraint(c);
            }
            for item in &outcome.outcomes {
                for c in &item.constraints {
                    comp.register_constraint(c);
                }
            }
        }
    }
    for group in &flow.goal_items {
        for goal in &group.goals {
            if let GoalName::Constraint(c) = &goal.goal_name {
                comp.register_constraint(c);
            }
        }
    }
    for m in &flow.manifest_constraints {
        comp.register_constraint(&m.manifest);
        comp.register_constraint(&m.constraint);
    }
    if let Some(reference) = &flow.reference {
        for step in &reference.plan {
            if let ReferenceStep::Constraint(c) = step {
                comp.register_constraint(c);
            }
        }
    }
    tracing::debug!(constraints = comp.constraints.len(), "registered constraints");
    Ok(())
}

/// Check, enabler and manifest actions.
pub fn compile(comp: &mut Compilation) -> Result<(), CompileError> {
    let entries: Vec<ConstraintEntry> = comp.constraints.iter().cloned().collect();
    let v = comp.vocab.clone();
    for entry in &entries {
        let args = comp.constraint_args(entry)?;
        let names: Vec<String> = args
            .iter()
            .map(|c| comp.symbols.constant(*c).name.clone())
            .collect();
        let status = |value: bool| {
            let mut a: Vec<Term> = args.iter().map(|c| Term::Const(*c)).collect();
            a.push(Term::Const(v.truth(value)));
            a
        };

        for value in [true, false] {
            let name = if value {
                CONSTRAINT_TO_TRUE
            } else {
                CONSTRAINT_TO_FALSE
            };
            let mut baked = vec![entry.id.clone()];
            baked.extend(names.iter().cloned());
            let mut a = Action::new(ActionKey::baked(name, baked));
            for c in &args {
                a.require(Expr::atom(v.known_p, vec![Term::Const(*c), Term::Const(v.known)]));
            }
            a.require(Expr::not_atom(entry.predicate, status(!value)));
            a.effect(Effect::add(entry.predicate, status(value)));
            a.cost = NumExpr::Const(CostTier::UNIT);
            comp.push_action(
                a,
                ActionOrigin::Constraint {
                    id: entry.id.clone(),
                    truth: value,
                },
            );
        }

        for (c, name) in args.iter().zip(&names) {
            let mut a = Action::new(ActionKey::baked(
                format!("enabler_{}", entry.id),
                [name.clone()],
            ));
            a.require(Expr::atom(v.free, vec![Term::Const(*c)]));
            a.effect(Effect::del(entry.predicate, status(true)));
            a.effect(Effect::del(entry.predicate, status(false)));
            a.cost = NumExpr::Const(CostTier::UNIT);
            comp.push_action(a, ActionOrigin::Enabler);
        }
    }

    let flow = comp.flow;
    for (k, m) in flow.manifest_constraints.iter().enumerate() {
        let mut a = Action::new(ActionKey::new(format!("manifest_{}", k)));
        a.require(comp.constraint_holds(&m.constraint)?);
        for e in comp.constraint_effects(&m.manifest)? {
            a.effect(e);
        }
        a.cost = NumExpr::Const(CostTier::ZERO);
        comp.push_action(a, ActionOrigin::Manifest);
    }
    Ok(())
}
