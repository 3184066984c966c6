//! Operator actions.
//!
//! One action per operator, or one per outcome when an operator has several
//! (determinization). Under `multi_instance` the leading parameters are the
//! instances routed into the required inputs; under `allow_retries` the last
//! two are the retry levels before and after the call.

use super::history;
use super::{ActionOrigin, Compilation};
use crate::core::error::CompileError;
use crate::core::options::LifeCycleOption;
use crate::core::types::{OperatorDefinition, Outcome};
use crate::pddl::{Action, ActionKey, Effect, Expr, NumExpr, Term};

pub fn compile(comp: &mut Compilation) -> Result<(), CompileError> {
    let flow = comp.flow;
    for op in &flow.operators {
        if op.outputs.len() <= 1 {
            let outcome = op.outputs.first().cloned().unwrap_or_default();
            compile_outcome(comp, op, &outcome, None)?;
        } else {
            for (k, outcome) in op.outputs.iter().enumerate() {
                compile_outcome(comp, op, outcome, Some(k))?;
            }
        }
    }
    Ok(())
}

fn compile_outcome(
    comp: &mut Compilation,
    op: &OperatorDefinition,
    outcome: &Outcome,
    index: Option<usize>,
) -> Result<(), CompileError> {
    let sym = comp.operator(&op.name)?.clone();
    let v = comp.vocab.clone();
    let opts = comp.options;
    let key = match index {
        Some(k) => ActionKey::baked(sym.id.clone(), [format!("outcome_{}", k)]),
        None => ActionKey::new(sym.id.clone()),
    };
    let mut a = Action::new(key);
    let op_const = Term::Const(sym.constant);

    let required = op.required_inputs();
    let mut instances = Vec::new();
    if opts.multi_instance() {
        for (i, p) in required.iter().enumerate() {
            let sort = comp.instance_sort(&p.item_id);
            instances.push(a.param(format!("x{}", i + 1), sort));
        }
    }
    let levels = if opts.allow_retries() {
        let pre = a.param("pre", v.num_retries);
        let post = a.param("post", v.num_retries);
        Some((pre, post))
    } else {
        None
    };

    // Inputs
    for (i, p) in required.iter().enumerate() {
        let input = Term::Const(comp.datum(&p.item_id)?.constant);
        a.require(Expr::atom(v.known_p, vec![input, Term::Const(v.known)]));
        if let Some(x) = instances.get(i) {
            a.require(Expr::atom(v.mapped_to, vec![*x, input]));
            a.require(Expr::not_atom(v.not_usable, vec![*x]));
            a.effect(Effect::add(v.been_used, vec![*x]));
        }
        a.effect(Effect::add(v.been_used, vec![input]));
        if opts.life_cycle(LifeCycleOption::UncertainOnUse) {
            a.effect(Effect::del(v.known_p, vec![input, Term::Const(v.known)]));
            a.effect(Effect::add(v.known_p, vec![input, Term::Const(v.uncertain)]));
        }
    }
    for item in &op.inputs {
        for c in &item.constraints {
            let e = comp.constraint_holds(c)?;
            a.require(e);
        }
    }
    for c in &outcome.conditions {
        let e = comp.constraint_holds(c)?;
        a.require(e);
    }

    // Instance and retry bookkeeping
    match (sym.reification, levels) {
        (Some(reified), Some((pre, post))) => {
            let mut at_pre = instances.clone();
            at_pre.push(pre);
            let mut at_post = instances.clone();
            at_post.push(post);
            a.require(Expr::atom(v.connected, vec![op_const, pre, post]));
            a.require(Expr::Or(vec![
                Expr::atom(reified, at_pre),
                Expr::Eq(pre, Term::Const(v.level(0))),
            ]));
            a.require(Expr::not_atom(reified, at_post.clone()));
            a.effect(Effect::add(reified, at_post));
        }
        (Some(reified), None) => {
            a.require(Expr::not_atom(reified, instances.clone()));
            a.effect(Effect::add(reified, instances.clone()));
        }
        _ => {
            a.require(Expr::not_atom(v.has_done, vec![op_const, Term::Const(v.past)]));
        }
    }
    for e in history::ordering_preconditions(comp, &op.name)? {
        a.require(e);
    }

    // Outputs
    let uncertain = opts.life_cycle(LifeCycleOption::ConfirmOnDetermination);
    let (gained, lost) = if uncertain {
        (v.uncertain, v.known)
    } else {
        (v.known, v.uncertain)
    };
    for p in outcome.parameters() {
        let out = Term::Const(comp.datum(&p.item_id)?.constant);
        a.effect(Effect::del(v.mapped, vec![out]));
        a.effect(Effect::del(v.not_usable, vec![out]));
        a.effect(Effect::del(v.known_p, vec![out, Term::Const(lost)]));
        a.effect(Effect::add(v.free, vec![out]));
        a.effect(Effect::add(v.mapped_to, vec![out, out]));
        a.effect(Effect::add(v.known_p, vec![out, Term::Const(gained)]));
    }
    for item in &outcome.outcomes {
        for c in &item.constraints {
            for e in comp.constraint_effects(c)? {
                a.effect(e);
            }
        }
    }
    a.effect(Effect::add(v.has_done, vec![op_const, Term::Const(v.present)]));
    a.cost = NumExpr::Const(op.cost);

    comp.push_action(
        a,
        ActionOrigin::Operator {
            operator: op.name.clone(),
            outcome: index.unwrap_or(0),
            instances: instances.len(),
        },
    );
    Ok(())
}
