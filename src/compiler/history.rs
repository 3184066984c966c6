//! History facts, retry chains and operator orderings.

use super::Compilation;
use crate::core::error::CompileError;
use crate::pddl::{ConstId, Expr, Term};
use indexmap::IndexMap;

/// Ordering preconditions for operator `op`.
pub fn ordering_preconditions(comp: &Compilation, op: &str) -> Result<Vec<Expr>, CompileError> {
    let v = &comp.vocab;
    let flow = comp.flow;
    let mut out = Vec::new();
    let done = |name: &str, when: ConstId| -> Result<Expr, CompileError> {
        let c = comp.operator(name)?.constant;
        Ok(Expr::atom(v.has_done, vec![Term::Const(c), Term::Const(when)]))
    };

    if let Some(first) = &flow.starts_with {
        if first != op && !comp.in_history(first) {
            out.push(done(first, v.present)?);
        }
    }
    if let Some(last) = &flow.ends_with {
        if last != op {
            out.push(Expr::not(done(last, v.present)?));
        }
    }
    for po in &flow.partial_orders {
        if po.consequent == op && !comp.in_history(&po.antecedent) {
            out.push(done(&po.antecedent, v.present)?);
        }
        if po.antecedent == op {
            out.push(Expr::not(done(&po.consequent, v.past)?));
        }
    }
    Ok(out)
}

/// History facts and the `connected` retry chain.
pub fn compile(comp: &mut Compilation) -> Result<(), CompileError> {
    let flow = comp.flow;
    let v = comp.vocab.clone();
    let mut facts: Vec<(crate::pddl::PredId, Vec<ConstId>)> = Vec::new();

    if comp.options.allow_retries() {
        for sym in comp.operators.values() {
            for k in 0..sym.max_try as usize {
                facts.push((
                    v.connected,
                    vec![sym.constant, v.level(k), v.level(k + 1)],
                ));
            }
        }
    }

    let mut occurrences: IndexMap<(String, Vec<String>), usize> = IndexMap::new();
    for step in &flow.history {
        let sym = comp.operator(&step.name)?.clone();
        let past = (v.has_done, vec![sym.constant, v.past]);
        if !facts.contains(&past) {
            facts.push(past);
        }
        let Some(reified) = sym.reification else {
            continue;
        };

        let mut args = Vec::new();
        if comp.options.multi_instance() {
            let arity = comp
                .flow
                .operator(&step.name)
                .map(|o| o.required_inputs().len())
                .unwrap_or(0);
            if step.parameters.is_empty() && arity > 0 {
                continue;
            }
            if step.parameters.len() != arity {
                return Err(CompileError::UnknownSymbol(format!(
                    "history step '{}' has {} parameter(s), operator takes {}",
                    step.name,
                    step.parameters.len(),
                    arity
                )));
            }
            for p in &step.parameters {
                args.push(comp.datum(p)?.constant);
            }
        }
        let key = if comp.options.multi_instance() {
            (step.name.clone(), step.parameters.clone())
        } else {
            (step.name.clone(), Vec::new())
        };
        let count = occurrences.entry(key).or_insert(0);
        *count += 1;
        if comp.options.allow_retries() {
            args.push(v.level(*count));
        } else if *count > 1 {
            continue;
        }
        facts.push((reified, args));
    }

    for (pred, args) in facts {
        comp.push_fact(pred, args);
    }
    Ok(())
}
