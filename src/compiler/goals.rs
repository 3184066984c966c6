//! Goal compilation and goal composition.
//!
//! `AND_AND` conjoins every goal. `OR_AND` lets any one group satisfy the
//! goal through `goal-<i>` actions. `AND_OR` requires every group, each
//! satisfied by any one of its goals through `goal-<i>-<j>` actions.

use super::costs::CostTier;
use super::{ActionOrigin, Compilation};
use crate::core::error::CompileError;
use crate::core::options::GoalType;
use crate::core::types::{GoalItem, GoalKind, GoalName, Step};
use crate::pddl::{Action, ActionKey, Effect, Expr, NumExpr, Term};
use indexmap::IndexSet;

pub const GOAL_PRE: &str = "done_goal_pre";
pub const GOAL_POST: &str = "done_goal_post";

/// Name of the action satisfying goal `j` of group `i` under `AND_OR`, or
/// group `i` under `OR_AND`.
pub fn goal_action(group: usize, goal: Option<usize>) -> String {
    match goal {
        Some(j) => format!("goal-{}-{}", group, j),
        None => format!("goal-{}", group),
    }
}

struct GoalCompiler<'c, 'a> {
    comp: &'c mut Compilation<'a>,
    used: IndexSet<String>,
}

impl GoalCompiler<'_, '_> {
    fn goal(&mut self, item: &GoalItem) -> Result<Expr, CompileError> {
        match (&item.goal_type, &item.goal_name) {
            (_, GoalName::Constraint(c)) => self.comp.constraint_holds(c),
            (GoalKind::Operator, GoalName::Name(name)) => self.operator_done(name),
            (GoalKind::Operator, GoalName::Step(step)) => self.step_done(step),
            (GoalKind::ObjectKnown, GoalName::Name(name)) => self.known(name),
            (GoalKind::ObjectUsed, GoalName::Name(name)) => self.used(name),
            (kind, GoalName::Step(step)) => Err(CompileError::UnsupportedGoalShape(format!(
                "{:?} goal on step '{}'",
                kind, step.name
            ))),
            (GoalKind::Constraint, GoalName::Name(name)) => Err(
                CompileError::UnsupportedGoalShape(format!("constraint goal '{}' has no expression", name)),
            ),
        }
    }

    fn operator_done(&self, name: &str) -> Result<Expr, CompileError> {
        let v = &self.comp.vocab;
        let c = self.comp.operator(name)?.constant;
        Ok(Expr::atom(v.has_done, vec![Term::Const(c), Term::Const(v.present)]))
    }

    /// A specific call of an operator. Without instances this is the same
    /// as the operator goal.
    fn step_done(&self, step: &Step) -> Result<Expr, CompileError> {
        let comp = &*self.comp;
        let sym = comp.operator(&step.name)?;
        let reified = match sym.reification {
            Some(r) if comp.options.multi_instance() && !step.parameters.is_empty() => r,
            _ => return self.operator_done(&step.name),
        };
        let mut args = Vec::new();
        for p in &step.parameters {
            args.push(Term::Const(comp.datum(p)?.constant));
        }
        if comp.options.allow_retries() {
            let level = 1 + comp.flow.history_count(step);
            args.push(Term::Const(comp.vocab.level(level)));
        }
        Ok(Expr::atom(reified, args))
    }

    /// Data items of a declared type that an operator, a mapping or a slot
    /// property refers to.
    fn typed_items(&self, type_name: &str) -> Option<Vec<String>> {
        let comp = &*self.comp;
        let sort = *comp.types.get(type_name)?;
        let mut referenced: IndexSet<String> = IndexSet::new();
        for op in &comp.flow.operators {
            for p in op.input_parameters().into_iter().chain(op.output_parameters()) {
                referenced.insert(p.item_id);
            }
        }
        for m in &comp.flow.list_of_mappings {
            referenced.insert(m.source_name.clone());
            referenced.insert(m.target_name.clone());
        }
        for s in &comp.flow.slot_properties {
            referenced.insert(s.slot_name.clone());
        }
        let mut items = Vec::new();
        for d in comp.data.values() {
            if !comp.symbols.is_subsort(d.sort, sort) {
                continue;
            }
            if referenced.contains(&d.name) {
                items.push(d.name.clone());
            } else {
                tracing::debug!(item = %d.name, ty = type_name, "orphan item left out of type goal");
            }
        }
        Some(items)
    }

    fn known(&self, name: &str) -> Result<Expr, CompileError> {
        let comp = &*self.comp;
        let v = &comp.vocab;
        let known = |item: &str| -> Result<Expr, CompileError> {
            let c = comp.datum(item)?.constant;
            Ok(Expr::atom(v.known_p, vec![Term::Const(c), Term::Const(v.known)]))
        };
        if comp.data.contains_key(name) {
            return known(name);
        }
        match self.typed_items(name) {
            Some(items) => Ok(Expr::And(
                items.iter().map(|i| known(i)).collect::<Result<_, _>>()?,
            )),
            None => Err(CompileError::UnknownSymbol(format!("goal item '{}'", name))),
        }
    }

    fn used(&mut self, name: &str) -> Result<Expr, CompileError> {
        let targets: Vec<String> = if self.comp.data.contains_key(name) {
            vec![name.to_string()]
        } else {
            match self.typed_items(name) {
                Some(items) => items,
                None => return Err(CompileError::UnknownSymbol(format!("goal item '{}'", name))),
            }
        };
        let v = &self.comp.vocab;
        let mut atoms = Vec::new();
        for t in &targets {
            let c = self.comp.datum(t)?.constant;
            atoms.push(Expr::atom(v.been_used, vec![Term::Const(c)]));
        }
        self.used.extend(targets);
        Ok(if atoms.len() == 1 {
            atoms.remove(0)
        } else {
            Expr::Or(atoms)
        })
    }
}

/// Compile the goal. Returns the data items an `OBJECT_USED` goal targets;
/// those start without `been_used`.
pub fn compile(comp: &mut Compilation) -> Result<IndexSet<String>, CompileError> {
    let flow = comp.flow;
    let goal_type = comp.options.goal_type;
    let multi = comp.options.multi_instance();
    let mut gc = GoalCompiler {
        comp: &mut *comp,
        used: IndexSet::new(),
    };

    let mut groups: Vec<Vec<Expr>> = Vec::new();
    for group in &flow.goal_items {
        let mut exprs = Vec::new();
        for item in &group.goals {
            if goal_type == GoalType::OrAnd && multi && matches!(item.goal_name, GoalName::Step(_)) {
                return Err(CompileError::UnsupportedGoalShape(
                    "step goals cannot be combined under OR_AND with multi_instance".into(),
                ));
            }
            exprs.push(gc.goal(item)?);
        }
        groups.push(exprs);
    }
    let used = gc.used;

    match goal_type {
        GoalType::AndAnd => {
            comp.goal = groups.into_iter().flatten().collect();
        }
        GoalType::OrAnd => {
            let pre = comp.symbols.declare_predicate(GOAL_PRE, vec![]);
            let post = comp.symbols.declare_predicate(GOAL_POST, vec![]);
            for (i, exprs) in groups.into_iter().enumerate() {
                let mut a = Action::new(ActionKey::new(goal_action(i, None)));
                a.precondition = exprs;
                a.effect(Effect::add(pre, vec![]));
                a.cost = NumExpr::Const(CostTier::VERY_HIGH);
                comp.push_action(a, ActionOrigin::Goal);
            }
            let mut a = Action::new(ActionKey::new("goal-post"));
            a.require(Expr::atom(pre, vec![]));
            a.effect(Effect::add(post, vec![]));
            a.cost = NumExpr::Const(CostTier::ZERO);
            comp.push_action(a, ActionOrigin::Goal);
            comp.goal = vec![Expr::atom(post, vec![])];
        }
        GoalType::AndOr => {
            let mut goal = Vec::new();
            for (i, exprs) in groups.into_iter().enumerate() {
                let done = comp
                    .symbols
                    .declare_predicate(&format!("has_done_pre_{}", i), vec![]);
                for (j, e) in exprs.into_iter().enumerate() {
                    let mut a = Action::new(ActionKey::new(goal_action(i, Some(j))));
                    a.require(e);
                    a.effect(Effect::add(done, vec![]));
                    a.cost = NumExpr::Const(CostTier::ZERO);
                    comp.push_action(a, ActionOrigin::Goal);
                }
                goal.push(Expr::atom(done, vec![]));
            }
            comp.goal = goal;
        }
    }
    tracing::debug!(goal_type = ?goal_type, goals = comp.goal.len(), "compiled goal");
    Ok(used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::compiler::tests::basic_chain;
    use crate::core::builder::FlowBuilder;
    use crate::core::options::CompileOptions;
    use crate::core::types::*;

    fn agents() -> crate::core::builder::Flow {
        FlowBuilder::new("agents")
            .operator(OperatorDefinition::new("AgentX").with_cost(5))
            .operator(OperatorDefinition::new("AgentY").with_cost(2))
            .operator(OperatorDefinition::new("AgentA").with_cost(1))
            .operator(OperatorDefinition::new("AgentB").with_cost(3))
            .goal(GoalItems::new(vec![GoalItem::operator("AgentX"), GoalItem::operator("AgentY")]))
            .goal(GoalItems::new(vec![GoalItem::operator("AgentA"), GoalItem::operator("AgentB")]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_fp014_and_and() {
        let p = compile(&agents(), &CompileOptions::default()).unwrap();
        assert_eq!(p.problem.goal.len(), 4);
    }

    #[test]
    fn test_fp014_and_or() {
        let opts = CompileOptions::default().with_goal_type(GoalType::AndOr);
        let p = compile(&agents(), &opts).unwrap();
        let dom = p.domain_text();
        assert!(dom.contains("(:action goal-0-1\n"));
        assert!(dom.contains("(:action goal-1-0\n"));
        assert!(dom.contains("(has_done_pre_0)"));
        let prob = p.problem_text();
        assert!(prob.contains("(:goal (and (has_done_pre_0) (has_done_pre_1)))"));
    }

    #[test]
    fn test_fp014_or_and() {
        let opts = CompileOptions::default().with_goal_type(GoalType::OrAnd);
        let p = compile(&agents(), &opts).unwrap();
        let dom = p.domain_text();
        assert!(dom.contains("(:action goal-0\n"));
        assert!(dom.contains("(:action goal-1\n"));
        assert!(dom.contains("(:action goal-post\n"));
        assert!(dom.contains("(increase (total-cost) 100000)"));
        assert!(p.problem_text().contains("(:goal (and (done_goal_post)))"));
    }

    #[test]
    fn test_fp014_or_and_rejects_step_goals() {
        let flow = FlowBuilder::new("s")
            .operator(OperatorDefinition::new("Fix").with_inputs(["ticket"]))
            .goal(GoalItems::new(vec![GoalItem::step(
                Step::new("Fix").with_parameters(["ticket"]),
            )]))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_goal_type(GoalType::OrAnd);
        assert!(matches!(
            compile(&flow, &opts),
            Err(CompileError::UnsupportedGoalShape(_))
        ));
        let p = compile(&flow, &CompileOptions::default()).unwrap();
        assert!(p
            .problem_text()
            .contains("(:goal (and (has_done_fix ticket try_level_1)))"));
    }

    #[test]
    fn test_fp014_known_and_used_by_type() {
        let flow = FlowBuilder::new("k")
            .memory_item(MemoryItem::new("home", MemoryState::Unknown).typed("address"))
            .memory_item(MemoryItem::new("work", MemoryState::Unknown).typed("address"))
            .memory_item(MemoryItem::new("spare", MemoryState::Unknown).typed("address"))
            .operator(OperatorDefinition::new("Ship").with_inputs(["home", "work"]))
            .goal(GoalItems::new(vec![GoalItem::known("address")]))
            .goal(GoalItems::new(vec![GoalItem::used("home")]))
            .build()
            .unwrap();
        let p = compile(&flow, &CompileOptions::default()).unwrap();
        let prob = p.problem_text();
        assert!(prob.contains("(and (known home known) (known work known))"));
        assert!(!prob.contains("(known spare known)"));
        assert!(prob.contains("(been_used home))"));
        assert!(prob.contains("(been_used work)\n"));
    }

    #[test]
    fn test_fp014_unknown_goal_item() {
        let flow = FlowBuilder::new("u")
            .goal(GoalItems::new(vec![GoalItem::known("ghost")]))
            .build();
        // The validator catches it first; compiling a raw definition does not
        if let Ok(flow) = flow {
            assert!(compile(&flow, &CompileOptions::default()).is_err());
        }
        let p = compile(&basic_chain(), &CompileOptions::default()).unwrap();
        assert_eq!(p.problem.goal.len(), 1);
    }
}
