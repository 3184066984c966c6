//! Slot filling and confirmation.
//!
//! Desirability decides the ask cost: `slot_goodness = (2 - d) × VERY_HIGH`.
//! A desirability of zero forbids asking.

use super::costs::{self, CostTier};
use super::vocabulary::{ASK, ASK_ALL_FOR, ASK_LAST_RESORT, CONFIRM};
use super::{ActionOrigin, Compilation, DataSymbol};
use crate::core::options::{LifeCycleOption, SlotOption};
use crate::core::types::SlotProperty;
use crate::pddl::{Action, ActionKey, Effect, Expr, Fact, NumExpr, SortId, Term};
use indexmap::IndexMap;

pub use crate::core::types::DEFAULT_DESIRABILITY;

/// Desirability of an unrated data item that some operator produces.
pub const PRODUCED_DESIRABILITY: f64 = 0.5;

/// Effective slot property per object name (data items and lookahead).
pub fn slot_properties(comp: &Compilation) -> IndexMap<String, SlotProperty> {
    let flow = comp.flow;
    let declared: IndexMap<&str, &SlotProperty> = flow
        .slot_properties
        .iter()
        .map(|s| (s.slot_name.as_str(), s))
        .collect();

    // Propagating properties by sort; the first one declared wins
    let mut by_sort: IndexMap<SortId, &SlotProperty> = IndexMap::new();
    for s in &flow.slot_properties {
        if s.propagate_desirability {
            if let Some(d) = comp.data.get(&s.slot_name) {
                by_sort.entry(d.sort).or_insert(s);
            }
        }
    }

    let mut out = IndexMap::new();
    for obj in comp.all_objects() {
        let prop = match declared.get(obj.name.as_str()) {
            Some(p) => (*p).clone(),
            None => match by_sort.get(&obj.sort) {
                Some(p) => SlotProperty {
                    slot_name: obj.name.clone(),
                    ..(*p).clone()
                },
                None => {
                    let produced = !flow.producers_of(&obj.name).is_empty();
                    let d = if produced {
                        PRODUCED_DESIRABILITY
                    } else {
                        DEFAULT_DESIRABILITY
                    };
                    SlotProperty::new(obj.name.clone(), d)
                }
            },
        };
        out.insert(obj.name.clone(), prop);
    }
    out
}

impl Compilation<'_> {
    /// Preconditions shared by every ask of `x`.
    fn require_askable(&self, a: &mut Action, x: Term) {
        let v = &self.vocab;
        a.require(Expr::not_atom(v.known_p, vec![x, Term::Const(v.known)]));
        a.require(Expr::not_atom(v.not_slotfillable, vec![x]));
    }

    /// Effects shared by every ask of `x`.
    fn ask_effects(&self, a: &mut Action, x: Term) {
        let v = &self.vocab;
        let (gained, lost) = if self.options.life_cycle(LifeCycleOption::ConfirmOnSlot) {
            (v.uncertain, v.known)
        } else {
            (v.known, v.uncertain)
        };
        a.effect(Effect::del(v.not_usable, vec![x]));
        a.effect(Effect::del(v.known_p, vec![x, Term::Const(lost)]));
        a.effect(Effect::add(v.free, vec![x]));
        a.effect(Effect::add(v.mapped_to, vec![x, x]));
        a.effect(Effect::add(v.known_p, vec![x, Term::Const(gained)]));
    }

    fn ask_item(&self, key: ActionKey, obj: &DataSymbol, earlier: &[Term]) -> Action {
        let v = &self.vocab;
        let x = Term::Const(obj.constant);
        let mut a = Action::new(key);
        self.require_askable(&mut a, x);
        for e in earlier {
            a.require(Expr::atom(v.known_p, vec![*e, Term::Const(v.known)]));
        }
        self.ask_effects(&mut a, x);
        a.cost = NumExpr::Fluent(v.slot_goodness, vec![x]);
        a
    }
}

pub fn compile(comp: &mut Compilation) {
    let props = slot_properties(comp);
    let v = comp.vocab.clone();

    for obj in comp.all_objects().cloned().collect::<Vec<_>>() {
        let d = props
            .get(&obj.name)
            .map(|p| p.slot_desirability)
            .unwrap_or(DEFAULT_DESIRABILITY);
        comp.init.push(Fact::Value(
            v.slot_goodness,
            vec![obj.constant],
            costs::slot_goodness(d),
        ));
        if d <= 0.0 {
            comp.push_fact(v.not_slotfillable, vec![obj.constant]);
        }
    }

    if comp.options.slot(SlotOption::Ordered) {
        compile_ordered(comp);
    } else {
        let mut a = Action::new(ActionKey::new(ASK));
        let x = a.param("x", v.generic);
        comp.require_askable(&mut a, x);
        comp.ask_effects(&mut a, x);
        a.cost = NumExpr::Fluent(v.slot_goodness, vec![x]);
        comp.push_action(a, ActionOrigin::Ask { item: None });
    }

    if comp.options.slot(SlotOption::LastResort) {
        compile_last_resort(comp, &props);
    }
    if comp.options.slot(SlotOption::AllTogether) {
        compile_all_together(comp, &props);
    }

    if comp.options.has_life_cycle() {
        let mut a = Action::new(ActionKey::new(CONFIRM));
        let x = a.param("x", v.generic);
        a.require(Expr::atom(v.known_p, vec![x, Term::Const(v.uncertain)]));
        a.effect(Effect::del(v.known_p, vec![x, Term::Const(v.uncertain)]));
        a.effect(Effect::add(v.known_p, vec![x, Term::Const(v.known)]));
        a.cost = NumExpr::Const(CostTier::UNIT);
        comp.push_action(a, ActionOrigin::Confirm);
    }
}

/// One ask per operator slot, in input order, plus one per other object.
fn compile_ordered(comp: &mut Compilation) {
    let flow = comp.flow;
    let mut inputs = indexmap::IndexSet::new();
    for op in &flow.operators {
        let Ok(sym) = comp.operator(&op.name) else {
            continue;
        };
        let op_id = sym.id.clone();
        let mut earlier = Vec::new();
        for p in op.required_inputs() {
            inputs.insert(p.item_id.clone());
            let Some(obj) = comp.data.get(&p.item_id).cloned() else {
                continue;
            };
            let slot = comp.symbols.constant(obj.constant).name.clone();
            let key = ActionKey::baked(ASK, [op_id.clone(), slot]);
            let a = comp.ask_item(key, &obj, &earlier);
            earlier.push(Term::Const(obj.constant));
            comp.push_action(
                a,
                ActionOrigin::Ask {
                    item: Some(obj.name.clone()),
                },
            );
        }
    }
    let rest: Vec<DataSymbol> = comp
        .all_objects()
        .filter(|o| !inputs.contains(&o.name))
        .cloned()
        .collect();
    for obj in rest {
        let id = comp.symbols.constant(obj.constant).name.clone();
        let a = comp.ask_item(ActionKey::baked(ASK, [id]), &obj, &[]);
        comp.push_action(
            a,
            ActionOrigin::Ask {
                item: Some(obj.name.clone()),
            },
        );
    }
}

/// Cheaper asks that only open once every producer has run.
fn compile_last_resort(comp: &mut Compilation, props: &IndexMap<String, SlotProperty>) {
    let v = comp.vocab.clone();
    let flow = comp.flow;
    let data: Vec<DataSymbol> = comp.data.values().cloned().collect();
    for obj in data {
        let producers = flow.producers_of(&obj.name);
        if producers.is_empty() {
            continue;
        }
        let Some(prop) = props.get(&obj.name) else {
            continue;
        };
        if prop.do_not_last_resort || prop.slot_desirability <= 0.0 {
            continue;
        }
        let id = comp.symbols.constant(obj.constant).name.clone();
        let x = Term::Const(obj.constant);
        let mut a = Action::new(ActionKey::baked(ASK_LAST_RESORT, [id]));
        comp.require_askable(&mut a, x);
        for producer in producers {
            let Ok(sym) = comp.operator(&producer.name) else {
                continue;
            };
            let c = Term::Const(sym.constant);
            a.require(Expr::Or(vec![
                Expr::atom(v.has_done, vec![c, Term::Const(v.present)]),
                Expr::atom(v.has_done, vec![c, Term::Const(v.past)]),
            ]));
        }
        comp.ask_effects(&mut a, x);
        a.cost = NumExpr::Const(costs::last_resort_cost(prop.slot_desirability));
        comp.push_action(
            a,
            ActionOrigin::Ask {
                item: Some(obj.name.clone()),
            },
        );
    }
}

/// Operators with more required slots than this only get the grouped ask
/// over all of them.
pub const MAX_PARTIAL_GROUP_SLOTS: usize = 4;

/// Grouped asks filling every unfilled slot of an operator. One variant per
/// non-empty set of unfilled slots; the other slots must already be known.
fn compile_all_together(comp: &mut Compilation, props: &IndexMap<String, SlotProperty>) {
    let v = comp.vocab.clone();
    let flow = comp.flow;
    for op in &flow.operators {
        let slots: Vec<DataSymbol> = op
            .required_inputs()
            .iter()
            .filter_map(|p| comp.data.get(&p.item_id).cloned())
            .collect();
        if slots.is_empty() {
            continue;
        }
        let Ok(sym) = comp.operator(&op.name) else {
            continue;
        };
        let op_id = sym.id.clone();

        let n = slots.len();
        let groups: Vec<Vec<bool>> = if n <= MAX_PARTIAL_GROUP_SLOTS {
            (1..1u32 << n)
                .rev()
                .map(|mask| (0..n).map(|k| mask & (1 << k) != 0).collect())
                .collect()
        } else {
            vec![vec![true; n]]
        };
        for asked in groups {
            let mut baked = vec![op_id.clone()];
            if asked.iter().any(|a| !a) {
                for (obj, _) in slots.iter().zip(&asked).filter(|(_, a)| **a) {
                    baked.push(comp.symbols.constant(obj.constant).name.clone());
                }
            }
            let mut a = Action::new(ActionKey::baked(ASK_ALL_FOR, baked));
            let mut total = 0;
            for (obj, ask) in slots.iter().zip(&asked) {
                let x = Term::Const(obj.constant);
                if !ask {
                    a.require(Expr::atom(v.known_p, vec![x, Term::Const(v.known)]));
                    continue;
                }
                comp.require_askable(&mut a, x);
                comp.ask_effects(&mut a, x);
                let d = props
                    .get(&obj.name)
                    .map(|s| s.slot_desirability)
                    .unwrap_or(DEFAULT_DESIRABILITY);
                total += costs::slot_goodness(d);
            }
            a.cost = NumExpr::Const(total);
            comp.push_action(
                a,
                ActionOrigin::AskAll {
                    operator: op.name.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::tests::basic_chain;
    use crate::compiler::{compile, CompiledProblem};
    use crate::core::builder::FlowBuilder;
    use crate::core::options::CompileOptions;
    use crate::core::types::*;

    fn find(p: &CompiledProblem, name: &str) -> Option<String> {
        p.domain
            .actions
            .iter()
            .find(|a| a.key.encode() == name)
            .map(|a| crate::pddl::emit::action(&p.domain.symbols, a))
    }

    #[test]
    fn test_fp012_default_desirability() {
        let p = compile(&basic_chain(), &CompileOptions::default()).unwrap();
        let text = p.problem_text();
        assert!(text.contains("(= (slot_goodness db_link) 100000)"));
        assert!(text.contains("(= (slot_goodness errors) 150000)"));
        let ask = find(&p, "ask").unwrap();
        assert!(ask.contains("(not (known ?x known))"));
        assert!(ask.contains("(not (not_slotfillable ?x))"));
        assert!(ask.contains("(increase (total-cost) (slot_goodness ?x))"));
    }

    #[test]
    fn test_fp012_forbidden_slot() {
        let flow = FlowBuilder::new("f")
            .memory_item(MemoryItem::new("secret", MemoryState::Unknown))
            .slot_property(SlotProperty::new("secret", 0.0))
            .build()
            .unwrap();
        let text = compile(&flow, &CompileOptions::default()).unwrap().problem_text();
        assert!(text.contains("(not_slotfillable secret)"));
        assert!(text.contains("(= (slot_goodness secret) 200000)"));
    }

    #[test]
    fn test_fp012_propagated_desirability() {
        let flow = FlowBuilder::new("p")
            .memory_item(MemoryItem::new("home", MemoryState::Unknown).typed("address"))
            .memory_item(MemoryItem::new("work", MemoryState::Unknown).typed("address"))
            .memory_item(MemoryItem::new("name", MemoryState::Unknown))
            .slot_property(SlotProperty {
                slot_name: "home".into(),
                slot_desirability: 0.0,
                propagate_desirability: true,
                do_not_last_resort: false,
            })
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_lookahead(1);
        let text = compile(&flow, &opts).unwrap().problem_text();
        assert!(text.contains("(not_slotfillable home)"));
        assert!(text.contains("(not_slotfillable work)"));
        assert!(text.contains("(not_slotfillable new_object_address_0)"));
        assert!(!text.contains("(not_slotfillable name)"));
    }

    #[test]
    fn test_fp012_ordered_asks() {
        let flow = FlowBuilder::new("o")
            .operator(OperatorDefinition::new("Book").with_inputs(["from", "to"]))
            .memory_item(MemoryItem::new("note", MemoryState::Unknown))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_slot(SlotOption::Ordered);
        let p = compile(&flow, &opts).unwrap();
        assert!(find(&p, "ask").is_none());
        let first = find(&p, "ask----book----from").unwrap();
        assert!(!first.contains("(known to known)"));
        let second = find(&p, "ask----book----to").unwrap();
        assert!(second.contains("(known from known)"));
        assert!(second.contains("(increase (total-cost) (slot_goodness to))"));
        assert!(find(&p, "ask----note").is_some());
    }

    #[test]
    fn test_fp012_last_resort() {
        let opts = CompileOptions::default().with_slot(SlotOption::LastResort);
        let p = compile(&basic_chain(), &opts).unwrap();
        assert!(find(&p, "ask").is_some());
        let lr = find(&p, "ask_last_resort----errors").unwrap();
        assert!(lr.contains("(or (has_done finderrors present) (has_done finderrors past))"));
        assert!(lr.contains("(increase (total-cost) 7500)"));
        assert!(find(&p, "ask_last_resort----db_link").is_none());
    }

    #[test]
    fn test_fp012_all_together() {
        let flow = FlowBuilder::new("a")
            .operator(OperatorDefinition::new("Book").with_inputs(["from", "to"]))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_slot(SlotOption::AllTogether);
        let p = compile(&flow, &opts).unwrap();
        assert!(find(&p, "ask").is_some());
        let all = find(&p, "ask_all_for----book").unwrap();
        assert!(all.contains("(known from known)"));
        assert!(all.contains("(known to known)"));
        assert!(all.contains("(increase (total-cost) 200000)"));
    }

    #[test]
    fn test_fp012_all_together_with_known_slot() {
        let flow = FlowBuilder::new("a")
            .memory_item(MemoryItem::new("from", MemoryState::Known))
            .operator(OperatorDefinition::new("Book").with_inputs(["from", "to"]))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_slot(SlotOption::AllTogether);
        let p = compile(&flow, &opts).unwrap();
        let rest = find(&p, "ask_all_for----book----to").unwrap();
        assert!(rest.contains(":precondition (and (known from known)"));
        assert!(rest.contains("(not (known to known))"));
        assert!(!rest.contains("(not (known from known))"));
        assert!(rest.contains("(increase (total-cost) 100000)"));
        assert!(find(&p, "ask_all_for----book----from").is_some());

        let parser = crate::plan::parser::PlanParser::new(&flow, &opts, &p);
        let plan = parser.parse(100000, &["ask_all_for----book----to".to_string()]).unwrap();
        assert_eq!(plan.steps, vec![crate::plan::PlanStep::ask("to")]);
    }

    #[test]
    fn test_fp012_confirm_only_with_life_cycle() {
        let p = compile(&basic_chain(), &CompileOptions::default()).unwrap();
        assert!(find(&p, "confirm").is_none());
        let opts = CompileOptions::default().with_life_cycle(LifeCycleOption::ConfirmOnSlot);
        let p = compile(&basic_chain(), &opts).unwrap();
        let confirm = find(&p, "confirm").unwrap();
        assert!(confirm.contains(":precondition (and (known ?x uncertain))"));
        let ask = find(&p, "ask").unwrap();
        assert!(ask.contains("(known ?x uncertain)"));
    }
}
