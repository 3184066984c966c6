//! Mapping actions: moving a known value into another slot.

use super::costs::{self, CostTier};
use super::vocabulary::{MAP, MAP_FREE_ALT};
use super::{ActionOrigin, Compilation};
use crate::core::options::{LifeCycleOption, MappingOption};
use crate::pddl::{Action, ActionKey, ConstId, Effect, Expr, Fact, NumExpr, SortId, Term};
use indexmap::{IndexMap, IndexSet};

/// Declared mappings as `(source, target) -> probability`. Under
/// `transitive` every edge is mirrored and the closure is added, keeping the
/// most probable chain. A pair declared with probability 0 stays forbidden
/// whatever chain would reach it.
pub fn mapping_graph(comp: &Compilation) -> IndexMap<(String, String), f64> {
    let mut edges: IndexMap<(String, String), f64> = IndexMap::new();
    for m in &comp.flow.list_of_mappings {
        if m.source_name == m.target_name {
            continue;
        }
        edges.insert((m.source_name.clone(), m.target_name.clone()), m.probability);
    }
    if !comp.options.mapping(MappingOption::Transitive) {
        return edges;
    }

    let forbidden: IndexSet<(String, String)> = edges
        .iter()
        .filter(|(_, p)| **p <= 0.0)
        .map(|(key, _)| key.clone())
        .collect();

    let mirrored: Vec<((String, String), f64)> = edges
        .iter()
        .map(|((s, t), p)| ((t.clone(), s.clone()), *p))
        .collect();
    for (key, p) in mirrored {
        edges.entry(key).or_insert(p);
    }

    let nodes: IndexSet<String> = edges
        .keys()
        .flat_map(|(s, t)| [s.clone(), t.clone()])
        .collect();
    for k in &nodes {
        for i in &nodes {
            let Some(p_ik) = edges.get(&(i.clone(), k.clone())).copied() else {
                continue;
            };
            if p_ik <= 0.0 {
                continue;
            }
            for j in &nodes {
                if i == j || forbidden.contains(&(i.clone(), j.clone())) {
                    continue;
                }
                let Some(p_kj) = edges.get(&(k.clone(), j.clone())).copied() else {
                    continue;
                };
                if p_kj <= 0.0 {
                    continue;
                }
                let p = p_ik * p_kj;
                let entry = edges.entry((i.clone(), j.clone())).or_insert(0.0);
                if p > *entry {
                    *entry = p;
                }
            }
        }
    }
    edges
}

impl Compilation<'_> {
    /// Map action over two parameters of `sort`.
    fn map_action(&self, key: ActionKey, sort: SortId, mappable: bool) -> (Action, Term, Term) {
        let v = &self.vocab;
        let mut a = Action::new(key);
        let x = a.param("x", sort);
        let y = a.param("y", sort);
        a.require(Expr::atom(v.known_p, vec![x, Term::Const(v.known)]));
        if mappable {
            a.require(Expr::atom(v.is_mappable, vec![x, y]));
        } else {
            a.require(Expr::not(Expr::Eq(x, y)));
        }
        a.require(Expr::not_atom(v.not_mappable, vec![x, y]));
        a.require(Expr::not_atom(v.mapped_to, vec![x, y]));
        a.require(Expr::not_atom(v.new_item, vec![y]));
        a.require(Expr::atom(v.been_used, vec![y]));

        let (gained, lost) = if self.options.life_cycle(LifeCycleOption::ConfirmOnMapping) {
            (v.uncertain, v.known)
        } else {
            (v.known, v.uncertain)
        };
        a.effect(Effect::del(v.known_p, vec![y, Term::Const(lost)]));
        a.effect(Effect::del(v.been_used, vec![y]));
        a.effect(Effect::del(v.not_usable, vec![y]));
        a.effect(Effect::add(v.known_p, vec![y, Term::Const(gained)]));
        a.effect(Effect::add(v.mapped_to, vec![x, y]));
        a.effect(Effect::add(v.mapped, vec![x]));
        (a, x, y)
    }
}

pub fn compile(comp: &mut Compilation) {
    let v = comp.vocab.clone();

    // Mappability facts
    let mut facts: Vec<Fact> = Vec::new();
    for ((source, target), p) in mapping_graph(comp) {
        let (Some(s), Some(t)) = (comp.data.get(&source), comp.data.get(&target)) else {
            continue;
        };
        let args: Vec<ConstId> = vec![s.constant, t.constant];
        if p <= 0.0 {
            facts.push(Fact::Atom(v.not_mappable, args));
        } else {
            facts.push(Fact::Atom(v.is_mappable, args.clone()));
            facts.push(Fact::Value(v.map_affinity, args, costs::map_affinity(p)));
        }
    }
    for z in &comp.lookahead {
        for d in comp.data.values().filter(|d| d.sort == z.sort) {
            let args = vec![z.constant, d.constant];
            facts.push(Fact::Atom(v.is_mappable, args.clone()));
            facts.push(Fact::Value(v.map_affinity, args, CostTier::UNIT));
        }
    }
    comp.init.extend(facts);

    let (mut a, x, y) = comp.map_action(ActionKey::new(MAP), v.generic, true);
    a.cost = NumExpr::Fluent(v.map_affinity, vec![x, y]);
    comp.push_action(a, ActionOrigin::Map);

    let (mut a, x, y) = comp.map_action(ActionKey::new(MAP_FREE_ALT), v.generic, true);
    a.require(Expr::atom(v.free, vec![x]));
    a.require(Expr::not(Expr::Eq(x, y)));
    a.effect(Effect::add(v.free, vec![y]));
    a.cost = NumExpr::Const(CostTier::INTERMEDIATE);
    comp.push_action(a, ActionOrigin::Map);

    // Same-type maps need no declared mapping
    let sorts: IndexSet<SortId> = comp.types.values().copied().collect();
    for sort in sorts {
        let name = comp.symbols.sort(sort).name.clone();
        let (mut a, _, _) = comp.map_action(ActionKey::baked(MAP, [name]), sort, false);
        a.cost = NumExpr::Const(CostTier::LOW);
        comp.push_action(a, ActionOrigin::Map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::core::builder::{Flow, FlowBuilder};
    use crate::core::options::CompileOptions;
    use crate::core::types::*;

    fn credit_flow() -> Flow {
        FlowBuilder::new("credit")
            .operator(OperatorDefinition::new("UserInfo").with_outputs(["Username", "AccountID"]))
            .operator(
                OperatorDefinition::new("CreditScore")
                    .with_inputs(["Email", "Account Info"])
                    .with_outputs(["Credit"]),
            )
            .mapping(MappingItem::new("Username", "Email"))
            .mapping(MappingItem::new("AccountID", "Account Info").with_probability(0.5))
            .goal(GoalItems::new(vec![GoalItem::operator("CreditScore")]))
            .build()
            .unwrap()
    }

    fn action_text(flow: &Flow, opts: &CompileOptions, name: &str) -> String {
        let p = compile(flow, opts).unwrap();
        let a = p.domain.actions.iter().find(|a| a.key.encode() == name).unwrap();
        crate::pddl::emit::action(&p.domain.symbols, a)
    }

    #[test]
    fn test_fp013_mappability_facts() {
        let text = compile(&credit_flow(), &CompileOptions::default())
            .unwrap()
            .problem_text();
        assert!(text.contains("(is_mappable username email)"));
        assert!(text.contains("(= (map_affinity username email) 10)"));
        assert!(text.contains("(is_mappable accountid account_info)"));
        assert!(text.contains("(= (map_affinity accountid account_info) 15)"));
        assert!(!text.contains("(is_mappable email username)"));
    }

    #[test]
    fn test_fp013_transitive_closure() {
        let flow = FlowBuilder::new("t")
            .mapping(MappingItem::new("a", "b").with_probability(0.5))
            .mapping(MappingItem::new("b", "c").with_probability(0.5))
            .memory_item(MemoryItem::new("a", MemoryState::Known))
            .memory_item(MemoryItem::new("b", MemoryState::Unknown))
            .memory_item(MemoryItem::new("c", MemoryState::Unknown))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_mapping(MappingOption::Transitive);
        let text = compile(&flow, &opts).unwrap().problem_text();
        assert!(text.contains("(is_mappable b a)"));
        assert!(text.contains("(is_mappable a c)"));
        assert!(text.contains("(is_mappable c a)"));
        // (2 - 0.25) x 10
        assert!(text.contains("(= (map_affinity a c) 18)"));
    }

    #[test]
    fn test_fp013_transitive_keeps_forbidden_pair() {
        let flow = FlowBuilder::new("t")
            .mapping(MappingItem::new("Alpha", "Gamma"))
            .mapping(MappingItem::new("Gamma", "Beta"))
            .mapping(MappingItem::new("Alpha", "Beta").with_probability(0.0))
            .memory_item(MemoryItem::new("Alpha", MemoryState::Known))
            .memory_item(MemoryItem::new("Beta", MemoryState::Unknown))
            .memory_item(MemoryItem::new("Gamma", MemoryState::Unknown))
            .build()
            .unwrap();
        let opts = CompileOptions::default().with_mapping(MappingOption::Transitive);
        let text = compile(&flow, &opts).unwrap().problem_text();
        assert!(text.contains("(not_mappable alpha beta)"));
        assert!(!text.contains("(is_mappable alpha beta)"));
        assert!(!text.contains("(map_affinity alpha beta)"));
        assert!(text.contains("(is_mappable alpha gamma)"));
        assert!(text.contains("(is_mappable gamma beta)"));
    }

    #[test]
    fn test_fp013_zero_probability_forbids() {
        let flow = FlowBuilder::new("z")
            .mapping(MappingItem::new("pin", "password").with_probability(0.0))
            .memory_item(MemoryItem::new("pin", MemoryState::Known))
            .memory_item(MemoryItem::new("password", MemoryState::Unknown))
            .build()
            .unwrap();
        let text = compile(&flow, &CompileOptions::default()).unwrap().problem_text();
        assert!(text.contains("(not_mappable pin password)"));
        assert!(!text.contains("(is_mappable pin password)"));
    }

    #[test]
    fn test_fp013_map_action() {
        let opts = CompileOptions::default();
        let map = action_text(&credit_flow(), &opts, "map");
        assert!(map.contains(":parameters (?x - generic ?y - generic)"));
        assert!(map.contains("(is_mappable ?x ?y)"));
        assert!(map.contains("(not (new_item ?y))"));
        assert!(map.contains("(been_used ?y)"));
        assert!(map.contains("(not (been_used ?y))"));
        assert!(map.contains("(mapped_to ?x ?y) (mapped ?x)"));
        assert!(map.contains("(increase (total-cost) (map_affinity ?x ?y))"));

        let alt = action_text(&credit_flow(), &opts, "map--free-alt");
        assert!(alt.contains("(free ?x)"));
        assert!(alt.contains("(not (= ?x ?y))"));
        assert!(alt.contains("(increase (total-cost) 1000)"));

        let uncertain = opts.with_life_cycle(LifeCycleOption::ConfirmOnMapping);
        let map = action_text(&credit_flow(), &uncertain, "map");
        assert!(map.contains("(known ?y uncertain)"));
    }

    #[test]
    fn test_fp013_same_type_map() {
        let flow = FlowBuilder::new("typed")
            .memory_item(MemoryItem::new("home", MemoryState::Known).typed("address"))
            .memory_item(MemoryItem::new("work", MemoryState::Unknown).typed("address"))
            .build()
            .unwrap();
        let text = action_text(&flow, &CompileOptions::default(), "map----address");
        assert!(text.contains(":parameters (?x - address ?y - address)"));
        assert!(!text.contains("is_mappable"));
        assert!(text.contains("(increase (total-cost) 50)"));
    }
}
