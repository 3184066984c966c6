//! FP-006: PDDL text emission.
//!
//! Deterministic: symbols are written in arena order, so identical inputs
//! produce byte-identical text.

use super::*;
use std::fmt::Write;

const REQUIREMENTS: &str = "(:requirements :typing :equality :negative-preconditions \
                            :disjunctive-preconditions :action-costs)";
const TOTAL_COST: &str = "total-cost";

fn term(symbols: &SymbolTable, params: &[Param], t: &Term) -> String {
    match t {
        Term::Var(i) => match params.get(*i) {
            Some(p) => format!("?{}", p.name),
            None => format!("?p{}", i),
        },
        Term::Const(c) => symbols.constant(*c).name.clone(),
    }
}

fn atom(symbols: &SymbolTable, params: &[Param], a: &Atom) -> String {
    let name = &symbols.predicate(a.pred).name;
    if a.args.is_empty() {
        return format!("({})", name);
    }
    let args: Vec<String> = a.args.iter().map(|t| term(symbols, params, t)).collect();
    format!("({} {})", name, args.join(" "))
}

/// Render a formula.
pub fn expr(symbols: &SymbolTable, params: &[Param], e: &Expr) -> String {
    match e {
        Expr::Atom(a) => atom(symbols, params, a),
        Expr::And(items) => nary("and", symbols, params, items),
        Expr::Or(items) => nary("or", symbols, params, items),
        Expr::Not(inner) => format!("(not {})", expr(symbols, params, inner)),
        Expr::Eq(a, b) => format!(
            "(= {} {})",
            term(symbols, params, a),
            term(symbols, params, b)
        ),
        Expr::True => "(and)".to_string(),
        Expr::False => "(or)".to_string(),
    }
}

fn nary(op: &str, symbols: &SymbolTable, params: &[Param], items: &[Expr]) -> String {
    if items.is_empty() {
        return format!("({})", op);
    }
    let parts: Vec<String> = items.iter().map(|e| expr(symbols, params, e)).collect();
    format!("({} {})", op, parts.join(" "))
}

fn num(symbols: &SymbolTable, params: &[Param], n: &NumExpr) -> String {
    match n {
        NumExpr::Const(v) => v.to_string(),
        NumExpr::Fluent(id, args) => {
            let name = &symbols.fluent(*id).name;
            if args.is_empty() {
                format!("({})", name)
            } else {
                let args: Vec<String> = args.iter().map(|t| term(symbols, params, t)).collect();
                format!("({} {})", name, args.join(" "))
            }
        }
    }
}

fn typed_params(symbols: &SymbolTable, prefix: &str, sorts: &[SortId]) -> String {
    sorts
        .iter()
        .enumerate()
        .map(|(i, s)| format!("?{}{} - {}", prefix, i + 1, symbols.sort(*s).name))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render the domain file.
pub fn domain(d: &Domain) -> String {
    let s = &d.symbols;
    let mut out = String::new();
    let _ = writeln!(out, "(define (domain {})", d.name);
    let _ = writeln!(out, "  {}", REQUIREMENTS);

    // Types grouped by parent, roots last under `object`
    out.push_str("  (:types\n");
    let mut groups: indexmap::IndexMap<String, Vec<&str>> = indexmap::IndexMap::new();
    for (_, sort) in s.sorts() {
        let parent = sort
            .parent
            .map(|p| s.sort(p).name.clone())
            .unwrap_or_else(|| "object".to_string());
        groups.entry(parent).or_default().push(&sort.name);
    }
    if let Some(roots) = groups.shift_remove("object") {
        groups.insert("object".to_string(), roots);
    }
    for (parent, children) in &groups {
        let _ = writeln!(out, "    {} - {}", children.join(" "), parent);
    }
    out.push_str("  )\n");

    // Constants grouped by sort
    out.push_str("  (:constants\n");
    let mut by_sort: indexmap::IndexMap<SortId, Vec<&str>> = indexmap::IndexMap::new();
    for (_, c) in s.constants() {
        by_sort.entry(c.sort).or_default().push(&c.name);
    }
    for (sort, names) in &by_sort {
        let _ = writeln!(out, "    {} - {}", names.join(" "), s.sort(*sort).name);
    }
    out.push_str("  )\n");

    out.push_str("  (:predicates\n");
    for (_, p) in s.predicates() {
        if p.params.is_empty() {
            let _ = writeln!(out, "    ({})", p.name);
        } else {
            let _ = writeln!(out, "    ({} {})", p.name, typed_params(s, "x", &p.params));
        }
    }
    out.push_str("  )\n");

    out.push_str("  (:functions\n");
    let _ = writeln!(out, "    ({}) - number", TOTAL_COST);
    for (_, f) in s.fluents() {
        if f.name == TOTAL_COST {
            continue;
        }
        if f.params.is_empty() {
            let _ = writeln!(out, "    ({}) - number", f.name);
        } else {
            let _ = writeln!(out, "    ({} {}) - number", f.name, typed_params(s, "x", &f.params));
        }
    }
    out.push_str("  )\n");

    for a in &d.actions {
        out.push_str(&action(s, a));
    }
    out.push_str(")\n");
    out
}

/// Render one action schema.
pub fn action(s: &SymbolTable, a: &Action) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  (:action {}", a.key.encode());
    let params: Vec<String> = a
        .params
        .iter()
        .map(|p| format!("?{} - {}", p.name, s.sort(p.sort).name))
        .collect();
    let _ = writeln!(out, "    :parameters ({})", params.join(" "));
    let _ = writeln!(
        out,
        "    :precondition {}",
        nary("and", s, &a.params, &a.precondition)
    );
    let mut effects: Vec<String> = a
        .effects
        .iter()
        .map(|e| match e {
            Effect::Add(at) => atom(s, &a.params, at),
            Effect::Del(at) => format!("(not {})", atom(s, &a.params, at)),
        })
        .collect();
    effects.push(format!(
        "(increase ({}) {})",
        TOTAL_COST,
        num(s, &a.params, &a.cost)
    ));
    let _ = writeln!(out, "    :effect (and {})", effects.join(" "));
    out.push_str("  )\n");
    out
}

/// Render the problem file.
pub fn problem(d: &Domain, p: &Problem) -> String {
    let s = &d.symbols;
    let mut out = String::new();
    let _ = writeln!(out, "(define (problem {})", p.name);
    let _ = writeln!(out, "  (:domain {})", d.name);
    out.push_str("  (:objects)\n");
    out.push_str("  (:init\n");
    for fact in &p.init {
        match fact {
            Fact::Atom(pred, args) => {
                let terms: Vec<Term> = args.iter().map(|c| Term::Const(*c)).collect();
                let _ = writeln!(out, "    {}", atom(s, &[], &Atom::new(*pred, terms)));
            }
            Fact::Value(f, args, v) => {
                let terms: Vec<Term> = args.iter().map(|c| Term::Const(*c)).collect();
                let _ = writeln!(
                    out,
                    "    (= {} {})",
                    num(s, &[], &NumExpr::Fluent(*f, terms)),
                    v
                );
            }
        }
    }
    let _ = writeln!(out, "    (= ({}) 0)", TOTAL_COST);
    out.push_str("  )\n");
    let _ = writeln!(out, "  (:goal {})", nary("and", s, &[], &p.goal));
    let _ = writeln!(out, "  (:metric minimize ({}))", TOTAL_COST);
    out.push_str(")\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Domain, Problem) {
        let mut s = SymbolTable::new();
        let generic = s.declare_sort("generic", None);
        let states = s.declare_sort("datum-state", None);
        let email = s.declare_sort("email", Some(generic));
        let known = s.declare_constant("known", states);
        let a = s.declare_constant("a", generic);
        let b = s.declare_constant("b", email);
        let known_p = s.declare_predicate("known", vec![generic, states]);
        let done = s.declare_predicate("done_goal_post", vec![]);
        s.declare_fluent("total-cost", vec![]);
        let goodness = s.declare_fluent("slot_goodness", vec![generic]);

        let mut ask = Action::new(ActionKey::new("ask"));
        let x = ask.param("x", generic);
        ask.require(Expr::not_atom(known_p, vec![x, known.into()]));
        ask.effect(Effect::add(known_p, vec![x, known.into()]));
        ask.cost = NumExpr::Fluent(goodness, vec![x]);

        let mut finish = Action::new(ActionKey::baked("goal", ["post"]));
        finish.require(Expr::atom(known_p, vec![b.into(), known.into()]));
        finish.effect(Effect::add(done, vec![]));

        let domain = Domain {
            name: "flow".into(),
            symbols: s,
            actions: vec![ask, finish],
        };
        let problem = Problem {
            name: "flow_problem".into(),
            init: vec![
                Fact::Atom(known_p, vec![a, known]),
                Fact::Value(goodness, vec![b], 100_000),
            ],
            goal: vec![Expr::atom(done, vec![])],
        };
        (domain, problem)
    }

    #[test]
    fn test_fp006_domain_text() {
        let (d, _) = sample();
        let text = domain(&d);
        assert!(text.starts_with("(define (domain flow)\n"));
        assert!(text.contains(
            "(:requirements :typing :equality :negative-preconditions \
             :disjunctive-preconditions :action-costs)"
        ));
        assert!(text.contains("    email - generic\n"));
        assert!(text.contains("    generic datum-state - object\n"));
        assert!(text.contains("    known - datum-state\n"));
        assert!(text.contains("(known ?x1 - generic ?x2 - datum-state)"));
        assert!(text.contains("    (done_goal_post)\n"));
        assert!(text.contains("(slot_goodness ?x1 - generic) - number"));
        assert_eq!(text.matches("(total-cost) - number").count(), 1);
        assert!(text.contains("(:action ask\n"));
        assert!(text.contains(":parameters (?x - generic)"));
        assert!(text.contains(":precondition (and (not (known ?x known)))"));
        assert!(text.contains("(increase (total-cost) (slot_goodness ?x))"));
        assert!(text.contains("(:action goal----post\n"));
        assert!(text.contains("(increase (total-cost) 0)"));
    }

    #[test]
    fn test_fp006_problem_text() {
        let (d, p) = sample();
        let text = problem(&d, &p);
        assert!(text.contains("(:domain flow)"));
        assert!(text.contains("(:objects)"));
        assert!(text.contains("    (known a known)\n"));
        assert!(text.contains("    (= (slot_goodness b) 100000)\n"));
        assert!(text.contains("    (= (total-cost) 0)\n"));
        assert!(text.contains("(:goal (and (done_goal_post)))"));
        assert!(text.contains("(:metric minimize (total-cost))"));
    }

    #[test]
    fn test_fp006_empty_goal_and_constants() {
        let s = SymbolTable::new();
        let d = Domain {
            name: "empty".into(),
            symbols: s,
            actions: vec![],
        };
        let text = problem(&d, &Problem::default());
        assert!(text.contains("(:goal (and))"));
    }

    #[test]
    fn test_fp006_expr_forms() {
        let (d, _) = sample();
        let s = &d.symbols;
        let a = s.constant_id("a").unwrap();
        let b = s.constant_id("b").unwrap();
        let e = Expr::Or(vec![Expr::Eq(a.into(), b.into()), Expr::False]);
        assert_eq!(expr(s, &[], &e), "(or (= a b) (or))");
        assert_eq!(expr(s, &[], &Expr::True), "(and)");
    }
}
