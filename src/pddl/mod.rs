//! FP-005: Typed STRIPS with action costs.
//!
//! Sorts, constants, predicates and fluents live in a `SymbolTable` arena and
//! are referenced by index. Actions keep their name and baked parameters as a
//! structured `ActionKey`; the `----` encoding only appears in emitted text.

pub mod emit;

use rustc_hash::FxHashMap;

/// Separator between an action name and its baked parameters.
pub const DELIMITER: &str = "----";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PredId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FluentId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub name: String,
    pub parent: Option<SortId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub name: String,
    pub sort: SortId,
}

/// Predicate or fluent signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<SortId>,
}

// ============================================================================
// Symbol table
// ============================================================================

/// Arena of every symbol a domain declares, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    sorts: Vec<Sort>,
    constants: Vec<Constant>,
    predicates: Vec<Signature>,
    fluents: Vec<Signature>,
    sort_index: FxHashMap<String, SortId>,
    const_index: FxHashMap<String, ConstId>,
    pred_index: FxHashMap<String, PredId>,
    fluent_index: FxHashMap<String, FluentId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a sort; an existing sort of that name is returned unchanged.
    pub fn declare_sort(&mut self, name: &str, parent: Option<SortId>) -> SortId {
        if let Some(id) = self.sort_index.get(name) {
            return *id;
        }
        let id = SortId(self.sorts.len());
        self.sorts.push(Sort {
            name: name.to_string(),
            parent,
        });
        self.sort_index.insert(name.to_string(), id);
        id
    }

    /// Re-parent a sort. Used when a child is declared before its parent.
    pub fn set_parent(&mut self, sort: SortId, parent: SortId) {
        if sort != parent && !self.is_subsort(parent, sort) {
            self.sorts[sort.0].parent = Some(parent);
        }
    }

    pub fn declare_constant(&mut self, name: &str, sort: SortId) -> ConstId {
        if let Some(id) = self.const_index.get(name) {
            return *id;
        }
        let id = ConstId(self.constants.len());
        self.constants.push(Constant {
            name: name.to_string(),
            sort,
        });
        self.const_index.insert(name.to_string(), id);
        id
    }

    pub fn declare_predicate(&mut self, name: &str, params: Vec<SortId>) -> PredId {
        if let Some(id) = self.pred_index.get(name) {
            return *id;
        }
        let id = PredId(self.predicates.len());
        self.predicates.push(Signature {
            name: name.to_string(),
            params,
        });
        self.pred_index.insert(name.to_string(), id);
        id
    }

    pub fn declare_fluent(&mut self, name: &str, params: Vec<SortId>) -> FluentId {
        if let Some(id) = self.fluent_index.get(name) {
            return *id;
        }
        let id = FluentId(self.fluents.len());
        self.fluents.push(Signature {
            name: name.to_string(),
            params,
        });
        self.fluent_index.insert(name.to_string(), id);
        id
    }

    pub fn sort_id(&self, name: &str) -> Option<SortId> {
        self.sort_index.get(name).copied()
    }

    pub fn constant_id(&self, name: &str) -> Option<ConstId> {
        self.const_index.get(name).copied()
    }

    pub fn predicate_id(&self, name: &str) -> Option<PredId> {
        self.pred_index.get(name).copied()
    }

    pub fn fluent_id(&self, name: &str) -> Option<FluentId> {
        self.fluent_index.get(name).copied()
    }

    pub fn sort(&self, id: SortId) -> &Sort {
        &self.sorts[id.0]
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.constants[id.0]
    }

    pub fn predicate(&self, id: PredId) -> &Signature {
        &self.predicates[id.0]
    }

    pub fn fluent(&self, id: FluentId) -> &Signature {
        &self.fluents[id.0]
    }

    pub fn sorts(&self) -> impl Iterator<Item = (SortId, &Sort)> {
        self.sorts.iter().enumerate().map(|(i, s)| (SortId(i), s))
    }

    pub fn constants(&self) -> impl Iterator<Item = (ConstId, &Constant)> {
        self.constants
            .iter()
            .enumerate()
            .map(|(i, c)| (ConstId(i), c))
    }

    pub fn predicates(&self) -> impl Iterator<Item = (PredId, &Signature)> {
        self.predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (PredId(i), p))
    }

    pub fn fluents(&self) -> impl Iterator<Item = (FluentId, &Signature)> {
        self.fluents
            .iter()
            .enumerate()
            .map(|(i, f)| (FluentId(i), f))
    }

    /// True when `sort` is `ancestor` or lies below it.
    pub fn is_subsort(&self, sort: SortId, ancestor: SortId) -> bool {
        let mut current = Some(sort);
        let mut steps = 0;
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.sorts.len() {
                return false;
            }
            current = self.sorts[s.0].parent;
        }
        false
    }

    /// Constants whose sort is `sort` or one of its subsorts.
    pub fn constants_of(&self, sort: SortId) -> Vec<ConstId> {
        self.constants()
            .filter(|(_, c)| self.is_subsort(c.sort, sort))
            .map(|(id, _)| id)
            .collect()
    }
}

// ============================================================================
// Formulas
// ============================================================================

/// Action parameter reference or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    Var(usize),
    Const(ConstId),
}

impl Term {
    fn bind(self, index: usize, value: ConstId) -> Self {
        match self {
            Self::Var(i) if i == index => Self::Const(value),
            Self::Var(i) if i > index => Self::Var(i - 1),
            other => other,
        }
    }
}

impl From<ConstId> for Term {
    fn from(c: ConstId) -> Self {
        Self::Const(c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    pub pred: PredId,
    pub args: Vec<Term>,
}

impl Atom {
    pub fn new(pred: PredId, args: Vec<Term>) -> Self {
        Self { pred, args }
    }

    /// Atom over constants only.
    pub fn ground(pred: PredId, args: &[ConstId]) -> Self {
        Self {
            pred,
            args: args.iter().map(|c| Term::Const(*c)).collect(),
        }
    }

    fn map_terms(&self, f: &impl Fn(Term) -> Term) -> Self {
        Self {
            pred: self.pred,
            args: self.args.iter().map(|t| f(*t)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Atom(Atom),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Eq(Term, Term),
    True,
    False,
}

impl Expr {
    pub fn atom(pred: PredId, args: Vec<Term>) -> Self {
        Self::Atom(Atom::new(pred, args))
    }

    pub fn not(inner: Expr) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn not_atom(pred: PredId, args: Vec<Term>) -> Self {
        Self::not(Self::atom(pred, args))
    }

    /// Apply `f` to every term, preserving structure.
    pub fn map_terms(&self, f: &impl Fn(Term) -> Term) -> Self {
        match self {
            Self::Atom(a) => Self::Atom(a.map_terms(f)),
            Self::And(items) => Self::And(items.iter().map(|e| e.map_terms(f)).collect()),
            Self::Or(items) => Self::Or(items.iter().map(|e| e.map_terms(f)).collect()),
            Self::Not(inner) => Self::not(inner.map_terms(f)),
            Self::Eq(a, b) => Self::Eq(f(*a), f(*b)),
            Self::True => Self::True,
            Self::False => Self::False,
        }
    }
}

/// Numeric term used for action costs and fluent values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumExpr {
    Const(u64),
    Fluent(FluentId, Vec<Term>),
}

impl NumExpr {
    fn map_terms(&self, f: &impl Fn(Term) -> Term) -> Self {
        match self {
            Self::Const(v) => Self::Const(*v),
            Self::Fluent(id, args) => Self::Fluent(*id, args.iter().map(|t| f(*t)).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Effect {
    Add(Atom),
    Del(Atom),
}

impl Effect {
    pub fn add(pred: PredId, args: Vec<Term>) -> Self {
        Self::Add(Atom::new(pred, args))
    }

    pub fn del(pred: PredId, args: Vec<Term>) -> Self {
        Self::Del(Atom::new(pred, args))
    }

    pub fn atom(&self) -> &Atom {
        match self {
            Self::Add(a) | Self::Del(a) => a,
        }
    }

    fn map_terms(&self, f: &impl Fn(Term) -> Term) -> Self {
        match self {
            Self::Add(a) => Self::Add(a.map_terms(f)),
            Self::Del(a) => Self::Del(a.map_terms(f)),
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Action name plus parameters baked into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub name: String,
    pub baked: Vec<String>,
}

impl ActionKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            baked: Vec::new(),
        }
    }

    pub fn baked<I, S>(name: impl Into<String>, baked: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            baked: baked.into_iter().map(Into::into).collect(),
        }
    }

    /// Serialized form, `name----p1----p2`.
    pub fn encode(&self) -> String {
        let mut out = self.name.clone();
        for b in &self.baked {
            out.push_str(DELIMITER);
            out.push_str(b);
        }
        out
    }

    pub fn decode(encoded: &str) -> Self {
        let mut parts = encoded.split(DELIMITER);
        let name = parts.next().unwrap_or_default().to_string();
        Self {
            name,
            baked: parts.map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub sort: SortId,
}

impl Param {
    pub fn new(name: impl Into<String>, sort: SortId) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }
}

/// A lifted action schema. `precondition` is an implicit conjunction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub key: ActionKey,
    pub params: Vec<Param>,
    pub precondition: Vec<Expr>,
    pub effects: Vec<Effect>,
    pub cost: NumExpr,
}

impl Action {
    pub fn new(key: ActionKey) -> Self {
        Self {
            key,
            params: Vec::new(),
            precondition: Vec::new(),
            effects: Vec::new(),
            cost: NumExpr::Const(0),
        }
    }

    /// Add a parameter, returning the term that refers to it.
    pub fn param(&mut self, name: impl Into<String>, sort: SortId) -> Term {
        self.params.push(Param::new(name, sort));
        Term::Var(self.params.len() - 1)
    }

    pub fn require(&mut self, expr: Expr) {
        self.precondition.push(expr);
    }

    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Substitute parameter `index` with `value` and drop it from the list.
    pub fn bind(&self, index: usize, value: ConstId) -> Self {
        let f = |t: Term| t.bind(index, value);
        let mut params = self.params.clone();
        if index < params.len() {
            params.remove(index);
        }
        Self {
            key: self.key.clone(),
            params,
            precondition: self.precondition.iter().map(|e| e.map_terms(&f)).collect(),
            effects: self.effects.iter().map(|e| e.map_terms(&f)).collect(),
            cost: self.cost.map_terms(&f),
        }
    }

    /// Bind several parameters at once. Indices refer to the original list.
    pub fn bind_all(&self, bindings: &[(usize, ConstId)]) -> Self {
        let mut sorted = bindings.to_vec();
        sorted.sort_by(|a, b| b.0.cmp(&a.0));
        let mut action = self.clone();
        for (index, value) in sorted {
            action = action.bind(index, value);
        }
        action
    }
}

// ============================================================================
// Problem
// ============================================================================

/// Ground initial-state fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fact {
    Atom(PredId, Vec<ConstId>),
    Value(FluentId, Vec<ConstId>, u64),
}

#[derive(Debug, Clone, Default)]
pub struct Domain {
    pub name: String,
    pub symbols: SymbolTable,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub name: String,
    pub init: Vec<Fact>,
    /// Implicit conjunction
    pub goal: Vec<Expr>,
}

impl Problem {
    /// Initial value of a fluent term, if set.
    pub fn value_of(&self, fluent: FluentId, args: &[ConstId]) -> Option<u64> {
        self.init.iter().find_map(|f| match f {
            Fact::Value(id, a, v) if *id == fluent && a.as_slice() == args => Some(*v),
            _ => None,
        })
    }

    /// Evaluate a ground numeric term against the initial state.
    pub fn evaluate(&self, expr: &NumExpr) -> Option<u64> {
        match expr {
            NumExpr::Const(v) => Some(*v),
            NumExpr::Fluent(id, args) => {
                let consts: Option<Vec<ConstId>> = args
                    .iter()
                    .map(|t| match t {
                        Term::Const(c) => Some(*c),
                        Term::Var(_) => None,
                    })
                    .collect();
                self.value_of(*id, &consts?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (SymbolTable, SortId, SortId, SortId) {
        let mut t = SymbolTable::new();
        let generic = t.declare_sort("generic", None);
        let email = t.declare_sort("email", Some(generic));
        let work = t.declare_sort("work_email", Some(email));
        (t, generic, email, work)
    }

    #[test]
    fn test_fp005_declare_is_idempotent() {
        let (mut t, generic, _, _) = table();
        let a = t.declare_constant("a", generic);
        let again = t.declare_constant("a", generic);
        assert_eq!(a, again);
        assert_eq!(t.constants().count(), 1);
        assert_eq!(t.declare_sort("generic", None), generic);
    }

    #[test]
    fn test_fp005_subsort_and_constants_of() {
        let (mut t, generic, email, work) = table();
        let a = t.declare_constant("a", generic);
        let b = t.declare_constant("b", email);
        let c = t.declare_constant("c", work);
        assert!(t.is_subsort(work, generic));
        assert!(!t.is_subsort(generic, email));
        assert_eq!(t.constants_of(generic), vec![a, b, c]);
        assert_eq!(t.constants_of(email), vec![b, c]);
        assert_eq!(t.constants_of(work), vec![c]);
    }

    #[test]
    fn test_fp005_set_parent_refuses_cycle() {
        let (mut t, _, email, work) = table();
        t.set_parent(email, work);
        assert_eq!(t.sort(email).parent, t.sort_id("generic"));
    }

    #[test]
    fn test_fp005_action_key_roundtrip() {
        let key = ActionKey::baked("ask", ["find_errors", "db_link"]);
        assert_eq!(key.encode(), "ask----find_errors----db_link");
        assert_eq!(ActionKey::decode(&key.encode()), key);
        assert_eq!(ActionKey::new("map").encode(), "map");
        assert_eq!(ActionKey::decode("map--free-alt").name, "map--free-alt");
    }

    #[test]
    fn test_fp005_bind_shifts_later_vars() {
        let (mut t, generic, _, _) = table();
        let p = t.declare_predicate("mapped_to", vec![generic, generic]);
        let c = t.declare_constant("x", generic);
        let mut action = Action::new(ActionKey::new("map"));
        let x = action.param("x", generic);
        let y = action.param("y", generic);
        action.require(Expr::atom(p, vec![x, y]));
        action.effect(Effect::add(p, vec![y, y]));

        let bound = action.bind(0, c);
        assert_eq!(bound.params.len(), 1);
        assert_eq!(bound.params[0].name, "y");
        assert_eq!(
            bound.precondition[0],
            Expr::atom(p, vec![Term::Const(c), Term::Var(0)])
        );
        assert_eq!(bound.effects[0], Effect::add(p, vec![Term::Var(0), Term::Var(0)]));
    }

    #[test]
    fn test_fp005_bind_all_any_order() {
        let (mut t, generic, _, _) = table();
        let p = t.declare_predicate("mapped_to", vec![generic, generic]);
        let a = t.declare_constant("a", generic);
        let b = t.declare_constant("b", generic);
        let mut action = Action::new(ActionKey::new("map"));
        let x = action.param("x", generic);
        let y = action.param("y", generic);
        action.require(Expr::atom(p, vec![x, y]));
        let bound = action.bind_all(&[(0, a), (1, b)]);
        assert!(bound.params.is_empty());
        assert_eq!(
            bound.precondition[0],
            Expr::atom(p, vec![Term::Const(a), Term::Const(b)])
        );
    }

    #[test]
    fn test_fp005_evaluate_cost() {
        let (mut t, generic, _, _) = table();
        let f = t.declare_fluent("slot_goodness", vec![generic]);
        let a = t.declare_constant("a", generic);
        let problem = Problem {
            name: "p".into(),
            init: vec![Fact::Value(f, vec![a], 100_000)],
            goal: vec![],
        };
        assert_eq!(problem.evaluate(&NumExpr::Const(7)), Some(7));
        assert_eq!(
            problem.evaluate(&NumExpr::Fluent(f, vec![Term::Const(a)])),
            Some(100_000)
        );
        assert_eq!(problem.evaluate(&NumExpr::Fluent(f, vec![Term::Var(0)])), None);
    }
}
