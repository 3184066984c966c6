//! FP-007: Flow compiler.
//!
//! A `Compilation` owns every table of one compile call. `build()` runs the
//! phases in declaration order (sorts, constants, predicates, actions, init,
//! goal); `finish()` freezes the result into a `CompiledProblem`. The
//! debugger instruments a built compilation before finishing it.

pub mod constraints;
pub mod costs;
pub mod goals;
pub mod history;
pub mod mappings;
pub mod operators;
pub mod slots;
pub mod vocabulary;

use crate::core::builder::Flow;
use crate::core::error::CompileError;
use crate::core::options::{CompileOptions, MappingOption};
use crate::core::transform::{canonical, NameTransform};
use crate::core::types::{FlowDefinition, MemoryState, GENERIC};
use crate::pddl::{self, Action, ConstId, Domain, Expr, Fact, PredId, Problem, SortId, SymbolTable};
use constraints::ConstraintTable;
use indexmap::{IndexMap, IndexSet};
use vocabulary::{Vocabulary, LOOKAHEAD_PREFIX};

/// A data item or lookahead object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSymbol {
    /// Name as the user wrote it
    pub name: String,
    pub constant: ConstId,
    pub sort: SortId,
}

/// An operator and the symbols compiled for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSymbol {
    pub name: String,
    /// Identifier used for the action and the constant
    pub id: String,
    pub constant: ConstId,
    /// `has_done_<id>`, present under multi_instance or allow_retries
    pub reification: Option<PredId>,
    pub max_try: u32,
}

/// Where a compiled action came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOrigin {
    /// `instances` leading parameters stand for the required inputs
    Operator {
        operator: String,
        outcome: usize,
        instances: usize,
    },
    /// Baked item for per-slot asks; `None` for the parametric ask
    Ask { item: Option<String> },
    AskAll { operator: String },
    Map,
    Confirm,
    Constraint { id: String, truth: bool },
    Enabler,
    Manifest,
    Goal,
    Instrumentation,
}

/// Scratchpad of one compile call.
pub struct Compilation<'a> {
    pub flow: &'a FlowDefinition,
    pub options: &'a CompileOptions,
    pub transform: NameTransform,
    pub symbols: SymbolTable,
    pub vocab: Vocabulary,
    /// Declared type name to sort
    pub types: IndexMap<String, SortId>,
    pub data: IndexMap<String, DataSymbol>,
    pub lookahead: Vec<DataSymbol>,
    pub operators: IndexMap<String, OperatorSymbol>,
    pub constraints: ConstraintTable,
    pub actions: Vec<Action>,
    pub origins: Vec<ActionOrigin>,
    pub init: Vec<Fact>,
    pub goal: Vec<Expr>,
}

impl<'a> Compilation<'a> {
    /// Run every compilation phase.
    pub fn build(flow: &'a Flow, options: &'a CompileOptions) -> Result<Self, CompileError> {
        options.check()?;
        let def = flow.definition();
        let mut symbols = SymbolTable::new();
        let vocab = Vocabulary::declare(&mut symbols);
        let mut comp = Self {
            flow: def,
            options,
            transform: NameTransform::new(),
            symbols,
            vocab,
            types: IndexMap::new(),
            data: IndexMap::new(),
            lookahead: Vec::new(),
            operators: IndexMap::new(),
            constraints: ConstraintTable::default(),
            actions: Vec::new(),
            origins: Vec::new(),
            init: Vec::new(),
            goal: Vec::new(),
        };

        comp.declare_types();
        comp.declare_data();
        comp.declare_operators();
        comp.declare_lookahead();
        tracing::debug!(
            flow = %def.name,
            types = comp.types.len(),
            data = comp.data.len(),
            operators = comp.operators.len(),
            lookahead = comp.lookahead.len(),
            "declared symbols"
        );

        constraints::register_all(&mut comp)?;
        operators::compile(&mut comp)?;
        slots::compile(&mut comp);
        mappings::compile(&mut comp);
        constraints::compile(&mut comp)?;
        history::compile(&mut comp)?;
        let used = goals::compile(&mut comp)?;
        comp.compile_memory(&used);
        tracing::debug!(
            actions = comp.actions.len(),
            init = comp.init.len(),
            goals = comp.goal.len(),
            "compiled flow"
        );
        Ok(comp)
    }

    fn declare_types(&mut self) {
        let generic = self.vocab.generic;
        let flow = self.flow;
        let mut parents: Vec<(String, String)> = Vec::new();
        for t in &flow.type_hierarchy {
            let id = self.symbols.declare_sort(&canonical(&t.name), Some(generic));
            self.types.insert(t.name.clone(), id);
            if let Some(parent) = &t.parent {
                parents.push((t.name.clone(), parent.clone()));
            }
            for child in &t.children {
                let cid = self.symbols.declare_sort(&canonical(child), Some(generic));
                self.types.insert(child.clone(), cid);
                parents.push((child.clone(), t.name.clone()));
            }
        }
        for (_, ty) in flow.data_items() {
            if let Some(ty) = ty {
                if !self.types.contains_key(&ty) && ty != GENERIC {
                    let id = self.symbols.declare_sort(&canonical(&ty), Some(generic));
                    self.types.insert(ty, id);
                }
            }
        }
        for (child, parent) in parents {
            let parent_id = if parent == GENERIC {
                Some(generic)
            } else {
                self.types.get(&parent).copied()
            };
            if let (Some(c), Some(p)) = (self.types.get(&child).copied(), parent_id) {
                self.symbols.set_parent(c, p);
            }
        }
    }

    fn declare_data(&mut self) {
        for (name, ty) in self.flow.data_items() {
            let sort = self.sort_of_type(ty.as_deref());
            let id = self.transform.normalize(&name);
            let constant = self.symbols.declare_constant(&id, sort);
            self.data.insert(
                name.clone(),
                DataSymbol {
                    name,
                    constant,
                    sort,
                },
            );
        }
    }

    fn declare_operators(&mut self) {
        let operator_sort = self.vocab.operator;
        let reify = self.options.multi_instance() || self.options.allow_retries();
        let flow = self.flow;
        for op in &flow.operators {
            let symbols = &self.symbols;
            let id = self
                .transform
                .normalize_unique(&op.name, "_op", |n| symbols.constant_id(n).is_some());
            let constant = self.symbols.declare_constant(&id, operator_sort);
            let max_try = flow
                .history
                .iter()
                .filter(|s| s.name == op.name)
                .filter_map(|s| s.max_try)
                .fold(op.max_try, u32::max);
            self.operators.insert(
                op.name.clone(),
                OperatorSymbol {
                    name: op.name.clone(),
                    id,
                    constant,
                    reification: None,
                    max_try,
                },
            );
        }
        if !reify {
            return;
        }
        for op in &flow.operators {
            let mut params = Vec::new();
            if self.options.multi_instance() {
                for p in op.required_inputs() {
                    params.push(self.instance_sort(&p.item_id));
                }
            }
            if self.options.allow_retries() {
                params.push(self.vocab.num_retries);
            }
            if let Some(sym) = self.operators.get_mut(&op.name) {
                let pred = self
                    .symbols
                    .declare_predicate(&format!("has_done_{}", sym.id), params);
                sym.reification = Some(pred);
            }
        }
    }

    fn declare_lookahead(&mut self) {
        if self.options.lookahead == 0 {
            return;
        }
        let sorts: IndexSet<SortId> = self.data.values().map(|d| d.sort).collect();
        for sort in sorts {
            let sort_name = self.symbols.sort(sort).name.clone();
            for k in 0..self.options.lookahead {
                let name = format!("{}{}_{}", LOOKAHEAD_PREFIX, sort_name, k);
                let constant = self.symbols.declare_constant(&name, sort);
                self.lookahead.push(DataSymbol {
                    name,
                    constant,
                    sort,
                });
            }
        }
    }

    /// Initial knowledge of memory items and the `been_used` markers.
    fn compile_memory(&mut self, used_targets: &IndexSet<String>) {
        let v = &self.vocab;
        let direct = !self.options.mapping(MappingOption::ProhibitDirect);
        let mut facts = Vec::new();
        let flow = self.flow;
        for m in &flow.memory_items {
            let Some(d) = self.data.get(&m.item_id) else {
                continue;
            };
            let state = match m.item_state {
                MemoryState::Known => v.known,
                MemoryState::Uncertain => v.uncertain,
                MemoryState::Unknown => continue,
            };
            facts.push(Fact::Atom(v.known_p, vec![d.constant, state]));
            if direct {
                facts.push(Fact::Atom(v.mapped_to, vec![d.constant, d.constant]));
            }
        }
        for (name, d) in &self.data {
            if !used_targets.contains(name) {
                facts.push(Fact::Atom(v.been_used, vec![d.constant]));
            }
        }
        for z in &self.lookahead {
            facts.push(Fact::Atom(v.new_item, vec![z.constant]));
            facts.push(Fact::Atom(v.not_usable, vec![z.constant]));
        }
        self.init.extend(facts);
    }

    /// Sort of a declared type name; untyped items are `generic`.
    pub fn sort_of_type(&self, ty: Option<&str>) -> SortId {
        ty.and_then(|t| self.types.get(t).copied())
            .unwrap_or(self.vocab.generic)
    }

    /// Sort of an operator instance variable for a data item.
    pub fn instance_sort(&self, item: &str) -> SortId {
        if self.options.mapping(MappingOption::IgnoreTypes) {
            return self.vocab.generic;
        }
        self.data
            .get(item)
            .map(|d| d.sort)
            .unwrap_or(self.vocab.generic)
    }

    pub fn datum(&self, name: &str) -> Result<&DataSymbol, CompileError> {
        self.data
            .get(name)
            .ok_or_else(|| CompileError::UnknownSymbol(format!("data item '{}'", name)))
    }

    pub fn operator(&self, name: &str) -> Result<&OperatorSymbol, CompileError> {
        self.operators
            .get(name)
            .ok_or_else(|| CompileError::UnknownSymbol(format!("operator '{}'", name)))
    }

    /// Data items and lookahead objects, in declaration order.
    pub fn all_objects(&self) -> impl Iterator<Item = &DataSymbol> {
        self.data.values().chain(self.lookahead.iter())
    }

    pub fn push_action(&mut self, action: Action, origin: ActionOrigin) {
        self.actions.push(action);
        self.origins.push(origin);
    }

    pub fn push_fact(&mut self, pred: PredId, args: Vec<ConstId>) {
        self.init.push(Fact::Atom(pred, args));
    }

    /// True when `op` appears in the history.
    pub fn in_history(&self, op: &str) -> bool {
        self.flow.history.iter().any(|s| s.name == op)
    }

    /// Freeze into the emitted problem.
    pub fn finish(self) -> CompiledProblem {
        let name = canonical(&self.flow.name);
        let domain = Domain {
            name: name.clone(),
            symbols: self.symbols,
            actions: self.actions,
        };
        let problem = Problem {
            name: format!("{}_problem", name),
            init: self.init,
            goal: self.goal,
        };
        CompiledProblem {
            domain,
            problem,
            transforms: self.transform,
            origins: self.origins,
            constraints: self.constraints,
        }
    }
}

/// Output of one compile call.
#[derive(Debug, Clone)]
pub struct CompiledProblem {
    pub domain: Domain,
    pub problem: Problem,
    pub transforms: NameTransform,
    /// Parallel to `domain.actions`
    pub origins: Vec<ActionOrigin>,
    pub constraints: ConstraintTable,
}

impl CompiledProblem {
    pub fn domain_text(&self) -> String {
        pddl::emit::domain(&self.domain)
    }

    pub fn problem_text(&self) -> String {
        pddl::emit::problem(&self.domain, &self.problem)
    }

    /// Stable hash of the emitted text. Returns `"blake3:{hex}"`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain_text().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.problem_text().as_bytes());
        format!("blake3:{}", hasher.finalize().to_hex())
    }

    /// Cost of a ground action, if its cost term resolves.
    pub fn action_cost(&self, action: &Action) -> Option<u64> {
        self.problem.evaluate(&action.cost)
    }
}

/// Validate-free entry point: build and finish one compilation.
pub fn compile(flow: &Flow, options: &CompileOptions) -> Result<CompiledProblem, CompileError> {
    Ok(Compilation::build(flow, options)?.finish())
}
