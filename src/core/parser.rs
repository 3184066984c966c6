//! FP-002: YAML parsing and validation.
//!
//! Parses a flow file and validates structural constraints:
//! - Version must be "1.0"
//! - Every name a flow refers to must resolve
//! - Canonical names must be unique and clear of built-in names
//! - Probabilities, desirabilities and retry bounds must be in range
//! - Types form a DAG and each datum has at most one type

use super::builder::Flow;
use super::error::{Error, ValidationError, ValidationKind};
use super::options::CompileOptions;
use super::transform::{canonical, NameTransform};
use super::types::*;
use crate::compiler::vocabulary::{
    builtin_constants, is_restricted, BUILTIN_ACTIONS, BUILTIN_SORTS, LOOKAHEAD_PREFIX,
};
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk flow file: the definition plus its compile options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FlowFile {
    #[serde(default = "default_version")]
    pub version: String,

    pub flow: FlowDefinition,

    #[serde(default)]
    pub options: CompileOptions,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Parse a flow file from disk.
pub fn parse_flow_file(path: &Path) -> Result<FlowFile, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_flow(&content)
}

/// Parse a flow file from a string. Option names are checked here: an
/// unrecognized one is an `UnknownOption` validation error, not a YAML error.
pub fn parse_flow(yaml: &str) -> Result<FlowFile, Error> {
    let mut value: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml)?;
    let options = match value.as_mapping_mut().and_then(|m| m.remove("options")) {
        Some(raw) => serde_yaml_ng::from_value::<CompileOptions>(raw).map_err(|e| {
            Error::Validation(vec![ValidationError::new(
                ValidationKind::UnknownOption,
                e.to_string(),
            )])
        })?,
        None => CompileOptions::default(),
    };
    let mut file: FlowFile = serde_yaml_ng::from_value(value)?;
    file.options = options;
    Ok(file)
}

/// Parse, check the version, and validate into a `Flow`.
pub fn load_flow(yaml: &str) -> Result<(Flow, CompileOptions), Error> {
    let file = parse_flow(yaml)?;
    if file.version != "1.0" {
        return Err(Error::Validation(vec![ValidationError::new(
            ValidationKind::UnknownOption,
            format!("version must be \"1.0\", got \"{}\"", file.version),
        )]));
    }
    let flow = Flow::from_definition(file.flow)?;
    Ok((flow, file.options))
}

/// Validate a flow definition. Returns every error found (empty = valid).
pub fn validate_flow(flow: &FlowDefinition) -> Vec<ValidationError> {
    let mut v = Validator::new(flow);
    v.check_types();
    v.check_names();
    v.check_references();
    v.check_ranges();
    v.errors
}

struct Validator<'f> {
    flow: &'f FlowDefinition,
    data: IndexMap<String, Option<String>>,
    types: IndexSet<String>,
    errors: Vec<ValidationError>,
}

impl<'f> Validator<'f> {
    fn new(flow: &'f FlowDefinition) -> Self {
        let mut types = IndexSet::new();
        for t in &flow.type_hierarchy {
            types.insert(t.name.clone());
            types.extend(t.children.iter().cloned());
        }
        Self {
            flow,
            data: flow.data_items(),
            types,
            errors: Vec::new(),
        }
    }

    fn error(&mut self, kind: ValidationKind, message: String) {
        self.errors.push(ValidationError::new(kind, message));
    }

    fn is_operator(&self, name: &str) -> bool {
        self.flow.operator(name).is_some()
    }

    fn is_datum(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    fn is_type(&self, name: &str) -> bool {
        name == GENERIC || self.types.contains(name) || self.data.values().any(|t| t.as_deref() == Some(name))
    }

    // ------------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------------

    fn check_types(&mut self) {
        let flow = self.flow;
        let mut parent_of: IndexMap<&str, &str> = IndexMap::new();
        let mut conflicts = Vec::new();
        let mut claim = |child: &'f str, parent: &'f str| match parent_of.get(child) {
            Some(existing) if *existing != parent => conflicts.push(format!(
                "type '{}' has parents '{}' and '{}'",
                child, existing, parent
            )),
            Some(_) => {}
            None => {
                parent_of.insert(child, parent);
            }
        };
        for t in &flow.type_hierarchy {
            if let Some(parent) = &t.parent {
                claim(&t.name, parent);
            }
            for child in &t.children {
                claim(child, &t.name);
            }
        }
        for message in conflicts {
            self.error(ValidationKind::TypeConflict, message);
        }

        for start in parent_of.keys() {
            let mut current = *start;
            let mut seen = IndexSet::new();
            while let Some(next) = parent_of.get(current) {
                if !seen.insert(current) {
                    break;
                }
                if next == start {
                    self.errors.push(ValidationError::new(
                        ValidationKind::CyclicType,
                        format!("type '{}' is its own ancestor", start),
                    ));
                    break;
                }
                current = *next;
            }
        }

        // A datum may carry one type only
        let mut typed: Vec<(String, String)> = Vec::new();
        for m in &flow.memory_items {
            if let Some(t) = &m.item_type {
                typed.push((m.item_id.clone(), t.clone()));
            }
        }
        for op in &flow.operators {
            for p in op.input_parameters().into_iter().chain(op.output_parameters()) {
                if let Some(t) = p.item_type {
                    typed.push((p.item_id, t));
                }
            }
        }
        let mut declared: IndexMap<String, String> = IndexMap::new();
        for (item, ty) in typed {
            match declared.get(&item) {
                Some(existing) if *existing != ty => {
                    let message = format!(
                        "data item '{}' is declared as '{}' and '{}'",
                        item, existing, ty
                    );
                    self.error(ValidationKind::TypeConflict, message);
                }
                Some(_) => {}
                None => {
                    declared.insert(item, ty);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------------

    fn check_names(&mut self) {
        let flow = self.flow;
        let reserved_pre = Regex::new(r"^pre_\d+$").ok();

        let mut seen: IndexMap<String, &str> = IndexMap::new();
        for op in &flow.operators {
            let id = canonical(&op.name);
            if let Some(other) = seen.get(&id) {
                let message = format!("operators '{}' and '{}' share the name '{}'", other, op.name, id);
                self.error(ValidationKind::DuplicateName, message);
                continue;
            }
            seen.insert(id.clone(), &op.name);
            let pre = reserved_pre.as_ref().is_some_and(|re| re.is_match(&id));
            if BUILTIN_ACTIONS.contains(&id.as_str()) || is_restricted(&id) || pre {
                self.error(
                    ValidationKind::DuplicateName,
                    format!("operator '{}' collides with a built-in action", op.name),
                );
            }
        }

        // Types named only through an item type still become sorts.
        let mut type_names: IndexSet<String> = self.types.clone();
        let mut item_types: Vec<Option<String>> =
            flow.memory_items.iter().map(|m| m.item_type.clone()).collect();
        for op in &flow.operators {
            let params = op.input_parameters().into_iter().chain(op.output_parameters());
            item_types.extend(params.map(|p| p.item_type));
        }
        type_names.extend(item_types.into_iter().flatten().filter(|t| t.as_str() != GENERIC));
        let mut seen: IndexMap<String, &str> = IndexMap::new();
        for name in &type_names {
            let id = canonical(name);
            if let Some(other) = seen.get(&id) {
                self.errors.push(ValidationError::new(
                    ValidationKind::DuplicateName,
                    format!("types '{}' and '{}' share the name '{}'", other, name, id),
                ));
                continue;
            }
            if BUILTIN_SORTS.contains(&id.as_str()) {
                self.errors.push(ValidationError::new(
                    ValidationKind::DuplicateName,
                    format!("type '{}' collides with a built-in sort", name),
                ));
            }
            seen.insert(id, name);
        }

        let mut transform = NameTransform::new();
        let builtins = builtin_constants();
        for name in self.data.keys() {
            let id = transform.normalize(name);
            if builtins.contains(&id) || id.starts_with(LOOKAHEAD_PREFIX) {
                self.errors.push(ValidationError::new(
                    ValidationKind::DuplicateName,
                    format!("data item '{}' collides with a built-in constant", name),
                ));
            }
        }
        let data = &self.data;
        for (target, sources) in transform.collisions(|t| data.contains_key(t)) {
            self.errors.push(ValidationError::new(
                ValidationKind::DuplicateName,
                format!("data items {} share the name '{}'", sources.join(", "), target),
            ));
        }
    }

    // ------------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------------

    fn unknown(&mut self, what: &str, name: &str) {
        self.error(
            ValidationKind::UnknownReference,
            format!("{} references unknown name '{}'", what, name),
        );
    }

    fn check_operator_ref(&mut self, what: &str, name: &str) {
        if !self.is_operator(name) {
            self.unknown(what, name);
        }
    }

    fn check_datum_ref(&mut self, what: &str, name: &str) {
        if !self.is_datum(name) {
            self.unknown(what, name);
        }
    }

    fn check_constraint(&mut self, what: &str, c: &Constraint) {
        for p in &c.parameters {
            self.check_datum_ref(what, p);
        }
    }

    fn check_step(&mut self, what: &str, step: &Step) {
        self.check_operator_ref(what, &step.name);
        for p in &step.parameters {
            self.check_datum_ref(what, p);
        }
    }

    fn check_references(&mut self) {
        let flow = self.flow;
        for s in &flow.slot_properties {
            self.check_datum_ref("slot property", &s.slot_name);
        }
        for m in &flow.list_of_mappings {
            self.check_datum_ref("mapping", &m.source_name);
            self.check_datum_ref("mapping", &m.target_name);
        }
        for po in &flow.partial_orders {
            self.check_operator_ref("partial order", &po.antecedent);
            self.check_operator_ref("partial order", &po.consequent);
        }
        if let Some(name) = &flow.starts_with {
            self.check_operator_ref("starts_with", name);
        }
        if let Some(name) = &flow.ends_with {
            self.check_operator_ref("ends_with", name);
        }
        for step in &flow.history {
            self.check_step("history step", step);
        }
        for c in &flow.constraints {
            self.check_constraint("constraint", c);
        }
        for m in &flow.manifest_constraints {
            self.check_constraint("manifest constraint", &m.manifest);
            self.check_constraint("manifest constraint", &m.constraint);
        }
        for op in &flow.operators {
            let what = format!("operator '{}'", op.name);
            for item in &op.inputs {
                for c in &item.constraints {
                    self.check_constraint(&what, c);
                }
            }
            for outcome in &op.outputs {
                for c in outcome.conditions.iter().chain(outcome.outcomes.iter().flat_map(|o| &o.constraints)) {
                    self.check_constraint(&what, c);
                }
            }
        }
        for group in &flow.goal_items {
            for goal in &group.goals {
                match (&goal.goal_type, &goal.goal_name) {
                    (_, GoalName::Constraint(c)) => self.check_constraint("goal", c),
                    (_, GoalName::Step(step)) => self.check_step("goal", step),
                    (GoalKind::Operator, GoalName::Name(name)) => self.check_operator_ref("goal", name),
                    (GoalKind::ObjectKnown | GoalKind::ObjectUsed, GoalName::Name(name)) => {
                        if !self.is_datum(name) && !self.is_type(name) {
                            self.unknown("goal", name);
                        }
                    }
                    (GoalKind::Constraint, GoalName::Name(name)) => self.unknown("constraint goal", name),
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Ranges
    // ------------------------------------------------------------------------

    fn check_ranges(&mut self) {
        let flow = self.flow;
        let unit = |p: f64| (0.0..=1.0).contains(&p);
        for m in &flow.list_of_mappings {
            if !unit(m.probability) {
                self.error(
                    ValidationKind::BadProbability,
                    format!(
                        "mapping '{}' -> '{}' has probability {}",
                        m.source_name, m.target_name, m.probability
                    ),
                );
            }
        }
        for s in &flow.slot_properties {
            if !unit(s.slot_desirability) {
                self.error(
                    ValidationKind::BadProbability,
                    format!("slot '{}' has desirability {}", s.slot_name, s.slot_desirability),
                );
            }
        }
        for op in &flow.operators {
            for outcome in &op.outputs {
                if let Some(p) = outcome.probability.filter(|p| !unit(*p)) {
                    self.error(
                        ValidationKind::BadProbability,
                        format!("operator '{}' has an outcome with probability {}", op.name, p),
                    );
                }
            }
            if op.max_try > MAX_RETRY {
                self.error(
                    ValidationKind::BadRetry,
                    format!("operator '{}' has max_try {} (limit {})", op.name, op.max_try, MAX_RETRY),
                );
            }
        }

        let mut steps: Vec<&Step> = flow.history.iter().collect();
        for group in &flow.goal_items {
            for goal in &group.goals {
                if let GoalName::Step(step) = &goal.goal_name {
                    steps.push(step);
                }
            }
        }
        if let Some(reference) = &flow.reference {
            for entry in &reference.plan {
                if let ReferenceStep::Step(step) = entry {
                    steps.push(step);
                }
            }
        }
        for step in steps {
            if let Some(max_try) = step.max_try.filter(|m| *m > MAX_RETRY) {
                self.error(
                    ValidationKind::BadRetry,
                    format!("step '{}' has max_try {} (limit {})", step.name, max_try, MAX_RETRY),
                );
            }
        }
    }
}
