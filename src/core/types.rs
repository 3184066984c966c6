//! FP-001: Workflow definition types.
//!
//! Operators, memory items, goals, mappings, slot properties, constraints,
//! orderings and history. All types derive Serialize/Deserialize so flow files
//! roundtrip through YAML.

use indexmap::IndexSet;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Upper bound on `max_try` for operators and steps.
pub const MAX_RETRY: u32 = 5;

/// Name of the root datum type.
pub const GENERIC: &str = "generic";

// ============================================================================
// One-or-many helper
// ============================================================================

/// A value written either as a single item or as a list.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Expand to a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(t) => vec![t],
            Self::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    OneOrMany::<T>::deserialize(deserializer).map(OneOrMany::into_vec)
}

// ============================================================================
// Types and memory
// ============================================================================

/// A named datum type. Types form a DAG rooted at `generic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TypeItem {
    pub name: String,

    /// Parent type (defaults to `generic`)
    #[serde(default)]
    pub parent: Option<String>,

    /// Child types declared from the parent side
    #[serde(default)]
    pub children: Vec<String>,
}

/// Knowledge state of a datum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryState {
    Known,
    #[default]
    Unknown,
    Uncertain,
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known => write!(f, "KNOWN"),
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Uncertain => write!(f, "UNCERTAIN"),
        }
    }
}

/// A named value the flow starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryItem {
    pub item_id: String,

    #[serde(default)]
    pub item_type: Option<String>,

    #[serde(default)]
    pub item_state: MemoryState,
}

impl MemoryItem {
    pub fn new(item_id: impl Into<String>, state: MemoryState) -> Self {
        Self {
            item_id: item_id.into(),
            item_type: None,
            item_state: state,
        }
    }

    pub fn typed(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = Some(item_type.into());
        self
    }
}

// ============================================================================
// Signatures
// ============================================================================

/// A formal parameter occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Parameter {
    pub item_id: String,

    #[serde(default)]
    pub item_type: Option<String>,

    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// Signature entry: a bare name or a typed parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParameterRef {
    Name(String),
    Typed(Parameter),
}

impl ParameterRef {
    pub fn to_parameter(&self) -> Parameter {
        match self {
            Self::Name(name) => Parameter {
                item_id: name.clone(),
                item_type: None,
                required: true,
            },
            Self::Typed(p) => p.clone(),
        }
    }
}

impl From<&str> for ParameterRef {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

/// Truth value attached to a constraint occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TruthValue {
    True,
    False,
    #[default]
    Unset,
}

impl TruthValue {
    /// Effective truth; an unset value asserts the constraint.
    pub fn holds(self) -> bool {
        !matches!(self, Self::False)
    }
}

/// An opaque boolean expression over named variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Constraint {
    pub constraint: String,

    #[serde(default)]
    pub parameters: IndexSet<String>,

    #[serde(default)]
    pub truth_value: TruthValue,
}

impl Constraint {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            constraint: expression.into(),
            parameters: IndexSet::new(),
            truth_value: TruthValue::Unset,
        }
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_truth(mut self, truth_value: TruthValue) -> Self {
        self.truth_value = truth_value;
        self
    }
}

/// Constraint M holds whenever constraint R holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManifestConstraint {
    pub manifest: Constraint,
    pub constraint: Constraint,
}

/// A group of parameters with constraints over them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignatureItem {
    #[serde(default)]
    pub parameters: Vec<ParameterRef>,

    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl SignatureItem {
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: names
                .into_iter()
                .map(|n| ParameterRef::Name(n.into()))
                .collect(),
            constraints: Vec::new(),
        }
    }
}

/// Flatten signature items into their parameters.
pub fn unpack(items: &[SignatureItem]) -> Vec<Parameter> {
    items
        .iter()
        .flat_map(|s| s.parameters.iter().map(ParameterRef::to_parameter))
        .collect()
}

/// One possible result of an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Outcome {
    #[serde(default)]
    pub conditions: Vec<Constraint>,

    #[serde(default)]
    pub outcomes: Vec<SignatureItem>,

    #[serde(default)]
    pub probability: Option<f64>,
}

impl Outcome {
    /// Parameters produced by this outcome.
    pub fn parameters(&self) -> Vec<Parameter> {
        unpack(&self.outcomes)
    }
}

// ============================================================================
// Operators
// ============================================================================

/// An agent with a typed signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperatorDefinition {
    pub name: String,

    #[serde(default = "default_cost")]
    pub cost: u64,

    #[serde(default)]
    pub inputs: Vec<SignatureItem>,

    /// Single outcome or list of outcomes (normalized to a list)
    #[serde(default, deserialize_with = "one_or_many")]
    pub outputs: Vec<Outcome>,

    #[serde(default = "default_max_try")]
    pub max_try: u32,
}

fn default_cost() -> u64 {
    1
}

fn default_max_try() -> u32 {
    1
}

impl OperatorDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cost: default_cost(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            max_try: default_max_try(),
        }
    }

    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(SignatureItem::of(names));
        self
    }

    pub fn with_input(mut self, item: SignatureItem) -> Self {
        self.inputs.push(item);
        self
    }

    /// Add parameters to the classical outcome, creating it if needed.
    pub fn with_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.outputs.is_empty() {
            self.outputs.push(Outcome::default());
        }
        self.outputs[0].outcomes.push(SignatureItem::of(names));
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outputs.push(outcome);
        self
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_max_try(mut self, max_try: u32) -> Self {
        self.max_try = max_try;
        self
    }

    /// All input parameters in declaration order.
    pub fn input_parameters(&self) -> Vec<Parameter> {
        unpack(&self.inputs)
    }

    /// Required inputs only; optional inputs carry no preconditions.
    pub fn required_inputs(&self) -> Vec<Parameter> {
        self.input_parameters()
            .into_iter()
            .filter(|p| p.required)
            .collect()
    }

    /// Every parameter produced by any outcome, deduplicated.
    pub fn output_parameters(&self) -> Vec<Parameter> {
        let mut seen = IndexSet::new();
        let mut out = Vec::new();
        for outcome in &self.outputs {
            for p in outcome.parameters() {
                if seen.insert(p.item_id.clone()) {
                    out.push(p);
                }
            }
        }
        out
    }
}

// ============================================================================
// Mappings, slots, orderings
// ============================================================================

/// A declared routing from one variable to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingItem {
    pub source_name: String,
    pub target_name: String,

    /// Affinity; zero forbids the mapping
    #[serde(default = "default_probability")]
    pub probability: f64,
}

fn default_probability() -> f64 {
    1.0
}

/// Desirability of a slot nobody rated.
pub const DEFAULT_DESIRABILITY: f64 = 1.0;

fn default_desirability() -> f64 {
    DEFAULT_DESIRABILITY
}

impl MappingItem {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_name: source.into(),
            target_name: target.into(),
            probability: default_probability(),
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }
}

/// Slot-filling preference for a datum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlotProperty {
    pub slot_name: String,

    /// How acceptable it is to ask the user; zero forbids asking
    #[serde(default = "default_desirability")]
    pub slot_desirability: f64,

    #[serde(default)]
    pub propagate_desirability: bool,

    #[serde(default)]
    pub do_not_last_resort: bool,
}

impl SlotProperty {
    pub fn new(slot_name: impl Into<String>, desirability: f64) -> Self {
        Self {
            slot_name: slot_name.into(),
            slot_desirability: desirability,
            propagate_desirability: false,
            do_not_last_resort: false,
        }
    }
}

/// `consequent` may only run after `antecedent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartialOrder {
    pub antecedent: String,
    pub consequent: String,
}

// ============================================================================
// Steps and goals
// ============================================================================

/// A step of the history, a goal, or a reference plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub name: String,

    #[serde(default)]
    pub parameters: Vec<String>,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub max_try: Option<u32>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            label: None,
            max_try: None,
        }
    }

    pub fn with_parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Kind of a single goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalKind {
    #[default]
    Operator,
    ObjectKnown,
    ObjectUsed,
    Constraint,
}

/// What a goal refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GoalName {
    Name(String),
    Constraint(Constraint),
    Step(Step),
}

/// A single goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GoalItem {
    pub goal_name: GoalName,

    #[serde(default)]
    pub goal_type: GoalKind,
}

impl GoalItem {
    pub fn operator(name: impl Into<String>) -> Self {
        Self {
            goal_name: GoalName::Name(name.into()),
            goal_type: GoalKind::Operator,
        }
    }

    pub fn step(step: Step) -> Self {
        Self {
            goal_name: GoalName::Step(step),
            goal_type: GoalKind::Operator,
        }
    }

    pub fn known(name: impl Into<String>) -> Self {
        Self {
            goal_name: GoalName::Name(name.into()),
            goal_type: GoalKind::ObjectKnown,
        }
    }

    pub fn used(name: impl Into<String>) -> Self {
        Self {
            goal_name: GoalName::Name(name.into()),
            goal_type: GoalKind::ObjectUsed,
        }
    }

    pub fn constraint(constraint: Constraint) -> Self {
        Self {
            goal_name: GoalName::Constraint(constraint),
            goal_type: GoalKind::Constraint,
        }
    }
}

/// A group of goals; its meaning depends on the top-level goal type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GoalItems {
    #[serde(deserialize_with = "one_or_many")]
    pub goals: Vec<GoalItem>,
}

impl GoalItems {
    pub fn new(goals: Vec<GoalItem>) -> Self {
        Self { goals }
    }
}

/// A reference-plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ReferenceStep {
    Constraint(Constraint),
    Step(Step),
}

/// A candidate plan to check with the debugger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReferencePlan {
    #[serde(default)]
    pub plan: Vec<ReferenceStep>,
}

// ============================================================================
// Flow definition
// ============================================================================

/// Root document of a workflow file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FlowDefinition {
    /// Flow name (used as the planning domain name)
    #[serde(default = "default_flow_name")]
    pub name: String,

    #[serde(default)]
    pub type_hierarchy: Vec<TypeItem>,

    #[serde(default)]
    pub memory_items: Vec<MemoryItem>,

    #[serde(default)]
    pub operators: Vec<OperatorDefinition>,

    #[serde(default)]
    pub goal_items: Vec<GoalItems>,

    #[serde(default)]
    pub list_of_mappings: Vec<MappingItem>,

    #[serde(default)]
    pub slot_properties: Vec<SlotProperty>,

    #[serde(default)]
    pub constraints: Vec<Constraint>,

    #[serde(default)]
    pub manifest_constraints: Vec<ManifestConstraint>,

    #[serde(default)]
    pub partial_orders: Vec<PartialOrder>,

    #[serde(default)]
    pub starts_with: Option<String>,

    #[serde(default)]
    pub ends_with: Option<String>,

    #[serde(default)]
    pub history: Vec<Step>,

    #[serde(default)]
    pub reference: Option<ReferencePlan>,
}

fn default_flow_name() -> String {
    "flow".to_string()
}

impl FlowDefinition {
    pub fn operator(&self, name: &str) -> Option<&OperatorDefinition> {
        self.operators.iter().find(|o| o.name == name)
    }

    /// Data items: memory items, then every signature parameter, with the
    /// first declared type for each.
    pub fn data_items(&self) -> indexmap::IndexMap<String, Option<String>> {
        let mut items: indexmap::IndexMap<String, Option<String>> = indexmap::IndexMap::new();
        let mut note = |id: &str, ty: &Option<String>| {
            let entry = items.entry(id.to_string()).or_insert(None);
            if entry.is_none() {
                entry.clone_from(ty);
            }
        };
        for m in &self.memory_items {
            note(&m.item_id, &m.item_type);
        }
        for op in &self.operators {
            for p in op.input_parameters() {
                note(&p.item_id, &p.item_type);
            }
            for p in op.output_parameters() {
                note(&p.item_id, &p.item_type);
            }
        }
        items
    }

    /// Operators whose outputs include `item`.
    pub fn producers_of(&self, item: &str) -> Vec<&OperatorDefinition> {
        self.operators
            .iter()
            .filter(|op| op.output_parameters().iter().any(|p| p.item_id == item))
            .collect()
    }

    /// Number of history entries matching `step` by name and parameters.
    pub fn history_count(&self, step: &Step) -> usize {
        self.history
            .iter()
            .filter(|h| h.name == step.name && h.parameters == step.parameters)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp001_flow_parse_yaml() {
        let yaml = r#"
name: errors
memory_items:
  - item_id: db_link
    item_state: KNOWN
operators:
  - name: FindErrors
    inputs:
      - parameters: [db_link]
    outputs:
      outcomes:
        - parameters: [errors]
  - name: FixErrors
    cost: 3
    inputs:
      - parameters:
          - errors
          - item_id: ticket
            required: false
goal_items:
  - goals:
      goal_name: FixErrors
"#;
        let flow: FlowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(flow.name, "errors");
        assert_eq!(flow.operators.len(), 2);
        assert_eq!(flow.operators[0].outputs.len(), 1);
        assert_eq!(flow.operators[0].cost, 1);
        assert_eq!(flow.operators[1].cost, 3);
        assert_eq!(flow.operators[1].required_inputs().len(), 1);
        assert_eq!(flow.goal_items[0].goals.len(), 1);
        assert_eq!(flow.goal_items[0].goals[0].goal_type, GoalKind::Operator);
        assert_eq!(flow.memory_items[0].item_state, MemoryState::Known);
    }

    #[test]
    fn test_fp001_outputs_list_form() {
        let yaml = r#"
name: Probe
outputs:
  - outcomes: [{parameters: [ok]}]
    probability: 0.7
  - outcomes: [{parameters: [failure]}]
    probability: 0.3
"#;
        let op: OperatorDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(op.outputs.len(), 2);
        let names: Vec<_> = op.output_parameters().into_iter().map(|p| p.item_id).collect();
        assert_eq!(names, vec!["ok", "failure"]);
    }

    #[test]
    fn test_fp001_slot_desirability_defaults_to_askable() {
        let yaml = r#"
- slot_name: date
  propagate_desirability: true
- slot_name: secret
  slot_desirability: 0.0
"#;
        let slots: Vec<SlotProperty> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(slots[0].slot_desirability, DEFAULT_DESIRABILITY);
        assert!(slots[0].propagate_desirability);
        assert_eq!(slots[1].slot_desirability, 0.0);
    }

    #[test]
    fn test_fp001_goal_name_forms() {
        let yaml = r#"
- goal_name: Agent
- goal_name: {name: Agent, parameters: [a]}
- goal_name: {constraint: "x > 1", parameters: [x]}
  goal_type: CONSTRAINT
- goal_name: item
  goal_type: OBJECT_KNOWN
"#;
        let goals: Vec<GoalItem> = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(matches!(goals[0].goal_name, GoalName::Name(_)));
        assert!(matches!(goals[1].goal_name, GoalName::Step(_)));
        assert!(matches!(goals[2].goal_name, GoalName::Constraint(_)));
        assert_eq!(goals[3].goal_type, GoalKind::ObjectKnown);
    }

    #[test]
    fn test_fp001_unknown_flow_field_rejected() {
        let yaml = "name: x\nopertors: []\n";
        assert!(serde_yaml_ng::from_str::<FlowDefinition>(yaml).is_err());
    }

    #[test]
    fn test_fp001_data_items_order_and_type() {
        let mut flow = FlowDefinition::default();
        flow.memory_items.push(MemoryItem::new("b", MemoryState::Known));
        flow.operators.push(
            OperatorDefinition::new("Op")
                .with_input(SignatureItem {
                    parameters: vec![ParameterRef::Typed(Parameter {
                        item_id: "a".into(),
                        item_type: Some("email".into()),
                        required: true,
                    })],
                    constraints: vec![],
                })
                .with_outputs(["b", "c"]),
        );
        let items = flow.data_items();
        let keys: Vec<_> = items.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(items["a"].as_deref(), Some("email"));
        assert_eq!(items["b"], None);
    }

    #[test]
    fn test_fp001_history_count() {
        let mut flow = FlowDefinition::default();
        flow.history.push(Step::new("A").with_parameters(["x"]));
        flow.history.push(Step::new("A").with_parameters(["x"]));
        flow.history.push(Step::new("A").with_parameters(["y"]));
        assert_eq!(flow.history_count(&Step::new("A").with_parameters(["x"])), 2);
        assert_eq!(flow.history_count(&Step::new("A")), 0);
    }

    #[test]
    fn test_fp001_truth_value_holds() {
        assert!(TruthValue::Unset.holds());
        assert!(TruthValue::True.holds());
        assert!(!TruthValue::False.holds());
    }

    #[test]
    fn test_fp001_producers_of() {
        let mut flow = FlowDefinition::default();
        flow.operators.push(OperatorDefinition::new("P").with_outputs(["x"]));
        flow.operators.push(OperatorDefinition::new("Q").with_inputs(["x"]));
        let producers: Vec<_> = flow.producers_of("x").iter().map(|o| o.name.clone()).collect();
        assert_eq!(producers, vec!["P"]);
    }
}
