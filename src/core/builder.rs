//! Flow assembly.
//!
//! `FlowBuilder` collects entities one call at a time; `build()` validates
//! and freezes them into a `Flow` the compiler can trust.

use super::error::Error;
use super::parser::validate_flow;
use super::types::*;
use std::ops::Deref;

/// A validated flow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    definition: FlowDefinition,
}

impl Flow {
    /// Validate a definition. Every problem is reported, not just the first.
    pub fn from_definition(definition: FlowDefinition) -> Result<Self, Error> {
        let errors = validate_flow(&definition);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        Ok(Self { definition })
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn into_definition(self) -> FlowDefinition {
        self.definition
    }
}

impl Deref for Flow {
    type Target = FlowDefinition;

    fn deref(&self) -> &FlowDefinition {
        &self.definition
    }
}

/// Incremental builder for a `Flow`.
#[derive(Debug, Clone, Default)]
pub struct FlowBuilder {
    definition: FlowDefinition,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: FlowDefinition {
                name: name.into(),
                ..FlowDefinition::default()
            },
        }
    }

    pub fn type_item(mut self, item: TypeItem) -> Self {
        self.definition.type_hierarchy.push(item);
        self
    }

    pub fn memory_item(mut self, item: MemoryItem) -> Self {
        self.definition.memory_items.push(item);
        self
    }

    pub fn operator(mut self, op: OperatorDefinition) -> Self {
        self.definition.operators.push(op);
        self
    }

    pub fn goal(mut self, goals: GoalItems) -> Self {
        self.definition.goal_items.push(goals);
        self
    }

    pub fn mapping(mut self, mapping: MappingItem) -> Self {
        self.definition.list_of_mappings.push(mapping);
        self
    }

    pub fn slot_property(mut self, slot: SlotProperty) -> Self {
        self.definition.slot_properties.push(slot);
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.definition.constraints.push(constraint);
        self
    }

    pub fn manifest(mut self, manifest: ManifestConstraint) -> Self {
        self.definition.manifest_constraints.push(manifest);
        self
    }

    /// `antecedent` must run before `consequent`.
    pub fn partial_order(mut self, antecedent: impl Into<String>, consequent: impl Into<String>) -> Self {
        self.definition.partial_orders.push(PartialOrder {
            antecedent: antecedent.into(),
            consequent: consequent.into(),
        });
        self
    }

    pub fn starts_with(mut self, operator: impl Into<String>) -> Self {
        self.definition.starts_with = Some(operator.into());
        self
    }

    pub fn ends_with(mut self, operator: impl Into<String>) -> Self {
        self.definition.ends_with = Some(operator.into());
        self
    }

    /// Record an operator call that already happened.
    pub fn history(mut self, step: Step) -> Self {
        self.definition.history.push(step);
        self
    }

    /// Append a step to the reference plan.
    pub fn reference(mut self, step: ReferenceStep) -> Self {
        self.definition
            .reference
            .get_or_insert_with(ReferencePlan::default)
            .plan
            .push(step);
        self
    }

    pub fn build(self) -> Result<Flow, Error> {
        Flow::from_definition(self.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ValidationKind;

    #[test]
    fn test_fp002_builder_assembles_flow() {
        let flow = FlowBuilder::new("demo")
            .operator(OperatorDefinition::new("A").with_outputs(["x"]))
            .operator(OperatorDefinition::new("B").with_inputs(["x"]))
            .partial_order("A", "B")
            .starts_with("A")
            .history(Step::new("A"))
            .reference(ReferenceStep::Step(Step::new("B").with_parameters(["x"])))
            .goal(GoalItems::new(vec![GoalItem::operator("B")]))
            .build()
            .unwrap();
        assert_eq!(flow.name, "demo");
        assert_eq!(flow.operators.len(), 2);
        assert_eq!(flow.partial_orders[0].consequent, "B");
        assert_eq!(flow.reference.as_ref().map(|r| r.plan.len()), Some(1));
        assert_eq!(flow.clone().into_definition().history.len(), 1);
    }

    #[test]
    fn test_fp002_builder_rejects_invalid() {
        let err = FlowBuilder::new("bad")
            .goal(GoalItems::new(vec![GoalItem::operator("Missing")]))
            .build()
            .unwrap_err();
        match err {
            Error::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].kind, ValidationKind::UnknownReference);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
