//! FP-015: Plans lifted back into user terms.
//!
//! A `Plan` is what the user sees: asks, maps, confirms, operator calls and
//! constraint checks, named as the flow names them.

pub mod parser;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a lifted plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    /// Slot fill; several items when grouped
    Ask { items: Vec<String> },
    /// `(source, target)` pairs
    Map { pairs: Vec<(String, String)> },
    Confirm { items: Vec<String> },
    Operator {
        name: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
        /// Instances routed into the inputs, when the call is parameterized
        parameters: Vec<String>,
    },
    Constraint {
        constraint: String,
        parameters: Vec<String>,
        truth_value: bool,
    },
}

impl PlanStep {
    pub fn ask(item: impl Into<String>) -> Self {
        Self::Ask {
            items: vec![item.into()],
        }
    }

    pub fn map(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Map {
            pairs: vec![(source.into(), target.into())],
        }
    }

    pub fn confirm(item: impl Into<String>) -> Self {
        Self::Confirm {
            items: vec![item.into()],
        }
    }

    /// Operator call with nothing but a name.
    pub fn operator(name: impl Into<String>) -> Self {
        Self::Operator {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Step name as a reference plan would write it.
    pub fn name(&self) -> &str {
        match self {
            Self::Ask { .. } => "ask",
            Self::Map { .. } => "map",
            Self::Confirm { .. } => "confirm",
            Self::Operator { name, .. } => name,
            Self::Constraint { constraint, .. } => constraint,
        }
    }

    /// Loose comparison used for alignment: same kind, same name, and the
    /// same arguments where both sides state them.
    pub fn same_action(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ask { items: a }, Self::Ask { items: b })
            | (Self::Confirm { items: a }, Self::Confirm { items: b }) => a == b,
            (Self::Map { pairs: a }, Self::Map { pairs: b }) => a == b,
            (
                Self::Operator {
                    name: a,
                    parameters: pa,
                    ..
                },
                Self::Operator {
                    name: b,
                    parameters: pb,
                    ..
                },
            ) => a == b && (pa.is_empty() || pb.is_empty() || pa == pb),
            (
                Self::Constraint {
                    constraint: a,
                    truth_value: ta,
                    ..
                },
                Self::Constraint {
                    constraint: b,
                    truth_value: tb,
                    ..
                },
            ) => a == b && ta == tb,
            _ => false,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ask { items } => write!(f, "ask({})", items.join(", ")),
            Self::Confirm { items } => write!(f, "confirm({})", items.join(", ")),
            Self::Map { pairs } => {
                let pairs: Vec<String> = pairs.iter().map(|(s, t)| format!("{}, {}", s, t)).collect();
                write!(f, "map({})", pairs.join("; "))
            }
            Self::Operator {
                name,
                inputs,
                outputs,
                parameters,
            } => {
                if !outputs.is_empty() {
                    write!(f, "{} = ", outputs.join(", "))?;
                }
                let args = if parameters.is_empty() { inputs } else { parameters };
                write!(f, "{}({})", name, args.join(", "))
            }
            Self::Constraint {
                constraint,
                parameters,
                truth_value,
            } => {
                write!(f, "assert ")?;
                if !truth_value {
                    write!(f, "not ")?;
                }
                write!(f, "${}", constraint)?;
                if !parameters.is_empty() {
                    write!(f, " [{}]", parameters.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// A lifted plan with the planner's cost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub cost: u64,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the operator calls, in order.
    pub fn operator_names(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::Operator { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "[{}] {}", i, step)?;
        }
        write!(f, "cost: {}", self.cost)
    }
}
