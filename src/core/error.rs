//! Error taxonomy for validation, compilation, planning and plan reconstruction.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    UnknownReference,
    DuplicateName,
    TypeConflict,
    BadProbability,
    BadRetry,
    CyclicType,
    UnknownOption,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownReference => write!(f, "unknown reference"),
            Self::DuplicateName => write!(f, "duplicate name"),
            Self::TypeConflict => write!(f, "type conflict"),
            Self::BadProbability => write!(f, "bad probability"),
            Self::BadRetry => write!(f, "bad retry"),
            Self::CyclicType => write!(f, "cyclic type"),
            Self::UnknownOption => write!(f, "unknown option"),
        }
    }
}

/// A single validation finding. Validation collects all of them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised while building the planning problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// Option combination that has no defined meaning.
    #[error("inconsistent options: {0}")]
    InconsistentOption(String),

    /// Goal shape the selected goal type cannot express.
    #[error("unsupported goal shape: {0}")]
    UnsupportedGoalShape(String),

    /// A name survived validation but has no symbol in the compilation.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Planner failures. Carried on the response as values, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum PlannerError {
    #[error("planner timed out")]
    Timeout,

    #[error("planner proved the problem unsolvable")]
    NoSolution,

    #[error("planner failed to run: {0}")]
    RanError(String),

    #[error("planner output could not be parsed: {0}")]
    ParseError(String),
}

/// Reference-plan problems found by the debugger. Recorded in the diff.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum DebugError {
    #[error("reference step {index} is invalid: {reason}")]
    InvalidToken { index: usize, reason: String },
}

/// Failure to lift a raw planner action back into a plan step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanParseError {
    #[error("empty action string")]
    EmptyAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' is missing parameters (expected {expected}, got {got})")]
    MissingParameters {
        action: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown constraint id '{0}'")]
    UnknownConstraint(String),
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("{} validation error(s): {}", .0.len(), join_messages(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Parse(#[from] PlanParseError),

    #[error(transparent)]
    Planner(#[from] PlannerError),
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<Vec<ValidationError>> for Error {
    fn from(errors: Vec<ValidationError>) -> Self {
        Self::Validation(errors)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let e = ValidationError::new(ValidationKind::DuplicateName, "'a' and 'A' collide");
        assert_eq!(e.to_string(), "duplicate name: 'a' and 'A' collide");
    }

    #[test]
    fn test_error_wraps_validation_list() {
        let err: Error = vec![
            ValidationError::new(ValidationKind::BadRetry, "x"),
            ValidationError::new(ValidationKind::CyclicType, "y"),
        ]
        .into();
        let msg = err.to_string();
        assert!(msg.starts_with("2 validation error(s)"));
        assert!(msg.contains("bad retry: x"));
        assert!(msg.contains("cyclic type: y"));
    }

    #[test]
    fn test_compile_error_display() {
        let e = CompileError::InconsistentOption("ordered with all_together".into());
        assert!(e.to_string().contains("ordered with all_together"));
    }

    #[test]
    fn test_debug_error_display() {
        let e = DebugError::InvalidToken {
            index: 3,
            reason: "unknown operator 'Ghost'".into(),
        };
        assert_eq!(
            e.to_string(),
            "reference step 3 is invalid: unknown operator 'Ghost'"
        );
    }
}
