//! Capability denials.

use serde::{Deserialize, Serialize};

/// A guarded operation family, as named in denial messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOp {
    GetAttr,
    SetAttr,
    DelAttr,
    GetItem,
    SetItem,
    DelItem,
    UnaryOp,
    BinaryOp,
    BoolOp,
    CompareOp,
    ContextManager,
}

impl std::fmt::Display for GuardOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            GuardOp::GetAttr => "attribute read",
            GuardOp::SetAttr => "attribute assignment",
            GuardOp::DelAttr => "attribute deletion",
            GuardOp::GetItem => "item read",
            GuardOp::SetItem => "item assignment",
            GuardOp::DelItem => "item deletion",
            GuardOp::UnaryOp => "unary operator",
            GuardOp::BinaryOp => "binary operator",
            GuardOp::BoolOp => "boolean operator",
            GuardOp::CompareOp => "comparison",
            GuardOp::ContextManager => "context manager",
        };
        f.write_str(label)
    }
}

/// A guard refused an operation. Never catchable by script code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardViolation {
    #[error("{operation} denied on '{type_name}' object")]
    Denied {
        operation: GuardOp,
        type_name: String,
    },

    #[error("using format() on a '{type_name}' is not safe")]
    UnsafeFormat { type_name: String },

    #[error("attempt to overwrite reserved name '{name}'")]
    ReservedName { name: String },
}

impl GuardViolation {
    pub fn denied(operation: GuardOp, type_name: impl Into<String>) -> Self {
        GuardViolation::Denied {
            operation,
            type_name: type_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_message() {
        let v = GuardViolation::denied(GuardOp::GetItem, "Robot");
        assert_eq!(v.to_string(), "item read denied on 'Robot' object");
    }

    #[test]
    fn test_serializes_tagged() {
        let v = GuardViolation::ReservedName { name: "len".into() };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "reserved_name");
        assert_eq!(json["name"], "len");
    }
}
