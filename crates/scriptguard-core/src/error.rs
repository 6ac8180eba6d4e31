//! Error types for the sandbox.

use serde::{Deserialize, Serialize};

use crate::guard::GuardViolation;
use crate::runtime::exception::{ExceptionKind, ScriptException};
use crate::syntax::Diagnostic;

/// An uncaught script exception, detached from the interpreter's values so
/// it can cross threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message} (in {function}, line {line})")]
pub struct ScriptFault {
    pub kind: ExceptionKind,
    pub message: String,
    pub function: String,
    pub line: u32,
}

impl ScriptFault {
    pub(crate) fn from_exception(exc: ScriptException, fallback_function: &str) -> Self {
        let (function, line) = match exc.location {
            Some(location) => (location.function, location.line),
            None => (fallback_function.to_string(), 0),
        };
        Self {
            kind: exc.kind,
            message: exc.message,
            function,
            line,
        }
    }
}

/// Errors produced by the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{filename}: syntax error at {diagnostic}")]
    Syntax {
        filename: String,
        diagnostic: Diagnostic,
    },

    #[error("{filename}: policy violation ({} diagnostic(s)): {}", diagnostics.len(), first_message(diagnostics))]
    PolicyViolation {
        filename: String,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("capability denied in {function} at line {line}: {violation}")]
    CapabilityDenied {
        violation: GuardViolation,
        function: String,
        line: u32,
    },

    #[error("invalid entry request: {0}")]
    InvalidEntryRequest(String),

    #[error("script raised {0}")]
    HostComputation(ScriptFault),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_message(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl SandboxError {
    /// Diagnostics carried by compile-time failures.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            SandboxError::Syntax { diagnostic, .. } => std::slice::from_ref(diagnostic),
            SandboxError::PolicyViolation { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }

    pub fn is_denial(&self) -> bool {
        matches!(self, SandboxError::CapabilityDenied { .. })
    }

    /// The exception class of a script fault, if this is one.
    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        match self {
            SandboxError::HostComputation(fault) => Some(fault.kind),
            _ => None,
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
