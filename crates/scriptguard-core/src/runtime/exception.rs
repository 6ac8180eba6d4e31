//! Script exceptions and the internal unwinding signal.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::guard::GuardViolation;

/// Built-in exception classes visible to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionKind {
    BaseException,
    Exception,
    ArithmeticError,
    AssertionError,
    AttributeError,
    IndexError,
    KeyError,
    LookupError,
    NameError,
    NotImplementedError,
    OverflowError,
    RecursionError,
    RuntimeError,
    StopIteration,
    TypeError,
    UnboundLocalError,
    ValueError,
    ZeroDivisionError,
}

impl ExceptionKind {
    pub const ALL: &'static [ExceptionKind] = &[
        ExceptionKind::BaseException,
        ExceptionKind::Exception,
        ExceptionKind::ArithmeticError,
        ExceptionKind::AssertionError,
        ExceptionKind::AttributeError,
        ExceptionKind::IndexError,
        ExceptionKind::KeyError,
        ExceptionKind::LookupError,
        ExceptionKind::NameError,
        ExceptionKind::NotImplementedError,
        ExceptionKind::OverflowError,
        ExceptionKind::RecursionError,
        ExceptionKind::RuntimeError,
        ExceptionKind::StopIteration,
        ExceptionKind::TypeError,
        ExceptionKind::UnboundLocalError,
        ExceptionKind::ValueError,
        ExceptionKind::ZeroDivisionError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExceptionKind::BaseException => "BaseException",
            ExceptionKind::Exception => "Exception",
            ExceptionKind::ArithmeticError => "ArithmeticError",
            ExceptionKind::AssertionError => "AssertionError",
            ExceptionKind::AttributeError => "AttributeError",
            ExceptionKind::IndexError => "IndexError",
            ExceptionKind::KeyError => "KeyError",
            ExceptionKind::LookupError => "LookupError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::NotImplementedError => "NotImplementedError",
            ExceptionKind::OverflowError => "OverflowError",
            ExceptionKind::RecursionError => "RecursionError",
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::StopIteration => "StopIteration",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::UnboundLocalError => "UnboundLocalError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::ZeroDivisionError => "ZeroDivisionError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn parent(self) -> Option<Self> {
        use ExceptionKind::*;
        match self {
            BaseException => None,
            Exception => Some(BaseException),
            ArithmeticError | AssertionError | AttributeError | LookupError | NameError
            | RuntimeError | StopIteration | TypeError | ValueError => Some(Exception),
            OverflowError | ZeroDivisionError => Some(ArithmeticError),
            IndexError | KeyError => Some(LookupError),
            UnboundLocalError => Some(NameError),
            NotImplementedError | RecursionError => Some(RuntimeError),
        }
    }

    /// True if `self` is `other` or derives from it.
    pub fn is_subclass_of(self, other: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an error surfaced: the script function and its source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub function: String,
    pub line: u32,
}

/// A raised script exception. Catchable by `try`/`except`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptException {
    pub kind: ExceptionKind,
    pub message: String,
    pub location: Option<Location>,
}

impl ScriptException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::AttributeError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::KeyError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(
            ExceptionKind::OverflowError,
            "integer result out of 64-bit range",
        )
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)
        }
    }
}

/// Why evaluation stopped early.
///
/// `Raise` can be caught by script handlers. `Denied` cannot: it unwinds
/// straight to the executor without running handlers or `finally` blocks.
#[derive(Debug, Clone)]
pub enum Unwind {
    Raise(Box<ScriptException>),
    Denied {
        violation: GuardViolation,
        location: Option<Location>,
    },
}

impl Unwind {
    /// Attach a location if none has been recorded yet.
    pub fn located(self, function: &str, line: u32) -> Self {
        let here = || Location {
            function: function.to_string(),
            line,
        };
        match self {
            Unwind::Raise(mut exc) => {
                if exc.location.is_none() {
                    exc.location = Some(here());
                }
                Unwind::Raise(exc)
            }
            Unwind::Denied {
                violation,
                location: None,
            } => Unwind::Denied {
                violation,
                location: Some(here()),
            },
            denied => denied,
        }
    }

    pub fn is_raise_of(&self, kind: ExceptionKind) -> bool {
        matches!(self, Unwind::Raise(exc) if exc.kind.is_subclass_of(kind))
    }
}

impl From<ScriptException> for Unwind {
    fn from(exc: ScriptException) -> Self {
        Unwind::Raise(Box::new(exc))
    }
}

impl From<GuardViolation> for Unwind {
    fn from(violation: GuardViolation) -> Self {
        Unwind::Denied {
            violation,
            location: None,
        }
    }
}

/// Result of evaluating script code.
pub type Exec<T> = Result<T, Unwind>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExceptionKind::KeyError.is_subclass_of(ExceptionKind::LookupError));
        assert!(ExceptionKind::ZeroDivisionError.is_subclass_of(ExceptionKind::Exception));
        assert!(!ExceptionKind::TypeError.is_subclass_of(ExceptionKind::ValueError));
        assert!(ExceptionKind::RecursionError.is_subclass_of(ExceptionKind::RuntimeError));
    }

    #[test]
    fn test_from_name_roundtrip() {
        for kind in ExceptionKind::ALL {
            assert_eq!(ExceptionKind::from_name(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn test_location_is_set_once() {
        let unwind: Unwind = ScriptException::value_error("bad").into();
        let unwind = unwind.located("inner", 3).located("outer", 9);
        let Unwind::Raise(exc) = unwind else {
            panic!("expected raise");
        };
        assert_eq!(
            exc.location,
            Some(Location {
                function: "inner".into(),
                line: 3
            })
        );
    }

    #[test]
    fn test_display() {
        let exc = ScriptException::value_error("bad input");
        assert_eq!(exc.to_string(), "ValueError: bad input");
    }
}
