//! The name-binding guard.

use std::collections::BTreeSet;

use super::error::GuardViolation;
use crate::policy::names::is_privileged;

/// Rejects bindings that would shadow a built-in or injected global.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameGuard {
    protected: BTreeSet<String>,
}

impl NameGuard {
    /// Protect every non-privileged name in `builtin_names` plus `extra`.
    pub fn new<'a>(
        builtin_names: impl IntoIterator<Item = &'a str>,
        extra: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let protected = builtin_names
            .into_iter()
            .filter(|name| !is_privileged(name))
            .chain(extra)
            .map(str::to_string)
            .collect();
        Self { protected }
    }

    pub fn protect(&mut self, name: impl Into<String>) {
        self.protected.insert(name.into());
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.contains(name)
    }

    pub fn check(&self, name: &str) -> Result<(), GuardViolation> {
        if self.is_protected(name) {
            return Err(GuardViolation::ReservedName {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protected.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_and_extras_are_protected() {
        let guard = NameGuard::new(["len", "print", "_getattr_"], ["robot"]);
        assert!(guard.check("len").is_err());
        assert!(guard.check("robot").is_err());
        assert!(guard.check("speed").is_ok());
        assert!(!guard.is_protected("_getattr_"));
    }

    #[test]
    fn test_violation_names_the_binding() {
        let guard = NameGuard::new(["sum"], []);
        assert_eq!(
            guard.check("sum").unwrap_err(),
            GuardViolation::ReservedName { name: "sum".into() }
        );
    }
}
