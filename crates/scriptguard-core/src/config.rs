//! Sandbox configuration.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys
//! it changes:
//!
//! ```toml
//! max_call_depth = 50
//!
//! [namespace]
//! safe_types = ["none", "bool", "int", "float", "str", "list", "dict"]
//! protected_names = ["robot"]
//! random_seed = 7
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};
use crate::guard::safe_types::{SafeTypes, TypeTag};
use crate::policy::names::{is_identifier, DEFAULT_DENIED_CALLS, DEFAULT_STATEMENT_MARKERS};
use crate::runtime::builtins::Builtin;
use crate::runtime::exception::ExceptionKind;
use crate::runtime::value::ModuleKind;

/// Top-level configuration for a [`SandboxExecutor`](crate::SandboxExecutor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Logical filename used in diagnostics.
    pub filename: String,
    /// Script call depth before `RecursionError` is raised.
    pub max_call_depth: usize,
    pub policy: PolicyConfig,
    pub namespace: NamespaceConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            filename: "<script>".to_string(),
            max_call_depth: 100,
            policy: PolicyConfig::default(),
            namespace: NamespaceConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(text: &str) -> SandboxResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SandboxError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SandboxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> SandboxResult<()> {
        if self.filename.is_empty() {
            return Err(SandboxError::InvalidConfig(
                "filename must not be empty".into(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(SandboxError::InvalidConfig(
                "max_call_depth must be at least 1".into(),
            ));
        }
        self.policy.validate()?;
        self.namespace.validate()
    }
}

/// Compile-time policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Call names exempt from the reserved-name check on call targets.
    pub statement_markers: Vec<String>,
    /// Names whose direct call is rejected.
    pub denied_calls: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            statement_markers: DEFAULT_STATEMENT_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            denied_calls: DEFAULT_DENIED_CALLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PolicyConfig {
    pub fn is_statement_marker(&self, name: &str) -> bool {
        self.statement_markers.iter().any(|m| m == name)
    }

    pub fn is_denied_call(&self, name: &str) -> bool {
        self.denied_calls.iter().any(|d| d == name)
    }

    fn validate(&self) -> SandboxResult<()> {
        for name in self.statement_markers.iter().chain(&self.denied_calls) {
            if !is_identifier(name) {
                return Err(SandboxError::InvalidConfig(format!(
                    "policy name '{name}' is not an identifier"
                )));
            }
        }
        Ok(())
    }
}

/// What the guarded namespace exposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Public built-ins, utility modules and exception types.
    pub builtins: Vec<String>,
    /// Types whose values bypass the capability guards.
    pub safe_types: Vec<TypeTag>,
    /// Extra names the name guard refuses to rebind.
    pub protected_names: Vec<String>,
    /// Seed for the `random` module; `None` draws from the OS.
    pub random_seed: Option<u64>,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        let builtins = Builtin::PUBLIC
            .iter()
            .map(|b| b.name())
            .chain(
                [ModuleKind::Math, ModuleKind::Random, ModuleKind::String]
                    .into_iter()
                    .map(ModuleKind::name),
            )
            .chain(ExceptionKind::ALL.iter().map(|k| k.name()))
            .map(str::to_string)
            .collect();
        Self {
            builtins,
            safe_types: SafeTypes::DEFAULT.to_vec(),
            protected_names: Vec::new(),
            random_seed: None,
        }
    }
}

impl NamespaceConfig {
    pub fn safe_type_set(&self) -> SafeTypes {
        SafeTypes::new(self.safe_types.iter().copied())
    }

    fn validate(&self) -> SandboxResult<()> {
        for name in &self.builtins {
            let known = Builtin::from_name(name).is_some()
                || ModuleKind::from_name(name).is_some()
                || ExceptionKind::from_name(name).is_some();
            if !known {
                return Err(SandboxError::InvalidConfig(format!(
                    "unknown built-in '{name}'"
                )));
            }
        }
        for name in &self.protected_names {
            if !is_identifier(name) {
                return Err(SandboxError::InvalidConfig(format!(
                    "protected name '{name}' is not an identifier"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SandboxConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_call_depth, 100);
        assert!(config.policy.is_denied_call("eval"));
        assert!(config.policy.is_statement_marker("_begin_blockly_statement_"));
        assert!(config.namespace.builtins.iter().any(|b| b == "sorted"));
        assert!(config.namespace.builtins.iter().any(|b| b == "math"));
        assert!(config.namespace.builtins.iter().any(|b| b == "KeyError"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SandboxConfig::from_toml_str(
            r#"
max_call_depth = 20

[namespace]
safe_types = ["int", "str"]
random_seed = 42
"#,
        )
        .unwrap();
        assert_eq!(config.max_call_depth, 20);
        assert_eq!(config.filename, "<script>");
        assert_eq!(config.namespace.safe_types, vec![TypeTag::Int, TypeTag::Str]);
        assert_eq!(config.namespace.random_seed, Some(42));
        assert_eq!(config.policy, PolicyConfig::default());
    }

    #[test]
    fn test_unknown_builtin_is_rejected() {
        let err = SandboxConfig::from_toml_str("[namespace]\nbuiltins = [\"open\"]\n").unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(msg) if msg.contains("open")));
    }

    #[test]
    fn test_bad_protected_name_is_rejected() {
        let err = SandboxConfig::from_toml_str("[namespace]\nprotected_names = [\"a b\"]\n")
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_depth_is_rejected() {
        let config = SandboxConfig {
            max_call_depth: 0,
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sandbox.toml");
        std::fs::write(&path, "filename = \"controller.py\"\n").unwrap();
        let config = SandboxConfig::load(&path).unwrap();
        assert_eq!(config.filename, "controller.py");
    }
}
