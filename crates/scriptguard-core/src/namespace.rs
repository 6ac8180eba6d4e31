//! Guarded namespace builder.
//!
//! Assembles what a compiled script can see: the configured built-ins,
//! utility modules and exception types, the statement markers, the guard
//! hooks under their reserved names, and any globals the host injects.
//! The name guard is pre-loaded with every non-reserved name in there.

use std::collections::BTreeMap;

use crate::config::{NamespaceConfig, PolicyConfig};
use crate::error::{SandboxError, SandboxResult};
use crate::guard::{Guards, NameGuard, SafeTypes};
use crate::policy::names::{is_identifier, is_privileged};
use crate::runtime::builtins::{Builtin, GuardHook};
use crate::runtime::exception::ExceptionKind;
use crate::runtime::value::{ModuleKind, Value};

/// The namespace for one execution. Immutable once built.
#[derive(Debug)]
pub struct GuardedNamespace {
    pub(crate) builtins: BTreeMap<String, Value>,
    pub(crate) globals: BTreeMap<String, Value>,
    pub(crate) guards: Guards,
    pub(crate) name_guard: NameGuard,
    pub(crate) random_seed: Option<u64>,
}

impl GuardedNamespace {
    pub fn builtin(&self, name: &str) -> Option<&Value> {
        self.builtins.get(name)
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn guards(&self) -> &Guards {
        &self.guards
    }

    pub fn name_guard(&self) -> &NameGuard {
        &self.name_guard
    }
}

/// Builds a [`GuardedNamespace`] from configuration plus host globals.
pub struct NamespaceBuilder<'a> {
    config: &'a NamespaceConfig,
    policy: &'a PolicyConfig,
    globals: Vec<(String, Value)>,
}

impl<'a> NamespaceBuilder<'a> {
    pub fn new(config: &'a NamespaceConfig, policy: &'a PolicyConfig) -> Self {
        Self {
            config,
            policy,
            globals: Vec::new(),
        }
    }

    /// Inject a host value under `name`. The name becomes protected.
    pub fn global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.globals.push((name.into(), value));
        self
    }

    pub fn globals(mut self, globals: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.globals.extend(globals);
        self
    }

    pub fn build(self) -> SandboxResult<GuardedNamespace> {
        let mut builtins = BTreeMap::new();
        for name in &self.config.builtins {
            builtins.insert(name.clone(), public_builtin(name)?);
        }
        for marker in &self.policy.statement_markers {
            builtins.insert(marker.clone(), Value::native(marker.clone(), |_| Ok(Value::None)));
        }
        for hook in GuardHook::ALL {
            builtins.insert(hook.name().to_string(), Value::Builtin(Builtin::Guard(*hook)));
        }

        let mut globals = BTreeMap::new();
        for (name, value) in self.globals {
            if !is_identifier(&name) || is_privileged(&name) {
                return Err(SandboxError::InvalidConfig(format!(
                    "global name '{name}' is not a plain identifier"
                )));
            }
            if builtins.contains_key(&name) {
                return Err(SandboxError::InvalidConfig(format!(
                    "global '{name}' would shadow a built-in"
                )));
            }
            globals.insert(name, value);
        }

        let extra = self
            .config
            .protected_names
            .iter()
            .chain(globals.keys())
            .map(String::as_str);
        let name_guard = NameGuard::new(builtins.keys().map(String::as_str), extra);
        let guards = Guards::new(SafeTypes::new(self.config.safe_types.iter().copied()));

        tracing::debug!(
            builtins = builtins.len(),
            globals = globals.len(),
            protected = name_guard.names().count(),
            "namespace built"
        );
        Ok(GuardedNamespace {
            builtins,
            globals,
            guards,
            name_guard,
            random_seed: self.config.random_seed,
        })
    }
}

fn public_builtin(name: &str) -> SandboxResult<Value> {
    if let Some(builtin) = Builtin::from_name(name) {
        return Ok(Value::Builtin(builtin));
    }
    if let Some(module) = ModuleKind::from_name(name) {
        return Ok(Value::Module(module));
    }
    if let Some(kind) = ExceptionKind::from_name(name) {
        return Ok(Value::ExceptionType(kind));
    }
    Err(SandboxError::InvalidConfig(format!(
        "unknown built-in '{name}'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::safe_types::TypeTag;

    fn build(config: &NamespaceConfig) -> GuardedNamespace {
        NamespaceBuilder::new(config, &PolicyConfig::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_namespace_contents() {
        let ns = build(&NamespaceConfig::default());
        assert!(matches!(ns.builtin("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(matches!(ns.builtin("math"), Some(Value::Module(ModuleKind::Math))));
        assert!(matches!(
            ns.builtin("ValueError"),
            Some(Value::ExceptionType(ExceptionKind::ValueError))
        ));
        assert!(matches!(
            ns.builtin("_getattr_"),
            Some(Value::Builtin(Builtin::Guard(GuardHook::GetAttr)))
        ));
        assert!(matches!(ns.builtin("_begin_blockly_statement_"), Some(Value::Native(_))));
        assert!(ns.builtin("open").is_none());
    }

    #[test]
    fn test_name_guard_protects_public_names_only() {
        let ns = build(&NamespaceConfig::default());
        assert!(ns.name_guard().is_protected("print"));
        assert!(ns.name_guard().is_protected("KeyError"));
        assert!(!ns.name_guard().is_protected("_getattr_"));
        assert!(!ns.name_guard().is_protected("total"));
    }

    #[test]
    fn test_injected_globals_are_protected() {
        let config = NamespaceConfig {
            protected_names: vec!["speed".into()],
            ..NamespaceConfig::default()
        };
        let ns = NamespaceBuilder::new(&config, &PolicyConfig::default())
            .global("robot", Value::Int(1))
            .build()
            .unwrap();
        assert!(ns.global("robot").is_some());
        assert!(ns.name_guard().is_protected("robot"));
        assert!(ns.name_guard().is_protected("speed"));
    }

    #[test]
    fn test_global_cannot_shadow_builtin_or_be_privileged() {
        let config = NamespaceConfig::default();
        let shadow = NamespaceBuilder::new(&config, &PolicyConfig::default())
            .global("len", Value::None)
            .build();
        assert!(matches!(shadow, Err(SandboxError::InvalidConfig(_))));
        let private = NamespaceBuilder::new(&config, &PolicyConfig::default())
            .global("_host", Value::None)
            .build();
        assert!(matches!(private, Err(SandboxError::InvalidConfig(_))));
    }

    #[test]
    fn test_safe_types_come_from_config() {
        let config = NamespaceConfig {
            safe_types: vec![TypeTag::Int],
            ..NamespaceConfig::default()
        };
        let ns = build(&config);
        assert!(ns.guards().is_safe(&Value::Int(1)));
        assert!(!ns.guards().is_safe(&Value::str("x")));
    }

    #[test]
    fn test_restricted_builtin_list() {
        let config = NamespaceConfig {
            builtins: vec!["len".into(), "print".into()],
            ..NamespaceConfig::default()
        };
        let ns = build(&config);
        assert!(ns.builtin("len").is_some());
        assert!(ns.builtin("sorted").is_none());
        assert!(!ns.name_guard().is_protected("sorted"));
    }
}
