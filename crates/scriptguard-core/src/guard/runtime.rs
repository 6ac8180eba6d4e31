//! Run-time mediation of attribute, item and operator access.

use std::rc::Rc;

use super::capability::{CapabilityObject, Hook};
use super::error::GuardViolation;
use super::safe_types::SafeTypes;
use crate::policy::guarded::{OperandCheck, WriteOp};
use crate::policy::names::is_privileged;
use crate::runtime::exception::{ExceptionKind, Exec, ScriptException, Unwind};
use crate::runtime::{methods, ops, Value};

/// The capability guard runtime for one namespace.
#[derive(Debug, Clone, Default)]
pub struct Guards {
    safe_types: SafeTypes,
}

fn privileged_attribute(name: &str) -> ScriptException {
    ScriptException::attribute_error(format!(
        "\"{name}\" is an invalid attribute name because it starts or ends with \"_\""
    ))
}

impl Guards {
    pub fn new(safe_types: SafeTypes) -> Self {
        Self { safe_types }
    }

    pub fn safe_types(&self) -> &SafeTypes {
        &self.safe_types
    }

    pub fn is_safe(&self, value: &Value) -> bool {
        self.safe_types.contains(value.type_tag())
    }

    /// The host object behind `value`, if it grants `hook`.
    fn require<'v>(
        &self,
        value: &'v Value,
        hook: Hook,
    ) -> Result<&'v Rc<dyn CapabilityObject>, GuardViolation> {
        match value {
            Value::Object(obj) if obj.hooks().contains(hook) => Ok(obj),
            other => Err(GuardViolation::denied(hook.guard_op(), other.type_name())),
        }
    }

    fn check_attribute_name(&self, value: &Value, name: &str) -> Exec<()> {
        if name == "format" && matches!(value, Value::Str(_)) {
            return Err(GuardViolation::UnsafeFormat {
                type_name: value.type_name(),
            }
            .into());
        }
        if is_privileged(name) {
            return Err(privileged_attribute(name).into());
        }
        Ok(())
    }

    pub fn get_attr(&self, value: &Value, name: &str) -> Exec<Value> {
        self.check_attribute_name(value, name)?;
        if self.is_safe(value) {
            return Ok(methods::lookup_attribute(value, name)?);
        }
        let obj = self.require(value, Hook::GetAttr)?;
        Ok(obj.get_attr(name)?)
    }

    /// `getattr(obj, name, default)`: a missing attribute yields `default`;
    /// denials still propagate.
    pub fn get_attr_or(&self, value: &Value, name: &str, default: Value) -> Exec<Value> {
        match self.get_attr(value, name) {
            Err(unwind) if unwind.is_raise_of(ExceptionKind::AttributeError) => Ok(default),
            other => other,
        }
    }

    pub fn has_attr(&self, value: &Value, name: &str) -> Exec<bool> {
        self.check_attribute_name(value, name)?;
        if self.is_safe(value) {
            return Ok(methods::has_attribute(value, name));
        }
        let Ok(obj) = self.require(value, Hook::GetAttr) else {
            return Ok(false);
        };
        match obj.get_attr(name) {
            Ok(_) => Ok(true),
            Err(exc) if exc.kind.is_subclass_of(ExceptionKind::AttributeError) => Ok(false),
            Err(exc) => Err(exc.into()),
        }
    }

    pub fn get_item(&self, value: &Value, index: &Value) -> Exec<Value> {
        if self.is_safe(value) {
            return Ok(ops::get_item(value, index)?);
        }
        let obj = self.require(value, Hook::GetItem)?;
        Ok(obj.get_item(index)?)
    }

    /// Admit `value` as the target of a write. Safe values pass unchanged.
    pub fn write(&self, value: Value, op: WriteOp) -> Exec<Value> {
        if self.is_safe(&value) {
            return Ok(value);
        }
        let hook = match op {
            WriteOp::SetAttr => Hook::SetAttr,
            WriteOp::DelAttr => Hook::DelAttr,
            WriteOp::SetItem => Hook::SetItem,
            WriteOp::DelItem => Hook::DelItem,
        };
        self.require(&value, hook)?;
        Ok(value)
    }

    pub fn set_attr(&self, target: &Value, name: &str, value: Value) -> Exec<()> {
        if is_privileged(name) {
            return Err(privileged_attribute(name).into());
        }
        if self.is_safe(target) {
            return Err(read_only_attribute(target, name).into());
        }
        let obj = self.require(target, Hook::SetAttr)?;
        Ok(obj.set_attr(name, value)?)
    }

    pub fn del_attr(&self, target: &Value, name: &str) -> Exec<()> {
        if is_privileged(name) {
            return Err(privileged_attribute(name).into());
        }
        if self.is_safe(target) {
            return Err(read_only_attribute(target, name).into());
        }
        let obj = self.require(target, Hook::DelAttr)?;
        Ok(obj.del_attr(name)?)
    }

    pub fn set_item(&self, target: &Value, index: Value, value: Value) -> Exec<()> {
        if self.is_safe(target) {
            return Ok(ops::set_item(target, index, value)?);
        }
        let obj = self.require(target, Hook::SetItem)?;
        Ok(obj.set_item(index, value)?)
    }

    pub fn del_item(&self, target: &Value, index: &Value) -> Exec<()> {
        if self.is_safe(target) {
            return Ok(ops::del_item(target, index)?);
        }
        let obj = self.require(target, Hook::DelItem)?;
        Ok(obj.del_item(index)?)
    }

    /// Operator guard: pass `value` through unchanged or deny.
    pub fn check_operand(&self, check: OperandCheck, value: Value) -> Exec<Value> {
        if self.is_safe(&value) {
            return Ok(value);
        }
        let hook = match check {
            OperandCheck::Unary => Hook::UnaryOp,
            OperandCheck::Binary => Hook::BinaryOp,
            OperandCheck::Bool => Hook::BoolOp,
            OperandCheck::Compare => Hook::CompareOp,
        };
        self.require(&value, hook)?;
        Ok(value)
    }

    /// The host object managing a `with` block.
    pub fn context_manager(&self, value: &Value) -> Exec<Rc<dyn CapabilityObject>> {
        if self.is_safe(value) {
            return Err(Unwind::from(ScriptException::type_error(format!(
                "'{}' object does not support the context manager protocol",
                value.type_name()
            ))));
        }
        Ok(self.require(value, Hook::ContextManager)?.clone())
    }
}

fn read_only_attribute(target: &Value, name: &str) -> ScriptException {
    ScriptException::attribute_error(format!(
        "'{}' object attribute '{name}' is read-only",
        target.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::capability::{HookResult, HookSet};
    use crate::guard::error::GuardOp;

    #[derive(Debug)]
    struct Probe {
        hooks: HookSet,
    }

    impl CapabilityObject for Probe {
        fn type_name(&self) -> &str {
            "Probe"
        }

        fn hooks(&self) -> HookSet {
            self.hooks
        }

        fn get_attr(&self, name: &str) -> HookResult<Value> {
            match name {
                "speed" => Ok(Value::Int(7)),
                _ => Err(ScriptException::attribute_error(format!(
                    "'Probe' object has no attribute '{name}'"
                ))),
            }
        }
    }

    fn probe(hooks: &[Hook]) -> Value {
        Value::object(Probe {
            hooks: hooks.iter().copied().collect(),
        })
    }

    fn denied_op(result: Exec<Value>) -> GuardOp {
        match result {
            Err(Unwind::Denied {
                violation: GuardViolation::Denied { operation, .. },
                ..
            }) => operation,
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_hookless_object_is_denied_everything() {
        let guards = Guards::default();
        let obj = probe(&[]);
        assert_eq!(denied_op(guards.get_attr(&obj, "speed")), GuardOp::GetAttr);
        assert_eq!(
            denied_op(guards.get_item(&obj, &Value::Int(0))),
            GuardOp::GetItem
        );
        assert_eq!(
            denied_op(guards.check_operand(OperandCheck::Binary, obj.clone())),
            GuardOp::BinaryOp
        );
        assert_eq!(
            denied_op(guards.write(obj, WriteOp::SetItem)),
            GuardOp::SetItem
        );
    }

    #[test]
    fn test_get_attr_hook_only_grants_attribute_reads() {
        let guards = Guards::default();
        let obj = probe(&[Hook::GetAttr]);
        assert!(matches!(guards.get_attr(&obj, "speed"), Ok(Value::Int(7))));
        assert_eq!(
            denied_op(guards.check_operand(OperandCheck::Compare, obj)),
            GuardOp::CompareOp
        );
    }

    #[test]
    fn test_format_on_str_is_denied() {
        let guards = Guards::default();
        let result = guards.get_attr(&Value::str("{}"), "format");
        assert!(matches!(
            result,
            Err(Unwind::Denied {
                violation: GuardViolation::UnsafeFormat { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_privileged_attribute_raises_attribute_error() {
        let guards = Guards::default();
        let result = guards.get_attr(&Value::list(vec![]), "__class__");
        assert!(matches!(&result, Err(u) if u.is_raise_of(ExceptionKind::AttributeError)));
    }

    #[test]
    fn test_has_attr_and_default() {
        let guards = Guards::default();
        let obj = probe(&[Hook::GetAttr]);
        assert!(guards.has_attr(&obj, "speed").unwrap());
        assert!(!guards.has_attr(&obj, "mass").unwrap());
        assert!(!guards.has_attr(&probe(&[]), "speed").unwrap());
        let fallback = guards.get_attr_or(&obj, "mass", Value::Int(0)).unwrap();
        assert!(matches!(fallback, Value::Int(0)));
        assert!(guards.get_attr_or(&probe(&[]), "mass", Value::None).is_err());
    }

    #[test]
    fn test_safe_values_pass_operand_checks() {
        let guards = Guards::default();
        let checked = guards
            .check_operand(OperandCheck::Unary, Value::Int(3))
            .unwrap();
        assert!(matches!(checked, Value::Int(3)));
    }

    #[test]
    fn test_functions_are_not_safe() {
        let guards = Guards::default();
        let builtin = Value::native("helper", |_| Ok(Value::None));
        assert_eq!(
            denied_op(guards.check_operand(OperandCheck::Compare, builtin)),
            GuardOp::CompareOp
        );
    }
}
