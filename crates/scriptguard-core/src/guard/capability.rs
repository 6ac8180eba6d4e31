//! Host objects exposed to scripts and the hooks they may grant.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GuardOp;
use crate::runtime::exception::ScriptException;
use crate::runtime::Value;
use crate::syntax::ast::{BinaryOp, CompareOp, UnaryOp};

/// One category of guarded operation a host object may permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
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
    /// `with obj as x:` support via `enter`/`exit`.
    ContextManager,
}

impl Hook {
    pub const ALL: &'static [Hook] = &[
        Hook::GetAttr,
        Hook::SetAttr,
        Hook::DelAttr,
        Hook::GetItem,
        Hook::SetItem,
        Hook::DelItem,
        Hook::UnaryOp,
        Hook::BinaryOp,
        Hook::BoolOp,
        Hook::CompareOp,
        Hook::ContextManager,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn guard_op(self) -> GuardOp {
        match self {
            Hook::GetAttr => GuardOp::GetAttr,
            Hook::SetAttr => GuardOp::SetAttr,
            Hook::DelAttr => GuardOp::DelAttr,
            Hook::GetItem => GuardOp::GetItem,
            Hook::SetItem => GuardOp::SetItem,
            Hook::DelItem => GuardOp::DelItem,
            Hook::UnaryOp => GuardOp::UnaryOp,
            Hook::BinaryOp => GuardOp::BinaryOp,
            Hook::BoolOp => GuardOp::BoolOp,
            Hook::CompareOp => GuardOp::CompareOp,
            Hook::ContextManager => GuardOp::ContextManager,
        }
    }
}

/// The set of hooks an object grants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HookSet(u16);

impl HookSet {
    pub const fn empty() -> Self {
        HookSet(0)
    }

    pub fn all() -> Self {
        Hook::ALL.iter().copied().collect()
    }

    pub fn with(self, hook: Hook) -> Self {
        HookSet(self.0 | hook.bit())
    }

    pub fn contains(self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Hook> {
        Hook::ALL.iter().copied().filter(move |h| self.contains(*h))
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(HookSet::empty(), HookSet::with)
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Result of a hook method. Hooks may raise ordinary, catchable exceptions.
pub type HookResult<T> = Result<T, ScriptException>;

fn unsupported<T>(type_name: &str, what: &str) -> HookResult<T> {
    Err(ScriptException::type_error(format!(
        "'{type_name}' object does not support {what}"
    )))
}

/// A host-owned value that is not a safe type.
///
/// Every guarded operation on it is denied unless [`hooks`](Self::hooks)
/// includes the matching [`Hook`]; only then is the hook method called.
/// The default methods are never reached for hooks the set omits.
pub trait CapabilityObject: fmt::Debug {
    /// Name used in messages and by `type()`-style reporting.
    fn type_name(&self) -> &str;

    fn hooks(&self) -> HookSet {
        HookSet::empty()
    }

    fn get_attr(&self, name: &str) -> HookResult<Value> {
        let _ = name;
        unsupported(self.type_name(), "attribute access")
    }

    fn set_attr(&self, name: &str, value: Value) -> HookResult<()> {
        let _ = (name, value);
        unsupported(self.type_name(), "attribute assignment")
    }

    fn del_attr(&self, name: &str) -> HookResult<()> {
        let _ = name;
        unsupported(self.type_name(), "attribute deletion")
    }

    fn get_item(&self, index: &Value) -> HookResult<Value> {
        let _ = index;
        unsupported(self.type_name(), "item access")
    }

    fn set_item(&self, index: Value, value: Value) -> HookResult<()> {
        let _ = (index, value);
        unsupported(self.type_name(), "item assignment")
    }

    fn del_item(&self, index: &Value) -> HookResult<()> {
        let _ = index;
        unsupported(self.type_name(), "item deletion")
    }

    fn unary_op(&self, op: UnaryOp) -> HookResult<Value> {
        let _ = op;
        unsupported(self.type_name(), "unary operators")
    }

    /// `self op other`, or `other op self` when `reflected`.
    fn binary_op(&self, op: BinaryOp, other: &Value, reflected: bool) -> HookResult<Value> {
        let _ = (op, other, reflected);
        unsupported(self.type_name(), "binary operators")
    }

    /// `self op other`. For `In`/`NotIn` the object is the container:
    /// the expression is `other in self`.
    fn compare(&self, op: CompareOp, other: &Value) -> HookResult<bool> {
        let _ = (op, other);
        unsupported(self.type_name(), "comparison")
    }

    /// Truth value used by boolean operators and `not`.
    fn truthy(&self) -> HookResult<bool> {
        Ok(true)
    }

    fn enter(&self) -> HookResult<Value> {
        unsupported(self.type_name(), "the context manager protocol")
    }

    /// Called when a `with` block ends. Returning `true` suppresses `error`.
    fn exit(&self, error: Option<&ScriptException>) -> HookResult<bool> {
        let _ = error;
        Ok(false)
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hookset_membership() {
        let set: HookSet = [Hook::GetAttr, Hook::CompareOp].into_iter().collect();
        assert!(set.contains(Hook::GetAttr));
        assert!(set.contains(Hook::CompareOp));
        assert!(!set.contains(Hook::GetItem));
        assert!(HookSet::empty().is_empty());
        assert_eq!(HookSet::all().iter().count(), Hook::ALL.len());
    }

    #[test]
    fn test_hookset_debug_lists_hooks() {
        let set = HookSet::empty().with(Hook::SetItem);
        assert_eq!(format!("{set:?}"), "{SetItem}");
    }
}
