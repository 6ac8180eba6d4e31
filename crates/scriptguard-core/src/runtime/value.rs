//! Script values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::builtins::Builtin;
use super::exception::{ExceptionKind, ScriptException};
use super::table::{Dict, HashKey, SetTable};
use crate::compile::CompiledFunction;
use crate::guard::capability::{CapabilityObject, HookResult};
use crate::guard::safe_types::TypeTag;

/// Utility modules exposed as safe values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Math,
    Random,
    String,
}

impl ModuleKind {
    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Math => "math",
            ModuleKind::Random => "random",
            ModuleKind::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "math" => Some(ModuleKind::Math),
            "random" => Some(ModuleKind::Random),
            "string" => Some(ModuleKind::String),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / (-step)
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = i128::from(self.start) + i128::from(self.step) * index as i128;
        i64::try_from(value).ok()
    }

    pub fn contains(&self, value: i64) -> bool {
        let (v, start, step) = (
            i128::from(value),
            i128::from(self.start),
            i128::from(self.step),
        );
        let in_bounds = if step > 0 {
            v >= start && v < i128::from(self.stop)
        } else {
            v <= start && v > i128::from(self.stop)
        };
        in_bounds && (v - start) % step == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceValue {
    /// Resolve against a sequence length, yielding the selected indices.
    pub fn indices(&self, len: usize) -> HookResult<Vec<usize>> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ScriptException::value_error("slice step cannot be zero"));
        }
        let len = len as i64;
        let clamp = |v: i64, lower: i64, upper: i64| v.max(lower).min(upper);
        let norm = |v: i64| if v < 0 { v + len } else { v };
        let mut out = Vec::new();
        if step > 0 {
            let start = self.start.map_or(0, |s| clamp(norm(s), 0, len));
            let stop = self.stop.map_or(len, |s| clamp(norm(s), 0, len));
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = self.start.map_or(len - 1, |s| clamp(norm(s), -1, len - 1));
            let stop = self.stop.map_or(-1, |s| clamp(norm(s), -1, len - 1));
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }
}

/// Iterator state behind `iter()` and the iteration helpers.
#[derive(Debug)]
pub enum ScriptIter {
    Items { items: Vec<Value>, pos: usize },
    Range { next: i64, remaining: usize, step: i64 },
    Enumerate { inner: Rc<RefCell<ScriptIter>>, count: i64 },
    Zip { inners: Vec<Rc<RefCell<ScriptIter>>> },
}

impl ScriptIter {
    pub fn items(items: Vec<Value>) -> Self {
        ScriptIter::Items { items, pos: 0 }
    }

    pub fn range(range: RangeValue) -> Self {
        ScriptIter::Range {
            next: range.start,
            remaining: range.len(),
            step: range.step,
        }
    }

    pub fn next_value(&mut self) -> HookResult<Option<Value>> {
        match self {
            ScriptIter::Items { items, pos } => {
                let item = items.get(*pos).cloned();
                if item.is_some() {
                    *pos += 1;
                }
                Ok(item)
            }
            ScriptIter::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let current = *next;
                *remaining -= 1;
                if *remaining > 0 {
                    *next = next.checked_add(*step).ok_or_else(ScriptException::overflow)?;
                }
                Ok(Some(Value::Int(current)))
            }
            ScriptIter::Enumerate { inner, count } => {
                let item = inner.borrow_mut().next_value()?;
                match item {
                    Some(item) => {
                        let index = *count;
                        *count = count.checked_add(1).ok_or_else(ScriptException::overflow)?;
                        Ok(Some(Value::tuple(vec![Value::Int(index), item])))
                    }
                    None => Ok(None),
                }
            }
            ScriptIter::Zip { inners } => {
                if inners.is_empty() {
                    return Ok(None);
                }
                let mut row = Vec::with_capacity(inners.len());
                for inner in inners.iter() {
                    match inner.borrow_mut().next_value()? {
                        Some(item) => row.push(item),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::tuple(row)))
            }
        }
    }
}

/// A script function bound to its evaluated default values.
#[derive(Debug)]
pub struct ScriptFunction {
    pub code: Rc<CompiledFunction>,
    pub defaults: Vec<Value>,
}

/// A method looked up on a safe value, e.g. `items.append`.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

type NativeFn = dyn Fn(&[Value]) -> HookResult<Value>;

/// A host-supplied callable.
pub struct NativeFunction {
    pub name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> HookResult<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn call(&self, args: &[Value]) -> HookResult<Value> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    ByteArray(Rc<RefCell<Vec<u8>>>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<SetTable>>),
    FrozenSet(Rc<SetTable>),
    Range(RangeValue),
    Slice(SliceValue),
    Iterator(Rc<RefCell<ScriptIter>>),
    Module(ModuleKind),
    Function(Rc<ScriptFunction>),
    Builtin(Builtin),
    BoundMethod(Rc<BoundMethod>),
    Native(Rc<NativeFunction>),
    ExceptionType(ExceptionKind),
    Exception(Rc<ScriptException>),
    Object(Rc<dyn CapabilityObject>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: SetTable) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn bytes(data: &[u8]) -> Self {
        Value::Bytes(Rc::from(data))
    }

    pub fn iterator(state: ScriptIter) -> Self {
        Value::Iterator(Rc::new(RefCell::new(state)))
    }

    pub fn object(object: impl CapabilityObject + 'static) -> Self {
        Value::Object(Rc::new(object))
    }

    pub fn native(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> HookResult<Value> + 'static,
    ) -> Self {
        Value::Native(Rc::new(NativeFunction::new(name, func)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::None => TypeTag::None,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::Bytes(_) => TypeTag::Bytes,
            Value::ByteArray(_) => TypeTag::Bytearray,
            Value::List(_) => TypeTag::List,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::Dict(_) => TypeTag::Dict,
            Value::Set(_) => TypeTag::Set,
            Value::FrozenSet(_) => TypeTag::Frozenset,
            Value::Range(_) => TypeTag::Range,
            Value::Slice(_) => TypeTag::Slice,
            Value::Iterator(_) => TypeTag::Iterator,
            Value::Module(_) => TypeTag::Module,
            Value::Function(_) => TypeTag::Function,
            Value::Builtin(_) | Value::BoundMethod(_) | Value::Native(_) => TypeTag::Builtin,
            Value::ExceptionType(_) => TypeTag::Type,
            Value::Exception(_) => TypeTag::Exception,
            Value::Object(_) => TypeTag::Object,
        }
    }

    /// Type name as shown in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Object(obj) => obj.type_name().to_string(),
            Value::Exception(exc) => exc.kind.name().to_string(),
            Value::Builtin(b) if b.as_type().is_some() => "type".to_string(),
            Value::BoundMethod(_) | Value::Builtin(_) | Value::Native(_) => {
                "builtin_function_or_method".to_string()
            }
            other => other.type_tag().name().to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truth value. Host objects answer through their `truthy` hook.
    pub fn truthy(&self) -> HookResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::ByteArray(b) => !b.borrow().is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Set(s) => !s.borrow().is_empty(),
            Value::FrozenSet(s) => !s.is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::Object(obj) => obj.truthy()?,
            _ => true,
        })
    }

    /// Identity comparison (`is`).
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Rc::ptr_eq(a, b),
            (Value::ByteArray(a), Value::ByteArray(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::FrozenSet(a), Value::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
            }
            _ => false,
        }
    }

    pub fn hash_key(&self) -> HookResult<HashKey> {
        HashKey::from_value(self)
    }

    /// Convert to JSON where the value has a natural JSON form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as J;
        Some(match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number)?,
            Value::Str(s) => J::String(s.to_string()),
            Value::List(items) => J::Array(
                items
                    .borrow()
                    .iter()
                    .map(Value::to_json)
                    .collect::<Option<_>>()?,
            ),
            Value::Tuple(items) => {
                J::Array(items.iter().map(Value::to_json).collect::<Option<_>>()?)
            }
            Value::Dict(dict) => {
                let mut map = serde_json::Map::new();
                for (key, value) in dict.borrow().iter() {
                    let Value::Str(key) = key else {
                        return None;
                    };
                    map.insert(key.to_string(), value.to_json()?);
                }
                J::Object(map)
            }
            _ => return None,
        })
    }

    /// Build a script value from JSON. Objects become dicts with string keys.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::str(s),
            J::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            J::Object(map) => {
                let mut dict = Dict::new();
                for (key, value) in map {
                    dict.insert(
                        HashKey::Str(Rc::from(key.as_str())),
                        Value::str(key),
                        Value::from_json(value),
                    );
                }
                Value::dict(dict)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::format::to_str(self))
    }
}
