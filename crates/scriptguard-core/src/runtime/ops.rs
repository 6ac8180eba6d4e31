//! Operator semantics, item access, containment and iteration.
//!
//! Safe operands are not re-checked here. Host objects are reached only
//! through hook methods their [`HookSet`](crate::guard::HookSet) grants, so
//! built-ins that do arithmetic or comparison cannot bypass the operator
//! guards.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use super::exception::{ExceptionKind, Exec, ScriptException};
use super::format::{percent_format, repr};
use super::table::{Dict, HashKey, SetTable};
use super::value::{ScriptIter, SliceValue, Value};
use crate::guard::capability::{CapabilityObject, Hook, HookResult};
use crate::guard::error::GuardViolation;
use crate::syntax::ast::{BinaryOp, CompareOp, UnaryOp};

fn unsupported_binary(op: BinaryOp, left: &Value, right: &Value) -> ScriptException {
    ScriptException::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// Integer view of `int` and `bool`.
fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Float view of any real number.
pub fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        other => int_of(other).map(|i| i as f64),
    }
}

fn overflow() -> ScriptException {
    ScriptException::overflow()
}

fn checked(result: Option<i64>) -> HookResult<Value> {
    result.map(Value::Int).ok_or_else(overflow)
}

/// Floor division and modulo with the sign of the divisor.
pub fn int_divmod(a: i64, b: i64) -> HookResult<(i64, i64)> {
    if b == 0 {
        return Err(ScriptException::zero_division(
            "integer division or modulo by zero",
        ));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    let r = a - q * b;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok((q - 1, r + b))
    } else {
        Ok((q, r))
    }
}

pub fn float_divmod(a: f64, b: f64) -> HookResult<(f64, f64)> {
    if b == 0.0 {
        return Err(ScriptException::zero_division("float divmod()"));
    }
    let mut r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r += b;
    }
    Ok(((a - r) / b, r))
}

pub fn int_pow(base: i64, exp: i64) -> HookResult<Value> {
    if exp < 0 {
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    checked(base.checked_pow(exp))
}

fn shift_left(a: i64, n: i64) -> HookResult<Value> {
    if n < 0 {
        return Err(ScriptException::value_error("negative shift count"));
    }
    if a == 0 {
        return Ok(Value::Int(0));
    }
    if n >= 63 {
        return Err(overflow());
    }
    let result = a << n;
    if result >> n != a {
        return Err(overflow());
    }
    Ok(Value::Int(result))
}

fn shift_right(a: i64, n: i64) -> HookResult<Value> {
    if n < 0 {
        return Err(ScriptException::value_error("negative shift count"));
    }
    Ok(Value::Int(if n >= 64 {
        if a < 0 {
            -1
        } else {
            0
        }
    } else {
        a >> n
    }))
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> HookResult<Value> {
    match op {
        BinaryOp::Add => checked(a.checked_add(b)),
        BinaryOp::Sub => checked(a.checked_sub(b)),
        BinaryOp::Mult => checked(a.checked_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(ScriptException::zero_division("division by zero"));
            }
            Ok(Value::Float(a as f64 / b as f64))
        }
        BinaryOp::FloorDiv => Ok(Value::Int(int_divmod(a, b)?.0)),
        BinaryOp::Mod => Ok(Value::Int(int_divmod(a, b)?.1)),
        BinaryOp::Pow => int_pow(a, b),
        BinaryOp::LShift => shift_left(a, b),
        BinaryOp::RShift => shift_right(a, b),
        BinaryOp::BitOr => Ok(Value::Int(a | b)),
        BinaryOp::BitXor => Ok(Value::Int(a ^ b)),
        BinaryOp::BitAnd => Ok(Value::Int(a & b)),
        BinaryOp::MatMult => Err(unsupported_binary(op, &Value::Int(a), &Value::Int(b))),
    }
}

fn float_binary(op: BinaryOp, a: f64, b: f64, left: &Value, right: &Value) -> HookResult<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mult => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ScriptException::zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => float_divmod(a, b)?.0,
        BinaryOp::Mod => float_divmod(a, b)?.1,
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ScriptException::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            a.powf(b)
        }
        _ => return Err(unsupported_binary(op, left, right)),
    };
    Ok(Value::Float(value))
}

fn repeat_count(n: i64, len: usize) -> HookResult<usize> {
    if n <= 0 {
        return Ok(0);
    }
    let n = usize::try_from(n).map_err(|_| overflow())?;
    match len.checked_mul(n) {
        Some(total) if total <= isize::MAX as usize => Ok(n),
        _ => Err(ScriptException::new(
            ExceptionKind::OverflowError,
            "repeated sequence is too long",
        )),
    }
}

fn bytes_like(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(b) => Some(b.to_vec()),
        Value::ByteArray(b) => Some(b.borrow().clone()),
        _ => None,
    }
}

fn set_members(value: &Value) -> Option<SetTable> {
    match value {
        Value::Set(s) => Some(s.borrow().clone()),
        Value::FrozenSet(s) => Some((**s).clone()),
        _ => None,
    }
}

pub fn set_union(a: &SetTable, b: &SetTable) -> SetTable {
    let mut out = a.clone();
    for (k, _) in b.iter() {
        if let Ok(hash) = HashKey::from_value(k) {
            if !out.contains(&hash) {
                out.insert(hash, k.clone(), ());
            }
        }
    }
    out
}

pub fn set_filter(a: &SetTable, b: &SetTable, keep_common: bool) -> SetTable {
    let mut out = SetTable::new();
    for (k, _) in a.iter() {
        if let Ok(hash) = HashKey::from_value(k) {
            if b.contains(&hash) == keep_common {
                out.insert(hash, k.clone(), ());
            }
        }
    }
    out
}

pub fn set_symmetric(a: &SetTable, b: &SetTable) -> SetTable {
    let left = set_filter(a, b, false);
    let right = set_filter(b, a, false);
    set_union(&left, &right)
}

fn wrap_set_like(template: &Value, set: SetTable) -> Value {
    match template {
        Value::FrozenSet(_) => Value::FrozenSet(Rc::new(set)),
        _ => Value::set(set),
    }
}

/// `obj` if its hook set grants `hook`; a denial otherwise.
fn granted(
    obj: &Rc<dyn CapabilityObject>,
    hook: Hook,
) -> Result<&Rc<dyn CapabilityObject>, GuardViolation> {
    if obj.hooks().contains(hook) {
        Ok(obj)
    } else {
        Err(GuardViolation::denied(hook.guard_op(), obj.type_name()))
    }
}

/// `left op right`.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
    if let Value::Object(obj) = left {
        return Ok(granted(obj, Hook::BinaryOp)?.binary_op(op, right, false)?);
    }
    if let Value::Object(obj) = right {
        return Ok(granted(obj, Hook::BinaryOp)?.binary_op(op, left, true)?);
    }
    Ok(builtin_binary(op, left, right)?)
}

fn builtin_binary(op: BinaryOp, left: &Value, right: &Value) -> HookResult<Value> {
    if let (Some(a), Some(b)) = (int_of(left), int_of(right)) {
        if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
            match op {
                BinaryOp::BitAnd => return Ok(Value::Bool(*x & *y)),
                BinaryOp::BitOr => return Ok(Value::Bool(*x | *y)),
                BinaryOp::BitXor => return Ok(Value::Bool(*x ^ *y)),
                _ => {}
            }
        }
        return int_binary(op, a, b);
    }
    if let (Some(a), Some(b)) = (float_of(left), float_of(right)) {
        return float_binary(op, a, b, left, right);
    }

    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (BinaryOp::Mult, Value::Str(s), n) | (BinaryOp::Mult, n, Value::Str(s))
            if int_of(n).is_some() =>
        {
            let count = repeat_count(int_of(n).unwrap_or(0), s.len())?;
            Ok(Value::from(s.repeat(count)))
        }
        (BinaryOp::Mod, Value::Str(template), args) => {
            Ok(Value::from(percent_format(template, args)?))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Mult, Value::List(items), n) | (BinaryOp::Mult, n, Value::List(items))
            if int_of(n).is_some() =>
        {
            let items = items.borrow();
            let count = repeat_count(int_of(n).unwrap_or(0), items.len())?;
            Ok(Value::list(repeat_items(&items, count)))
        }
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinaryOp::Mult, Value::Tuple(items), n) | (BinaryOp::Mult, n, Value::Tuple(items))
            if int_of(n).is_some() =>
        {
            let count = repeat_count(int_of(n).unwrap_or(0), items.len())?;
            Ok(Value::tuple(repeat_items(items, count)))
        }
        (BinaryOp::Add, Value::Bytes(_) | Value::ByteArray(_), _) => {
            let mut data = bytes_like(left).unwrap_or_default();
            let tail = bytes_like(right).ok_or_else(|| unsupported_binary(op, left, right))?;
            data.extend_from_slice(&tail);
            Ok(match left {
                Value::ByteArray(_) => Value::ByteArray(Rc::new(RefCell::new(data))),
                _ => Value::bytes(&data),
            })
        }
        (BinaryOp::Mult, Value::Bytes(b), n) | (BinaryOp::Mult, n, Value::Bytes(b))
            if int_of(n).is_some() =>
        {
            let count = repeat_count(int_of(n).unwrap_or(0), b.len())?;
            Ok(Value::bytes(&b.repeat(count)))
        }
        (
            BinaryOp::BitOr | BinaryOp::BitAnd | BinaryOp::Sub | BinaryOp::BitXor,
            Value::Set(_) | Value::FrozenSet(_),
            Value::Set(_) | Value::FrozenSet(_),
        ) => {
            let a = set_members(left).unwrap_or_default();
            let b = set_members(right).unwrap_or_default();
            let result = match op {
                BinaryOp::BitOr => set_union(&a, &b),
                BinaryOp::BitAnd => set_filter(&a, &b, true),
                BinaryOp::Sub => set_filter(&a, &b, false),
                _ => set_symmetric(&a, &b),
            };
            Ok(wrap_set_like(left, result))
        }
        (BinaryOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged: Dict = a.borrow().clone();
            for (k, v) in b.borrow().iter() {
                merged.insert(HashKey::from_value(k)?, k.clone(), v.clone());
            }
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported_binary(op, left, right)),
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

/// Unary `+`, `-` and `~`. `not` is handled by the evaluator.
pub fn unary(op: UnaryOp, operand: &Value) -> Exec<Value> {
    if let Value::Object(obj) = operand {
        return Ok(granted(obj, Hook::UnaryOp)?.unary_op(op)?);
    }
    Ok(builtin_unary(op, operand)?)
}

fn builtin_unary(op: UnaryOp, operand: &Value) -> HookResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::USub, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::UAdd, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::USub, v) if int_of(v).is_some() => {
            checked(int_of(v).and_then(i64::checked_neg))
        }
        (UnaryOp::UAdd, v) if int_of(v).is_some() => Ok(Value::Int(int_of(v).unwrap_or(0))),
        (UnaryOp::Invert, v) if int_of(v).is_some() => Ok(Value::Int(!int_of(v).unwrap_or(0))),
        (op, v) => Err(ScriptException::type_error(format!(
            "bad operand type for unary {}: '{}'",
            op.symbol(),
            v.type_name()
        ))),
    }
}

/// Structural equality. Host objects compare by identity here; the
/// comparison hook is only consulted by [`compare`].
pub fn values_equal(a: &Value, b: &Value) -> HookResult<bool> {
    if let (Some(x), Some(y)) = (float_of(a), float_of(b)) {
        if let (Some(i), Some(j)) = (int_of(a), int_of(b)) {
            return Ok(i == j);
        }
        return Ok(x == y);
    }
    Ok(match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(_) | Value::ByteArray(_), Value::Bytes(_) | Value::ByteArray(_)) => {
            bytes_like(a) == bytes_like(b)
        }
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            sequences_equal(&x.borrow(), &y.borrow())?
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequences_equal(x, y)?,
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                match y.get(&HashKey::from_value(k)?) {
                    Some(other) if crate::stack::guarded(|| values_equal(v, other))? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            let x = set_members(a).unwrap_or_default();
            let y = set_members(b).unwrap_or_default();
            x.len() == y.len() && x.is_subset(&y)
        }
        (Value::Range(x), Value::Range(y)) => {
            (x.is_empty() && y.is_empty())
                || (x.len() == y.len() && x.start == y.start && (x.len() == 1 || x.step == y.step))
        }
        _ => a.is_same(b),
    })
}

fn sequences_equal(a: &[Value], b: &[Value]) -> HookResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !crate::stack::guarded(|| values_equal(x, y))? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn unorderable(op: CompareOp, a: &Value, b: &Value) -> ScriptException {
    ScriptException::type_error(format!(
        "'{}' not supported between instances of '{}' and '{}'",
        op.symbol(),
        a.type_name(),
        b.type_name()
    ))
}

/// Total order used by `<`, `sorted`, `min` and `max`.
pub fn compare_order(a: &Value, b: &Value) -> HookResult<Ordering> {
    order_for(CompareOp::Lt, a, b)
}

fn order_for(op: CompareOp, a: &Value, b: &Value) -> HookResult<Ordering> {
    if let (Some(i), Some(j)) = (int_of(a), int_of(b)) {
        return Ok(i.cmp(&j));
    }
    if let (Some(x), Some(y)) = (float_of(a), float_of(b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| ScriptException::value_error("cannot order NaN"));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Bytes(_) | Value::ByteArray(_), Value::Bytes(_) | Value::ByteArray(_)) => {
            Ok(bytes_like(a).cmp(&bytes_like(b)))
        }
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            sequence_order(op, &x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequence_order(op, x, y),
        _ => Err(unorderable(op, a, b)),
    }
}

fn sequence_order(op: CompareOp, a: &[Value], b: &[Value]) -> HookResult<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !values_equal(x, y)? {
            return crate::stack::guarded(|| order_for(op, x, y));
        }
    }
    Ok(a.len().cmp(&b.len()))
}

fn reflect(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::LtE => CompareOp::GtE,
        CompareOp::GtE => CompareOp::LtE,
        other => other,
    }
}

fn set_compare(op: CompareOp, a: &SetTable, b: &SetTable) -> bool {
    match op {
        CompareOp::LtE => a.is_subset(b),
        CompareOp::Lt => a.len() < b.len() && a.is_subset(b),
        CompareOp::GtE => b.is_subset(a),
        _ => b.len() < a.len() && b.is_subset(a),
    }
}

/// One link of a comparison chain.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Exec<bool> {
    match op {
        CompareOp::Is => return Ok(left.is_same(right)),
        CompareOp::IsNot => return Ok(!left.is_same(right)),
        CompareOp::In => return contains(right, left),
        CompareOp::NotIn => return Ok(!contains(right, left)?),
        _ => {}
    }
    if let Value::Object(obj) = left {
        return Ok(granted(obj, Hook::CompareOp)?.compare(op, right)?);
    }
    if let Value::Object(obj) = right {
        return Ok(granted(obj, Hook::CompareOp)?.compare(reflect(op), left)?);
    }
    Ok(builtin_compare(op, left, right)?)
}

fn builtin_compare(op: CompareOp, left: &Value, right: &Value) -> HookResult<bool> {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::NotEq => Ok(!values_equal(left, right)?),
        _ => {
            if let (Some(a), Some(b)) = (set_members(left), set_members(right)) {
                return Ok(set_compare(op, &a, &b));
            }
            if let (Some(x), Some(y)) = (float_of(left), float_of(right)) {
                if x.is_nan() || y.is_nan() {
                    return Ok(false);
                }
            }
            let ordering = order_for(op, left, right)?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtE => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

/// `item in container`. Members of safe containers match by equality, and
/// host objects inside them only by identity.
pub fn contains(container: &Value, item: &Value) -> Exec<bool> {
    if let Value::Object(obj) = container {
        return Ok(granted(obj, Hook::CompareOp)?.compare(CompareOp::In, item)?);
    }
    Ok(builtin_contains(container, item)?)
}

fn builtin_contains(container: &Value, item: &Value) -> HookResult<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptException::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Bytes(_) | Value::ByteArray(_) => {
            let haystack = bytes_like(container).unwrap_or_default();
            match item {
                v if int_of(v).is_some() => {
                    let byte = int_of(v).unwrap_or(-1);
                    Ok(haystack.iter().any(|&b| i64::from(b) == byte))
                }
                other => {
                    let needle = bytes_like(other).ok_or_else(|| {
                        ScriptException::type_error(
                            "a bytes-like object is required",
                        )
                    })?;
                    Ok(needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle))
                }
            }
        }
        Value::List(items) => {
            let items = items.borrow().clone();
            any_equal(&items, item)
        }
        Value::Tuple(items) => any_equal(items, item),
        Value::Dict(dict) => Ok(dict.borrow().contains(&HashKey::from_value(item)?)),
        Value::Set(set) => set.borrow().contains_value(item),
        Value::FrozenSet(set) => set.contains_value(item),
        Value::Range(range) => match item {
            v if int_of(v).is_some() => Ok(range.contains(int_of(v).unwrap_or(0))),
            Value::Float(f) if f.fract() == 0.0 => Ok(range.contains(*f as i64)),
            _ => Ok(false),
        },
        Value::Iterator(iter) => {
            while let Some(next) = iter.borrow_mut().next_value()? {
                if values_equal(&next, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(ScriptException::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn any_equal(items: &[Value], item: &Value) -> HookResult<bool> {
    for candidate in items {
        if item.is_same(candidate) || values_equal(candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Integer index for sequence access.
pub fn to_index(value: &Value, container: &str) -> HookResult<i64> {
    int_of(value).ok_or_else(|| {
        ScriptException::type_error(format!(
            "{container} indices must be integers or slices, not {}",
            value.type_name()
        ))
    })
}

/// Resolve a possibly-negative index against `len`.
pub fn normalize_index(index: i64, len: usize, container: &str) -> HookResult<usize> {
    let len_i = len as i64;
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(ScriptException::index_error(format!(
            "{container} index out of range"
        )));
    }
    Ok(resolved as usize)
}

fn select<T: Clone>(items: &[T], index: &Value, container: &str) -> HookResult<Selection<T>> {
    match index {
        Value::Slice(slice) => Ok(Selection::Many(
            slice
                .indices(items.len())?
                .into_iter()
                .map(|i| items[i].clone())
                .collect(),
        )),
        other => {
            let i = normalize_index(to_index(other, container)?, items.len(), container)?;
            Ok(Selection::One(items[i].clone()))
        }
    }
}

enum Selection<T> {
    One(T),
    Many(Vec<T>),
}

/// `obj[index]` on a safe value.
pub fn get_item(obj: &Value, index: &Value) -> HookResult<Value> {
    match obj {
        Value::List(items) => Ok(match select(&items.borrow(), index, "list")? {
            Selection::One(v) => v,
            Selection::Many(vs) => Value::list(vs),
        }),
        Value::Tuple(items) => Ok(match select(items, index, "tuple")? {
            Selection::One(v) => v,
            Selection::Many(vs) => Value::tuple(vs),
        }),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(match select(&chars, index, "string")? {
                Selection::One(c) => Value::from(c.to_string()),
                Selection::Many(cs) => Value::from(cs.into_iter().collect::<String>()),
            })
        }
        Value::Bytes(b) => Ok(match select(b, index, "bytes")? {
            Selection::One(byte) => Value::Int(i64::from(byte)),
            Selection::Many(bs) => Value::bytes(&bs),
        }),
        Value::ByteArray(b) => Ok(match select(&b.borrow(), index, "bytearray")? {
            Selection::One(byte) => Value::Int(i64::from(byte)),
            Selection::Many(bs) => Value::ByteArray(Rc::new(RefCell::new(bs))),
        }),
        Value::Range(range) => match index {
            Value::Slice(slice) => {
                let picked: Vec<Value> = slice
                    .indices(range.len())?
                    .into_iter()
                    .filter_map(|i| range.get(i).map(Value::Int))
                    .collect();
                Ok(Value::list(picked))
            }
            other => {
                let i = normalize_index(to_index(other, "range")?, range.len(), "range object")?;
                range.get(i).map(Value::Int).ok_or_else(overflow)
            }
        },
        Value::Dict(dict) => {
            let hash = HashKey::from_value(index)?;
            dict.borrow()
                .get(&hash)
                .cloned()
                .ok_or_else(|| ScriptException::key_error(repr(index)))
        }
        other => Err(ScriptException::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn byte_of(value: &Value) -> HookResult<u8> {
    let i = int_of(value).ok_or_else(|| {
        ScriptException::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })?;
    u8::try_from(i).map_err(|_| ScriptException::value_error("byte must be in range(0, 256)"))
}

fn assign_slice<T: Clone>(
    items: &mut Vec<T>,
    slice: &SliceValue,
    replacement: Vec<T>,
) -> HookResult<()> {
    let step = slice.step.unwrap_or(1);
    let indices = slice.indices(items.len())?;
    if step == 1 {
        let start = indices.first().copied().unwrap_or_else(|| {
            let len = items.len() as i64;
            let s = slice.start.unwrap_or(0);
            let s = if s < 0 { (s + len).max(0) } else { s.min(len) };
            s as usize
        });
        let end = start + indices.len();
        items.splice(start..end, replacement);
        return Ok(());
    }
    if indices.len() != replacement.len() {
        return Err(ScriptException::value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            indices.len()
        )));
    }
    for (i, value) in indices.into_iter().zip(replacement) {
        items[i] = value;
    }
    Ok(())
}

/// `obj[index] = value` on a safe value.
pub fn set_item(obj: &Value, index: Value, value: Value) -> HookResult<()> {
    match obj {
        Value::List(items) => {
            if let Value::Slice(slice) = &index {
                let replacement = collect(&value)?;
                return assign_slice(&mut items.borrow_mut(), slice, replacement);
            }
            let mut items = items.borrow_mut();
            let i = normalize_index(to_index(&index, "list")?, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        Value::ByteArray(bytes) => {
            if let Value::Slice(slice) = &index {
                let replacement = collect(&value)?
                    .iter()
                    .map(byte_of)
                    .collect::<HookResult<Vec<u8>>>()?;
                return assign_slice(&mut bytes.borrow_mut(), slice, replacement);
            }
            let byte = byte_of(&value)?;
            let mut bytes = bytes.borrow_mut();
            let i = normalize_index(
                to_index(&index, "bytearray")?,
                bytes.len(),
                "bytearray",
            )?;
            bytes[i] = byte;
            Ok(())
        }
        Value::Dict(dict) => {
            let hash = HashKey::from_value(&index)?;
            dict.borrow_mut().insert(hash, index, value);
            Ok(())
        }
        other => Err(ScriptException::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn delete_selected<T>(items: &mut Vec<T>, index: &Value, container: &str) -> HookResult<()> {
    if let Value::Slice(slice) = index {
        let mut doomed = slice.indices(items.len())?;
        doomed.sort_unstable();
        for i in doomed.into_iter().rev() {
            items.remove(i);
        }
        return Ok(());
    }
    let i = normalize_index(to_index(index, container)?, items.len(), container)?;
    items.remove(i);
    Ok(())
}

/// `del obj[index]` on a safe value.
pub fn del_item(obj: &Value, index: &Value) -> HookResult<()> {
    match obj {
        Value::List(items) => delete_selected(&mut items.borrow_mut(), index, "list assignment"),
        Value::ByteArray(bytes) => delete_selected(&mut bytes.borrow_mut(), index, "bytearray"),
        Value::Dict(dict) => {
            let hash = HashKey::from_value(index)?;
            dict.borrow_mut()
                .remove(&hash)
                .map(|_| ())
                .ok_or_else(|| ScriptException::key_error(repr(index)))
        }
        other => Err(ScriptException::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

/// `iter(value)`.
pub fn iterate(value: &Value) -> HookResult<Rc<RefCell<ScriptIter>>> {
    let state = match value {
        Value::Iterator(iter) => return Ok(iter.clone()),
        Value::Range(range) => ScriptIter::range(*range),
        Value::List(items) => ScriptIter::items(items.borrow().clone()),
        Value::Tuple(items) => ScriptIter::items(items.to_vec()),
        Value::Str(s) => {
            ScriptIter::items(s.chars().map(|c| Value::from(c.to_string())).collect())
        }
        Value::Bytes(_) | Value::ByteArray(_) => ScriptIter::items(
            bytes_like(value)
                .unwrap_or_default()
                .into_iter()
                .map(|b| Value::Int(i64::from(b)))
                .collect(),
        ),
        Value::Dict(dict) => ScriptIter::items(dict.borrow().key_values()),
        Value::Set(set) => ScriptIter::items(set.borrow().key_values()),
        Value::FrozenSet(set) => ScriptIter::items(set.key_values()),
        other => {
            return Err(ScriptException::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )))
        }
    };
    Ok(Rc::new(RefCell::new(state)))
}

/// Drain an iterable into a vector.
pub fn collect(value: &Value) -> HookResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.to_vec()),
        other => {
            let iter = iterate(other)?;
            let mut out = Vec::new();
            while let Some(item) = iter.borrow_mut().next_value()? {
                out.push(item);
            }
            Ok(out)
        }
    }
}

/// `len(value)`.
pub fn length(value: &Value) -> HookResult<usize> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::ByteArray(b) => b.borrow().len(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Set(set) => set.borrow().len(),
        Value::FrozenSet(set) => set.len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(ScriptException::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_int_arithmetic_follows_floor_semantics() {
        assert!(matches!(binary(BinaryOp::FloorDiv, &int(-7), &int(2)), Ok(Value::Int(-4))));
        assert!(matches!(binary(BinaryOp::Mod, &int(-7), &int(2)), Ok(Value::Int(1))));
        assert!(matches!(binary(BinaryOp::Mod, &int(7), &int(-2)), Ok(Value::Int(-1))));
        assert!(matches!(binary(BinaryOp::Div, &int(7), &int(2)), Ok(Value::Float(f)) if f == 3.5));
    }

    #[test]
    fn test_overflow_raises() {
        let err = binary(BinaryOp::Mult, &int(i64::MAX), &int(2)).unwrap_err();
        assert!(err.is_raise_of(ExceptionKind::OverflowError));
        let err = binary(BinaryOp::LShift, &int(1), &int(70)).unwrap_err();
        assert!(err.is_raise_of(ExceptionKind::OverflowError));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinaryOp::Div, &int(1), &int(0)).unwrap_err();
        assert!(err.is_raise_of(ExceptionKind::ZeroDivisionError));
    }

    #[test]
    fn test_sequence_concat_and_repeat() {
        let s = binary(BinaryOp::Mult, &Value::str("ab"), &int(3)).unwrap();
        assert_eq!(s.to_string(), "ababab");
        let l = binary(
            BinaryOp::Add,
            &Value::list(vec![int(1)]),
            &Value::list(vec![int(2)]),
        )
        .unwrap();
        assert_eq!(l.to_string(), "[1, 2]");
    }

    #[test]
    fn test_matmul_unsupported_on_numbers() {
        let err = binary(BinaryOp::MatMult, &int(1), &int(2)).unwrap_err();
        assert!(err.is_raise_of(ExceptionKind::TypeError));
    }

    #[test]
    fn test_compare_mixed_numbers_and_sequences() {
        assert!(compare(CompareOp::Eq, &int(1), &Value::Float(1.0)).unwrap());
        assert!(compare(CompareOp::Lt, &Value::str("a"), &Value::str("b")).unwrap());
        let a = Value::tuple(vec![int(1), int(2)]);
        let b = Value::tuple(vec![int(1), int(3)]);
        assert!(compare(CompareOp::Lt, &a, &b).unwrap());
        assert!(compare(CompareOp::Lt, &int(1), &Value::str("a")).is_err());
    }

    #[derive(Debug)]
    struct Bare;

    impl CapabilityObject for Bare {
        fn type_name(&self) -> &str {
            "Bare"
        }
    }

    fn denied_op<T: std::fmt::Debug>(result: Exec<T>) -> crate::guard::GuardOp {
        match result {
            Err(crate::runtime::exception::Unwind::Denied {
                violation: GuardViolation::Denied { operation, .. },
                ..
            }) => operation,
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn test_host_operands_need_the_matching_hook() {
        use crate::guard::GuardOp;
        let bare = Value::Object(Rc::new(Bare));
        assert_eq!(denied_op(binary(BinaryOp::Add, &int(1), &bare)), GuardOp::BinaryOp);
        assert_eq!(denied_op(binary(BinaryOp::Pow, &bare, &int(2))), GuardOp::BinaryOp);
        assert_eq!(denied_op(unary(UnaryOp::USub, &bare)), GuardOp::UnaryOp);
        assert_eq!(denied_op(compare(CompareOp::Lt, &int(1), &bare)), GuardOp::CompareOp);
        assert_eq!(denied_op(contains(&bare, &int(1))), GuardOp::CompareOp);
        assert!(!contains(&Value::list(vec![bare.clone()]), &int(1)).unwrap());
        assert!(compare(CompareOp::Is, &bare, &bare).unwrap());
    }

    #[test]
    fn test_contains() {
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::list(vec![int(1), int(2)]), &Value::Float(2.0)).unwrap());
        assert!(contains(&Value::str("x"), &int(1)).is_err());
    }

    #[test]
    fn test_item_access_and_slices() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        assert!(matches!(get_item(&list, &int(-1)), Ok(Value::Int(3))));
        let slice = Value::Slice(SliceValue {
            start: Some(1),
            stop: None,
            step: None,
        });
        assert_eq!(get_item(&list, &slice).unwrap().to_string(), "[2, 3]");
        let err = get_item(&list, &int(5)).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IndexError);
    }

    #[test]
    fn test_slice_assignment_and_delete() {
        let list = Value::list(vec![int(1), int(2), int(3), int(4)]);
        let slice = Value::Slice(SliceValue {
            start: Some(1),
            stop: Some(3),
            step: None,
        });
        set_item(&list, slice.clone(), Value::list(vec![int(9)])).unwrap();
        assert_eq!(list.to_string(), "[1, 9, 4]");
        del_item(&list, &int(0)).unwrap();
        assert_eq!(list.to_string(), "[9, 4]");
    }

    #[test]
    fn test_dict_missing_key() {
        let dict = Value::dict(Dict::new());
        let err = get_item(&dict, &Value::str("k")).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::KeyError);
        assert_eq!(err.message, "'k'");
    }
}
