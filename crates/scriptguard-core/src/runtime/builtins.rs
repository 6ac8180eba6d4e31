//! The restricted built-in functions and the guard hooks.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::args::{float_arg, int_arg, str_arg, Args};
use super::exception::{ExceptionKind, Exec, ScriptException};
use super::format::{repr, to_str};
use super::interpreter::Interpreter;
use super::methods;
use super::modules::{self, float_to_int, MathFn, RandomFn};
use super::ops;
use super::table::{Dict, HashKey, SetTable};
use super::value::{RangeValue, ScriptIter, SliceValue, Value};
use crate::guard::capability::{Hook, HookResult};
use crate::guard::error::{GuardOp, GuardViolation};
use crate::guard::safe_types::TypeTag;
use crate::policy::guarded::{OperandCheck, WriteOp};
use crate::syntax::ast::BinaryOp;

/// Guard hooks registered in the namespace under their reserved names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardHook {
    GetAttr,
    GetItem,
    Write,
    CheckAssignName,
    CheckUnary,
    CheckBinary,
    CheckBool,
    CheckCompare,
}

impl GuardHook {
    pub const ALL: &'static [GuardHook] = &[
        GuardHook::GetAttr,
        GuardHook::GetItem,
        GuardHook::Write,
        GuardHook::CheckAssignName,
        GuardHook::CheckUnary,
        GuardHook::CheckBinary,
        GuardHook::CheckBool,
        GuardHook::CheckCompare,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GuardHook::GetAttr => "_getattr_",
            GuardHook::GetItem => "_getitem_",
            GuardHook::Write => "_write_",
            GuardHook::CheckAssignName => "_check_assign_name_",
            GuardHook::CheckUnary => "_check_unary_op_allowed_",
            GuardHook::CheckBinary => "_check_binary_op_allowed_",
            GuardHook::CheckBool => "_check_bool_op_allowed_",
            GuardHook::CheckCompare => "_check_compare_allowed_",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Abs,
    All,
    Any,
    Bool,
    ByteArray,
    Bytes,
    Callable,
    Chr,
    Delattr,
    Dict,
    Divmod,
    Enumerate,
    Float,
    FrozenSet,
    Getattr,
    Hasattr,
    Hash,
    Hex,
    Int,
    Isinstance,
    Issubclass,
    Iter,
    Len,
    List,
    Max,
    Min,
    Next,
    Oct,
    Ord,
    Pow,
    Print,
    Range,
    Repr,
    Reversed,
    Round,
    Set,
    Setattr,
    Slice,
    Sorted,
    Str,
    Sum,
    Tuple,
    Zip,
    Guard(GuardHook),
    Math(MathFn),
    Random(RandomFn),
    Capwords,
}

impl Builtin {
    /// Every built-in that can be listed in the namespace allow-list.
    pub const PUBLIC: &'static [Builtin] = &[
        Builtin::Abs,
        Builtin::All,
        Builtin::Any,
        Builtin::Bool,
        Builtin::ByteArray,
        Builtin::Bytes,
        Builtin::Callable,
        Builtin::Chr,
        Builtin::Delattr,
        Builtin::Dict,
        Builtin::Divmod,
        Builtin::Enumerate,
        Builtin::Float,
        Builtin::FrozenSet,
        Builtin::Getattr,
        Builtin::Hasattr,
        Builtin::Hash,
        Builtin::Hex,
        Builtin::Int,
        Builtin::Isinstance,
        Builtin::Issubclass,
        Builtin::Iter,
        Builtin::Len,
        Builtin::List,
        Builtin::Max,
        Builtin::Min,
        Builtin::Next,
        Builtin::Oct,
        Builtin::Ord,
        Builtin::Pow,
        Builtin::Print,
        Builtin::Range,
        Builtin::Repr,
        Builtin::Reversed,
        Builtin::Round,
        Builtin::Set,
        Builtin::Setattr,
        Builtin::Slice,
        Builtin::Sorted,
        Builtin::Str,
        Builtin::Sum,
        Builtin::Tuple,
        Builtin::Zip,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::All => "all",
            Builtin::Any => "any",
            Builtin::Bool => "bool",
            Builtin::ByteArray => "bytearray",
            Builtin::Bytes => "bytes",
            Builtin::Callable => "callable",
            Builtin::Chr => "chr",
            Builtin::Delattr => "delattr",
            Builtin::Dict => "dict",
            Builtin::Divmod => "divmod",
            Builtin::Enumerate => "enumerate",
            Builtin::Float => "float",
            Builtin::FrozenSet => "frozenset",
            Builtin::Getattr => "getattr",
            Builtin::Hasattr => "hasattr",
            Builtin::Hash => "hash",
            Builtin::Hex => "hex",
            Builtin::Int => "int",
            Builtin::Isinstance => "isinstance",
            Builtin::Issubclass => "issubclass",
            Builtin::Iter => "iter",
            Builtin::Len => "len",
            Builtin::List => "list",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Next => "next",
            Builtin::Oct => "oct",
            Builtin::Ord => "ord",
            Builtin::Pow => "pow",
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Repr => "repr",
            Builtin::Reversed => "reversed",
            Builtin::Round => "round",
            Builtin::Set => "set",
            Builtin::Setattr => "setattr",
            Builtin::Slice => "slice",
            Builtin::Sorted => "sorted",
            Builtin::Str => "str",
            Builtin::Sum => "sum",
            Builtin::Tuple => "tuple",
            Builtin::Zip => "zip",
            Builtin::Guard(hook) => hook.name(),
            Builtin::Math(f) => f.name(),
            Builtin::Random(f) => f.name(),
            Builtin::Capwords => "capwords",
        }
    }

    /// Look up a public built-in by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PUBLIC.iter().copied().find(|b| b.name() == name)
    }

    /// The type a constructor built-in stands for in `isinstance`.
    pub fn as_type(self) -> Option<TypeTag> {
        Some(match self {
            Builtin::Bool => TypeTag::Bool,
            Builtin::Int => TypeTag::Int,
            Builtin::Float => TypeTag::Float,
            Builtin::Str => TypeTag::Str,
            Builtin::Bytes => TypeTag::Bytes,
            Builtin::ByteArray => TypeTag::Bytearray,
            Builtin::List => TypeTag::List,
            Builtin::Tuple => TypeTag::Tuple,
            Builtin::Dict => TypeTag::Dict,
            Builtin::Set => TypeTag::Set,
            Builtin::FrozenSet => TypeTag::Frozenset,
            Builtin::Range => TypeTag::Range,
            Builtin::Slice => TypeTag::Slice,
            _ => return None,
        })
    }
}

fn name_arg(value: &Value, what: &str) -> HookResult<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(ScriptException::type_error(format!(
            "{what}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

/// Call a built-in.
pub fn call(
    interp: &mut Interpreter,
    builtin: Builtin,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Exec<Value> {
    let mut args = Args::new(builtin.name(), positional, keywords);
    match builtin {
        Builtin::Print => {
            let sep = optional_text(args.take(usize::MAX, "sep")?, " ")?;
            let end = optional_text(args.take(usize::MAX, "end")?, "\n")?;
            args.finish()?;
            let parts: Vec<String> = args.into_positional().iter().map(to_str).collect();
            interp.output_mut().print(&parts, &sep, &end);
            Ok(Value::None)
        }
        Builtin::Getattr => {
            args.arity(2, 3)?;
            args.finish()?;
            let mut positional = args.into_positional().into_iter();
            let (obj, name) = (next_arg(&mut positional), next_arg(&mut positional));
            let name = name_arg(&name, "getattr")?;
            match positional.next() {
                Some(default) => interp.guards().get_attr_or(&obj, &name, default),
                None => interp.guards().get_attr(&obj, &name),
            }
        }
        Builtin::Hasattr => {
            args.arity(2, 2)?;
            args.finish()?;
            let obj = args.get(0).cloned().unwrap_or(Value::None);
            let name = name_arg(args.get(1).unwrap_or(&Value::None), "hasattr")?;
            Ok(Value::Bool(interp.guards().has_attr(&obj, &name)?))
        }
        Builtin::Setattr => {
            args.arity(3, 3)?;
            args.finish()?;
            let mut positional = args.into_positional().into_iter();
            let obj = next_arg(&mut positional);
            let name = name_arg(&next_arg(&mut positional), "setattr")?;
            let value = next_arg(&mut positional);
            let obj = interp.guards().write(obj, WriteOp::SetAttr)?;
            interp.guards().set_attr(&obj, &name, value)?;
            Ok(Value::None)
        }
        Builtin::Delattr => {
            args.arity(2, 2)?;
            args.finish()?;
            let mut positional = args.into_positional().into_iter();
            let obj = next_arg(&mut positional);
            let name = name_arg(&next_arg(&mut positional), "delattr")?;
            let obj = interp.guards().write(obj, WriteOp::DelAttr)?;
            interp.guards().del_attr(&obj, &name)?;
            Ok(Value::None)
        }
        Builtin::Sorted => {
            args.arity(1, 1)?;
            let key = args.take(usize::MAX, "key")?;
            let reverse = match args.take(usize::MAX, "reverse")? {
                Some(flag) => flag.truthy()?,
                None => false,
            };
            args.finish()?;
            let items = ops::collect(args.get(0).unwrap_or(&Value::None))?;
            Ok(Value::list(methods::sort_values(
                interp,
                items,
                key.as_ref(),
                reverse,
            )?))
        }
        Builtin::Max | Builtin::Min => extremum(interp, builtin, args),
        Builtin::Pow => power(args),
        Builtin::Sum => sum(args),
        Builtin::Guard(hook) => guard_hook(interp, hook, args),
        Builtin::Math(f) => Ok(modules::call_math(f, args)?),
        Builtin::Random(f) => Ok(modules::call_random(f, interp.rng_mut(), args)?),
        Builtin::Capwords => Ok(modules::capwords(args)?),
        other => Ok(call_pure(other, args)?),
    }
}

fn next_arg(args: &mut impl Iterator<Item = Value>) -> Value {
    args.next().unwrap_or(Value::None)
}

fn optional_text(value: Option<Value>, default: &str) -> HookResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ScriptException::type_error(format!(
            "sep and end must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

fn guard_hook(interp: &mut Interpreter, hook: GuardHook, args: Args) -> Exec<Value> {
    args.finish()?;
    let what = hook.name();
    let positional = args.into_positional();
    let first = positional.first().cloned().unwrap_or(Value::None);
    let guards = interp.guards();
    match hook {
        GuardHook::GetAttr => {
            let name = name_arg(positional.get(1).unwrap_or(&Value::None), what)?;
            match positional.get(2) {
                Some(default) => guards.get_attr_or(&first, &name, default.clone()),
                None => guards.get_attr(&first, &name),
            }
        }
        GuardHook::GetItem => {
            let index = positional.get(1).cloned().unwrap_or(Value::None);
            guards.get_item(&first, &index)
        }
        GuardHook::Write => {
            if guards.is_safe(&first) {
                return Ok(first);
            }
            let writable = match &first {
                Value::Object(obj) => {
                    let hooks = obj.hooks();
                    [Hook::SetAttr, Hook::DelAttr, Hook::SetItem, Hook::DelItem]
                        .into_iter()
                        .any(|h| hooks.contains(h))
                }
                _ => false,
            };
            if writable {
                Ok(first)
            } else {
                Err(GuardViolation::denied(GuardOp::SetAttr, first.type_name()).into())
            }
        }
        GuardHook::CheckAssignName => {
            let name = str_arg(&first, what)?;
            interp.name_guard().check(name)?;
            Ok(first)
        }
        GuardHook::CheckUnary => guards.check_operand(OperandCheck::Unary, first),
        GuardHook::CheckBinary => guards.check_operand(OperandCheck::Binary, first),
        GuardHook::CheckBool => guards.check_operand(OperandCheck::Bool, first),
        GuardHook::CheckCompare => guards.check_operand(OperandCheck::Compare, first),
    }
}

fn extremum(interp: &mut Interpreter, builtin: Builtin, mut args: Args) -> Exec<Value> {
    let key = args.take(usize::MAX, "key")?;
    let default = args.take(usize::MAX, "default")?;
    args.finish()?;
    let name = builtin.name();
    let candidates = match args.len() {
        0 => {
            return Err(ScriptException::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            ))
            .into())
        }
        1 => ops::collect(args.get(0).unwrap_or(&Value::None))?,
        _ => {
            if default.is_some() {
                return Err(ScriptException::type_error(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                ))
                .into());
            }
            args.into_positional()
        }
    };
    if candidates.is_empty() {
        return default.ok_or_else(|| {
            ScriptException::value_error(format!("{name}() arg is an empty sequence")).into()
        });
    }
    let mut best: Option<(Value, Value)> = None;
    for candidate in candidates {
        let rank = match &key {
            Some(key) if !key.is_none() => interp.call_value(key, vec![candidate.clone()], Vec::new())?,
            _ => candidate.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => {
                let ordering = ops::compare_order(&rank, best_rank)?;
                if builtin == Builtin::Max {
                    ordering == std::cmp::Ordering::Greater
                } else {
                    ordering == std::cmp::Ordering::Less
                }
            }
        };
        if replace {
            best = Some((rank, candidate));
        }
    }
    Ok(best.map(|(_, value)| value).unwrap_or(Value::None))
}

/// `pow()`. Without a modulus it is the `**` operator, hooks included.
fn power(args: Args) -> Exec<Value> {
    args.arity(2, 3)?;
    args.finish()?;
    let base = args.get(0).cloned().unwrap_or(Value::None);
    let exp = args.get(1).cloned().unwrap_or(Value::None);
    match args.get(2) {
        None | Some(Value::None) => ops::binary(BinaryOp::Pow, &base, &exp),
        Some(modulus) => Ok(Value::Int(mod_pow(
            int_arg(&base, "pow")?,
            int_arg(&exp, "pow")?,
            int_arg(modulus, "pow")?,
        )?)),
    }
}

fn sum(mut args: Args) -> Exec<Value> {
    args.arity(1, 2)?;
    let iterable = args.required(0, "iterable")?;
    let start = args.take(1, "start")?.unwrap_or(Value::Int(0));
    args.finish()?;
    if matches!(start, Value::Str(_)) {
        return Err(ScriptException::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        )
        .into());
    }
    let mut total = start;
    let iter = ops::iterate(&iterable)?;
    loop {
        let next = iter.borrow_mut().next_value()?;
        let Some(item) = next else {
            return Ok(total);
        };
        total = ops::binary(BinaryOp::Add, &total, &item)?;
    }
}

/// Built-ins that need nothing from the interpreter.
fn call_pure(builtin: Builtin, mut args: Args) -> HookResult<Value> {
    let what = builtin.name();
    let value = match builtin {
        Builtin::Abs => {
            args.arity(1, 1)?;
            match args.get(0).unwrap_or(&Value::None) {
                Value::Float(f) => Value::Float(f.abs()),
                other => Value::Int(
                    int_arg(other, what)?
                        .checked_abs()
                        .ok_or_else(ScriptException::overflow)?,
                ),
            }
        }
        Builtin::All | Builtin::Any => {
            args.arity(1, 1)?;
            let want = builtin == Builtin::Any;
            let iter = ops::iterate(args.get(0).unwrap_or(&Value::None))?;
            let mut answer = !want;
            while let Some(item) = iter.borrow_mut().next_value()? {
                if item.truthy()? == want {
                    answer = want;
                    break;
                }
            }
            Value::Bool(answer)
        }
        Builtin::Bool => {
            args.arity(0, 1)?;
            Value::Bool(match args.get(0) {
                Some(v) => v.truthy()?,
                None => false,
            })
        }
        Builtin::Bytes | Builtin::ByteArray => {
            args.arity(0, 2)?;
            let data = byte_source(args.get(0), args.get(1))?;
            if builtin == Builtin::Bytes {
                Value::bytes(&data)
            } else {
                Value::ByteArray(Rc::new(RefCell::new(data)))
            }
        }
        Builtin::Callable => {
            args.arity(1, 1)?;
            Value::Bool(matches!(
                args.get(0),
                Some(
                    Value::Function(_)
                        | Value::Builtin(_)
                        | Value::BoundMethod(_)
                        | Value::Native(_)
                        | Value::ExceptionType(_)
                )
            ))
        }
        Builtin::Chr => {
            args.arity(1, 1)?;
            let code = int_arg(args.get(0).unwrap_or(&Value::None), what)?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ScriptException::value_error("chr() arg not in range(0x110000)"))?;
            Value::from(c.to_string())
        }
        Builtin::Dict => {
            args.arity(0, 1)?;
            let mut dict = Dict::new();
            if let Some(source) = args.get(0) {
                methods::dict_update(&mut dict, source)?;
            }
            for (k, v) in args.take_keywords() {
                dict.insert(HashKey::Str(Rc::from(k.as_str())), Value::from(k), v);
            }
            Value::dict(dict)
        }
        Builtin::Divmod => {
            args.arity(2, 2)?;
            let (a, b) = (
                args.get(0).cloned().unwrap_or(Value::None),
                args.get(1).cloned().unwrap_or(Value::None),
            );
            match (&a, &b) {
                (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                    let (q, r) = ops::int_divmod(int_arg(&a, what)?, int_arg(&b, what)?)?;
                    Value::tuple(vec![Value::Int(q), Value::Int(r)])
                }
                _ => {
                    let (q, r) = ops::float_divmod(float_arg(&a, what)?, float_arg(&b, what)?)?;
                    Value::tuple(vec![Value::Float(q), Value::Float(r)])
                }
            }
        }
        Builtin::Enumerate => {
            args.arity(1, 2)?;
            let iterable = args.required(0, "iterable")?;
            let start = match args.take(1, "start")? {
                Some(v) => int_arg(&v, what)?,
                None => 0,
            };
            args.finish()?;
            return Ok(Value::iterator(ScriptIter::Enumerate {
                inner: ops::iterate(&iterable)?,
                count: start,
            }));
        }
        Builtin::Float => {
            args.arity(0, 1)?;
            match args.get(0) {
                None => Value::Float(0.0),
                Some(Value::Str(s)) => Value::Float(parse_float(s)?),
                Some(other) => Value::Float(float_arg(other, what)?),
            }
        }
        Builtin::Int => {
            args.arity(0, 2)?;
            let base = match args.take(1, "base")? {
                Some(v) => Some(int_arg(&v, what)?),
                None => None,
            };
            match (args.get(0), base) {
                (None, _) => Value::Int(0),
                (Some(Value::Str(s)), base) => Value::Int(parse_int(s, base.unwrap_or(10))?),
                (Some(_), Some(_)) => {
                    return Err(ScriptException::type_error(
                        "int() can't convert non-string with explicit base",
                    ))
                }
                (Some(Value::Float(f)), None) => Value::Int(float_to_int(*f)?),
                (Some(other), None) => Value::Int(int_arg(other, what)?),
            }
        }
        Builtin::List | Builtin::Tuple | Builtin::Set | Builtin::FrozenSet => {
            args.arity(0, 1)?;
            let items = match args.get(0) {
                Some(source) => ops::collect(source)?,
                None => Vec::new(),
            };
            match builtin {
                Builtin::List => Value::list(items),
                Builtin::Tuple => Value::tuple(items),
                Builtin::Set => Value::set(SetTable::from_values(items)?),
                _ => Value::FrozenSet(Rc::new(SetTable::from_values(items)?)),
            }
        }
        Builtin::Hash => {
            args.arity(1, 1)?;
            let key = HashKey::from_value(args.get(0).unwrap_or(&Value::None))?;
            match key {
                HashKey::Int(i) => Value::Int(i),
                other => {
                    let mut hasher = DefaultHasher::new();
                    other.hash(&mut hasher);
                    Value::Int(hasher.finish() as i64)
                }
            }
        }
        Builtin::Hex | Builtin::Oct => {
            args.arity(1, 1)?;
            let i = int_arg(args.get(0).unwrap_or(&Value::None), what)?;
            let sign = if i < 0 { "-" } else { "" };
            let magnitude = i.unsigned_abs();
            Value::from(if builtin == Builtin::Hex {
                format!("{sign}0x{magnitude:x}")
            } else {
                format!("{sign}0o{magnitude:o}")
            })
        }
        Builtin::Isinstance => {
            args.arity(2, 2)?;
            let obj = args.get(0).unwrap_or(&Value::None);
            Value::Bool(is_instance(obj, args.get(1).unwrap_or(&Value::None))?)
        }
        Builtin::Issubclass => {
            args.arity(2, 2)?;
            let cls = args.get(0).unwrap_or(&Value::None);
            Value::Bool(is_subclass(cls, args.get(1).unwrap_or(&Value::None))?)
        }
        Builtin::Iter => {
            args.arity(1, 1)?;
            Value::Iterator(ops::iterate(args.get(0).unwrap_or(&Value::None))?)
        }
        Builtin::Len => {
            args.arity(1, 1)?;
            Value::Int(ops::length(args.get(0).unwrap_or(&Value::None))? as i64)
        }
        Builtin::Next => {
            args.arity(1, 2)?;
            let Some(Value::Iterator(iter)) = args.get(0) else {
                return Err(ScriptException::type_error(format!(
                    "'{}' object is not an iterator",
                    args.get(0).map(Value::type_name).unwrap_or_default()
                )));
            };
            let next = iter.borrow_mut().next_value()?;
            match (next, args.get(1)) {
                (Some(v), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(ScriptException::new(ExceptionKind::StopIteration, "")),
            }
        }
        Builtin::Ord => {
            args.arity(1, 1)?;
            match args.get(0).unwrap_or(&Value::None) {
                Value::Str(s) => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Value::Int(i64::from(u32::from(c))),
                        _ => {
                            return Err(ScriptException::type_error(format!(
                                "ord() expected a character, but string of length {} found",
                                s.chars().count()
                            )))
                        }
                    }
                }
                Value::Bytes(b) if b.len() == 1 => Value::Int(i64::from(b[0])),
                other => {
                    return Err(ScriptException::type_error(format!(
                        "ord() expected string of length 1, but {} found",
                        other.type_name()
                    )))
                }
            }
        }
        Builtin::Range => {
            args.arity(1, 3)?;
            let ints = args
                .into_positional()
                .iter()
                .map(|v| int_arg(v, what))
                .collect::<HookResult<Vec<i64>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step, ..] => (*start, *stop, *step),
                [] => (0, 0, 1),
            };
            if step == 0 {
                return Err(ScriptException::value_error("range() arg 3 must not be zero"));
            }
            return Ok(Value::Range(RangeValue { start, stop, step }));
        }
        Builtin::Repr => {
            args.arity(1, 1)?;
            Value::from(repr(args.get(0).unwrap_or(&Value::None)))
        }
        Builtin::Reversed => {
            args.arity(1, 1)?;
            let seq = args.get(0).unwrap_or(&Value::None);
            if matches!(seq, Value::Iterator(_) | Value::Set(_) | Value::FrozenSet(_)) {
                return Err(ScriptException::type_error(format!(
                    "'{}' object is not reversible",
                    seq.type_name()
                )));
            }
            let mut items = ops::collect(seq)?;
            items.reverse();
            Value::iterator(ScriptIter::items(items))
        }
        Builtin::Round => {
            args.arity(1, 2)?;
            let number = args.required(0, "number")?;
            let ndigits = match args.take(1, "ndigits")? {
                None | Some(Value::None) => None,
                Some(v) => Some(int_arg(&v, what)?),
            };
            round(&number, ndigits)?
        }
        Builtin::Slice => {
            args.arity(1, 3)?;
            let bound = |v: Option<&Value>| -> HookResult<Option<i64>> {
                match v {
                    None | Some(Value::None) => Ok(None),
                    Some(v) => int_arg(v, what).map(Some),
                }
            };
            let (start, stop, step) = if args.len() == 1 {
                (None, bound(args.get(0))?, None)
            } else {
                (bound(args.get(0))?, bound(args.get(1))?, bound(args.get(2))?)
            };
            Value::Slice(SliceValue { start, stop, step })
        }
        Builtin::Str => {
            args.arity(0, 1)?;
            Value::from(args.get(0).map(to_str).unwrap_or_default())
        }
        Builtin::Zip => {
            let inners = args
                .into_positional()
                .iter()
                .map(ops::iterate)
                .collect::<HookResult<Vec<_>>>()?;
            return Ok(Value::iterator(ScriptIter::Zip { inners }));
        }
        other => {
            return Err(ScriptException::type_error(format!(
                "{}() cannot be called here",
                other.name()
            )))
        }
    };
    args.finish()?;
    Ok(value)
}

fn byte_source(source: Option<&Value>, encoding: Option<&Value>) -> HookResult<Vec<u8>> {
    match (source, encoding) {
        (None, _) => Ok(Vec::new()),
        (Some(Value::Str(s)), Some(encoding)) => {
            let encoding = str_arg(encoding, "encoding")?.to_ascii_lowercase();
            if encoding != "utf-8" && encoding != "utf8" {
                return Err(ScriptException::new(
                    ExceptionKind::LookupError,
                    format!("unknown encoding: {encoding}"),
                ));
            }
            Ok(s.as_bytes().to_vec())
        }
        (Some(Value::Str(_)), None) => Err(ScriptException::type_error(
            "string argument without an encoding",
        )),
        (Some(Value::Int(n)), _) => {
            let n = usize::try_from(*n).map_err(|_| ScriptException::value_error("negative count"))?;
            Ok(vec![0; n])
        }
        (Some(Value::Bytes(b)), _) => Ok(b.to_vec()),
        (Some(Value::ByteArray(b)), _) => Ok(b.borrow().clone()),
        (Some(other), _) => ops::collect(other)?
            .iter()
            .map(|v| {
                let i = int_arg(v, "bytes")?;
                u8::try_from(i)
                    .map_err(|_| ScriptException::value_error("bytes must be in range(0, 256)"))
            })
            .collect(),
    }
}

fn parse_float(text: &str) -> HookResult<f64> {
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let unsigned = lowered.trim_start_matches(['+', '-']);
    let special = match unsigned {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(value) = special {
        return Ok(if lowered.starts_with('-') { -value } else { value });
    }
    trimmed
        .replace('_', "")
        .parse::<f64>()
        .ok()
        .filter(|_| !trimmed.is_empty() && !trimmed.contains("__"))
        .ok_or_else(|| {
            ScriptException::value_error(format!(
                "could not convert string to float: {}",
                super::format::str_repr(text)
            ))
        })
}

fn parse_int(text: &str, base: i64) -> HookResult<i64> {
    let invalid = || {
        ScriptException::value_error(format!(
            "invalid literal for int() with base {base}: {}",
            super::format::str_repr(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(ScriptException::value_error(
            "int() base must be >= 2 and <= 36, or 0",
        ));
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (b, _) => (b as u32, lower.as_str()),
    };
    let body = body.strip_prefix('_').unwrap_or(body);
    if body.is_empty() || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned = body.replace('_', "");
    let signed = if negative {
        format!("-{cleaned}")
    } else {
        cleaned
    };
    i64::from_str_radix(&signed, radix).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
            ScriptException::overflow()
        }
        _ => invalid(),
    })
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> HookResult<i64> {
    if modulus == 0 {
        return Err(ScriptException::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(ScriptException::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut b = i128::from(base).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m);
        }
        b = (b * b).rem_euclid(m);
        e >>= 1;
    }
    // Sign follows the modulus.
    if modulus < 0 && result > 0 {
        result += m;
    }
    i64::try_from(result).map_err(|_| ScriptException::overflow())
}

fn round(number: &Value, ndigits: Option<i64>) -> HookResult<Value> {
    match (number, ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(int_arg(number, "round")?)),
        (Value::Int(_) | Value::Bool(_), Some(n)) if n >= 0 => {
            Ok(Value::Int(int_arg(number, "round")?))
        }
        (Value::Int(_) | Value::Bool(_), Some(n)) => {
            let i = int_arg(number, "round")?;
            let factor = u32::try_from(-n)
                .ok()
                .and_then(|p| 10_i64.checked_pow(p));
            let Some(factor) = factor else {
                return Ok(Value::Int(0));
            };
            let (q, r) = ops::int_divmod(i, factor)?;
            let twice = r * 2;
            let q = if twice > factor || (twice == factor && q % 2 != 0) {
                q + 1
            } else {
                q
            };
            q.checked_mul(factor)
                .map(Value::Int)
                .ok_or_else(ScriptException::overflow)
        }
        (Value::Float(f), None) => Ok(Value::Int(float_to_int(f.round_ties_even())?)),
        (Value::Float(f), Some(n)) => {
            if !f.is_finite() {
                return Ok(Value::Float(*f));
            }
            let n = n.clamp(-308, 308) as i32;
            let factor = 10_f64.powi(n.abs());
            let rounded = if n >= 0 {
                (f * factor).round_ties_even() / factor
            } else {
                (f / factor).round_ties_even() * factor
            };
            Ok(Value::Float(if rounded.is_finite() { rounded } else { *f }))
        }
        (other, _) => Err(ScriptException::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn class_matches(value: &Value, class: &Value) -> HookResult<bool> {
    match class {
        Value::Builtin(b) => match b.as_type() {
            Some(TypeTag::Int) => Ok(matches!(value, Value::Int(_) | Value::Bool(_))),
            Some(tag) => Ok(value.type_tag() == tag),
            None => Err(class_error()),
        },
        Value::ExceptionType(kind) => Ok(match value {
            Value::Exception(exc) => exc.kind.is_subclass_of(*kind),
            _ => false,
        }),
        _ => Err(class_error()),
    }
}

fn class_error() -> ScriptException {
    ScriptException::type_error(
        "isinstance() arg 2 must be a type, a tuple of types, or a union",
    )
}

fn is_instance(value: &Value, classinfo: &Value) -> HookResult<bool> {
    if let Value::Tuple(classes) = classinfo {
        for class in classes.iter() {
            if is_instance(value, class)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    class_matches(value, classinfo)
}

fn is_subclass(class: &Value, classinfo: &Value) -> HookResult<bool> {
    if let Value::Tuple(classes) = classinfo {
        for candidate in classes.iter() {
            if is_subclass(class, candidate)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    match (class, classinfo) {
        (Value::ExceptionType(a), Value::ExceptionType(b)) => Ok(a.is_subclass_of(*b)),
        (Value::Builtin(a), Value::Builtin(b)) => match (a.as_type(), b.as_type()) {
            (Some(x), Some(y)) => Ok(x == y || (x == TypeTag::Bool && y == TypeTag::Int)),
            _ => Err(ScriptException::type_error("issubclass() arg 1 must be a class")),
        },
        (Value::ExceptionType(_), Value::Builtin(_)) | (Value::Builtin(_), Value::ExceptionType(_)) => {
            Ok(false)
        }
        _ => Err(ScriptException::type_error("issubclass() arg 1 must be a class")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pure(builtin: Builtin, args: Vec<Value>) -> HookResult<Value> {
        call_pure(builtin, Args::positional(builtin.name(), args))
    }

    #[test]
    fn test_names_round_trip() {
        for builtin in Builtin::PUBLIC {
            assert_eq!(Builtin::from_name(builtin.name()), Some(*builtin));
        }
        assert_eq!(Builtin::from_name("_getattr_"), None);
        assert_eq!(Builtin::Guard(GuardHook::Write).name(), "_write_");
    }

    #[test]
    fn test_int_parsing() {
        assert!(matches!(pure(Builtin::Int, vec![Value::str(" 42 ")]), Ok(Value::Int(42))));
        assert!(matches!(
            pure(Builtin::Int, vec![Value::str("ff"), Value::Int(16)]),
            Ok(Value::Int(255))
        ));
        assert!(matches!(
            pure(Builtin::Int, vec![Value::str("0b101"), Value::Int(0)]),
            Ok(Value::Int(5))
        ));
        let err = pure(Builtin::Int, vec![Value::str("4x")]).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: '4x'");
        assert!(matches!(pure(Builtin::Int, vec![Value::Float(-3.9)]), Ok(Value::Int(-3))));
    }

    #[test]
    fn test_float_parsing() {
        assert!(matches!(pure(Builtin::Float, vec![Value::str("1.5")]), Ok(Value::Float(f)) if f == 1.5));
        assert!(matches!(pure(Builtin::Float, vec![Value::str("-inf")]), Ok(Value::Float(f)) if f == f64::NEG_INFINITY));
        assert!(pure(Builtin::Float, vec![Value::str("abc")]).is_err());
    }

    #[test]
    fn test_round_ties_to_even() {
        assert!(matches!(pure(Builtin::Round, vec![Value::Float(2.5)]), Ok(Value::Int(2))));
        assert!(matches!(pure(Builtin::Round, vec![Value::Float(3.5)]), Ok(Value::Int(4))));
        assert!(matches!(
            pure(Builtin::Round, vec![Value::Int(1250), Value::Int(-2)]),
            Ok(Value::Int(1200))
        ));
        let rounded = pure(Builtin::Round, vec![Value::Float(3.14159), Value::Int(2)]).unwrap();
        assert_eq!(rounded.to_string(), "3.14");
    }

    #[test]
    fn test_range_and_len() {
        let range = pure(Builtin::Range, vec![Value::Int(1), Value::Int(10), Value::Int(3)]).unwrap();
        assert!(matches!(pure(Builtin::Len, vec![range]), Ok(Value::Int(3))));
        assert!(pure(Builtin::Range, vec![Value::Int(1), Value::Int(2), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_isinstance_handles_bool_and_tuples() {
        let int_type = Value::Builtin(Builtin::Int);
        assert!(matches!(
            pure(Builtin::Isinstance, vec![Value::Bool(true), int_type.clone()]),
            Ok(Value::Bool(true))
        ));
        let classes = Value::tuple(vec![Value::Builtin(Builtin::Str), int_type]);
        assert!(matches!(
            pure(Builtin::Isinstance, vec![Value::Float(1.0), classes]),
            Ok(Value::Bool(false))
        ));
        let exc = Value::Exception(Rc::new(ScriptException::key_error("k")));
        assert!(matches!(
            pure(Builtin::Isinstance, vec![exc, Value::ExceptionType(ExceptionKind::LookupError)]),
            Ok(Value::Bool(true))
        ));
    }

    #[test]
    fn test_pow_with_modulus() {
        let args = |values| Args::positional("pow", values);
        assert!(matches!(
            power(args(vec![Value::Int(3), Value::Int(4), Value::Int(5)])),
            Ok(Value::Int(1))
        ));
        assert!(matches!(
            power(args(vec![Value::Int(2), Value::Int(10)])),
            Ok(Value::Int(1024))
        ));
    }

    #[test]
    fn test_sum_and_strings() {
        let items = Value::list(vec![Value::Int(1), Value::Float(0.5)]);
        assert!(matches!(sum(Args::positional("sum", vec![items])), Ok(Value::Float(f)) if f == 1.5));
        let err = sum(Args::positional("sum", vec![Value::list(vec![]), Value::str("")])).unwrap_err();
        assert!(err.is_raise_of(ExceptionKind::TypeError));
    }

    #[test]
    fn test_hex_oct_chr_ord() {
        assert_eq!(pure(Builtin::Hex, vec![Value::Int(-255)]).unwrap().to_string(), "-0xff");
        assert_eq!(pure(Builtin::Oct, vec![Value::Int(8)]).unwrap().to_string(), "0o10");
        assert_eq!(pure(Builtin::Chr, vec![Value::Int(65)]).unwrap().to_string(), "A");
        assert!(matches!(pure(Builtin::Ord, vec![Value::str("a")]), Ok(Value::Int(97))));
        assert!(pure(Builtin::Ord, vec![Value::str("ab")]).is_err());
    }

    #[test]
    fn test_bytes_constructors() {
        let b = pure(Builtin::Bytes, vec![Value::list(vec![Value::Int(104), Value::Int(105)])]).unwrap();
        assert_eq!(b.to_string(), "b'hi'");
        assert!(pure(Builtin::Bytes, vec![Value::str("x")]).is_err());
        assert!(pure(Builtin::Bytes, vec![Value::list(vec![Value::Int(300)])]).is_err());
    }
}
