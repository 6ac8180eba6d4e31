//! Attributes and methods of the safe value types.
//!
//! Attribute lookup on a safe value yields either a data attribute (range
//! bounds, module members) or a [`BoundMethod`] that is dispatched here when
//! called.

use std::cell::RefCell;
use std::rc::Rc;

use super::args::{int_arg, str_arg, Args};
use super::exception::{Exec, ScriptException};
use super::format::repr;
use super::interpreter::Interpreter;
use super::modules;
use super::ops;
use super::table::{Dict, HashKey, SetTable};
use super::value::{BoundMethod, Value};
use crate::guard::capability::HookResult;
use crate::guard::safe_types::TypeTag;

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "encode", "endswith", "find", "index", "isalnum",
    "isalpha", "isdigit", "islower", "isnumeric", "isspace", "isupper", "join", "ljust",
    "lower", "lstrip", "partition", "replace", "rfind", "rindex", "rjust", "rpartition",
    "rsplit", "rstrip", "split", "splitlines", "startswith", "strip", "swapcase", "title",
    "upper", "zfill",
];
const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove",
    "reverse", "sort",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update",
    "values",
];
const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "discard", "intersection", "isdisjoint",
    "issubset", "issuperset", "pop", "remove", "symmetric_difference", "union", "update",
];
const FROZENSET_METHODS: &[&str] = &[
    "copy", "difference", "intersection", "isdisjoint", "issubset", "issuperset",
    "symmetric_difference", "union",
];
const BYTES_METHODS: &[&str] = &["count", "decode", "endswith", "hex", "startswith"];
const BYTEARRAY_METHODS: &[&str] = &[
    "append", "clear", "count", "decode", "endswith", "extend", "hex", "pop", "startswith",
];
const INT_METHODS: &[&str] = &["bit_length"];
const FLOAT_METHODS: &[&str] = &["is_integer"];
const RANGE_METHODS: &[&str] = &["count", "index"];

fn method_names(tag: TypeTag) -> &'static [&'static str] {
    match tag {
        TypeTag::Str => STR_METHODS,
        TypeTag::List => LIST_METHODS,
        TypeTag::Tuple => TUPLE_METHODS,
        TypeTag::Dict => DICT_METHODS,
        TypeTag::Set => SET_METHODS,
        TypeTag::Frozenset => FROZENSET_METHODS,
        TypeTag::Bytes => BYTES_METHODS,
        TypeTag::Bytearray => BYTEARRAY_METHODS,
        TypeTag::Int | TypeTag::Bool => INT_METHODS,
        TypeTag::Float => FLOAT_METHODS,
        TypeTag::Range => RANGE_METHODS,
        _ => &[],
    }
}

fn no_attribute(value: &Value, name: &str) -> ScriptException {
    ScriptException::attribute_error(format!(
        "'{}' object has no attribute '{name}'",
        value.type_name()
    ))
}

fn optional_int(value: Option<i64>) -> Value {
    value.map_or(Value::None, Value::Int)
}

/// `value.name` for a safe value.
pub fn lookup_attribute(value: &Value, name: &str) -> HookResult<Value> {
    match value {
        Value::Module(kind) => return modules::member(*kind, name),
        Value::Range(range) => match name {
            "start" => return Ok(Value::Int(range.start)),
            "stop" => return Ok(Value::Int(range.stop)),
            "step" => return Ok(Value::Int(range.step)),
            _ => {}
        },
        Value::Slice(slice) => match name {
            "start" => return Ok(optional_int(slice.start)),
            "stop" => return Ok(optional_int(slice.stop)),
            "step" => return Ok(optional_int(slice.step)),
            _ => {}
        },
        Value::Exception(exc) if name == "args" => {
            let args = if exc.message.is_empty() {
                Vec::new()
            } else {
                vec![Value::str(&exc.message)]
            };
            return Ok(Value::tuple(args));
        }
        _ => {}
    }
    if method_names(value.type_tag()).contains(&name) {
        return Ok(Value::BoundMethod(Rc::new(BoundMethod {
            receiver: value.clone(),
            name: Rc::from(name),
        })));
    }
    Err(no_attribute(value, name))
}

pub fn has_attribute(value: &Value, name: &str) -> bool {
    lookup_attribute(value, name).is_ok()
}

/// Call `receiver.name(*args)`.
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Exec<Value> {
    match receiver {
        Value::List(items) => list_method(interp, items, name, args),
        Value::Str(s) => Ok(str_method(s, name, args)?),
        Value::Tuple(items) => Ok(sequence_method(items, name, args)?),
        Value::Dict(dict) => Ok(dict_method(dict, name, args)?),
        Value::Set(set) => Ok(set_method(set, name, args)?),
        Value::FrozenSet(set) => {
            let shared = RefCell::new((**set).clone());
            match set_method(&shared, name, args)? {
                Value::Set(result) => Ok(Value::FrozenSet(Rc::new(result.borrow().clone()))),
                other => Ok(other),
            }
        }
        Value::Bytes(_) | Value::ByteArray(_) => Ok(bytes_method(receiver, name, args)?),
        Value::Int(_) | Value::Bool(_) if name == "bit_length" => {
            args.arity(0, 0)?;
            let i = int_arg(receiver, name)?;
            Ok(Value::Int(i64::from(64 - i.unsigned_abs().leading_zeros())))
        }
        Value::Float(f) if name == "is_integer" => {
            args.arity(0, 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Range(range) => {
            let items: Vec<Value> = (0..range.len())
                .filter_map(|i| range.get(i).map(Value::Int))
                .collect();
            Ok(sequence_method(&items, name, args)?)
        }
        other => Err(no_attribute(other, name).into()),
    }
}

/// Sort `items` by `key` (or by value), stable, optionally reversed.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> Exec<Vec<Value>> {
    let keys = match key {
        Some(key) if !key.is_none() => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(interp.call_value(key, vec![item.clone()], Vec::new())?);
            }
            keys
        }
        _ => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| {
        if failure.is_some() {
            return std::cmp::Ordering::Equal;
        }
        match ops::compare_order(&keys[a], &keys[b]) {
            Ok(ordering) if reverse => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(exc) => {
                failure = Some(exc);
                std::cmp::Ordering::Equal
            }
        }
    });
    if let Some(exc) = failure {
        return Err(exc.into());
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn bool_arg(args: &mut Args, index: usize, keyword: &str) -> HookResult<bool> {
    match args.take(index, keyword)? {
        Some(value) => value.truthy(),
        None => Ok(false),
    }
}

fn list_method(
    interp: &mut Interpreter,
    items: &Rc<RefCell<Vec<Value>>>,
    name: &str,
    mut args: Args,
) -> Exec<Value> {
    match name {
        "append" => {
            args.arity(1, 1)?;
            let value = args.required(0, "object")?;
            items.borrow_mut().push(value);
        }
        "extend" => {
            args.arity(1, 1)?;
            let extra = ops::collect(&args.required(0, "iterable")?)?;
            items.borrow_mut().extend(extra);
        }
        "insert" => {
            args.arity(2, 2)?;
            let index = int_arg(&args.required(0, "index")?, name)?;
            let value = args.required(1, "object")?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, value);
        }
        "pop" => {
            args.arity(0, 1)?;
            let index = match args.get(0) {
                Some(v) => int_arg(v, name)?,
                None => -1,
            };
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptException::index_error("pop from empty list").into());
            }
            let at = ops::normalize_index(index, items.len(), "pop")?;
            return Ok(items.remove(at));
        }
        "remove" => {
            args.arity(1, 1)?;
            let target = args.required(0, "value")?;
            let snapshot = items.borrow().clone();
            for (i, item) in snapshot.iter().enumerate() {
                if ops::values_equal(item, &target)? {
                    items.borrow_mut().remove(i);
                    return Ok(Value::None);
                }
            }
            return Err(ScriptException::value_error("list.remove(x): x not in list").into());
        }
        "clear" => {
            args.arity(0, 0)?;
            items.borrow_mut().clear();
        }
        "copy" => {
            args.arity(0, 0)?;
            return Ok(Value::list(items.borrow().clone()));
        }
        "reverse" => {
            args.arity(0, 0)?;
            items.borrow_mut().reverse();
        }
        "sort" => {
            args.arity(0, 0)?;
            let key = args.take(usize::MAX, "key")?;
            let reverse = bool_arg(&mut args, usize::MAX, "reverse")?;
            args.finish()?;
            let snapshot = items.borrow().clone();
            let sorted = sort_values(interp, snapshot, key.as_ref(), reverse)?;
            *items.borrow_mut() = sorted;
        }
        _ => {
            let snapshot = items.borrow().clone();
            return Ok(sequence_method(&snapshot, name, args)?);
        }
    }
    args.finish()?;
    Ok(Value::None)
}

/// `count` and `index`, shared by list, tuple and range.
fn sequence_method(items: &[Value], name: &str, args: Args) -> HookResult<Value> {
    match name {
        "count" => {
            args.arity(1, 1)?;
            let target = args.get(0).cloned().unwrap_or(Value::None);
            let mut n = 0;
            for item in items {
                if ops::values_equal(item, &target)? {
                    n += 1;
                }
            }
            Ok(Value::Int(n))
        }
        "index" => {
            args.arity(1, 1)?;
            let target = args.get(0).cloned().unwrap_or(Value::None);
            for (i, item) in items.iter().enumerate() {
                if ops::values_equal(item, &target)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            Err(ScriptException::value_error(format!(
                "{} is not in sequence",
                repr(&target)
            )))
        }
        _ => Err(ScriptException::attribute_error(format!(
            "sequence has no method '{name}'"
        ))),
    }
}

/// Char-indexed window `[start, end)` of `s`, clamped like a slice.
fn char_window<'s>(s: &'s str, args: &Args, from: usize) -> HookResult<(&'s str, usize)> {
    let len = s.chars().count() as i64;
    let bound = |value: Option<&Value>, default: i64| -> HookResult<usize> {
        let raw = match value {
            None | Some(Value::None) => default,
            Some(v) => int_arg(v, "slice")?,
        };
        let resolved = if raw < 0 { (raw + len).max(0) } else { raw.min(len) };
        Ok(resolved as usize)
    };
    let start = bound(args.get(from), 0)?;
    let end = bound(args.get(from + 1), len)?.max(start);
    let byte = |chars: usize| s.char_indices().nth(chars).map_or(s.len(), |(b, _)| b);
    Ok((&s[byte(start)..byte(end)], start))
}

fn char_offset(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn pad(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let margin = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, margin),
        '>' => (margin, 0),
        _ => {
            let left = margin / 2 + (margin & width as usize & 1);
            (left, margin - left)
        }
    };
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    format!("{}{s}{}", fill_str(left), fill_str(right))
}

fn fill_char(args: &Args, index: usize) -> HookResult<char> {
    match args.get(index) {
        None => Ok(' '),
        Some(v) => {
            let s = str_arg(v, "fillchar")?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(ScriptException::type_error(
                    "The fill character must be exactly one character long",
                )),
            }
        }
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(Value::str(&rest[..i]));
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn rsplit_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                parts.push(Value::str(&rest[i + ws_len..]));
                rest = rest[..i].trim_end();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts.reverse();
    parts
}

fn affix_matches(s: &str, affix: &Value, suffix: bool) -> HookResult<bool> {
    let check = |candidate: &Value| -> HookResult<bool> {
        let text = str_arg(candidate, if suffix { "endswith" } else { "startswith" })?;
        Ok(if suffix {
            s.ends_with(text)
        } else {
            s.starts_with(text)
        })
    };
    match affix {
        Value::Tuple(options) => {
            for option in options.iter() {
                if check(option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => check(other),
    }
}

fn str_method(s: &Rc<str>, name: &str, mut args: Args) -> HookResult<Value> {
    let text: &str = s;
    let value = match name {
        "upper" | "lower" | "swapcase" | "title" | "capitalize" => {
            args.arity(0, 0)?;
            Value::from(recase(text, name))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.arity(0, 1)?;
            let stripped = match args.get(0) {
                None | Some(Value::None) => match name {
                    "strip" => text.trim(),
                    "lstrip" => text.trim_start(),
                    _ => text.trim_end(),
                },
                Some(chars) => {
                    let chars = str_arg(chars, name)?;
                    let set = |c: char| chars.contains(c);
                    match name {
                        "strip" => text.trim_matches(set),
                        "lstrip" => text.trim_start_matches(set),
                        _ => text.trim_end_matches(set),
                    }
                }
            };
            Value::str(stripped)
        }
        "split" | "rsplit" => {
            args.arity(0, 2)?;
            let sep = args.take(0, "sep")?;
            let maxsplit = match args.take(1, "maxsplit")? {
                Some(v) => int_arg(&v, name)?,
                None => -1,
            };
            args.finish()?;
            let parts = match &sep {
                None | Some(Value::None) if name == "split" => split_whitespace(text, maxsplit),
                None | Some(Value::None) => rsplit_whitespace(text, maxsplit),
                Some(sep) => {
                    let sep = str_arg(sep, name)?;
                    if sep.is_empty() {
                        return Err(ScriptException::value_error("empty separator"));
                    }
                    let pieces: Vec<&str> = match (name, maxsplit) {
                        (_, m) if m < 0 => text.split(sep).collect(),
                        ("split", m) => text.splitn(m as usize + 1, sep).collect(),
                        (_, m) => {
                            let mut pieces: Vec<&str> = text.rsplitn(m as usize + 1, sep).collect();
                            pieces.reverse();
                            pieces
                        }
                    };
                    pieces.into_iter().map(Value::str).collect()
                }
            };
            return Ok(Value::list(parts));
        }
        "splitlines" => {
            args.arity(0, 0)?;
            Value::list(text.lines().map(Value::str).collect())
        }
        "join" => {
            args.arity(1, 1)?;
            let items = ops::collect(&args.required(0, "iterable")?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(ScriptException::type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                }
            }
            Value::from(parts.join(text))
        }
        "replace" => {
            args.arity(2, 3)?;
            let old = args.required(0, "old")?;
            let new = args.required(1, "new")?;
            let (old, new) = (str_arg(&old, name)?, str_arg(&new, name)?);
            let count = match args.take(2, "count")? {
                Some(v) => int_arg(&v, name)?,
                None => -1,
            };
            args.finish()?;
            let replaced = if count < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, count as usize)
            };
            return Ok(Value::from(replaced));
        }
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let affix = args.required(0, "prefix")?;
            Value::Bool(affix_matches(text, &affix, name == "endswith")?)
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            args.arity(1, 3)?;
            let sub = args.get(0).cloned().unwrap_or(Value::None);
            let sub = str_arg(&sub, name)?;
            let (window, offset) = char_window(text, &args, 1)?;
            if name == "count" {
                let n = if sub.is_empty() {
                    window.chars().count() + 1
                } else {
                    window.matches(sub).count()
                };
                return Ok(Value::Int(n as i64));
            }
            let found = if name.starts_with('r') {
                window.rfind(sub)
            } else {
                window.find(sub)
            };
            match found {
                Some(byte) => Value::Int(offset as i64 + char_offset(window, byte)),
                None if name.ends_with("index") => {
                    return Err(ScriptException::value_error("substring not found"))
                }
                None => Value::Int(-1),
            }
        }
        "isdigit" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
            args.arity(0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isnumeric" => char::is_numeric,
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                _ => char::is_whitespace,
            };
            Value::Bool(!text.is_empty() && text.chars().all(test))
        }
        "isupper" | "islower" => {
            args.arity(0, 0)?;
            let upper = name == "isupper";
            let mut cased = false;
            let mut ok = true;
            for c in text.chars() {
                if c.is_uppercase() || c.is_lowercase() {
                    cased = true;
                    if c.is_uppercase() != upper {
                        ok = false;
                    }
                }
            }
            Value::Bool(cased && ok)
        }
        "center" | "ljust" | "rjust" => {
            args.arity(1, 2)?;
            let width = int_arg(&args.required(0, "width")?, name)?;
            let fill = fill_char(&args, 1)?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            Value::from(pad(text, width, fill, align))
        }
        "zfill" => {
            args.arity(1, 1)?;
            let width = int_arg(&args.required(0, "width")?, name)?;
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('+' | '-')) => (Some(c), &text[1..]),
                _ => (None, text),
            };
            let len = text.chars().count() as i64;
            let zeros = "0".repeat((width - len).max(0) as usize);
            Value::from(format!(
                "{}{zeros}{digits}",
                sign.map(String::from).unwrap_or_default()
            ))
        }
        "partition" | "rpartition" => {
            args.arity(1, 1)?;
            let sep = args.required(0, "sep")?;
            let sep = str_arg(&sep, name)?;
            if sep.is_empty() {
                return Err(ScriptException::value_error("empty separator"));
            }
            let found = if name == "partition" {
                text.find(sep)
            } else {
                text.rfind(sep)
            };
            let parts = match found {
                Some(i) => [&text[..i], sep, &text[i + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Value::tuple(parts.into_iter().map(Value::str).collect())
        }
        "encode" => {
            args.arity(0, 1)?;
            if let Some(encoding) = args.take(0, "encoding")? {
                check_encoding(str_arg(&encoding, name)?)?;
            }
            Value::bytes(text.as_bytes())
        }
        _ => return Err(no_attribute(&Value::Str(s.clone()), name)),
    };
    args.finish()?;
    Ok(value)
}

fn recase(text: &str, mode: &str) -> String {
    match mode {
        "upper" => text.to_uppercase(),
        "lower" => text.to_lowercase(),
        "swapcase" => text
            .chars()
            .flat_map(|c| -> Vec<char> {
                if c.is_uppercase() {
                    c.to_lowercase().collect()
                } else {
                    c.to_uppercase().collect()
                }
            })
            .collect(),
        "capitalize" => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        }
        _ => {
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            out
        }
    }
}

fn check_encoding(encoding: &str) -> HookResult<()> {
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => Ok(()),
        other => Err(ScriptException::new(
            super::exception::ExceptionKind::LookupError,
            format!("unknown encoding: {other}"),
        )),
    }
}

/// Merge `source` (a dict or an iterable of pairs) into `dict`.
pub fn dict_update(dict: &mut Dict, source: &Value) -> HookResult<()> {
    if let Value::Dict(other) = source {
        for (k, v) in other.borrow().entries_cloned() {
            dict.insert(HashKey::from_value(&k)?, k, v);
        }
        return Ok(());
    }
    for (i, pair) in ops::collect(source)?.into_iter().enumerate() {
        let pair = ops::collect(&pair).map_err(|_| {
            ScriptException::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            ScriptException::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict.insert(HashKey::from_value(&key)?, key, value);
    }
    Ok(())
}

fn dict_method(dict: &Rc<RefCell<Dict>>, name: &str, mut args: Args) -> HookResult<Value> {
    let value = match name {
        "get" => {
            args.arity(1, 2)?;
            let key = args.required(0, "key")?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let hash = HashKey::from_value(&key)?;
            let found = dict.borrow().get(&hash).cloned();
            found.unwrap_or(default)
        }
        "keys" => {
            args.arity(0, 0)?;
            Value::list(dict.borrow().key_values())
        }
        "values" => {
            args.arity(0, 0)?;
            Value::list(dict.borrow().iter().map(|(_, v)| v.clone()).collect())
        }
        "items" => {
            args.arity(0, 0)?;
            Value::list(
                dict.borrow()
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            )
        }
        "pop" => {
            args.arity(1, 2)?;
            let key = args.required(0, "key")?;
            let removed = dict.borrow_mut().remove(&HashKey::from_value(&key)?);
            match (removed, args.get(1)) {
                (Some((_, v)), _) => v,
                (None, Some(default)) => default.clone(),
                (None, None) => return Err(ScriptException::key_error(repr(&key))),
            }
        }
        "popitem" => {
            args.arity(0, 0)?;
            let last = dict.borrow_mut().pop_last();
            match last {
                Some((k, v)) => Value::tuple(vec![k, v]),
                None => {
                    return Err(ScriptException::key_error(
                        "popitem(): dictionary is empty",
                    ))
                }
            }
        }
        "setdefault" => {
            args.arity(1, 2)?;
            let key = args.required(0, "key")?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            let hash = HashKey::from_value(&key)?;
            let existing = dict.borrow().get(&hash).cloned();
            match existing {
                Some(existing) => existing,
                None => {
                    dict.borrow_mut().insert(hash, key, default.clone());
                    default
                }
            }
        }
        "update" => {
            args.arity(0, 1)?;
            let mut merged = dict.borrow().clone();
            if let Some(source) = args.get(0) {
                dict_update(&mut merged, source)?;
            }
            for (k, v) in args.take_keywords() {
                merged.insert(HashKey::Str(Rc::from(k.as_str())), Value::from(k), v);
            }
            *dict.borrow_mut() = merged;
            Value::None
        }
        "clear" => {
            args.arity(0, 0)?;
            dict.borrow_mut().clear();
            Value::None
        }
        "copy" => {
            args.arity(0, 0)?;
            Value::dict(dict.borrow().clone())
        }
        _ => return Err(no_attribute(&Value::Dict(dict.clone()), name)),
    };
    args.finish()?;
    Ok(value)
}

fn set_operands(args: Args) -> HookResult<Vec<SetTable>> {
    args.finish()?;
    args.into_positional()
        .iter()
        .map(|arg| SetTable::from_values(ops::collect(arg)?))
        .collect()
}

fn set_method(set: &RefCell<SetTable>, name: &str, mut args: Args) -> HookResult<Value> {
    match name {
        "add" => {
            args.arity(1, 1)?;
            set.borrow_mut().add(args.required(0, "elem")?)?;
        }
        "remove" | "discard" => {
            args.arity(1, 1)?;
            let elem = args.required(0, "elem")?;
            let removed = set.borrow_mut().remove(&HashKey::from_value(&elem)?);
            if removed.is_none() && name == "remove" {
                return Err(ScriptException::key_error(repr(&elem)));
            }
        }
        "pop" => {
            args.arity(0, 0)?;
            let popped = set.borrow_mut().pop_last();
            return popped
                .map(|(k, _)| k)
                .ok_or_else(|| ScriptException::key_error("pop from an empty set"));
        }
        "clear" => {
            args.arity(0, 0)?;
            set.borrow_mut().clear();
        }
        "copy" => {
            args.arity(0, 0)?;
            return Ok(Value::set(set.borrow().clone()));
        }
        "update" => {
            let others = set_operands(args)?;
            let mut current = set.borrow_mut();
            for other in others {
                *current = ops::set_union(&current, &other);
            }
            return Ok(Value::None);
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let others = set_operands(args)?;
            let mut result = set.borrow().clone();
            for other in &others {
                result = match name {
                    "union" => ops::set_union(&result, other),
                    "intersection" => ops::set_filter(&result, other, true),
                    "difference" => ops::set_filter(&result, other, false),
                    _ => ops::set_symmetric(&result, other),
                };
            }
            return Ok(Value::set(result));
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            args.arity(1, 1)?;
            let other = SetTable::from_values(ops::collect(&args.required(0, "other")?)?)?;
            let current = set.borrow();
            let answer = match name {
                "issubset" => current.is_subset(&other),
                "issuperset" => other.is_subset(&current),
                _ => ops::set_filter(&current, &other, true).is_empty(),
            };
            return Ok(Value::Bool(answer));
        }
        _ => return Err(no_attribute(&Value::set(set.borrow().clone()), name)),
    }
    args.finish()?;
    Ok(Value::None)
}

fn bytes_method(receiver: &Value, name: &str, mut args: Args) -> HookResult<Value> {
    let data: Vec<u8> = match receiver {
        Value::ByteArray(b) => b.borrow().clone(),
        Value::Bytes(b) => b.to_vec(),
        other => return Err(no_attribute(other, name)),
    };
    let value = match name {
        "decode" => {
            args.arity(0, 2)?;
            if let Some(encoding) = args.take(0, "encoding")? {
                check_encoding(str_arg(&encoding, name)?)?;
            }
            let _ = args.take(1, "errors")?;
            let text = String::from_utf8(data).map_err(|e| {
                ScriptException::value_error(format!(
                    "'utf-8' codec can't decode byte in position {}",
                    e.utf8_error().valid_up_to()
                ))
            })?;
            Value::from(text)
        }
        "hex" => {
            args.arity(0, 0)?;
            Value::from(hex::encode(&data))
        }
        "count" => {
            args.arity(1, 1)?;
            let needle = bytes_needle(&args.required(0, "sub")?)?;
            let n = if needle.is_empty() {
                data.len() + 1
            } else {
                let mut n = 0;
                let mut i = 0;
                while i + needle.len() <= data.len() {
                    if data[i..].starts_with(&needle) {
                        n += 1;
                        i += needle.len();
                    } else {
                        i += 1;
                    }
                }
                n
            };
            Value::Int(n as i64)
        }
        "startswith" | "endswith" => {
            args.arity(1, 1)?;
            let needle = bytes_needle(&args.required(0, "prefix")?)?;
            Value::Bool(if name == "startswith" {
                data.starts_with(&needle)
            } else {
                data.ends_with(&needle)
            })
        }
        "append" | "extend" | "pop" | "clear" => {
            let Value::ByteArray(target) = receiver else {
                return Err(no_attribute(receiver, name));
            };
            return bytearray_method(target, name, args);
        }
        _ => return Err(no_attribute(receiver, name)),
    };
    args.finish()?;
    Ok(value)
}

fn bytes_needle(value: &Value) -> HookResult<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b.to_vec()),
        Value::ByteArray(b) => Ok(b.borrow().clone()),
        other => Err(ScriptException::type_error(format!(
            "a bytes-like object is required, not '{}'",
            other.type_name()
        ))),
    }
}

fn byte_value(value: &Value) -> HookResult<u8> {
    let i = int_arg(value, "byte")?;
    u8::try_from(i).map_err(|_| ScriptException::value_error("byte must be in range(0, 256)"))
}

fn bytearray_method(target: &Rc<RefCell<Vec<u8>>>, name: &str, args: Args) -> HookResult<Value> {
    match name {
        "append" => {
            args.arity(1, 1)?;
            let byte = byte_value(args.get(0).unwrap_or(&Value::None))?;
            target.borrow_mut().push(byte);
        }
        "extend" => {
            args.arity(1, 1)?;
            let items = ops::collect(args.get(0).unwrap_or(&Value::None))?;
            let bytes = items.iter().map(byte_value).collect::<HookResult<Vec<u8>>>()?;
            target.borrow_mut().extend(bytes);
        }
        "pop" => {
            args.arity(0, 0)?;
            return target
                .borrow_mut()
                .pop()
                .map(|b| Value::Int(i64::from(b)))
                .ok_or_else(|| ScriptException::index_error("pop from empty bytearray"));
        }
        _ => {
            args.arity(0, 0)?;
            target.borrow_mut().clear();
        }
    }
    args.finish()?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::RangeValue;

    fn call_str(s: &str, name: &str, args: Vec<Value>) -> HookResult<Value> {
        str_method(&Rc::from(s), name, Args::positional(name, args))
    }

    #[test]
    fn test_lookup_returns_bound_method_or_error() {
        let list = Value::list(vec![]);
        assert!(matches!(
            lookup_attribute(&list, "append"),
            Ok(Value::BoundMethod(_))
        ));
        let err = lookup_attribute(&list, "push").unwrap_err();
        assert_eq!(err.message, "'list' object has no attribute 'push'");
        assert!(!has_attribute(&Value::Int(1), "append"));
    }

    #[test]
    fn test_range_attributes() {
        let range = Value::Range(RangeValue {
            start: 1,
            stop: 10,
            step: 3,
        });
        assert!(matches!(lookup_attribute(&range, "step"), Ok(Value::Int(3))));
    }

    #[test]
    fn test_str_split_variants() {
        let parts = call_str("  a b  c ", "split", vec![]).unwrap();
        assert_eq!(parts.to_string(), "['a', 'b', 'c']");
        let parts = call_str("a,b,c", "split", vec![Value::str(","), Value::Int(1)]).unwrap();
        assert_eq!(parts.to_string(), "['a', 'b,c']");
        let parts = call_str("a,b,c", "rsplit", vec![Value::str(","), Value::Int(1)]).unwrap();
        assert_eq!(parts.to_string(), "['a,b', 'c']");
        assert!(call_str("abc", "split", vec![Value::str("")]).is_err());
    }

    #[test]
    fn test_str_search_uses_char_offsets() {
        assert!(matches!(
            call_str("héllo", "find", vec![Value::str("l")]),
            Ok(Value::Int(2))
        ));
        assert!(matches!(
            call_str("hello", "find", vec![Value::str("z")]),
            Ok(Value::Int(-1))
        ));
        assert!(call_str("hello", "index", vec![Value::str("z")]).is_err());
        assert!(matches!(
            call_str("banana", "count", vec![Value::str("an")]),
            Ok(Value::Int(2))
        ));
    }

    #[test]
    fn test_str_case_and_padding() {
        assert_eq!(call_str("hello world", "title", vec![]).unwrap().to_string(), "Hello World");
        assert_eq!(call_str("aBc", "swapcase", vec![]).unwrap().to_string(), "AbC");
        assert_eq!(
            call_str("ab", "center", vec![Value::Int(5), Value::str("*")]).unwrap().to_string(),
            "**ab*"
        );
        assert_eq!(call_str("-42", "zfill", vec![Value::Int(5)]).unwrap().to_string(), "-0042");
    }

    #[test]
    fn test_join_rejects_non_str() {
        let err = call_str(",", "join", vec![Value::list(vec![Value::Int(1)])]).unwrap_err();
        assert_eq!(err.message, "sequence item 0: expected str instance, int found");
    }

    #[test]
    fn test_dict_methods() {
        let dict = Rc::new(RefCell::new(Dict::new()));
        let set = |k: &str, v: i64| {
            dict_method(
                &dict,
                "setdefault",
                Args::positional("setdefault", vec![Value::str(k), Value::Int(v)]),
            )
        };
        set("a", 1).unwrap();
        assert!(matches!(set("a", 2), Ok(Value::Int(1))));
        let got = dict_method(
            &dict,
            "get",
            Args::positional("get", vec![Value::str("missing"), Value::Int(0)]),
        );
        assert!(matches!(got, Ok(Value::Int(0))));
        let err = dict_method(&dict, "pop", Args::positional("pop", vec![Value::str("zz")]))
            .unwrap_err();
        assert_eq!(err.message, "'zz'");
    }

    #[test]
    fn test_dict_update_from_pairs() {
        let mut dict = Dict::new();
        let pairs = Value::list(vec![Value::tuple(vec![Value::str("k"), Value::Int(1)])]);
        dict_update(&mut dict, &pairs).unwrap();
        assert_eq!(dict.len(), 1);
        let bad = Value::list(vec![Value::tuple(vec![Value::Int(1)])]);
        assert!(dict_update(&mut dict, &bad).is_err());
    }

    #[test]
    fn test_set_algebra() {
        let set = RefCell::new(SetTable::from_values(vec![Value::Int(1), Value::Int(2)]).unwrap());
        let other = Value::list(vec![Value::Int(2), Value::Int(3)]);
        let union = set_method(&set, "union", Args::positional("union", vec![other.clone()]));
        assert_eq!(union.unwrap().to_string(), "{1, 2, 3}");
        let inter = set_method(&set, "intersection", Args::positional("intersection", vec![other]));
        assert_eq!(inter.unwrap().to_string(), "{2}");
        let err = set_method(&set, "remove", Args::positional("remove", vec![Value::Int(9)]))
            .unwrap_err();
        assert_eq!(err.message, "9");
    }

    #[test]
    fn test_bytes_decode_and_hex() {
        let data = Value::bytes(b"hi");
        let text = bytes_method(&data, "decode", Args::positional("decode", vec![])).unwrap();
        assert_eq!(text.to_string(), "hi");
        let hex = bytes_method(&data, "hex", Args::positional("hex", vec![])).unwrap();
        assert_eq!(hex.to_string(), "6869");
    }
}
