//! Text rendering of values: `repr`, `str` and `%`-formatting.

use super::exception::ScriptException;
use super::table::HashKey;
use super::value::Value;
use crate::guard::capability::HookResult;

/// `repr(value)`.
pub fn repr(value: &Value) -> String {
    let mut out = String::new();
    repr_into(value, &mut out, &mut Vec::new());
    out
}

/// `str(value)`.
pub fn to_str(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        Value::Exception(exc) => exc.message.clone(),
        other => repr(other),
    }
}

fn container_id<T: ?Sized>(rc: &std::rc::Rc<T>) -> usize {
    std::rc::Rc::as_ptr(rc) as *const () as usize
}

fn join_into<'a>(
    items: impl Iterator<Item = &'a Value>,
    out: &mut String,
    seen: &mut Vec<usize>,
) -> usize {
    let mut count = 0;
    for item in items {
        if count > 0 {
            out.push_str(", ");
        }
        repr_into(item, out, seen);
        count += 1;
    }
    count
}

fn repr_into(value: &Value, out: &mut String, seen: &mut Vec<usize>) {
    crate::stack::guarded(|| repr_value(value, out, seen));
}

fn repr_value(value: &Value, out: &mut String, seen: &mut Vec<usize>) {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&float_repr(*f)),
        Value::Str(s) => out.push_str(&str_repr(s)),
        Value::Bytes(b) => out.push_str(&bytes_repr(b)),
        Value::ByteArray(b) => {
            out.push_str("bytearray(");
            out.push_str(&bytes_repr(&b.borrow()));
            out.push(')');
        }
        Value::List(items) => {
            let id = container_id(items);
            if seen.contains(&id) {
                out.push_str("[...]");
                return;
            }
            seen.push(id);
            out.push('[');
            join_into(items.borrow().iter(), out, seen);
            out.push(']');
            seen.pop();
        }
        Value::Tuple(items) => {
            out.push('(');
            let count = join_into(items.iter(), out, seen);
            if count == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(dict) => {
            let id = container_id(dict);
            if seen.contains(&id) {
                out.push_str("{...}");
                return;
            }
            seen.push(id);
            out.push('{');
            for (i, (key, value)) in dict.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                repr_into(key, out, seen);
                out.push_str(": ");
                repr_into(value, out, seen);
            }
            out.push('}');
            seen.pop();
        }
        Value::Set(set) => {
            let set = set.borrow();
            if set.is_empty() {
                out.push_str("set()");
            } else {
                out.push('{');
                join_into(set.iter().map(|(k, _)| k), out, seen);
                out.push('}');
            }
        }
        Value::FrozenSet(set) => {
            if set.is_empty() {
                out.push_str("frozenset()");
            } else {
                out.push_str("frozenset({");
                join_into(set.iter().map(|(k, _)| k), out, seen);
                out.push_str("})");
            }
        }
        Value::Range(r) => {
            if r.step == 1 {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            } else {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::Slice(s) => {
            let part = |v: Option<i64>| v.map_or_else(|| "None".to_string(), |v| v.to_string());
            out.push_str(&format!(
                "slice({}, {}, {})",
                part(s.start),
                part(s.stop),
                part(s.step)
            ));
        }
        Value::Iterator(_) => out.push_str("<iterator object>"),
        Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name())),
        Value::Function(f) => out.push_str(&format!("<function {}>", f.code.name)),
        Value::Builtin(b) if b.as_type().is_some() => {
            out.push_str(&format!("<class '{}'>", b.name()))
        }
        Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
        Value::BoundMethod(m) => out.push_str(&format!(
            "<built-in method {} of {} object>",
            m.name,
            m.receiver.type_name()
        )),
        Value::Native(n) => out.push_str(&format!("<built-in function {}>", n.name)),
        Value::ExceptionType(k) => out.push_str(&format!("<class '{}'>", k.name())),
        Value::Exception(exc) => {
            out.push_str(exc.kind.name());
            out.push('(');
            if !exc.message.is_empty() {
                out.push_str(&str_repr(&exc.message));
            }
            out.push(')');
        }
        Value::Object(obj) => out.push_str(&obj.repr()),
    }
}

/// Shortest round-trip rendering in the script language's float style.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{f:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let text = format!("{f}");
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exponent.abs())
    }
}

pub fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub fn bytes_repr(bytes: &[u8]) -> String {
    let quote = if bytes.contains(&b'\'') && !bytes.contains(&b'"') {
        b'"'
    } else {
        b'\''
    };
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push('b');
    out.push(quote as char);
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if b == quote => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            b => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    out.push(quote as char);
    out
}

/// Fixed-point rendering with `precision` digits, `inf`/`nan` spelled in lowercase.
pub fn format_fixed(f: f64, precision: usize) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.into();
    }
    format!("{f:.precision$}")
}

/// Scientific rendering with a signed, at-least-two-digit exponent.
pub fn format_scientific(f: f64, precision: usize, upper: bool) -> String {
    if !f.is_finite() {
        let text = format_fixed(f, 0);
        return if upper { text.to_uppercase() } else { text };
    }
    let sci = format!("{f:.precision$e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exponent.abs())
}

fn format_general(f: f64, precision: usize, upper: bool, alternate: bool) -> String {
    if !f.is_finite() {
        let text = format_fixed(f, 0);
        return if upper { text.to_uppercase() } else { text };
    }
    let precision = precision.max(1);
    let sci = format!("{f:.prec$e}", prec = precision - 1);
    let exponent: i32 = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let text = if exponent >= -4 && exponent < precision as i32 {
        let digits = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{f:.digits$}")
    } else {
        format_scientific(f, precision - 1, upper)
    };
    if alternate {
        return text;
    }
    strip_trailing_zeros(&text)
}

fn strip_trailing_zeros(text: &str) -> String {
    let (number, suffix) = match text.find(['e', 'E']) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    if !number.contains('.') {
        return text.to_string();
    }
    let trimmed = number.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{suffix}")
}

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
}

fn pad(spec: &Spec, body: String, numeric: bool) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{body}{}", " ".repeat(fill))
    } else if spec.zero && numeric {
        let (sign, digits) = match body.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
            _ => (String::new(), body),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}

fn sign_prefix(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn as_int(value: &Value, conv: char) -> HookResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(f) if matches!(conv, 'd' | 'i') && f.is_finite() => Ok(f.trunc() as i64),
        other => Err(ScriptException::type_error(format!(
            "%{conv} format: an integer is required, not {}",
            other.type_name()
        ))),
    }
}

fn as_float(value: &Value, conv: char) -> HookResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        Value::Float(f) => Ok(*f),
        other => Err(ScriptException::type_error(format!(
            "%{conv} format: a real number is required, not {}",
            other.type_name()
        ))),
    }
}

fn convert(conv: char, spec: &Spec, value: &Value) -> HookResult<String> {
    Ok(match conv {
        's' => {
            let mut text = to_str(value);
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            pad(spec, text, false)
        }
        'r' => {
            let mut text = repr(value);
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            pad(spec, text, false)
        }
        'd' | 'i' => {
            let i = as_int(value, conv)?;
            let body = format!("{}{}", sign_prefix(spec, i < 0), i.unsigned_abs());
            pad(spec, body, true)
        }
        'x' | 'X' | 'o' => {
            let i = as_int(value, conv)?;
            let magnitude = i.unsigned_abs();
            let digits = match conv {
                'x' => format!("{magnitude:x}"),
                'X' => format!("{magnitude:X}"),
                _ => format!("{magnitude:o}"),
            };
            let prefix = match (spec.alternate, conv) {
                (true, 'x') => "0x",
                (true, 'X') => "0X",
                (true, _) => "0o",
                (false, _) => "",
            };
            pad(
                spec,
                format!("{}{prefix}{digits}", sign_prefix(spec, i < 0)),
                true,
            )
        }
        'f' | 'F' => {
            let f = as_float(value, conv)?;
            let body = format_fixed(f.abs(), spec.precision.unwrap_or(6));
            let body = if conv == 'F' { body.to_uppercase() } else { body };
            pad(
                spec,
                format!("{}{body}", sign_prefix(spec, f.is_sign_negative() && f != 0.0)),
                true,
            )
        }
        'e' | 'E' => {
            let f = as_float(value, conv)?;
            let body = format_scientific(f.abs(), spec.precision.unwrap_or(6), conv == 'E');
            pad(
                spec,
                format!("{}{body}", sign_prefix(spec, f.is_sign_negative() && f != 0.0)),
                true,
            )
        }
        'g' | 'G' => {
            let f = as_float(value, conv)?;
            let body = format_general(
                f.abs(),
                spec.precision.unwrap_or(6),
                conv == 'G',
                spec.alternate,
            );
            pad(
                spec,
                format!("{}{body}", sign_prefix(spec, f.is_sign_negative() && f != 0.0)),
                true,
            )
        }
        'c' => {
            let c = match value {
                Value::Int(i) => u32::try_from(*i)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ScriptException::new(
                        super::exception::ExceptionKind::OverflowError,
                        "%c arg not in range(0x110000)",
                    ))?,
                Value::Str(s) if s.chars().count() == 1 => s.chars().next().unwrap_or(' '),
                _ => {
                    return Err(ScriptException::type_error(
                        "%c requires int or char",
                    ))
                }
            };
            pad(spec, c.to_string(), false)
        }
        other => {
            return Err(ScriptException::value_error(format!(
                "unsupported format character '{other}'"
            )))
        }
    })
}

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> HookResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(dict) => Some(dict.clone()),
        _ => None,
    };
    let mut next_arg = 0usize;
    let mut used_mapping = false;
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut key: Option<String> = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .ok_or_else(|| ScriptException::value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = 0usize;
            while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + d as usize;
                i += 1;
            }
            spec.precision = Some(precision);
        }

        let conv = *chars
            .get(i)
            .ok_or_else(|| ScriptException::value_error("incomplete format"))?;
        i += 1;
        if conv == '%' {
            out.push('%');
            continue;
        }

        let value = match key {
            Some(key) => {
                let dict = mapping
                    .as_ref()
                    .ok_or_else(|| ScriptException::type_error("format requires a mapping"))?;
                used_mapping = true;
                let hash = HashKey::Str(std::rc::Rc::from(key.as_str()));
                dict.borrow()
                    .get(&hash)
                    .cloned()
                    .ok_or_else(|| ScriptException::key_error(str_repr(&key)))?
            }
            None => {
                let value = positional.get(next_arg).cloned().ok_or_else(|| {
                    ScriptException::type_error("not enough arguments for format string")
                })?;
                next_arg += 1;
                value
            }
        };
        out.push_str(&convert(conv, &spec, &value)?);
    }

    let consumed_all = used_mapping || next_arg == positional.len() || mapping.is_some();
    if !consumed_all {
        return Err(ScriptException::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}
