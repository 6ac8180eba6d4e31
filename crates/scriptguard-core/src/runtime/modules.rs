//! The `math`, `random` and `string` utility modules.

use std::f64::consts;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::args::{float_arg, int_arg, str_arg, Args};
use super::builtins::Builtin;
use super::exception::{ExceptionKind, ScriptException};
use super::ops;
use super::value::{ModuleKind, Value};
use crate::guard::capability::HookResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFn {
    Sqrt,
    Floor,
    Ceil,
    Trunc,
    Fabs,
    Exp,
    Log,
    Log2,
    Log10,
    Pow,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Hypot,
    Degrees,
    Radians,
    IsNan,
    IsInf,
    IsFinite,
    IsClose,
    Gcd,
    Factorial,
    Copysign,
    Fmod,
}

impl MathFn {
    pub const ALL: &'static [MathFn] = &[
        MathFn::Sqrt,
        MathFn::Floor,
        MathFn::Ceil,
        MathFn::Trunc,
        MathFn::Fabs,
        MathFn::Exp,
        MathFn::Log,
        MathFn::Log2,
        MathFn::Log10,
        MathFn::Pow,
        MathFn::Sin,
        MathFn::Cos,
        MathFn::Tan,
        MathFn::Asin,
        MathFn::Acos,
        MathFn::Atan,
        MathFn::Atan2,
        MathFn::Hypot,
        MathFn::Degrees,
        MathFn::Radians,
        MathFn::IsNan,
        MathFn::IsInf,
        MathFn::IsFinite,
        MathFn::IsClose,
        MathFn::Gcd,
        MathFn::Factorial,
        MathFn::Copysign,
        MathFn::Fmod,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MathFn::Sqrt => "sqrt",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Trunc => "trunc",
            MathFn::Fabs => "fabs",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Log2 => "log2",
            MathFn::Log10 => "log10",
            MathFn::Pow => "pow",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Hypot => "hypot",
            MathFn::Degrees => "degrees",
            MathFn::Radians => "radians",
            MathFn::IsNan => "isnan",
            MathFn::IsInf => "isinf",
            MathFn::IsFinite => "isfinite",
            MathFn::IsClose => "isclose",
            MathFn::Gcd => "gcd",
            MathFn::Factorial => "factorial",
            MathFn::Copysign => "copysign",
            MathFn::Fmod => "fmod",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RandomFn {
    Random,
    Uniform,
    Randint,
    Randrange,
    Choice,
    Shuffle,
    Sample,
    Seed,
}

impl RandomFn {
    pub const ALL: &'static [RandomFn] = &[
        RandomFn::Random,
        RandomFn::Uniform,
        RandomFn::Randint,
        RandomFn::Randrange,
        RandomFn::Choice,
        RandomFn::Shuffle,
        RandomFn::Sample,
        RandomFn::Seed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RandomFn::Random => "random",
            RandomFn::Uniform => "uniform",
            RandomFn::Randint => "randint",
            RandomFn::Randrange => "randrange",
            RandomFn::Choice => "choice",
            RandomFn::Shuffle => "shuffle",
            RandomFn::Sample => "sample",
            RandomFn::Seed => "seed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

const MATH_CONSTANTS: &[&str] = &["pi", "e", "tau", "inf", "nan"];

const STRING_CONSTANTS: &[(&str, &str)] = &[
    ("ascii_letters", "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ"),
    ("ascii_lowercase", "abcdefghijklmnopqrstuvwxyz"),
    ("ascii_uppercase", "ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
    ("digits", "0123456789"),
    ("hexdigits", "0123456789abcdefABCDEF"),
    ("octdigits", "01234567"),
    ("punctuation", "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"),
    ("whitespace", " \t\n\r\x0b\x0c"),
    (
        "printable",
        "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~ \t\n\r\x0b\x0c",
    ),
];

/// Public member names of a utility module, in a stable order.
pub fn member_names(kind: ModuleKind) -> Vec<&'static str> {
    match kind {
        ModuleKind::Math => MATH_CONSTANTS
            .iter()
            .copied()
            .chain(MathFn::ALL.iter().map(|f| f.name()))
            .collect(),
        ModuleKind::Random => RandomFn::ALL.iter().map(|f| f.name()).collect(),
        ModuleKind::String => STRING_CONSTANTS
            .iter()
            .map(|(name, _)| *name)
            .chain(std::iter::once("capwords"))
            .collect(),
    }
}

/// `module.name`.
pub fn member(kind: ModuleKind, name: &str) -> HookResult<Value> {
    let found = match kind {
        ModuleKind::Math => match name {
            "pi" => Some(Value::Float(consts::PI)),
            "e" => Some(Value::Float(consts::E)),
            "tau" => Some(Value::Float(consts::TAU)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "nan" => Some(Value::Float(f64::NAN)),
            other => MathFn::from_name(other).map(|f| Value::Builtin(Builtin::Math(f))),
        },
        ModuleKind::Random => {
            RandomFn::from_name(name).map(|f| Value::Builtin(Builtin::Random(f)))
        }
        ModuleKind::String => match name {
            "capwords" => Some(Value::Builtin(Builtin::Capwords)),
            other => STRING_CONSTANTS
                .iter()
                .find(|(n, _)| *n == other)
                .map(|(_, text)| Value::str(text)),
        },
    };
    found.ok_or_else(|| {
        ScriptException::attribute_error(format!(
            "module '{}' has no attribute '{name}'",
            kind.name()
        ))
    })
}

fn domain_error() -> ScriptException {
    ScriptException::value_error("math domain error")
}

/// Convert an integral float to `int`, as `int()` and `math.floor` do.
pub fn float_to_int(f: f64) -> HookResult<i64> {
    if f.is_nan() {
        return Err(ScriptException::value_error(
            "cannot convert float NaN to integer",
        ));
    }
    if f.is_infinite() {
        return Err(ScriptException::new(
            ExceptionKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < -9.223_372_036_854_776e18 || truncated >= 9.223_372_036_854_776e18 {
        return Err(ScriptException::overflow());
    }
    Ok(truncated as i64)
}

fn unary_float(args: &Args, what: &str) -> HookResult<f64> {
    args.arity(1, 1)?;
    float_arg(&args.get(0).cloned().unwrap_or(Value::None), what)
}

fn binary_float(args: &Args, what: &str) -> HookResult<(f64, f64)> {
    args.arity(2, 2)?;
    let a = float_arg(&args.get(0).cloned().unwrap_or(Value::None), what)?;
    let b = float_arg(&args.get(1).cloned().unwrap_or(Value::None), what)?;
    Ok((a, b))
}

fn rounded(args: &Args, what: &str, round: fn(f64) -> f64) -> HookResult<Value> {
    args.arity(1, 1)?;
    match args.get(0) {
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        Some(other) => Ok(Value::Int(float_to_int(round(float_arg(other, what)?))?)),
        None => Err(domain_error()),
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

pub fn call_math(f: MathFn, mut args: Args) -> HookResult<Value> {
    let what = f.name();
    let value = match f {
        MathFn::Floor => return rounded(&args, what, f64::floor),
        MathFn::Ceil => return rounded(&args, what, f64::ceil),
        MathFn::Trunc => return rounded(&args, what, f64::trunc),
        MathFn::Sqrt => {
            let x = unary_float(&args, what)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            x.sqrt()
        }
        MathFn::Fabs => unary_float(&args, what)?.abs(),
        MathFn::Exp => {
            let y = unary_float(&args, what)?.exp();
            if y.is_infinite() {
                return Err(ScriptException::new(
                    ExceptionKind::OverflowError,
                    "math range error",
                ));
            }
            y
        }
        MathFn::Log => {
            args.arity(1, 2)?;
            let x = float_arg(&args.required(0, "x")?, what)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                Some(base) => {
                    let base = float_arg(base, what)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    x.ln() / base.ln()
                }
                None => x.ln(),
            }
        }
        MathFn::Log2 | MathFn::Log10 => {
            let x = unary_float(&args, what)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            if f == MathFn::Log2 {
                x.log2()
            } else {
                x.log10()
            }
        }
        MathFn::Pow => {
            let (x, y) = binary_float(&args, what)?;
            if x == 0.0 && y < 0.0 {
                return Err(domain_error());
            }
            x.powf(y)
        }
        MathFn::Sin => unary_float(&args, what)?.sin(),
        MathFn::Cos => unary_float(&args, what)?.cos(),
        MathFn::Tan => unary_float(&args, what)?.tan(),
        MathFn::Asin | MathFn::Acos => {
            let x = unary_float(&args, what)?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain_error());
            }
            if f == MathFn::Asin {
                x.asin()
            } else {
                x.acos()
            }
        }
        MathFn::Atan => unary_float(&args, what)?.atan(),
        MathFn::Atan2 => {
            let (y, x) = binary_float(&args, what)?;
            y.atan2(x)
        }
        MathFn::Hypot => {
            let mut total = 0.0_f64;
            for value in args.into_positional() {
                let v = float_arg(&value, what)?;
                total = total.hypot(v);
            }
            total
        }
        MathFn::Degrees => unary_float(&args, what)?.to_degrees(),
        MathFn::Radians => unary_float(&args, what)?.to_radians(),
        MathFn::IsNan => return Ok(Value::Bool(unary_float(&args, what)?.is_nan())),
        MathFn::IsInf => return Ok(Value::Bool(unary_float(&args, what)?.is_infinite())),
        MathFn::IsFinite => return Ok(Value::Bool(unary_float(&args, what)?.is_finite())),
        MathFn::IsClose => {
            let a = float_arg(&args.required(0, "a")?, what)?;
            let b = float_arg(&args.required(1, "b")?, what)?;
            let rel_tol = match args.take(2, "rel_tol")? {
                Some(v) => float_arg(&v, what)?,
                None => 1e-9,
            };
            let abs_tol = match args.take(3, "abs_tol")? {
                Some(v) => float_arg(&v, what)?,
                None => 0.0,
            };
            args.finish()?;
            if a == b {
                return Ok(Value::Bool(true));
            }
            let diff = (a - b).abs();
            let close = diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol;
            return Ok(Value::Bool(close && diff.is_finite()));
        }
        MathFn::Gcd => {
            let mut acc = 0;
            for value in args.into_positional() {
                acc = gcd(acc, int_arg(&value, what)?);
            }
            return Ok(Value::Int(acc));
        }
        MathFn::Factorial => {
            args.arity(1, 1)?;
            let n = int_arg(&args.required(0, "n")?, what)?;
            if n < 0 {
                return Err(ScriptException::value_error(
                    "factorial() not defined for negative values",
                ));
            }
            let mut acc: i64 = 1;
            for k in 2..=n {
                acc = acc.checked_mul(k).ok_or_else(ScriptException::overflow)?;
            }
            return Ok(Value::Int(acc));
        }
        MathFn::Copysign => {
            let (x, y) = binary_float(&args, what)?;
            x.copysign(y)
        }
        MathFn::Fmod => {
            let (x, y) = binary_float(&args, what)?;
            if y == 0.0 {
                return Err(domain_error());
            }
            x % y
        }
    };
    Ok(Value::Float(value))
}

fn empty_range(start: i64, stop: i64) -> ScriptException {
    ScriptException::value_error(format!("empty range for randrange() ({start}, {stop})"))
}

pub fn call_random(f: RandomFn, rng: &mut StdRng, mut args: Args) -> HookResult<Value> {
    let what = f.name();
    match f {
        RandomFn::Random => {
            args.arity(0, 0)?;
            Ok(Value::Float(rng.gen::<f64>()))
        }
        RandomFn::Uniform => {
            let (a, b) = binary_float(&args, what)?;
            Ok(Value::Float(a + (b - a) * rng.gen::<f64>()))
        }
        RandomFn::Randint => {
            args.arity(2, 2)?;
            let a = int_arg(&args.required(0, "a")?, what)?;
            let b = int_arg(&args.required(1, "b")?, what)?;
            if a > b {
                return Err(empty_range(a, b.saturating_add(1)));
            }
            Ok(Value::Int(rng.gen_range(a..=b)))
        }
        RandomFn::Randrange => {
            args.arity(1, 3)?;
            let first = int_arg(&args.required(0, "start")?, what)?;
            let (start, stop) = match args.get(1) {
                Some(stop) => (first, int_arg(stop, what)?),
                None => (0, first),
            };
            let step = match args.get(2) {
                Some(step) => int_arg(step, what)?,
                None => 1,
            };
            if step == 0 {
                return Err(ScriptException::value_error(
                    "zero step for randrange()",
                ));
            }
            let range = super::value::RangeValue { start, stop, step };
            let len = range.len();
            if len == 0 {
                return Err(empty_range(start, stop));
            }
            let picked = rng.gen_range(0..len);
            range
                .get(picked)
                .map(Value::Int)
                .ok_or_else(ScriptException::overflow)
        }
        RandomFn::Choice => {
            args.arity(1, 1)?;
            let seq = args.required(0, "seq")?;
            let len = ops::length(&seq)?;
            if len == 0 {
                return Err(ScriptException::index_error(
                    "Cannot choose from an empty sequence",
                ));
            }
            let index = rng.gen_range(0..len) as i64;
            ops::get_item(&seq, &Value::Int(index))
        }
        RandomFn::Shuffle => {
            args.arity(1, 1)?;
            match args.required(0, "x")? {
                Value::List(items) => {
                    items.borrow_mut().shuffle(rng);
                    Ok(Value::None)
                }
                other => Err(ScriptException::type_error(format!(
                    "shuffle() argument must be a list, not {}",
                    other.type_name()
                ))),
            }
        }
        RandomFn::Sample => {
            args.arity(2, 2)?;
            let population = ops::collect(&args.required(0, "population")?)?;
            let k = int_arg(&args.required(1, "k")?, what)?;
            let k = usize::try_from(k)
                .ok()
                .filter(|k| *k <= population.len())
                .ok_or_else(|| {
                    ScriptException::value_error("Sample larger than population or is negative")
                })?;
            let picked = rand::seq::index::sample(rng, population.len(), k)
                .into_iter()
                .map(|i| population[i].clone())
                .collect();
            Ok(Value::list(picked))
        }
        RandomFn::Seed => {
            args.arity(0, 1)?;
            *rng = match args.get(0) {
                None | Some(Value::None) => StdRng::from_entropy(),
                Some(seed) => StdRng::seed_from_u64(int_arg(seed, what)? as u64),
            };
            Ok(Value::None)
        }
    }
}

/// `string.capwords(s, sep=None)`.
pub fn capwords(mut args: Args) -> HookResult<Value> {
    args.arity(1, 2)?;
    let text = args.required(0, "s")?;
    let text = str_arg(&text, "capwords")?;
    let sep = args.take(1, "sep")?;
    args.finish()?;
    let capitalize = |word: &str| {
        let mut chars = word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    };
    let joined = match &sep {
        None | Some(Value::None) => text
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<String>>()
            .join(" "),
        Some(sep) => {
            let sep = str_arg(sep, "capwords")?;
            text.split(sep).map(capitalize).collect::<Vec<String>>().join(sep)
        }
    };
    Ok(Value::from(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: MathFn, args: Vec<Value>) -> HookResult<Value> {
        call_math(f, Args::positional(f.name(), args))
    }

    #[test]
    fn test_math_members() {
        assert!(matches!(member(ModuleKind::Math, "pi"), Ok(Value::Float(p)) if p == consts::PI));
        assert!(matches!(
            member(ModuleKind::Math, "sqrt"),
            Ok(Value::Builtin(Builtin::Math(MathFn::Sqrt)))
        ));
        let err = member(ModuleKind::Math, "system").unwrap_err();
        assert_eq!(err.message, "module 'math' has no attribute 'system'");
    }

    #[test]
    fn test_floor_returns_int_and_domain_errors() {
        assert!(matches!(call(MathFn::Floor, vec![Value::Float(-2.5)]), Ok(Value::Int(-3))));
        let err = call(MathFn::Sqrt, vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::ValueError);
        assert!(call(MathFn::Floor, vec![Value::Float(f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_factorial_and_gcd() {
        assert!(matches!(call(MathFn::Factorial, vec![Value::Int(5)]), Ok(Value::Int(120))));
        assert!(matches!(
            call(MathFn::Gcd, vec![Value::Int(12), Value::Int(18)]),
            Ok(Value::Int(6))
        ));
        let err = call(MathFn::Factorial, vec![Value::Int(30)]).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::OverflowError);
    }

    #[test]
    fn test_seeded_random_is_reproducible() {
        let draw = || {
            let mut rng = StdRng::seed_from_u64(7);
            let args = Args::positional("randint", vec![Value::Int(1), Value::Int(100)]);
            call_random(RandomFn::Randint, &mut rng, args).unwrap().to_string()
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn test_choice_on_empty_sequence() {
        let mut rng = StdRng::seed_from_u64(1);
        let args = Args::positional("choice", vec![Value::list(vec![])]);
        let err = call_random(RandomFn::Choice, &mut rng, args).unwrap_err();
        assert_eq!(err.kind, ExceptionKind::IndexError);
    }

    #[test]
    fn test_capwords() {
        let args = Args::positional("capwords", vec![Value::str("hello   big WORLD")]);
        assert_eq!(capwords(args).unwrap().to_string(), "Hello Big World");
    }

    #[test]
    fn test_string_constants() {
        assert_eq!(
            member(ModuleKind::String, "digits").unwrap().to_string(),
            "0123456789"
        );
        assert!(member_names(ModuleKind::String).contains(&"capwords"));
    }
}
