//! Argument unpacking for built-ins and methods.

use super::exception::ScriptException;
use super::value::Value;
use crate::guard::capability::HookResult;

/// Positional and keyword arguments of one native call.
#[derive(Debug)]
pub struct Args {
    name: String,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(name: impl Into<String>, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            name: name.into(),
            positional,
            keywords,
        }
    }

    pub fn positional(name: impl Into<String>, positional: Vec<Value>) -> Self {
        Self::new(name, positional, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    /// Require between `min` and `max` positional arguments.
    pub fn arity(&self, min: usize, max: usize) -> HookResult<()> {
        let given = self.positional.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let message = if min == max {
            match min {
                0 => format!("{}() takes no arguments ({given} given)", self.name),
                1 => format!("{}() takes exactly one argument ({given} given)", self.name),
                n => format!("{}() takes exactly {n} arguments ({given} given)", self.name),
            }
        } else if given < min {
            format!(
                "{}() expected at least {min} arguments, got {given}",
                self.name
            )
        } else {
            format!("{}() expected at most {max} arguments, got {given}", self.name)
        };
        Err(ScriptException::type_error(message))
    }

    /// Positional argument `index`, or the keyword `keyword`.
    pub fn take(&mut self, index: usize, keyword: &str) -> HookResult<Option<Value>> {
        let by_keyword = self
            .keywords
            .iter()
            .position(|(name, _)| name == keyword)
            .map(|pos| self.keywords.remove(pos).1);
        match (self.positional.get(index).cloned(), by_keyword) {
            (Some(_), Some(_)) => Err(ScriptException::type_error(format!(
                "{}() got multiple values for argument '{keyword}'",
                self.name
            ))),
            (positional, keyword) => Ok(positional.or(keyword)),
        }
    }

    pub fn required(&mut self, index: usize, keyword: &str) -> HookResult<Value> {
        self.take(index, keyword)?.ok_or_else(|| {
            ScriptException::type_error(format!(
                "{}() missing required argument '{keyword}' (pos {})",
                self.name,
                index + 1
            ))
        })
    }

    /// Positional argument `index`; keywords are not accepted for it.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn into_positional(self) -> Vec<Value> {
        self.positional
    }

    /// Reject keywords nobody consumed.
    pub fn finish(&self) -> HookResult<()> {
        match self.keywords.first() {
            Some((name, _)) => Err(ScriptException::type_error(format!(
                "{}() got an unexpected keyword argument '{name}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    /// Consume the remaining keywords, for callees that accept any.
    pub fn take_keywords(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.keywords)
    }
}

/// An `int` (or `bool`) argument.
pub fn int_arg(value: &Value, what: &str) -> HookResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(ScriptException::type_error(format!(
            "{what}: '{}' object cannot be interpreted as an integer",
            other.type_name()
        ))),
    }
}

/// A real-number argument.
pub fn float_arg(value: &Value, what: &str) -> HookResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        other => Err(ScriptException::type_error(format!(
            "{what}: must be real number, not {}",
            other.type_name()
        ))),
    }
}

pub fn str_arg<'v>(value: &'v Value, what: &str) -> HookResult<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(ScriptException::type_error(format!(
            "{what}: must be str, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::exception::ExceptionKind;

    #[test]
    fn test_arity_messages() {
        let args = Args::positional("len", vec![]);
        let err = args.arity(1, 1).unwrap_err();
        assert_eq!(err.message, "len() takes exactly one argument (0 given)");
        let args = Args::positional("range", vec![Value::Int(1); 4]);
        let err = args.arity(1, 3).unwrap_err();
        assert_eq!(err.message, "range() expected at most 3 arguments, got 4");
    }

    #[test]
    fn test_keyword_lookup_and_leftovers() {
        let mut args = Args::new(
            "sorted",
            vec![Value::list(vec![])],
            vec![("reverse".into(), Value::Bool(true)), ("cmp".into(), Value::None)],
        );
        assert!(matches!(args.take(1, "reverse"), Ok(Some(Value::Bool(true)))));
        let err = args.finish().unwrap_err();
        assert_eq!(err.kind, ExceptionKind::TypeError);
        assert!(err.message.contains("'cmp'"));
    }

    #[test]
    fn test_duplicate_argument() {
        let mut args = Args::new(
            "get",
            vec![Value::Int(1)],
            vec![("key".into(), Value::Int(2))],
        );
        assert!(args.take(0, "key").is_err());
    }
}
