//! Insertion-ordered hash tables backing `dict`, `set` and `frozenset`.
//!
//! Iteration order is insertion order, so output that walks a dict or set is
//! the same on every run.

use std::collections::HashMap;
use std::rc::Rc;

use super::exception::ScriptException;
use super::value::Value;

/// Hashable projection of a value.
///
/// Numbers that compare equal hash equal: `True`, `1` and `1.0` share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    None,
    Int(i64),
    /// Bit pattern of a non-integral float.
    Float(u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<HashKey>),
    /// Members sorted so equal sets hash equal regardless of order.
    FrozenSet(Vec<HashKey>),
    Range(i64, i64, i64),
    Module(&'static str),
    Builtin(&'static str),
    Type(&'static str),
}

impl HashKey {
    pub fn from_value(value: &Value) -> Result<HashKey, ScriptException> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Bytes(b) => HashKey::Bytes(b.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(|item| crate::stack::guarded(|| HashKey::from_value(item)))
                    .collect::<Result<_, _>>()?,
            ),
            Value::FrozenSet(set) => {
                let mut keys: Vec<HashKey> = set.keys().cloned().collect();
                keys.sort();
                HashKey::FrozenSet(keys)
            }
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Module(m) => HashKey::Module(m.name()),
            Value::Builtin(b) => HashKey::Builtin(b.name()),
            Value::ExceptionType(k) => HashKey::Type(k.name()),
            other => {
                return Err(ScriptException::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }
}

fn float_key(f: f64) -> HashKey {
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        HashKey::Int(f as i64)
    } else {
        HashKey::Float(f.to_bits())
    }
}

/// Ordered map from hashed keys to values, keeping the original key value.
#[derive(Debug, Clone)]
pub struct OrderedTable<V> {
    entries: Vec<Option<Entry<V>>>,
    index: HashMap<HashKey, usize>,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    hash: HashKey,
    key: Value,
    value: V,
}

pub type Dict = OrderedTable<Value>;
pub type SetTable = OrderedTable<()>;

impl<V> Default for OrderedTable<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> OrderedTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, hash: &HashKey) -> bool {
        self.index.contains_key(hash)
    }

    pub fn get(&self, hash: &HashKey) -> Option<&V> {
        let slot = *self.index.get(hash)?;
        self.entries[slot].as_ref().map(|e| &e.value)
    }

    /// Insert or overwrite. An existing key keeps its position and original
    /// key value.
    pub fn insert(&mut self, hash: HashKey, key: Value, value: V) -> Option<V> {
        if let Some(&slot) = self.index.get(&hash) {
            if let Some(entry) = self.entries[slot].as_mut() {
                return Some(std::mem::replace(&mut entry.value, value));
            }
        }
        self.index.insert(hash.clone(), self.entries.len());
        self.entries.push(Some(Entry { hash, key, value }));
        None
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Value, V)> {
        let slot = self.index.remove(hash)?;
        let entry = self.entries[slot].take()?;
        self.maybe_compact();
        Some((entry.key, entry.value))
    }

    /// Remove the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, V)> {
        while let Some(last) = self.entries.pop() {
            if let Some(entry) = last {
                self.index.remove(&entry.hash);
                return Some((entry.key, entry.value));
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &V)> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &HashKey> {
        self.entries.iter().flatten().map(|entry| &entry.hash)
    }

    pub fn key_values(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    fn maybe_compact(&mut self) {
        if self.entries.len() > 16 && self.index.len() * 2 < self.entries.len() {
            self.entries.retain(Option::is_some);
            for (slot, entry) in self.entries.iter().enumerate() {
                if let Some(entry) = entry {
                    self.index.insert(entry.hash.clone(), slot);
                }
            }
        }
    }
}

impl<V: Clone> OrderedTable<V> {
    pub fn entries_cloned(&self) -> Vec<(Value, V)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl SetTable {
    /// Add a member; returns `false` if it was already present.
    pub fn add(&mut self, value: Value) -> Result<bool, ScriptException> {
        let hash = HashKey::from_value(&value)?;
        if self.contains(&hash) {
            return Ok(false);
        }
        self.insert(hash, value, ());
        Ok(true)
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self, ScriptException> {
        let mut set = SetTable::new();
        for value in values {
            set.add(value)?;
        }
        Ok(set)
    }

    pub fn contains_value(&self, value: &Value) -> Result<bool, ScriptException> {
        Ok(self.contains(&HashKey::from_value(value)?))
    }

    pub fn is_subset(&self, other: &SetTable) -> bool {
        self.keys().all(|k| other.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: &Value) -> HashKey {
        HashKey::from_value(v).unwrap()
    }

    #[test]
    fn test_numeric_keys_unify() {
        assert_eq!(key(&Value::Bool(true)), key(&Value::Int(1)));
        assert_eq!(key(&Value::Float(2.0)), key(&Value::Int(2)));
        assert_ne!(key(&Value::Float(2.5)), key(&Value::Int(2)));
    }

    #[test]
    fn test_list_is_unhashable() {
        let err = HashKey::from_value(&Value::list(vec![])).unwrap_err();
        assert_eq!(err.message, "unhashable type: 'list'");
    }

    #[test]
    fn test_insertion_order_survives_overwrite_and_removal() {
        let mut dict = Dict::new();
        for name in ["b", "a", "c"] {
            let k = Value::str(name);
            dict.insert(key(&k), k, Value::Int(0));
        }
        let a = Value::str("a");
        dict.insert(key(&a), a.clone(), Value::Int(9));
        dict.remove(&key(&Value::str("b")));
        let order: Vec<String> = dict.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(order, vec!["a", "c"]);
        assert!(matches!(dict.get(&key(&a)), Some(Value::Int(9))));
    }

    #[test]
    fn test_compaction_keeps_lookup_valid() {
        let mut dict = Dict::new();
        for i in 0..40 {
            dict.insert(HashKey::Int(i), Value::Int(i), Value::Int(i * 10));
        }
        for i in 0..30 {
            dict.remove(&HashKey::Int(i));
        }
        assert_eq!(dict.len(), 10);
        assert!(matches!(dict.get(&HashKey::Int(35)), Some(Value::Int(350))));
    }

    #[test]
    fn test_set_add_reports_duplicates() {
        let mut set = SetTable::new();
        assert!(set.add(Value::Int(1)).unwrap());
        assert!(!set.add(Value::Float(1.0)).unwrap());
        assert_eq!(set.len(), 1);
    }
}
