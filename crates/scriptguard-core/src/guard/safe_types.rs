//! Value types and the safe-type set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The type of a script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    None,
    Bool,
    Int,
    Float,
    Str,
    Bytes,
    Bytearray,
    List,
    Tuple,
    Dict,
    Set,
    Frozenset,
    Range,
    Slice,
    Iterator,
    Module,
    Function,
    Builtin,
    Type,
    Exception,
    Object,
}

impl TypeTag {
    /// The name scripts see for this type.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::None => "NoneType",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "str",
            TypeTag::Bytes => "bytes",
            TypeTag::Bytearray => "bytearray",
            TypeTag::List => "list",
            TypeTag::Tuple => "tuple",
            TypeTag::Dict => "dict",
            TypeTag::Set => "set",
            TypeTag::Frozenset => "frozenset",
            TypeTag::Range => "range",
            TypeTag::Slice => "slice",
            TypeTag::Iterator => "iterator",
            TypeTag::Module => "module",
            TypeTag::Function => "function",
            TypeTag::Builtin => "builtin_function_or_method",
            TypeTag::Type => "type",
            TypeTag::Exception => "exception",
            TypeTag::Object => "object",
        }
    }
}

/// Types whose values bypass every capability guard.
///
/// Built once per namespace from configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTypes {
    tags: BTreeSet<TypeTag>,
}

impl SafeTypes {
    pub const DEFAULT: &'static [TypeTag] = &[
        TypeTag::None,
        TypeTag::Bool,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Str,
        TypeTag::Bytes,
        TypeTag::Bytearray,
        TypeTag::List,
        TypeTag::Tuple,
        TypeTag::Dict,
        TypeTag::Set,
        TypeTag::Frozenset,
        TypeTag::Range,
        TypeTag::Module,
    ];

    pub fn new(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        let mut tags: BTreeSet<TypeTag> = tags.into_iter().collect();
        // Host objects always go through their hooks.
        tags.remove(&TypeTag::Object);
        Self { tags }
    }

    pub fn contains(&self, tag: TypeTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.tags.iter().copied()
    }
}

impl Default for SafeTypes {
    fn default() -> Self {
        Self::new(Self::DEFAULT.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set() {
        let safe = SafeTypes::default();
        assert!(safe.contains(TypeTag::List));
        assert!(safe.contains(TypeTag::Module));
        assert!(!safe.contains(TypeTag::Function));
        assert!(!safe.contains(TypeTag::Object));
    }

    #[test]
    fn test_object_can_never_be_safe() {
        let safe = SafeTypes::new([TypeTag::Int, TypeTag::Object]);
        assert!(!safe.contains(TypeTag::Object));
        assert!(safe.contains(TypeTag::Int));
    }

    #[test]
    fn test_type_tag_serde() {
        let json = serde_json::to_string(&TypeTag::Frozenset).unwrap();
        assert_eq!(json, "\"frozenset\"");
    }
}
