//! Identifier rules shared by the transformer, the namespace and the executor.

use std::sync::OnceLock;

use regex::Regex;

/// Character that marks privileged names when it leads or trails an identifier.
pub const RESERVED_MARKER: char = '_';

/// Call names a visual block editor emits around generated statements.
pub const DEFAULT_STATEMENT_MARKERS: &[&str] =
    &["_begin_blockly_statement_", "_end_blockly_statement_"];

/// Dynamic-code primitives whose direct call is rejected at compile time.
pub const DEFAULT_DENIED_CALLS: &[&str] = &["exec", "eval", "compile"];

/// Names under which the guard hooks are registered in the namespace.
pub const GUARD_HOOK_NAMES: &[&str] = &[
    "_getattr_",
    "_getitem_",
    "_write_",
    "_check_assign_name_",
    "_check_unary_op_allowed_",
    "_check_binary_op_allowed_",
    "_check_bool_op_allowed_",
    "_check_compare_allowed_",
];

/// True if `name` starts or ends with the reserved marker.
pub fn is_privileged(name: &str) -> bool {
    name.starts_with(RESERVED_MARKER) || name.ends_with(RESERVED_MARKER)
}

/// Strict pattern for entry-function and parameter names supplied by a host.
pub fn is_entry_identifier(name: &str) -> bool {
    static ENTRY: OnceLock<Regex> = OnceLock::new();
    ENTRY
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"))
        .is_match(name)
}

/// Any syntactically valid identifier, including privileged ones.
pub fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
        .is_match(name)
}
