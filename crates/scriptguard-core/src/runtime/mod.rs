//! Script evaluation.
//!
//! # Modules
//!
//! - [`value`]: `Value` and the helper structs it carries
//! - [`table`]: insertion-ordered hash tables behind dict and set
//! - [`ops`]: operators, comparison, indexing, iteration
//! - [`methods`]: methods of the safe built-in types
//! - [`builtins`]: the built-in functions and guard hooks
//! - [`modules`]: `math`, `random` and `string`
//! - [`interpreter`]: the tree-walking evaluator
//! - [`exception`]: `ScriptException` and the `Unwind` signal

pub mod args;
pub mod builtins;
pub mod exception;
pub mod format;
pub mod interpreter;
pub mod methods;
pub mod modules;
pub mod ops;
pub mod output;
pub mod table;
pub mod value;

pub use builtins::{Builtin, GuardHook};
pub use exception::{ExceptionKind, Exec, Location, ScriptException, Unwind};
pub use interpreter::Interpreter;
pub use output::OutputCollector;
pub use table::{Dict, HashKey, SetTable};
pub use value::{ModuleKind, Value};
