//! scriptguard core library
//!
//! Runs untrusted control scripts inside a host process. Disallowed syntax
//! is rejected at compile time by the policy transformer; every attribute,
//! item and operator access that survives is mediated at run time by the
//! capability guards.
//!
//! ```ignore
//! let executor = SandboxExecutor::default();
//! let run = executor.run("def add(a, b):\n    return a + b\n", "add", vec![Value::Int(2), Value::Int(3)])?;
//! ```

pub mod compile;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod metrics;
pub mod namespace;
pub mod obs;
pub mod policy;
pub mod runtime;
mod stack;
pub mod syntax;
pub mod telemetry;

/// Crate version, kept in step with the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{NamespaceConfig, PolicyConfig, SandboxConfig};
pub use error::{SandboxError, SandboxResult, ScriptFault};
pub use executor::{Execution, Invocation, SandboxExecutor, Stage};
pub use guard::{
    CapabilityObject, GuardOp, GuardViolation, Guards, Hook, HookResult, HookSet, NameGuard,
    SafeTypes, TypeTag,
};
pub use namespace::{GuardedNamespace, NamespaceBuilder};
pub use runtime::{ExceptionKind, ScriptException, Value};
pub use syntax::{Diagnostic, Span};
pub use telemetry::init_tracing;
