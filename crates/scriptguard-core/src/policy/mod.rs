//! Policy: compile-time rejection of disallowed syntax and insertion of guard
//! call-sites.
//!
//! # Modules
//!
//! - [`names`]: privileged-name rules, statement markers, identifier patterns
//! - [`guarded`]: the guarded IR (`GuardedModule`)
//! - [`transformer`]: `transform()` (aggregated diagnostics)

pub mod guarded;
pub mod names;
pub mod transformer;

pub use guarded::{GuardedModule, OperandCheck, WriteOp};
pub use transformer::transform;
