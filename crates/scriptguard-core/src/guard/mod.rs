//! Capability guard runtime.
//!
//! Decides, for every guarded operation a script performs, whether the value
//! is a safe type (the operation proceeds as usual) or a host object that must
//! grant the matching hook.
//!
//! # Modules
//!
//! - [`capability`]: `CapabilityObject`, `Hook`, `HookSet`
//! - [`safe_types`]: `TypeTag` and the immutable `SafeTypes` set
//! - [`runtime`]: `Guards`: attribute, item, write and operator guards
//! - [`name_guard`]: `NameGuard` for binding sites
//! - [`error`]: `GuardViolation` / `GuardOp`

pub mod capability;
pub mod error;
pub mod name_guard;
pub mod runtime;
pub mod safe_types;

pub use capability::{CapabilityObject, Hook, HookResult, HookSet};
pub use error::{GuardOp, GuardViolation};
pub use name_guard::NameGuard;
pub use runtime::Guards;
pub use safe_types::{SafeTypes, TypeTag};
