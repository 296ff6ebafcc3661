//! Authorization: scope grammar, the action gate and identity resolution.
//!
//! # Responsibility
//! - Parse actor scopes into a typed set.
//! - Decide whether a scope set admits an action type for a record type.
//!
//! # Invariants
//! - The gate is stateless and never consults the ledger.
//! - Every action type has a coarse and a configurable entry; a gate cannot be
//!   built from an incomplete table.

pub mod gate;
pub mod identity;
pub mod scope;

pub use gate::{AuthorizationGate, GateConfigError, ScopeContext, ScopeTable};
pub use identity::{
    Actor, IdentityError, IdentityProvider, StaticIdentity, StaticIdentityProvider,
};
pub use scope::{parse_scope, Scope, ScopeName, ScopeParseError, ScopeSet};
