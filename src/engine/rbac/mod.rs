//! RBAC Module
//!
//! Policy store, role hierarchy guard, policy synchronizer and the
//! request-level authorizer

pub mod enforcer;
pub mod hierarchy;
pub mod policy;
pub mod sync;

pub use enforcer::{Authorizer, AuthzError};
pub use hierarchy::{can_act_on, privilege_rank, target_rank, GuardError, Privilege, SUPER_ROLE_RANK};
pub use policy::{PolicyAdapter, PolicyError, PolicyRule, PolicyStore, RuleSet, SqlitePolicyAdapter, SyncStep};
pub use sync::{PolicySynchronizer, SyncError, SyncSession};
