//! Role hierarchy guard
//!
//! Roles carry a numeric rank (`sort`); lower ranks are more privileged and
//! rank 1 is unrestricted. An actor may only affect roles and users it
//! strictly outranks.

use thiserror::Error;

use crate::engine::models::Role;

/// Rank of the unrestricted administrator roles.
pub const SUPER_ROLE_RANK: u32 = 1;

/// Rank given to targets that hold no role at all.
pub const LEAST_PRIVILEGED_RANK: u32 = u32::MAX;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Current user has no active role")]
    NoActiveRole,
    #[error("Cannot {action}: rank {actor_rank} does not outrank {target_rank}")]
    Escalation {
        action: &'static str,
        actor_rank: u32,
        target_rank: u32,
    },
    #[error("Cannot assign {kind} {item}: not held by the current user")]
    NotHeld { kind: &'static str, item: String },
    #[error("Cannot {0} on the current user")]
    SelfMutation(&'static str),
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::NoActiveRole => "no_active_role",
            GuardError::Escalation { .. } => "escalation",
            GuardError::NotHeld { .. } => "not_held",
            GuardError::SelfMutation(_) => "self_mutation",
        }
    }
}

/// Minimum rank among the active roles.
pub fn privilege_rank(roles: &[Role]) -> Result<u32, GuardError> {
    roles
        .iter()
        .filter(|r| r.status.is_active())
        .map(|r| r.sort)
        .min()
        .ok_or(GuardError::NoActiveRole)
}

/// Minimum rank among all roles of a target, active or not.
pub fn target_rank(roles: &[Role]) -> u32 {
    roles.iter().map(|r| r.sort).min().unwrap_or(LEAST_PRIVILEGED_RANK)
}

pub fn can_act_on(actor_rank: u32, target_rank: u32) -> bool {
    actor_rank == SUPER_ROLE_RANK || actor_rank < target_rank
}

/// An actor's resolved standing in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privilege {
    pub rank: u32,
    pub unrestricted: bool,
}

impl Privilege {
    pub fn resolve(roles: &[Role]) -> Result<Self, GuardError> {
        let rank = privilege_rank(roles)?;
        Ok(Self {
            rank,
            unrestricted: rank == SUPER_ROLE_RANK,
        })
    }

    pub fn can_act_on(&self, target_rank: u32) -> bool {
        self.unrestricted || self.rank < target_rank
    }

    pub fn ensure_can_act_on(&self, action: &'static str, target_rank: u32) -> Result<(), GuardError> {
        if self.can_act_on(target_rank) {
            Ok(())
        } else {
            Err(GuardError::Escalation {
                action,
                actor_rank: self.rank,
                target_rank,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::Status;

    fn role(sort: u32, status: Status) -> Role {
        Role {
            id: sort as i64,
            name: format!("r{}", sort),
            keyword: format!("r{}", sort),
            description: None,
            status,
            sort,
            creator: "system".into(),
        }
    }

    #[test]
    fn test_rank_ignores_disabled_roles() {
        let roles = vec![role(2, Status::Disabled), role(3, Status::Active), role(5, Status::Active)];
        assert_eq!(privilege_rank(&roles), Ok(3));
        assert_eq!(target_rank(&roles), 2);
        assert_eq!(privilege_rank(&[role(2, Status::Disabled)]), Err(GuardError::NoActiveRole));
        assert_eq!(target_rank(&[]), LEAST_PRIVILEGED_RANK);
    }

    #[test]
    fn test_strict_ordering() {
        assert!(can_act_on(2, 3));
        assert!(!can_act_on(3, 3));
        assert!(!can_act_on(3, 2));
        assert!(can_act_on(1, 1));
    }

    #[test]
    fn test_unrestricted_bypass() {
        let admin = Privilege::resolve(&[role(1, Status::Active)]).unwrap();
        assert!(admin.unrestricted);
        assert!(admin.ensure_can_act_on("create role", 1).is_ok());

        let user = Privilege::resolve(&[role(3, Status::Active)]).unwrap();
        let err = user.ensure_can_act_on("create role", 2).unwrap_err();
        assert_eq!(err.code(), "escalation");
        assert!(user.ensure_can_act_on("create role", 4).is_ok());
    }
}
