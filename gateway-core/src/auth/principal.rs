//! Principal and role types attached to a connection (spec.md §3).

use serde::{Deserialize, Serialize};

/// Role ordering matters for the channel access predicates in
/// [`crate::engine::channel`] — `Admin` implies everything `User` can
/// reach, `SuperAdmin` implies everything `Admin` can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin_or_above(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn is_superadmin(self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            "superadmin" | "super_admin" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

/// Either anonymous or a resolved `{wallet_id, role}` pair, immutable
/// after the connection reaches `established` (spec.md §8, invariant 7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    Anonymous,
    Identified { wallet_id: String, role: Role },
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::Identified { .. })
    }

    pub fn wallet_id(&self) -> Option<&str> {
        match self {
            Principal::Anonymous => None,
            Principal::Identified { wallet_id, .. } => Some(wallet_id),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Principal::Anonymous => None,
            Principal::Identified { role, .. } => Some(*role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_ranks_superadmin_highest() {
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::User);
    }

    #[test]
    fn anonymous_is_not_authenticated() {
        assert!(!Principal::Anonymous.is_authenticated());
    }

    #[test]
    fn identified_exposes_wallet_and_role() {
        let p = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::Admin,
        };
        assert!(p.is_authenticated());
        assert_eq!(p.wallet_id(), Some("0xabc"));
        assert_eq!(p.role(), Some(Role::Admin));
    }
}
