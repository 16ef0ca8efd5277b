//! Channel naming and access predicates (spec.md §3, §4.5).

use crate::auth::{Principal, Role};

/// Whether `endpoint.auth_required` gates access to channels that don't
/// match a reserved prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAccessContext {
    pub auth_required: bool,
}

/// Evaluate the access predicate implied by a channel name's prefix.
///
/// Grounded on the teacher's room-membership checks in
/// `websocket::rooms::RoomManager`, generalized from "is a member" to
/// "may become a member" per the prefix table in spec.md §4.5.
pub fn is_allowed(channel: &str, principal: &Principal, ctx: ChannelAccessContext) -> bool {
    if let Some(rest) = channel.strip_prefix("public.") {
        let _ = rest;
        return true;
    }

    if let Some(wallet_id) = channel.strip_prefix("user.") {
        return principal.wallet_id() == Some(wallet_id);
    }

    if channel.starts_with("superadmin.") {
        return principal.role().map(Role::is_superadmin).unwrap_or(false);
    }

    if channel.starts_with("admin.") {
        return principal.role().map(Role::is_admin_or_above).unwrap_or(false);
    }

    if ctx.auth_required {
        principal.is_authenticated()
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(auth_required: bool) -> ChannelAccessContext {
        ChannelAccessContext { auth_required }
    }

    #[test]
    fn public_channel_is_always_allowed() {
        assert!(is_allowed("public.tokens", &Principal::Anonymous, ctx(true)));
    }

    #[test]
    fn user_channel_requires_matching_wallet() {
        let principal = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::User,
        };
        assert!(is_allowed("user.0xabc", &principal, ctx(true)));
        assert!(!is_allowed("user.0xdef", &principal, ctx(true)));
        assert!(!is_allowed("user.0xabc", &Principal::Anonymous, ctx(true)));
    }

    #[test]
    fn admin_channel_requires_admin_or_above() {
        let user = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::User,
        };
        let admin = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::Admin,
        };
        assert!(!is_allowed("admin.services", &user, ctx(true)));
        assert!(is_allowed("admin.services", &admin, ctx(true)));
    }

    #[test]
    fn superadmin_channel_requires_superadmin() {
        let admin = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::Admin,
        };
        let superadmin = Principal::Identified {
            wallet_id: "0xabc".into(),
            role: Role::SuperAdmin,
        };
        assert!(!is_allowed("superadmin.ops", &admin, ctx(true)));
        assert!(is_allowed("superadmin.ops", &superadmin, ctx(true)));
    }

    #[test]
    fn other_channel_follows_endpoint_auth_requirement() {
        assert!(!is_allowed("trades.0xabc", &Principal::Anonymous, ctx(true)));
        assert!(is_allowed("trades.0xabc", &Principal::Anonymous, ctx(false)));
    }
}
