//! Request-level capability resolution.
//!
//! Handlers never inspect roles directly: the middleware resolves claims into
//! an [`AuthContext`] exactly once and passes it down.

use serde::Serialize;

use crate::{JwtClaims, PrincipalId, Role};

/// Submission tier of a requester; drives job priority.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterTier {
    Standard,
    Privileged,
}

/// Typed authorization context for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    principal_id: PrincipalId,
    is_admin: bool,
    tier: RequesterTier,
}

impl AuthContext {
    pub fn new(principal_id: PrincipalId, is_admin: bool, tier: RequesterTier) -> Self {
        Self {
            principal_id,
            is_admin,
            tier,
        }
    }

    /// Derive capabilities from validated claims.
    ///
    /// Admins are always treated as privileged submitters.
    pub fn resolve(claims: &JwtClaims) -> Self {
        let is_admin = claims.roles.iter().any(|r| *r == Role::ADMIN);
        let privileged = is_admin || claims.roles.iter().any(|r| *r == Role::PRIVILEGED);

        Self {
            principal_id: claims.sub,
            is_admin,
            tier: if privileged {
                RequesterTier::Privileged
            } else {
                RequesterTier::Standard
            },
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn tier(&self) -> RequesterTier {
        self.tier
    }

    /// Whether this caller may see a resource requested by `owner`.
    ///
    /// Resources without a recorded owner are operator-only.
    pub fn can_access(&self, owner: Option<PrincipalId>) -> bool {
        self.is_admin || owner == Some(self.principal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn claims_with(roles: Vec<Role>) -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: PrincipalId::new(),
            roles,
            issued_at: now,
            expires_at: now + Duration::minutes(5),
        }
    }

    #[test]
    fn plain_user_is_standard_tier() {
        let ctx = AuthContext::resolve(&claims_with(vec![Role::new("student")]));
        assert!(!ctx.is_admin());
        assert_eq!(ctx.tier(), RequesterTier::Standard);
    }

    #[test]
    fn privileged_role_elevates_tier_only() {
        let ctx = AuthContext::resolve(&claims_with(vec![Role::PRIVILEGED]));
        assert!(!ctx.is_admin());
        assert_eq!(ctx.tier(), RequesterTier::Privileged);
    }

    #[test]
    fn admin_is_privileged_and_can_access_anything() {
        let ctx = AuthContext::resolve(&claims_with(vec![Role::ADMIN]));
        assert!(ctx.is_admin());
        assert_eq!(ctx.tier(), RequesterTier::Privileged);
        assert!(ctx.can_access(None));
        assert!(ctx.can_access(Some(PrincipalId::new())));
    }

    #[test]
    fn owner_can_access_own_resources_only() {
        let ctx = AuthContext::resolve(&claims_with(vec![]));
        assert!(ctx.can_access(Some(ctx.principal_id())));
        assert!(!ctx.can_access(Some(PrincipalId::new())));
        assert!(!ctx.can_access(None));
    }
}
