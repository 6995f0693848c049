//! Caller identity and role gating.
//!
//! Authentication itself happens upstream (the auth proxy terminates the
//! session and forwards the verified identity as headers). This module only
//! extracts that identity and enforces per-operation role checks.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::error::AppError;

const USER_ID_HEADER: &str = "x-user-id";
const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    Security,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "manager" => Some(Role::Manager),
            "security" => Some(Role::Security),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    /// Roles allowed to operate the check-in gate.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager | Role::Security)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "This action requires staff privileges".to_string(),
            ))
        }
    }

    /// Owners see their own orders; staff see everything. The error does not
    /// reveal whether the order exists.
    pub fn require_order_access(&self, owner_id: Uuid) -> Result<(), AppError> {
        if self.user_id == owner_id || self.role.is_staff() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You do not have access to this order".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| AppError::AuthError("Missing or invalid user identity".to_string()))?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .unwrap_or(Role::User);

        Ok(AuthContext { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_pass_the_gate() {
        for role in [Role::Admin, Role::Manager, Role::Security] {
            let ctx = AuthContext {
                user_id: Uuid::new_v4(),
                role,
            };
            assert!(ctx.require_staff().is_ok());
        }
    }

    #[test]
    fn buyers_are_not_staff() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::User,
        };
        assert!(ctx.require_staff().is_err());
    }

    #[test]
    fn owner_and_staff_can_access_an_order() {
        let owner = Uuid::new_v4();
        let ctx = AuthContext {
            user_id: owner,
            role: Role::User,
        };
        assert!(ctx.require_order_access(owner).is_ok());
        assert!(ctx.require_order_access(Uuid::new_v4()).is_err());

        let staff = AuthContext {
            user_id: Uuid::new_v4(),
            role: Role::Security,
        };
        assert!(staff.require_order_access(owner).is_ok());
    }

    #[test]
    fn unknown_roles_parse_to_none() {
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse("security"), Some(Role::Security));
    }
}
