//! Caller identity asserted by the upstream authentication layer.
//!
//! The gateway in front of this service authenticates the session and
//! forwards `x-user-id` and `x-user-role`. Handlers take a [`Caller`] and
//! check the role they need.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::fmt;

use crate::error::{AccessError, AppError, AppErrorKind};
use crate::middleware::error::get_request_id_from_headers;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Farmer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Farmer => "farmer",
            Role::Admin => "admin",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" => Some(Role::Buyer),
            "farmer" => Some(Role::Farmer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: i32,
    pub role: Role,
    pub request_id: Option<String>,
}

impl Caller {
    /// Reject callers without `role`
    pub fn require(&self, role: Role) -> Result<(), AppError> {
        self.require_any(&[role])
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.role) {
            return Ok(());
        }
        let required = roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(" or ");
        Err(self.tag(AppError::new(AppErrorKind::Access(AccessError::Forbidden {
            required_role: required,
        }))))
    }

    /// Attach this request's id to an error
    pub fn tag(&self, error: AppError) -> AppError {
        match &self.request_id {
            Some(id) => error.with_request_id(id.clone()),
            None => error,
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = get_request_id_from_headers(&parts.headers);
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let user_id = header(USER_ID_HEADER).and_then(|v| v.trim().parse::<i32>().ok());
        let role = header(USER_ROLE_HEADER).and_then(|v| Role::parse(&v));

        match (user_id, role) {
            (Some(user_id), Some(role)) => Ok(Caller {
                user_id,
                role,
                request_id,
            }),
            _ => {
                let error = AppError::new(AppErrorKind::Access(AccessError::Unauthenticated));
                Err(match request_id {
                    Some(id) => error.with_request_id(id),
                    None => error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<Caller, AppError> {
        let (mut parts, _) = request.into_parts();
        Caller::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn identity_headers_are_required() {
        let err = extract(Request::builder().body(()).unwrap()).await.unwrap_err();
        assert_eq!(err.status_code(), 401);

        let err = extract(
            Request::builder()
                .header(USER_ID_HEADER, "7")
                .header(USER_ROLE_HEADER, "superuser")
                .body(())
                .unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn wrong_role_is_forbidden() {
        let caller = extract(
            Request::builder()
                .header(USER_ID_HEADER, "7")
                .header(USER_ROLE_HEADER, "Buyer")
                .header("x-request-id", "req-1")
                .body(())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(caller.role, Role::Buyer);
        assert!(caller.require(Role::Buyer).is_ok());
        let err = caller.require(Role::Admin).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert!(caller.require_any(&[Role::Buyer, Role::Farmer]).is_ok());
    }
}
