//! Authentication for HTTP actors and channel connections

pub mod jwt;

pub use jwt::{
    extract_token_from_header, extract_token_from_query, Claims, JwtValidator,
    TokenValidationResult,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::PulseError;

/// Role carried in the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Citizen,
    /// Municipal staff, may change issue status
    Official,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Citizen => write!(f, "citizen"),
            Role::Official => write!(f, "official"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Caller identity resolved from a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn require(&self, level: Role) -> Result<(), PulseError> {
        if self.role >= level {
            Ok(())
        } else {
            Err(PulseError::Forbidden(format!(
                "{} role required, caller is {}",
                level, self.role
            )))
        }
    }
}

/// Resolve the caller from an Authorization header value
pub fn authenticate(jwt: &JwtValidator, auth_header: Option<&str>) -> Result<Actor, PulseError> {
    let token = extract_token_from_header(auth_header)
        .ok_or_else(|| PulseError::Unauthorized("Missing bearer token".into()))?;
    identify(jwt, token).ok_or_else(|| PulseError::Unauthorized("Invalid or expired token".into()))
}

/// Actor for a raw token, None when it does not validate
pub fn identify(jwt: &JwtValidator, token: &str) -> Option<Actor> {
    let result = jwt.verify_token(token);
    result.claims.filter(|_| result.valid).map(|c| Actor {
        user_id: c.sub,
        role: c.role,
    })
}
