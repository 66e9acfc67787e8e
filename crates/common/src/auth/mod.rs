//! Authentication and authorization utilities
//!
//! Provides:
//! - JWT token generation and validation
//! - Per-request identity extraction (`AuthContext`)
//! - Permission and role checks against the token claims
//! - Password hashing

use crate::db::models::{Permission, Role, User};
use crate::errors::{AppError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Role names
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const LECTURER: &str = "lecturer";
    pub const STUDENT: &str = "student";
}

/// Permission resources and actions
pub mod perms {
    pub const ACHIEVEMENTS: &str = "achievements";
    pub const USERS: &str = "users";
    pub const STATISTICS: &str = "statistics";

    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const READ_ALL: &str = "read_all";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const VERIFY: &str = "verify";
    pub const MANAGE: &str = "manage";
}

/// Role to permission grants installed by the seed migration
pub const DEFAULT_GRANTS: &[(&str, &[(&str, &str)])] = &[
    (
        roles::ADMIN,
        &[
            (perms::ACHIEVEMENTS, perms::READ),
            (perms::ACHIEVEMENTS, perms::READ_ALL),
            (perms::USERS, perms::MANAGE),
            (perms::STATISTICS, perms::READ),
            (perms::STATISTICS, perms::READ_ALL),
        ],
    ),
    (
        roles::LECTURER,
        &[
            (perms::ACHIEVEMENTS, perms::READ),
            (perms::ACHIEVEMENTS, perms::VERIFY),
            (perms::STATISTICS, perms::READ),
        ],
    ),
    (
        roles::STUDENT,
        &[
            (perms::ACHIEVEMENTS, perms::CREATE),
            (perms::ACHIEVEMENTS, perms::READ),
            (perms::ACHIEVEMENTS, perms::UPDATE),
            (perms::ACHIEVEMENTS, perms::DELETE),
            (perms::STATISTICS, perms::READ),
        ],
    ),
];

/// A (resource, action) pair carried in the token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionClaim {
    pub resource: String,
    pub action: String,
}

impl PermissionClaim {
    pub fn new(resource: &str, action: &str) -> Self {
        Self {
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }
}

impl From<&Permission> for PermissionClaim {
    fn from(p: &Permission) -> Self {
        Self::new(&p.resource, &p.action)
    }
}

/// Extracted authentication context available to handlers
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user_id: Uuid,

    pub username: String,

    pub role_id: Uuid,

    /// Role name, e.g. `student`
    pub role: String,

    /// Permissions granted at token issuance
    pub permissions: Vec<PermissionClaim>,

    /// Request ID for tracing
    #[serde(skip)]
    pub request_id: String,
}

impl AuthContext {
    /// Exact match against the embedded permission set
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.resource == resource && p.action == action)
    }

    /// Require a specific permission, returning error if not present
    pub fn require_permission(&self, resource: &str, action: &str) -> Result<()> {
        if self.has_permission(resource, action) {
            Ok(())
        } else {
            Err(AppError::InsufficientPermissions {
                resource: resource.to_string(),
                action: action.to_string(),
            })
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }

    /// Require one of the given role names
    pub fn require_role(&self, allowed: &[&str]) -> Result<()> {
        if allowed.iter().any(|r| self.has_role(r)) {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: format!("Requires role: {}", allowed.join(" or ")),
            })
        }
    }

    fn from_claims(claims: Claims, request_id: String) -> Result<Self> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;
        let role_id = Uuid::parse_str(&claims.role_id).map_err(|_| AppError::InvalidToken)?;

        Ok(Self {
            user_id,
            username: claims.username,
            role_id,
            role: claims.role,
            permissions: claims.permissions,
            request_id,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    pub username: String,

    pub role_id: String,

    /// Role name
    pub role: String,

    #[serde(default)]
    pub permissions: Vec<PermissionClaim>,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// JWT token manager
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: i64::try_from(expiration_secs).unwrap_or(i64::MAX),
        }
    }

    /// Token lifetime in seconds
    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    /// Issue a token embedding the user's role and permissions
    pub fn generate_token(
        &self,
        user: &User,
        role: &Role,
        permissions: &[Permission],
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::try_seconds(self.expiration_secs).unwrap_or(Duration::hours(72));

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role_id: role.id.to_string(),
            role: role.name.clone(),
            permissions: permissions.iter().map(PermissionClaim::from).collect(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        self.encode_claims(&claims)
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to generate token: {}", e),
        })
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }
}

/// Extract the bearer token from an Authorization header value
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Hash a password into an argon2 PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal {
            message: format!("Failed to hash password: {}", e),
        })
}

/// Check a password against a stored PHC string
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        // Extract request ID
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must be 'Bearer <token>'".to_string(),
        })?;

        let jwt = Arc::<JwtManager>::from_ref(state);
        let claims = jwt.validate_token(token)?;

        AuthContext::from_claims(claims, request_id)
    }
}
