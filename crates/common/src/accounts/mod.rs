//! Accounts: login, token refresh and administration
//!
//! Administration covers users, roles and the student/lecturer profiles
//! that link an account to the verification workflow.

use crate::auth::{hash_password, roles, verify_password, AuthContext, JwtManager};
use crate::db::models::{Lecturer, Role, Student, User};
use crate::errors::{AppError, Result};
use crate::store::{
    NewLecturer, NewStudent, NewUser, Page, Paged, RelationalStore, UserUpdate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Requests & responses
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    /// Username or email
    #[validate(length(min = 1, max = 255))]
    pub credential: String,

    #[validate(length(min = 1, max = 255))]
    pub password: String,
}

/// Identity returned with every issued token
#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    /// `resource:action` names
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub profile: Profile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 128))]
    pub password: String,

    #[validate(length(min = 1, max = 255))]
    pub full_name: String,

    /// Role name
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub full_name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    pub role: Option<String>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateStudentRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, max = 50))]
    pub student_number: String,

    #[validate(length(min = 1, max = 255))]
    pub program_study: String,

    #[validate(length(min = 1, max = 20))]
    pub academic_year: String,

    /// Lecturer profile id
    pub advisor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLecturerRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, max = 50))]
    pub lecturer_number: String,

    #[validate(length(min = 1, max = 255))]
    pub department: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetAdvisorRequest {
    pub advisor_id: Uuid,
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct AccountsService {
    directory: Arc<dyn RelationalStore>,
    jwt: Arc<JwtManager>,
}

impl AccountsService {
    pub fn new(directory: Arc<dyn RelationalStore>, jwt: Arc<JwtManager>) -> Self {
        Self { directory, jwt }
    }

    /// Exchange a credential and password for a token
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        request.validate()?;

        let credential = request.credential.trim();
        let user = match self.directory.find_user_by_credential(credential).await? {
            Some(user) if verify_password(&request.password, &user.password_hash) => user,
            _ => {
                warn!(credential = %credential, "Failed login attempt");
                return Err(invalid_credentials());
            }
        };
        if !user.is_active {
            warn!(user_id = %user.id, "Login attempt on disabled account");
            return Err(AppError::Unauthorized {
                message: "account disabled".to_string(),
            });
        }

        let response = self.issue(user).await?;
        info!(user_id = %response.profile.user_id, role = %response.profile.role, "User logged in");
        Ok(response)
    }

    /// Re-read role and permissions and issue a fresh token
    pub async fn refresh(&self, auth: &AuthContext) -> Result<LoginResponse> {
        let user = self
            .directory
            .find_user_by_id(auth.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::Unauthorized {
                message: "account disabled".to_string(),
            })?;
        self.issue(user).await
    }

    async fn issue(&self, user: User) -> Result<LoginResponse> {
        let role = self
            .directory
            .find_role_by_id(user.role_id)
            .await?
            .ok_or_else(|| AppError::Internal {
                message: format!("role {} of user {} does not exist", user.role_id, user.id),
            })?;
        let permissions = self.directory.permissions_for_role(role.id).await?;

        let token = self.jwt.generate_token(&user, &role, &permissions)?;

        Ok(LoginResponse {
            token,
            token_type: "Bearer",
            expires_in: self.jwt.expiration_secs(),
            profile: Profile {
                user_id: user.id,
                username: user.username,
                full_name: user.full_name,
                email: user.email,
                role: role.name,
                permissions: permissions.into_iter().map(|p| p.name).collect(),
            },
        })
    }

    // -- Administration --

    pub async fn list_users(&self, auth: &AuthContext, query: &PageQuery) -> Result<Paged<User>> {
        let page = Page::from_query(query.page, query.per_page)?;
        require_admin(auth)?;

        let (users, total) = self.directory.list_users(page).await?;
        Ok(Paged::new(users, page, total))
    }

    pub async fn create_user(&self, auth: &AuthContext, request: CreateUserRequest) -> Result<User> {
        request.validate()?;
        require_admin(auth)?;

        let role = self.role_named(&request.role).await?;
        let user = self
            .directory
            .create_user(NewUser {
                username: request.username.trim().to_string(),
                email: request.email.trim().to_lowercase(),
                password_hash: hash_password(&request.password)?,
                full_name: request.full_name.trim().to_string(),
                role_id: role.id,
            })
            .await?;

        info!(user_id = %user.id, role = %role.name, admin = %auth.user_id, "User created");
        Ok(user)
    }

    pub async fn update_user(
        &self,
        auth: &AuthContext,
        id: Uuid,
        request: UpdateUserRequest,
    ) -> Result<User> {
        request.validate()?;
        require_admin(auth)?;

        let role_id = match request.role.as_deref() {
            Some(name) => Some(self.role_named(name).await?.id),
            None => None,
        };

        let update = UserUpdate {
            full_name: request.full_name.map(|n| n.trim().to_string()),
            email: request.email.map(|e| e.trim().to_lowercase()),
            role_id,
            is_active: request.is_active,
        };
        self.directory
            .update_user(id, update)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }

    /// Accounts are never removed, only deactivated
    pub async fn deactivate_user(&self, auth: &AuthContext, id: Uuid) -> Result<User> {
        require_admin(auth)?;
        if id == auth.user_id {
            return Err(AppError::validation("id", "administrators cannot deactivate themselves"));
        }

        let update = UserUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        let user = self
            .directory
            .update_user(id, update)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))?;

        info!(user_id = %id, admin = %auth.user_id, "User deactivated");
        Ok(user)
    }

    pub async fn list_roles(&self, auth: &AuthContext) -> Result<Vec<Role>> {
        require_admin(auth)?;
        self.directory.list_roles().await
    }

    pub async fn create_student(
        &self,
        auth: &AuthContext,
        request: CreateStudentRequest,
    ) -> Result<Student> {
        request.validate()?;
        require_admin(auth)?;

        self.existing_user(request.user_id).await?;
        if let Some(advisor_id) = request.advisor_id {
            self.existing_lecturer(advisor_id).await?;
        }

        self.directory
            .create_student(NewStudent {
                user_id: request.user_id,
                student_number: request.student_number.trim().to_string(),
                program_study: request.program_study.trim().to_string(),
                academic_year: request.academic_year.trim().to_string(),
                advisor_id: request.advisor_id,
            })
            .await
    }

    pub async fn create_lecturer(
        &self,
        auth: &AuthContext,
        request: CreateLecturerRequest,
    ) -> Result<Lecturer> {
        request.validate()?;
        require_admin(auth)?;

        self.existing_user(request.user_id).await?;

        self.directory
            .create_lecturer(NewLecturer {
                user_id: request.user_id,
                lecturer_number: request.lecturer_number.trim().to_string(),
                department: request.department.trim().to_string(),
            })
            .await
    }

    /// Replace the advisor of a student
    pub async fn set_advisor(
        &self,
        auth: &AuthContext,
        student_id: Uuid,
        request: SetAdvisorRequest,
    ) -> Result<Student> {
        require_admin(auth)?;
        self.existing_lecturer(request.advisor_id).await?;

        if !self
            .directory
            .set_student_advisor(student_id, request.advisor_id)
            .await?
        {
            return Err(AppError::not_found("student", student_id));
        }

        info!(student_id = %student_id, advisor_id = %request.advisor_id, "Advisor assigned");
        self.directory
            .find_student_by_id(student_id)
            .await?
            .ok_or_else(|| AppError::not_found("student", student_id))
    }

    async fn role_named(&self, name: &str) -> Result<Role> {
        self.directory
            .find_role_by_name(name.trim())
            .await?
            .ok_or_else(|| AppError::validation("role", format!("unknown role '{}'", name)))
    }

    async fn existing_user(&self, id: Uuid) -> Result<User> {
        self.directory
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("user", id))
    }

    async fn existing_lecturer(&self, id: Uuid) -> Result<Lecturer> {
        self.directory
            .find_lecturer_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("lecturer", id))
    }
}

fn require_admin(auth: &AuthContext) -> Result<()> {
    auth.require_role(&[roles::ADMIN])
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized {
        message: "invalid credentials".to_string(),
    }
}
