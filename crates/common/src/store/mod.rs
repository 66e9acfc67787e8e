//! Persistence seams
//!
//! Every component talks to the two stores through these traits. The
//! production backends live in [`crate::db`] (sea-orm over PostgreSQL); the
//! in-memory backends in [`memory`] carry failure switches for tests.
//!
//! The document store and the relational store never share a transaction.

pub mod memory;

use crate::db::models::{
    AchievementContent, AchievementReference, AchievementStatus, AchievementType, Lecturer,
    Notification, Permission, Role, Student, User,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Value types
// ============================================================================

/// Page request, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub per_page: u64,
}

impl Page {
    pub const DEFAULT_PER_PAGE: u64 = 10;
    pub const MAX_PER_PAGE: u64 = 100;

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Page {
    /// Validate raw query values, applying defaults for missing ones
    pub fn from_query(page: Option<u64>, per_page: Option<u64>) -> Result<Self> {
        let page = page.unwrap_or(1);
        let per_page = per_page.unwrap_or(Self::DEFAULT_PER_PAGE);

        if page < 1 {
            return Err(AppError::validation("page", "page must be at least 1"));
        }
        if !(1..=Self::MAX_PER_PAGE).contains(&per_page) {
            return Err(AppError::validation(
                "per_page",
                format!("per_page must be between 1 and {}", Self::MAX_PER_PAGE),
            ));
        }
        // The offset must fit in a signed 64-bit SQL OFFSET
        let fits = (page - 1)
            .checked_mul(per_page)
            .is_some_and(|offset| offset <= i64::MAX as u64);
        if !fits {
            return Err(AppError::validation("page", "page is out of range"));
        }

        Ok(Self { page, per_page })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: Self::DEFAULT_PER_PAGE,
        }
    }
}

/// One page of results with its position in the whole set
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl<T> Paged<T> {
    pub fn new(data: Vec<T>, page: Page, total: u64) -> Self {
        Self {
            data,
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages: total.div_ceil(page.per_page.max(1)),
        }
    }

    /// Slice an already materialized result set
    pub fn from_all(all: Vec<T>, page: Page) -> Self {
        let total = all.len() as u64;
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.per_page).unwrap_or(usize::MAX);
        let data = all.into_iter().skip(offset).take(limit).collect();
        Self::new(data, page, total)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            data: self.data.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            total_pages: self.total_pages,
        }
    }
}

/// Content to insert; the store mints the id and timestamps
#[derive(Debug, Clone)]
pub struct NewContent {
    pub student_id: Uuid,
    pub achievement_type: AchievementType,
    pub title: String,
    pub description: String,
    pub details: serde_json::Value,
    pub tags: Vec<String>,
}

/// Column values written together with a status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: AchievementStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<Uuid>,
    pub rejection_note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Relational filter over achievement references
#[derive(Debug, Clone, Default)]
pub struct ReferenceFilter {
    /// `None` matches every student; `Some(vec![])` matches none
    pub student_ids: Option<Vec<Uuid>>,
    pub status: Option<AchievementStatus>,
    pub exclude_deleted: bool,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<DateTime<Utc>>,
}

impl ReferenceFilter {
    pub fn matches(&self, reference: &AchievementReference) -> bool {
        if let Some(ids) = &self.student_ids {
            if !ids.contains(&reference.student_id) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if reference.status != status {
                return false;
            }
        }
        if self.exclude_deleted && reference.status == AchievementStatus::Deleted {
            return false;
        }
        if let Some(from) = self.created_from {
            if reference.created_at < from {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if reference.created_at >= before {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role_id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub user_id: Uuid,
    pub student_number: String,
    pub program_study: String,
    pub academic_year: String,
    pub advisor_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewLecturer {
    pub user_id: Uuid,
    pub lecturer_number: String,
    pub department: String,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: String,
}

// ============================================================================
// Traits
// ============================================================================

/// Document store holding achievement content
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert a document and return it with its minted id
    async fn insert_content(&self, content: NewContent) -> Result<AchievementContent>;

    /// Fetch a document unless it is soft-deleted
    async fn find_live_content(&self, id: &str) -> Result<Option<AchievementContent>>;

    /// Batch fetch, soft-deleted documents and unknown ids are skipped
    async fn find_live_contents(&self, ids: &[String]) -> Result<Vec<AchievementContent>>;

    /// Set or clear the soft-delete marker. Returns false when the id is unknown.
    async fn set_content_deleted(&self, id: &str, deleted: bool) -> Result<bool>;

    /// Physically remove a document. Only used to compensate a failed submit.
    async fn remove_content(&self, id: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Users, roles, permissions and academic profiles
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    // -- Users --
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    /// Match on username or email
    async fn find_user_by_credential(&self, credential: &str) -> Result<Option<User>>;
    async fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>>;
    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64)>;
    /// Fails with `Duplicate` when the username or email is taken
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>>;

    // -- Roles & permissions --
    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;
    async fn list_roles(&self) -> Result<Vec<Role>>;
    async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>>;

    // -- Students --
    async fn find_student_by_id(&self, id: Uuid) -> Result<Option<Student>>;
    async fn find_student_by_user(&self, user_id: Uuid) -> Result<Option<Student>>;
    async fn find_students_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Student>>;
    async fn list_students_by_advisor(&self, lecturer_id: Uuid) -> Result<Vec<Student>>;
    async fn create_student(&self, student: NewStudent) -> Result<Student>;
    /// Returns false when the student does not exist
    async fn set_student_advisor(&self, student_id: Uuid, lecturer_id: Uuid) -> Result<bool>;

    // -- Lecturers --
    async fn find_lecturer_by_id(&self, id: Uuid) -> Result<Option<Lecturer>>;
    async fn find_lecturer_by_user(&self, user_id: Uuid) -> Result<Option<Lecturer>>;
    async fn create_lecturer(&self, lecturer: NewLecturer) -> Result<Lecturer>;

    async fn ping(&self) -> Result<()>;
}

/// Lifecycle records of achievements
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn insert_reference(&self, reference: AchievementReference)
        -> Result<AchievementReference>;

    async fn find_reference(&self, id: Uuid) -> Result<Option<AchievementReference>>;

    /// Every match, newest first
    async fn list_references(&self, filter: &ReferenceFilter)
        -> Result<Vec<AchievementReference>>;

    /// `UPDATE ... WHERE id = $id AND status = $expected`, returns rows affected
    async fn update_reference_status(
        &self,
        id: Uuid,
        expected: AchievementStatus,
        change: StatusChange,
    ) -> Result<u64>;
}

/// Notification rows
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;

    /// Newest first
    async fn list_notifications(&self, user_id: Uuid, unread_only: bool)
        -> Result<Vec<Notification>>;

    /// Returns false unless a notification with that id belongs to the user
    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool>;
}

/// Everything that lives in the relational database
pub trait RelationalStore: DirectoryStore + ReferenceStore + NotificationStore {}

impl<T> RelationalStore for T where T: DirectoryStore + ReferenceStore + NotificationStore {}
