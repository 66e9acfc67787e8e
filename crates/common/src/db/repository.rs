//! Repository over the relational database
//!
//! Implements the directory, reference and notification store traits
//! with sea-orm. Status changes are single conditional UPDATE statements.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::store::{
    DirectoryStore, NewLecturer, NewNotification, NewStudent, NewUser, NotificationStore, Page,
    ReferenceFilter, ReferenceStore, StatusChange, UserUpdate,
};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
    SqlErr,
};
use uuid::Uuid;

/// Map unique violations to `Duplicate`, everything else stays a database error
fn map_write_err(err: DbErr, what: &str) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::Duplicate {
            message: format!("{} already exists", what),
        },
        _ => AppError::Database(err),
    }
}

/// Repository for relational data access
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl DirectoryStore for Repository {
    // ========================================================================
    // User Operations
    // ========================================================================

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_user_by_credential(&self, credential: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(
                Condition::any()
                    .add(UserColumn::Username.eq(credential))
                    .add(UserColumn::Email.eq(credential)),
            )
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        UserEntity::find()
            .filter(UserColumn::Id.is_in(ids.iter().copied()))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64)> {
        let paginator = UserEntity::find()
            .order_by_desc(UserColumn::CreatedAt)
            .order_by_asc(UserColumn::Id)
            .paginate(self.read_conn(), page.per_page);

        let total = paginator.num_items().await?;
        let users = paginator.fetch_page(page.page.saturating_sub(1)).await?;

        Ok((users, total))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let now = chrono::Utc::now();

        let model = UserActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(user.username),
            email: Set(user.email),
            password_hash: Set(user.password_hash),
            full_name: Set(user.full_name),
            role_id: Set(user.role_id),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model
            .insert(self.write_conn())
            .await
            .map_err(|e| map_write_err(e, "username or email"))
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>> {
        let Some(existing) = UserEntity::find_by_id(id).one(self.write_conn()).await? else {
            return Ok(None);
        };

        let mut model = existing.into_active_model();
        if let Some(full_name) = update.full_name {
            model.full_name = Set(full_name);
        }
        if let Some(email) = update.email {
            model.email = Set(email);
        }
        if let Some(role_id) = update.role_id {
            model.role_id = Set(role_id);
        }
        if let Some(is_active) = update.is_active {
            model.is_active = Set(is_active);
        }
        model.updated_at = Set(chrono::Utc::now());

        model
            .update(self.write_conn())
            .await
            .map(Some)
            .map_err(|e| map_write_err(e, "email"))
    }

    // ========================================================================
    // Role & Permission Operations
    // ========================================================================

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        RoleEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        RoleEntity::find()
            .filter(RoleColumn::Name.eq(name))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        RoleEntity::find()
            .order_by_asc(RoleColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>> {
        PermissionEntity::find()
            .join(
                sea_orm::JoinType::InnerJoin,
                permission::Relation::RolePermissions.def(),
            )
            .filter(RolePermissionColumn::RoleId.eq(role_id))
            .order_by_asc(PermissionColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Student Operations
    // ========================================================================

    async fn find_student_by_id(&self, id: Uuid) -> Result<Option<Student>> {
        StudentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> Result<Option<Student>> {
        StudentEntity::find()
            .filter(StudentColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_students_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Student>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        StudentEntity::find()
            .filter(StudentColumn::Id.is_in(ids.iter().copied()))
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_students_by_advisor(&self, lecturer_id: Uuid) -> Result<Vec<Student>> {
        StudentEntity::find()
            .filter(StudentColumn::AdvisorId.eq(lecturer_id))
            .order_by_asc(StudentColumn::StudentNumber)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn create_student(&self, student: NewStudent) -> Result<Student> {
        let model = StudentActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(student.user_id),
            student_number: Set(student.student_number),
            program_study: Set(student.program_study),
            academic_year: Set(student.academic_year),
            advisor_id: Set(student.advisor_id),
            created_at: Set(chrono::Utc::now()),
        };

        model
            .insert(self.write_conn())
            .await
            .map_err(|e| map_write_err(e, "student profile"))
    }

    async fn set_student_advisor(&self, student_id: Uuid, lecturer_id: Uuid) -> Result<bool> {
        let result = StudentEntity::update_many()
            .col_expr(StudentColumn::AdvisorId, Expr::value(lecturer_id))
            .filter(StudentColumn::Id.eq(student_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Lecturer Operations
    // ========================================================================

    async fn find_lecturer_by_id(&self, id: Uuid) -> Result<Option<Lecturer>> {
        LecturerEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_lecturer_by_user(&self, user_id: Uuid) -> Result<Option<Lecturer>> {
        LecturerEntity::find()
            .filter(LecturerColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn create_lecturer(&self, lecturer: NewLecturer) -> Result<Lecturer> {
        let model = LecturerActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(lecturer.user_id),
            lecturer_number: Set(lecturer.lecturer_number),
            department: Set(lecturer.department),
            created_at: Set(chrono::Utc::now()),
        };

        model
            .insert(self.write_conn())
            .await
            .map_err(|e| map_write_err(e, "lecturer profile"))
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

#[async_trait]
impl ReferenceStore for Repository {
    async fn insert_reference(
        &self,
        reference: AchievementReference,
    ) -> Result<AchievementReference> {
        let model = AchievementReferenceActiveModel {
            id: Set(reference.id),
            student_id: Set(reference.student_id),
            content_id: Set(reference.content_id),
            status: Set(reference.status),
            submitted_at: Set(reference.submitted_at),
            verified_at: Set(reference.verified_at),
            verified_by: Set(reference.verified_by),
            rejection_note: Set(reference.rejection_note),
            created_at: Set(reference.created_at),
            updated_at: Set(reference.updated_at),
        };

        model
            .insert(self.write_conn())
            .await
            .map_err(|e| map_write_err(e, "achievement reference"))
    }

    async fn find_reference(&self, id: Uuid) -> Result<Option<AchievementReference>> {
        AchievementReferenceEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_references(
        &self,
        filter: &ReferenceFilter,
    ) -> Result<Vec<AchievementReference>> {
        let mut query = AchievementReferenceEntity::find();

        if let Some(ids) = &filter.student_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            query = query.filter(AchievementReferenceColumn::StudentId.is_in(ids.iter().copied()));
        }
        if let Some(status) = filter.status {
            query = query.filter(AchievementReferenceColumn::Status.eq(status));
        }
        if filter.exclude_deleted {
            query = query.filter(AchievementReferenceColumn::Status.ne(AchievementStatus::Deleted));
        }
        if let Some(from) = filter.created_from {
            query = query.filter(AchievementReferenceColumn::CreatedAt.gte(from));
        }
        if let Some(before) = filter.created_before {
            query = query.filter(AchievementReferenceColumn::CreatedAt.lt(before));
        }

        query
            .order_by_desc(AchievementReferenceColumn::CreatedAt)
            .order_by_asc(AchievementReferenceColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn update_reference_status(
        &self,
        id: Uuid,
        expected: AchievementStatus,
        change: StatusChange,
    ) -> Result<u64> {
        let mut model = AchievementReferenceActiveModel {
            status: Set(change.status),
            updated_at: Set(change.updated_at),
            ..Default::default()
        };
        if let Some(at) = change.submitted_at {
            model.submitted_at = Set(Some(at));
        }
        if let Some(at) = change.verified_at {
            model.verified_at = Set(Some(at));
        }
        if let Some(by) = change.verified_by {
            model.verified_by = Set(Some(by));
        }
        if let Some(note) = change.rejection_note {
            model.rejection_note = Set(Some(note));
        }

        let result = AchievementReferenceEntity::update_many()
            .set(model)
            .filter(AchievementReferenceColumn::Id.eq(id))
            .filter(AchievementReferenceColumn::Status.eq(expected))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }
}

#[async_trait]
impl NotificationStore for Repository {
    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let model = NotificationActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(notification.user_id),
            kind: Set(notification.kind),
            title: Set(notification.title),
            message: Set(notification.message),
            data: Set(notification.data),
            is_read: Set(false),
            created_at: Set(chrono::Utc::now()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let mut query = NotificationEntity::find().filter(NotificationColumn::UserId.eq(user_id));
        if unread_only {
            query = query.filter(NotificationColumn::IsRead.eq(false));
        }

        query
            .order_by_desc(NotificationColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let result = NotificationEntity::update_many()
            .col_expr(NotificationColumn::IsRead, Expr::value(true))
            .filter(NotificationColumn::Id.eq(id))
            .filter(NotificationColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}
