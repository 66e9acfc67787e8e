//! In-memory store backends
//!
//! Used by unit tests and the gateway router tests. Each store carries
//! switches that make the next matching call fail, so the cross-store
//! compensation paths can be driven deterministically.

use super::{
    ContentStore, DirectoryStore, NewContent, NewLecturer, NewNotification, NewStudent, NewUser,
    NotificationStore, Page, ReferenceFilter, ReferenceStore, StatusChange, UserUpdate,
};
use crate::auth::DEFAULT_GRANTS;
use crate::db::models::{
    AchievementContent, AchievementReference, AchievementStatus, Lecturer, Notification,
    Permission, Role, Student, User,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DbErr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

fn injected_db_failure(what: &str) -> AppError {
    AppError::Database(DbErr::Custom(format!("injected failure: {}", what)))
}

fn injected_document_failure(what: &str) -> AppError {
    AppError::DocumentStore {
        message: format!("injected failure: {}", what),
    }
}

// ============================================================================
// Document store
// ============================================================================

#[derive(Default)]
pub struct MemoryContentStore {
    documents: RwLock<HashMap<String, AchievementContent>>,
    fail_insert: AtomicBool,
    fail_remove: AtomicBool,
    fail_set_deleted: AtomicBool,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removals(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn fail_soft_deletes(&self, fail: bool) {
        self.fail_set_deleted.store(fail, Ordering::SeqCst);
    }

    /// Raw document regardless of the soft-delete marker
    pub async fn raw(&self, id: &str) -> Option<AchievementContent> {
        self.documents.read().await.get(id).cloned()
    }

    /// Number of stored documents, soft-deleted included
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn insert_content(&self, content: NewContent) -> Result<AchievementContent> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(injected_document_failure("insert content"));
        }

        let now = Utc::now();
        let document = AchievementContent {
            id: Uuid::new_v4().simple().to_string(),
            student_id: content.student_id,
            achievement_type: content.achievement_type,
            title: content.title,
            description: content.description,
            details: content.details,
            tags: serde_json::json!(content.tags),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        self.documents
            .write()
            .await
            .insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn find_live_content(&self, id: &str) -> Result<Option<AchievementContent>> {
        let documents = self.documents.read().await;
        Ok(documents.get(id).filter(|d| !d.is_deleted).cloned())
    }

    async fn find_live_contents(&self, ids: &[String]) -> Result<Vec<AchievementContent>> {
        let documents = self.documents.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| documents.get(id))
            .filter(|d| !d.is_deleted)
            .cloned()
            .collect())
    }

    async fn set_content_deleted(&self, id: &str, deleted: bool) -> Result<bool> {
        if self.fail_set_deleted.load(Ordering::SeqCst) {
            return Err(injected_document_failure("set deleted flag"));
        }

        let mut documents = self.documents.write().await;
        let Some(document) = documents.get_mut(id) else {
            return Ok(false);
        };
        let now = Utc::now();
        document.is_deleted = deleted;
        document.deleted_at = deleted.then_some(now);
        document.updated_at = now;
        Ok(true)
    }

    async fn remove_content(&self, id: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(injected_document_failure("remove content"));
        }
        self.documents.write().await.remove(id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Relational store
// ============================================================================

#[derive(Default)]
struct RelationalState {
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    role_permissions: Vec<(Uuid, Uuid)>,
    students: HashMap<Uuid, Student>,
    lecturers: HashMap<Uuid, Lecturer>,
    references: HashMap<Uuid, AchievementReference>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryRelationalStore {
    state: RwLock<RelationalState>,
    fail_reference_insert: AtomicBool,
    fail_reference_update: AtomicBool,
    fail_notification_insert: AtomicBool,
}

impl MemoryRelationalStore {
    /// Empty store without roles
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the default roles and their permission grants
    pub fn seeded() -> Self {
        let mut state = RelationalState::default();
        let now = Utc::now();

        for (role_name, grants) in DEFAULT_GRANTS {
            let role = Role {
                id: Uuid::new_v4(),
                name: role_name.to_string(),
                description: None,
                created_at: now,
            };
            for (resource, action) in grants.iter() {
                let name = format!("{}:{}", resource, action);
                let permission_id = match state.permissions.values().find(|p| p.name == name) {
                    Some(existing) => existing.id,
                    None => {
                        let permission = Permission {
                            id: Uuid::new_v4(),
                            name,
                            resource: resource.to_string(),
                            action: action.to_string(),
                            description: None,
                        };
                        let id = permission.id;
                        state.permissions.insert(id, permission);
                        id
                    }
                };
                state.role_permissions.push((role.id, permission_id));
            }
            state.roles.insert(role.id, role);
        }

        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    pub fn fail_reference_inserts(&self, fail: bool) {
        self.fail_reference_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reference_updates(&self, fail: bool) {
        self.fail_reference_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notification_inserts(&self, fail: bool) {
        self.fail_notification_insert.store(fail, Ordering::SeqCst);
    }

    pub async fn reference_count(&self) -> usize {
        self.state.read().await.references.len()
    }

    /// Every stored notification, oldest first
    pub async fn all_notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    /// Overwrite the creation time of a reference
    pub async fn backdate_reference(&self, id: Uuid, created_at: chrono::DateTime<Utc>) {
        if let Some(reference) = self.state.write().await.references.get_mut(&id) {
            reference.created_at = created_at;
        }
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> (chrono::DateTime<Utc>, Uuid),
{
    items.sort_by(|a, b| {
        let (ta, ia) = key(a);
        let (tb, ib) = key(b);
        tb.cmp(&ta).then(ia.cmp(&ib))
    });
}

fn paginate<T>(items: Vec<T>, page: Page) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.per_page).unwrap_or(usize::MAX);
    (items.into_iter().skip(offset).take(limit).collect(), total)
}

#[async_trait]
impl DirectoryStore for MemoryRelationalStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_credential(&self, credential: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == credential || u.email == credential)
            .cloned())
    }

    async fn find_users_by_ids(&self, ids: &[Uuid]) -> Result<Vec<User>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id)).cloned().collect())
    }

    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64)> {
        let mut users: Vec<User> = self.state.read().await.users.values().cloned().collect();
        newest_first(&mut users, |u| (u.created_at, u.id));
        Ok(paginate(users, page))
    }

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(AppError::Duplicate {
                message: "username or email already registered".to_string(),
            });
        }

        let now = Utc::now();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            full_name: user.full_name,
            role_id: user.role_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        if let Some(email) = &update.email {
            if state.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(AppError::Duplicate {
                    message: "email already registered".to_string(),
                });
            }
        }

        let Some(user) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(full_name) = update.full_name {
            user.full_name = full_name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(role_id) = update.role_id {
            user.role_id = role_id;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.state.read().await.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn permissions_for_role(&self, role_id: Uuid) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role_id)
            .filter_map(|(_, p)| state.permissions.get(p))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn find_student_by_id(&self, id: Uuid) -> Result<Option<Student>> {
        Ok(self.state.read().await.students.get(&id).cloned())
    }

    async fn find_student_by_user(&self, user_id: Uuid) -> Result<Option<Student>> {
        let state = self.state.read().await;
        Ok(state.students.values().find(|s| s.user_id == user_id).cloned())
    }

    async fn find_students_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Student>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.students.get(id))
            .cloned()
            .collect())
    }

    async fn list_students_by_advisor(&self, lecturer_id: Uuid) -> Result<Vec<Student>> {
        let state = self.state.read().await;
        let mut students: Vec<Student> = state
            .students
            .values()
            .filter(|s| s.advisor_id == Some(lecturer_id))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.student_number.cmp(&b.student_number));
        Ok(students)
    }

    async fn create_student(&self, student: NewStudent) -> Result<Student> {
        let mut state = self.state.write().await;
        if state
            .students
            .values()
            .any(|s| s.user_id == student.user_id || s.student_number == student.student_number)
        {
            return Err(AppError::Duplicate {
                message: "student profile already exists".to_string(),
            });
        }

        let created = Student {
            id: Uuid::new_v4(),
            user_id: student.user_id,
            student_number: student.student_number,
            program_study: student.program_study,
            academic_year: student.academic_year,
            advisor_id: student.advisor_id,
            created_at: Utc::now(),
        };
        state.students.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_student_advisor(&self, student_id: Uuid, lecturer_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.students.get_mut(&student_id) {
            Some(student) => {
                student.advisor_id = Some(lecturer_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_lecturer_by_id(&self, id: Uuid) -> Result<Option<Lecturer>> {
        Ok(self.state.read().await.lecturers.get(&id).cloned())
    }

    async fn find_lecturer_by_user(&self, user_id: Uuid) -> Result<Option<Lecturer>> {
        let state = self.state.read().await;
        Ok(state.lecturers.values().find(|l| l.user_id == user_id).cloned())
    }

    async fn create_lecturer(&self, lecturer: NewLecturer) -> Result<Lecturer> {
        let mut state = self.state.write().await;
        if state.lecturers.values().any(|l| {
            l.user_id == lecturer.user_id || l.lecturer_number == lecturer.lecturer_number
        }) {
            return Err(AppError::Duplicate {
                message: "lecturer profile already exists".to_string(),
            });
        }

        let created = Lecturer {
            id: Uuid::new_v4(),
            user_id: lecturer.user_id,
            lecturer_number: lecturer.lecturer_number,
            department: lecturer.department,
            created_at: Utc::now(),
        };
        state.lecturers.insert(created.id, created.clone());
        Ok(created)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ReferenceStore for MemoryRelationalStore {
    async fn insert_reference(
        &self,
        reference: AchievementReference,
    ) -> Result<AchievementReference> {
        if self.fail_reference_insert.load(Ordering::SeqCst) {
            return Err(injected_db_failure("insert reference"));
        }

        let mut state = self.state.write().await;
        if state.references.contains_key(&reference.id) {
            return Err(AppError::Duplicate {
                message: format!("reference {} already exists", reference.id),
            });
        }
        state.references.insert(reference.id, reference.clone());
        Ok(reference)
    }

    async fn find_reference(&self, id: Uuid) -> Result<Option<AchievementReference>> {
        Ok(self.state.read().await.references.get(&id).cloned())
    }

    async fn list_references(
        &self,
        filter: &ReferenceFilter,
    ) -> Result<Vec<AchievementReference>> {
        let mut references: Vec<AchievementReference> = self
            .state
            .read()
            .await
            .references
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        newest_first(&mut references, |r| (r.created_at, r.id));
        Ok(references)
    }

    async fn update_reference_status(
        &self,
        id: Uuid,
        expected: AchievementStatus,
        change: StatusChange,
    ) -> Result<u64> {
        if self.fail_reference_update.load(Ordering::SeqCst) {
            return Err(injected_db_failure("update reference status"));
        }

        // Check and write under one lock, like a single conditional UPDATE
        let mut state = self.state.write().await;
        let Some(reference) = state.references.get_mut(&id) else {
            return Ok(0);
        };
        if reference.status != expected {
            return Ok(0);
        }

        reference.status = change.status;
        if change.submitted_at.is_some() {
            reference.submitted_at = change.submitted_at;
        }
        if change.verified_at.is_some() {
            reference.verified_at = change.verified_at;
        }
        if change.verified_by.is_some() {
            reference.verified_by = change.verified_by;
        }
        if change.rejection_note.is_some() {
            reference.rejection_note = change.rejection_note;
        }
        reference.updated_at = change.updated_at;
        Ok(1)
    }
}

#[async_trait]
impl NotificationStore for MemoryRelationalStore {
    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        if self.fail_notification_insert.load(Ordering::SeqCst) {
            return Err(injected_db_failure("insert notification"));
        }

        let created = Notification {
            id: Uuid::new_v4(),
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            data: notification.data,
            is_read: false,
            created_at: Utc::now(),
        };
        self.state.write().await.notifications.push(created.clone());
        Ok(created)
    }

    async fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut found: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        newest_first(&mut found, |n| (n.created_at, n.id));
        Ok(found)
    }

    async fn mark_notification_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AchievementType;

    fn new_content(student_id: Uuid) -> NewContent {
        NewContent {
            student_id,
            achievement_type: AchievementType::Academic,
            title: "Dean's list".to_string(),
            description: "Semester 3".to_string(),
            details: serde_json::json!({}),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_content_ids_are_hex() {
        let store = MemoryContentStore::new();
        let doc = store.insert_content(new_content(Uuid::new_v4())).await.unwrap();
        assert_eq!(doc.id.len(), 32);
        assert!(doc.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_soft_deleted_content_is_hidden() {
        let store = MemoryContentStore::new();
        let student = Uuid::new_v4();
        let doc = store.insert_content(new_content(student)).await.unwrap();

        assert!(store.set_content_deleted(&doc.id, true).await.unwrap());
        assert!(store.find_live_content(&doc.id).await.unwrap().is_none());
        assert!(store
            .find_live_contents(&[doc.id.clone()])
            .await
            .unwrap()
            .is_empty());
        assert!(store.raw(&doc.id).await.unwrap().deleted_at.is_some());

        assert!(store.set_content_deleted(&doc.id, false).await.unwrap());
        assert!(store.find_live_content(&doc.id).await.unwrap().is_some());
        assert!(!store.set_content_deleted("missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_seeded_roles_have_grants() {
        let store = MemoryRelationalStore::seeded();
        let roles = store.list_roles().await.unwrap();
        assert_eq!(roles.len(), 3);

        let lecturer = store.find_role_by_name("lecturer").await.unwrap().unwrap();
        let names: Vec<String> = store
            .permissions_for_role(lecturer.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            vec!["achievements:read", "achievements:verify", "statistics:read"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = MemoryRelationalStore::seeded();
        let role = store.find_role_by_name("student").await.unwrap().unwrap();
        let user = NewUser {
            username: "sari".to_string(),
            email: "sari@example.ac.id".to_string(),
            password_hash: "x".to_string(),
            full_name: "Sari".to_string(),
            role_id: role.id,
        };
        store.create_user(user.clone()).await.unwrap();
        let err = store.create_user(user).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_conditional_update_requires_expected_status() {
        let store = MemoryRelationalStore::new();
        let now = Utc::now();
        let reference = AchievementReference {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            content_id: "a".repeat(32),
            status: AchievementStatus::Draft,
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_reference(reference.clone()).await.unwrap();

        let change = StatusChange {
            status: AchievementStatus::Submitted,
            submitted_at: Some(now),
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            updated_at: now,
        };
        let rows = store
            .update_reference_status(reference.id, AchievementStatus::Submitted, change.clone())
            .await
            .unwrap();
        assert_eq!(rows, 0);

        let rows = store
            .update_reference_status(reference.id, AchievementStatus::Draft, change)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let stored = store.find_reference(reference.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AchievementStatus::Submitted);
        assert_eq!(stored.submitted_at, Some(now));
    }
}
