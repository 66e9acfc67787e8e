//! Achievement workflow service
//!
//! Each operation runs in a fixed order: validate input, authorize the
//! caller, call the repository, then notify. Ownership and advisor checks
//! happen here, before the conditional update; the update stays the final
//! authority on status.

use super::{
    Achievement, AchievementListQuery, AchievementRepository, CreateAchievementRequest,
    CreatedAchievement, NewAchievement, Transition, VerifyDecision, VerifyRequest,
};
use crate::auth::{perms, roles, AuthContext};
use crate::db::models::{AchievementStatus, AchievementType, Lecturer, Student};
use crate::errors::{AppError, Result};
use crate::notifications::NotificationDispatcher;
use crate::store::{Page, Paged, ReferenceFilter, RelationalStore};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct AchievementService {
    repo: AchievementRepository,
    directory: Arc<dyn RelationalStore>,
    notifier: NotificationDispatcher,
}

impl AchievementService {
    pub fn new(
        repo: AchievementRepository,
        directory: Arc<dyn RelationalStore>,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            repo,
            directory,
            notifier,
        }
    }

    /// Store a new draft for the calling student
    pub async fn create(
        &self,
        auth: &AuthContext,
        request: CreateAchievementRequest,
    ) -> Result<CreatedAchievement> {
        let achievement = NewAchievement::from_request(request)?;

        auth.require_permission(perms::ACHIEVEMENTS, perms::CREATE)?;
        let student = self.caller_student(auth).await?;

        let (content, reference) = self.repo.submit_achievement(student.id, achievement).await?;

        Ok(CreatedAchievement {
            content_id: content.id,
            reference_id: reference.id,
            status: reference.status,
        })
    }

    /// draft → submitted, by the owner; the advisor is notified
    pub async fn submit(&self, auth: &AuthContext, id: Uuid) -> Result<Achievement> {
        auth.require_permission(perms::ACHIEVEMENTS, perms::UPDATE)?;
        let student = self.caller_student(auth).await?;
        let achievement = self.load(id).await?;
        ensure_owner(&student, &achievement)?;
        ensure_status(&achievement, Transition::Submit)?;

        self.repo.mark_submitted(id).await?;
        let achievement = self.load(id).await?;

        self.notifier
            .achievement_submitted(&student, &achievement)
            .await;
        Ok(achievement)
    }

    /// submitted → verified | rejected, by the student's advisor
    pub async fn verify(
        &self,
        auth: &AuthContext,
        id: Uuid,
        request: VerifyRequest,
    ) -> Result<Achievement> {
        let decision = VerifyDecision::from_request(request)?;

        auth.require_permission(perms::ACHIEVEMENTS, perms::VERIFY)?;
        let lecturer = self.caller_lecturer(auth).await?;
        let achievement = self.load(id).await?;
        let student = self.owner_of(&achievement).await?;
        if student.advisor_id != Some(lecturer.id) {
            return Err(AppError::forbidden(
                "only the student's advisor can verify this achievement",
            ));
        }
        ensure_status(&achievement, decision.transition())?;

        match &decision {
            VerifyDecision::Approve => self.repo.mark_verified(id, auth.user_id).await?,
            VerifyDecision::Reject { note } => {
                self.repo
                    .mark_rejected(id, auth.user_id, note.clone())
                    .await?
            }
        }
        let achievement = self.load(id).await?;

        info!(
            reference_id = %id,
            lecturer_id = %lecturer.id,
            status = %achievement.status,
            "Achievement reviewed"
        );

        match decision {
            VerifyDecision::Approve => {
                self.notifier
                    .achievement_verified(&student, &achievement, auth.user_id)
                    .await
            }
            VerifyDecision::Reject { note } => {
                self.notifier
                    .achievement_rejected(&student, &achievement, auth.user_id, &note)
                    .await
            }
        }
        Ok(achievement)
    }

    /// Soft delete of a draft, by the owner
    pub async fn delete(&self, auth: &AuthContext, id: Uuid) -> Result<()> {
        auth.require_permission(perms::ACHIEVEMENTS, perms::DELETE)?;
        let student = self.caller_student(auth).await?;
        let achievement = self.load(id).await?;
        ensure_owner(&student, &achievement)?;
        ensure_status(&achievement, Transition::Delete)?;

        self.repo.delete_achievement(id, &achievement.content_id).await
    }

    /// Owner, the owner's advisor, or anyone holding `achievements:read_all`
    pub async fn detail(&self, auth: &AuthContext, id: Uuid) -> Result<Achievement> {
        auth.require_permission(perms::ACHIEVEMENTS, perms::READ)?;
        let achievement = self.load(id).await?;

        if auth.has_permission(perms::ACHIEVEMENTS, perms::READ_ALL) {
            return Ok(achievement);
        }
        if let Some(student) = self.directory.find_student_by_user(auth.user_id).await? {
            if student.id == achievement.student_id {
                return Ok(achievement);
            }
        }
        if let Some(lecturer) = self.directory.find_lecturer_by_user(auth.user_id).await? {
            let owner = self.owner_of(&achievement).await?;
            if owner.advisor_id == Some(lecturer.id) {
                return Ok(achievement);
            }
        }

        Err(AppError::forbidden("not allowed to view this achievement"))
    }

    /// The caller's own achievements, deleted ones excluded
    pub async fn list_mine(
        &self,
        auth: &AuthContext,
        query: &AchievementListQuery,
    ) -> Result<Paged<Achievement>> {
        let (page, status, kind) = parse_list_query(query)?;

        auth.require_permission(perms::ACHIEVEMENTS, perms::READ)?;
        let student = self.caller_student(auth).await?;

        let filter = ReferenceFilter {
            student_ids: Some(vec![student.id]),
            status,
            exclude_deleted: true,
            ..Default::default()
        };
        self.page(&filter, page, kind).await
    }

    /// Achievements of the calling lecturer's advisees
    pub async fn list_advisees(
        &self,
        auth: &AuthContext,
        query: &AchievementListQuery,
    ) -> Result<Paged<Achievement>> {
        let (page, status, kind) = parse_list_query(query)?;

        auth.require_role(&[roles::LECTURER])?;
        let lecturer = self.caller_lecturer(auth).await?;

        let advisees = self.directory.list_students_by_advisor(lecturer.id).await?;
        let filter = ReferenceFilter {
            student_ids: Some(advisees.into_iter().map(|s| s.id).collect()),
            status,
            exclude_deleted: true,
            ..Default::default()
        };
        self.page(&filter, page, kind).await
    }

    /// Every achievement in the system
    pub async fn list_all(
        &self,
        auth: &AuthContext,
        query: &AchievementListQuery,
    ) -> Result<Paged<Achievement>> {
        let (page, status, kind) = parse_list_query(query)?;

        auth.require_role(&[roles::ADMIN])?;

        let filter = ReferenceFilter {
            status,
            exclude_deleted: status != Some(AchievementStatus::Deleted),
            ..Default::default()
        };
        self.page(&filter, page, kind).await
    }

    async fn page(
        &self,
        filter: &ReferenceFilter,
        page: Page,
        kind: Option<AchievementType>,
    ) -> Result<Paged<Achievement>> {
        // Totals count joined records: orphans and the type filter both need the content
        let matching = self
            .repo
            .list(filter)
            .await?
            .into_iter()
            .filter(|a| kind.map_or(true, |k| a.achievement_type == k))
            .collect();
        Ok(Paged::from_all(matching, page))
    }

    /// Reference-first read; deleted, missing or orphaned records are not found
    async fn load(&self, id: Uuid) -> Result<Achievement> {
        self.repo
            .get_by_reference(id)
            .await?
            .filter(|a| a.status != AchievementStatus::Deleted)
            .ok_or_else(|| AppError::not_found("achievement", id))
    }

    async fn caller_student(&self, auth: &AuthContext) -> Result<Student> {
        self.directory
            .find_student_by_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::forbidden("caller has no student profile"))
    }

    async fn caller_lecturer(&self, auth: &AuthContext) -> Result<Lecturer> {
        self.directory
            .find_lecturer_by_user(auth.user_id)
            .await?
            .ok_or_else(|| AppError::forbidden("caller has no lecturer profile"))
    }

    async fn owner_of(&self, achievement: &Achievement) -> Result<Student> {
        self.directory
            .find_student_by_id(achievement.student_id)
            .await?
            .ok_or_else(|| AppError::not_found("student", achievement.student_id))
    }
}

fn parse_list_query(
    query: &AchievementListQuery,
) -> Result<(Page, Option<AchievementStatus>, Option<AchievementType>)> {
    let page = Page::from_query(query.page, query.per_page)?;
    Ok((page, query.status()?, query.achievement_type()?))
}

fn ensure_owner(student: &Student, achievement: &Achievement) -> Result<()> {
    if achievement.student_id == student.id {
        Ok(())
    } else {
        Err(AppError::forbidden("achievement belongs to another student"))
    }
}

/// The record must sit at the source state of the edge about to be taken
fn ensure_status(achievement: &Achievement, transition: Transition) -> Result<()> {
    if achievement.status == transition.from_status() {
        return Ok(());
    }
    Err(AppError::PreconditionFailed {
        message: format!(
            "cannot {} achievement in status '{}', expected '{}'",
            transition.name(),
            achievement.status,
            transition.from_status()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PermissionClaim;
    use crate::store::memory::{MemoryContentStore, MemoryRelationalStore};
    use crate::store::{
        ContentStore, DirectoryStore, NewLecturer, NewStudent, NewUser, ReferenceStore,
    };
    use serde_json::json;

    struct Campus {
        store: Arc<MemoryRelationalStore>,
        contents: Arc<MemoryContentStore>,
        service: AchievementService,
    }

    impl Campus {
        fn new() -> Self {
            let store = Arc::new(MemoryRelationalStore::seeded());
            let contents = Arc::new(MemoryContentStore::new());
            let repo = AchievementRepository::new(contents.clone(), store.clone());
            let service =
                AchievementService::new(repo, store.clone(), NotificationDispatcher::new(store.clone()));
            Self {
                store,
                contents,
                service,
            }
        }

        async fn account(&self, role: &str, username: &str) -> AuthContext {
            let role = self.store.find_role_by_name(role).await.unwrap().unwrap();
            let user = self
                .store
                .create_user(NewUser {
                    username: username.to_string(),
                    email: format!("{}@campus.test", username),
                    password_hash: "x".into(),
                    full_name: username.to_uppercase(),
                    role_id: role.id,
                })
                .await
                .unwrap();
            let permissions = self
                .store
                .permissions_for_role(role.id)
                .await
                .unwrap()
                .iter()
                .map(PermissionClaim::from)
                .collect();

            AuthContext {
                user_id: user.id,
                username: user.username,
                role_id: role.id,
                role: role.name,
                permissions,
                request_id: "test".into(),
            }
        }

        async fn lecturer(&self, username: &str) -> (AuthContext, Lecturer) {
            let auth = self.account("lecturer", username).await;
            let lecturer = self
                .store
                .create_lecturer(NewLecturer {
                    user_id: auth.user_id,
                    lecturer_number: format!("L-{}", username),
                    department: "Informatics".into(),
                })
                .await
                .unwrap();
            (auth, lecturer)
        }

        async fn student(&self, username: &str, advisor: Option<&Lecturer>) -> AuthContext {
            let auth = self.account("student", username).await;
            self.store
                .create_student(NewStudent {
                    user_id: auth.user_id,
                    student_number: format!("S-{}", username),
                    program_study: "Informatics".into(),
                    academic_year: "2022".into(),
                    advisor_id: advisor.map(|l| l.id),
                })
                .await
                .unwrap();
            auth
        }

        async fn status(&self, id: Uuid) -> AchievementStatus {
            self.store.find_reference(id).await.unwrap().unwrap().status
        }
    }

    fn competition() -> CreateAchievementRequest {
        CreateAchievementRequest {
            achievement_type: "competition".into(),
            title: "X".into(),
            description: "Y".into(),
            details: Some(json!({"level": "nasional"})),
            tags: vec![],
        }
    }

    fn approve() -> VerifyRequest {
        VerifyRequest {
            action: "approve".into(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_submit_verify_then_delete_scenario() {
        let campus = Campus::new();
        let (advisor, lecturer) = campus.lecturer("dosen").await;
        let student = campus.student("sari", Some(&lecturer)).await;

        let created = campus.service.create(&student, competition()).await.unwrap();
        assert_eq!(created.status, AchievementStatus::Draft);
        assert_eq!(created.content_id.len(), 32);

        let submitted = campus.service.submit(&student, created.reference_id).await.unwrap();
        assert_eq!(submitted.status, AchievementStatus::Submitted);
        assert!(submitted.submitted_at.is_some());

        let notes = campus.store.all_notifications().await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].user_id, advisor.user_id);

        let verified = campus
            .service
            .verify(&advisor, created.reference_id, approve())
            .await
            .unwrap();
        assert_eq!(verified.status, AchievementStatus::Verified);
        assert_eq!(verified.verified_by, Some(advisor.user_id));

        let notes = campus.store.all_notifications().await;
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].user_id, student.user_id);

        let err = campus
            .service
            .delete(&student, created.reference_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed { .. }));
        assert_eq!(campus.status(created.reference_id).await, AchievementStatus::Verified);
        assert!(!campus.contents.raw(&created.content_id).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_reject_without_note_fails_before_lookup() {
        let campus = Campus::new();
        let (advisor, _) = campus.lecturer("dosen").await;

        // Unknown id: validation must win over the not-found lookup
        let err = campus
            .service
            .verify(
                &advisor,
                Uuid::new_v4(),
                VerifyRequest {
                    action: "reject".into(),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_only_assigned_advisor_verifies() {
        let campus = Campus::new();
        let (advisor, lecturer) = campus.lecturer("dosen").await;
        let (other, _) = campus.lecturer("other").await;
        let student = campus.student("sari", Some(&lecturer)).await;

        let created = campus.service.create(&student, competition()).await.unwrap();
        campus.service.submit(&student, created.reference_id).await.unwrap();

        let err = campus
            .service
            .verify(&other, created.reference_id, approve())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        // Students lack achievements:verify
        let err = campus
            .service
            .verify(&student, created.reference_id, approve())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions { .. }));
        assert_eq!(campus.status(created.reference_id).await, AchievementStatus::Submitted);

        let rejected = campus
            .service
            .verify(
                &advisor,
                created.reference_id,
                VerifyRequest {
                    action: "reject".into(),
                    note: Some("missing certificate".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, AchievementStatus::Rejected);
        assert_eq!(rejected.rejection_note.as_deref(), Some("missing certificate"));
    }

    #[tokio::test]
    async fn test_verify_requires_submitted() {
        let campus = Campus::new();
        let (advisor, lecturer) = campus.lecturer("dosen").await;
        let student = campus.student("sari", Some(&lecturer)).await;
        let created = campus.service.create(&student, competition()).await.unwrap();

        let err = campus
            .service
            .verify(&advisor, created.reference_id, approve())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed { .. }));
        assert_eq!(campus.status(created.reference_id).await, AchievementStatus::Draft);
    }

    #[tokio::test]
    async fn test_other_student_cannot_touch_draft() {
        let campus = Campus::new();
        let owner = campus.student("sari", None).await;
        let intruder = campus.student("joko", None).await;
        let created = campus.service.create(&owner, competition()).await.unwrap();

        for err in [
            campus.service.submit(&intruder, created.reference_id).await.unwrap_err(),
            campus.service.delete(&intruder, created.reference_id).await.unwrap_err(),
        ] {
            assert!(matches!(err, AppError::Forbidden { .. }));
        }
        let err = campus
            .service
            .detail(&intruder, created.reference_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
        assert_eq!(campus.status(created.reference_id).await, AchievementStatus::Draft);
    }

    #[tokio::test]
    async fn test_detail_access() {
        let campus = Campus::new();
        let (advisor, lecturer) = campus.lecturer("dosen").await;
        let (stranger, _) = campus.lecturer("other").await;
        let admin = campus.account("admin", "root").await;
        let student = campus.student("sari", Some(&lecturer)).await;
        let created = campus.service.create(&student, competition()).await.unwrap();

        for viewer in [&student, &advisor, &admin] {
            let found = campus.service.detail(viewer, created.reference_id).await.unwrap();
            assert_eq!(found.details["level"], json!("nasional"));
        }
        assert!(campus.service.detail(&stranger, created.reference_id).await.is_err());
    }

    #[tokio::test]
    async fn test_deleted_is_hidden() {
        let campus = Campus::new();
        let student = campus.student("sari", None).await;
        let created = campus.service.create(&student, competition()).await.unwrap();

        campus.service.delete(&student, created.reference_id).await.unwrap();
        assert_eq!(campus.status(created.reference_id).await, AchievementStatus::Deleted);

        let err = campus
            .service
            .detail(&student, created.reference_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));

        let mine = campus
            .service
            .list_mine(&student, &AchievementListQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 0);
    }

    #[tokio::test]
    async fn test_create_requires_student_profile() {
        let campus = Campus::new();
        let admin = campus.account("admin", "root").await;
        let err = campus.service.create(&admin, competition()).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions { .. }));

        // Student role without a profile row
        let orphan = campus.account("student", "ghost").await;
        let err = campus.service.create(&orphan, competition()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_invalid_create_writes_nothing() {
        let campus = Campus::new();
        let student = campus.student("sari", None).await;
        let mut request = competition();
        request.achievement_type = "sports".into();

        let err = campus.service.create(&student, request).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(campus.contents.len().await, 0);
        assert_eq!(campus.store.reference_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_submit_one_wins() {
        let campus = Campus::new();
        let (_, lecturer) = campus.lecturer("dosen").await;
        let student = campus.student("sari", Some(&lecturer)).await;
        let created = campus.service.create(&student, competition()).await.unwrap();

        let (a, b) = tokio::join!(
            campus.service.submit(&student, created.reference_id),
            campus.service.submit(&student, created.reference_id)
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::PreconditionFailed { .. }))));
        assert_eq!(campus.store.all_notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn test_listings_by_role() {
        let campus = Campus::new();
        let (advisor, lecturer) = campus.lecturer("dosen").await;
        let admin = campus.account("admin", "root").await;
        let advisee = campus.student("sari", Some(&lecturer)).await;
        let other = campus.student("joko", None).await;

        let mine = campus.service.create(&advisee, competition()).await.unwrap();
        campus.service.create(&other, competition()).await.unwrap();
        let mut academic = competition();
        academic.achievement_type = "academic".into();
        academic.details = None;
        campus.service.create(&other, academic).await.unwrap();

        let listed = campus
            .service
            .list_advisees(&advisor, &AchievementListQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
        assert_eq!(listed.data[0].id, mine.reference_id);

        let all = campus
            .service
            .list_all(&admin, &AchievementListQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total, 3);

        let academic_only = campus
            .service
            .list_all(
                &admin,
                &AchievementListQuery {
                    achievement_type: Some("academic".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(academic_only.total, 1);

        let err = campus
            .service
            .list_all(&advisor, &AchievementListQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));

        let err = campus
            .service
            .list_mine(
                &advisee,
                &AchievementListQuery {
                    per_page: Some(500),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_listing_totals_skip_orphans() {
        let campus = Campus::new();
        let admin = campus.account("admin", "root").await;
        let student = campus.student("sari", None).await;

        let kept = campus.service.create(&student, competition()).await.unwrap();
        let orphan = campus.service.create(&student, competition()).await.unwrap();
        campus.contents.remove_content(&orphan.content_id).await.unwrap();

        let page = campus
            .service
            .list_all(
                &admin,
                &AchievementListQuery {
                    per_page: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.data[0].id, kept.reference_id);

        let mine = campus
            .service
            .list_mine(&student, &AchievementListQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 1);
    }

    #[tokio::test]
    async fn test_huge_page_is_rejected() {
        let campus = Campus::new();
        let admin = campus.account("admin", "root").await;

        let err = campus
            .service
            .list_all(
                &admin,
                &AchievementListQuery {
                    page: Some(u64::MAX),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
