//! Notifications
//!
//! The dispatcher is a best-effort side channel of the verification
//! workflow. Every failure on its path is logged and counted, never
//! returned: a transition that committed stays committed.

use crate::achievements::Achievement;
use crate::auth::AuthContext;
use crate::db::models::{Notification, Student};
use crate::errors::{AppError, Result};
use crate::metrics::record_notification;
use crate::store::{NewNotification, RelationalStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const KIND_SUBMITTED: &str = "achievement_submitted";
pub const KIND_VERIFIED: &str = "achievement_verified";
pub const KIND_REJECTED: &str = "achievement_rejected";

/// Payload stored as the notification's opaque data blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Content id
    pub achievement_id: String,
    pub achievement_reference_id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub achievement_title: String,
    pub actor_name: String,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn RelationalStore>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    /// Tell the student's advisor that a draft was submitted
    pub async fn achievement_submitted(&self, student: &Student, achievement: &Achievement) {
        let built = self.build_submitted(student, achievement).await;
        self.dispatch(KIND_SUBMITTED, achievement.id, built).await;
    }

    /// Tell the student that the advisor approved
    pub async fn achievement_verified(
        &self,
        student: &Student,
        achievement: &Achievement,
        verifier_user_id: Uuid,
    ) {
        let built = self
            .build_decision(student, achievement, verifier_user_id, None)
            .await;
        self.dispatch(KIND_VERIFIED, achievement.id, built).await;
    }

    /// Tell the student that the advisor rejected, including the note
    pub async fn achievement_rejected(
        &self,
        student: &Student,
        achievement: &Achievement,
        verifier_user_id: Uuid,
        note: &str,
    ) {
        let built = self
            .build_decision(student, achievement, verifier_user_id, Some(note))
            .await;
        self.dispatch(KIND_REJECTED, achievement.id, built).await;
    }

    async fn dispatch(
        &self,
        kind: &'static str,
        reference_id: Uuid,
        built: Result<Option<NewNotification>>,
    ) {
        let notification = match built {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                record_notification(kind, "skipped");
                return;
            }
            Err(e) => {
                record_notification(kind, "failed");
                warn!(kind, reference_id = %reference_id, error = %e, "Could not build notification");
                return;
            }
        };

        let recipient = notification.user_id;
        match self.store.insert_notification(notification).await {
            Ok(created) => {
                record_notification(kind, "created");
                debug!(
                    kind,
                    notification_id = %created.id,
                    recipient = %recipient,
                    "Notification created"
                );
            }
            Err(e) => {
                record_notification(kind, "failed");
                warn!(
                    kind,
                    reference_id = %reference_id,
                    recipient = %recipient,
                    error = %e,
                    "Failed to create notification"
                );
            }
        }
    }

    async fn build_submitted(
        &self,
        student: &Student,
        achievement: &Achievement,
    ) -> Result<Option<NewNotification>> {
        let Some(advisor_id) = student.advisor_id else {
            warn!(student_id = %student.id, "Student has no advisor, submission not announced");
            return Ok(None);
        };
        let Some(advisor) = self.store.find_lecturer_by_id(advisor_id).await? else {
            warn!(lecturer_id = %advisor_id, "Advisor profile not found");
            return Ok(None);
        };

        let student_name = self.user_name(student.user_id).await?;
        let message = format!(
            "{} submitted the achievement \"{}\" for verification",
            student_name, achievement.title
        );
        let data = payload(student, achievement, &student_name, &student_name)?;

        Ok(Some(NewNotification {
            user_id: advisor.user_id,
            kind: KIND_SUBMITTED.to_string(),
            title: "New achievement awaiting verification".to_string(),
            message,
            data,
        }))
    }

    async fn build_decision(
        &self,
        student: &Student,
        achievement: &Achievement,
        verifier_user_id: Uuid,
        rejection_note: Option<&str>,
    ) -> Result<Option<NewNotification>> {
        let student_name = self.user_name(student.user_id).await?;
        let verifier_name = self.user_name(verifier_user_id).await?;
        let data = payload(student, achievement, &student_name, &verifier_name)?;

        let (kind, title, message) = match rejection_note {
            None => (
                KIND_VERIFIED,
                "Achievement verified",
                format!(
                    "Your achievement \"{}\" was verified by {}",
                    achievement.title, verifier_name
                ),
            ),
            Some(note) => (
                KIND_REJECTED,
                "Achievement rejected",
                format!(
                    "Your achievement \"{}\" was rejected by {}: {}",
                    achievement.title, verifier_name, note
                ),
            ),
        };

        Ok(Some(NewNotification {
            user_id: student.user_id,
            kind: kind.to_string(),
            title: title.to_string(),
            message,
            data,
        }))
    }

    async fn user_name(&self, user_id: Uuid) -> Result<String> {
        self.store
            .find_user_by_id(user_id)
            .await?
            .map(|u| u.full_name)
            .ok_or_else(|| AppError::not_found("user", user_id))
    }
}

fn payload(
    student: &Student,
    achievement: &Achievement,
    student_name: &str,
    actor_name: &str,
) -> Result<String> {
    let data = NotificationData {
        achievement_id: achievement.content_id.clone(),
        achievement_reference_id: achievement.id,
        student_id: student.id,
        student_name: student_name.to_string(),
        achievement_title: achievement.title.clone(),
        actor_name: actor_name.to_string(),
    };
    Ok(serde_json::to_string(&data)?)
}

/// Query string of `GET /notifications`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

/// Inbox of the authenticated user
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn RelationalStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, auth: &AuthContext, query: &NotificationQuery) -> Result<Vec<Notification>> {
        self.store
            .list_notifications(auth.user_id, query.unread_only)
            .await
    }

    /// Only the recipient can mark a notification; anyone else sees 404
    pub async fn mark_read(&self, auth: &AuthContext, id: Uuid) -> Result<()> {
        if self.store.mark_notification_read(id, auth.user_id).await? {
            Ok(())
        } else {
            Err(AppError::not_found("notification", id))
        }
    }
}
