//! Dual-store achievement repository
//!
//! Content lives in the document store, the lifecycle reference in the
//! relational store. Writes always touch the document store first and are
//! confirmed by the relational write; when that fails the document write is
//! undone once, without retry. A failed undo is logged and counted, and the
//! original error is what the caller sees.

use super::{Achievement, NewAchievement, Transition};
use crate::db::models::{AchievementContent, AchievementReference, AchievementStatus};
use crate::errors::{AppError, Result};
use crate::metrics::{record_compensation, record_transition};
use crate::store::{ContentStore, NewContent, ReferenceFilter, RelationalStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AchievementRepository {
    contents: Arc<dyn ContentStore>,
    references: Arc<dyn RelationalStore>,
}

impl AchievementRepository {
    pub fn new(contents: Arc<dyn ContentStore>, references: Arc<dyn RelationalStore>) -> Self {
        Self {
            contents,
            references,
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store a new draft: content first, then its reference
    pub async fn submit_achievement(
        &self,
        student_id: Uuid,
        achievement: NewAchievement,
    ) -> Result<(AchievementContent, AchievementReference)> {
        let details = achievement.details.to_value()?;

        let content = self
            .contents
            .insert_content(NewContent {
                student_id,
                achievement_type: achievement.achievement_type,
                title: achievement.title,
                description: achievement.description,
                details,
                tags: achievement.tags,
            })
            .await?;

        let now = Utc::now();
        let reference = AchievementReference {
            id: Uuid::new_v4(),
            student_id,
            content_id: content.id.clone(),
            status: AchievementStatus::Draft,
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            created_at: now,
            updated_at: now,
        };

        match self.references.insert_reference(reference).await {
            Ok(reference) => {
                info!(
                    reference_id = %reference.id,
                    content_id = %content.id,
                    student_id = %student_id,
                    "Achievement draft stored"
                );
                Ok((content, reference))
            }
            Err(err) => {
                self.compensate_submit(&content.id, &err).await;
                Err(err)
            }
        }
    }

    async fn compensate_submit(&self, content_id: &str, cause: &AppError) {
        warn!(
            content_id = %content_id,
            error = %cause,
            "Reference insert failed, removing content"
        );

        match self.contents.remove_content(content_id).await {
            Ok(()) => {
                record_compensation("submit", true);
                info!(content_id = %content_id, "Orphan content removed");
            }
            Err(undo_err) => {
                record_compensation("submit", false);
                error!(
                    content_id = %content_id,
                    error = %cause,
                    compensation_error = %undo_err,
                    "Failed to remove content after reference insert failure, content is orphaned"
                );
            }
        }
    }

    /// Soft delete a draft: flag the content, then move the reference to `deleted`
    pub async fn delete_achievement(&self, reference_id: Uuid, content_id: &str) -> Result<()> {
        if !self.contents.set_content_deleted(content_id, true).await? {
            return Err(AppError::not_found("achievement content", content_id));
        }

        let transition = Transition::Delete;
        let outcome = self
            .references
            .update_reference_status(
                reference_id,
                transition.from_status(),
                transition.change(Utc::now(), None, None),
            )
            .await;

        let err = match outcome {
            Ok(1..) => {
                record_transition("draft", "deleted", true);
                info!(reference_id = %reference_id, content_id = %content_id, "Achievement deleted");
                return Ok(());
            }
            Ok(0) => {
                record_transition("draft", "deleted", false);
                precondition_failed(reference_id, transition)
            }
            Err(err) => err,
        };

        self.compensate_delete(reference_id, content_id, &err).await;
        Err(err)
    }

    async fn compensate_delete(&self, reference_id: Uuid, content_id: &str, cause: &AppError) {
        warn!(
            reference_id = %reference_id,
            content_id = %content_id,
            error = %cause,
            "Reference delete did not apply, restoring content"
        );

        match self.contents.set_content_deleted(content_id, false).await {
            Ok(_) => {
                record_compensation("delete", true);
                info!(content_id = %content_id, "Content restored");
            }
            Err(undo_err) => {
                record_compensation("delete", false);
                error!(
                    reference_id = %reference_id,
                    content_id = %content_id,
                    error = %cause,
                    compensation_error = %undo_err,
                    "Failed to restore content, it stays hidden"
                );
            }
        }
    }

    /// draft → submitted
    pub async fn mark_submitted(&self, reference_id: Uuid) -> Result<()> {
        self.apply(reference_id, Transition::Submit, None, None).await
    }

    /// submitted → verified
    pub async fn mark_verified(&self, reference_id: Uuid, verifier: Uuid) -> Result<()> {
        self.apply(reference_id, Transition::Verify, Some(verifier), None)
            .await
    }

    /// submitted → rejected
    pub async fn mark_rejected(
        &self,
        reference_id: Uuid,
        verifier: Uuid,
        note: String,
    ) -> Result<()> {
        self.apply(reference_id, Transition::Reject, Some(verifier), Some(note))
            .await
    }

    async fn apply(
        &self,
        reference_id: Uuid,
        transition: Transition,
        verifier: Option<Uuid>,
        note: Option<String>,
    ) -> Result<()> {
        let from = transition.from_status();
        let to = transition.to_status();

        let rows = self
            .references
            .update_reference_status(
                reference_id,
                from,
                transition.change(Utc::now(), verifier, note),
            )
            .await?;

        record_transition(from.as_str(), to.as_str(), rows > 0);
        if rows == 0 {
            return Err(precondition_failed(reference_id, transition));
        }

        info!(
            reference_id = %reference_id,
            from = %from,
            to = %to,
            "Achievement status changed"
        );
        Ok(())
    }

    // ========================================================================
    // Reads (reference first, soft-deleted content hidden)
    // ========================================================================

    pub async fn find_reference(&self, reference_id: Uuid) -> Result<Option<AchievementReference>> {
        self.references.find_reference(reference_id).await
    }

    /// Reference joined with its live content
    pub async fn get_by_reference(&self, reference_id: Uuid) -> Result<Option<Achievement>> {
        let Some(reference) = self.references.find_reference(reference_id).await? else {
            return Ok(None);
        };
        let Some(content) = self.contents.find_live_content(&reference.content_id).await? else {
            return Ok(None);
        };
        Ok(Some(Achievement::assemble(reference, content)))
    }

    /// References matching the filter joined with their live content, newest first
    pub async fn list(&self, filter: &ReferenceFilter) -> Result<Vec<Achievement>> {
        let references = self.references.list_references(filter).await?;
        self.join(references).await
    }

    /// Batch join, keeping reference order and dropping references without live content
    pub async fn join(&self, references: Vec<AchievementReference>) -> Result<Vec<Achievement>> {
        let ids: Vec<String> = references.iter().map(|r| r.content_id.clone()).collect();
        let mut contents: HashMap<String, AchievementContent> = self
            .contents
            .find_live_contents(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(references
            .into_iter()
            .filter_map(|r| {
                let content = contents.remove(&r.content_id)?;
                Some(Achievement::assemble(r, content))
            })
            .collect())
    }
}

fn precondition_failed(reference_id: Uuid, transition: Transition) -> AppError {
    AppError::PreconditionFailed {
        message: format!(
            "cannot {} achievement {}: it is not in status '{}'",
            transition.name(),
            reference_id,
            transition.from_status()
        ),
    }
}
