//! Achievement workflow
//!
//! - `details`: type-specific payloads
//! - `status`: the verification state machine
//! - `repository`: dual-store writes with compensation
//! - `service`: validation, authorization and notification around the repository

mod details;
mod repository;
mod service;
mod status;

pub use details::{
    competition_level, AchievementDetails, CertificationDetails, CompetitionDetails,
    OrganizationDetails, PublicationDetails, UNKNOWN_LEVEL,
};
pub use repository::AchievementRepository;
pub use service::AchievementService;
pub use status::Transition;

use crate::db::models::{
    AchievementContent, AchievementReference, AchievementStatus, AchievementType,
};
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// Body of `POST /achievements`
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAchievementRequest {
    pub achievement_type: String,

    #[validate(length(max = 255), custom(function = "not_blank"))]
    pub title: String,

    #[validate(length(max = 5000), custom(function = "not_blank"))]
    pub description: String,

    #[serde(default)]
    pub details: Option<serde_json::Value>,

    #[serde(default)]
    #[validate(length(max = 20))]
    pub tags: Vec<String>,
}

/// A create request that passed validation
#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub achievement_type: AchievementType,
    pub title: String,
    pub description: String,
    pub details: AchievementDetails,
    pub tags: Vec<String>,
}

impl NewAchievement {
    pub fn from_request(request: CreateAchievementRequest) -> Result<Self> {
        let achievement_type: AchievementType = request
            .achievement_type
            .trim()
            .parse()
            .map_err(|e: String| AppError::validation("achievement_type", e))?;

        request.validate()?;

        let details = AchievementDetails::parse(achievement_type, request.details)?;

        Ok(Self {
            achievement_type,
            title: request.title.trim().to_string(),
            description: request.description.trim().to_string(),
            details,
            tags: request
                .tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        })
    }
}

/// Result of storing a new draft
#[derive(Debug, Clone, Serialize)]
pub struct CreatedAchievement {
    pub content_id: String,
    pub reference_id: Uuid,
    pub status: AchievementStatus,
}

/// Body of `POST /achievements/{id}/verify`
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub action: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyDecision {
    Approve,
    Reject { note: String },
}

impl VerifyDecision {
    pub fn from_request(request: VerifyRequest) -> Result<Self> {
        match request.action.trim() {
            "approve" => Ok(VerifyDecision::Approve),
            "reject" => {
                let note = request
                    .note
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| {
                        AppError::validation("note", "a rejection note is required to reject")
                    })?;
                Ok(VerifyDecision::Reject { note })
            }
            other => Err(AppError::validation(
                "action",
                format!("action must be 'approve' or 'reject' (got '{}')", other),
            )),
        }
    }

    pub fn transition(&self) -> Transition {
        match self {
            VerifyDecision::Approve => Transition::Verify,
            VerifyDecision::Reject { .. } => Transition::Reject,
        }
    }
}

/// Query string of the achievement listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AchievementListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub status: Option<String>,
    pub achievement_type: Option<String>,
}

impl AchievementListQuery {
    pub fn status(&self) -> Result<Option<AchievementStatus>> {
        parse_optional(self.status.as_deref(), "status")
    }

    pub fn achievement_type(&self) -> Result<Option<AchievementType>> {
        parse_optional(self.achievement_type.as_deref(), "achievement_type")
    }
}

/// Parse an optional enum query value; empty counts as absent
pub(crate) fn parse_optional<T>(raw: Option<&str>, field: &str) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|e| AppError::validation(field, e)),
    }
}

/// Reference joined with its live content
#[derive(Debug, Clone, Serialize)]
pub struct Achievement {
    /// Reference id
    pub id: Uuid,
    pub content_id: String,
    pub student_id: Uuid,
    pub status: AchievementStatus,
    pub achievement_type: AchievementType,
    pub title: String,
    pub description: String,
    pub details: serde_json::Value,
    pub tags: serde_json::Value,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<Uuid>,
    pub rejection_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Achievement {
    pub fn assemble(reference: AchievementReference, content: AchievementContent) -> Self {
        Self {
            id: reference.id,
            content_id: reference.content_id,
            student_id: reference.student_id,
            status: reference.status,
            achievement_type: content.achievement_type,
            title: content.title,
            description: content.description,
            details: content.details,
            tags: content.tags,
            submitted_at: reference.submitted_at,
            verified_at: reference.verified_at,
            verified_by: reference.verified_by,
            rejection_note: reference.rejection_note,
            created_at: reference.created_at,
            updated_at: reference.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: &str, title: &str, description: &str) -> CreateAchievementRequest {
        CreateAchievementRequest {
            achievement_type: kind.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            details: Some(json!({"level": "nasional"})),
            tags: vec![" robotics ".to_string(), "".to_string()],
        }
    }

    #[test]
    fn test_valid_request() {
        let new = NewAchievement::from_request(request("competition", " KRI 2024 ", "Juara 1")).unwrap();
        assert_eq!(new.achievement_type, AchievementType::Competition);
        assert_eq!(new.title, "KRI 2024");
        assert_eq!(new.tags, vec!["robotics".to_string()]);
    }

    #[test]
    fn test_invalid_type_rejected() {
        let err = NewAchievement::from_request(request("sports", "X", "Y")).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "achievement_type"));
    }

    #[test]
    fn test_blank_title_and_description_rejected() {
        let err = NewAchievement::from_request(request("academic", "   ", "Y")).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = NewAchievement::from_request(request("academic", "X", "")).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_verify_decision() {
        let approve = VerifyDecision::from_request(VerifyRequest {
            action: "approve".into(),
            note: None,
        })
        .unwrap();
        assert_eq!(approve.transition(), Transition::Verify);

        let err = VerifyDecision::from_request(VerifyRequest {
            action: "reject".into(),
            note: Some("  ".into()),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "note"));

        assert!(VerifyDecision::from_request(VerifyRequest {
            action: "maybe".into(),
            note: None,
        })
        .is_err());
    }

    #[test]
    fn test_list_query_parsing() {
        let query = AchievementListQuery {
            status: Some("submitted".into()),
            achievement_type: Some("".into()),
            ..Default::default()
        };
        assert_eq!(query.status().unwrap(), Some(AchievementStatus::Submitted));
        assert_eq!(query.achievement_type().unwrap(), None);

        let bad = AchievementListQuery {
            status: Some("pending".into()),
            ..Default::default()
        };
        assert!(bad.status().is_err());
    }
}
