//! Type-specific achievement details
//!
//! The payload shape depends on the achievement type. Typed variants name
//! the fields the workflow understands and keep every other key in `extra`.

use crate::db::models::AchievementType;
use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bucket for achievements without a competition level
pub const UNKNOWN_LEVEL: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitionDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition_name: Option<String>,

    /// internasional, nasional, regional, lokal, ...
    #[serde(default, alias = "competition_level", skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medal_type: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificationDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certification_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Details payload keyed by achievement type
#[derive(Debug, Clone, PartialEq)]
pub enum AchievementDetails {
    Academic(Map<String, Value>),
    Competition(CompetitionDetails),
    Organization(OrganizationDetails),
    Publication(PublicationDetails),
    Certification(CertificationDetails),
    Other(Map<String, Value>),
}

impl AchievementDetails {
    /// Parse a raw payload for the given type. Absent means empty.
    pub fn parse(kind: AchievementType, raw: Option<Value>) -> Result<Self> {
        let object = match raw {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AppError::validation("details", "details must be a JSON object"));
            }
        };

        let details = match kind {
            AchievementType::Academic => AchievementDetails::Academic(object),
            AchievementType::Other => AchievementDetails::Other(object),
            AchievementType::Competition => {
                let details: CompetitionDetails = typed(kind, object)?;
                if matches!(details.rank, Some(rank) if rank < 1) {
                    return Err(AppError::validation("details", "rank must be at least 1"));
                }
                AchievementDetails::Competition(details)
            }
            AchievementType::Organization => AchievementDetails::Organization(typed(kind, object)?),
            AchievementType::Publication => AchievementDetails::Publication(typed(kind, object)?),
            AchievementType::Certification => {
                AchievementDetails::Certification(typed(kind, object)?)
            }
        };

        Ok(details)
    }

    pub fn achievement_type(&self) -> AchievementType {
        match self {
            AchievementDetails::Academic(_) => AchievementType::Academic,
            AchievementDetails::Competition(_) => AchievementType::Competition,
            AchievementDetails::Organization(_) => AchievementType::Organization,
            AchievementDetails::Publication(_) => AchievementType::Publication,
            AchievementDetails::Certification(_) => AchievementType::Certification,
            AchievementDetails::Other(_) => AchievementType::Other,
        }
    }

    /// JSON form stored in the document store
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            AchievementDetails::Academic(map) | AchievementDetails::Other(map) => {
                Value::Object(map.clone())
            }
            AchievementDetails::Competition(d) => serde_json::to_value(d)?,
            AchievementDetails::Organization(d) => serde_json::to_value(d)?,
            AchievementDetails::Publication(d) => serde_json::to_value(d)?,
            AchievementDetails::Certification(d) => serde_json::to_value(d)?,
        };
        Ok(value)
    }
}

fn typed<T>(kind: AchievementType, object: Map<String, Value>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(object)).map_err(|e| {
        AppError::validation("details", format!("invalid {} details: {}", kind, e))
    })
}

/// Competition level of a stored payload, read leniently
///
/// Competitions use `level` or `competition_level`; other types only count
/// when they carry a string `level` key.
pub fn competition_level(kind: AchievementType, details: &Value) -> Option<String> {
    let keys: &[&str] = match kind {
        AchievementType::Competition => &["level", "competition_level"],
        _ => &["level"],
    };

    keys.iter()
        .filter_map(|key| details.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|level| !level.is_empty())
        .map(str::to_string)
}
