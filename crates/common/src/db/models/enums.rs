//! Enumerations shared by the relational and document entities

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an achievement reference
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AchievementStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "submitted")]
    Submitted,
    #[sea_orm(string_value = "verified")]
    Verified,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

impl AchievementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementStatus::Draft => "draft",
            AchievementStatus::Submitted => "submitted",
            AchievementStatus::Verified => "verified",
            AchievementStatus::Rejected => "rejected",
            AchievementStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AchievementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AchievementStatus::Draft),
            "submitted" => Ok(AchievementStatus::Submitted),
            "verified" => Ok(AchievementStatus::Verified),
            "rejected" => Ok(AchievementStatus::Rejected),
            "deleted" => Ok(AchievementStatus::Deleted),
            other => Err(format!("unknown achievement status '{}'", other)),
        }
    }
}

/// Kind of achievement, selects the shape of the details payload
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum AchievementType {
    #[sea_orm(string_value = "academic")]
    Academic,
    #[sea_orm(string_value = "competition")]
    Competition,
    #[sea_orm(string_value = "organization")]
    Organization,
    #[sea_orm(string_value = "publication")]
    Publication,
    #[sea_orm(string_value = "certification")]
    Certification,
    #[sea_orm(string_value = "other")]
    Other,
}

impl AchievementType {
    pub const ALL: [AchievementType; 6] = [
        AchievementType::Academic,
        AchievementType::Competition,
        AchievementType::Organization,
        AchievementType::Publication,
        AchievementType::Certification,
        AchievementType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementType::Academic => "academic",
            AchievementType::Competition => "competition",
            AchievementType::Organization => "organization",
            AchievementType::Publication => "publication",
            AchievementType::Certification => "certification",
            AchievementType::Other => "other",
        }
    }
}

impl fmt::Display for AchievementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AchievementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AchievementType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "achievement_type must be one of: academic, competition, organization, publication, certification, other (got '{}')",
                    s
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in [
            AchievementStatus::Draft,
            AchievementStatus::Submitted,
            AchievementStatus::Verified,
            AchievementStatus::Rejected,
            AchievementStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<AchievementStatus>(), Ok(status));
        }
        assert!("pending".parse::<AchievementStatus>().is_err());
    }

    #[test]
    fn test_type_rejects_unknown() {
        assert_eq!(
            "competition".parse::<AchievementType>(),
            Ok(AchievementType::Competition)
        );
        assert!("sports".parse::<AchievementType>().is_err());
        assert!("Competition".parse::<AchievementType>().is_err());
    }

    #[test]
    fn test_serde_is_snake_case() {
        let json = serde_json::to_string(&AchievementType::Certification).unwrap();
        assert_eq!(json, "\"certification\"");
        let status: AchievementStatus = serde_json::from_str("\"submitted\"").unwrap();
        assert_eq!(status, AchievementStatus::Submitted);
    }
}
