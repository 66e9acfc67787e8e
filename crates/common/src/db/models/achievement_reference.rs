//! Achievement reference entity, the authoritative lifecycle record

use super::enums::AchievementStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "achievement_references")]
pub struct Model {
    /// Minted by the application before insert
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Student profile id of the owner
    pub student_id: Uuid,

    /// Opaque id of the document in the content store
    #[sea_orm(column_type = "Text")]
    pub content_id: String,

    pub status: AchievementStatus,

    pub submitted_at: Option<DateTimeUtc>,

    pub verified_at: Option<DateTimeUtc>,

    /// User id of the lecturer who verified or rejected
    pub verified_by: Option<Uuid>,

    #[sea_orm(column_type = "Text", nullable)]
    pub rejection_note: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
