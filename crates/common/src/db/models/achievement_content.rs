//! Achievement content entity, lives in the document store

use super::enums::AchievementType;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "achievement_contents")]
pub struct Model {
    /// 32 hex characters, minted by the store on insert
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,

    pub student_id: Uuid,

    pub achievement_type: AchievementType,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    /// Type-specific payload as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub details: Json,

    /// List of free-form tags as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub tags: Json,

    pub is_deleted: bool,

    pub deleted_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
