//! Document store backed by a separate PostgreSQL database
//!
//! One JSONB-bearing row per achievement. The id is minted here, not by
//! the caller, and is opaque to the relational side.

use crate::config::DocumentStoreConfig;
use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::store::{ContentStore, NewContent};
use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

fn document_err(err: DbErr) -> AppError {
    AppError::DocumentStore {
        message: err.to_string(),
    }
}

#[derive(Clone)]
pub struct PgContentStore {
    conn: DatabaseConnection,
}

impl PgContentStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Connect and migrate according to configuration
    pub async fn connect(config: &DocumentStoreConfig) -> Result<Self> {
        let conn = super::connect_document_store(config).await?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn insert_content(&self, content: NewContent) -> Result<AchievementContent> {
        let now = chrono::Utc::now();

        let model = AchievementContentActiveModel {
            id: Set(Uuid::new_v4().simple().to_string()),
            student_id: Set(content.student_id),
            achievement_type: Set(content.achievement_type),
            title: Set(content.title),
            description: Set(content.description),
            details: Set(content.details),
            tags: Set(serde_json::json!(content.tags)),
            is_deleted: Set(false),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&self.conn).await.map_err(document_err)
    }

    async fn find_live_content(&self, id: &str) -> Result<Option<AchievementContent>> {
        AchievementContentEntity::find_by_id(id.to_string())
            .filter(AchievementContentColumn::IsDeleted.eq(false))
            .one(&self.conn)
            .await
            .map_err(document_err)
    }

    async fn find_live_contents(&self, ids: &[String]) -> Result<Vec<AchievementContent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        AchievementContentEntity::find()
            .filter(AchievementContentColumn::Id.is_in(ids.iter().cloned()))
            .filter(AchievementContentColumn::IsDeleted.eq(false))
            .all(&self.conn)
            .await
            .map_err(document_err)
    }

    async fn set_content_deleted(&self, id: &str, deleted: bool) -> Result<bool> {
        let now = chrono::Utc::now();
        let deleted_at = if deleted { Some(now) } else { None };

        let result = AchievementContentEntity::update_many()
            .col_expr(AchievementContentColumn::IsDeleted, Expr::value(deleted))
            .col_expr(AchievementContentColumn::DeletedAt, Expr::value(deleted_at))
            .col_expr(AchievementContentColumn::UpdatedAt, Expr::value(now))
            .filter(AchievementContentColumn::Id.eq(id))
            .exec(&self.conn)
            .await
            .map_err(document_err)?;

        Ok(result.rows_affected > 0)
    }

    async fn remove_content(&self, id: &str) -> Result<()> {
        AchievementContentEntity::delete_by_id(id.to_string())
            .exec(&self.conn)
            .await
            .map_err(document_err)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Document store ping failed: {}", e),
            })?;
        Ok(())
    }
}
