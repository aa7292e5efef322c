//! Database repository for a profile's comfort items.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    models::profiles::{ComfortItemCreateDBRequest, ComfortItemDBResponse, ComfortItemUpdateDBRequest},
};
use crate::types::{ComfortItemId, ProfileId, abbrev_uuid};

#[derive(Debug, Clone, FromRow)]
struct ComfortItem {
    id: ComfortItemId,
    profile_id: ProfileId,
    name: String,
    item_type: Option<String>,
    description: Option<String>,
    significance: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ComfortItem> for ComfortItemDBResponse {
    fn from(c: ComfortItem) -> Self {
        Self {
            id: c.id,
            profile_id: c.profile_id,
            name: c.name,
            item_type: c.item_type,
            description: c.description,
            significance: c.significance,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

pub struct ComfortItems<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ComfortItems<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(profile_id = %abbrev_uuid(&request.profile_id)), err)]
    pub async fn create(&mut self, request: &ComfortItemCreateDBRequest) -> Result<ComfortItemDBResponse> {
        let item = sqlx::query_as::<_, ComfortItem>(
            r#"
            INSERT INTO comfort_items (id, profile_id, name, item_type, description, significance)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.profile_id)
        .bind(&request.name)
        .bind(&request.item_type)
        .bind(&request.description)
        .bind(&request.significance)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(item.into())
    }

    /// Oldest first, so the first items are the ones named in stories
    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&profile_id)), err)]
    pub async fn list_for_profile(&mut self, profile_id: ProfileId) -> Result<Vec<ComfortItemDBResponse>> {
        let items = sqlx::query_as::<_, ComfortItem>("SELECT * FROM comfort_items WHERE profile_id = $1 ORDER BY created_at ASC")
            .bind(profile_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(item_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, profile_id: ProfileId, id: ComfortItemId) -> Result<Option<ComfortItemDBResponse>> {
        let item = sqlx::query_as::<_, ComfortItem>("SELECT * FROM comfort_items WHERE id = $1 AND profile_id = $2")
            .bind(id)
            .bind(profile_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(item.map(Into::into))
    }

    #[instrument(skip(self, request), fields(item_id = %abbrev_uuid(&id)), err)]
    pub async fn update(
        &mut self,
        profile_id: ProfileId,
        id: ComfortItemId,
        request: &ComfortItemUpdateDBRequest,
    ) -> Result<ComfortItemDBResponse> {
        let item = sqlx::query_as::<_, ComfortItem>(
            r#"
            UPDATE comfort_items SET
                name = COALESCE($3, name),
                item_type = COALESCE($4, item_type),
                description = COALESCE($5, description),
                significance = COALESCE($6, significance),
                updated_at = NOW()
            WHERE id = $1 AND profile_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(profile_id)
        .bind(&request.name)
        .bind(&request.item_type)
        .bind(&request.description)
        .bind(&request.significance)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(item.into())
    }

    #[instrument(skip(self), fields(item_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, profile_id: ProfileId, id: ComfortItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM comfort_items WHERE id = $1 AND profile_id = $2")
            .bind(id)
            .bind(profile_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
