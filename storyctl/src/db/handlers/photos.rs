//! Database repository for uploaded photos.
//!
//! Photo bytes live in the `data` column and are only selected by the content queries; everything
//! else works on metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::photos::PhotoType;
use crate::db::{
    errors::{DbError, Result},
    models::photos::{PhotoContent, PhotoCreateDBRequest, PhotoDBResponse},
};
use crate::types::{ComfortItemId, FamilyMemberId, PhotoId, ProfileId, UserId, abbrev_uuid};

const METADATA_COLUMNS: &str =
    "p.id, p.profile_id, p.family_member_id, p.comfort_item_id, p.photo_type, p.description, p.is_primary, p.content_type, p.size_bytes, p.created_at";

#[derive(Debug, Clone, FromRow)]
struct Photo {
    id: PhotoId,
    profile_id: ProfileId,
    family_member_id: Option<FamilyMemberId>,
    comfort_item_id: Option<ComfortItemId>,
    photo_type: PhotoType,
    description: Option<String>,
    is_primary: bool,
    content_type: String,
    size_bytes: i32,
    created_at: DateTime<Utc>,
}

impl From<Photo> for PhotoDBResponse {
    fn from(p: Photo) -> Self {
        Self {
            id: p.id,
            profile_id: p.profile_id,
            family_member_id: p.family_member_id,
            comfort_item_id: p.comfort_item_id,
            photo_type: p.photo_type,
            description: p.description,
            is_primary: p.is_primary,
            content_type: p.content_type,
            size_bytes: p.size_bytes,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct Content {
    id: PhotoId,
    content_type: String,
    data: Vec<u8>,
}

impl From<Content> for PhotoContent {
    fn from(c: Content) -> Self {
        Self {
            id: c.id,
            content_type: c.content_type,
            data: c.data,
        }
    }
}

pub struct Photos<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Photos<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Store a photo. When it is the profile's new primary photo, the previous primary is cleared
    /// first, so run inside a transaction.
    #[instrument(skip(self, request), fields(profile_id = %abbrev_uuid(&request.profile_id), bytes = request.data.len()), err)]
    pub async fn create(&mut self, request: &PhotoCreateDBRequest) -> Result<PhotoDBResponse> {
        let size_bytes = i32::try_from(request.data.len()).map_err(|e| DbError::Other(e.into()))?;
        let is_profile_photo = request.family_member_id.is_none() && request.comfort_item_id.is_none();

        if request.is_primary && is_profile_photo {
            self.clear_primary(request.profile_id).await?;
        }

        let photo = sqlx::query_as::<_, Photo>(
            r#"
            INSERT INTO photos (
                id, profile_id, family_member_id, comfort_item_id, photo_type, description,
                is_primary, content_type, size_bytes, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, profile_id, family_member_id, comfort_item_id, photo_type, description,
                is_primary, content_type, size_bytes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.profile_id)
        .bind(request.family_member_id)
        .bind(request.comfort_item_id)
        .bind(request.photo_type)
        .bind(&request.description)
        .bind(request.is_primary && is_profile_photo)
        .bind(&request.content_type)
        .bind(size_bytes)
        .bind(&request.data)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(photo.into())
    }

    /// Every photo of a profile, its family members and comfort items, oldest first
    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&profile_id)), err)]
    pub async fn list_for_profile(&mut self, profile_id: ProfileId) -> Result<Vec<PhotoDBResponse>> {
        let query = format!("SELECT {METADATA_COLUMNS} FROM photos p WHERE p.profile_id = $1 ORDER BY p.created_at ASC");
        let photos = sqlx::query_as::<_, Photo>(&query)
            .bind(profile_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(photos.into_iter().map(Into::into).collect())
    }

    /// Photo metadata, only if the owning profile belongs to `user_id`
    #[instrument(skip(self), fields(photo_id = %abbrev_uuid(&id)), err)]
    pub async fn get_for_user(&mut self, id: PhotoId, user_id: UserId) -> Result<Option<PhotoDBResponse>> {
        let query = format!(
            "SELECT {METADATA_COLUMNS} FROM photos p JOIN child_profiles cp ON cp.id = p.profile_id WHERE p.id = $1 AND cp.user_id = $2"
        );
        let photo = sqlx::query_as::<_, Photo>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(photo.map(Into::into))
    }

    /// Photo bytes, only if the owning profile belongs to `user_id`
    #[instrument(skip(self), fields(photo_id = %abbrev_uuid(&id)), err)]
    pub async fn get_content_for_user(&mut self, id: PhotoId, user_id: UserId) -> Result<Option<PhotoContent>> {
        let content = sqlx::query_as::<_, Content>(
            r#"
            SELECT p.id, p.content_type, p.data
            FROM photos p
            JOIN child_profiles cp ON cp.id = p.profile_id
            WHERE p.id = $1 AND cp.user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(content.map(Into::into))
    }

    /// Bytes for several photos at once, keyed by id
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn get_contents(&mut self, ids: &[PhotoId]) -> Result<HashMap<PhotoId, PhotoContent>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let contents = sqlx::query_as::<_, Content>("SELECT id, content_type, data FROM photos WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(contents.into_iter().map(|c| (c.id, c.into())).collect())
    }

    /// Make a profile photo the primary one. Family and comfort item photos cannot be primary.
    #[instrument(skip(self), fields(photo_id = %abbrev_uuid(&id)), err)]
    pub async fn set_primary(&mut self, profile_id: ProfileId, id: PhotoId) -> Result<PhotoDBResponse> {
        self.clear_primary(profile_id).await?;

        let query = format!(
            r#"
            UPDATE photos p SET is_primary = TRUE
            WHERE p.id = $1 AND p.profile_id = $2 AND p.family_member_id IS NULL AND p.comfort_item_id IS NULL
            RETURNING {METADATA_COLUMNS}
            "#
        );
        let photo = sqlx::query_as::<_, Photo>(&query)
            .bind(id)
            .bind(profile_id)
            .fetch_optional(&mut *self.db)
            .await?
            .ok_or(DbError::NotFound)?;

        Ok(photo.into())
    }

    #[instrument(skip(self), fields(photo_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: PhotoId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_primary(&mut self, profile_id: ProfileId) -> Result<()> {
        sqlx::query("UPDATE photos SET is_primary = FALSE WHERE profile_id = $1 AND is_primary")
            .bind(profile_id)
            .execute(&mut *self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_profile, create_test_user};
    use sqlx::PgPool;

    fn upload(profile_id: ProfileId, is_primary: bool) -> PhotoCreateDBRequest {
        PhotoCreateDBRequest {
            profile_id,
            family_member_id: None,
            comfort_item_id: None,
            photo_type: PhotoType::Profile,
            description: None,
            is_primary,
            content_type: "image/png".to_string(),
            data: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_new_primary_photo_replaces_the_old_one(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let profile = create_test_profile(&pool, user.id, "Emma").await;

        let mut tx = pool.begin().await.unwrap();
        let mut repo = Photos::new(&mut tx);
        let first = repo.create(&upload(profile.id, true)).await.unwrap();
        let second = repo.create(&upload(profile.id, true)).await.unwrap();
        tx.commit().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let photos = Photos::new(&mut conn).list_for_profile(profile.id).await.unwrap();
        let primaries: Vec<_> = photos.iter().filter(|p| p.is_primary).map(|p| p.id).collect();
        assert_eq!(primaries, vec![second.id]);
        assert!(photos.iter().any(|p| p.id == first.id && !p.is_primary));

        let mut tx = pool.begin().await.unwrap();
        let promoted = Photos::new(&mut tx).set_primary(profile.id, first.id).await.unwrap();
        tx.commit().await.unwrap();
        assert!(promoted.is_primary);

        let photos = Photos::new(&mut conn).list_for_profile(profile.id).await.unwrap();
        assert_eq!(photos.iter().filter(|p| p.is_primary).count(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_second_primary_row_is_refused_by_the_schema(pool: PgPool) {
        let user = create_test_user(&pool).await;
        let profile = create_test_profile(&pool, user.id, "Emma").await;

        let mut conn = pool.acquire().await.unwrap();
        Photos::new(&mut conn).create(&upload(profile.id, true)).await.unwrap();

        let err: DbError = sqlx::query(
            "INSERT INTO photos (id, profile_id, is_primary, content_type, size_bytes, data) VALUES ($1, $2, TRUE, 'image/png', 1, '\\x00')",
        )
        .bind(Uuid::new_v4())
        .bind(profile.id)
        .execute(&mut *conn)
        .await
        .unwrap_err()
        .into();

        assert!(matches!(
            err,
            DbError::UniqueViolation { constraint: Some(ref c), .. } if c == "photos_one_primary_per_profile"
        ));
    }
}
