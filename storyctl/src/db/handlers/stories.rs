//! Database repository for generated stories.
//!
//! Every query takes the owning account so a story id alone never reaches another user's data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::api::models::stories::{SceneResponse, StoryTone};
use crate::db::{
    errors::{DbError, Result},
    models::stories::{StoryCreateDBRequest, StoryDBResponse},
};
use crate::types::{ProfileId, StoryId, UserId, abbrev_uuid};

/// Filter for listing one account's stories, newest first
#[derive(Debug, Clone)]
pub struct StoryFilter {
    pub user_id: UserId,
    pub profile_id: Option<ProfileId>,
    pub favorites_only: bool,
    pub skip: i64,
    pub limit: i64,
}

impl StoryFilter {
    pub fn new(user_id: UserId, skip: i64, limit: i64) -> Self {
        Self {
            user_id,
            profile_id: None,
            favorites_only: false,
            skip,
            limit,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct Story {
    id: StoryId,
    user_id: UserId,
    profile_id: Option<ProfileId>,
    title: String,
    story_text: String,
    key_message: String,
    tone: StoryTone,
    child_name: String,
    age: i32,
    fear_or_challenge: String,
    favorite_items: Vec<String>,
    family_members: Json<BTreeMap<String, String>>,
    scenes: Json<Vec<SceneResponse>>,
    word_count: i32,
    reading_time: i32,
    model_used: String,
    prompt_tokens: i32,
    completion_tokens: i32,
    generation_time_ms: i64,
    used_fallback: bool,
    usage_type: String,
    is_favorite: bool,
    rating: Option<i16>,
    read_count: i32,
    last_read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Story> for StoryDBResponse {
    fn from(s: Story) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            profile_id: s.profile_id,
            title: s.title,
            story_text: s.story_text,
            key_message: s.key_message,
            tone: s.tone,
            child_name: s.child_name,
            age: s.age,
            fear_or_challenge: s.fear_or_challenge,
            favorite_items: s.favorite_items,
            family_members: s.family_members.0,
            scenes: s.scenes.0,
            word_count: s.word_count,
            reading_time: s.reading_time,
            model_used: s.model_used,
            prompt_tokens: s.prompt_tokens,
            completion_tokens: s.completion_tokens,
            generation_time_ms: s.generation_time_ms,
            used_fallback: s.used_fallback,
            usage_type: s.usage_type,
            is_favorite: s.is_favorite,
            rating: s.rating,
            read_count: s.read_count,
            last_read_at: s.last_read_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

pub struct Stories<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Stories<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), usage_type = request.usage_type.as_str()), err)]
    pub async fn create(&mut self, request: &StoryCreateDBRequest) -> Result<StoryDBResponse> {
        let story = sqlx::query_as::<_, Story>(
            r#"
            INSERT INTO stories (
                id, user_id, profile_id, title, story_text, key_message, tone,
                child_name, age, fear_or_challenge, favorite_items, family_members, scenes,
                word_count, reading_time, model_used, prompt_tokens, completion_tokens,
                generation_time_ms, used_fallback, usage_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(request.profile_id)
        .bind(&request.title)
        .bind(&request.story_text)
        .bind(&request.key_message)
        .bind(request.tone)
        .bind(&request.child_name)
        .bind(request.age)
        .bind(&request.fear_or_challenge)
        .bind(&request.favorite_items)
        .bind(Json(&request.family_members))
        .bind(Json(&request.scenes))
        .bind(request.word_count)
        .bind(request.reading_time)
        .bind(&request.model_used)
        .bind(request.prompt_tokens)
        .bind(request.completion_tokens)
        .bind(request.generation_time_ms)
        .bind(request.used_fallback)
        .bind(request.usage_type.as_str())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(story.into())
    }

    #[instrument(skip(self), fields(story_id = %abbrev_uuid(&id)), err)]
    pub async fn get_for_user(&mut self, id: StoryId, user_id: UserId) -> Result<Option<StoryDBResponse>> {
        let story = sqlx::query_as::<_, Story>("SELECT * FROM stories WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(story.map(Into::into))
    }

    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id), limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &StoryFilter) -> Result<Vec<StoryDBResponse>> {
        let stories = sqlx::query_as::<_, Story>(
            r#"
            SELECT * FROM stories
            WHERE user_id = $1
              AND ($2::uuid IS NULL OR profile_id = $2)
              AND (NOT $3 OR is_favorite)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.profile_id)
        .bind(filter.favorites_only)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(stories.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id)), err)]
    pub async fn count(&mut self, filter: &StoryFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM stories
            WHERE user_id = $1
              AND ($2::uuid IS NULL OR profile_id = $2)
              AND (NOT $3 OR is_favorite)
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.profile_id)
        .bind(filter.favorites_only)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(count)
    }

    /// Bump the read counter when a story is opened
    #[instrument(skip(self), fields(story_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_read(&mut self, id: StoryId, user_id: UserId) -> Result<StoryDBResponse> {
        let story = sqlx::query_as::<_, Story>(
            r#"
            UPDATE stories SET read_count = read_count + 1, last_read_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(story.into())
    }

    #[instrument(skip(self), fields(story_id = %abbrev_uuid(&id)), err)]
    pub async fn toggle_favorite(&mut self, id: StoryId, user_id: UserId) -> Result<StoryDBResponse> {
        let story = sqlx::query_as::<_, Story>(
            r#"
            UPDATE stories SET is_favorite = NOT is_favorite, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(story.into())
    }

    #[instrument(skip(self), fields(story_id = %abbrev_uuid(&id)), err)]
    pub async fn set_rating(&mut self, id: StoryId, user_id: UserId, rating: i16) -> Result<StoryDBResponse> {
        let story = sqlx::query_as::<_, Story>(
            r#"
            UPDATE stories SET rating = $3, updated_at = NOW()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(rating)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(story.into())
    }

    #[instrument(skip(self), fields(story_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: StoryId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stories WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
