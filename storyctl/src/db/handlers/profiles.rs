//! Database repository for child profiles.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::profiles::{ProfileCreateDBRequest, ProfileDBResponse, ProfileUpdateDBRequest},
};
use crate::types::{ProfileId, UserId, abbrev_uuid};

/// Filter for listing one account's profiles
#[derive(Debug, Clone)]
pub struct ProfileFilter {
    pub user_id: UserId,
    pub skip: i64,
    pub limit: i64,
    pub include_inactive: bool,
}

impl ProfileFilter {
    pub fn new(user_id: UserId, skip: i64, limit: i64) -> Self {
        Self {
            user_id,
            skip,
            limit,
            include_inactive: false,
        }
    }

    pub fn with_inactive(mut self, include_inactive: bool) -> Self {
        self.include_inactive = include_inactive;
        self
    }
}

#[derive(Debug, Clone, FromRow)]
struct Profile {
    id: ProfileId,
    user_id: UserId,
    name: String,
    nickname: Option<String>,
    birthdate: NaiveDate,
    gender: Option<String>,
    pronouns: Option<String>,
    favorite_color: Option<String>,
    favorite_animal: Option<String>,
    favorite_food: Option<String>,
    favorite_activity: Option<String>,
    favorite_places: Vec<String>,
    fears: Vec<String>,
    dreams: Vec<String>,
    allergies: Vec<String>,
    special_needs: Option<String>,
    bedtime_routine: Option<String>,
    personality_summary: Option<String>,
    additional_notes: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Profile> for ProfileDBResponse {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            name: p.name,
            nickname: p.nickname,
            birthdate: p.birthdate,
            gender: p.gender,
            pronouns: p.pronouns,
            favorite_color: p.favorite_color,
            favorite_animal: p.favorite_animal,
            favorite_food: p.favorite_food,
            favorite_activity: p.favorite_activity,
            favorite_places: p.favorite_places,
            fears: p.fears,
            dreams: p.dreams,
            allergies: p.allergies,
            special_needs: p.special_needs,
            bedtime_routine: p.bedtime_routine,
            personality_summary: p.personality_summary,
            additional_notes: p.additional_notes,
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

pub struct Profiles<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Profiles<'c> {
    type CreateRequest = ProfileCreateDBRequest;
    type UpdateRequest = ProfileUpdateDBRequest;
    type Response = ProfileDBResponse;
    type Id = ProfileId;

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO child_profiles (
                id, user_id, name, nickname, birthdate, gender, pronouns,
                favorite_color, favorite_animal, favorite_food, favorite_activity,
                favorite_places, fears, dreams, allergies,
                special_needs, bedtime_routine, personality_summary, additional_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.name)
        .bind(&request.nickname)
        .bind(request.birthdate)
        .bind(&request.gender)
        .bind(&request.pronouns)
        .bind(&request.favorite_color)
        .bind(&request.favorite_animal)
        .bind(&request.favorite_food)
        .bind(&request.favorite_activity)
        .bind(&request.favorite_places)
        .bind(&request.fears)
        .bind(&request.dreams)
        .bind(&request.allergies)
        .bind(&request.special_needs)
        .bind(&request.bedtime_routine)
        .bind(&request.personality_summary)
        .bind(&request.additional_notes)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(profile.into())
    }

    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM child_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(profile.map(Into::into))
    }

    /// Deleting a profile cascades to its traits, family, comfort items and photos. Stories keep
    /// their content and lose the link.
    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM child_profiles WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(profile_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let profile = sqlx::query_as::<_, Profile>(
            r#"
            UPDATE child_profiles SET
                name = COALESCE($2, name),
                nickname = COALESCE($3, nickname),
                birthdate = COALESCE($4, birthdate),
                gender = COALESCE($5, gender),
                pronouns = COALESCE($6, pronouns),
                favorite_color = COALESCE($7, favorite_color),
                favorite_animal = COALESCE($8, favorite_animal),
                favorite_food = COALESCE($9, favorite_food),
                favorite_activity = COALESCE($10, favorite_activity),
                favorite_places = COALESCE($11, favorite_places),
                fears = COALESCE($12, fears),
                dreams = COALESCE($13, dreams),
                allergies = COALESCE($14, allergies),
                special_needs = COALESCE($15, special_needs),
                bedtime_routine = COALESCE($16, bedtime_routine),
                personality_summary = COALESCE($17, personality_summary),
                additional_notes = COALESCE($18, additional_notes),
                is_active = COALESCE($19, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.name)
        .bind(&request.nickname)
        .bind(request.birthdate)
        .bind(&request.gender)
        .bind(&request.pronouns)
        .bind(&request.favorite_color)
        .bind(&request.favorite_animal)
        .bind(&request.favorite_food)
        .bind(&request.favorite_activity)
        .bind(&request.favorite_places)
        .bind(&request.fears)
        .bind(&request.dreams)
        .bind(&request.allergies)
        .bind(&request.special_needs)
        .bind(&request.bedtime_routine)
        .bind(&request.personality_summary)
        .bind(&request.additional_notes)
        .bind(request.is_active)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(profile.into())
    }
}

impl<'c> Profiles<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id), limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &ProfileFilter) -> Result<Vec<ProfileDBResponse>> {
        let profiles = sqlx::query_as::<_, Profile>(
            r#"
            SELECT * FROM child_profiles
            WHERE user_id = $1 AND ($2 OR is_active)
            ORDER BY created_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.include_inactive)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(profiles.into_iter().map(Into::into).collect())
    }

    /// Fetch a profile only if it belongs to `user_id`
    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_for_user(&mut self, id: ProfileId, user_id: UserId) -> Result<Option<ProfileDBResponse>> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM child_profiles WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(profile.map(Into::into))
    }

    /// Count matching the same rows as `list`, ignoring pagination
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&filter.user_id)), err)]
    pub async fn count(&mut self, filter: &ProfileFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child_profiles WHERE user_id = $1 AND ($2 OR is_active)")
            .bind(filter.user_id)
            .bind(filter.include_inactive)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    /// Active profiles count against the plan's profile limit
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count_active(&mut self, user_id: UserId) -> Result<i64> {
        self.count(&ProfileFilter::new(user_id, 0, 0)).await
    }
}
