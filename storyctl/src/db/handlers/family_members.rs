//! Database repository for a profile's family members.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    models::profiles::{FamilyMemberCreateDBRequest, FamilyMemberDBResponse, FamilyMemberUpdateDBRequest},
};
use crate::types::{FamilyMemberId, ProfileId, abbrev_uuid};

#[derive(Debug, Clone, FromRow)]
struct FamilyMember {
    id: FamilyMemberId,
    profile_id: ProfileId,
    name: String,
    relation_type: String,
    relation_custom: Option<String>,
    age: Option<i32>,
    description: Option<String>,
    personality_traits: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FamilyMember> for FamilyMemberDBResponse {
    fn from(m: FamilyMember) -> Self {
        Self {
            id: m.id,
            profile_id: m.profile_id,
            name: m.name,
            relation_type: m.relation_type,
            relation_custom: m.relation_custom,
            age: m.age,
            description: m.description,
            personality_traits: m.personality_traits,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Every query is scoped to one profile; ownership of the profile is checked by the caller.
pub struct FamilyMembers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> FamilyMembers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(profile_id = %abbrev_uuid(&request.profile_id)), err)]
    pub async fn create(&mut self, request: &FamilyMemberCreateDBRequest) -> Result<FamilyMemberDBResponse> {
        let member = sqlx::query_as::<_, FamilyMember>(
            r#"
            INSERT INTO family_members (id, profile_id, name, relation_type, relation_custom, age, description, personality_traits)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.profile_id)
        .bind(&request.name)
        .bind(&request.relation_type)
        .bind(&request.relation_custom)
        .bind(request.age)
        .bind(&request.description)
        .bind(&request.personality_traits)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(member.into())
    }

    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&profile_id)), err)]
    pub async fn list_for_profile(&mut self, profile_id: ProfileId) -> Result<Vec<FamilyMemberDBResponse>> {
        let members = sqlx::query_as::<_, FamilyMember>("SELECT * FROM family_members WHERE profile_id = $1 ORDER BY created_at ASC")
            .bind(profile_id)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(members.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&mut self, profile_id: ProfileId, id: FamilyMemberId) -> Result<Option<FamilyMemberDBResponse>> {
        let member = sqlx::query_as::<_, FamilyMember>("SELECT * FROM family_members WHERE id = $1 AND profile_id = $2")
            .bind(id)
            .bind(profile_id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(member.map(Into::into))
    }

    #[instrument(skip(self, request), fields(member_id = %abbrev_uuid(&id)), err)]
    pub async fn update(
        &mut self,
        profile_id: ProfileId,
        id: FamilyMemberId,
        request: &FamilyMemberUpdateDBRequest,
    ) -> Result<FamilyMemberDBResponse> {
        let member = sqlx::query_as::<_, FamilyMember>(
            r#"
            UPDATE family_members SET
                name = COALESCE($3, name),
                relation_type = COALESCE($4, relation_type),
                relation_custom = COALESCE($5, relation_custom),
                age = COALESCE($6, age),
                description = COALESCE($7, description),
                personality_traits = COALESCE($8, personality_traits),
                updated_at = NOW()
            WHERE id = $1 AND profile_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(profile_id)
        .bind(&request.name)
        .bind(&request.relation_type)
        .bind(&request.relation_custom)
        .bind(request.age)
        .bind(&request.description)
        .bind(&request.personality_traits)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;

        Ok(member.into())
    }

    #[instrument(skip(self), fields(member_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, profile_id: ProfileId, id: FamilyMemberId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM family_members WHERE id = $1 AND profile_id = $2")
            .bind(id)
            .bind(profile_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
