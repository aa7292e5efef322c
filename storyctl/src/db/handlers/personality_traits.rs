//! Database repository for a profile's ordered personality traits.

use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::profiles::{PersonalityTraitDBRequest, PersonalityTraitDBResponse},
};
use crate::types::{ProfileId, abbrev_uuid};

#[derive(Debug, Clone, FromRow)]
struct PersonalityTrait {
    id: Uuid,
    profile_id: ProfileId,
    #[sqlx(rename = "trait")]
    trait_name: String,
    description: Option<String>,
    strength: i16,
    position: i32,
}

impl From<PersonalityTrait> for PersonalityTraitDBResponse {
    fn from(t: PersonalityTrait) -> Self {
        Self {
            id: t.id,
            profile_id: t.profile_id,
            trait_name: t.trait_name,
            description: t.description,
            strength: t.strength,
            position: t.position,
        }
    }
}

pub struct PersonalityTraits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PersonalityTraits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(profile_id = %abbrev_uuid(&profile_id)), err)]
    pub async fn list_for_profile(&mut self, profile_id: ProfileId) -> Result<Vec<PersonalityTraitDBResponse>> {
        let traits = sqlx::query_as::<_, PersonalityTrait>(
            r#"SELECT id, profile_id, "trait", description, strength, position FROM personality_traits WHERE profile_id = $1 ORDER BY position ASC"#,
        )
        .bind(profile_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(traits.into_iter().map(Into::into).collect())
    }

    /// Replace the whole list, keeping the given order. Run inside a transaction.
    #[instrument(skip(self, traits), fields(profile_id = %abbrev_uuid(&profile_id), count = traits.len()), err)]
    pub async fn replace_all(
        &mut self,
        profile_id: ProfileId,
        traits: &[PersonalityTraitDBRequest],
    ) -> Result<Vec<PersonalityTraitDBResponse>> {
        sqlx::query("DELETE FROM personality_traits WHERE profile_id = $1")
            .bind(profile_id)
            .execute(&mut *self.db)
            .await?;

        let mut saved = Vec::with_capacity(traits.len());
        for (position, t) in traits.iter().enumerate() {
            let row = sqlx::query_as::<_, PersonalityTrait>(
                r#"
                INSERT INTO personality_traits (id, profile_id, "trait", description, strength, position)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, profile_id, "trait", description, strength, position
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(profile_id)
            .bind(&t.trait_name)
            .bind(&t.description)
            .bind(t.strength)
            .bind(position as i32)
            .fetch_one(&mut *self.db)
            .await?;
            saved.push(row.into());
        }

        Ok(saved)
    }
}
