//! Database models for child profiles and their sub-resources.

use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{ComfortItemId, FamilyMemberId, ProfileId, UserId};

/// Database request for creating a child profile
#[derive(Debug, Clone)]
pub struct ProfileCreateDBRequest {
    pub user_id: UserId,
    pub name: String,
    pub nickname: Option<String>,
    pub birthdate: NaiveDate,
    pub gender: Option<String>,
    pub pronouns: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub favorite_places: Vec<String>,
    pub fears: Vec<String>,
    pub dreams: Vec<String>,
    pub allergies: Vec<String>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
}

/// Database request for updating a child profile. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdateDBRequest {
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub gender: Option<String>,
    pub pronouns: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub favorite_places: Option<Vec<String>>,
    pub fears: Option<Vec<String>>,
    pub dreams: Option<Vec<String>>,
    pub allergies: Option<Vec<String>>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    pub is_active: Option<bool>,
}

/// Database response for a child profile
#[derive(Debug, Clone)]
pub struct ProfileDBResponse {
    pub id: ProfileId,
    pub user_id: UserId,
    pub name: String,
    pub nickname: Option<String>,
    pub birthdate: NaiveDate,
    pub gender: Option<String>,
    pub pronouns: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    pub favorite_places: Vec<String>,
    pub fears: Vec<String>,
    pub dreams: Vec<String>,
    pub allergies: Vec<String>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One trait in the ordered list replacing a profile's traits
#[derive(Debug, Clone)]
pub struct PersonalityTraitDBRequest {
    pub trait_name: String,
    pub description: Option<String>,
    pub strength: i16,
}

#[derive(Debug, Clone)]
pub struct PersonalityTraitDBResponse {
    pub id: uuid::Uuid,
    pub profile_id: ProfileId,
    pub trait_name: String,
    pub description: Option<String>,
    pub strength: i16,
    pub position: i32,
}

#[derive(Debug, Clone)]
pub struct FamilyMemberCreateDBRequest {
    pub profile_id: ProfileId,
    pub name: String,
    pub relation_type: String,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    /// Kept in whatever shape the client sent; normalized when characters are built
    pub personality_traits: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct FamilyMemberUpdateDBRequest {
    pub name: Option<String>,
    pub relation_type: Option<String>,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    pub personality_traits: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct FamilyMemberDBResponse {
    pub id: FamilyMemberId,
    pub profile_id: ProfileId,
    pub name: String,
    pub relation_type: String,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    pub personality_traits: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FamilyMemberDBResponse {
    /// The relation used in prompts: the custom label when set, otherwise the relation type
    pub fn relation(&self) -> &str {
        self.relation_custom
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.relation_type)
    }
}

#[derive(Debug, Clone)]
pub struct ComfortItemCreateDBRequest {
    pub profile_id: ProfileId,
    pub name: String,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ComfortItemUpdateDBRequest {
    pub name: Option<String>,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ComfortItemDBResponse {
    pub id: ComfortItemId,
    pub profile_id: ProfileId,
    pub name: String,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
