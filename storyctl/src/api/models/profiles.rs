//! API models for child profiles, family members, comfort items and personality traits.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use super::photos::PhotoResponse;
use crate::db::models::profiles::{
    ComfortItemCreateDBRequest, ComfortItemDBResponse, ComfortItemUpdateDBRequest, FamilyMemberCreateDBRequest,
    FamilyMemberDBResponse, FamilyMemberUpdateDBRequest, PersonalityTraitDBRequest, PersonalityTraitDBResponse,
    ProfileCreateDBRequest, ProfileDBResponse, ProfileUpdateDBRequest,
};
use crate::errors::{Error, Result};
use crate::generation::characters::{CharacterProfile, RawTraits, normalize_traits};
use crate::types::{ComfortItemId, FamilyMemberId, ProfileId, UserId};

fn default_strength() -> i16 {
    3
}

/// Age in whole years on `today`
pub fn age_on(birthdate: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birthdate.year();
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age.max(0)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::BadRequest {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PersonalityTraitInput {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub description: Option<String>,
    /// 1 (mild) to 5 (defining), default 3
    #[serde(default = "default_strength")]
    pub strength: i16,
}

impl PersonalityTraitInput {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("trait", &self.trait_name)?;
        if !(1..=5).contains(&self.strength) {
            return Err(Error::BadRequest {
                message: format!("Trait strength must be between 1 and 5, got {}", self.strength),
            });
        }
        Ok(())
    }
}

impl From<&PersonalityTraitInput> for PersonalityTraitDBRequest {
    fn from(input: &PersonalityTraitInput) -> Self {
        Self {
            trait_name: input.trait_name.trim().to_string(),
            description: input.description.clone(),
            strength: input.strength,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PersonalityTraitResponse {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub description: Option<String>,
    pub strength: i16,
}

impl From<PersonalityTraitDBResponse> for PersonalityTraitResponse {
    fn from(db: PersonalityTraitDBResponse) -> Self {
        Self {
            trait_name: db.trait_name,
            description: db.description,
            strength: db.strength,
        }
    }
}

/// Replaces the full ordered list of a profile's traits
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PersonalityTraitsUpdate {
    pub traits: Vec<PersonalityTraitInput>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProfileCreate {
    pub name: String,
    pub nickname: Option<String>,
    pub birthdate: NaiveDate,
    pub gender: Option<String>,
    pub pronouns: Option<String>,
    pub favorite_color: Option<String>,
    pub favorite_animal: Option<String>,
    pub favorite_food: Option<String>,
    pub favorite_activity: Option<String>,
    #[serde(default)]
    pub favorite_places: Vec<String>,
    #[serde(default)]
    pub fears: Vec<String>,
    #[serde(default)]
    pub dreams: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    pub special_needs: Option<String>,
    pub bedtime_routine: Option<String>,
    pub personality_summary: Option<String>,
    pub additional_notes: Option<String>,
    /// Initial personality traits
    #[serde(default)]
    pub personality_traits: Vec<PersonalityTraitInput>,
}

/// Pronouns used when a profile is created without any: from the gender if it is a known value,
/// otherwise "they/them"
pub fn default_pronouns(gender: Option<&str>) -> &'static str {
    match gender.map(|g| g.trim().to_ascii_lowercase()).as_deref() {
        Some("male") => "he/him",
        Some("female") => "she/her",
        _ => "they/them",
    }
}

impl ProfileCreate {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        require_non_empty("name", &self.name)?;
        if self.birthdate > today {
            return Err(Error::BadRequest {
                message: "Birthdate cannot be in the future".to_string(),
            });
        }
        self.personality_traits.iter().try_for_each(PersonalityTraitInput::validate)
    }

    pub fn into_db_request(self, user_id: UserId) -> ProfileCreateDBRequest {
        ProfileCreateDBRequest {
            user_id,
            name: self.name.trim().to_string(),
            nickname: self.nickname,
            birthdate: self.birthdate,
            pronouns: Some(
                self.pronouns
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| default_pronouns(self.gender.as_deref()).to_string()),
            ),
            gender: self.gender,
            favorite_color: self.favorite_color,
            favorite_animal: self.favorite_animal,
            favorite_food: self.favorite_food,
            favorite_activity: self.favorite_activity,
            favorite_places: self.favorite_places,
            fears: self.fears,
            dreams: self.dreams,
            allergies: self.allergies,
            special_needs: self.special_needs,
            bedtime_routine: self.bedtime_routine,
            personality_summary: self.personality_summary,
            additional_notes: self.additional_notes,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
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

impl ProfileUpdate {
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
        }
        if let Some(birthdate) = self.birthdate
            && birthdate > today
        {
            return Err(Error::BadRequest {
                message: "Birthdate cannot be in the future".to_string(),
            });
        }
        Ok(())
    }
}

impl From<ProfileUpdate> for ProfileUpdateDBRequest {
    fn from(update: ProfileUpdate) -> Self {
        Self {
            name: update.name.map(|n| n.trim().to_string()),
            nickname: update.nickname,
            birthdate: update.birthdate,
            gender: update.gender,
            pronouns: update.pronouns,
            favorite_color: update.favorite_color,
            favorite_animal: update.favorite_animal,
            favorite_food: update.favorite_food,
            favorite_activity: update.favorite_activity,
            favorite_places: update.favorite_places,
            fears: update.fears,
            dreams: update.dreams,
            allergies: update.allergies,
            special_needs: update.special_needs,
            bedtime_routine: update.bedtime_routine,
            personality_summary: update.personality_summary,
            additional_notes: update.additional_notes,
            is_active: update.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ProfileId,
    pub name: String,
    pub nickname: Option<String>,
    pub birthdate: NaiveDate,
    /// Derived from the birthdate
    pub age: i32,
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
    /// Present on single-profile reads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality_traits: Option<Vec<PersonalityTraitResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_members: Option<Vec<FamilyMemberResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comfort_items: Option<Vec<ComfortItemResponse>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photos: Option<Vec<PhotoResponse>>,
}

impl ProfileResponse {
    pub fn from_db(db: ProfileDBResponse, today: NaiveDate) -> Self {
        Self {
            id: db.id,
            age: age_on(db.birthdate, today),
            name: db.name,
            nickname: db.nickname,
            birthdate: db.birthdate,
            gender: db.gender,
            pronouns: db.pronouns,
            favorite_color: db.favorite_color,
            favorite_animal: db.favorite_animal,
            favorite_food: db.favorite_food,
            favorite_activity: db.favorite_activity,
            favorite_places: db.favorite_places,
            fears: db.fears,
            dreams: db.dreams,
            allergies: db.allergies,
            special_needs: db.special_needs,
            bedtime_routine: db.bedtime_routine,
            personality_summary: db.personality_summary,
            additional_notes: db.additional_notes,
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
            personality_traits: None,
            family_members: None,
            comfort_items: None,
            photos: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListProfilesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Include deactivated profiles (default: false)
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub include_inactive: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FamilyMemberCreate {
    pub name: String,
    /// e.g. mother, father, sibling, grandparent, pet
    pub relation_type: String,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    /// A list of strings, a list of `{"trait": ..}` objects, or a comma-separated string
    #[serde(default)]
    #[schema(value_type = Object)]
    pub personality_traits: serde_json::Value,
}

impl FamilyMemberCreate {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("relation_type", &self.relation_type)
    }

    pub fn into_db_request(self, profile_id: ProfileId) -> FamilyMemberCreateDBRequest {
        FamilyMemberCreateDBRequest {
            profile_id,
            name: self.name.trim().to_string(),
            relation_type: self.relation_type.trim().to_lowercase(),
            relation_custom: self.relation_custom,
            age: self.age,
            description: self.description,
            personality_traits: self.personality_traits,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct FamilyMemberUpdate {
    pub name: Option<String>,
    pub relation_type: Option<String>,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub personality_traits: Option<serde_json::Value>,
}

impl FamilyMemberUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
        }
        if let Some(relation_type) = &self.relation_type {
            require_non_empty("relation_type", relation_type)?;
        }
        Ok(())
    }
}

impl From<FamilyMemberUpdate> for FamilyMemberUpdateDBRequest {
    fn from(update: FamilyMemberUpdate) -> Self {
        Self {
            name: update.name.map(|n| n.trim().to_string()),
            relation_type: update.relation_type.map(|r| r.trim().to_lowercase()),
            relation_custom: update.relation_custom,
            age: update.age,
            description: update.description,
            personality_traits: update.personality_traits,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FamilyMemberResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: FamilyMemberId,
    #[schema(value_type = String, format = "uuid")]
    pub profile_id: ProfileId,
    pub name: String,
    pub relation_type: String,
    pub relation_custom: Option<String>,
    pub age: Option<i32>,
    pub description: Option<String>,
    /// Normalized to a flat list
    pub personality_traits: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FamilyMemberDBResponse> for FamilyMemberResponse {
    fn from(db: FamilyMemberDBResponse) -> Self {
        Self {
            personality_traits: normalize_traits(RawTraits::from_json(&db.personality_traits)),
            id: db.id,
            profile_id: db.profile_id,
            name: db.name,
            relation_type: db.relation_type,
            relation_custom: db.relation_custom,
            age: db.age,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ComfortItemCreate {
    pub name: String,
    /// e.g. stuffed animal, blanket, toy
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
}

impl ComfortItemCreate {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)
    }

    pub fn into_db_request(self, profile_id: ProfileId) -> ComfortItemCreateDBRequest {
        ComfortItemCreateDBRequest {
            profile_id,
            name: self.name.trim().to_string(),
            item_type: self.item_type,
            description: self.description,
            significance: self.significance,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ComfortItemUpdate {
    pub name: Option<String>,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
}

impl ComfortItemUpdate {
    pub fn validate(&self) -> Result<()> {
        match &self.name {
            Some(name) => require_non_empty("name", name),
            None => Ok(()),
        }
    }
}

impl From<ComfortItemUpdate> for ComfortItemUpdateDBRequest {
    fn from(update: ComfortItemUpdate) -> Self {
        Self {
            name: update.name.map(|n| n.trim().to_string()),
            item_type: update.item_type,
            description: update.description,
            significance: update.significance,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComfortItemResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ComfortItemId,
    #[schema(value_type = String, format = "uuid")]
    pub profile_id: ProfileId,
    pub name: String,
    pub item_type: Option<String>,
    pub description: Option<String>,
    pub significance: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ComfortItemDBResponse> for ComfortItemResponse {
    fn from(db: ComfortItemDBResponse) -> Self {
        Self {
            id: db.id,
            profile_id: db.profile_id,
            name: db.name,
            item_type: db.item_type,
            description: db.description,
            significance: db.significance,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// The character consistency data a story for this profile would be illustrated with
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CharacterReferenceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub profile_id: ProfileId,
    /// Keyed by lowercased character name
    pub characters: BTreeMap<String, CharacterProfile>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CharacterReferenceQuery {
    /// Include family members (default: true)
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub include_family: Option<bool>,
}
