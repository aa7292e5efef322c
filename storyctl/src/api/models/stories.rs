//! API models for story generation and the story library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::BTreeMap;
use std::fmt;
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::stories::StoryDBResponse;
use crate::errors::{Error, Result};
use crate::generation::characters::CharacterProfile;
use crate::metering::UsageType;
use crate::types::{ProfileId, StoryId};

/// Narrative style. Unrecognized values are read as [`StoryTone::Empowering`].
#[derive(Debug, Clone, Copy, Serialize, sqlx::Type, PartialEq, Eq, Default, ToSchema)]
#[sqlx(type_name = "story_tone", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StoryTone {
    Calm,
    #[default]
    Empowering,
    Bedtime,
    Adventure,
}

impl StoryTone {
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "calm" => StoryTone::Calm,
            "bedtime" => StoryTone::Bedtime,
            "adventure" => StoryTone::Adventure,
            _ => StoryTone::Empowering,
        }
    }

    /// Phrase injected into the narrative prompt
    pub fn descriptor(&self) -> &'static str {
        match self {
            StoryTone::Calm => "gentle, soothing, and reassuring with soft transitions",
            StoryTone::Empowering => "encouraging, brave, and confidence-building with triumphant moments",
            StoryTone::Bedtime => "peaceful, dreamy, sleepy with gentle resolution",
            StoryTone::Adventure => "exciting but safe, fun and engaging with positive outcomes",
        }
    }
}

impl fmt::Display for StoryTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoryTone::Calm => "calm",
            StoryTone::Empowering => "empowering",
            StoryTone::Bedtime => "bedtime",
            StoryTone::Adventure => "adventure",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for StoryTone {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(StoryTone::parse_lenient(&value))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateStoryRequest {
    /// Generate for a saved child profile. Name, age, favourites and family come from it.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub profile_id: Option<ProfileId>,
    /// Required without a profile
    pub child_name: Option<String>,
    /// Required without a profile, 2 to 18
    pub age: Option<i32>,
    pub fear_or_challenge: String,
    #[serde(default)]
    pub tone: StoryTone,
    /// Added to the profile's comfort items
    #[serde(default)]
    pub favorite_items: Vec<String>,
    /// name -> relation, for stories without a saved profile
    #[serde(default)]
    pub family_members: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub include_family: bool,
    #[serde(default = "default_true")]
    pub include_comfort_items: bool,
    /// Extra details to weave into the story
    #[serde(default)]
    pub custom_elements: Vec<String>,
}

impl GenerateStoryRequest {
    pub const MIN_AGE: i32 = 2;
    pub const MAX_AGE: i32 = 18;
    pub const MAX_CHALLENGE_CHARS: usize = 500;
    pub const MAX_NAME_CHARS: usize = 100;

    pub fn validate(&self) -> Result<()> {
        let challenge = self.fear_or_challenge.trim();
        if challenge.is_empty() || challenge.chars().count() > Self::MAX_CHALLENGE_CHARS {
            return Err(Error::BadRequest {
                message: format!("fear_or_challenge must be between 1 and {} characters", Self::MAX_CHALLENGE_CHARS),
            });
        }

        if self.profile_id.is_none() {
            match self.child_name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() && name.chars().count() <= Self::MAX_NAME_CHARS => {}
                _ => {
                    return Err(Error::BadRequest {
                        message: format!(
                            "child_name (1 to {} characters) is required when no profile_id is given",
                            Self::MAX_NAME_CHARS
                        ),
                    });
                }
            }
            if self.age.is_none() {
                return Err(Error::BadRequest {
                    message: "age is required when no profile_id is given".to_string(),
                });
            }
        }

        if let Some(age) = self.age
            && !(Self::MIN_AGE..=Self::MAX_AGE).contains(&age)
        {
            return Err(Error::BadRequest {
                message: format!("age must be between {} and {}", Self::MIN_AGE, Self::MAX_AGE),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SceneResponse {
    pub scene_number: i32,
    pub description: String,
    #[serde(default)]
    pub characters_present: Vec<String>,
    pub image_prompt: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: StoryId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub profile_id: Option<ProfileId>,
    pub title: String,
    pub story_text: String,
    pub key_message: String,
    pub tone: StoryTone,
    pub child_name: String,
    pub age: i32,
    pub fear_or_challenge: String,
    pub favorite_items: Vec<String>,
    pub family_members: BTreeMap<String, String>,
    pub scenes: Vec<SceneResponse>,
    /// One per scene, in scene order
    pub image_urls: Vec<String>,
    pub word_count: i32,
    /// Minutes, at least 1
    pub reading_time: i32,
    pub model_used: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub generation_time_ms: i64,
    /// True when the narrative model failed and the fallback story was used
    pub used_fallback: bool,
    pub usage_type: String,
    pub is_favorite: bool,
    pub rating: Option<i16>,
    pub read_count: i32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StoryDBResponse> for StoryResponse {
    fn from(db: StoryDBResponse) -> Self {
        let image_urls = db.scenes.iter().map(|s| s.image_url.clone()).collect();
        Self {
            id: db.id,
            profile_id: db.profile_id,
            title: db.title,
            story_text: db.story_text,
            key_message: db.key_message,
            tone: db.tone,
            child_name: db.child_name,
            age: db.age,
            fear_or_challenge: db.fear_or_challenge,
            favorite_items: db.favorite_items,
            family_members: db.family_members,
            scenes: db.scenes,
            image_urls,
            word_count: db.word_count,
            reading_time: db.reading_time,
            model_used: db.model_used,
            prompt_tokens: db.prompt_tokens,
            completion_tokens: db.completion_tokens,
            generation_time_ms: db.generation_time_ms,
            used_fallback: db.used_fallback,
            usage_type: db.usage_type,
            is_favorite: db.is_favorite,
            rating: db.rating,
            read_count: db.read_count,
            last_read_at: db.last_read_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Result of a successful generation
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GeneratedStoryResponse {
    #[serde(flatten)]
    pub story: StoryResponse,
    /// How this generation was billed
    pub generation_usage: UsageType,
    pub credits_remaining: i32,
    /// Character reference used for illustration consistency, keyed by lowercased name
    pub characters: BTreeMap<String, CharacterProfile>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListStoriesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only stories generated for this profile
    #[param(value_type = Option<String>, format = "uuid")]
    pub profile_id: Option<ProfileId>,

    /// Only favourites (default: false)
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub favorites_only: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RatingRequest {
    /// 1 to 5
    pub rating: i16,
}

impl RatingRequest {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(Error::BadRequest {
                message: format!("Rating must be between 1 and 5, got {}", self.rating),
            });
        }
        Ok(())
    }
}

/// Age bands the story templates are grouped by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgeGroup {
    Toddler,
    Preschool,
    EarlyElementary,
    Elementary,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Toddler,
        AgeGroup::Preschool,
        AgeGroup::EarlyElementary,
        AgeGroup::Elementary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Toddler => "toddler",
            AgeGroup::Preschool => "preschool",
            AgeGroup::EarlyElementary => "early_elementary",
            AgeGroup::Elementary => "elementary",
        }
    }

    fn template(self) -> (&'static str, &'static [&'static str], StoryTone) {
        match self {
            AgeGroup::Toddler => (
                "2-4 years",
                &[
                    "Bedtime fears",
                    "Separation anxiety",
                    "Potty training",
                    "Sharing toys",
                    "First day at daycare",
                    "Fear of loud noises",
                    "Trying new foods",
                ],
                StoryTone::Calm,
            ),
            AgeGroup::Preschool => (
                "4-6 years",
                &[
                    "First day of school",
                    "Making friends",
                    "Fear of the dark",
                    "Doctor/dentist visits",
                    "Swimming lessons",
                    "Sleeping alone",
                    "Following rules",
                ],
                StoryTone::Empowering,
            ),
            AgeGroup::EarlyElementary => (
                "6-8 years",
                &[
                    "Test anxiety",
                    "Public speaking",
                    "Bullying",
                    "Making mistakes",
                    "Team sports",
                    "Sleepovers",
                    "Pet loss",
                ],
                StoryTone::Adventure,
            ),
            AgeGroup::Elementary => (
                "8-10 years",
                &[
                    "Academic pressure",
                    "Peer pressure",
                    "Self-confidence",
                    "Time management",
                    "Competition anxiety",
                    "Family changes",
                    "Technology boundaries",
                ],
                StoryTone::Empowering,
            ),
        }
    }
}

/// Common fears and challenges for an age band, with the tone that suits it
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoryTemplate {
    pub age_group: AgeGroup,
    pub age_range: String,
    pub common_challenges: Vec<String>,
    pub recommended_tone: StoryTone,
}

impl From<AgeGroup> for StoryTemplate {
    fn from(age_group: AgeGroup) -> Self {
        let (age_range, challenges, recommended_tone) = age_group.template();
        Self {
            age_group,
            age_range: age_range.to_string(),
            common_challenges: challenges.iter().map(|c| c.to_string()).collect(),
            recommended_tone,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StoryTemplatesQuery {
    /// One of toddler, preschool, early_elementary, elementary. Unknown values list every group.
    pub age_group: Option<String>,
}

/// Templates for the requested group, or every group
pub fn story_templates(age_group: Option<&str>) -> Vec<StoryTemplate> {
    let requested = age_group.map(|g| g.trim().to_ascii_lowercase());
    match AgeGroup::ALL.into_iter().find(|g| requested.as_deref() == Some(g.as_str())) {
        Some(group) => vec![group.into()],
        None => AgeGroup::ALL.into_iter().map(Into::into).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_story_templates_filter_by_age_group() {
        let all = story_templates(None);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].age_range, "2-4 years");
        assert_eq!(all[0].recommended_tone, StoryTone::Calm);

        let preschool = story_templates(Some(" Preschool "));
        assert_eq!(preschool.len(), 1);
        assert_eq!(preschool[0].age_group, AgeGroup::Preschool);
        assert!(preschool[0].common_challenges.iter().any(|c| c == "Fear of the dark"));

        assert_eq!(story_templates(Some("teen")).len(), 4);
    }

    #[test]
    fn test_tone_parsing_is_lenient() {
        assert_eq!(StoryTone::parse_lenient("Bedtime"), StoryTone::Bedtime);
        assert_eq!(StoryTone::parse_lenient(" calm "), StoryTone::Calm);
        assert_eq!(StoryTone::parse_lenient("spooky"), StoryTone::Empowering);
        assert_eq!(StoryTone::parse_lenient(""), StoryTone::Empowering);

        let tone: StoryTone = serde_json::from_value(json!("whimsical")).unwrap();
        assert_eq!(tone, StoryTone::Empowering);
    }

    #[test]
    fn test_tone_descriptors() {
        assert_eq!(
            StoryTone::Empowering.descriptor(),
            "encouraging, brave, and confidence-building with triumphant moments"
        );
        assert!(StoryTone::Bedtime.descriptor().contains("sleepy"));
    }

    #[test]
    fn test_generate_request_defaults() {
        let request: GenerateStoryRequest = serde_json::from_value(json!({
            "child_name": "Emma",
            "age": 6,
            "fear_or_challenge": "afraid of the dark"
        }))
        .unwrap();
        assert_eq!(request.tone, StoryTone::Empowering);
        assert!(request.include_family);
        assert!(request.include_comfort_items);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_generate_request_requires_subject() {
        let request: GenerateStoryRequest = serde_json::from_value(json!({"fear_or_challenge": "thunder"})).unwrap();
        assert!(matches!(request.validate(), Err(Error::BadRequest { .. })));

        let request: GenerateStoryRequest = serde_json::from_value(json!({
            "profile_id": uuid::Uuid::new_v4(),
            "fear_or_challenge": "thunder"
        }))
        .unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_generate_request_bounds() {
        let request: GenerateStoryRequest = serde_json::from_value(json!({
            "child_name": "Emma",
            "age": 40,
            "fear_or_challenge": "taxes"
        }))
        .unwrap();
        assert!(request.validate().is_err());

        let request: GenerateStoryRequest = serde_json::from_value(json!({
            "child_name": "Emma",
            "age": 6,
            "fear_or_challenge": "   "
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_rating_bounds() {
        assert!(RatingRequest { rating: 5 }.validate().is_ok());
        assert!(RatingRequest { rating: 0 }.validate().is_err());
        assert!(RatingRequest { rating: 6 }.validate().is_err());
    }
}
