//! Database models for generated stories.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::api::models::stories::{SceneResponse, StoryTone};
use crate::metering::UsageType;
use crate::types::{ProfileId, StoryId, UserId};

/// Everything persisted for one successful generation
#[derive(Debug, Clone)]
pub struct StoryCreateDBRequest {
    pub user_id: UserId,
    pub profile_id: Option<ProfileId>,
    pub title: String,
    pub story_text: String,
    pub key_message: String,
    pub tone: StoryTone,
    pub child_name: String,
    pub age: i32,
    pub fear_or_challenge: String,
    pub favorite_items: Vec<String>,
    /// name -> relation
    pub family_members: BTreeMap<String, String>,
    pub scenes: Vec<SceneResponse>,
    pub word_count: i32,
    pub reading_time: i32,
    pub model_used: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub generation_time_ms: i64,
    pub used_fallback: bool,
    pub usage_type: UsageType,
}

#[derive(Debug, Clone)]
pub struct StoryDBResponse {
    pub id: StoryId,
    pub user_id: UserId,
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
    pub word_count: i32,
    pub reading_time: i32,
    pub model_used: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub generation_time_ms: i64,
    pub used_fallback: bool,
    pub usage_type: String,
    pub is_favorite: bool,
    pub rating: Option<i16>,
    pub read_count: i32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
