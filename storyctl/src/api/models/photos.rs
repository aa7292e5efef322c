//! API models for photos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::db::models::photos::PhotoDBResponse;
use crate::types::{ComfortItemId, FamilyMemberId, PhotoId, ProfileId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Default, ToSchema)]
#[sqlx(type_name = "photo_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PhotoType {
    Profile,
    #[default]
    Gallery,
    Family,
    ComfortItem,
    Object,
}

impl fmt::Display for PhotoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhotoType::Profile => "profile",
            PhotoType::Gallery => "gallery",
            PhotoType::Family => "family",
            PhotoType::ComfortItem => "comfort_item",
            PhotoType::Object => "object",
        };
        f.write_str(s)
    }
}

impl FromStr for PhotoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Ok(PhotoType::Profile),
            "gallery" => Ok(PhotoType::Gallery),
            "family" => Ok(PhotoType::Family),
            "comfort_item" => Ok(PhotoType::ComfortItem),
            "object" => Ok(PhotoType::Object),
            other => Err(format!("Unknown photo type '{other}'")),
        }
    }
}

/// Multipart form accepted by the upload endpoint. Only `file` is required.
#[allow(dead_code)]
#[derive(Debug, ToSchema)]
pub struct PhotoUploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub photo_type: Option<PhotoType>,
    pub description: Option<String>,
    pub is_primary: Option<bool>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub family_member_id: Option<FamilyMemberId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub comfort_item_id: Option<ComfortItemId>,
}

/// Multipart form for previewing how a photographed person will be drawn. Only `file` and
/// `character_name` are required.
#[allow(dead_code)]
#[derive(Debug, ToSchema)]
pub struct CharacterPhotoForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub character_name: String,
    /// Defaults to "child"
    pub relationship: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CharacterPreviewResponse {
    pub character_name: String,
    pub relationship: String,
    pub visual_description: String,
    /// Illustration prompt the character would be drawn from
    pub sample_illustration_prompt: String,
    /// False when the vision model failed and a generic description was used
    pub photo_processed: bool,
}

impl CharacterPreviewResponse {
    pub fn new(character_name: String, relationship: String, visual_description: String, photo_processed: bool) -> Self {
        let sample_illustration_prompt = format!(
            "Children's book illustration character:\n{character_name} ({relationship}): {visual_description}\nStyle: Warm, friendly cartoon suitable for children's stories"
        );
        Self {
            character_name,
            relationship,
            visual_description,
            sample_illustration_prompt,
            photo_processed,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PhotoResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PhotoId,
    #[schema(value_type = String, format = "uuid")]
    pub profile_id: ProfileId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub family_member_id: Option<FamilyMemberId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub comfort_item_id: Option<ComfortItemId>,
    pub photo_type: PhotoType,
    pub description: Option<String>,
    pub is_primary: bool,
    pub content_type: String,
    pub size_bytes: i32,
    pub url: String,
    /// Thumbnails are not generated; this points at the original upload
    pub thumbnail_url: String,
    pub created_at: DateTime<Utc>,
}

/// Path the photo bytes are served from
pub fn photo_content_url(id: PhotoId) -> String {
    format!("/api/v1/photos/{id}/content")
}

impl From<PhotoDBResponse> for PhotoResponse {
    fn from(db: PhotoDBResponse) -> Self {
        let url = photo_content_url(db.id);
        Self {
            id: db.id,
            profile_id: db.profile_id,
            family_member_id: db.family_member_id,
            comfort_item_id: db.comfort_item_id,
            photo_type: db.photo_type,
            description: db.description,
            is_primary: db.is_primary,
            content_type: db.content_type,
            size_bytes: db.size_bytes,
            thumbnail_url: url.clone(),
            url,
            created_at: db.created_at,
        }
    }
}
