//! Database models for uploaded photos.

use chrono::{DateTime, Utc};

use crate::api::models::photos::PhotoType;
use crate::types::{ComfortItemId, FamilyMemberId, PhotoId, ProfileId};

#[derive(Debug, Clone)]
pub struct PhotoCreateDBRequest {
    pub profile_id: ProfileId,
    pub family_member_id: Option<FamilyMemberId>,
    pub comfort_item_id: Option<ComfortItemId>,
    pub photo_type: PhotoType,
    pub description: Option<String>,
    pub is_primary: bool,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Photo metadata; the bytes are only loaded on demand
#[derive(Debug, Clone)]
pub struct PhotoDBResponse {
    pub id: PhotoId,
    pub profile_id: ProfileId,
    pub family_member_id: Option<FamilyMemberId>,
    pub comfort_item_id: Option<ComfortItemId>,
    pub photo_type: PhotoType,
    pub description: Option<String>,
    pub is_primary: bool,
    pub content_type: String,
    pub size_bytes: i32,
    pub created_at: DateTime<Utc>,
}

/// Raw bytes of a photo, for serving and for analysis
#[derive(Debug, Clone)]
pub struct PhotoContent {
    pub id: PhotoId,
    pub content_type: String,
    pub data: Vec<u8>,
}
