//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases so signatures say which entity they expect:
//!
//! - [`UserId`]: account identifier
//! - [`ProfileId`]: child profile identifier
//! - [`FamilyMemberId`], [`ComfortItemId`], [`PhotoId`]: profile sub-resources
//! - [`StoryId`]: generated story identifier
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use uuid::Uuid;

pub type UserId = Uuid;
pub type ProfileId = Uuid;
pub type FamilyMemberId = Uuid;
pub type ComfortItemId = Uuid;
pub type PhotoId = Uuid;
pub type StoryId = Uuid;
pub type SubscriptionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
