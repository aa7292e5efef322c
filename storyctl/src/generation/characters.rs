//! Character reference built fresh for every story: who appears, what they look like, and the part
//! they play. Illustration prompts repeat these descriptions so characters look the same in every
//! scene.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{instrument, warn};
use utoipa::ToSchema;

use super::photo_analyzer::analyze_photo;
use super::{ImageInput, VisionModel};
use crate::api::models::photos::PhotoType;
use crate::db::models::photos::PhotoDBResponse;

pub const CHILD_ROLE: &str = "brave protagonist who overcomes challenges";
const CHILD_RELATIONSHIP: &str = "main character";

/// Everything known about one character in a story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CharacterProfile {
    /// Name as written in the story
    pub name: String,
    pub relationship: String,
    pub visual_description: String,
    pub personality_traits: Vec<String>,
    pub role_in_story: String,
}

/// Characters keyed by lowercased name, in the order they were added (the child first)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterMap {
    entries: Vec<(String, CharacterProfile)>,
}

impl CharacterMap {
    /// Add a character. The first character with a given name is kept; returns false when
    /// `profile` was not added.
    pub fn insert(&mut self, profile: CharacterProfile) -> bool {
        let key = profile.name.trim().to_lowercase();
        if self.entries.iter().any(|(k, _)| *k == key) {
            return false;
        }
        self.entries.push((key, profile));
        true
    }


    /// Case-insensitive lookup. A miss means no consistency data for that name.
    pub fn get(&self, name: &str) -> Option<&CharacterProfile> {
        let key = name.trim().to_lowercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterProfile> {
        self.entries.iter().map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, CharacterProfile> {
        self.entries.iter().cloned().collect()
    }
}

/// Personality traits as they arrive from clients and storage
#[derive(Debug, Clone, PartialEq)]
pub enum RawTraits {
    Missing,
    /// A JSON-encoded list, or a plain comma-separated list
    Text(String),
    List(Vec<RawTrait>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawTrait {
    Name(String),
    /// `{"trait": ..}` or `{"name": ..}`
    Object { trait_name: Option<String> },
    /// Anything else in a list; ignored
    Unrecognized,
}

impl RawTraits {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => RawTraits::Missing,
            Value::String(s) => RawTraits::Text(s.clone()),
            Value::Array(items) => RawTraits::List(items.iter().map(RawTrait::from_json).collect()),
            Value::Object(_) => RawTraits::List(vec![RawTrait::from_json(value)]),
            Value::Bool(_) | Value::Number(_) => RawTraits::Missing,
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RawTraits::List(names.into_iter().map(|n| RawTrait::Name(n.into())).collect())
    }
}

impl RawTrait {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::String(s) => RawTrait::Name(s.clone()),
            Value::Object(map) => RawTrait::Object {
                trait_name: map
                    .get("trait")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            _ => RawTrait::Unrecognized,
        }
    }

    fn name(self) -> Option<String> {
        match self {
            RawTrait::Name(name) => Some(name),
            RawTrait::Object { trait_name } => trait_name,
            RawTrait::Unrecognized => None,
        }
    }
}

/// Flatten any trait representation into trimmed, non-empty names, keeping order. Never fails.
pub fn normalize_traits(raw: RawTraits) -> Vec<String> {
    match raw {
        RawTraits::Missing => Vec::new(),
        RawTraits::List(items) => items
            .into_iter()
            .filter_map(RawTrait::name)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        RawTraits::Text(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') || trimmed.starts_with('{') || trimmed.starts_with('"') {
                if let Ok(decoded) = serde_json::from_str::<Value>(trimmed) {
                    return normalize_traits(RawTraits::from_json(&decoded));
                }
            }
            normalize_traits(RawTraits::from_names(trimmed.split(',')))
        }
    }
}

/// Owned photo bytes handed to the builder
#[derive(Debug, Clone)]
pub struct SubjectPhoto {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl SubjectPhoto {
    fn as_input(&self) -> ImageInput<'_> {
        ImageInput {
            content_type: &self.content_type,
            data: &self.data,
        }
    }
}

/// The child a story is about
#[derive(Debug, Clone)]
pub struct ChildSubject {
    pub name: String,
    pub age: i32,
    pub traits: RawTraits,
    pub photo: Option<SubjectPhoto>,
}

#[derive(Debug, Clone)]
pub struct FamilySubject {
    pub name: String,
    pub relation: String,
    pub traits: RawTraits,
    pub photo: Option<SubjectPhoto>,
}

pub fn default_child_description(age: i32) -> String {
    format!("A cheerful {age}-year-old child with bright eyes and a warm smile, wearing comfortable, colorful clothing")
}

/// Pick the photo that best shows the child: the primary photo, else the first `profile` photo,
/// else the first upload. Photos of family members and comfort items never qualify.
pub fn select_representative_photo(photos: &[PhotoDBResponse]) -> Option<&PhotoDBResponse> {
    let mut own: Vec<&PhotoDBResponse> = photos
        .iter()
        .filter(|p| p.family_member_id.is_none() && p.comfort_item_id.is_none())
        .collect();
    own.sort_by_key(|p| p.created_at);

    own.iter()
        .find(|p| p.is_primary)
        .or_else(|| own.iter().find(|p| p.photo_type == PhotoType::Profile))
        .or_else(|| own.first())
        .copied()
}

/// Pick a family member's photo: their primary photo if flagged, else their first
pub fn select_family_photo(photos: &[PhotoDBResponse], family_member_id: uuid::Uuid) -> Option<&PhotoDBResponse> {
    let mut theirs: Vec<&PhotoDBResponse> = photos
        .iter()
        .filter(|p| p.family_member_id == Some(family_member_id))
        .collect();
    theirs.sort_by_key(|p| p.created_at);
    theirs.iter().find(|p| p.is_primary).or_else(|| theirs.first()).copied()
}

async fn build_family_member(vision: &dyn VisionModel, member: &FamilySubject, child_name: &str) -> CharacterProfile {
    let visual_description = match &member.photo {
        Some(photo) => analyze_photo(vision, photo.as_input(), &member.name, &member.relation).await.text,
        None => format!("A caring {}", member.relation),
    };
    CharacterProfile {
        name: member.name.clone(),
        relationship: member.relation.clone(),
        visual_description,
        personality_traits: normalize_traits(member.traits.clone()),
        role_in_story: format!("supportive {} who helps {}", member.relation, child_name),
    }
}

/// Build the character reference for one story. Photo descriptions run concurrently; at most
/// `max_family_members` family members are included, in the order given.
#[instrument(skip_all, fields(child = %child.name, family = family.len(), include_family))]
pub async fn build_characters(
    vision: &dyn VisionModel,
    child: &ChildSubject,
    family: &[FamilySubject],
    include_family: bool,
    max_family_members: usize,
) -> CharacterMap {
    let child_description = async {
        match &child.photo {
            Some(photo) => analyze_photo(vision, photo.as_input(), &child.name, "child").await.text,
            None => default_child_description(child.age),
        }
    };

    let family: &[FamilySubject] = if include_family {
        &family[..family.len().min(max_family_members)]
    } else {
        &[]
    };
    let members = join_all(family.iter().map(|m| build_family_member(vision, m, &child.name)));

    let (child_description, members) = futures::join!(child_description, members);

    let mut characters = CharacterMap::default();
    characters.insert(CharacterProfile {
        name: child.name.clone(),
        relationship: CHILD_RELATIONSHIP.to_string(),
        visual_description: child_description,
        personality_traits: normalize_traits(child.traits.clone()),
        role_in_story: CHILD_ROLE.to_string(),
    });
    let child_key = child.name.trim().to_lowercase();
    for mut member in members {
        // The child keeps their name; a relative sharing it is told apart by relation
        if member.name.trim().to_lowercase() == child_key {
            member.name = format!("{} ({})", member.name.trim(), member.relationship);
        }
        let name = member.name.clone();
        if !characters.insert(member) {
            warn!(%name, "Duplicate family member left out of the character reference");
        }
    }
    characters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeVision;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn expected() -> Vec<String> {
        vec!["brave".to_string(), "curious".to_string(), "kind".to_string()]
    }

    #[test]
    fn test_normalize_list_of_strings() {
        assert_eq!(normalize_traits(RawTraits::from_json(&json!(["brave", " curious ", "kind"]))), expected());
    }

    #[test]
    fn test_normalize_list_of_objects() {
        let raw = json!([{"trait": "brave", "strength": 5}, {"trait": "curious"}, {"name": "kind"}]);
        assert_eq!(normalize_traits(RawTraits::from_json(&raw)), expected());
    }

    #[test]
    fn test_normalize_json_encoded_string() {
        let encoded = json!(r#"["brave", "curious", "kind"]"#);
        assert_eq!(normalize_traits(RawTraits::from_json(&encoded)), expected());

        let encoded_objects = json!(r#"[{"trait": "brave"}, {"trait": "curious"}, {"trait": "kind"}]"#);
        assert_eq!(normalize_traits(RawTraits::from_json(&encoded_objects)), expected());
    }

    #[test]
    fn test_normalize_comma_separated_string() {
        assert_eq!(normalize_traits(RawTraits::Text("brave, curious,,kind ".to_string())), expected());
    }

    #[test]
    fn test_normalize_degrades_without_panicking() {
        assert!(normalize_traits(RawTraits::Missing).is_empty());
        assert!(normalize_traits(RawTraits::from_json(&json!(42))).is_empty());
        assert!(normalize_traits(RawTraits::from_json(&json!([1, null, {"level": 3}]))).is_empty());
        assert_eq!(normalize_traits(RawTraits::Text("[not json".to_string())), vec!["[not json".to_string()]);
        assert_eq!(normalize_traits(RawTraits::from_json(&json!({"trait": "brave"}))), vec!["brave".to_string()]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            json!(["brave", "curious"]),
            json!([{"trait": " brave"}, {"name": "kind "}]),
            json!(r#"["a", "b, c"]"#),
            json!("x, y"),
            json!(null),
        ];
        for input in inputs {
            let once = normalize_traits(RawTraits::from_json(&input));
            let twice = normalize_traits(RawTraits::from_json(&json!(once.clone())));
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    fn photo(photo_type: PhotoType, is_primary: bool, age_minutes: i64) -> PhotoDBResponse {
        PhotoDBResponse {
            id: Uuid::new_v4(),
            profile_id: Uuid::nil(),
            family_member_id: None,
            comfort_item_id: None,
            photo_type,
            description: None,
            is_primary,
            content_type: "image/jpeg".to_string(),
            size_bytes: 10,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn test_representative_photo_order() {
        let gallery_old = photo(PhotoType::Gallery, false, 30);
        let profile = photo(PhotoType::Profile, false, 20);
        let primary = photo(PhotoType::Gallery, true, 10);

        let all = vec![gallery_old.clone(), profile.clone(), primary.clone()];
        assert_eq!(select_representative_photo(&all).map(|p| p.id), Some(primary.id));

        let no_primary = vec![gallery_old.clone(), profile.clone()];
        assert_eq!(select_representative_photo(&no_primary).map(|p| p.id), Some(profile.id));

        let gallery_new = photo(PhotoType::Gallery, false, 5);
        let only_gallery = vec![gallery_new, gallery_old.clone()];
        assert_eq!(select_representative_photo(&only_gallery).map(|p| p.id), Some(gallery_old.id));

        assert!(select_representative_photo(&[]).is_none());
    }

    #[test]
    fn test_family_photos_are_not_representative() {
        let mut dad = photo(PhotoType::Family, true, 10);
        dad.family_member_id = Some(Uuid::new_v4());
        let mut bunny = photo(PhotoType::ComfortItem, false, 10);
        bunny.comfort_item_id = Some(Uuid::new_v4());

        assert!(select_representative_photo(&[dad.clone(), bunny]).is_none());
        assert_eq!(
            select_family_photo(std::slice::from_ref(&dad), dad.family_member_id.unwrap()).map(|p| p.id),
            Some(dad.id)
        );
    }

    fn child(photo: Option<SubjectPhoto>) -> ChildSubject {
        ChildSubject {
            name: "Emma".to_string(),
            age: 6,
            traits: RawTraits::from_names(["brave"]),
            photo,
        }
    }

    fn relative(name: &str, relation: &str) -> FamilySubject {
        FamilySubject {
            name: name.to_string(),
            relation: relation.to_string(),
            traits: RawTraits::Missing,
            photo: None,
        }
    }

    #[tokio::test]
    async fn test_child_without_photo_gets_default_description() {
        let vision = FakeVision::failing();
        let characters = build_characters(&vision, &child(None), &[], true, 3).await;

        assert_eq!(characters.len(), 1);
        let emma = characters.get("EMMA").unwrap();
        assert_eq!(emma.visual_description, default_child_description(6));
        assert_eq!(emma.role_in_story, CHILD_ROLE);
        assert_eq!(emma.personality_traits, vec!["brave".to_string()]);
        assert!(vision.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_child_photo_is_analyzed() {
        let vision = FakeVision::answering("Long dark braids and brown eyes.");
        let photo = SubjectPhoto {
            content_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let characters = build_characters(&vision, &child(Some(photo)), &[], true, 3).await;
        assert_eq!(characters.get("emma").unwrap().visual_description, "Long dark braids and brown eyes.");
    }

    #[tokio::test]
    async fn test_family_is_capped_and_described() {
        let vision = FakeVision::failing();
        let family = vec![
            relative("Mom", "mother"),
            relative("Dad", "father"),
            relative("Leo", "brother"),
            relative("Rex", "dog"),
        ];
        let characters = build_characters(&vision, &child(None), &family, true, 3).await;

        assert_eq!(characters.len(), 4);
        assert!(characters.get("rex").is_none());
        let mom = characters.get("mom").unwrap();
        assert_eq!(mom.visual_description, "A caring mother");
        assert_eq!(mom.role_in_story, "supportive mother who helps Emma");

        let names: Vec<_> = characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Emma", "Mom", "Dad", "Leo"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_relative_sharing_the_childs_name_does_not_replace_the_child() {
        let vision = FakeVision::failing();
        let family = vec![
            relative("emma", "grandmother"),
            relative("Mom", "mother"),
            relative("MOM", "aunt"),
        ];
        let characters = build_characters(&vision, &child(None), &family, true, 4).await;

        let emma = characters.get("Emma").unwrap();
        assert_eq!(emma.name, "Emma");
        assert_eq!(emma.role_in_story, CHILD_ROLE);
        assert_eq!(emma.visual_description, default_child_description(6));

        let grandmother = characters.get("emma (grandmother)").unwrap();
        assert_eq!(grandmother.role_in_story, "supportive grandmother who helps Emma");

        let names: Vec<_> = characters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Emma", "emma (grandmother)", "Mom"]);
    }

    #[test]
    fn test_insert_keeps_first_entry() {
        let profile = |name: &str, role: &str| CharacterProfile {
            name: name.to_string(),
            relationship: "x".to_string(),
            visual_description: "y".to_string(),
            personality_traits: vec![],
            role_in_story: role.to_string(),
        };
        let mut map = CharacterMap::default();
        assert!(map.insert(profile("Leo", "first")));
        assert!(!map.insert(profile("leo", "second")));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("LEO").unwrap().role_in_story, "first");
    }

    #[tokio::test]
    async fn test_family_excluded_when_not_requested() {
        let vision = FakeVision::failing();
        let characters = build_characters(&vision, &child(None), &[relative("Mom", "mother")], false, 3).await;
        assert_eq!(characters.len(), 1);
    }
}
