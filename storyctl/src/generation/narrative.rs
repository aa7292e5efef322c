//! Story text: one structured call to the text model, or the fallback story.

use serde::Deserialize;
use serde_with::{DefaultOnError, DefaultOnNull, DisplayFromStr, PickFirst, serde_as};
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

use super::characters::CharacterMap;
use super::{GenerationError, TextModel};
use crate::api::models::stories::StoryTone;

pub const MAX_SCENES: usize = 5;
pub const FALLBACK_MODEL: &str = "fallback";
const FALLBACK_KEY_MESSAGE: &str = "You are braver than you think";

const SYSTEM_PROMPT: &str = "You are an expert children's story writer and child psychologist who creates therapeutic \
social stories. Always maintain character consistency and respond with valid JSON.";

/// What the story should be about
#[derive(Debug, Clone)]
pub struct StoryBrief {
    pub child_name: String,
    pub age: i32,
    pub fear_or_challenge: String,
    pub tone: StoryTone,
    /// Comfort items in preference order; only the first few are named in the prompt
    pub comfort_items: Vec<String>,
    pub custom_elements: Vec<String>,
    pub favorite_places: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneDraft {
    pub scene_number: i32,
    pub description: String,
    pub characters_present: Vec<String>,
    pub image_prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Narrative {
    pub title: String,
    pub story_text: String,
    pub scenes: Vec<SceneDraft>,
    pub key_message: String,
}

/// A narrative plus how it was produced
#[derive(Debug, Clone)]
pub struct NarrativeOutcome {
    pub narrative: Narrative,
    pub model_used: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub elapsed: Duration,
    pub used_fallback: bool,
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct RawNarrative {
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    title: String,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    story_text: String,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    scenes: Vec<RawScene>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    key_message: String,
}

/// Models are loose with types here; anything unusable falls back to a default instead of
/// rejecting the story
#[serde_as]
#[derive(Debug, Deserialize)]
struct RawScene {
    /// A number or a numeric string; otherwise the scene's position is used
    #[serde(default)]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    scene_number: Option<i32>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    description: String,
    #[serde(default)]
    #[serde_as(as = "DefaultOnNull")]
    characters_present: Vec<String>,
    #[serde(default)]
    image_prompt: Option<String>,
}

/// The deterministic story used when the model cannot produce one
pub fn fallback_story(child_name: &str, fear_or_challenge: &str) -> Narrative {
    Narrative {
        title: format!("{child_name}'s Brave Day"),
        story_text: format!(
            "Once upon a time, {child_name} faced a challenge with {fear_or_challenge}. With courage and support from \
loved ones, {child_name} discovered inner strength and overcame the fear. The end."
        ),
        scenes: vec![SceneDraft {
            scene_number: 1,
            description: format!("{child_name} encounters the challenge"),
            characters_present: vec![child_name.to_string()],
            image_prompt: format!("A young child named {child_name} looking thoughtful"),
        }],
        key_message: FALLBACK_KEY_MESSAGE.to_string(),
    }
}

pub fn build_story_prompt(brief: &StoryBrief, characters: &CharacterMap, max_comfort_items: usize) -> String {
    let character_lines: Vec<String> = characters
        .iter()
        .map(|c| {
            let mut line = format!("- {} ({}): {}", c.name, c.relationship, c.visual_description);
            if !c.personality_traits.is_empty() {
                line.push_str(&format!(" Personality: {}", c.personality_traits.join(", ")));
            }
            line
        })
        .collect();

    let favorites: Vec<&str> = brief
        .comfort_items
        .iter()
        .take(max_comfort_items)
        .chain(brief.custom_elements.iter())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let favorites = if favorites.is_empty() {
        "None specified".to_string()
    } else {
        favorites.join(", ")
    };

    let setting = if brief.favorite_places.is_empty() {
        "familiar, safe environments".to_string()
    } else {
        brief.favorite_places.join(", ")
    };

    let name = &brief.child_name;
    let age = brief.age;
    format!(
        r#"Create a personalized children's social story for {name} to help overcome: "{challenge}"

CHARACTER PROFILES (maintain consistency throughout):
{characters}

STORY CONTEXT:
- Main character: {name}, age {age}
- Comfort items/favorites: {favorites}
- Story tone: {tone}
- Setting: {setting}

REQUIREMENTS:
1. Story length: 300-500 words, age-appropriate for {age}-year-old
2. Include {name} as the brave protagonist who successfully overcomes the challenge
3. Naturally incorporate family members as supportive characters
4. Include comfort items as helpful tools or companions
5. Create 4-5 scenes showing clear progression from challenge to success
6. Use simple, encouraging language appropriate for the child's age
7. End with {name} feeling proud and confident

IMPORTANT: Maintain exact character descriptions throughout for visual consistency.

Return as JSON:
{{
    "title": "Engaging, personalized title",
    "story_text": "Complete story with paragraphs separated by \n\n",
    "scenes": [
        {{
            "scene_number": 1,
            "description": "What happens in this scene",
            "characters_present": ["list of characters in scene"],
            "image_prompt": "Detailed visual description including exact character appearances"
        }}
    ],
    "key_message": "The main lesson or encouragement"
}}"#,
        challenge = brief.fear_or_challenge,
        characters = character_lines.join("\n"),
        tone = brief.tone.descriptor(),
    )
}

/// Remove a surrounding markdown code fence, if any
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse and tidy the model's JSON. Output without text or scenes is rejected.
pub fn parse_narrative(content: &str, child_name: &str) -> Result<Narrative, GenerationError> {
    let raw: RawNarrative = serde_json::from_str(strip_code_fence(content))?;

    if raw.title.trim().is_empty() || raw.story_text.trim().is_empty() {
        return Err(GenerationError::MalformedResponse("story has no title or text".to_string()));
    }

    let scenes: Vec<SceneDraft> = raw
        .scenes
        .into_iter()
        .filter(|s| !s.description.trim().is_empty())
        .take(MAX_SCENES)
        .enumerate()
        .map(|(i, scene)| {
            let mut characters_present: Vec<String> = scene
                .characters_present
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if characters_present.is_empty() {
                characters_present.push(child_name.to_string());
            }
            let description = scene.description.trim().to_string();
            SceneDraft {
                scene_number: scene.scene_number.filter(|n| *n > 0).unwrap_or(i as i32 + 1),
                image_prompt: scene
                    .image_prompt
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| description.clone()),
                description,
                characters_present,
            }
        })
        .collect();

    if scenes.is_empty() {
        return Err(GenerationError::MalformedResponse("story has no scenes".to_string()));
    }

    let key_message = match raw.key_message.trim() {
        "" => FALLBACK_KEY_MESSAGE.to_string(),
        message => message.to_string(),
    };

    Ok(Narrative {
        title: raw.title.trim().to_string(),
        story_text: raw.story_text.trim().to_string(),
        scenes,
        key_message,
    })
}

/// Exactly one text-model call
pub async fn request_story(
    model: &dyn TextModel,
    brief: &StoryBrief,
    characters: &CharacterMap,
    max_comfort_items: usize,
) -> Result<NarrativeOutcome, GenerationError> {
    let started = Instant::now();
    let prompt = build_story_prompt(brief, characters, max_comfort_items);
    let completion = model.complete_json(SYSTEM_PROMPT, &prompt).await?;
    let narrative = parse_narrative(&completion.content, &brief.child_name)?;

    Ok(NarrativeOutcome {
        narrative,
        model_used: completion.model,
        prompt_tokens: completion.prompt_tokens,
        completion_tokens: completion.completion_tokens,
        elapsed: started.elapsed(),
        used_fallback: false,
    })
}

/// Write the story, using [`fallback_story`] if the model call or its output fails
#[instrument(skip_all, fields(child = %brief.child_name, tone = %brief.tone))]
pub async fn write_story(
    model: &dyn TextModel,
    brief: &StoryBrief,
    characters: &CharacterMap,
    max_comfort_items: usize,
) -> NarrativeOutcome {
    let started = Instant::now();
    match request_story(model, brief, characters, max_comfort_items).await {
        Ok(outcome) => outcome,
        Err(error) => {
            warn!(%error, "Story text generation failed, using fallback story");
            NarrativeOutcome {
                narrative: fallback_story(&brief.child_name, &brief.fear_or_challenge),
                model_used: FALLBACK_MODEL.to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
                elapsed: started.elapsed(),
                used_fallback: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::characters::CharacterProfile;
    use crate::test_utils::{FakeText, story_json};
    use serde_json::json;

    fn brief() -> StoryBrief {
        StoryBrief {
            child_name: "Emma".to_string(),
            age: 6,
            fear_or_challenge: "afraid of the dark".to_string(),
            tone: StoryTone::Empowering,
            comfort_items: vec!["Mr. Bunny".to_string(), "blue blanket".to_string(), "night light".to_string()],
            custom_elements: vec!["a friendly owl".to_string()],
            favorite_places: vec![],
        }
    }

    fn characters() -> CharacterMap {
        let mut map = CharacterMap::default();
        map.insert(CharacterProfile {
            name: "Emma".to_string(),
            relationship: "main character".to_string(),
            visual_description: "Curly red hair".to_string(),
            personality_traits: vec!["brave".to_string(), "curious".to_string()],
            role_in_story: "brave protagonist who overcomes challenges".to_string(),
        });
        map
    }

    #[test]
    fn test_prompt_contents() {
        let prompt = build_story_prompt(&brief(), &characters(), 2);
        assert!(prompt.contains(r#"help overcome: "afraid of the dark""#));
        assert!(prompt.contains("- Emma (main character): Curly red hair Personality: brave, curious"));
        assert!(prompt.contains("Comfort items/favorites: Mr. Bunny, blue blanket, a friendly owl"));
        assert!(!prompt.contains("night light"));
        assert!(prompt.contains("encouraging, brave, and confidence-building with triumphant moments"));
        assert!(prompt.contains("Setting: familiar, safe environments"));
        assert!(prompt.contains("300-500 words"));
        assert!(prompt.contains("4-5 scenes"));
    }

    #[test]
    fn test_prompt_without_favorites() {
        let mut brief = brief();
        brief.comfort_items.clear();
        brief.custom_elements.clear();
        brief.favorite_places = vec!["the park".to_string(), "grandma's garden".to_string()];
        let prompt = build_story_prompt(&brief, &characters(), 2);
        assert!(prompt.contains("Comfort items/favorites: None specified"));
        assert!(prompt.contains("Setting: the park, grandma's garden"));
    }

    #[test]
    fn test_parse_tolerates_code_fences() {
        let fenced = format!("```json\n{}\n```", story_json("Emma", 4));
        let narrative = parse_narrative(&fenced, "Emma").unwrap();
        assert_eq!(narrative.title, "Emma and the Night Light");
        assert_eq!(narrative.scenes.len(), 4);
    }

    #[test]
    fn test_parse_truncates_extra_scenes() {
        let narrative = parse_narrative(&story_json("Emma", 7), "Emma").unwrap();
        assert_eq!(narrative.scenes.len(), MAX_SCENES);
        assert_eq!(narrative.scenes[4].scene_number, 5);
    }

    #[test]
    fn test_parse_fills_scene_defaults() {
        let content = json!({
            "title": "T",
            "story_text": "Text",
            "scenes": [{"description": "Emma finds a torch"}],
        })
        .to_string();
        let narrative = parse_narrative(&content, "Emma").unwrap();
        let scene = &narrative.scenes[0];
        assert_eq!(scene.scene_number, 1);
        assert_eq!(scene.characters_present, vec!["Emma".to_string()]);
        assert_eq!(scene.image_prompt, "Emma finds a torch");
        assert_eq!(narrative.key_message, "You are braver than you think");
    }

    #[test]
    fn test_parse_accepts_loosely_typed_scenes() {
        let content = json!({
            "title": "Emma and the Night Light",
            "story_text": "Emma was brave.",
            "scenes": [
                {"scene_number": "1", "description": "Emma hears a noise", "characters_present": null},
                {"scene_number": 2, "description": "Mom brings a torch", "characters_present": ["Emma", "Mom"]},
                {"scene_number": "three", "description": "Emma smiles", "image_prompt": null},
                {"scene_number": null, "description": "Emma sleeps"},
            ],
            "key_message": null,
        })
        .to_string();

        let narrative = parse_narrative(&content, "Emma").unwrap();
        let numbers: Vec<i32> = narrative.scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(narrative.scenes[0].characters_present, vec!["Emma".to_string()]);
        assert_eq!(narrative.scenes[1].characters_present, vec!["Emma".to_string(), "Mom".to_string()]);
        assert_eq!(narrative.scenes[2].image_prompt, "Emma smiles");
        assert_eq!(narrative.key_message, "You are braver than you think");
    }

    #[test_log::test(tokio::test)]
    async fn test_write_story_keeps_loosely_typed_model_output() {
        let content = json!({
            "title": "Emma and the Storm",
            "story_text": "Thunder rumbled, and Emma held Mr. Bunny tight.",
            "scenes": [
                {"scene_number": "1", "description": "Thunder rumbles", "characters_present": null},
                {"scene_number": "2", "description": "Emma counts to ten", "characters_present": ["Emma"]},
            ],
            "key_message": "Storms pass",
        })
        .to_string();
        let text = FakeText::answering(&content);

        let outcome = write_story(&text, &brief(), &characters(), 2).await;
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.narrative.title, "Emma and the Storm");
        assert_eq!(outcome.narrative.scenes.len(), 2);
    }

    #[test]
    fn test_parse_rejects_unusable_output() {
        assert!(parse_narrative("not json", "Emma").is_err());
        assert!(parse_narrative(&json!({"title": "T", "story_text": "x", "scenes": []}).to_string(), "Emma").is_err());
        assert!(parse_narrative(&json!({"title": "", "story_text": "x"}).to_string(), "Emma").is_err());
    }

    #[test]
    fn test_fallback_story() {
        let story = fallback_story("Emma", "thunderstorms");
        assert_eq!(story.title, "Emma's Brave Day");
        assert_eq!(
            story.story_text,
            "Once upon a time, Emma faced a challenge with thunderstorms. With courage and support from loved ones, \
Emma discovered inner strength and overcame the fear. The end."
        );
        assert_eq!(story.scenes.len(), 1);
        assert_eq!(story.scenes[0].description, "Emma encounters the challenge");
        assert_eq!(story.scenes[0].image_prompt, "A young child named Emma looking thoughtful");
        assert_eq!(story.key_message, "You are braver than you think");
    }

    #[tokio::test]
    async fn test_write_story_uses_model_output() {
        let text = FakeText::answering(&story_json("Emma", 5));
        let outcome = write_story(&text, &brief(), &characters(), 2).await;
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.narrative.scenes.len(), 5);
        assert_eq!(outcome.model_used, "fake-text");
        assert_eq!(outcome.prompt_tokens, 100);
        assert_eq!(text.calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_write_story_falls_back_on_error() {
        let text = FakeText::failing();
        let outcome = write_story(&text, &brief(), &characters(), 2).await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.model_used, FALLBACK_MODEL);
        assert_eq!(outcome.narrative, fallback_story("Emma", "afraid of the dark"));
        assert_eq!(text.calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_write_story_falls_back_on_invalid_json() {
        let text = FakeText::answering("Once upon a time...");
        let outcome = write_story(&text, &brief(), &characters(), 2).await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.narrative.title, "Emma's Brave Day");
    }
}
