//! Runs the generation steps in order: characters, narrative, illustrations.
//!
//! Every step recovers locally, so [`StoryPipeline::generate`] always produces a story. Metering
//! and persistence happen around it in the request handler.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument};

use super::characters::{CharacterMap, ChildSubject, FamilySubject, build_characters};
use super::illustrations::{illustrate_scenes, placeholder_illustrations};
use super::narrative::{Narrative, StoryBrief, write_story};
use super::{ImageModel, TextModel, VisionModel};
use crate::api::models::stories::SceneResponse;
use crate::config::GenerationConfig;

pub const WORDS_PER_MINUTE: i32 = 200;

pub fn word_count(text: &str) -> i32 {
    text.split_whitespace().count().try_into().unwrap_or(i32::MAX)
}

/// Minutes to read `word_count` words, at least 1
pub fn reading_time(word_count: i32) -> i32 {
    (word_count / WORDS_PER_MINUTE).max(1)
}

/// Input for one generation
#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub brief: StoryBrief,
    pub child: ChildSubject,
    pub family: Vec<FamilySubject>,
    pub include_family: bool,
    /// False when the account's plan has no image generation; every scene gets the placeholder
    pub illustrate: bool,
}

#[derive(Debug, Clone)]
pub struct GeneratedStory {
    pub narrative: Narrative,
    /// One per scene, in scene order
    pub image_urls: Vec<String>,
    pub characters: CharacterMap,
    pub model_used: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub generation_time: Duration,
    pub used_fallback: bool,
    pub word_count: i32,
    pub reading_time: i32,
}

impl GeneratedStory {
    pub fn scenes(&self) -> Vec<SceneResponse> {
        self.narrative
            .scenes
            .iter()
            .zip(&self.image_urls)
            .map(|(scene, url)| SceneResponse {
                scene_number: scene.scene_number,
                description: scene.description.clone(),
                characters_present: scene.characters_present.clone(),
                image_prompt: scene.image_prompt.clone(),
                image_url: url.clone(),
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct StoryPipeline {
    text: Arc<dyn TextModel>,
    vision: Arc<dyn VisionModel>,
    images: Arc<dyn ImageModel>,
    placeholder_image_url: String,
    max_family_members: usize,
    max_comfort_items: usize,
}

impl std::fmt::Debug for StoryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoryPipeline")
            .field("placeholder_image_url", &self.placeholder_image_url)
            .field("max_family_members", &self.max_family_members)
            .field("max_comfort_items", &self.max_comfort_items)
            .finish_non_exhaustive()
    }
}

impl StoryPipeline {
    pub fn new(
        text: Arc<dyn TextModel>,
        vision: Arc<dyn VisionModel>,
        images: Arc<dyn ImageModel>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            text,
            vision,
            images,
            placeholder_image_url: config.placeholder_image_url.clone(),
            max_family_members: config.max_family_members,
            max_comfort_items: config.max_comfort_items,
        }
    }

    /// The vision model, for one-off character reference previews
    pub fn vision(&self) -> &dyn VisionModel {
        self.vision.as_ref()
    }

    pub fn max_family_members(&self) -> usize {
        self.max_family_members
    }

    #[instrument(skip_all, fields(child = %request.child.name, illustrate = request.illustrate))]
    pub async fn generate(&self, request: &StoryRequest) -> GeneratedStory {
        let started = Instant::now();

        // Built per request and passed along; nothing is kept afterwards
        let characters = build_characters(
            self.vision.as_ref(),
            &request.child,
            &request.family,
            request.include_family,
            self.max_family_members,
        )
        .await;

        let outcome = write_story(self.text.as_ref(), &request.brief, &characters, self.max_comfort_items).await;

        let image_urls = if request.illustrate {
            illustrate_scenes(
                self.images.as_ref(),
                &outcome.narrative.scenes,
                &characters,
                &self.placeholder_image_url,
            )
            .await
        } else {
            placeholder_illustrations(&outcome.narrative.scenes, &self.placeholder_image_url)
        };

        let words = word_count(&outcome.narrative.story_text);
        let generated = GeneratedStory {
            image_urls,
            characters,
            model_used: outcome.model_used,
            prompt_tokens: outcome.prompt_tokens,
            completion_tokens: outcome.completion_tokens,
            generation_time: started.elapsed(),
            used_fallback: outcome.used_fallback,
            word_count: words,
            reading_time: reading_time(words),
            narrative: outcome.narrative,
        };

        info!(
            scenes = generated.narrative.scenes.len(),
            words = generated.word_count,
            used_fallback = generated.used_fallback,
            elapsed_ms = generated.generation_time.as_millis() as u64,
            "Story generated"
        );
        generated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::stories::StoryTone;
    use crate::generation::characters::{RawTraits, default_child_description};
    use crate::test_utils::{FakeImages, FakeText, FakeVision, story_json};

    fn config() -> GenerationConfig {
        GenerationConfig {
            placeholder_image_url: "https://placeholder.example/x.png".to_string(),
            ..Default::default()
        }
    }

    fn emma_request(illustrate: bool) -> StoryRequest {
        StoryRequest {
            brief: StoryBrief {
                child_name: "Emma".to_string(),
                age: 6,
                fear_or_challenge: "afraid of the dark".to_string(),
                tone: StoryTone::Empowering,
                comfort_items: vec![],
                custom_elements: vec![],
                favorite_places: vec![],
            },
            child: ChildSubject {
                name: "Emma".to_string(),
                age: 6,
                traits: RawTraits::Missing,
                photo: None,
            },
            family: vec![],
            include_family: true,
            illustrate,
        }
    }

    #[test]
    fn test_reading_time() {
        assert_eq!(reading_time(450), 2);
        assert_eq!(reading_time(150), 1);
        assert_eq!(reading_time(0), 1);
        assert_eq!(reading_time(400), 2);
    }

    #[test]
    fn test_word_count_splits_on_whitespace() {
        assert_eq!(word_count("Once upon\na  time,\n\nthe end."), 5);
        assert_eq!(word_count("   "), 0);
    }

    #[tokio::test]
    async fn test_emma_end_to_end_without_photos() {
        let text = Arc::new(FakeText::answering(&story_json("Emma", 4)));
        let vision = Arc::new(FakeVision::failing());
        let images = Arc::new(FakeImages::failing_on(&["This is scene 3 "]));
        let pipeline = StoryPipeline::new(text.clone(), vision.clone(), images.clone(), &config());

        let story = pipeline.generate(&emma_request(true)).await;

        assert!(!story.narrative.story_text.is_empty());
        assert!((1..=5).contains(&story.narrative.scenes.len()));
        assert_eq!(story.image_urls.len(), story.narrative.scenes.len());
        assert_eq!(story.image_urls[2], "https://placeholder.example/x.png");
        assert_eq!(
            story.characters.get("emma").map(|c| c.visual_description.clone()),
            Some(default_child_description(6))
        );
        assert_eq!(story.reading_time, reading_time(story.word_count));
        assert!(vision.prompts().is_empty());
        assert_eq!(text.calls(), 1);
        assert_eq!(images.calls(), 4);

        let scenes = story.scenes();
        assert_eq!(scenes.len(), 4);
        assert_eq!(scenes[0].image_url, "https://img.example/1.png");
    }

    #[tokio::test]
    async fn test_fallback_story_is_still_illustrated() {
        let images = Arc::new(FakeImages::succeeding());
        let pipeline = StoryPipeline::new(
            Arc::new(FakeText::failing()),
            Arc::new(FakeVision::failing()),
            images.clone(),
            &config(),
        );

        let story = pipeline.generate(&emma_request(true)).await;

        assert!(story.used_fallback);
        assert_eq!(story.narrative.title, "Emma's Brave Day");
        assert_eq!(story.image_urls.len(), 1);
        assert_eq!(images.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_image_calls_without_illustration() {
        let images = Arc::new(FakeImages::succeeding());
        let pipeline = StoryPipeline::new(
            Arc::new(FakeText::answering(&story_json("Emma", 5))),
            Arc::new(FakeVision::failing()),
            images.clone(),
            &config(),
        );

        let story = pipeline.generate(&emma_request(false)).await;

        assert_eq!(images.calls(), 0);
        assert_eq!(story.image_urls, vec!["https://placeholder.example/x.png".to_string(); 5]);
    }
}
