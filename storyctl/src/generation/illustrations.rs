//! Scene illustrations. One image call per scene, all in flight at once; a scene that fails gets
//! the placeholder image.

use futures::future::join_all;
use tracing::{instrument, warn};

use super::characters::CharacterMap;
use super::narrative::SceneDraft;
use super::{GenerationError, ImageModel};

const STYLE_REQUIREMENTS: &str = "STYLE REQUIREMENTS:
- Digital illustration in the style of modern children's picture books
- Consistent illustration style across every scene of the story
- Soft, warm color palette with gentle gradients
- Characters should have friendly, expressive faces
- Background should be detailed but not distracting
- Lighting: bright and welcoming
- Mood: positive and encouraging
- Perspective: eye-level with the child character
- Ensure all characters match their descriptions EXACTLY";

/// Reference block listing every known character, repeated in each scene prompt
pub fn consistency_guide(characters: &CharacterMap) -> String {
    let references: Vec<String> = characters
        .iter()
        .map(|c| format!("[{} REFERENCE: {}]", c.name, c.visual_description))
        .collect();
    format!("CHARACTER CONSISTENCY GUIDE:\n{}", references.join("\n"))
}

pub fn build_image_prompt(scene: &SceneDraft, characters: &CharacterMap, guide: &str) -> String {
    // Characters without an entry are left out
    let appearances: Vec<String> = scene
        .characters_present
        .iter()
        .filter_map(|name| characters.get(name))
        .map(|c| format!("{}: {}", c.name, c.visual_description))
        .collect();

    let mut prompt = format!(
        "Children's book illustration in warm, friendly cartoon style:\n\nSCENE: {}\n",
        scene.description
    );
    if scene.image_prompt != scene.description {
        prompt.push_str(&format!("VISUAL DETAILS: {}\n", scene.image_prompt));
    }
    prompt.push_str(&format!(
        "\nCHARACTER APPEARANCES (MAINTAIN EXACT CONSISTENCY):\n{}\n\n{}\n\n{}\n\n\
IMPORTANT: This is scene {} of a series. Maintain absolute character consistency.",
        appearances.join("\n"),
        guide,
        STYLE_REQUIREMENTS,
        scene.scene_number,
    ));
    prompt
}

/// One image call for one scene
pub async fn render_scene(model: &dyn ImageModel, prompt: &str) -> Result<String, GenerationError> {
    model.generate_image(prompt).await
}

/// Illustrate every scene. The result has one URL per scene, in scene order.
#[instrument(skip_all, fields(scenes = scenes.len()))]
pub async fn illustrate_scenes(
    model: &dyn ImageModel,
    scenes: &[SceneDraft],
    characters: &CharacterMap,
    placeholder_url: &str,
) -> Vec<String> {
    let guide = consistency_guide(characters);
    let renders = scenes.iter().map(|scene| {
        let prompt = build_image_prompt(scene, characters, &guide);
        async move {
            match render_scene(model, &prompt).await {
                Ok(url) => url,
                Err(error) => {
                    warn!(scene = scene.scene_number, %error, "Scene illustration failed, using placeholder");
                    placeholder_url.to_string()
                }
            }
        }
    });
    join_all(renders).await
}

/// Placeholder for every scene, for accounts without image generation
pub fn placeholder_illustrations(scenes: &[SceneDraft], placeholder_url: &str) -> Vec<String> {
    vec![placeholder_url.to_string(); scenes.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::characters::CharacterProfile;
    use crate::test_utils::FakeImages;

    const PLACEHOLDER: &str = "https://placeholder.example/scene.png";

    fn characters() -> CharacterMap {
        let mut map = CharacterMap::default();
        for (name, description) in [("Emma", "Curly red hair, green eyes"), ("Mom", "Short black hair, glasses")] {
            map.insert(CharacterProfile {
                name: name.to_string(),
                relationship: "x".to_string(),
                visual_description: description.to_string(),
                personality_traits: vec![],
                role_in_story: "y".to_string(),
            });
        }
        map
    }

    fn scene(n: i32, present: &[&str]) -> SceneDraft {
        SceneDraft {
            scene_number: n,
            description: format!("Scene {n} description"),
            characters_present: present.iter().map(|s| s.to_string()).collect(),
            image_prompt: format!("Scene {n} visual"),
        }
    }

    #[test]
    fn test_prompt_includes_present_characters_only() {
        let characters = characters();
        let guide = consistency_guide(&characters);
        let prompt = build_image_prompt(&scene(2, &["emma", "Stranger"]), &characters, &guide);

        assert!(prompt.contains("SCENE: Scene 2 description"));
        assert!(prompt.contains("VISUAL DETAILS: Scene 2 visual"));
        assert!(prompt.contains("CHARACTER APPEARANCES (MAINTAIN EXACT CONSISTENCY):\nEmma: Curly red hair, green eyes\n"));
        assert!(!prompt.contains("Stranger"));
        assert!(!prompt.contains("Mom: Short black hair"));
        assert!(prompt.contains("[Mom REFERENCE: Short black hair, glasses]"));
        assert!(prompt.contains("Soft, warm color palette"));
        assert!(prompt.contains("Perspective: eye-level"));
        assert!(prompt.contains("This is scene 2 of a series"));
    }

    #[test]
    fn test_consistency_guide_lists_every_character() {
        assert_eq!(
            consistency_guide(&characters()),
            "CHARACTER CONSISTENCY GUIDE:\n[Emma REFERENCE: Curly red hair, green eyes]\n[Mom REFERENCE: Short black hair, glasses]"
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_scenes_get_placeholders_in_order() {
        let images = FakeImages::failing_on(&["SCENE: Scene 2 description"]);
        let scenes = vec![scene(1, &["Emma"]), scene(2, &["Emma"]), scene(3, &["Mom"])];

        let urls = illustrate_scenes(&images, &scenes, &characters(), PLACEHOLDER).await;

        assert_eq!(urls.len(), scenes.len());
        assert_eq!(urls[0], "https://img.example/1.png");
        assert_eq!(urls[1], PLACEHOLDER);
        assert_eq!(urls[2], "https://img.example/3.png");
        assert_eq!(images.calls(), 3);
    }

    #[tokio::test]
    async fn test_all_failures_still_yield_one_url_per_scene() {
        let images = FakeImages::failing_on(&["SCENE:"]);
        let scenes = vec![scene(1, &[]), scene(2, &[])];
        let urls = illustrate_scenes(&images, &scenes, &characters(), PLACEHOLDER).await;
        assert_eq!(urls, vec![PLACEHOLDER.to_string(), PLACEHOLDER.to_string()]);
    }

    #[test]
    fn test_placeholder_illustrations() {
        let scenes = vec![scene(1, &[]), scene(2, &[]), scene(3, &[])];
        assert_eq!(placeholder_illustrations(&scenes, PLACEHOLDER).len(), 3);
    }
}
