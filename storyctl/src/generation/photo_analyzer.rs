//! Turns a photo into a short, illustration-safe description of the person or object in it.

use tracing::{instrument, warn};

use super::{GenerationError, ImageInput, VisionModel};

const SYSTEM_PROMPT: &str = "You are an expert at describing people's appearance for cartoon character creation. \
Focus on safe, positive features suitable for children's illustrations.";

fn description_prompt(name: &str, relationship: &str) -> String {
    format!(
        "Please describe this {relationship} named {name} for creating a cartoon character. \
Focus on: hair color/style, eye color, skin tone, and any distinctive but appropriate features. \
Keep it positive and child-friendly. Respond in 2-3 sentences."
    )
}

/// Used whenever a photo could not be described
pub fn fallback_photo_description(name: &str, relationship: &str) -> String {
    format!("{name} is a cheerful {relationship} with a warm smile and kind eyes.")
}

/// One vision call, no retries
pub async fn describe_photo(
    model: &dyn VisionModel,
    image: ImageInput<'_>,
    name: &str,
    relationship: &str,
) -> Result<String, GenerationError> {
    let description = model
        .describe_image(SYSTEM_PROMPT, &description_prompt(name, relationship), image)
        .await?;
    let description = description.trim();
    if description.is_empty() {
        return Err(GenerationError::MalformedResponse("empty photo description".to_string()));
    }
    Ok(description.to_string())
}

/// What a photo was turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoDescription {
    pub text: String,
    /// False when the template stood in for a failed description
    pub from_photo: bool,
}

/// Describe a photo, falling back to a templated description on any failure
#[instrument(skip(model, image), fields(bytes = image.data.len()))]
pub async fn analyze_photo(
    model: &dyn VisionModel,
    image: ImageInput<'_>,
    name: &str,
    relationship: &str,
) -> PhotoDescription {
    match describe_photo(model, image, name, relationship).await {
        Ok(text) => PhotoDescription { text, from_photo: true },
        Err(error) => {
            warn!(%error, "Photo analysis failed, using generic description");
            PhotoDescription {
                text: fallback_photo_description(name, relationship),
                from_photo: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeVision;

    const IMAGE: ImageInput<'static> = ImageInput {
        content_type: "image/jpeg",
        data: b"jpeg",
    };

    #[tokio::test]
    async fn test_successful_description_is_trimmed() {
        let vision = FakeVision::answering("  Short red hair and freckles.\n");
        let description = analyze_photo(&vision, IMAGE, "Emma", "child").await;
        assert_eq!(description.text, "Short red hair and freckles.");
        assert!(description.from_photo);

        let prompts = vision.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("this child named Emma"));
    }

    #[test_log::test(tokio::test)]
    async fn test_failure_falls_back_to_template() {
        let vision = FakeVision::failing();
        let description = analyze_photo(&vision, IMAGE, "Grandpa Joe", "grandparent").await;
        assert_eq!(description.text, "Grandpa Joe is a cheerful grandparent with a warm smile and kind eyes.");
        assert!(!description.from_photo);
    }

    #[test_log::test(tokio::test)]
    async fn test_blank_answer_falls_back() {
        let vision = FakeVision::answering("   ");
        let description = analyze_photo(&vision, IMAGE, "Max", "sibling").await;
        assert_eq!(description.text, fallback_photo_description("Max", "sibling"));
        assert!(!description.from_photo);
    }
}
