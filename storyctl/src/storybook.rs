//! Printable storybook export.
//!
//! A story is laid out as plain lines first (title block, paragraphs with the matching scene
//! caption after each, closing credit) and then drawn onto US Letter pages with the built-in
//! Helvetica faces. Illustrations are referenced by URL in the captions rather than embedded.

use chrono::NaiveDate;
use printpdf::{BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Rgb};

use crate::db::models::stories::StoryDBResponse;

const PAGE_WIDTH: f32 = 215.9;
const PAGE_HEIGHT: f32 = 279.4;
const MARGIN: f32 = 25.4;
const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica advance as a fraction of the font size
const AVG_CHAR_WIDTH: f32 = 0.52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Title,
    Subtitle,
    Body,
    Caption,
    Footer,
}

impl Style {
    fn size(self) -> f32 {
        match self {
            Style::Title => 24.0,
            Style::Subtitle => 16.0,
            Style::Body => 13.0,
            Style::Caption => 10.0,
            Style::Footer => 8.0,
        }
    }

    fn leading(self) -> f32 {
        self.size() * 1.45 * PT_TO_MM
    }

    fn centered(self) -> bool {
        !matches!(self, Style::Body)
    }

    fn grey(self) -> f32 {
        match self {
            Style::Title => 0.18,
            Style::Subtitle => 0.35,
            Style::Body => 0.2,
            Style::Caption => 0.4,
            Style::Footer => 0.53,
        }
    }

    /// Characters that fit across the text column
    fn columns(self) -> usize {
        let usable_pt = (PAGE_WIDTH - 2.0 * MARGIN) / PT_TO_MM;
        (usable_pt / (self.size() * AVG_CHAR_WIDTH)) as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Text(Style, String),
    Gap(f32),
}

/// Built-in fonts only cover Latin-1, so typographic punctuation is folded to ASCII
fn printable(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{2018}' | '\u{2019}' => Some('\''),
            '\u{201C}' | '\u{201D}' => Some('"'),
            '\u{2013}' | '\u{2014}' => Some('-'),
            '\u{2026}' => Some('.'),
            '\n' | '\r' | '\t' => Some(' '),
            c if (c as u32) < 0x20 => None,
            c if (c as u32) <= 0xFF => Some(c),
            _ => Some('?'),
        })
        .collect()
}

/// Greedy word wrap. Words longer than a line are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > columns {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split: String = word.chars().take(columns).collect();
            word = word.chars().skip(columns).collect();
            lines.push(split);
        }
        if current.is_empty() {
            current = word;
        } else if current.chars().count() + 1 + word.chars().count() <= columns {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn layout(story: &StoryDBResponse, created_on: NaiveDate) -> Vec<Block> {
    let mut blocks = vec![
        Block::Gap(30.0),
        Block::Text(Style::Title, story.title.clone()),
        Block::Gap(6.0),
        Block::Text(Style::Subtitle, format!("A special story for {}", story.child_name)),
        Block::Gap(14.0),
    ];

    let paragraphs = story.story_text.split("\n\n").map(str::trim).filter(|p| !p.is_empty());
    for (i, paragraph) in paragraphs.enumerate() {
        blocks.push(Block::Text(Style::Body, paragraph.to_string()));
        blocks.push(Block::Gap(4.0));
        if let Some(scene) = story.scenes.get(i) {
            blocks.push(Block::Text(
                Style::Caption,
                format!("Scene {}: {}", scene.scene_number, scene.description),
            ));
            blocks.push(Block::Text(Style::Caption, format!("Illustration: {}", scene.image_url)));
            blocks.push(Block::Gap(6.0));
        }
    }

    blocks.push(Block::Gap(10.0));
    blocks.push(Block::Text(Style::Caption, story.key_message.clone()));
    blocks.push(Block::Gap(6.0));
    blocks.push(Block::Text(
        Style::Footer,
        format!("Made for {} on {}", story.child_name, created_on.format("%B %-d, %Y")),
    ));
    blocks
}

/// A line placed on a page, `y` measured from the bottom edge in mm
#[derive(Debug, Clone, PartialEq)]
struct PlacedLine {
    style: Style,
    text: String,
    y: f32,
}

fn paginate(blocks: &[Block]) -> Vec<Vec<PlacedLine>> {
    let top = PAGE_HEIGHT - MARGIN;
    let mut pages = vec![Vec::new()];
    let mut y = top;

    for block in blocks {
        match block {
            Block::Gap(mm) => {
                // Gaps never carry over to the next page
                y = (y - mm).max(MARGIN);
            }
            Block::Text(style, text) => {
                for line in wrap(&printable(text), style.columns()) {
                    y -= style.leading();
                    if y < MARGIN {
                        pages.push(Vec::new());
                        y = top - style.leading();
                    }
                    if let Some(page) = pages.last_mut() {
                        page.push(PlacedLine {
                            style: *style,
                            text: line,
                            y,
                        });
                    }
                }
            }
        }
    }
    pages
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    oblique: IndirectFontRef,
}

impl Fonts {
    fn load(doc: &PdfDocumentReference) -> anyhow::Result<Self> {
        let font = |builtin| doc.add_builtin_font(builtin).map_err(|e| anyhow::anyhow!("load font: {e}"));
        Ok(Self {
            regular: font(BuiltinFont::Helvetica)?,
            bold: font(BuiltinFont::HelveticaBold)?,
            oblique: font(BuiltinFont::HelveticaOblique)?,
        })
    }

    fn for_style(&self, style: Style) -> &IndirectFontRef {
        match style {
            Style::Title => &self.bold,
            Style::Subtitle | Style::Caption => &self.oblique,
            Style::Body | Style::Footer => &self.regular,
        }
    }
}

fn draw(layer: &PdfLayerReference, fonts: &Fonts, line: &PlacedLine) {
    let width = line.text.chars().count() as f32 * line.style.size() * AVG_CHAR_WIDTH * PT_TO_MM;
    let x = if line.style.centered() {
        ((PAGE_WIDTH - width) / 2.0).max(MARGIN)
    } else {
        MARGIN
    };
    let grey = line.style.grey();
    layer.set_fill_color(Color::Rgb(Rgb::new(grey, grey, grey, None)));
    layer.use_text(line.text.clone(), line.style.size(), Mm(x), Mm(line.y), fonts.for_style(line.style));
}

/// Render `story` as a PDF document
pub fn render_storybook(story: &StoryDBResponse, created_on: NaiveDate) -> anyhow::Result<Vec<u8>> {
    let pages = paginate(&layout(story, created_on));

    let (doc, first_page, first_layer) = PdfDocument::new(printable(&story.title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Story".to_string());
    let fonts = Fonts::load(&doc)?;

    for (index, lines) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Story");
            doc.get_page(page).get_layer(layer)
        };
        for line in lines {
            draw(&layer, &fonts, line);
        }
    }

    doc.save_to_bytes().map_err(|e| anyhow::anyhow!("write storybook PDF: {e}"))
}

/// Download name for a story, e.g. `story_emma.pdf`
pub fn file_name(story: &StoryDBResponse) -> String {
    let slug: String = story
        .child_name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if slug.trim_matches('_').is_empty() {
        "story.pdf".to_string()
    } else {
        format!("story_{slug}.pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::stories::{SceneResponse, StoryTone};
    use chrono::Utc;

    fn story(paragraphs: usize) -> StoryDBResponse {
        let text: Vec<String> = (1..=paragraphs)
            .map(|n| format!("Paragraph {n}. Emma looked at the shadows on the wall and smiled at the friendly shapes."))
            .collect();
        StoryDBResponse {
            id: uuid::Uuid::new_v4(),
            user_id: uuid::Uuid::new_v4(),
            profile_id: None,
            title: "Emma and the Night Light".to_string(),
            story_text: text.join("\n\n"),
            key_message: "Being brave means trying even when you feel scared.".to_string(),
            tone: StoryTone::Bedtime,
            child_name: "Emma Rose".to_string(),
            age: 6,
            fear_or_challenge: "the dark".to_string(),
            favorite_items: vec![],
            family_members: Default::default(),
            scenes: (1..=2)
                .map(|n| SceneResponse {
                    scene_number: n,
                    description: format!("Scene {n}"),
                    characters_present: vec!["Emma".to_string()],
                    image_prompt: format!("Emma in scene {n}"),
                    image_url: format!("https://img.example/{n}.png"),
                })
                .collect(),
            word_count: 100,
            reading_time: 1,
            model_used: "fake-text".to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
            generation_time_ms: 0,
            used_fallback: false,
            usage_type: "free_tier".to_string(),
            is_favorite: false,
            rating: None,
            read_count: 0,
            last_read_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn created_on() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()
    }

    #[test]
    fn test_wrap_respects_columns() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps over", "the lazy", "dog"]);
        assert!(wrap("", 10).is_empty());
        assert_eq!(wrap("abcdefghijkl", 5), vec!["abcde", "fghij", "kl"]);
    }

    #[test]
    fn test_printable_folds_typography() {
        assert_eq!(printable("Emma\u{2019}s \u{201C}brave\u{201D} night \u{2014} the end\u{2026}"), "Emma's \"brave\" night - the end.");
        assert_eq!(printable("Zo\u{eb} \u{1F319}"), "Zo\u{eb} ?");
    }

    #[test]
    fn test_captions_follow_their_paragraph() {
        let blocks = layout(&story(3), created_on());
        let texts: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text(_, text) => Some(text.as_str()),
                Block::Gap(_) => None,
            })
            .collect();

        let p1 = texts.iter().position(|t| t.starts_with("Paragraph 1")).unwrap();
        assert_eq!(texts[p1 + 1], "Scene 1: Scene 1");
        assert_eq!(texts[p1 + 2], "Illustration: https://img.example/1.png");
        let p3 = texts.iter().position(|t| t.starts_with("Paragraph 3")).unwrap();
        assert!(!texts[p3 + 1].starts_with("Scene"));
        assert_eq!(texts.last().copied(), Some("Made for Emma Rose on March 7, 2026"));
    }

    #[test]
    fn test_long_stories_flow_onto_more_pages() {
        let short = paginate(&layout(&story(2), created_on()));
        let long = paginate(&layout(&story(60), created_on()));

        assert_eq!(short.len(), 1);
        assert!(long.len() > 2);
        for line in long.iter().flatten() {
            assert!(line.y >= MARGIN && line.y <= PAGE_HEIGHT - MARGIN);
        }
    }

    #[test]
    fn test_render_produces_a_pdf() {
        let bytes = render_storybook(&story(4), created_on()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }

    #[test]
    fn test_file_name_from_child_name() {
        assert_eq!(file_name(&story(1)), "story_emma_rose.pdf");
        let mut unnamed = story(1);
        unnamed.child_name = "  ".to_string();
        assert_eq!(file_name(&unnamed), "story.pdf");
    }
}
