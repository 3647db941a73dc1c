//! Prompt construction and parsing of the answers. Everything here is pure:
//! the same inputs always produce the same prompt.

use crate::types::{ArticleContent, ImageOptions, Opinion, PostText, Summary, TextOrigin, Tone, VariantId};
use crate::utils::{normalize_hashtag, parse_json_object, smart_truncate, strip_code_blocks, truncate_to_char_boundary};
use chrono::Utc;
use serde::Deserialize;

pub const MAX_POST_CHARS: usize = 1300;
pub const MAX_ALT_TEXT_CHARS: usize = 125;
pub const MAX_HASHTAGS: usize = 3;
const MAX_ARTICLE_BYTES: usize = 12_000;

struct Angle {
    name: &'static str,
    instruction: &'static str,
}

/// Each slot gets its own angle so that variants differ in structure, not
/// only in wording. Slots past the list wrap around.
const ANGLES: [Angle; 4] = [
    Angle {
        name: "insight-led",
        instruction: "Open with the single most striking fact, number or finding from the article, then explain why it matters to professionals in the field.",
    },
    Angle {
        name: "story-led",
        instruction: "Open with a short, relatable workplace scenario that illustrates the article's point, and close with a direct question inviting readers to share their experience.",
    },
    Angle {
        name: "lessons-led",
        instruction: "Structure the post as three short takeaways the reader can act on this week, each on its own line.",
    },
    Angle {
        name: "debate-led",
        instruction: "Frame the post around the strongest counter-argument to the article and weigh it openly before landing on a position.",
    },
];

fn angle_for(variant: VariantId) -> &'static Angle {
    &ANGLES[variant.index() % ANGLES.len()]
}

fn opinion_instruction(opinion: &Opinion) -> String {
    match opinion {
        Opinion::Agree => "The author agrees with the article. Endorse its position and build on it.".to_string(),
        Opinion::Disagree => {
            "The author disagrees with the article. Challenge its position respectfully and give reasons.".to_string()
        }
        Opinion::Neutral => "The author is neutral. Present the article's position fairly without taking sides.".to_string(),
        Opinion::Custom(view) => format!("Express the author's own view in the post: \"{}\"", view.trim()),
    }
}

fn tone_instruction(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => "Professional: clear, credible and measured.",
        Tone::Conversational => "Conversational: warm, first-person, plain language.",
        Tone::Enthusiastic => "Enthusiastic: energetic and optimistic, without hype.",
        Tone::Analytical => "Analytical: precise, evidence-first, with concrete numbers where available.",
    }
}

pub fn summary_prompt(article: &ArticleContent) -> String {
    format!(
        r#"Summarize the following article into a 3-4 sentence summary and 3 concise bullet points.

Title: {title}

Article:
{text}

Return your response in the following JSON format:
{{
    "summary": "Your 3-4 sentence summary here",
    "bullets": ["First key point", "Second key point", "Third key point"]
}}"#,
        title = article.title,
        text = truncate_to_char_boundary(&article.text, MAX_ARTICLE_BYTES),
    )
}

pub fn variant_prompt(summary: &Summary, opinion: &Opinion, tone: Tone, variant: VariantId) -> String {
    let angle = angle_for(variant);
    let bullets = if summary.bullets.is_empty() {
        "(none)".to_string()
    } else {
        summary
            .bullets
            .iter()
            .map(|b| format!("- {}", b))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r##"You are a LinkedIn content writer drafting Variant {letter} ({angle_name}) of a post about an article.

Context:
Summary: {summary}
Key points:
{bullets}

Stance: {opinion}
Tone: {tone}
Angle for Variant {letter}: {angle_instruction}

Requirements:
- Text: at most {max_post} characters, engaging and thought-provoking
- Hashtags: exactly {max_tags} relevant hashtags
- Suggested comment: one line to start the discussion
- Alt text: at most {max_alt} characters describing an accompanying image

Return your response in this exact JSON format:
{{
    "text": "Post text for Variant {letter}",
    "hashtags": ["#tag1", "#tag2", "#tag3"],
    "suggested_comment": "Suggested comment for Variant {letter}",
    "alt_text": "Alt text for the Variant {letter} image"
}}"##,
        letter = variant.letter(),
        angle_name = angle.name,
        summary = summary.text,
        bullets = bullets,
        opinion = opinion_instruction(opinion),
        tone = tone_instruction(tone),
        angle_instruction = angle.instruction,
        max_post = MAX_POST_CHARS,
        max_tags = MAX_HASHTAGS,
        max_alt = MAX_ALT_TEXT_CHARS,
    )
}

pub fn image_prompt_request(post_text: &str, options: &ImageOptions) -> String {
    format!(
        r#"Create a detailed, professional image prompt for an AI image generator that will illustrate a LinkedIn post.

Post content: {post}
Style: {style}
Aspect ratio: {aspect}
Negative prompt: {negative}

The prompt should:
- Be descriptive and specific
- Match the professional register of LinkedIn
- Include visual elements that complement the post content
- Use the {style} style
- Avoid any text, logos or watermarks

Return only the image prompt text, with no additional formatting."#,
        post = post_text,
        style = options.style,
        aspect = options.aspect_ratio,
        negative = options.negative_prompt(),
    )
}

pub fn moderation_prompt(content: &str) -> String {
    format!(
        r#"Review the following LinkedIn post content for appropriateness and compliance:

{content}

Check for:
1. Professional tone and language
2. Harassment, hate, violence or sexual content
3. Compliance with LinkedIn professional community policies
4. Misleading or unsubstantiated claims

Return your assessment in this JSON format:
{{
    "status": "pass|review|reject",
    "notes": ["List any concerns"]
}}"#
    )
}

pub fn image_moderation_prompt() -> &'static str {
    r#"Review the attached image for use in a professional LinkedIn post. Check for nudity, violence, hateful symbols, graphic content and embedded text or logos.

Return your assessment in this JSON format:
{"status": "pass|review|reject", "notes": ["List any concerns"]}"#
}

#[derive(Debug, Deserialize)]
struct SummaryAnswer {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    bullets: Vec<String>,
}

/// Reads a summary answer. Prose that is not JSON is kept as the summary text.
pub fn parse_summary(response: &str) -> Option<Summary> {
    let (text, bullets) = match parse_json_object::<SummaryAnswer>(response) {
        Some(answer) => (answer.summary, answer.bullets),
        None => (strip_code_blocks(response).to_string(), Vec::new()),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let bullets = bullets
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .take(3)
        .collect();

    Some(Summary { text, bullets })
}

#[derive(Debug, Deserialize)]
struct PostAnswer {
    #[serde(default)]
    text: String,
    #[serde(default)]
    hashtags: Vec<String>,
    #[serde(default)]
    suggested_comment: Option<String>,
    #[serde(default)]
    alt_text: Option<String>,
}

/// Reads a post answer and enforces the length and hashtag limits. Prose that
/// is not JSON is kept as the post body.
pub fn parse_post(response: &str) -> Option<PostText> {
    let answer = parse_json_object::<PostAnswer>(response).unwrap_or_else(|| PostAnswer {
        text: strip_code_blocks(response).to_string(),
        hashtags: Vec::new(),
        suggested_comment: None,
        alt_text: None,
    });

    let body = smart_truncate(answer.text.trim(), MAX_POST_CHARS);
    if body.is_empty() {
        return None;
    }

    let mut hashtags: Vec<String> = Vec::new();
    for tag in answer.hashtags.iter().filter_map(|t| normalize_hashtag(t)) {
        if !hashtags.contains(&tag) && hashtags.len() < MAX_HASHTAGS {
            hashtags.push(tag);
        }
    }

    let non_empty = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    Some(PostText {
        body,
        hashtags,
        suggested_comment: non_empty(answer.suggested_comment),
        alt_text: non_empty(answer.alt_text).map(|alt| smart_truncate(&alt, MAX_ALT_TEXT_CHARS)),
        origin: TextOrigin::Generated,
        created_at: Utc::now(),
    })
}

/// The model is asked for a bare prompt; tolerate quoting and fences anyway.
pub fn clean_image_prompt(response: &str) -> Option<String> {
    let cleaned = strip_code_blocks(response).trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
