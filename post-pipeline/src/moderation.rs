use crate::types::{ImageOptions, PostText, Variant, Verdict};
use crate::utils::parse_json_object;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ModerationAnswer {
    #[serde(default)]
    status: String,
}

/// Maps a prompted moderation answer onto a verdict. Anything other than an
/// explicit pass, including an unreadable answer, is a flag.
pub fn verdict_from_response(response: &str) -> Verdict {
    match parse_json_object::<ModerationAnswer>(response) {
        Some(answer) => match answer.status.trim().to_lowercase().as_str() {
            "pass" | "approved" | "ok" => Verdict::Pass,
            other => {
                debug!("Moderation answered {:?}; flagging", other);
                Verdict::Flag
            }
        },
        None => {
            debug!("Unreadable moderation answer; flagging");
            Verdict::Flag
        }
    }
}

/// Everything a reader of the post would see, as submitted to text moderation.
pub fn moderation_content(text: &PostText) -> String {
    format!(
        "Post text: {}\nHashtags: {}\nSuggested comment: {}",
        text.body,
        text.hashtags.join(", "),
        text.suggested_comment.as_deref().unwrap_or("")
    )
}

/// Why a variant may not be published yet, or `Ok` when it may.
pub fn publish_gate(variant: &Variant, image_options: &ImageOptions) -> Result<(), String> {
    let id = variant.id;

    if variant.text.is_none() {
        return Err(format!("variant {} has no text", id));
    }
    if variant.is_busy() {
        return Err(format!("variant {} is being regenerated", id));
    }
    if variant.verdict != Verdict::Pass {
        return Err(format!("variant {} text verdict is {:?}, not PASS", id, variant.verdict));
    }

    match &variant.image {
        Some(image) if image.verdict != Verdict::Pass => {
            Err(format!("variant {} image verdict is {:?}, not PASS", id, image.verdict))
        }
        None if image_options.required => Err(format!("variant {} has no image", id)),
        _ => Ok(()),
    }
}
