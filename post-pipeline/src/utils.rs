use serde::de::DeserializeOwned;

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code fences a model wrapped around its answer.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parses the first JSON object found in a model response, tolerating code
/// fences and prose around it.
pub fn parse_json_object<T: DeserializeOwned>(response: &str) -> Option<T> {
    let stripped = strip_code_blocks(response);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Some(value);
    }

    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

/// Shortens text to at most `max_chars` characters, preferring to cut at a
/// sentence end and falling back to a word boundary.
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let truncated = &text[..cut];

    if let Some(last_sentence) = truncated.rfind(['.', '!', '?']) {
        if last_sentence > cut / 2 {
            return truncated[..=last_sentence].to_string();
        }
    }
    match truncated.rfind(char::is_whitespace) {
        Some(last_space) => truncated[..last_space].trim_end().to_string(),
        None => truncated.to_string(),
    }
}

/// Normalizes a hashtag to `#Word` form, or `None` when nothing usable is left.
pub fn normalize_hashtag(raw: &str) -> Option<String> {
    let word: String = raw
        .trim()
        .trim_start_matches('#')
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if word.is_empty() {
        None
    } else {
        Some(format!("#{}", word))
    }
}
