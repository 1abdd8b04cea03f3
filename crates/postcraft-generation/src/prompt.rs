//! Prompt construction.
//!
//! The prompt is a pure function of the request. Guide text comes from fixed
//! tables keyed by tone, length and platform.

use postcraft_core::{GenerationRequest, Length, Tone};

use crate::tools::{HASHTAGS_TOOL, POSTING_TIME_TOOL};

/// Voice instructions for a tone.
#[must_use]
pub const fn tone_guide(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => {
            "Use a professional, authoritative voice. Be clear and precise, \
             back claims with concrete insight, and avoid slang."
        }
        Tone::Casual => {
            "Use a relaxed, conversational voice, as if talking to a friend. \
             Short sentences and plain words are welcome."
        }
        Tone::Inspirational => {
            "Use an uplifting, motivating voice. Tell a small story or share a \
             lesson, and end on an encouraging note."
        }
    }
}

/// Size instructions for a length class.
#[must_use]
pub const fn length_guide(length: Length) -> &'static str {
    match length {
        Length::Short => "Keep it short: one or two sentences, under 280 characters.",
        Length::Medium => "Aim for a medium-length post of 3 to 5 sentences (about 100 words).",
        Length::Long => "Write a long-form post of 3 to 4 short paragraphs (about 250 words).",
    }
}

/// Platform conventions, keyed by wire name. Unknown names get the LinkedIn guide.
#[must_use]
pub fn platform_guide(platform: &str) -> &'static str {
    const LINKEDIN: &str = "Write for LinkedIn: professional networking context, a strong \
                            opening line, and line breaks between ideas.";
    match platform.trim().to_ascii_lowercase().as_str() {
        "twitter" | "x" => {
            "Write for Twitter/X: punchy, direct and scannable, with a hook in the \
             first few words."
        }
        "facebook" => {
            "Write for Facebook: warm and community-oriented, inviting comments \
             and conversation."
        }
        _ => LINKEDIN,
    }
}

/// Build the instruction block for a request.
///
/// With `with_tools` the model is also told to call the hashtag and posting-time
/// tools instead of writing that information into the post.
#[must_use]
pub fn build_prompt(request: &GenerationRequest, with_tools: bool) -> String {
    let mut prompt = format!(
        "You are an expert social media copywriter. Write a {platform} post about: {topic}\n\n\
         Tone: {tone}\n\
         Length: {length}\n\
         Platform: {platform_guide}\n\n\
         Rules:\n\
         - Do not include any hashtags in the post.\n\
         - Start the post immediately. No preamble, no title, no quotation marks, \
         no labels such as \"Post:\".\n",
        platform = request.platform.display_name(),
        topic = request.topic,
        tone = tone_guide(request.tone),
        length = length_guide(request.length),
        platform_guide = platform_guide(request.platform.as_str()),
    );

    if with_tools {
        prompt.push_str(&format!(
            "- Write the complete post as your message text first. Then call \
             `{HASHTAGS_TOOL}` to suggest hashtags and `{POSTING_TIME_TOOL}` to recommend \
             when to publish. Do not mention either result in the post.\n"
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use postcraft_core::Platform;

    fn request() -> GenerationRequest {
        GenerationRequest::new("Remote work tips", Tone::Casual, Length::Short, Platform::Twitter)
            .unwrap()
    }

    #[test]
    fn prompt_is_deterministic() {
        assert_eq!(build_prompt(&request(), false), build_prompt(&request(), false));
    }

    #[test]
    fn prompt_carries_every_guide() {
        let prompt = build_prompt(&request(), false);

        assert!(prompt.contains("Remote work tips"));
        assert!(prompt.contains(tone_guide(Tone::Casual)));
        assert!(prompt.contains(length_guide(Length::Short)));
        assert!(prompt.contains(platform_guide("twitter")));
        assert!(prompt.contains("Do not include any hashtags"));
        assert!(!prompt.contains(HASHTAGS_TOOL));
    }

    #[test]
    fn tool_prompt_names_tools() {
        let prompt = build_prompt(&request(), true);
        assert!(prompt.contains(HASHTAGS_TOOL));
        assert!(prompt.contains(POSTING_TIME_TOOL));
    }

    #[test]
    fn unknown_platform_uses_linkedin_guide() {
        assert_eq!(platform_guide("myspace"), platform_guide("linkedin"));
        assert_eq!(platform_guide("X"), platform_guide("twitter"));
    }
}
