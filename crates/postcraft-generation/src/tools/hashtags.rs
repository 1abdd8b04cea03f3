//! Hashtag suggestion tool.

use std::collections::{HashMap, HashSet};

use postcraft_core::Platform;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolSpec, HASHTAGS_TOOL};
use crate::error::ToolError;

/// Returned when no usable keyword can be extracted.
const FALLBACK_HASHTAGS: [&str; 5] = [
    "#Content",
    "#SocialMedia",
    "#Marketing",
    "#Growth",
    "#Community",
];

const MAX_TOPIC_TAGS: usize = 3;
const MAX_TONE_TAGS: usize = 2;
const MAX_PLATFORM_TAGS: usize = 2;
const MAX_CONTENT_TAGS: usize = 2;
const MIN_CONTENT_KEYWORD_CHARS: usize = 4;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "do", "does", "for", "from", "get", "had", "has", "have", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "more", "most", "my", "not", "of", "on",
    "or", "our", "out", "over", "so", "some", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "to", "up", "us", "was", "we", "what", "when", "which",
    "who", "why", "will", "with", "you", "your",
];

/// Input of [`generate_hashtags`].
///
/// Tone, platform and length arrive as free strings because the model fills them
/// in; unknown values simply contribute no tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashtagInput {
    /// Post topic.
    pub topic: String,
    /// Tone name.
    #[serde(default)]
    pub tone: Option<String>,
    /// Platform name.
    #[serde(default)]
    pub platform: Option<String>,
    /// Length class.
    #[serde(default, alias = "lengthClass")]
    pub length: Option<String>,
    /// Generated post body, when available.
    #[serde(default)]
    pub content: Option<String>,
}

/// Output of [`generate_hashtags`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashtagOutput {
    /// Hashtags including the leading `#`.
    pub hashtags: Vec<String>,
    /// Short explanation of the selection.
    pub reasoning: String,
}

/// Maximum number of hashtags for a platform (LinkedIn limits apply to unknown names).
#[must_use]
pub fn platform_max(platform: Option<&str>) -> usize {
    match platform.and_then(|p| p.parse::<Platform>().ok()) {
        Some(Platform::Twitter) => 3,
        Some(Platform::Facebook) => 7,
        Some(Platform::LinkedIn) | None => 5,
    }
}

fn tone_tags(tone: &str) -> &'static [&'static str] {
    match tone.trim().to_ascii_lowercase().as_str() {
        "professional" => &["#Leadership", "#Business", "#Strategy"],
        "casual" => &["#Tips", "#RealTalk", "#LifeHacks"],
        "inspirational" => &["#Motivation", "#Inspiration", "#Success"],
        _ => &[],
    }
}

fn platform_tags(platform: &str) -> &'static [&'static str] {
    match platform.parse::<Platform>() {
        Ok(Platform::LinkedIn) => &["#LinkedIn", "#CareerGrowth", "#Networking"],
        Ok(Platform::Twitter) => &["#Thread", "#TechTwitter"],
        Ok(Platform::Facebook) => &["#Community", "#ShareThis"],
        Err(_) => &[],
    }
}

/// Lowercased words with punctuation stripped and stop words removed, in order.
fn keywords(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn to_hashtag(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => format!("#{}{}", first.to_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

/// Most frequent content keywords, ties broken by first appearance.
fn content_keywords(content: &str) -> Vec<String> {
    let words: Vec<String> = keywords(content)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_CONTENT_KEYWORD_CHARS)
        .collect();

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, word) in words.iter().enumerate() {
        counts.entry(word.as_str()).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().map(|(w, _)| w.to_string()).collect()
}

/// Case-insensitively deduplicating hashtag list.
#[derive(Default)]
struct TagSet {
    seen: HashSet<String>,
    tags: Vec<String>,
}

impl TagSet {
    fn push(&mut self, tag: String) -> bool {
        if tag.len() < 2 || !self.seen.insert(tag.to_lowercase()) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    fn extend_up_to<I: IntoIterator<Item = String>>(&mut self, tags: I, limit: usize) -> usize {
        let mut added = 0;
        for tag in tags {
            if added == limit {
                break;
            }
            if self.push(tag) {
                added += 1;
            }
        }
        added
    }
}

fn fallback(max: usize, reason: &str) -> HashtagOutput {
    HashtagOutput {
        hashtags: FALLBACK_HASHTAGS
            .iter()
            .take(max)
            .map(|t| (*t).to_string())
            .collect(),
        reasoning: format!("Fallback hashtags used: {reason}"),
    }
}

/// Suggest hashtags for a post.
///
/// Combines up to 3 topic keywords, 2 tone tags, 2 platform tags and 2 content
/// keywords, deduplicated case-insensitively and truncated to the platform limit.
/// Falls back to a fixed list when the topic yields no keywords.
#[must_use]
pub fn generate_hashtags(input: &HashtagInput) -> HashtagOutput {
    let max = platform_max(input.platform.as_deref());
    let topic_words = keywords(&input.topic);
    if topic_words.is_empty() {
        return fallback(max, "no keywords in topic");
    }

    let mut set = TagSet::default();
    let from_topic = set.extend_up_to(topic_words.iter().map(|w| to_hashtag(w)), MAX_TOPIC_TAGS);
    let from_tone = input.tone.as_deref().map_or(0, |tone| {
        set.extend_up_to(
            tone_tags(tone).iter().map(|t| (*t).to_string()),
            MAX_TONE_TAGS,
        )
    });
    let from_platform = input.platform.as_deref().map_or(0, |platform| {
        set.extend_up_to(
            platform_tags(platform).iter().map(|t| (*t).to_string()),
            MAX_PLATFORM_TAGS,
        )
    });
    let from_content = input.content.as_deref().map_or(0, |content| {
        set.extend_up_to(
            content_keywords(content).iter().map(|w| to_hashtag(w)),
            MAX_CONTENT_TAGS,
        )
    });

    let mut hashtags = set.tags;
    hashtags.truncate(max);

    HashtagOutput {
        reasoning: format!(
            "Picked {} of {} candidates ({from_topic} topic, {from_tone} tone, \
             {from_platform} platform, {from_content} content); limit {max} for {}",
            hashtags.len(),
            from_topic + from_tone + from_platform + from_content,
            input.platform.as_deref().unwrap_or("linkedin"),
        ),
        hashtags,
    }
}

/// [`generate_hashtags`] exposed through the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashtagTool;

impl Tool for HashtagTool {
    fn name(&self) -> &'static str {
        HASHTAGS_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: HASHTAGS_TOOL.to_string(),
            description: "Suggest relevant hashtags for a social media post.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "topic": { "type": "string", "description": "Post topic" },
                    "tone": { "type": "string", "enum": ["Professional", "Casual", "Inspirational"] },
                    "platform": { "type": "string", "enum": ["linkedin", "twitter", "facebook"] },
                    "length": { "type": "string", "enum": ["Short", "Medium", "Long"] },
                    "content": { "type": "string", "description": "Post body written so far" }
                },
                "required": ["topic"]
            }),
        }
    }

    fn call(&self, input: &Value) -> Result<Value, ToolError> {
        let output = match serde_json::from_value::<HashtagInput>(input.clone()) {
            Ok(parsed) => generate_hashtags(&parsed),
            Err(e) => fallback(platform_max(super::str_field(input, "platform")), &e.to_string()),
        };
        serde_json::to_value(output).map_err(|e| ToolError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(topic: &str, tone: &str, platform: &str) -> HashtagInput {
        HashtagInput {
            topic: topic.into(),
            tone: Some(tone.into()),
            platform: Some(platform.into()),
            length: Some("Short".into()),
            content: None,
        }
    }

    fn assert_unique(tags: &[String]) {
        let lowered: HashSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        assert_eq!(lowered.len(), tags.len(), "duplicates in {tags:?}");
    }

    #[test]
    fn twitter_keeps_topic_keywords_within_limit() {
        let output = generate_hashtags(&input("Remote work tips", "Casual", "twitter"));
        assert_eq!(output.hashtags, vec!["#Remote", "#Work", "#Tips"]);
    }

    #[test]
    fn linkedin_mixes_topic_tone_and_platform() {
        let output = generate_hashtags(&input(
            "The future of AI in healthcare",
            "Professional",
            "linkedin",
        ));
        assert_eq!(
            output.hashtags,
            vec!["#Future", "#Healthcare", "#Leadership", "#Business", "#LinkedIn"]
        );
    }

    #[test]
    fn facebook_includes_content_keywords() {
        let mut request = input("Gardening", "Inspirational", "facebook");
        request.content =
            Some("Tomatoes love sunshine. Water tomatoes early, and mulch your beds.".into());

        let output = generate_hashtags(&request);

        assert_eq!(
            output.hashtags,
            vec![
                "#Gardening",
                "#Motivation",
                "#Inspiration",
                "#Community",
                "#ShareThis",
                "#Tomatoes",
                "#Love"
            ]
        );
    }

    #[test]
    fn duplicates_are_removed_case_insensitively() {
        let mut request = input("Tips tips TIPS for leadership", "Professional", "facebook");
        request.content = Some("Leadership leadership tips".into());

        let output = generate_hashtags(&request);

        assert_unique(&output.hashtags);
        assert!(output.hashtags.len() <= 7);
    }

    #[test]
    fn output_never_exceeds_platform_limit() {
        for platform in ["linkedin", "twitter", "facebook", "myspace"] {
            for tone in ["Professional", "Casual", "Inspirational", "Grumpy"] {
                let mut request = input(
                    "Building resilient distributed systems at scale with observability",
                    tone,
                    platform,
                );
                request.content = Some(
                    "Observability matters. Tracing, metrics and logging across services.".into(),
                );
                let output = generate_hashtags(&request);
                assert!(output.hashtags.len() <= platform_max(Some(platform)));
                assert_unique(&output.hashtags);
            }
        }
    }

    #[test]
    fn stop_word_topic_falls_back() {
        let output = generate_hashtags(&input("how to do it", "Casual", "twitter"));
        assert_eq!(output.hashtags, vec!["#Content", "#SocialMedia", "#Marketing"]);
        assert!(output.reasoning.starts_with("Fallback"));
    }

    #[test]
    fn malformed_tool_input_falls_back() {
        let value = HashtagTool
            .call(&json!({ "topic": 42, "platform": "facebook" }))
            .unwrap();
        let output: HashtagOutput = serde_json::from_value(value).unwrap();
        assert_eq!(output.hashtags.len(), 5);
        assert_eq!(output.hashtags[0], "#Content");
    }
}
