//! Generation request and result types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, ArtifactId, BillingError};

/// Minimum topic length in characters (after trimming).
pub const TOPIC_MIN_CHARS: usize = 3;

/// Maximum topic length in characters (after trimming).
pub const TOPIC_MAX_CHARS: usize = 200;

/// Voice of the generated post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tone {
    /// Polished, business-appropriate.
    Professional,
    /// Conversational and relaxed.
    Casual,
    /// Motivational and uplifting.
    Inspirational,
}

impl Tone {
    /// Display name as accepted on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "Professional",
            Self::Casual => "Casual",
            Self::Inspirational => "Inspirational",
        }
    }
}

impl FromStr for Tone {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "professional" => Ok(Self::Professional),
            "casual" => Ok(Self::Casual),
            "inspirational" => Ok(Self::Inspirational),
            _ => Err(BillingError::Validation(format!(
                "tone must be one of Professional, Casual, Inspirational (got {s:?})"
            ))),
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target length of the generated post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Length {
    /// A few sentences.
    Short,
    /// Two or three short paragraphs.
    Medium,
    /// A long-form post.
    Long,
}

impl Length {
    /// Display name as accepted on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "Short",
            Self::Medium => "Medium",
            Self::Long => "Long",
        }
    }
}

impl FromStr for Length {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "medium" => Ok(Self::Medium),
            "long" => Ok(Self::Long),
            _ => Err(BillingError::Validation(format!(
                "length must be one of Short, Medium, Long (got {s:?})"
            ))),
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Social platform the post is written for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// LinkedIn (default).
    #[default]
    #[serde(rename = "linkedin")]
    LinkedIn,
    /// Twitter / X.
    Twitter,
    /// Facebook.
    Facebook,
}

impl Platform {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::Twitter => "twitter",
            Self::Facebook => "facebook",
        }
    }

    /// Name for human-readable text.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::LinkedIn => "LinkedIn",
            Self::Twitter => "Twitter/X",
            Self::Facebook => "Facebook",
        }
    }
}

impl FromStr for Platform {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linkedin" => Ok(Self::LinkedIn),
            "twitter" | "x" => Ok(Self::Twitter),
            "facebook" => Ok(Self::Facebook),
            _ => Err(BillingError::Validation(format!(
                "platform must be one of linkedin, twitter, facebook (got {s:?})"
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a generation is produced and billed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Content only, no tools.
    Plain,
    /// Content first, then hashtag and posting-time tools in sequence.
    #[default]
    Sequential,
    /// One streaming model call with tools dispatched as they are requested.
    Interleaved,
}

impl GenerationMode {
    /// Credits charged for a successful generation in this mode.
    #[must_use]
    pub const fn cost(&self) -> i64 {
        match self {
            Self::Plain => 1,
            Self::Sequential | Self::Interleaved => 2,
        }
    }

    /// Whether the mode runs the tool registry.
    #[must_use]
    pub const fn uses_tools(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Sequential => "sequential",
            Self::Interleaved => "interleaved",
        }
    }
}

impl FromStr for GenerationMode {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "sequential" => Ok(Self::Sequential),
            "interleaved" => Ok(Self::Interleaved),
            _ => Err(BillingError::Validation(format!(
                "mode must be one of plain, sequential, interleaved (got {s:?})"
            ))),
        }
    }
}

/// A validated generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// What the post is about.
    pub topic: String,
    /// Voice.
    pub tone: Tone,
    /// Target length.
    pub length: Length,
    /// Target platform.
    pub platform: Platform,
}

impl GenerationRequest {
    /// Build a request, trimming and validating the topic.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` if the topic length is outside
    /// [`TOPIC_MIN_CHARS`]..=[`TOPIC_MAX_CHARS`].
    pub fn new(
        topic: &str,
        tone: Tone,
        length: Length,
        platform: Platform,
    ) -> Result<Self, BillingError> {
        let topic = topic.trim();
        let chars = topic.chars().count();
        if !(TOPIC_MIN_CHARS..=TOPIC_MAX_CHARS).contains(&chars) {
            return Err(BillingError::Validation(format!(
                "topic must be between {TOPIC_MIN_CHARS} and {TOPIC_MAX_CHARS} characters"
            )));
        }
        Ok(Self {
            topic: topic.to_string(),
            tone,
            length,
            platform,
        })
    }

    /// Parse a request from its wire strings.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::Validation` naming the first invalid field.
    pub fn parse(
        topic: &str,
        tone: &str,
        length: &str,
        platform: Option<&str>,
    ) -> Result<Self, BillingError> {
        let platform = platform.map_or(Ok(Platform::default()), str::parse)?;
        Self::new(topic, tone.parse()?, length.parse()?, platform)
    }
}

/// Recommended posting time produced by the posting-time tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingTime {
    /// Hour of day, 0-23.
    pub hour: u8,
    /// Confidence, 0.0-1.0.
    pub confidence: f64,
    /// Human-readable explanation.
    pub reason: String,
    /// Day of week the recommendation applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

/// Request echo attached to a generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    /// Topic.
    pub topic: String,
    /// Tone.
    pub tone: Tone,
    /// Length.
    pub length: Length,
    /// Platform.
    pub platform: Platform,
    /// When generation finished.
    pub generated_at: DateTime<Utc>,
}

impl GenerationMetadata {
    /// Metadata for a request finished now.
    #[must_use]
    pub fn for_request(request: &GenerationRequest) -> Self {
        Self {
            topic: request.topic.clone(),
            tone: request.tone,
            length: request.length,
            platform: request.platform,
            generated_at: Utc::now(),
        }
    }
}

/// The normalized result of a generation, identical across generation modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    /// Post body, without hashtags.
    pub content: String,
    /// Suggested hashtags (empty for plain generation).
    pub hashtags: Vec<String>,
    /// Suggested posting time (absent for plain generation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_time_to_post: Option<PostingTime>,
    /// Tokens reported by the model provider.
    pub total_tokens_used: u64,
    /// Request echo.
    pub metadata: GenerationMetadata,
}

/// Persisted output of a billed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationArtifact {
    /// Artifact ID.
    pub id: ArtifactId,
    /// Owning account.
    pub account_id: AccountId,
    /// The generated content.
    pub content: GeneratedContent,
    /// Mode it was generated in.
    pub mode: GenerationMode,
    /// Credits charged for the generation.
    pub credits_charged: i64,
    /// When the artifact was created.
    pub created_at: DateTime<Utc>,
}

impl GenerationArtifact {
    /// Create an artifact for freshly generated content.
    #[must_use]
    pub fn new(account_id: AccountId, content: GeneratedContent, mode: GenerationMode) -> Self {
        Self {
            id: ArtifactId::generate(),
            account_id,
            content,
            mode,
            credits_charged: mode.cost(),
            created_at: Utc::now(),
        }
    }
}
