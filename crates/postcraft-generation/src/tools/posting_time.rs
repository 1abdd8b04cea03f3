//! Best-posting-time tool.

use postcraft_core::{Platform, PostingTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolSpec, POSTING_TIME_TOOL};
use crate::error::ToolError;

const FALLBACK_HOUR: u8 = 9;
const FALLBACK_CONFIDENCE: f64 = 0.5;

const BASE_CONFIDENCE: f64 = 0.85;
const LINKEDIN_BONUS: f64 = 0.05;
const PEAK_DAY_BONUS: f64 = 0.05;
const WEEKEND_PENALTY: f64 = 0.15;
const AUDIENCE_BONUS: f64 = 0.05;

const DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Engagement profile of a platform.
struct Profile {
    platform: Option<Platform>,
    /// Candidate hours, best first.
    hours: &'static [u8],
    peak_days: &'static [&'static str],
}

impl Profile {
    fn lookup(name: Option<&str>) -> Self {
        match name.and_then(|n| n.parse::<Platform>().ok()) {
            Some(Platform::LinkedIn) => Self {
                platform: Some(Platform::LinkedIn),
                hours: &[9, 12, 17],
                peak_days: &["tuesday", "wednesday", "thursday"],
            },
            Some(Platform::Twitter) => Self {
                platform: Some(Platform::Twitter),
                hours: &[12, 9, 15],
                peak_days: &["wednesday", "friday"],
            },
            Some(Platform::Facebook) => Self {
                platform: Some(Platform::Facebook),
                hours: &[13, 9, 15],
                peak_days: &["wednesday", "thursday", "friday"],
            },
            None => Self {
                platform: None,
                hours: &[10, 14],
                peak_days: &[],
            },
        }
    }

    fn base_hour(&self) -> u8 {
        self.hours.first().copied().unwrap_or(FALLBACK_HOUR)
    }

    fn default_day(&self) -> &'static str {
        self.peak_days.first().copied().unwrap_or("wednesday")
    }

    fn display_name(&self) -> &'static str {
        self.platform.map_or("Social media", |p| p.display_name())
    }
}

/// Input of [`compute_best_posting_time`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingTimeInput {
    /// Platform name.
    #[serde(default)]
    pub platform: Option<String>,
    /// IANA timezone name; only mentioned in the explanation.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Day of week to plan for.
    #[serde(default, alias = "day_of_week")]
    pub day_of_week: Option<String>,
    /// Free-form audience description.
    #[serde(default, alias = "target_audience")]
    pub target_audience: Option<String>,
}

fn parse_day(day: &str) -> Result<&'static str, ToolError> {
    let lowered = day.trim().to_ascii_lowercase();
    DAYS.iter()
        .copied()
        .find(|d| *d == lowered || (lowered.len() == 3 && d.starts_with(lowered.as_str())))
        .ok_or_else(|| ToolError::InvalidInput(format!("unknown day of week: {day}")))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        format!("{}{}", first.to_uppercase(), chars.as_str())
    })
}

fn is_weekend(day: &str) -> bool {
    matches!(day, "saturday" | "sunday")
}

fn day_shift(profile: &Profile, day: &str) -> i32 {
    if is_weekend(day) {
        if profile.platform == Some(Platform::LinkedIn) {
            -3
        } else {
            1
        }
    } else if matches!(day, "monday" | "friday") {
        -1
    } else {
        0
    }
}

fn audience_shift(audience: Option<&str>) -> i32 {
    let Some(audience) = audience.map(str::to_ascii_lowercase) else {
        return 0;
    };
    if audience.contains("b2b") || audience.contains("professional") {
        1
    } else if audience.contains("student") {
        3
    } else {
        0
    }
}

fn is_specific_audience(audience: Option<&str>) -> bool {
    audience.map(str::trim).is_some_and(|a| {
        !a.is_empty()
            && !matches!(
                a.to_ascii_lowercase().as_str(),
                "general" | "generic" | "everyone" | "all"
            )
    })
}

fn format_hour(hour: u8) -> String {
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let display = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display}:00 {suffix}")
}

fn qualifier(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "High"
    } else if confidence >= 0.75 {
        "Good"
    } else if confidence >= 0.6 {
        "Moderate"
    } else {
        "Low"
    }
}

/// The recommendation returned when the input cannot be used.
#[must_use]
pub fn fallback_posting_time() -> PostingTime {
    PostingTime {
        hour: FALLBACK_HOUR,
        confidence: FALLBACK_CONFIDENCE,
        reason: "Default recommendation: weekday mornings perform reliably across platforms."
            .to_string(),
        day_of_week: None,
    }
}

fn compute(input: &PostingTimeInput) -> Result<PostingTime, ToolError> {
    let profile = Profile::lookup(input.platform.as_deref());
    let day = match input.day_of_week.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => parse_day(d)?,
        _ => profile.default_day(),
    };
    let audience = input.target_audience.as_deref();

    let shifted = i32::from(profile.base_hour()) + day_shift(&profile, day) + audience_shift(audience);
    let hour = u8::try_from(shifted.rem_euclid(24))
        .map_err(|_| ToolError::InvalidInput(format!("hour out of range: {shifted}")))?;

    let peak = profile.peak_days.contains(&day);
    let weekend = is_weekend(day);
    let specific_audience = is_specific_audience(audience);

    let mut confidence = BASE_CONFIDENCE;
    if profile.platform == Some(Platform::LinkedIn) {
        confidence += LINKEDIN_BONUS;
    }
    if peak {
        confidence += PEAK_DAY_BONUS;
    }
    if weekend {
        confidence -= WEEKEND_PENALTY;
    }
    if specific_audience {
        confidence += AUDIENCE_BONUS;
    }
    let confidence = (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0;

    let day_name = capitalize(day);
    let mut parts = vec![format!(
        "{} audiences engage most around {} on {day_name}{}.",
        profile.display_name(),
        format_hour(hour),
        input
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|tz| !tz.is_empty())
            .map(|tz| format!(" ({tz})"))
            .unwrap_or_default(),
    )];
    if peak {
        parts.push(format!("{day_name} is a peak day on this platform."));
    } else if weekend {
        parts.push("Weekend activity shifts the window.".to_string());
    }
    if let Some(audience) = audience.filter(|_| specific_audience) {
        parts.push(format!("Adjusted for a {} audience.", audience.trim()));
    }
    parts.push(format!("{} confidence.", qualifier(confidence)));

    Ok(PostingTime {
        hour,
        confidence,
        reason: parts.join(" "),
        day_of_week: Some(day_name),
    })
}

/// Recommend an hour to publish.
///
/// Starts from the platform's best candidate hour, shifts it for the day of week
/// and the audience, and scores the recommendation. Returns
/// [`fallback_posting_time`] for unusable input.
#[must_use]
pub fn compute_best_posting_time(input: &PostingTimeInput) -> PostingTime {
    compute(input).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Posting time fell back to default");
        fallback_posting_time()
    })
}

/// [`compute_best_posting_time`] exposed through the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostingTimeTool;

impl Tool for PostingTimeTool {
    fn name(&self) -> &'static str {
        POSTING_TIME_TOOL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: POSTING_TIME_TOOL.to_string(),
            description: "Recommend the best hour to publish a post on a platform.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "platform": { "type": "string", "enum": ["linkedin", "twitter", "facebook"] },
                    "timezone": { "type": "string", "description": "IANA timezone, e.g. Europe/Berlin" },
                    "dayOfWeek": { "type": "string", "description": "Day to publish on" },
                    "targetAudience": { "type": "string", "description": "Who the post is for" }
                },
                "required": ["platform"]
            }),
        }
    }

    fn call(&self, input: &Value) -> Result<Value, ToolError> {
        let time = serde_json::from_value::<PostingTimeInput>(input.clone())
            .map_or_else(|_| fallback_posting_time(), |parsed| compute_best_posting_time(&parsed));
        serde_json::to_value(time).map_err(|e| ToolError::InvalidInput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(platform: &str, day: Option<&str>, audience: Option<&str>) -> PostingTime {
        compute_best_posting_time(&PostingTimeInput {
            platform: Some(platform.into()),
            timezone: None,
            day_of_week: day.map(Into::into),
            target_audience: audience.map(Into::into),
        })
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn linkedin_peak_day_b2b() {
        let time = run("linkedin", Some("Tuesday"), Some("B2B founders"));
        assert_eq!(time.hour, 10);
        assert_close(time.confidence, 1.0);
        assert_eq!(time.day_of_week.as_deref(), Some("Tuesday"));
        assert!(time.reason.contains("10:00 AM"));
        assert!(time.reason.contains("High confidence"));
    }

    #[test]
    fn linkedin_weekend_shifts_earlier() {
        let time = run("linkedin", Some("saturday"), None);
        assert_eq!(time.hour, 6);
        assert_close(time.confidence, 0.75);
    }

    #[test]
    fn twitter_weekend_student_shifts_later() {
        let time = run("twitter", Some("Sun"), Some("students"));
        assert_eq!(time.hour, 16);
        assert_close(time.confidence, 0.75);
        assert!(time.reason.contains("4:00 PM"));
    }

    #[test]
    fn monday_moves_one_hour_earlier() {
        let time = run("facebook", Some("Monday"), Some("general"));
        assert_eq!(time.hour, 12);
        assert_close(time.confidence, 0.85);
        assert!(time.reason.contains("12:00 PM"));
    }

    #[test]
    fn missing_day_uses_first_peak_day() {
        let time = run("linkedin", None, None);
        assert_eq!(time.day_of_week.as_deref(), Some("Tuesday"));
        assert_eq!(time.hour, 9);
        assert_close(time.confidence, 0.95);
    }

    #[test]
    fn invalid_day_returns_fallback() {
        let time = run("linkedin", Some("Funday"), None);
        assert_eq!(time, fallback_posting_time());
    }

    #[test]
    fn timezone_only_affects_reason() {
        let mut input = PostingTimeInput {
            platform: Some("twitter".into()),
            ..PostingTimeInput::default()
        };
        let without = compute_best_posting_time(&input);
        input.timezone = Some("Europe/Berlin".into());
        let with = compute_best_posting_time(&input);

        assert_eq!(with.hour, without.hour);
        assert!(with.reason.contains("(Europe/Berlin)"));
    }

    #[test]
    fn bounds_hold_for_every_combination() {
        let platforms = ["linkedin", "twitter", "facebook", "mastodon", ""];
        let days = [
            None,
            Some("monday"),
            Some("friday"),
            Some("saturday"),
            Some("sunday"),
            Some("wed"),
            Some("someday"),
        ];
        let audiences = [None, Some("B2B"), Some("students"), Some("gardeners"), Some("")];

        for platform in platforms {
            for day in days {
                for audience in audiences {
                    let time = run(platform, day, audience);
                    assert!(time.hour <= 23);
                    assert!((0.0..=1.0).contains(&time.confidence));
                }
            }
        }
    }

    #[test]
    fn tool_output_uses_camel_case() {
        let value = PostingTimeTool
            .call(&json!({ "platform": "facebook", "dayOfWeek": "thursday" }))
            .unwrap();
        assert_eq!(value["hour"], 13);
        assert_eq!(value["dayOfWeek"], "Thursday");
    }
}
