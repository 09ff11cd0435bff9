//! Data model: sequences, steps, checkpoints, broadcast targets, inbound messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RelayError, Result};

/// Typing-style indicator shown to the recipient before a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Composing,
    Recording,
    Available,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Composing => "composing",
            Presence::Recording => "recording",
            Presence::Available => "available",
        }
    }

    /// Composing and recording are followed by a short settle pause before sending.
    pub fn needs_settle(&self) -> bool {
        matches!(self, Presence::Composing | Presence::Recording)
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Link with a rich preview card.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinkPreview {
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub media_url: String,
}

/// What a step sends. Config uses the `type` field as discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Text {
        content: String,
    },
    Media {
        path: PathBuf,
        #[serde(default, rename = "media_type")]
        media_kind: MediaKind,
        #[serde(default, alias = "description")]
        caption: Option<String>,
    },
    Audio {
        path: PathBuf,
        #[serde(default, alias = "ptt")]
        voice_note: bool,
        #[serde(default)]
        caption: Option<String>,
    },
    Contact {
        phone_number: String,
        #[serde(alias = "name")]
        display_name: String,
    },
    Link(LinkPreview),
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Text { .. } => "text",
            StepKind::Media { .. } => "media",
            StepKind::Audio { .. } => "audio",
            StepKind::Contact { .. } => "contact",
            StepKind::Link(_) => "link",
        }
    }
}

/// One unit of outbound content plus the pause that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    /// Milliseconds to wait after the send before the next step.
    #[serde(default, rename = "delay")]
    pub delay_ms: u64,
}

impl Step {
    pub fn new(kind: StepKind, delay_ms: u64) -> Self {
        Self { kind, delay_ms }
    }

    pub fn text(content: &str, delay_ms: u64) -> Self {
        Self::new(
            StepKind::Text {
                content: content.to_string(),
            },
            delay_ms,
        )
    }

    /// Indicator to show before sending this step.
    pub fn presence(&self) -> Presence {
        match &self.kind {
            StepKind::Audio { voice_note: true, .. } => Presence::Recording,
            StepKind::Audio { .. } => Presence::Available,
            StepKind::Text { .. }
            | StepKind::Media { .. }
            | StepKind::Contact { .. }
            | StepKind::Link(_) => Presence::Composing,
        }
    }

    fn validate(&self) -> Result<()> {
        let problem = match &self.kind {
            StepKind::Media { path, .. } | StepKind::Audio { path, .. }
                if path.as_os_str().is_empty() =>
            {
                Some("empty path")
            }
            StepKind::Contact { phone_number, .. } if phone_number.trim().is_empty() => {
                Some("empty phone_number")
            }
            StepKind::Link(link) if link.text.trim().is_empty() => Some("empty link text"),
            _ => None,
        };
        match problem {
            Some(p) => Err(RelayError::Config(format!("{} step: {p}", self.kind.label()))),
            None => Ok(()),
        }
    }
}

/// An ordered, immutable list of steps executed against one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub name: String,
    /// Normalized trigger keyword (trimmed, lower-cased).
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl SequenceDefinition {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            keyword: None,
            steps,
        }
    }

    pub fn with_keyword(mut self, keyword: &str) -> Self {
        self.keyword = normalize_keyword(keyword);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Normalize the keyword and check every step. Called once at load time.
    pub fn validated(mut self) -> Result<Self> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Config("sequence without a name".into()));
        }
        if self.steps.is_empty() {
            return Err(RelayError::Config(format!("sequence '{}' has no steps", self.name)));
        }
        for (i, step) in self.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| RelayError::Config(format!("sequence '{}' step {i}: {e}", self.name)))?;
        }
        self.keyword = self.keyword.as_deref().and_then(normalize_keyword);
        Ok(self)
    }
}

/// Trim + lowercase; empty keywords are dropped.
pub fn normalize_keyword(raw: &str) -> Option<String> {
    let k = raw.trim().to_lowercase();
    if k.is_empty() { None } else { Some(k) }
}

/// Durable progress of one recipient through a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub recipient_id: String,
    /// Sequence the recipient is in. `None` for records written by older layouts.
    #[serde(default)]
    pub sequence: Option<String>,
    /// Index of the next step to execute.
    pub step_index: usize,
}

impl Checkpoint {
    pub fn new(recipient_id: &str, sequence: &str, step_index: usize) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            sequence: Some(sequence.to_string()),
            step_index,
        }
    }
}

/// A group-like destination with a recurring send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastTarget {
    #[serde(alias = "id")]
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    pub interval_hours: f64,
}

/// Longest accepted broadcast interval: one year.
pub const MAX_INTERVAL_HOURS: f64 = 24.0 * 366.0;

impl BroadcastTarget {
    pub fn interval_ms(&self) -> i64 {
        (self.interval_hours * 3_600_000.0).round() as i64
    }

    pub fn validated(self) -> Result<Self> {
        if self.group_id.trim().is_empty() {
            return Err(RelayError::Config("broadcast group without an id".into()));
        }
        if !(self.interval_hours.is_finite() && self.interval_hours > 0.0) {
            return Err(RelayError::Config(format!(
                "broadcast group '{}' needs a positive interval_hours",
                self.group_id
            )));
        }
        if self.interval_hours > MAX_INTERVAL_HOURS {
            return Err(RelayError::Config(format!(
                "broadcast group '{}': interval_hours {} exceeds {MAX_INTERVAL_HOURS}",
                self.group_id, self.interval_hours
            )));
        }
        Ok(self)
    }
}

/// Fixed quoted-reply decoration attached to broadcast sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteDecoration {
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: Option<PathBuf>,
}

impl Default for QuoteDecoration {
    fn default() -> Self {
        Self {
            text: "whatsapp-bot™️".into(),
            title: "TM".into(),
            thumbnail: None,
        }
    }
}

/// Image/video send request.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaMessage {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub caption: Option<String>,
    pub quote: Option<QuoteDecoration>,
}

/// Inbound message, already classified by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Conversation the message belongs to (recipient id for one-to-one chats).
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub is_group: bool,
    /// Sent by this account (operator typing on the same number).
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn direct(from: &str, text: &str) -> Self {
        Self {
            chat_id: from.to_string(),
            sender_id: from.to_string(),
            text: text.to_string(),
            is_group: false,
            from_me: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_is_derived_from_kind() {
        let voice = Step::new(
            StepKind::Audio {
                path: "a.mp3".into(),
                voice_note: true,
                caption: None,
            },
            0,
        );
        let plain_audio = Step::new(
            StepKind::Audio {
                path: "a.mp3".into(),
                voice_note: false,
                caption: None,
            },
            0,
        );
        assert_eq!(voice.presence(), Presence::Recording);
        assert_eq!(plain_audio.presence(), Presence::Available);
        assert_eq!(Step::text("hi", 0).presence(), Presence::Composing);
        assert!(!Presence::Available.needs_settle());
    }

    #[test]
    fn test_step_from_toml() {
        let toml_str = r#"
            type = "media"
            path = "media/pescador.jpg"
            media_type = "video"
            description = "look at this"
            delay = 60000
        "#;
        let step: Step = toml::from_str(toml_str).unwrap();
        assert_eq!(step.delay_ms, 60000);
        match step.kind {
            StepKind::Media { media_kind, caption, .. } => {
                assert_eq!(media_kind, MediaKind::Video);
                assert_eq!(caption.as_deref(), Some("look at this"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_unknown_step_type_is_rejected() {
        let toml_str = r#"
            type = "sticker"
            path = "x.webp"
        "#;
        assert!(toml::from_str::<Step>(toml_str).is_err());
    }

    #[test]
    fn test_validated_normalizes_keyword() {
        let seq = SequenceDefinition {
            name: "promo".into(),
            keyword: Some("  PreÇo ".into()),
            steps: vec![Step::text("hello", 0)],
        }
        .validated()
        .unwrap();
        assert_eq!(seq.keyword.as_deref(), Some("preço"));
    }

    #[test]
    fn test_empty_sequence_is_config_error() {
        let err = SequenceDefinition::new("empty", vec![]).validated().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_interval_ms() {
        let target = BroadcastTarget {
            group_id: "123@g.us".into(),
            name: "Market".into(),
            interval_hours: 1.5,
        };
        assert_eq!(target.interval_ms(), 5_400_000);
    }

    #[test]
    fn test_interval_bounds() {
        let target = |interval_hours| BroadcastTarget {
            group_id: "123@g.us".into(),
            name: String::new(),
            interval_hours,
        };
        assert!(target(MAX_INTERVAL_HOURS).validated().is_ok());
        assert!(target(MAX_INTERVAL_HOURS + 1.0).validated().is_err());
        assert!(target(1e300).validated().is_err());
        assert!(target(f64::INFINITY).validated().is_err());
        assert!(target(-2.0).validated().is_err());
    }
}
