//! Conversation data model
//!
//! Turns, transcripts, feature identifiers, and the persisted session
//! record with its derived listing metadata.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters of the first user turn kept as a record title.
const TITLE_MAX_CHARS: usize = 30;

/// Maximum characters of the first user turn kept as a preview before the
/// ellipsis marker is appended.
const PREVIEW_MAX_CHARS: usize = 50;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation. Immutable once appended to a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A named conversational surface. Each feature binds one session controller
/// to one remote endpoint and keys its own history partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureId {
    Chat,
    StudyBuddy,
    Polisher,
    FactCheck,
    PersonalDoctor,
}

impl FeatureId {
    /// All features, in presentation order.
    pub const ALL: [FeatureId; 5] = [
        FeatureId::Chat,
        FeatureId::StudyBuddy,
        FeatureId::Polisher,
        FeatureId::FactCheck,
        FeatureId::PersonalDoctor,
    ];

    /// Stable identifier used as the storage key and wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureId::Chat => "chat",
            FeatureId::StudyBuddy => "study-buddy",
            FeatureId::Polisher => "polisher",
            FeatureId::FactCheck => "fact-check",
            FeatureId::PersonalDoctor => "personal-doctor",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            FeatureId::Chat => "Chat",
            FeatureId::StudyBuddy => "Study Buddy",
            FeatureId::Polisher => "Polisher",
            FeatureId::FactCheck => "Fact Check",
            FeatureId::PersonalDoctor => "Personal Doctor",
        }
    }

    /// Endpoint path under the service base URL.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            FeatureId::Chat => "/api/chat",
            FeatureId::StudyBuddy => "/api/study-buddy",
            FeatureId::Polisher => "/api/polisher",
            FeatureId::FactCheck => "/api/fact-check",
            FeatureId::PersonalDoctor => "/api/personal-doctor",
        }
    }

    /// Name of the response field carrying the assistant text.
    pub fn response_field(&self) -> &'static str {
        match self {
            FeatureId::Chat => "response",
            FeatureId::StudyBuddy => "summary",
            FeatureId::Polisher => "polished",
            FeatureId::FactCheck => "fact_check_result",
            FeatureId::PersonalDoctor => "advice",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeatureId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(FeatureId::Chat),
            "study-buddy" => Ok(FeatureId::StudyBuddy),
            "polisher" => Ok(FeatureId::Polisher),
            "fact-check" => Ok(FeatureId::FactCheck),
            "personal-doctor" => Ok(FeatureId::PersonalDoctor),
            _ => Err(format!("Unknown feature: {}", s)),
        }
    }
}

/// Persisted snapshot of a conversation, with derived metadata for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub feature: FeatureId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub preview: String,
    pub transcript: Vec<Turn>,
}

impl SessionRecord {
    /// Build a record from a transcript, deriving `title` and `preview` from
    /// the first user turn. Returns `None` when the transcript holds no user
    /// turn: such exchanges are never recorded.
    pub fn from_transcript(feature: FeatureId, transcript: &[Turn]) -> Option<Self> {
        let first_user = transcript.iter().find(|turn| turn.role == Role::User)?;
        Some(Self {
            id: Uuid::new_v4().to_string(),
            feature,
            title: truncate_chars(&first_user.content, TITLE_MAX_CHARS, false),
            created_at: Utc::now(),
            preview: truncate_chars(&first_user.content, PREVIEW_MAX_CHARS, true),
            transcript: transcript.to_vec(),
        })
    }
}

/// Truncate to at most `max` characters, counting `char`s rather than bytes
/// so multibyte text is never split. Appends an ellipsis marker only when
/// `mark` is set and the text was actually cut.
fn truncate_chars(text: &str, max: usize, mark: bool) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    if mark {
        format!("{cut}…")
    } else {
        cut
    }
}

/// Binary payload attached to a submission. Request-scoped: attachments ride
/// along on the outbound call and are never persisted into session records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            content,
        }
    }
}

/// Content staged for a user turn that carries attachments but no text.
pub(crate) fn attachment_turn_content(count: usize) -> String {
    if count == 1 {
        "[1 attachment]".to_string()
    } else {
        format!("[{count} attachments]")
    }
}
