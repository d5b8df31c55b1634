//! Tutorbot: conversation orchestration for an AI learning assistant.
//!
//! The crate wires a learner-facing chat surface to heterogeneous AI
//! providers: a text tutoring provider, an interchangeable vision
//! (image understanding) provider family, and a deterministic rule-based
//! degraded mode when no credential is configured.

pub mod catalog;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod providers;
pub mod service;
pub mod store;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Turn identifier type.
pub type TurnId = uuid::Uuid;

/// Conversation session identifier type.
pub type SessionId = uuid::Uuid;

/// Difficulty tiers shared by catalog concepts and vision analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Basic => write!(f, "basic"),
            Difficulty::Intermediate => write!(f, "intermediate"),
            Difficulty::Advanced => write!(f, "advanced"),
        }
    }
}

/// Capabilities the service can be asked about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Vision,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Text => write!(f, "text"),
            Capability::Vision => write!(f, "vision"),
        }
    }
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// Attachment kinds a turn can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
}

/// A turn attachment. Image data is carried base64-encoded, ready for
/// inlining into a vision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub data: String,
}

impl Attachment {
    pub fn image(base64_data: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            data: base64_data.into(),
        }
    }
}

/// One message in a conversation. Immutable once appended to the store.
///
/// The knowledge context is a snapshot taken at send time; later changes
/// to the learner's selection never alter historical turns. Assistant
/// turns produced by the vision path also carry the structured analysis
/// alongside the flattened text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub knowledge_context: Option<context::KnowledgeContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<providers::VisionAnalysis>,
}

impl Turn {
    fn new(role: TurnRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role,
            content,
            timestamp: chrono::Utc::now(),
            knowledge_context: None,
            attachments: Vec::new(),
            analysis: None,
        }
    }

    pub fn user(
        content: impl Into<String>,
        knowledge_context: Option<context::KnowledgeContext>,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            knowledge_context,
            attachments,
            ..Self::new(TurnRole::User, content.into())
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        knowledge_context: Option<context::KnowledgeContext>,
    ) -> Self {
        Self {
            knowledge_context,
            ..Self::new(TurnRole::Assistant, content.into())
        }
    }

    /// Attach a structured vision analysis to an assistant turn.
    pub fn with_analysis(mut self, analysis: providers::VisionAnalysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    pub fn has_image(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.kind == AttachmentKind::Image)
    }
}

/// Session lifecycle status. Transitions are caller-driven; nothing in
/// this crate expires a session automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// One open conversation: an ordered, append-only log of turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub turns: Vec<Turn>,
    /// Context of the most recent user turn, for UI binding.
    pub knowledge_context: Option<context::KnowledgeContext>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub status: SessionStatus,
}

impl ConversationSession {
    /// Create a session seeded with its first turn.
    pub fn seeded(turn: Turn) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            knowledge_context: turn.knowledge_context.clone(),
            turns: vec![turn],
            started_at: now,
            last_activity_at: now,
            status: SessionStatus::Active,
        }
    }
}
