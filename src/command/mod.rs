//! Command records and their lifecycle statuses.
//!
//! A [`CommandRecord`] is the unit of work flowing through the capture
//! pipeline: created by the voice recorder or text input, persisted in the
//! database, and advanced stage by stage until completion.

pub mod retry;
pub mod transition;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a command.
///
/// Voice-origin commands enter at [`Recorded`](CommandStatus::Recorded) and
/// pass through the review and transcription stages; text-origin commands
/// start directly at [`Queued`](CommandStatus::Queued).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Audio captured, waiting to enter review
    Recorded,
    /// Human-gated review before transcription
    ManualReview,
    /// Speech-to-text in progress
    Transcribing,
    /// Waiting to be dispatched to a connector
    Queued,
    /// Connector call in flight
    Processing,
    /// Terminal: the command has been routed successfully
    Completed,
}

impl CommandStatus {
    /// Returns a human-readable description of the status
    pub fn description(&self) -> &'static str {
        match self {
            CommandStatus::Recorded => "Recording captured",
            CommandStatus::ManualReview => "Waiting for review",
            CommandStatus::Transcribing => "Transcribing audio",
            CommandStatus::Queued => "Waiting to be processed",
            CommandStatus::Processing => "Processing",
            CommandStatus::Completed => "Completed",
        }
    }

    /// The string form stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Recorded => "recorded",
            CommandStatus::ManualReview => "manual_review",
            CommandStatus::Transcribing => "transcribing",
            CommandStatus::Queued => "queued",
            CommandStatus::Processing => "processing",
            CommandStatus::Completed => "completed",
        }
    }

    /// Returns whether this status belongs to the voice-only leg of the
    /// pipeline (a record without audio never holds one of these)
    pub fn is_voice_stage(&self) -> bool {
        matches!(
            self,
            CommandStatus::Recorded | CommandStatus::ManualReview | CommandStatus::Transcribing
        )
    }

    /// Returns whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed)
    }
}

/// Error returned when a stored status string does not match any known
/// status value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown command status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for CommandStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recorded" => Ok(CommandStatus::Recorded),
            "manual_review" => Ok(CommandStatus::ManualReview),
            "transcribing" => Ok(CommandStatus::Transcribing),
            "queued" => Ok(CommandStatus::Queued),
            "processing" => Ok(CommandStatus::Processing),
            "completed" => Ok(CommandStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A captured user command and its pipeline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    /// Unique identifier (UUID), never reused.
    pub id: String,
    /// The literal user input. For voice commands this is a placeholder
    /// until transcription succeeds.
    pub text: String,
    /// Path to the audio recording. Set if and only if the command
    /// originated as a voice recording.
    pub audio_path: Option<String>,
    /// Attached photo filenames, in display order.
    pub photo_paths: Vec<String>,
    /// Current pipeline status.
    pub status: CommandStatus,
    /// Creation time (UTC). Set once, never mutated.
    pub created_at: DateTime<Utc>,
    /// Transcribed text, populated once transcription succeeds.
    pub transcription: Option<String>,
    /// Failure detail for the last failed operation, if any.
    pub error_message: Option<String>,
    /// Whether the last operation in the current status failed.
    pub failed: bool,
    /// Whether the command needs human attention for a reason other than
    /// failure (low-confidence parse, review gate).
    pub action_needed: bool,
}

/// Placeholder text shown while a voice command awaits transcription
const VOICE_PLACEHOLDER: &str = "Recording...";

impl CommandRecord {
    /// Creates a new text-origin command, queued for processing.
    pub fn new_text(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            audio_path: None,
            photo_paths: Vec::new(),
            status: CommandStatus::Queued,
            created_at: Utc::now(),
            transcription: None,
            error_message: None,
            failed: false,
            action_needed: false,
        }
    }

    /// Creates a new voice-origin command pointing at a captured recording.
    pub fn new_voice(audio_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: VOICE_PLACEHOLDER.to_string(),
            audio_path: Some(audio_path.into()),
            photo_paths: Vec::new(),
            status: CommandStatus::Recorded,
            created_at: Utc::now(),
            transcription: None,
            error_message: None,
            failed: false,
            action_needed: false,
        }
    }

    /// The content a consumer should display or dispatch: the
    /// transcription when present, the raw text otherwise.
    pub fn content(&self) -> &str {
        self.transcription.as_deref().unwrap_or(&self.text)
    }

    /// Checks the record against the data-model invariants.
    ///
    /// Called when a record enters the queue and when a migrated row is
    /// read back; a violating record is rejected rather than trusted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        if self.status.is_voice_stage() && self.audio_path.is_none() {
            return Err(ValidationError::AudioRequired {
                status: self.status,
            });
        }

        if !self.status.is_voice_stage()
            && self.text.is_empty()
            && self.transcription.as_deref().unwrap_or("").is_empty()
        {
            return Err(ValidationError::MissingContent {
                status: self.status,
            });
        }

        if self.created_at > Utc::now() {
            return Err(ValidationError::CreatedInFuture);
        }

        if self.error_message.is_some() && !self.failed {
            return Err(ValidationError::ErrorWithoutFailure);
        }

        Ok(())
    }
}

/// A command record violating a data-model invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("command id must not be empty")]
    EmptyId,

    #[error("status {status:?} requires an audio recording")]
    AudioRequired { status: CommandStatus },

    #[error("status {status:?} requires text or a transcription")]
    MissingContent { status: CommandStatus },

    #[error("command creation time is in the future")]
    CreatedInFuture,

    #[error("error message set on a command that is not failed")]
    ErrorWithoutFailure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_text_command() {
        let cmd = CommandRecord::new_text("Buy milk");
        assert!(!cmd.id.is_empty());
        assert_eq!(cmd.text, "Buy milk");
        assert_eq!(cmd.status, CommandStatus::Queued);
        assert!(cmd.audio_path.is_none());
        assert!(!cmd.failed);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_new_voice_command() {
        let cmd = CommandRecord::new_voice("a.m4a");
        assert_eq!(cmd.status, CommandStatus::Recorded);
        assert_eq!(cmd.audio_path.as_deref(), Some("a.m4a"));
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_status_round_trips_through_string() {
        for status in [
            CommandStatus::Recorded,
            CommandStatus::ManualReview,
            CommandStatus::Transcribing,
            CommandStatus::Queued,
            CommandStatus::Processing,
            CommandStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<CommandStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let err = "failed".parse::<CommandStatus>().unwrap_err();
        assert_eq!(err.0, "failed");
    }

    #[test]
    fn test_status_serialisation_matches_storage_form() {
        let json = serde_json::to_string(&CommandStatus::ManualReview).unwrap();
        assert_eq!(json, "\"manual_review\"");
    }

    #[test]
    fn test_voice_stage_without_audio_rejected() {
        let mut cmd = CommandRecord::new_text("Buy milk");
        cmd.status = CommandStatus::Transcribing;
        assert_eq!(
            cmd.validate(),
            Err(ValidationError::AudioRequired {
                status: CommandStatus::Transcribing
            })
        );
    }

    #[test]
    fn test_queued_without_content_rejected() {
        let mut cmd = CommandRecord::new_text("");
        assert_eq!(
            cmd.validate(),
            Err(ValidationError::MissingContent {
                status: CommandStatus::Queued
            })
        );

        // A transcription satisfies the content requirement on its own
        cmd.transcription = Some("Buy milk".to_string());
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_future_created_at_rejected() {
        let mut cmd = CommandRecord::new_text("Buy milk");
        cmd.created_at = Utc::now() + Duration::minutes(5);
        assert_eq!(cmd.validate(), Err(ValidationError::CreatedInFuture));
    }

    #[test]
    fn test_error_message_requires_failed_flag() {
        let mut cmd = CommandRecord::new_text("Buy milk");
        cmd.error_message = Some("boom".to_string());
        assert_eq!(cmd.validate(), Err(ValidationError::ErrorWithoutFailure));

        cmd.failed = true;
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_content_prefers_transcription() {
        let mut cmd = CommandRecord::new_voice("a.m4a");
        assert_eq!(cmd.content(), VOICE_PLACEHOLDER);

        cmd.transcription = Some("Call the dentist".to_string());
        assert_eq!(cmd.content(), "Call the dentist");
    }
}
