//! Command dispatch orchestration.
//!
//! Wires together the flow from captured command to routed task:
//! 1. Capture (voice or text, via the queue coordinator)
//! 2. Review (human-gated, voice commands only)
//! 3. Transcription (external service, retried with backoff)
//! 4. Connector dispatch (task creation, retried with backoff)
//! 5. Cleanup (media files, after the store delete)
//!
//! The external services are reached through the [`Transcriber`] and
//! [`TaskConnector`] traits; this module knows their success/failure
//! contract and nothing else about them.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::command::CommandStatus;
use crate::media::MediaStore;
use crate::net::{retry_transport, BackoffPolicy};
use crate::queue::{CommandQueue, QueueError};

/// External speech-to-text service.
///
/// Implementations are expected to carry their own per-request timeout;
/// the dispatch layer only retries around them.
#[allow(async_fn_in_trait)]
pub trait Transcriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;
}

/// External task service connector.
///
/// Every operation takes an idempotency key (the command id) so a retried
/// call lands on the same remote task instead of duplicating it.
#[allow(async_fn_in_trait)]
pub trait TaskConnector {
    async fn create_task(&self, key: &str, title: &str) -> Result<()>;
    async fn complete_task(&self, key: &str) -> Result<()>;
    async fn delete_task(&self, key: &str) -> Result<()>;
}

/// Approves a reviewed voice command and runs transcription.
///
/// Moves the command from review into `transcribing`, calls the
/// transcriber through the retry executor, and on success stores the
/// transcription and queues the command for dispatch. On failure the
/// command is flagged for the needs-review views and the error propagates.
pub async fn process_voice_command<T: Transcriber>(
    queue: &mut CommandQueue,
    transcriber: &T,
    policy: &BackoffPolicy,
    id: &str,
) -> Result<()> {
    queue.update_status(id, CommandStatus::Transcribing)?;
    transcribe_and_queue(queue, transcriber, policy, id).await
}

/// Runs transcription for a command already in `transcribing`.
async fn transcribe_and_queue<T: Transcriber>(
    queue: &mut CommandQueue,
    transcriber: &T,
    policy: &BackoffPolicy,
    id: &str,
) -> Result<()> {
    let audio = queue
        .get(id)
        .ok_or_else(|| anyhow!("Unknown command: {}", id))?
        .audio_path
        .clone()
        .ok_or_else(|| anyhow!("Command {} has no audio recording", id))?;

    tracing::info!("Dispatch: transcribing command {}", id);
    let audio_path = PathBuf::from(&audio);
    let result = retry_transport(policy, |_| transcriber.transcribe(&audio_path)).await;

    match result {
        Ok(text) => {
            queue.update_transcription(id, Some(text))?;
            queue.update_status(id, CommandStatus::Queued)?;
            tracing::info!("Dispatch: command {} transcribed and queued", id);
            Ok(())
        }
        Err(e) => {
            record_failure(queue, id, &format!("Transcription failed: {}", e));
            Err(e.into())
        }
    }
}

/// Dispatches a queued command to the task connector.
///
/// Moves the command into `processing`, creates the remote task through
/// the retry executor, and marks the command completed. On failure the
/// command stays in `processing` with its failure flagged, where the retry
/// policy can send it back to the queue.
pub async fn submit_command<C: TaskConnector>(
    queue: &mut CommandQueue,
    connector: &C,
    policy: &BackoffPolicy,
    id: &str,
) -> Result<()> {
    queue.update_status(id, CommandStatus::Processing)?;

    let title = queue
        .get(id)
        .ok_or_else(|| anyhow!("Unknown command: {}", id))?
        .content()
        .to_string();

    tracing::info!("Dispatch: creating task for command {}", id);
    let result = retry_transport(policy, |_| connector.create_task(id, &title)).await;

    match result {
        Ok(()) => {
            queue.update_status(id, CommandStatus::Completed)?;
            tracing::info!("Dispatch: command {} completed", id);
            Ok(())
        }
        Err(e) => {
            record_failure(queue, id, &format!("Task creation failed: {}", e));
            Err(e.into())
        }
    }
}

/// Applies the retry policy to a command and resumes processing from the
/// status it lands on.
///
/// Returns `Ok(false)` when the policy decided the retry was a no-op.
pub async fn retry_command<T: Transcriber, C: TaskConnector>(
    queue: &mut CommandQueue,
    transcriber: &T,
    connector: &C,
    policy: &BackoffPolicy,
    id: &str,
) -> Result<bool> {
    if !queue.retry_command(id)? {
        return Ok(false);
    }

    let status = queue
        .get(id)
        .ok_or_else(|| anyhow!("Unknown command: {}", id))?
        .status;

    match status {
        CommandStatus::Transcribing => {
            transcribe_and_queue(queue, transcriber, policy, id).await?;
            submit_command(queue, connector, policy, id).await?;
        }
        CommandStatus::Queued => {
            submit_command(queue, connector, policy, id).await?;
        }
        // Back in the review gate: nothing to do until a human acts
        CommandStatus::ManualReview => {}
        other => {
            tracing::debug!("Retry left command {} in {:?}", id, other);
        }
    }

    Ok(true)
}

/// Completes the remote task behind a command, through the retry executor.
pub async fn complete_remote_task<C: TaskConnector>(
    connector: &C,
    policy: &BackoffPolicy,
    key: &str,
) -> Result<()> {
    retry_transport(policy, |_| connector.complete_task(key))
        .await
        .map_err(Into::into)
}

/// Deletes the remote task behind a command, through the retry executor.
pub async fn delete_remote_task<C: TaskConnector>(
    connector: &C,
    policy: &BackoffPolicy,
    key: &str,
) -> Result<()> {
    retry_transport(policy, |_| connector.delete_task(key))
        .await
        .map_err(Into::into)
}

/// Deletes a command and its media files.
///
/// File references are captured before the store deletion and the files
/// are touched only after it succeeds, so the database never points at
/// deleted files. Returns the number of media files removed.
pub fn delete_command(
    queue: &mut CommandQueue,
    media: &MediaStore,
    id: &str,
) -> Result<u64, QueueError> {
    let Some(removed) = queue.remove_command(id)? else {
        return Ok(0);
    };

    Ok(media.delete_media(&removed))
}

/// Flags a command as failed with a human-readable reason.
///
/// A failure is never silently dropped: if even the flag writes fail, the
/// store error is logged at error level.
fn record_failure(queue: &mut CommandQueue, id: &str, message: &str) {
    tracing::warn!("Dispatch: command {} failed: {}", id, message);

    if let Err(e) = queue.update_failed(id, true) {
        tracing::error!("Failed to flag command {} as failed: {}", id, e);
        return;
    }
    if let Err(e) = queue.update_error_message(id, Some(message.to_string())) {
        tracing::error!("Failed to record error message on command {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandRecord;
    use crate::database::CommandStore;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Transcriber that fails with a transport error `failures` times
    /// before succeeding.
    struct FlakyTranscriber {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyTranscriber {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, _audio_path: &Path) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(anyhow!(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "transcription timeout"
                )))
            } else {
                Ok("Buy milk tomorrow".to_string())
            }
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        fail_creates: u32,
        creates: AtomicU32,
    }

    impl TaskConnector for RecordingConnector {
        async fn create_task(&self, _key: &str, _title: &str) -> Result<()> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_creates {
                Err(anyhow!(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connector unreachable"
                )))
            } else {
                Ok(())
            }
        }

        async fn complete_task(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_task(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn queue() -> CommandQueue {
        CommandQueue::load(Arc::new(CommandStore::open_in_memory().unwrap()))
    }

    fn reviewed_voice_command(q: &mut CommandQueue) -> String {
        let cmd = CommandRecord::new_voice("a.m4a");
        let id = cmd.id.clone();
        q.add_command(cmd).unwrap();
        q.update_status(&id, CommandStatus::ManualReview).unwrap();
        id
    }

    #[tokio::test]
    async fn test_voice_command_full_pipeline() {
        let mut q = queue();
        let id = reviewed_voice_command(&mut q);
        let transcriber = FlakyTranscriber::new(0);
        let connector = RecordingConnector::default();
        let policy = fast_policy();

        process_voice_command(&mut q, &transcriber, &policy, &id)
            .await
            .unwrap();
        let record = q.get(&id).unwrap();
        assert_eq!(record.status, CommandStatus::Queued);
        assert_eq!(record.transcription.as_deref(), Some("Buy milk tomorrow"));

        submit_command(&mut q, &connector, &policy, &id).await.unwrap();
        assert_eq!(q.get(&id).unwrap().status, CommandStatus::Completed);
        assert_eq!(connector.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_transcription_failures_retried() {
        let mut q = queue();
        let id = reviewed_voice_command(&mut q);
        let transcriber = FlakyTranscriber::new(2);

        process_voice_command(&mut q, &transcriber, &fast_policy(), &id)
            .await
            .unwrap();

        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 3);
        assert_eq!(q.get(&id).unwrap().status, CommandStatus::Queued);
    }

    #[tokio::test]
    async fn test_exhausted_transcription_flags_command() {
        let mut q = queue();
        let id = reviewed_voice_command(&mut q);
        let transcriber = FlakyTranscriber::new(10);

        let result = process_voice_command(&mut q, &transcriber, &fast_policy(), &id).await;
        assert!(result.is_err());

        let record = q.get(&id).unwrap();
        assert_eq!(record.status, CommandStatus::Transcribing);
        assert!(record.failed);
        assert!(record
            .error_message
            .as_deref()
            .unwrap()
            .contains("Transcription failed"));
        assert!(q.needs_review().iter().any(|c| c.id == id));
    }

    #[tokio::test]
    async fn test_failed_dispatch_retried_through_policy() {
        let mut q = queue();
        let cmd = CommandRecord::new_text("Buy milk");
        let id = cmd.id.clone();
        q.add_command(cmd).unwrap();

        // Connector down for the whole first budget
        let connector = RecordingConnector {
            fail_creates: 3,
            creates: AtomicU32::new(0),
        };
        let transcriber = FlakyTranscriber::new(0);
        let policy = fast_policy();

        let result = submit_command(&mut q, &connector, &policy, &id).await;
        assert!(result.is_err());
        let record = q.get(&id).unwrap();
        assert_eq!(record.status, CommandStatus::Processing);
        assert!(record.failed);

        // User retry: back to queued, then dispatched successfully
        let resumed = retry_command(&mut q, &transcriber, &connector, &policy, &id)
            .await
            .unwrap();
        assert!(resumed);
        assert_eq!(q.get(&id).unwrap().status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_retry_noop_for_completed_command() {
        let mut q = queue();
        let cmd = CommandRecord::new_text("Buy milk");
        let id = cmd.id.clone();
        q.add_command(cmd).unwrap();
        let connector = RecordingConnector::default();
        let transcriber = FlakyTranscriber::new(0);
        let policy = fast_policy();

        submit_command(&mut q, &connector, &policy, &id).await.unwrap();

        let resumed = retry_command(&mut q, &transcriber, &connector, &policy, &id)
            .await
            .unwrap();
        assert!(!resumed);
        assert_eq!(q.get(&id).unwrap().status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_command_removes_media_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let media = MediaStore::new(dir.path());
        media.ensure_dirs().unwrap();

        let mut q = queue();
        let mut cmd = CommandRecord::new_voice("a.m4a");
        cmd.photo_paths = vec!["p1.jpg".to_string(), "p2.jpg".to_string()];
        let id = cmd.id.clone();
        q.add_command(cmd).unwrap();

        std::fs::write(media.recording_path("a.m4a"), b"audio").unwrap();
        for name in ["p1.jpg", "p2.jpg"] {
            std::fs::write(media.photo_path(name), b"photo").unwrap();
            std::fs::write(media.thumbnail_path(name), b"thumb").unwrap();
        }

        let deleted = delete_command(&mut q, &media, &id).unwrap();
        assert_eq!(deleted, 5);
        assert!(q.get(&id).is_none());

        // Deleting again after everything is gone is a quiet no-op
        assert_eq!(delete_command(&mut q, &media, &id).unwrap(), 0);
    }
}
