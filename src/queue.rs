//! Queue coordinator.
//!
//! The single in-memory source of truth for command consumers. Every
//! mutation validates first, writes the store, and only then updates the
//! in-memory set and notifies observers, so a failed store write never
//! leaves memory out of sync and no caller can write an invalid state
//! directly.

use std::sync::Arc;

use serde::Serialize;

use crate::command::retry::retry_plan;
use crate::command::transition::{check_transition, TransitionError};
use crate::command::{CommandRecord, CommandStatus, ValidationError};
use crate::database::{CommandStore, FieldUpdate, StoreError};

/// Display views are capped to bound memory and render cost.
pub const DEFAULT_RECENT_LIMIT: usize = 30;

/// Queue error types.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A mutation notification delivered to observers, once per mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    CommandAdded { id: String },
    StatusChanged { id: String, status: CommandStatus },
    CommandUpdated { id: String },
    CommandRetried { id: String, status: CommandStatus },
    CommandRemoved { id: String },
}

/// File references captured from a record before its deletion, for the
/// caller to clean up once the store delete has succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedMedia {
    pub audio_path: Option<String>,
    pub photo_paths: Vec<String>,
}

/// Aggregate counts over the full (uncapped) command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub total: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub needs_review: usize,
}

type Observer = Box<dyn Fn(&QueueEvent) + Send + Sync>;

/// In-memory reflection of the command store.
pub struct CommandQueue {
    store: Arc<CommandStore>,
    commands: Vec<CommandRecord>,
    observers: Vec<Observer>,
    recent_limit: usize,
}

impl CommandQueue {
    /// Loads the full record set from the store.
    ///
    /// A load failure leaves the queue empty rather than propagating: the
    /// app stays usable, degraded, and the store error is logged.
    pub fn load(store: Arc<CommandStore>) -> Self {
        Self::load_with_limit(store, DEFAULT_RECENT_LIMIT)
    }

    /// [`load`](Self::load) with a custom display cap.
    pub fn load_with_limit(store: Arc<CommandStore>, recent_limit: usize) -> Self {
        let commands = match store.get_all() {
            Ok(records) => {
                tracing::info!("Loaded {} command(s) from the store", records.len());
                records
            }
            Err(e) => {
                tracing::warn!("Failed to load commands, starting empty: {}", e);
                Vec::new()
            }
        };

        Self {
            store,
            commands,
            observers: Vec::new(),
            recent_limit,
        }
    }

    /// Registers an observer called once per successful mutation.
    pub fn subscribe(&mut self, observer: impl Fn(&QueueEvent) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&self, event: QueueEvent) {
        tracing::debug!("Queue event: {:?}", event);
        for observer in &self.observers {
            observer(&event);
        }
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Looks up a single command by id.
    pub fn get(&self, id: &str) -> Option<&CommandRecord> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// All commands, newest first, capped for display.
    pub fn all(&self) -> Vec<CommandRecord> {
        self.view(|_| true)
    }

    /// Commands currently moving through the pipeline: not completed, not
    /// waiting on review, and not flagged.
    pub fn processing(&self) -> Vec<CommandRecord> {
        self.view(|c| {
            !matches!(
                c.status,
                CommandStatus::Completed | CommandStatus::ManualReview
            ) && !c.failed
                && !c.action_needed
        })
    }

    /// Completed commands.
    pub fn completed(&self) -> Vec<CommandRecord> {
        self.view(|c| c.status == CommandStatus::Completed)
    }

    /// Commands whose last operation failed.
    pub fn failed(&self) -> Vec<CommandRecord> {
        self.view(|c| c.failed)
    }

    /// Commands requiring human attention: failed, flagged, or sitting in
    /// the review gate.
    pub fn needs_review(&self) -> Vec<CommandRecord> {
        self.view(|c| c.failed || c.action_needed || c.status == CommandStatus::ManualReview)
    }

    /// Aggregate counts over the full set; the display cap does not apply.
    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            total: self.commands.len(),
            processing: self
                .commands
                .iter()
                .filter(|c| {
                    !matches!(
                        c.status,
                        CommandStatus::Completed | CommandStatus::ManualReview
                    ) && !c.failed
                        && !c.action_needed
                })
                .count(),
            completed: self
                .commands
                .iter()
                .filter(|c| c.status == CommandStatus::Completed)
                .count(),
            failed: self.commands.iter().filter(|c| c.failed).count(),
            needs_review: self
                .commands
                .iter()
                .filter(|c| {
                    c.failed || c.action_needed || c.status == CommandStatus::ManualReview
                })
                .count(),
        }
    }

    fn view(&self, filter: impl Fn(&CommandRecord) -> bool) -> Vec<CommandRecord> {
        let mut records: Vec<CommandRecord> =
            self.commands.iter().filter(|c| filter(c)).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(self.recent_limit);
        records
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Adds a fully formed command produced by the capture layer.
    pub fn add_command(&mut self, record: CommandRecord) -> Result<(), QueueError> {
        record.validate()?;
        self.store.add(&record)?;

        let id = record.id.clone();
        self.commands.push(record);
        self.notify(QueueEvent::CommandAdded { id });
        Ok(())
    }

    /// Moves a command to `to`, enforcing the legal transition table.
    ///
    /// The transition is checked against the in-memory status before any
    /// store write, so an illegal request never reaches the database.
    pub fn update_status(&mut self, id: &str, to: CommandStatus) -> Result<(), QueueError> {
        let from = self
            .get(id)
            .map(|c| c.status)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        check_transition(from, to)?;

        self.store.update_field(id, FieldUpdate::Status(to))?;
        self.set_in_memory(id, |c| c.status = to);
        self.notify(QueueEvent::StatusChanged {
            id: id.to_string(),
            status: to,
        });
        Ok(())
    }

    /// Records a successful transcription.
    pub fn update_transcription(
        &mut self,
        id: &str,
        transcription: Option<String>,
    ) -> Result<(), QueueError> {
        self.store
            .update_field(id, FieldUpdate::Transcription(transcription.clone()))?;
        self.set_in_memory(id, |c| c.transcription = transcription.clone());
        self.notify(QueueEvent::CommandUpdated { id: id.to_string() });
        Ok(())
    }

    /// Sets or clears the failed flag.
    pub fn update_failed(&mut self, id: &str, failed: bool) -> Result<(), QueueError> {
        self.store.update_field(id, FieldUpdate::Failed(failed))?;
        self.set_in_memory(id, |c| c.failed = failed);
        self.notify(QueueEvent::CommandUpdated { id: id.to_string() });
        Ok(())
    }

    /// Sets or clears the failure detail.
    pub fn update_error_message(
        &mut self,
        id: &str,
        message: Option<String>,
    ) -> Result<(), QueueError> {
        self.store
            .update_field(id, FieldUpdate::ErrorMessage(message.clone()))?;
        self.set_in_memory(id, |c| c.error_message = message.clone());
        self.notify(QueueEvent::CommandUpdated { id: id.to_string() });
        Ok(())
    }

    /// Sets or clears the action-needed flag.
    pub fn update_action_needed(&mut self, id: &str, action_needed: bool) -> Result<(), QueueError> {
        self.store
            .update_field(id, FieldUpdate::ActionNeeded(action_needed))?;
        self.set_in_memory(id, |c| c.action_needed = action_needed);
        self.notify(QueueEvent::CommandUpdated { id: id.to_string() });
        Ok(())
    }

    /// Removes a command, returning the file references it held so the
    /// caller can clean them up after the store delete has succeeded.
    ///
    /// Tolerates an id that is already gone (a concurrent deletion): the
    /// in-memory list is filtered defensively before the store is touched,
    /// and a store-side miss is not an error.
    pub fn remove_command(&mut self, id: &str) -> Result<Option<RemovedMedia>, QueueError> {
        // Capture file references before the record object goes away.
        let captured = self.get(id).map(|c| RemovedMedia {
            audio_path: c.audio_path.clone(),
            photo_paths: c.photo_paths.clone(),
        });

        let removed_from_store = self.store.remove(id)?;
        self.commands.retain(|c| c.id != id);

        if captured.is_some() || removed_from_store {
            self.notify(QueueEvent::CommandRemoved { id: id.to_string() });
        }
        Ok(captured)
    }

    /// Applies the retry policy to a command on explicit user retry.
    ///
    /// Returns `Ok(false)` when the policy decides retrying is a no-op for
    /// the command's state. The status write lands before the flag clears,
    /// so an interrupted retry leaves the flags conservative (still set).
    pub fn retry_command(&mut self, id: &str) -> Result<bool, QueueError> {
        let (status, failed) = self
            .get(id)
            .map(|c| (c.status, c.failed))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let Some(plan) = retry_plan(status, failed) else {
            tracing::debug!("Retry is a no-op for command {} ({:?})", id, status);
            return Ok(false);
        };

        if plan.next_status != status {
            self.store
                .update_field(id, FieldUpdate::Status(plan.next_status))?;
        }
        if plan.clear_failure {
            self.store.update_field(id, FieldUpdate::Failed(false))?;
            self.store.update_field(id, FieldUpdate::ErrorMessage(None))?;
        }

        self.set_in_memory(id, |c| {
            c.status = plan.next_status;
            if plan.clear_failure {
                c.failed = false;
                c.error_message = None;
            }
        });

        tracing::info!("Retried command {}: {:?} -> {:?}", id, status, plan.next_status);
        self.notify(QueueEvent::CommandRetried {
            id: id.to_string(),
            status: plan.next_status,
        });
        Ok(true)
    }

    fn set_in_memory(&mut self, id: &str, apply: impl Fn(&mut CommandRecord)) {
        if let Some(record) = self.commands.iter_mut().find(|c| c.id == id) {
            apply(record);
        }
    }
}
