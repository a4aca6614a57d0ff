//! Courier - command capture and routing core
//!
//! Takes a raw user command (voice or text), tracks it through the
//! capture pipeline (recorded -> manual review -> transcribing -> queued ->
//! processing -> completed), persists it durably, and retries failed
//! stages. The UI, the audio bridges, and the concrete task connectors
//! live outside this crate and reach it through the queue coordinator and
//! the dispatch traits.

use std::sync::Arc;

pub mod command;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod media;
pub mod net;
pub mod queue;

pub use command::{CommandRecord, CommandStatus};
pub use config::Config;
pub use database::CommandStore;
pub use media::MediaStore;
pub use net::BackoffPolicy;
pub use queue::CommandQueue;

/// Initialises the tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The application's composition root.
///
/// Owns the configuration, the store, the queue coordinator, and the media
/// store, and hands them to consumers by reference. Nothing in the crate
/// relies on ambient globals.
pub struct App {
    pub config: Config,
    pub store: Arc<CommandStore>,
    pub queue: CommandQueue,
    pub media: MediaStore,
}

impl App {
    /// Builds the application from the on-disk configuration.
    pub fn init() -> anyhow::Result<Self> {
        Self::with_config(Config::load()?)
    }

    /// Builds the application from an explicit configuration.
    pub fn with_config(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(CommandStore::open(&config.storage.database_path())?);
        let queue = CommandQueue::load_with_limit(store.clone(), config.display.recent_limit);

        let media = MediaStore::new(&config.storage.data_dir());
        media.ensure_dirs()?;

        tracing::info!("Courier initialised");
        Ok(Self {
            config,
            store,
            queue,
            media,
        })
    }

    /// The backoff policy external calls should run under.
    pub fn backoff(&self) -> BackoffPolicy {
        self.config.retry.backoff()
    }
}
