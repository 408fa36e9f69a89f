mod presence;
mod rooms;

pub use presence::{PresenceDirectory, PresenceError};

use crate::bot::{BotConfig, BotPipeline};
use crate::broadcast::RoomBroadcaster;
use crate::llm::LlmManager;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Errors surfaced to a client through its acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error("User not found")]
    UserNotFound,
}

/// Shared application state
pub struct AppState {
    pub directory: PresenceDirectory,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub bot: BotPipeline,
    /// Serializes join/leave sequences so directory changes, subscriptions
    /// and roster pushes happen in one total order
    membership: Mutex<()>,
}

impl AppState {
    /// State without LLM providers; generative replies fall back to the apology
    pub fn new() -> Self {
        Self::new_with_llm(None, BotConfig::default())
    }

    pub fn new_with_llm(llm: Option<LlmManager>, bot_config: BotConfig) -> Self {
        let broadcaster = Arc::new(RoomBroadcaster::new());
        let bot = BotPipeline::new(broadcaster.clone(), llm.map(Arc::new), bot_config);
        Self::with_bot(broadcaster, bot)
    }

    /// Build around an existing pipeline; `bot` must deliver through `broadcaster`
    pub fn with_bot(broadcaster: Arc<RoomBroadcaster>, bot: BotPipeline) -> Self {
        Self {
            directory: PresenceDirectory::new(),
            broadcaster,
            bot,
            membership: Mutex::new(()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
