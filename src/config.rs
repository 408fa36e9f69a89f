use crate::bot::BotConfig;
use crate::llm::LlmConfig;
use std::net::SocketAddr;

pub const DEFAULT_PORT: u16 = 5000;

/// Process configuration, read once at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub llm: LlmConfig,
    pub bot: BotConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let llm = LlmConfig::default();
        let bot = BotConfig {
            reply_timeout: llm.default_timeout,
            max_tokens: llm.default_max_tokens,
            ..BotConfig::default()
        };
        Self {
            port: DEFAULT_PORT,
            llm,
            bot,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let llm = LlmConfig::from_env();
        let bot = BotConfig::from_env(&llm);

        Self { port, llm, bot }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
