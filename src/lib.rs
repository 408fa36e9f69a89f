// Public API for integration tests and potential library usage

pub mod api;
pub mod bot;
pub mod broadcast;
pub mod config;
pub mod llm;
pub mod protocol;
pub mod state;
pub mod types;
pub mod ws;
