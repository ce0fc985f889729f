//! Shared application state.

use crate::config::Config;
use crate::ollama::OllamaClient;

/// Shared application state passed to all handlers.
pub struct AppState {
    pub config: Config,
    pub ollama: OllamaClient,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let ollama = OllamaClient::new(&config.ollama);
        Self { config, ollama }
    }
}
