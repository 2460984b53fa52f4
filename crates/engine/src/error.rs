use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] configuration::ConfigError),

    #[error("Market data error: {0}")]
    ApiClient(#[from] api_client::ApiError),

    #[error("Playback error: {0}")]
    Playback(#[from] api_client::PlaybackError),

    #[error("Signal pipeline error: {0}")]
    Signal(#[from] signals::SignalError),
}
