use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlerterError {
    #[error("Sink request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Sink '{sink}' returned an error: {message}")]
    ApiError { sink: &'static str, message: String },
}
