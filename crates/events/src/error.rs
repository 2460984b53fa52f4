use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventsError {
    #[error("Failed to encode {kind} message: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
