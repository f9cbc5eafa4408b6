/// Errors surfaced by session wiring and session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] common::Error),

    #[error(transparent)]
    Api(#[from] console_api::Error),

    #[error(transparent)]
    Notify(#[from] console_notify::Error),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, Error>;
