pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`vus` must be a positive integer")]
    InvalidVus,

    #[error("`iterations` must be a positive integer")]
    InvalidIterations,

    #[error("`stages` must be a non-empty list of {{ target, duration }} with a non-zero total duration")]
    InvalidStages,

    #[error("`iterations` cannot be combined with a staged load shape")]
    IterationsWithStages,

    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    #[error("base url {url} is unreachable: {reason}")]
    BaseUrlUnreachable { url: String, reason: String },

    #[error("invalid threshold for metric `{metric}`: {reason}")]
    InvalidThreshold { metric: String, reason: String },
}
