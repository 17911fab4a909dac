#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error("config error: {0}")]
    Config(String),

    #[error("subscriber error: {0}")]
    Subscriber(#[from] push_subscriber::Error),

    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ListenResult<T> = Result<T, ListenError>;
