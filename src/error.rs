pub type Result<T> = std::result::Result<T, QuizError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("Topic is empty")]
    EmptyTopic,

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid response format: {0}")]
    InvalidResponseFormat(String),
}

impl QuizError {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QuizError::EmptyTopic => "EmptyTopic",
            QuizError::GenerationFailed(_) => "GenerationFailed",
            QuizError::InvalidResponseFormat(_) => "InvalidResponseFormat",
        }
    }
}

impl From<chatgpt::err::Error> for QuizError {
    fn from(err: chatgpt::err::Error) -> Self {
        QuizError::GenerationFailed(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
