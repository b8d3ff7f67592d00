use std::time::Duration;

use chatgpt::config::{
    ModelConfiguration, ModelConfigurationBuilder, ModelConfigurationBuilderError,
};

use crate::error::ConfigError;
use crate::quiz::ai_helper::Model;

const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_QUESTION_COUNT: usize = 5;
const MAX_QUESTION_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub chatgpt_api_key: String,
    pub model: Model,
    pub timeout: Duration,
    pub question_count: usize,
    /// Sqlite file for chat sessions; in-memory when unset.
    pub session_db: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let chatgpt_api_key =
            get("CHATGPT_API_KEY").ok_or(ConfigError::Missing("CHATGPT_API_KEY"))?;

        let model = match get("QUIZ_MODEL") {
            Some(value) => Model::parse(&value).ok_or_else(|| ConfigError::Invalid {
                name: "QUIZ_MODEL",
                value: value.clone(),
                reason: "expected gpt-3.5-turbo, gpt-4 or gpt-4-32k".to_string(),
            })?,
            None => Model::Gpt35Turbo,
        };

        let timeout_secs = match get("QUIZ_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "QUIZ_TIMEOUT_SECS",
                        value,
                        reason: "expected a positive number of seconds".to_string(),
                    })
                }
            },
            None => DEFAULT_TIMEOUT_SECS,
        };

        let question_count = match get("QUIZ_QUESTION_COUNT") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(count) if (1..=MAX_QUESTION_COUNT).contains(&count) => count,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "QUIZ_QUESTION_COUNT",
                        value,
                        reason: format!("expected a number from 1 to {}", MAX_QUESTION_COUNT),
                    })
                }
            },
            None => DEFAULT_QUESTION_COUNT,
        };

        Ok(Self {
            chatgpt_api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
            question_count,
            session_db: get("QUIZ_SESSION_DB"),
        })
    }

    /// Model settings for the chat client. The timeout only takes effect when
    /// passed to `ChatGPT::new_with_config`, which builds the HTTP client.
    pub fn model_configuration(
        &self,
    ) -> Result<ModelConfiguration, ModelConfigurationBuilderError> {
        ModelConfigurationBuilder::default()
            .engine(self.model)
            .timeout(self.timeout)
            .build()
    }
}
