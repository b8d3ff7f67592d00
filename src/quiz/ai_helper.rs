use async_trait::async_trait;
use chatgpt::client::ChatGPT;
use chatgpt::config::ChatGPTEngine;
use chatgpt::types::CompletionResponse;
use log::{debug, info};

use crate::error::QuizError;
use crate::quiz::extract::extract_quiz;
use crate::quiz::{Quiz, Topic, OPTIONS_PER_QUESTION};

/// Anything that turns a prompt into free-form text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> Result<String, QuizError>;
}

#[async_trait]
impl TextGenerator for ChatGPT {
    async fn generate_text(&self, prompt: &str) -> Result<String, QuizError> {
        let response: CompletionResponse = self.send_message(prompt).await?;
        Ok(response.message().clone().content)
    }
}

pub struct QuizHelper {
    generator: Box<dyn TextGenerator>,
    question_count: usize,
}

impl QuizHelper {
    pub fn new(generator: impl TextGenerator + 'static, question_count: usize) -> Self {
        Self {
            generator: Box::new(generator),
            question_count,
        }
    }

    pub fn prompt_for(&self, topic: &Topic) -> String {
        format!(
            "Generate a quiz with {count} multiple choice questions about {topic}.
        Format the response as a JSON array where each question has:
        - question: string
        - options: array of {options} distinct strings
        - answer: string (the correct answer, copied verbatim from options)

        Example format:
        [
          {{
            \"question\": \"What is...?\",
            \"options\": [\"Option 1\", \"Option 2\", \"Option 3\", \"Option 4\"],
            \"answer\": \"Option 1\"
          }}
        ]",
            count = self.question_count,
            topic = topic,
            options = OPTIONS_PER_QUESTION,
        )
    }

    /// One request, one extraction. Provider failures come back as
    /// `GenerationFailed`, unusable text as `InvalidResponseFormat`.
    pub async fn generate_quiz(&self, topic: &Topic) -> Result<Quiz, QuizError> {
        info!("Generating quiz about {:?}", topic.as_str());
        let prompt = self.prompt_for(topic);
        debug!("Prompt: {:?}", prompt);

        let completion = self.generator.generate_text(&prompt).await?;
        debug!("Completion: {:?}", completion);

        extract_quiz(&completion)
    }
}

/// Chat models the bot can be pointed at.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Gpt35Turbo,
    Gpt4,
    Gpt4_32k,
}

impl Model {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "gpt-3.5-turbo" => Some(Model::Gpt35Turbo),
            "gpt-4" => Some(Model::Gpt4),
            "gpt-4-32k" => Some(Model::Gpt4_32k),
            _ => None,
        }
    }
}

impl From<Model> for ChatGPTEngine {
    fn from(model: Model) -> Self {
        match model {
            Model::Gpt35Turbo => ChatGPTEngine::Gpt35Turbo,
            Model::Gpt4 => ChatGPTEngine::Gpt4,
            Model::Gpt4_32k => ChatGPTEngine::Gpt4_32k,
        }
    }
}
