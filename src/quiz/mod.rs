pub mod ai_helper;
pub mod extract;
pub mod session;

use std::collections::HashSet;
use std::fmt;

use crate::error::{QuizError, Result};

/// Every question carries exactly this many options.
pub const OPTIONS_PER_QUESTION: usize = 4;

/// A trimmed, non-empty quiz topic.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Topic(String);

impl Topic {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QuizError::EmptyTopic);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Quiz {
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }
}

/// One multiple-choice question. The field names match the JSON the model is
/// asked to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl Question {
    /// Checks the shape the rest of the bot relies on: four distinct options,
    /// one of which is the answer.
    pub fn validate(&self) -> Result<()> {
        if self.options.len() != OPTIONS_PER_QUESTION {
            return Err(QuizError::InvalidResponseFormat(format!(
                "question {:?} has {} options, expected {}",
                self.text,
                self.options.len(),
                OPTIONS_PER_QUESTION
            )));
        }

        let distinct: HashSet<&str> = self.options.iter().map(String::as_str).collect();
        if distinct.len() != self.options.len() {
            return Err(QuizError::InvalidResponseFormat(format!(
                "question {:?} repeats an option",
                self.text
            )));
        }

        if !self.has_option(&self.answer) {
            return Err(QuizError::InvalidResponseFormat(format!(
                "answer {:?} of question {:?} is not among its options",
                self.answer, self.text
            )));
        }

        Ok(())
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    pub fn is_correct(&self, option: &str) -> bool {
        self.answer == option
    }
}
