//! Pulls the quiz JSON array out of a free-form model completion.
//!
//! Models wrap the array in prose or code fences, and sometimes echo the
//! example from the prompt before the real payload. The widest `[...]` span is
//! tried first; if it does not hold a valid quiz, every balanced bracketed span
//! is tried in order of its opening bracket.

use log::{debug, warn};

use crate::error::{QuizError, Result};
use crate::quiz::{Question, Quiz};

pub fn extract_quiz(text: &str) -> Result<Quiz> {
    let mut first_error = None;

    for candidate in candidates(text) {
        match parse_candidate(candidate) {
            Ok(quiz) => {
                debug!("Extracted {} questions", quiz.len());
                return Ok(quiz);
            }
            Err(err) => {
                warn!("Rejected quiz candidate: {}", err);
                first_error.get_or_insert(err);
            }
        }
    }

    Err(first_error.unwrap_or_else(|| {
        QuizError::InvalidResponseFormat("no JSON array in response".to_string())
    }))
}

fn parse_candidate(candidate: &str) -> Result<Quiz> {
    let questions: Vec<Question> = serde_json::from_str(candidate)
        .map_err(|err| QuizError::InvalidResponseFormat(err.to_string()))?;

    let quiz = Quiz::new(questions);
    if quiz.is_empty() {
        return Err(QuizError::InvalidResponseFormat(
            "quiz array is empty".to_string(),
        ));
    }
    for question in &quiz.questions {
        question.validate()?;
    }

    Ok(quiz)
}

/// Widest span first, then each balanced span left to right.
fn candidates(text: &str) -> impl Iterator<Item = &str> {
    let widest = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
        _ => None,
    };

    let balanced = text
        .char_indices()
        .filter(|(_, c)| *c == '[')
        .filter_map(move |(start, _)| balanced_end(text, start).map(|end| &text[start..=end]))
        .filter(move |span| Some(*span) != widest);

    widest.into_iter().chain(balanced)
}

/// Byte index of the `]` closing the `[` at `start`. Brackets inside JSON
/// string literals do not count.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}
