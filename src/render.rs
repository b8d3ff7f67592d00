//! Chat rendition of a quiz round: the message text and its inline keyboard,
//! and the callback data the keyboard sends back.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::utils::html;

use crate::quiz::session::{OptionMark, QuizRound, RequestToken};

pub const CHECK_ANSWERS: &str = "Check answers";

/// What a keyboard button asks for. Indices keep the payload inside
/// Telegram's 64-byte callback data limit whatever the option text is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pick {
        token: RequestToken,
        question: usize,
        option: usize,
    },
    Reveal {
        token: RequestToken,
    },
}

impl Action {
    pub fn token(&self) -> RequestToken {
        match self {
            Action::Pick { token, .. } | Action::Reveal { token } => *token,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Action::Pick {
                token,
                question,
                option,
            } => format!("pick:{}:{}:{}", token, question, option),
            Action::Reveal { token } => format!("reveal:{}", token),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let mut parts = data.split(':');
        let action = match parts.next()? {
            "pick" => Action::Pick {
                token: parts.next()?.parse().ok()?,
                question: parts.next()?.parse().ok()?,
                option: parts.next()?.parse().ok()?,
            },
            "reveal" => Action::Reveal {
                token: parts.next()?.parse().ok()?,
            },
            _ => return None,
        };
        match parts.next() {
            Some(_) => None,
            None => Some(action),
        }
    }
}

fn option_letter(index: usize) -> char {
    (b'A' + index as u8) as char
}

fn mark_prefix(mark: OptionMark) -> &'static str {
    match mark {
        OptionMark::None => "",
        OptionMark::Selected => "🔘 ",
        OptionMark::Correct => "✅ ",
        OptionMark::Incorrect => "❌ ",
    }
}

/// Telegram's cap on message text, in UTF-16 code units.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Per-item character limits tried in turn when the full text is too long.
const CLIP_LIMITS: [usize; 6] = [240, 160, 100, 60, 40, 20];

/// HTML message body. Model text is escaped, and clipped when the whole quiz
/// would not fit in one message.
pub fn quiz_text(round: &QuizRound) -> String {
    let full = render_quiz_text(round, None);
    if fits(&full) {
        return full;
    }

    let mut clipped = full;
    for limit in CLIP_LIMITS {
        clipped = render_quiz_text(round, Some(limit));
        if fits(&clipped) {
            break;
        }
    }
    clipped
}

/// Length as Telegram counts it. Markup and entities are counted too, so the
/// estimate errs long.
pub fn fits(text: &str) -> bool {
    text.encode_utf16().count() <= MAX_MESSAGE_LEN
}

fn clip(text: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if text.chars().count() > limit => {
            let mut clipped: String = text.chars().take(limit.saturating_sub(1)).collect();
            clipped.push('…');
            clipped
        }
        _ => text.to_string(),
    }
}

fn render_quiz_text(round: &QuizRound, limit: Option<usize>) -> String {
    let mut text = format!(
        "<b>Quiz on {}</b>",
        html::escape(&clip(round.topic().as_str(), limit))
    );
    if let Some(score) = round.score_line() {
        text.push_str(&format!("\nScore: {}", score));
    }

    for (i, question) in round.quiz().questions.iter().enumerate() {
        text.push_str(&format!(
            "\n\n<b>{}. {}</b>",
            i + 1,
            html::escape(&clip(&question.text, limit))
        ));
        for (j, option) in question.options.iter().enumerate() {
            text.push_str(&format!(
                "\n{}{}) {}",
                mark_prefix(round.classify(i, option)),
                option_letter(j),
                html::escape(&clip(option, limit))
            ));
        }
    }

    text
}

/// One row of option buttons per question, plus the reveal button once every
/// question is answered. Empty after reveal.
pub fn quiz_keyboard(round: &QuizRound) -> InlineKeyboardMarkup {
    if round.is_revealed() {
        return InlineKeyboardMarkup::default();
    }

    let token = round.token();
    let mut rows: Vec<Vec<InlineKeyboardButton>> = round
        .quiz()
        .questions
        .iter()
        .enumerate()
        .map(|(i, question)| {
            question
                .options
                .iter()
                .enumerate()
                .map(|(j, option)| {
                    let label = format!(
                        "{}{}{}",
                        mark_prefix(round.classify(i, option)),
                        i + 1,
                        option_letter(j)
                    );
                    let action = Action::Pick {
                        token,
                        question: i,
                        option: j,
                    };
                    InlineKeyboardButton::callback(label, action.encode())
                })
                .collect()
        })
        .collect();

    if round.all_answered() {
        rows.push(vec![InlineKeyboardButton::callback(
            CHECK_ANSWERS,
            Action::Reveal { token }.encode(),
        )]);
    }

    InlineKeyboardMarkup::new(rows)
}
