use std::collections::BTreeMap;

use log::{debug, error, info};

use crate::error::QuizError;
#[cfg(test)]
use crate::quiz::ai_helper::QuizHelper;
use crate::quiz::{Quiz, Topic};

/// Identifies one generation request. Tokens only grow, so a completion
/// carrying an older token than the one in `Loading` is stale.
pub type RequestToken = u64;

/// The only failure text users ever see.
pub const GENERIC_ERROR_MESSAGE: &str = "Failed to generate quiz. Please try again.";

/// How an option should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionMark {
    None,
    Selected,
    Correct,
    Incorrect,
}

/// A generated quiz together with the user's answers to it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuizRound {
    token: RequestToken,
    topic: Topic,
    quiz: Quiz,
    selections: BTreeMap<usize, String>,
    revealed: bool,
    score: Option<usize>,
}

impl QuizRound {
    pub fn new(token: RequestToken, topic: Topic, quiz: Quiz) -> Self {
        Self {
            token,
            topic,
            quiz,
            selections: BTreeMap::new(),
            revealed: false,
            score: None,
        }
    }

    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    pub fn selection(&self, question_index: usize) -> Option<&str> {
        self.selections.get(&question_index).map(String::as_str)
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn score(&self) -> Option<usize> {
        self.score
    }

    pub fn all_answered(&self) -> bool {
        (0..self.quiz.len()).all(|i| self.selections.contains_key(&i))
    }

    /// Records `option` as the answer to a question. Ignored once revealed,
    /// and for indices or options the quiz does not have. Returns whether the
    /// selection changed.
    pub fn select_option(&mut self, question_index: usize, option: &str) -> bool {
        if self.revealed {
            return false;
        }
        match self.quiz.question(question_index) {
            Some(question) if question.has_option(option) => {}
            _ => return false,
        }
        if self.selection(question_index) == Some(option) {
            return false;
        }

        self.selections.insert(question_index, option.to_string());
        true
    }

    /// Freezes the selections and counts exact matches. Unanswered questions
    /// count as wrong. Later calls return the first score.
    pub fn reveal(&mut self) -> usize {
        if let Some(score) = self.score {
            return score;
        }

        let score = self
            .quiz
            .questions
            .iter()
            .enumerate()
            .filter(|(i, q)| self.selection(*i).map_or(false, |s| q.is_correct(s)))
            .count();

        self.revealed = true;
        self.score = Some(score);
        score
    }

    pub fn classify(&self, question_index: usize, option: &str) -> OptionMark {
        let selected = self.selection(question_index) == Some(option);

        if !self.revealed {
            return if selected {
                OptionMark::Selected
            } else {
                OptionMark::None
            };
        }

        let Some(question) = self.quiz.question(question_index) else {
            return OptionMark::None;
        };
        if question.is_correct(option) {
            OptionMark::Correct
        } else if selected {
            OptionMark::Incorrect
        } else {
            OptionMark::None
        }
    }

    /// `"<correct>/<total>"`, once revealed.
    pub fn score_line(&self) -> Option<String> {
        self.score()
            .map(|score| format!("{}/{}", score, self.quiz.len()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Loading {
        token: RequestToken,
        topic: Topic,
    },
    Error {
        message: String,
    },
    Ready(QuizRound),
}

/// One chat's quiz session. Every operation is defined in every state;
/// the ones that do not apply are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    last_token: RequestToken,
    state: SessionState,
}

impl Session {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn round(&self) -> Option<&QuizRound> {
        match &self.state {
            SessionState::Ready(round) => Some(round),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, SessionState::Loading { .. })
    }

    /// Whether `token` names the quiz currently on screen.
    pub fn is_current(&self, token: RequestToken) -> bool {
        self.round().map_or(false, |round| round.token() == token)
    }

    /// Drops whatever the session held and enters `Loading`. Any request
    /// still in flight becomes stale.
    pub fn begin_generation(&mut self, topic: Topic) -> RequestToken {
        self.last_token += 1;
        self.state = SessionState::Loading {
            token: self.last_token,
            topic,
        };
        self.last_token
    }

    /// Applies the outcome of request `token`. Returns `false`, changing
    /// nothing, when that request has been superseded.
    pub fn finish_generation(
        &mut self,
        token: RequestToken,
        result: Result<Quiz, QuizError>,
    ) -> bool {
        let topic = match &self.state {
            SessionState::Loading {
                token: current,
                topic,
            } if *current == token => topic.clone(),
            _ => {
                debug!("Discarding result of stale request #{}", token);
                return false;
            }
        };

        self.state = match result {
            Ok(quiz) => {
                info!(
                    "Request #{} produced {} questions about {:?}",
                    token,
                    quiz.len(),
                    topic.as_str()
                );
                SessionState::Ready(QuizRound::new(token, topic, quiz))
            }
            Err(err) => {
                error!("Error generating quiz ({}): {}", err.kind(), err);
                SessionState::Error {
                    message: GENERIC_ERROR_MESSAGE.to_string(),
                }
            }
        };
        true
    }

    /// Replaces the round of request `token` with the generic error when it
    /// could not be shown to the user. Returns `false`, changing nothing, when
    /// that round is no longer current.
    pub fn fail_delivery(&mut self, token: RequestToken) -> bool {
        if !self.is_current(token) {
            debug!("Ignoring delivery failure of stale request #{}", token);
            return false;
        }

        self.state = SessionState::Error {
            message: GENERIC_ERROR_MESSAGE.to_string(),
        };
        true
    }

    /// Runs a whole generation in place: `Loading`, the request, then
    /// `Ready` or `Error`. The bot splits these steps around a spawned task.
    #[cfg(test)]
    pub async fn generate(&mut self, helper: &QuizHelper, topic: Topic) -> &SessionState {
        let token = self.begin_generation(topic.clone());
        let result = helper.generate_quiz(&topic).await;
        self.finish_generation(token, result);
        &self.state
    }

    /// Back to `Idle`. Tokens keep counting so in-flight results stay stale.
    pub fn reset(&mut self) {
        self.state = SessionState::Idle;
    }

    pub fn select_option(&mut self, question_index: usize, option: &str) -> bool {
        match &mut self.state {
            SessionState::Ready(round) => round.select_option(question_index, option),
            _ => false,
        }
    }

    pub fn reveal(&mut self) -> Option<usize> {
        match &mut self.state {
            SessionState::Ready(round) => Some(round.reveal()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::ai_helper::MockTextGenerator;
    use crate::quiz::tests::rome_quiz;

    const ROME_COMPLETION: &str = r#"Here is a quiz about Ancient Rome:
[{"question":"Capital?","options":["Rome","Paris","Cairo","Lima"],"answer":"Rome"},
 {"question":"First emperor?","options":["Nero","Augustus","Caligula","Trajan"],"answer":"Augustus"},
 {"question":"River?","options":["Nile","Seine","Tiber","Thames"],"answer":"Tiber"},
 {"question":"Language?","options":["Greek","Latin","Gaulish","Punic"],"answer":"Latin"},
 {"question":"Founded?","options":["753 BC","509 BC","27 BC","476 AD"],"answer":"753 BC"}]
Enjoy!"#;

    fn topic(name: &str) -> Topic {
        Topic::parse(name).unwrap()
    }

    fn ready_round() -> QuizRound {
        QuizRound::new(1, topic("Ancient Rome"), rome_quiz())
    }

    fn answer_all_but_first(round: &mut QuizRound) {
        for (i, answer) in ["Augustus", "Tiber", "Latin", "753 BC"].iter().enumerate() {
            assert!(round.select_option(i + 1, answer));
        }
    }

    fn helper_returning(text: &'static str) -> QuizHelper {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate_text()
            .returning(move |_| Ok(text.to_string()));
        QuizHelper::new(generator, 5)
    }

    #[tokio::test]
    async fn ancient_rome_becomes_ready() {
        let mut session = Session::default();
        let state = session
            .generate(&helper_returning(ROME_COMPLETION), topic("Ancient Rome"))
            .await;

        match state {
            SessionState::Ready(round) => {
                assert_eq!(round.quiz().len(), 5);
                assert_eq!(round.topic().as_str(), "Ancient Rome");
                assert_eq!(round.score(), None);
                assert!(!round.is_revealed());
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn provider_failure_then_recovery() {
        let mut failing = MockTextGenerator::new();
        failing
            .expect_generate_text()
            .returning(|_| Err(QuizError::GenerationFailed("503".to_string())));
        let failing = QuizHelper::new(failing, 5);

        let mut session = Session::default();
        session.generate(&failing, topic("Ancient Rome")).await;

        match session.state() {
            SessionState::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(session.round().is_none());

        session
            .generate(&helper_returning(ROME_COMPLETION), topic("Ancient Rome"))
            .await;
        assert_eq!(session.round().map(|r| r.quiz().len()), Some(5));
    }

    #[tokio::test]
    async fn invalid_format_surfaces_generic_message() {
        let mut session = Session::default();
        session
            .generate(&helper_returning("No quiz today."), topic("Ancient Rome"))
            .await;

        assert_eq!(
            session.state(),
            &SessionState::Error {
                message: GENERIC_ERROR_MESSAGE.to_string()
            }
        );
    }

    #[tokio::test]
    async fn new_generation_clears_previous_round() {
        let helper = helper_returning(ROME_COMPLETION);
        let mut session = Session::default();
        session.generate(&helper, topic("Ancient Rome")).await;
        session.select_option(0, "Rome");
        session.reveal();

        session.generate(&helper, topic("Ancient Rome")).await;
        let round = session.round().unwrap();
        assert_eq!(round.selection(0), None);
        assert!(!round.is_revealed());
        assert_eq!(round.score(), None);
    }

    #[test]
    fn begin_enters_loading() {
        let mut session = Session::default();
        assert_eq!(session.state(), &SessionState::Idle);

        let token = session.begin_generation(topic("Ancient Rome"));
        assert!(session.is_loading());
        assert_eq!(
            session.state(),
            &SessionState::Loading {
                token,
                topic: topic("Ancient Rome")
            }
        );
    }

    #[test]
    fn stale_result_is_discarded() {
        let mut session = Session::default();
        let first = session.begin_generation(topic("Ancient Rome"));
        let second = session.begin_generation(topic("Machine Learning"));
        assert!(second > first);

        assert!(!session.finish_generation(first, Ok(rome_quiz())));
        assert!(session.is_loading());

        assert!(session.finish_generation(second, Ok(rome_quiz())));
        let round = session.round().unwrap();
        assert_eq!(round.topic().as_str(), "Machine Learning");
        assert!(session.is_current(second));
        assert!(!session.is_current(first));
    }

    #[test]
    fn late_error_does_not_clobber_newer_quiz() {
        let mut session = Session::default();
        let first = session.begin_generation(topic("Ancient Rome"));
        let second = session.begin_generation(topic("Ancient Rome"));
        session.finish_generation(second, Ok(rome_quiz()));

        assert!(!session.finish_generation(
            first,
            Err(QuizError::GenerationFailed("timeout".to_string()))
        ));
        assert!(session.round().is_some());
    }

    #[test]
    fn undelivered_round_becomes_generic_error() {
        let mut session = Session::default();
        let token = session.begin_generation(topic("Ancient Rome"));
        session.finish_generation(token, Ok(rome_quiz()));

        assert!(session.fail_delivery(token));
        assert_eq!(
            session.state(),
            &SessionState::Error {
                message: GENERIC_ERROR_MESSAGE.to_string()
            }
        );
        assert!(session.round().is_none());

        let next = session.begin_generation(topic("Ancient Rome"));
        assert!(session.finish_generation(next, Ok(rome_quiz())));
        assert!(session.round().is_some());
    }

    #[test]
    fn delivery_failure_of_older_round_is_ignored() {
        let mut session = Session::default();
        let first = session.begin_generation(topic("Ancient Rome"));
        session.finish_generation(first, Ok(rome_quiz()));
        let second = session.begin_generation(topic("Machine Learning"));
        session.finish_generation(second, Ok(rome_quiz()));

        assert!(!session.fail_delivery(first));
        assert!(session.is_current(second));
    }

    #[test]
    fn reset_makes_in_flight_request_stale() {
        let mut session = Session::default();
        let token = session.begin_generation(topic("Ancient Rome"));
        session.reset();

        assert!(!session.finish_generation(token, Ok(rome_quiz())));
        assert_eq!(session.state(), &SessionState::Idle);

        let next = session.begin_generation(topic("Ancient Rome"));
        assert!(next > token);
    }

    #[test]
    fn one_wrong_answer_scores_four() {
        let mut round = ready_round();
        assert!(round.select_option(0, "Paris"));
        answer_all_but_first(&mut round);
        assert!(round.all_answered());

        assert_eq!(round.reveal(), 4);
        assert_eq!(round.score(), Some(4));
        assert_eq!(round.score_line().as_deref(), Some("4/5"));
        assert_eq!(round.classify(0, "Rome"), OptionMark::Correct);
        assert_eq!(round.classify(0, "Paris"), OptionMark::Incorrect);
        assert_eq!(round.classify(0, "Cairo"), OptionMark::None);
        assert_eq!(round.classify(1, "Augustus"), OptionMark::Correct);
    }

    #[test]
    fn reveal_is_idempotent() {
        let mut round = ready_round();
        round.select_option(0, "Rome");
        assert_eq!(round.reveal(), 1);

        assert!(!round.select_option(1, "Augustus"));
        assert_eq!(round.reveal(), 1);
        assert_eq!(round.score(), Some(1));
        assert_eq!(round.selection(1), None);
    }

    #[test]
    fn unanswered_questions_count_wrong() {
        let mut round = ready_round();
        assert!(!round.all_answered());
        assert_eq!(round.reveal(), 0);
        assert_eq!(round.score_line().as_deref(), Some("0/5"));
        for (i, question) in rome_quiz().questions.iter().enumerate() {
            assert_eq!(round.classify(i, &question.answer), OptionMark::Correct);
        }
    }

    #[test]
    fn classify_before_reveal_only_marks_selection() {
        let mut round = ready_round();
        round.select_option(0, "Paris");

        assert_eq!(round.classify(0, "Paris"), OptionMark::Selected);
        assert_eq!(round.classify(0, "Rome"), OptionMark::None);
        assert_eq!(round.classify(1, "Augustus"), OptionMark::None);
    }

    #[test]
    fn selection_can_be_overwritten() {
        let mut round = ready_round();
        assert!(round.select_option(0, "Paris"));
        assert!(round.select_option(0, "Rome"));
        assert!(!round.select_option(0, "Rome"));
        assert_eq!(round.selection(0), Some("Rome"));
    }

    #[test]
    fn invalid_selections_are_ignored() {
        let mut round = ready_round();
        assert!(!round.select_option(0, "Athens"));
        assert!(!round.select_option(9, "Rome"));
        assert_eq!(round.selection(0), None);
        assert_eq!(round.selection(9), None);
    }

    #[test]
    fn interaction_outside_ready_is_a_no_op() {
        let mut session = Session::default();
        assert!(!session.select_option(0, "Rome"));
        assert_eq!(session.reveal(), None);

        session.begin_generation(topic("Ancient Rome"));
        assert!(!session.select_option(0, "Rome"));
        assert_eq!(session.reveal(), None);
    }

    #[test]
    fn session_survives_json_storage() {
        let mut session = Session::default();
        let token = session.begin_generation(topic("Ancient Rome"));
        session.finish_generation(token, Ok(rome_quiz()));
        session.select_option(2, "Tiber");

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.round().unwrap().selection(2), Some("Tiber"));
    }
}
