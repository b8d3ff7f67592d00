mod config;
mod error;
mod quiz;
mod render;

use std::collections::HashMap;
use std::sync::Arc;

use chatgpt::client::ChatGPT;
use config::Config;
use dotenv::dotenv;
use log::{debug, error, warn};
use quiz::{
    ai_helper::QuizHelper,
    session::{QuizRound, RequestToken, Session, SessionState, GENERIC_ERROR_MESSAGE},
    Topic,
};
use render::Action;
use teloxide::{
    dispatching::dialogue::{serializer::Json, ErasedStorage, InMemStorage, SqliteStorage, Storage},
    prelude::*,
    types::{ChatAction, MessageId, ParseMode},
    utils::{command::BotCommands, html},
};
use tokio::sync::Mutex;

type QuizDialogue = Dialogue<Session, ErasedStorage<Session>>;
type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type SessionStorage = Arc<ErasedStorage<Session>>;

/// One lock per chat, serializing read-modify-write cycles on that chat's
/// dialogue state between handlers and the generation tasks they spawn.
#[derive(Clone, Default)]
struct SessionLocks(Arc<Mutex<HashMap<ChatId, Arc<Mutex<()>>>>>);

impl SessionLocks {
    async fn handle(&self, chat: ChatId) -> Arc<Mutex<()>> {
        self.0.lock().await.entry(chat).or_default().clone()
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "start over.")]
    Start,
    #[command(description = "show this text.")]
    Help,
}

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting quiz bot...");

    let config = Config::from_env()?;
    let bot = Bot::from_env();

    let storage: SessionStorage = match &config.session_db {
        Some(path) => {
            log::info!("Opening session database {}", path);
            SqliteStorage::open(path, Json).await?.erase()
        }
        None => InMemStorage::<Session>::new().erase(),
    };

    let gpt = ChatGPT::new_with_config(
        config.chatgpt_api_key.clone(),
        config.model_configuration()?,
    )?;

    let quiz_helper = Arc::new(QuizHelper::new(gpt, config.question_count));

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .enter_dialogue::<Message, ErasedStorage<Session>, Session>()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(command),
                )
                .branch(dptree::endpoint(receive_topic)),
        )
        .branch(
            Update::filter_callback_query()
                .enter_dialogue::<CallbackQuery, ErasedStorage<Session>, Session>()
                .endpoint(receive_answer),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![storage, quiz_helper, SessionLocks::default()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

const GREETING_TEXT: &str = "Hi! I build multiple-choice quizzes on any topic. Send me a topic (e.g. Quantum Physics, Ancient Rome, Machine Learning) and I'll generate a quiz for you.";
const TEXT_ONLY: &str = "Please send a topic as text.";
const STALE_QUIZ: &str = "This quiz is no longer active.";
const ANSWER_ALL_FIRST: &str = "Answer every question first.";

async fn command(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    cmd: Command,
    locks: SessionLocks,
) -> HandlerResult {
    match cmd {
        Command::Start => {
            let handle = locks.handle(msg.chat.id).await;
            let _guard = handle.lock().await;
            let mut session = dialogue.get_or_default().await?;
            session.reset();
            dialogue.update(session).await?;

            bot.send_message(msg.chat.id, GREETING_TEXT).await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
    }
    Ok(())
}

async fn receive_topic(
    bot: Bot,
    dialogue: QuizDialogue,
    msg: Message,
    quiz_helper: Arc<QuizHelper>,
    locks: SessionLocks,
) -> HandlerResult {
    let Some(topic) = topic_from(msg.text()) else {
        bot.send_message(msg.chat.id, TEXT_ONLY).await?;
        return Ok(());
    };

    let token = {
        let handle = locks.handle(msg.chat.id).await;
        let _guard = handle.lock().await;
        let mut session = dialogue.get_or_default().await?;
        if session.is_loading() {
            debug!("Chat {} switched topic mid-generation", msg.chat.id);
        }
        let token = session.begin_generation(topic.clone());
        dialogue.update(session).await?;
        token
    };

    // Only cosmetic, so a failure here is not worth surfacing
    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
    bot.send_message(
        msg.chat.id,
        format!("Generating a quiz on <b>{}</b>…", html::escape(topic.as_str())),
    )
    .parse_mode(ParseMode::Html)
    .await?;

    tokio::spawn(async move {
        if let Err(err) = run_generation(bot, dialogue, quiz_helper, locks, token, topic).await {
            log::error!("Error delivering quiz: {}", err);
        }
    });

    Ok(())
}

async fn run_generation(
    bot: Bot,
    dialogue: QuizDialogue,
    quiz_helper: Arc<QuizHelper>,
    locks: SessionLocks,
    token: RequestToken,
    topic: Topic,
) -> HandlerResult {
    let result = quiz_helper.generate_quiz(&topic).await;

    let handle = locks.handle(dialogue.chat_id()).await;
    let session = {
        let _guard = handle.lock().await;
        let mut session = dialogue.get_or_default().await?;
        if !session.finish_generation(token, result) {
            return Ok(());
        }
        dialogue.update(session.clone()).await?;
        session
    };

    match session.state() {
        SessionState::Ready(round) => {
            let sent = bot
                .send_message(dialogue.chat_id(), render::quiz_text(round))
                .parse_mode(ParseMode::Html)
                .reply_markup(render::quiz_keyboard(round))
                .await;
            if let Err(err) = sent {
                error!("Failed to send quiz to chat {}: {}", dialogue.chat_id(), err);
                let failed = {
                    let _guard = handle.lock().await;
                    let mut session = dialogue.get_or_default().await?;
                    let failed = session.fail_delivery(token);
                    if failed {
                        dialogue.update(session).await?;
                    }
                    failed
                };
                if failed {
                    bot.send_message(dialogue.chat_id(), GENERIC_ERROR_MESSAGE)
                        .await?;
                }
            }
        }
        SessionState::Error { message } => {
            bot.send_message(dialogue.chat_id(), message.as_str()).await?;
        }
        SessionState::Idle | SessionState::Loading { .. } => {}
    }
    Ok(())
}

async fn receive_answer(
    bot: Bot,
    dialogue: QuizDialogue,
    q: CallbackQuery,
    locks: SessionLocks,
) -> HandlerResult {
    let Some(action) = q.data.as_deref().and_then(Action::parse) else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let handle = locks.handle(dialogue.chat_id()).await;
    let outcome = {
        let _guard = handle.lock().await;
        let mut session = dialogue.get_or_default().await?;
        let outcome = apply_action(&mut session, action);
        if outcome == Outcome::Changed {
            dialogue.update(session.clone()).await?;
        }
        (outcome, session)
    };

    match outcome {
        (Outcome::Stale, _) => {
            bot.answer_callback_query(q.id).text(STALE_QUIZ).await?;
        }
        (Outcome::Incomplete, _) => {
            bot.answer_callback_query(q.id).text(ANSWER_ALL_FIRST).await?;
        }
        (Outcome::Unchanged, _) => {
            bot.answer_callback_query(q.id).await?;
        }
        (Outcome::Changed, session) => {
            bot.answer_callback_query(q.id).await?;
            if let (Some(round), Some(message)) = (session.round(), q.message.as_ref()) {
                redraw(&bot, message.chat.id, message.id, round).await;
            }
        }
    }
    Ok(())
}

/// A text message worth generating a quiz for: present and not blank.
fn topic_from(text: Option<&str>) -> Option<Topic> {
    text.and_then(|text| Topic::parse(text).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Changed,
    Unchanged,
    Stale,
    Incomplete,
}

fn apply_action(session: &mut Session, action: Action) -> Outcome {
    if !session.is_current(action.token()) {
        return Outcome::Stale;
    }

    match action {
        Action::Pick {
            question, option, ..
        } => {
            let picked = session
                .round()
                .and_then(|round| round.quiz().question(question))
                .and_then(|q| q.options.get(option))
                .cloned();
            let changed = picked.map_or(false, |picked| session.select_option(question, &picked));
            if changed {
                Outcome::Changed
            } else {
                Outcome::Unchanged
            }
        }
        Action::Reveal { .. } => {
            let (revealed, complete) = match session.round() {
                Some(round) => (round.is_revealed(), round.all_answered()),
                None => return Outcome::Stale,
            };
            if revealed {
                Outcome::Unchanged
            } else if !complete {
                Outcome::Incomplete
            } else {
                session.reveal();
                Outcome::Changed
            }
        }
    }
}

async fn redraw(bot: &Bot, chat_id: ChatId, message_id: MessageId, round: &QuizRound) {
    // Telegram rejects edits that leave the message unchanged; nothing to do then
    if let Err(err) = bot
        .edit_message_text(chat_id, message_id, render::quiz_text(round))
        .parse_mode(ParseMode::Html)
        .reply_markup(render::quiz_keyboard(round))
        .await
    {
        warn!("Failed to redraw quiz in chat {}: {}", chat_id, err);
    }
}
